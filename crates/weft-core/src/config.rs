//! # Search Configuration
//!
//! Tuning parameters of the constraint propagator, the spread estimator and
//! `count`. None of them changes which results a query produces.
//!
//! Configuration can be read from TOML:
//!
//! ```toml
//! spin_limit = 5000
//! try_limit_from = 10
//! try_limit_to = 10
//! progress = 100
//! count_limit = 0
//! ```

use crate::{WeftError, primitives};
use serde::{Deserialize, Serialize};

/// Performance parameters of a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Work budget of one generic narrowing step.
    pub spin_limit: u64,
    /// Source nodes sampled per spread estimate.
    pub try_limit_from: usize,
    /// Target nodes sampled per source for predicate relations.
    pub try_limit_to: usize,
    /// `count` logs progress every this many results.
    pub progress: usize,
    /// `count` stops after this many results; 0 counts everything.
    pub count_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            spin_limit: primitives::SPIN_LIMIT,
            try_limit_from: primitives::TRY_LIMIT_FROM,
            try_limit_to: primitives::TRY_LIMIT_TO,
            progress: primitives::PROGRESS,
            count_limit: primitives::COUNT_LIMIT,
        }
    }
}

impl SearchConfig {
    /// Parse a configuration from TOML. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, WeftError> {
        let config: Self = toml::from_str(text).map_err(|e| WeftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable sampling or progress reporting.
    pub fn validate(&self) -> Result<(), WeftError> {
        if self.try_limit_from == 0 || self.try_limit_to == 0 {
            return Err(WeftError::Config(
                "sample sizes must be at least 1".to_string(),
            ));
        }
        if self.progress == 0 {
            return Err(WeftError::Config(
                "progress interval must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parameters as (name, value) pairs, for plan rendering.
    #[must_use]
    pub fn params(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("spin_limit", self.spin_limit),
            ("try_limit_from", self.try_limit_from as u64),
            ("try_limit_to", self.try_limit_to as u64),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SearchConfig::default();
        assert_eq!(config.spin_limit, 1000);
        assert_eq!(config.try_limit_from, 10);
        assert_eq!(config.count_limit, 1000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SearchConfig::from_toml_str("spin_limit = 50\ncount_limit = 0\n")
            .expect("parse");
        assert_eq!(config.spin_limit, 50);
        assert_eq!(config.count_limit, 0);
        assert_eq!(config.progress, 100);
    }

    #[test]
    fn bad_toml_rejected() {
        assert!(matches!(
            SearchConfig::from_toml_str("spin_limit = \"lots\""),
            Err(WeftError::Config(_))
        ));
        assert!(SearchConfig::from_toml_str("try_limit_from = 0").is_err());
    }
}
