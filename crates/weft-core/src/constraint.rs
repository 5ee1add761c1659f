//! # Feature Constraints
//!
//! The conditions a template can put on a feature value, one variant per
//! form of the template language:
//!
//! | Template  | Variant   |
//! |-----------|-----------|
//! | `f*`      | `Any`     |
//! | `f`       | `Present` |
//! | `f#`      | `Absent`  |
//! | `f=a\|b`  | `OneOf`   |
//! | `f#a\|b`  | `NoneOf`  |
//! | `f>n`     | `Greater` |
//! | `f<n`     | `Less`    |
//! | `f~re`    | `Matches` |
//! | `f?name`  | `Named`, bound to `Custom` before a search runs |
//!
//! Custom predicates are registered by name on a session and referred to
//! from templates with `f?name`.

use crate::{FeatureType, FeatureValue};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// A named test on feature values, supplied by the caller.
#[derive(Clone)]
pub struct ValuePredicate {
    name: String,
    test: Arc<dyn Fn(&FeatureValue) -> bool + Send + Sync>,
}

impl ValuePredicate {
    pub fn new<F>(name: impl Into<String>, test: F) -> Self
    where
        F: Fn(&FeatureValue) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            test: Arc::new(test),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn test(&self, value: &FeatureValue) -> bool {
        (self.test)(value)
    }
}

impl fmt::Debug for ValuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuePredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Custom predicates by name.
pub type Predicates = BTreeMap<String, ValuePredicate>;

/// A condition on the value of one feature of one node (or edge).
#[derive(Debug, Clone)]
pub enum FeatureConstraint {
    /// Anything, including no value. The feature is still loaded.
    Any,
    /// The feature has a value.
    Present,
    /// The feature has no value.
    Absent,
    /// The value is one of these.
    OneOf(BTreeSet<FeatureValue>),
    /// The value is none of these (a missing value qualifies).
    NoneOf(BTreeSet<FeatureValue>),
    /// The value is an integer greater than this.
    Greater(i64),
    /// The value is an integer less than this.
    Less(i64),
    /// The value is a string containing a match of this expression.
    Matches(Regex),
    /// A custom predicate referred to by name, not yet bound.
    Named(String),
    /// The value passes a custom predicate. A missing value never does.
    Custom(ValuePredicate),
}

impl FeatureConstraint {
    /// Whether a (possibly missing) value satisfies the constraint.
    #[must_use]
    pub fn matches(&self, value: Option<&FeatureValue>) -> bool {
        match self {
            Self::Any => true,
            Self::Present => value.is_some(),
            Self::Absent => value.is_none(),
            Self::OneOf(set) => value.is_some_and(|v| set.contains(v)),
            Self::NoneOf(set) => value.is_none_or(|v| !set.contains(v)),
            Self::Greater(n) => value.and_then(FeatureValue::as_int).is_some_and(|v| v > *n),
            Self::Less(n) => value.and_then(FeatureValue::as_int).is_some_and(|v| v < *n),
            Self::Matches(re) => value
                .and_then(FeatureValue::as_str)
                .is_some_and(|s| re.is_match(s)),
            Self::Named(_) => false,
            Self::Custom(predicate) => value.is_some_and(|v| predicate.test(v)),
        }
    }

    /// Replace a predicate name by the registered predicate.
    ///
    /// Returns the unknown name if nothing is registered under it.
    pub fn bind(self, predicates: &Predicates) -> Result<Self, String> {
        match self {
            Self::Named(name) => predicates
                .get(&name)
                .cloned()
                .map(Self::Custom)
                .ok_or(name),
            other => Ok(other),
        }
    }

    /// Adapt the constraint to the declared type of its feature.
    ///
    /// Value sets of integer features are converted to integers. Returns the
    /// offending values (as written) if the constraint does not fit the type.
    pub fn typed(self, value_type: FeatureType) -> Result<Self, Vec<String>> {
        match (self, value_type) {
            (Self::Greater(n), FeatureType::Str) => Err(vec![format!(">{n}")]),
            (Self::Less(n), FeatureType::Str) => Err(vec![format!("<{n}")]),
            (Self::Matches(re), FeatureType::Int) => Err(vec![format!("~{}", re.as_str())]),
            (Self::OneOf(set), FeatureType::Int) => cast_ints(set).map(Self::OneOf),
            (Self::NoneOf(set), FeatureType::Int) => cast_ints(set).map(Self::NoneOf),
            (other, _) => Ok(other),
        }
    }

    /// Whether this is the plain "has a value" condition.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Present)
    }
}

fn cast_ints(set: BTreeSet<FeatureValue>) -> Result<BTreeSet<FeatureValue>, Vec<String>> {
    let mut cast = BTreeSet::new();
    let mut wrong = Vec::new();
    for value in set {
        match value {
            FeatureValue::Int(n) => {
                cast.insert(FeatureValue::Int(n));
            }
            FeatureValue::Str(s) => match s.trim().parse::<i64>() {
                Ok(n) => {
                    cast.insert(FeatureValue::Int(n));
                }
                Err(_) => wrong.push(s),
            },
        }
    }
    if wrong.is_empty() { Ok(cast) } else { Err(wrong) }
}

fn join(set: &BTreeSet<FeatureValue>) -> String {
    set.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

impl fmt::Display for FeatureConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Present => Ok(()),
            Self::Absent => write!(f, "#"),
            Self::OneOf(set) => write!(f, "={}", join(set)),
            Self::NoneOf(set) => write!(f, "#{}", join(set)),
            Self::Greater(n) => write!(f, ">{n}"),
            Self::Less(n) => write!(f, "<{n}"),
            Self::Matches(re) => write!(f, "~{}", re.as_str()),
            Self::Named(name) => write!(f, "?{name}"),
            Self::Custom(predicate) => write!(f, "?{}", predicate.name()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn strs(values: &[&str]) -> BTreeSet<FeatureValue> {
        values.iter().map(|v| FeatureValue::text(*v)).collect()
    }

    #[test]
    fn presence() {
        let a = FeatureValue::text("a");
        assert!(FeatureConstraint::Any.matches(None));
        assert!(FeatureConstraint::Present.matches(Some(&a)));
        assert!(!FeatureConstraint::Present.matches(None));
        assert!(FeatureConstraint::Absent.matches(None));
        assert!(!FeatureConstraint::Absent.matches(Some(&a)));
    }

    #[test]
    fn value_sets() {
        let one_of = FeatureConstraint::OneOf(strs(&["a", "e"]));
        let none_of = FeatureConstraint::NoneOf(strs(&["a", "e"]));
        let b = FeatureValue::text("b");
        let e = FeatureValue::text("e");
        assert!(one_of.matches(Some(&e)));
        assert!(!one_of.matches(Some(&b)));
        assert!(!one_of.matches(None));
        assert!(none_of.matches(Some(&b)));
        assert!(none_of.matches(None));
        assert!(!none_of.matches(Some(&e)));
    }

    #[test]
    fn thresholds_need_integers() {
        let gt = FeatureConstraint::Greater(3);
        assert!(gt.matches(Some(&FeatureValue::Int(4))));
        assert!(!gt.matches(Some(&FeatureValue::Int(3))));
        assert!(!gt.matches(Some(&FeatureValue::text("9"))));
        assert!(!gt.matches(None));
        assert!(FeatureConstraint::Less(0).matches(Some(&FeatureValue::Int(-1))));
    }

    #[test]
    fn regex_searches_anywhere() {
        let re = FeatureConstraint::Matches(Regex::new("ou").expect("regex"));
        assert!(re.matches(Some(&FeatureValue::text("house"))));
        assert!(!re.matches(Some(&FeatureValue::text("home"))));
        assert!(!re.matches(None));
    }

    #[test]
    fn typing_casts_integer_sets() {
        let typed = FeatureConstraint::OneOf(strs(&["1", "20"]))
            .typed(FeatureType::Int)
            .expect("cast");
        assert!(typed.matches(Some(&FeatureValue::Int(20))));

        let wrong = FeatureConstraint::NoneOf(strs(&["1", "x"])).typed(FeatureType::Int);
        assert_eq!(wrong.err(), Some(vec!["x".to_string()]));

        assert!(FeatureConstraint::Greater(1).typed(FeatureType::Str).is_err());
        let re = FeatureConstraint::Matches(Regex::new("a").expect("regex"));
        assert!(re.typed(FeatureType::Int).is_err());
    }

    #[test]
    fn custom_predicates_bind_by_name() {
        let mut predicates = Predicates::new();
        predicates.insert(
            "even".to_string(),
            ValuePredicate::new("even", |v| v.as_int().is_some_and(|n| n % 2 == 0)),
        );
        let named = FeatureConstraint::Named("even".to_string());
        assert!(!named.matches(Some(&FeatureValue::Int(2))));

        let bound = named.bind(&predicates).expect("registered");
        assert!(bound.matches(Some(&FeatureValue::Int(2))));
        assert!(!bound.matches(Some(&FeatureValue::Int(3))));
        assert!(!bound.matches(Some(&FeatureValue::text("2"))));
        assert!(!bound.matches(None));
        assert_eq!(bound.to_string(), "?even");

        let unknown = FeatureConstraint::Named("odd".to_string()).bind(&predicates);
        assert_eq!(unknown.err(), Some("odd".to_string()));
    }

    #[test]
    fn display_forms() {
        assert_eq!(FeatureConstraint::OneOf(strs(&["b", "a"])).to_string(), "=a|b");
        assert_eq!(FeatureConstraint::Greater(5).to_string(), ">5");
        assert_eq!(FeatureConstraint::Absent.to_string(), "#");
    }
}
