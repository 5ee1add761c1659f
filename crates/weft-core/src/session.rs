//! # Session Module
//!
//! The search facade: a corpus, its search configuration, the custom node
//! sets templates may use as atom types, and the custom predicates they may
//! use as feature conditions.
//!
//! - `study` prepares a template and hands back the ready [`Query`]
//! - `search` studies and fetches in one go; `search_shallow` keeps distinct
//!   result prefixes only
//! - `count` studies and counts
//! - `glean` renders a result tuple as text
//! - `relations_legend` documents the relations this corpus supports
//!
//! A session never mutates its corpus; queries borrow it.

use crate::constraint::{Predicates, ValuePredicate};
use crate::relations::RelationRegistry;
use crate::semantics::CustomSets;
use crate::{
    Corpus, FeatureValue, MemoryCorpus, NodeId, Query, ResultTuple, SearchConfig, Strategy,
    WeftError,
};
use std::collections::BTreeSet;

/// Slots shown per node by [`Session::glean`].
const GLEAN_SLOTS: usize = 5;

/// A corpus ready to be searched.
#[derive(Debug)]
pub struct Session<C: Corpus = MemoryCorpus> {
    corpus: C,
    config: SearchConfig,
    sets: CustomSets,
    predicates: Predicates,
}

impl<C: Corpus> Session<C> {
    /// A session with the default configuration.
    #[must_use]
    pub fn new(corpus: C) -> Self {
        Self::with_config(corpus, SearchConfig::default())
    }

    #[must_use]
    pub fn with_config(corpus: C, config: SearchConfig) -> Self {
        Self {
            corpus,
            config,
            sets: CustomSets::new(),
            predicates: Predicates::new(),
        }
    }

    #[must_use]
    pub fn corpus(&self) -> &C {
        &self.corpus
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SearchConfig) {
        self.config = config;
    }

    // =========================================================================
    // CUSTOM SETS
    // =========================================================================

    /// Register a named node set. Templates can then use `name` as an atom
    /// type; it takes precedence over a node type of the same name.
    pub fn add_set(&mut self, name: impl Into<String>, nodes: impl IntoIterator<Item = NodeId>) {
        self.sets.insert(name.into(), nodes.into_iter().collect());
    }

    /// Drop a named node set. Returns it if it existed.
    pub fn remove_set(&mut self, name: &str) -> Option<BTreeSet<NodeId>> {
        self.sets.remove(name)
    }

    #[must_use]
    pub fn sets(&self) -> &CustomSets {
        &self.sets
    }

    // =========================================================================
    // CUSTOM PREDICATES
    // =========================================================================

    /// Register a test on feature values. Templates use it as `f?name`.
    pub fn add_predicate<F>(&mut self, name: impl Into<String>, test: F)
    where
        F: Fn(&FeatureValue) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        self.predicates
            .insert(name.clone(), ValuePredicate::new(name, test));
    }

    pub fn remove_predicate(&mut self, name: &str) -> Option<ValuePredicate> {
        self.predicates.remove(name)
    }

    // =========================================================================
    // SEARCH
    // =========================================================================

    /// Prepare a template for result retrieval.
    ///
    /// `strategy` names a planning strategy; `None` uses the default.
    pub fn study(&self, template: &str, strategy: Option<&str>) -> Result<Query<'_, C>, WeftError> {
        let strategy = strategy.map(str::parse::<Strategy>).transpose()?;
        let mut query = Query::new(&self.corpus, template, &self.sets, self.config)
            .with_predicates(&self.predicates);
        query.study(strategy)?;
        Ok(query)
    }

    /// All results of a template, or the first `limit` of them.
    pub fn search(&self, template: &str, limit: Option<usize>) -> Result<Vec<ResultTuple>, WeftError> {
        Ok(self.study(template, None)?.fetch(limit))
    }

    /// Distinct prefixes of length `shallow` of the results of a template.
    /// See [`Query::fetch_shallow`].
    pub fn search_shallow(
        &self,
        template: &str,
        shallow: usize,
    ) -> Result<BTreeSet<ResultTuple>, WeftError> {
        Ok(self.study(template, None)?.fetch_shallow(shallow))
    }

    /// Render a result tuple as text, one field per node.
    ///
    /// A slot shows its value of `text_feature`; any other node shows its
    /// type and the values of its first slots, as in `word[c a t]`.
    #[must_use]
    pub fn glean(&self, tuple: &[NodeId], text_feature: &str) -> String {
        let text = |n: NodeId| {
            self.corpus
                .value(text_feature, n)
                .map(ToString::to_string)
                .unwrap_or_default()
        };
        tuple
            .iter()
            .map(|n| {
                if self.corpus.is_slot(*n) {
                    return text(*n);
                }
                let slots = self.corpus.oslots(*n);
                let mut shown: Vec<String> =
                    slots.iter().take(GLEAN_SLOTS).map(|s| text(*s)).collect();
                if slots.len() > GLEAN_SLOTS {
                    shown.push("...".to_string());
                }
                let otype = self.corpus.node_type(*n).unwrap_or_default();
                format!("{otype}[{}]", shown.join(" "))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Count the results of a template. See [`Query::count`].
    pub fn count(
        &self,
        template: &str,
        progress: Option<usize>,
        limit: Option<usize>,
    ) -> Result<usize, WeftError> {
        self.study(template, None)?.count(progress, limit)
    }

    /// The relations available on this corpus, one per line.
    #[must_use]
    pub fn relations_legend(&self) -> String {
        RelationRegistry::for_corpus(&self.corpus).legend()
    }
}

// =============================================================================
// TESTS
// =============================================================================
