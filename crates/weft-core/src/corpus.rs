//! # Corpus
//!
//! The read-only corpus a search runs against.
//!
//! This module defines the `Corpus` trait (everything the search pipeline
//! asks of its data) and `MemoryCorpus`, an in-memory implementation built
//! with `CorpusBuilder`.
//!
//! ## Corpus Model
//!
//! - Slots are the atomic, linearly ordered units, numbered `1..=max_slot`
//! - Every other node occupies a non-empty set of slots and is numbered after
//!   the slots
//! - Nodes carry typed feature values; edge features connect node pairs,
//!   optionally with a value per edge
//!
//! All indices use `BTreeMap` or dense `Vec` tables for deterministic ordering.

use crate::primitives::MAX_CORPUS_NODES;
use crate::{FeatureType, FeatureValue, NodeId, WeftError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A target of an edge feature, with the value of that edge if the feature
/// carries values.
pub type EdgeTarget = (NodeId, Option<FeatureValue>);

// =============================================================================
// CORPUS TRAIT
// =============================================================================

/// Everything the search pipeline needs from a corpus.
///
/// Implementations are never mutated by a search. Lookups on unknown nodes
/// or features return empty results rather than errors; validation of
/// names happens before any data is touched.
pub trait Corpus {
    /// Name of the slot type.
    fn slot_type(&self) -> &str;

    /// Highest slot number.
    fn max_slot(&self) -> u64;

    /// Highest node number.
    fn max_node(&self) -> u64;

    /// All node types, most comprehensive first, slot type last.
    fn levels(&self) -> &[String];

    /// The type of a node.
    fn node_type(&self, node: NodeId) -> Option<&str>;

    /// All nodes of a type, in node order.
    fn nodes_of_type(&self, otype: &str) -> &[NodeId];

    /// The slots occupied by a node, ascending. A slot occupies itself.
    fn oslots(&self, node: NodeId) -> &[NodeId];

    /// Position of a node in the canonical order.
    fn rank(&self, node: NodeId) -> u64;

    /// Non-slot nodes whose slots include all slots of `node`, most deeply
    /// embedded first.
    fn embedders(&self, node: NodeId) -> &[NodeId];

    /// Non-slot nodes whose slots are all slots of the non-slot `node`.
    fn embeddees(&self, node: NodeId) -> &[NodeId];

    /// Non-slot nodes whose first slot is `slot`.
    fn starting_at(&self, slot: u64) -> &[NodeId];

    /// Non-slot nodes whose last slot is `slot`.
    fn ending_at(&self, slot: u64) -> &[NodeId];

    /// Declared value type of a node feature.
    fn node_feature_type(&self, name: &str) -> Option<FeatureType>;

    /// Declared edge feature. The inner value is the type of the edge values,
    /// `None` for edges without values.
    fn edge_feature_type(&self, name: &str) -> Option<Option<FeatureType>>;

    /// Names of all edge features.
    fn edge_feature_names(&self) -> Vec<String>;

    /// Value of a node feature for a node.
    fn value(&self, feature: &str, node: NodeId) -> Option<&FeatureValue>;

    /// Outgoing edges of a node along an edge feature.
    fn edges_from(&self, feature: &str, node: NodeId) -> &[EdgeTarget];

    /// Incoming edges of a node along an edge feature.
    fn edges_to(&self, feature: &str, node: NodeId) -> &[EdgeTarget];

    /// Make sure the given features can be read. Blocks until they are.
    fn ensure_loaded(&self, features: &BTreeSet<String>) -> Result<(), WeftError>;

    /// Whether a node is a slot.
    fn is_slot(&self, node: NodeId) -> bool {
        node.0 >= 1 && node.0 <= self.max_slot()
    }

    /// First slot of a node.
    fn first_slot(&self, node: NodeId) -> Option<u64> {
        self.oslots(node).first().map(|s| s.0)
    }

    /// Last slot of a node.
    fn last_slot(&self, node: NodeId) -> Option<u64> {
        self.oslots(node).last().map(|s| s.0)
    }
}

// =============================================================================
// SERIALIZABLE CORPUS
// =============================================================================

/// Raw corpus data: what a `CorpusBuilder` collects and what a snapshot
/// stores. Every derived index is recomputed from this on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableCorpus {
    pub slot_type: String,
    pub max_slot: u64,
    /// Non-slot nodes in node order: (type, occupied slots).
    pub nodes: Vec<(String, Vec<u64>)>,
    pub node_features: BTreeMap<String, NodeFeatureData>,
    pub edge_features: BTreeMap<String, EdgeFeatureData>,
}

/// Values of one node feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFeatureData {
    pub value_type: FeatureType,
    pub values: BTreeMap<u64, FeatureValue>,
}

/// Edges of one edge feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFeatureData {
    pub value_type: Option<FeatureType>,
    pub edges: BTreeMap<u64, BTreeMap<u64, Option<FeatureValue>>>,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Incremental construction of a `MemoryCorpus`.
#[derive(Debug, Clone)]
pub struct CorpusBuilder {
    data: SerializableCorpus,
}

impl CorpusBuilder {
    /// Start a corpus with `slots` slots of type `slot_type`.
    #[must_use]
    pub fn new(slot_type: impl Into<String>, slots: u64) -> Self {
        Self {
            data: SerializableCorpus {
                slot_type: slot_type.into(),
                max_slot: slots,
                ..SerializableCorpus::default()
            },
        }
    }

    /// Add a non-slot node occupying the given slots. Returns its id.
    pub fn add_node(&mut self, otype: &str, slots: &[u64]) -> Result<NodeId, WeftError> {
        if otype == self.data.slot_type {
            return Err(WeftError::InvalidCorpus(format!(
                "nodes of the slot type \"{otype}\" are created by the builder"
            )));
        }
        let mut sorted: Vec<u64> = slots.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.is_empty() {
            return Err(WeftError::InvalidCorpus(format!(
                "node of type \"{otype}\" occupies no slots"
            )));
        }
        if let Some(bad) = sorted.iter().find(|s| **s == 0 || **s > self.data.max_slot) {
            return Err(WeftError::InvalidCorpus(format!(
                "slot {bad} out of range 1..={}",
                self.data.max_slot
            )));
        }
        self.data.nodes.push((otype.to_string(), sorted));
        Ok(NodeId(self.max_node()))
    }

    /// Set the value of a node feature. The first value fixes the feature type.
    pub fn set_value(
        &mut self,
        feature: &str,
        node: NodeId,
        value: FeatureValue,
    ) -> Result<(), WeftError> {
        self.check_node(node)?;
        let data = self
            .data
            .node_features
            .entry(feature.to_string())
            .or_insert_with(|| NodeFeatureData {
                value_type: value.feature_type(),
                values: BTreeMap::new(),
            });
        if data.value_type != value.feature_type() {
            return Err(WeftError::InvalidCorpus(format!(
                "feature \"{feature}\" has type {} but got value {value}",
                data.value_type
            )));
        }
        data.values.insert(node.0, value);
        Ok(())
    }

    /// Declare an edge feature, with or without edge values.
    pub fn declare_edge_feature(&mut self, feature: &str, value_type: Option<FeatureType>) {
        self.data
            .edge_features
            .entry(feature.to_string())
            .or_insert_with(|| EdgeFeatureData {
                value_type,
                edges: BTreeMap::new(),
            });
    }

    /// Add an edge. The feature must have been declared.
    pub fn add_edge(
        &mut self,
        feature: &str,
        from: NodeId,
        to: NodeId,
        value: Option<FeatureValue>,
    ) -> Result<(), WeftError> {
        self.check_node(from)?;
        self.check_node(to)?;
        let data = self.data.edge_features.get_mut(feature).ok_or_else(|| {
            WeftError::InvalidCorpus(format!("edge feature \"{feature}\" is not declared"))
        })?;
        let value_ok = match (&data.value_type, &value) {
            (None, None) => true,
            (Some(t), Some(v)) => *t == v.feature_type(),
            _ => false,
        };
        if !value_ok {
            return Err(WeftError::InvalidCorpus(format!(
                "edge {from} -> {to} has the wrong kind of value for \"{feature}\""
            )));
        }
        data.edges.entry(from.0).or_default().insert(to.0, value);
        Ok(())
    }

    /// Highest node number so far.
    #[must_use]
    pub fn max_node(&self) -> u64 {
        self.data.max_slot.saturating_add(self.data.nodes.len() as u64)
    }

    /// Compute all indices and produce the corpus.
    pub fn build(self) -> Result<MemoryCorpus, WeftError> {
        MemoryCorpus::try_from(self.data)
    }

    fn check_node(&self, node: NodeId) -> Result<(), WeftError> {
        if node.0 == 0 || node.0 > self.max_node() {
            return Err(WeftError::InvalidCorpus(format!(
                "node {node} out of range 1..={}",
                self.max_node()
            )));
        }
        Ok(())
    }
}

// =============================================================================
// MEMORY CORPUS
// =============================================================================

/// An in-memory corpus with all indices precomputed.
#[derive(Debug, Clone)]
pub struct MemoryCorpus {
    data: SerializableCorpus,
    levels: Vec<String>,
    /// Level index per node (0 = most comprehensive type).
    level_of: Vec<usize>,
    by_type: BTreeMap<String, Vec<NodeId>>,
    oslots: Vec<Vec<NodeId>>,
    rank: Vec<u64>,
    embedders: Vec<Vec<NodeId>>,
    embeddees: Vec<Vec<NodeId>>,
    starting: Vec<Vec<NodeId>>,
    ending: Vec<Vec<NodeId>>,
    forward: BTreeMap<String, BTreeMap<NodeId, Vec<EdgeTarget>>>,
    backward: BTreeMap<String, BTreeMap<NodeId, Vec<EdgeTarget>>>,
    loaded: RefCell<BTreeSet<String>>,
}

impl TryFrom<SerializableCorpus> for MemoryCorpus {
    type Error = WeftError;

    fn try_from(mut data: SerializableCorpus) -> Result<Self, WeftError> {
        let max_slot = data.max_slot;
        let max_node = max_slot.saturating_add(data.nodes.len() as u64);
        if max_node > MAX_CORPUS_NODES {
            return Err(WeftError::InvalidCorpus(format!(
                "{max_node} nodes exceed the limit of {MAX_CORPUS_NODES}"
            )));
        }
        let size = (max_node as usize).saturating_add(1);
        for (_, slots) in &mut data.nodes {
            slots.sort_unstable();
            slots.dedup();
        }

        // Occupied slots; index 0 is unused.
        let mut oslots: Vec<Vec<NodeId>> = vec![Vec::new(); size];
        for s in 1..=max_slot {
            oslots[s as usize] = vec![NodeId(s)];
        }
        for (i, (otype, slots)) in data.nodes.iter().enumerate() {
            if otype == &data.slot_type || slots.is_empty() {
                return Err(WeftError::InvalidCorpus(format!(
                    "bad node of type \"{otype}\""
                )));
            }
            if slots.iter().any(|s| *s == 0 || *s > max_slot) {
                return Err(WeftError::InvalidCorpus(format!(
                    "node of type \"{otype}\" occupies a slot out of range"
                )));
            }
            oslots[max_slot as usize + 1 + i] = slots.iter().map(|s| NodeId(*s)).collect();
        }

        let levels = compute_levels(&data);
        let level_index: BTreeMap<&str, usize> = levels
            .iter()
            .enumerate()
            .map(|(i, t)| (t.as_str(), i))
            .collect();
        let mut level_of = vec![0usize; size];
        let mut by_type: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        let slot_level = levels.len().saturating_sub(1);
        for s in 1..=max_slot {
            level_of[s as usize] = slot_level;
            by_type
                .entry(data.slot_type.clone())
                .or_default()
                .push(NodeId(s));
        }
        for (i, (otype, _)) in data.nodes.iter().enumerate() {
            let n = max_slot as usize + 1 + i;
            level_of[n] = level_index.get(otype.as_str()).copied().unwrap_or(0);
            by_type
                .entry(otype.clone())
                .or_default()
                .push(NodeId(n as u64));
        }

        // Canonical order and rank.
        let mut order: Vec<NodeId> = (1..=max_node).map(NodeId).collect();
        order.sort_by(|a, b| canonical_cmp(&oslots, &level_of, *a, *b));
        let mut rank = vec![0u64; size];
        for (r, n) in order.iter().enumerate() {
            rank[n.index()] = r as u64;
        }

        // Non-slot nodes covering each slot, in canonical order.
        let mut containing: Vec<Vec<NodeId>> = vec![Vec::new(); max_slot as usize + 1];
        let mut starting: Vec<Vec<NodeId>> = vec![Vec::new(); max_slot as usize + 2];
        let mut ending: Vec<Vec<NodeId>> = vec![Vec::new(); max_slot as usize + 2];
        for n in order.iter().filter(|n| n.0 > max_slot) {
            let slots = &oslots[n.index()];
            for s in slots {
                containing[s.index()].push(*n);
            }
            if let (Some(first), Some(last)) = (slots.first(), slots.last()) {
                starting[first.index()].push(*n);
                ending[last.index()].push(*n);
            }
        }

        // Embedders: candidates are the nodes covering the first slot.
        let mut embedders: Vec<Vec<NodeId>> = vec![Vec::new(); size];
        let mut embeddees: Vec<Vec<NodeId>> = vec![Vec::new(); size];
        for n in 1..=max_node {
            let node = NodeId(n);
            let slots = &oslots[node.index()];
            let Some(first) = slots.first() else {
                continue;
            };
            let mut up: Vec<NodeId> = containing[first.index()]
                .iter()
                .filter(|m| **m != node && is_subset(slots, &oslots[m.index()]))
                .copied()
                .collect();
            up.sort_by(|a, b| rank[b.index()].cmp(&rank[a.index()]));
            if n > max_slot {
                for m in &up {
                    embeddees[m.index()].push(node);
                }
            }
            embedders[node.index()] = up;
        }
        for down in &mut embeddees {
            down.sort_by_key(|m| rank[m.index()]);
        }

        let mut forward: BTreeMap<String, BTreeMap<NodeId, Vec<EdgeTarget>>> = BTreeMap::new();
        let mut backward: BTreeMap<String, BTreeMap<NodeId, Vec<EdgeTarget>>> = BTreeMap::new();
        for (name, feature) in &data.edge_features {
            let fwd = forward.entry(name.clone()).or_default();
            let bwd = backward.entry(name.clone()).or_default();
            for (from, targets) in &feature.edges {
                for (to, value) in targets {
                    if *from == 0 || *from > max_node || *to == 0 || *to > max_node {
                        return Err(WeftError::InvalidCorpus(format!(
                            "edge {from} -> {to} of \"{name}\" refers to a missing node"
                        )));
                    }
                    fwd.entry(NodeId(*from))
                        .or_default()
                        .push((NodeId(*to), value.clone()));
                    bwd.entry(NodeId(*to))
                        .or_default()
                        .push((NodeId(*from), value.clone()));
                }
            }
        }

        Ok(Self {
            data,
            levels,
            level_of,
            by_type,
            oslots,
            rank,
            embedders,
            embeddees,
            starting,
            ending,
            forward,
            backward,
            loaded: RefCell::new(BTreeSet::new()),
        })
    }
}

impl From<&MemoryCorpus> for SerializableCorpus {
    fn from(corpus: &MemoryCorpus) -> Self {
        corpus.data.clone()
    }
}

impl MemoryCorpus {
    /// Features that have been requested through `ensure_loaded`.
    #[must_use]
    pub fn loaded_features(&self) -> BTreeSet<String> {
        self.loaded.borrow().clone()
    }

    /// Names of all node features.
    #[must_use]
    pub fn node_feature_names(&self) -> Vec<String> {
        self.data.node_features.keys().cloned().collect()
    }

    /// Level index of a node's type (0 = most comprehensive).
    #[must_use]
    pub fn level_of(&self, node: NodeId) -> Option<usize> {
        self.level_of.get(node.index()).copied()
    }
}

impl Corpus for MemoryCorpus {
    fn slot_type(&self) -> &str {
        &self.data.slot_type
    }

    fn max_slot(&self) -> u64 {
        self.data.max_slot
    }

    fn max_node(&self) -> u64 {
        self.data
            .max_slot
            .saturating_add(self.data.nodes.len() as u64)
    }

    fn levels(&self) -> &[String] {
        &self.levels
    }

    fn node_type(&self, node: NodeId) -> Option<&str> {
        if self.is_slot(node) {
            return Some(&self.data.slot_type);
        }
        let i = node.0.checked_sub(self.data.max_slot)?.checked_sub(1)?;
        self.data.nodes.get(i as usize).map(|(t, _)| t.as_str())
    }

    fn nodes_of_type(&self, otype: &str) -> &[NodeId] {
        self.by_type.get(otype).map(Vec::as_slice).unwrap_or_default()
    }

    fn oslots(&self, node: NodeId) -> &[NodeId] {
        self.oslots.get(node.index()).map(Vec::as_slice).unwrap_or_default()
    }

    fn rank(&self, node: NodeId) -> u64 {
        self.rank.get(node.index()).copied().unwrap_or(u64::MAX)
    }

    fn embedders(&self, node: NodeId) -> &[NodeId] {
        self.embedders.get(node.index()).map(Vec::as_slice).unwrap_or_default()
    }

    fn embeddees(&self, node: NodeId) -> &[NodeId] {
        self.embeddees.get(node.index()).map(Vec::as_slice).unwrap_or_default()
    }

    fn starting_at(&self, slot: u64) -> &[NodeId] {
        self.starting.get(slot as usize).map(Vec::as_slice).unwrap_or_default()
    }

    fn ending_at(&self, slot: u64) -> &[NodeId] {
        self.ending.get(slot as usize).map(Vec::as_slice).unwrap_or_default()
    }

    fn node_feature_type(&self, name: &str) -> Option<FeatureType> {
        self.data.node_features.get(name).map(|f| f.value_type)
    }

    fn edge_feature_type(&self, name: &str) -> Option<Option<FeatureType>> {
        self.data.edge_features.get(name).map(|f| f.value_type)
    }

    fn edge_feature_names(&self) -> Vec<String> {
        self.data.edge_features.keys().cloned().collect()
    }

    fn value(&self, feature: &str, node: NodeId) -> Option<&FeatureValue> {
        self.data.node_features.get(feature)?.values.get(&node.0)
    }

    fn edges_from(&self, feature: &str, node: NodeId) -> &[EdgeTarget] {
        self.forward
            .get(feature)
            .and_then(|m| m.get(&node))
            .map(Vec::as_slice).unwrap_or_default()
    }

    fn edges_to(&self, feature: &str, node: NodeId) -> &[EdgeTarget] {
        self.backward
            .get(feature)
            .and_then(|m| m.get(&node))
            .map(Vec::as_slice).unwrap_or_default()
    }

    fn ensure_loaded(&self, features: &BTreeSet<String>) -> Result<(), WeftError> {
        let missing: Vec<&str> = features
            .iter()
            .filter(|f| {
                !self.data.node_features.contains_key(f.as_str())
                    && !self.data.edge_features.contains_key(f.as_str())
            })
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(WeftError::InvalidCorpus(format!(
                "cannot load features: {}",
                missing.join(", ")
            )));
        }
        self.loaded.borrow_mut().extend(features.iter().cloned());
        Ok(())
    }
}

// =============================================================================
// ORDERING HELPERS
// =============================================================================

/// Types ordered by decreasing average slot count, slot type last.
fn compute_levels(data: &SerializableCorpus) -> Vec<String> {
    let mut stats: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for (otype, slots) in &data.nodes {
        let entry = stats.entry(otype.as_str()).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(slots.len() as u64);
        entry.1 = entry.1.saturating_add(1);
    }
    let mut types: Vec<(&str, u64, u64)> = stats.into_iter().map(|(t, (s, c))| (t, s, c)).collect();
    // Compare averages s1/c1 and s2/c2 by cross multiplication.
    types.sort_by(|a, b| {
        (b.1.saturating_mul(a.2))
            .cmp(&a.1.saturating_mul(b.2))
            .then_with(|| a.0.cmp(b.0))
    });
    let mut levels: Vec<String> = types.into_iter().map(|(t, _, _)| t.to_string()).collect();
    levels.push(data.slot_type.clone());
    levels
}

/// Canonical order: the node owning the smallest slot of the symmetric
/// difference of both slot sets comes first; equal slot sets go by level,
/// then by node number.
fn canonical_cmp(oslots: &[Vec<NodeId>], level_of: &[usize], a: NodeId, b: NodeId) -> Ordering {
    let sa = &oslots[a.index()];
    let sb = &oslots[b.index()];
    let (mut i, mut j) = (0, 0);
    while i < sa.len() && j < sb.len() {
        match sa[i].cmp(&sb[j]) {
            Ordering::Equal => {
                i += 1;
                j += 1;
            }
            Ordering::Less => return Ordering::Less,
            Ordering::Greater => return Ordering::Greater,
        }
    }
    if i < sa.len() {
        return Ordering::Less;
    }
    if j < sb.len() {
        return Ordering::Greater;
    }
    level_of[a.index()]
        .cmp(&level_of[b.index()])
        .then_with(|| a.cmp(&b))
}

/// Whether sorted `inner` is a subset of sorted `outer`.
fn is_subset(inner: &[NodeId], outer: &[NodeId]) -> bool {
    let mut j = 0;
    for s in inner {
        while j < outer.len() && outer[j] < *s {
            j += 1;
        }
        if j >= outer.len() || outer[j] != *s {
            return false;
        }
    }
    true
}

// =============================================================================
// TESTS
// =============================================================================
