//! # Relation Algebra
//!
//! The relations a template can put between two atoms.
//!
//! - Base relations on node identity, canonical order and slot positions
//! - k-parametrized nearness relations (`=k:`, `:k=`, `:k:`, `<k:`, `:k>`),
//!   registered per query for every literal `k` that occurs
//! - Edge relations (`-f>`, `<f-`, `<f>`) over the corpus's edge features,
//!   optionally with a filter on the edge value
//! - Feature comparisons (`.f.`, `.f=g.`, `.f#g.`, `.f<g.`, `.f>g.`,
//!   `.f~re~g.`) between a feature of the left node and one of the right,
//!   registered per query like the k-relations
//!
//! Relations live in a `RelationRegistry` in converse pairs: relation `2i`
//! and `2i + 1` are each other's converse. A self-converse relation occupies
//! both places of its pair.
//!
//! A relation is either a *generator* (node -> candidate nodes) or a
//! *predicate* (node, node -> bool). Both kinds answer `holds`.

use crate::{Corpus, FeatureConstraint, FeatureValue, NodeId};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// RELATION TYPES
// =============================================================================

/// How the constraint propagator narrows yarns through a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spin {
    /// A fixed fraction (per mille) of the target yarn is expected to match
    /// any source node. Narrowing is pointless and skipped.
    Ratio(u64),
    /// Narrowing by grouping both yarns on a derived key.
    Indexed,
    /// Narrowing by running the relation over all candidate pairs.
    Generic,
}

/// Whether a relation enumerates its targets or only tests pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pairing {
    Generator,
    Predicate,
}

/// Direction of an edge relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    /// `-f>`: from left to right.
    Forward,
    /// `<f-`: from right to left.
    Backward,
    /// `<f>`: either way.
    Both,
}

impl EdgeDirection {
    /// Classify an operator by its arrow shape.
    #[must_use]
    pub fn of(op: &str) -> Option<Self> {
        let bytes = op.as_bytes();
        if bytes.len() < 3 {
            return None;
        }
        match (bytes[0], bytes[bytes.len() - 1]) {
            (b'-', b'>') => Some(Self::Forward),
            (b'<', b'-') => Some(Self::Backward),
            (b'<', b'>') => Some(Self::Both),
            _ => None,
        }
    }

    const fn converse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
            Self::Both => Self::Both,
        }
    }

    fn acronym(self, inner: &str) -> String {
        match self {
            Self::Forward => format!("-{inner}>"),
            Self::Backward => format!("<{inner}-"),
            Self::Both => format!("<{inner}>"),
        }
    }
}

/// What a relation computes.
#[derive(Debug, Clone)]
pub enum RelOp {
    Equal,
    Unequal,
    Before,
    After,
    SameSlots,
    Overlap,
    DiffSlots,
    Disjoint,
    Embeds,
    EmbeddedIn,
    SlotBefore,
    SlotAfter,
    SameFirst,
    SameLast,
    SameBoundary,
    AdjBefore,
    AdjAfter,
    NearFirst(u64),
    NearLast(u64),
    NearBoundary(u64),
    NearBefore(u64),
    NearAfter(u64),
    Edge {
        feature: String,
        direction: EdgeDirection,
        filter: FeatureConstraint,
    },
    /// The left value equals the right value. Both must be present.
    FeatureEqual { left: String, right: String },
    /// The values differ, or both are missing.
    FeatureUnequal { left: String, right: String },
    FeatureLess { left: String, right: String },
    FeatureGreater { left: String, right: String },
    /// Both values are equal once every match of `pattern` is deleted.
    FeatureMatch {
        left: String,
        pattern: Regex,
        right: String,
    },
}

/// A relation as registered for a query.
#[derive(Debug, Clone)]
pub struct Relation {
    pub acro: String,
    pub spin: Spin,
    pub op: RelOp,
    pub desc: String,
}

impl Relation {
    fn new(acro: &str, spin: Spin, op: RelOp, desc: &str) -> Self {
        Self {
            acro: acro.to_string(),
            spin,
            op,
            desc: desc.to_string(),
        }
    }
}

// =============================================================================
// RELATION SEMANTICS
// =============================================================================

impl RelOp {
    /// Generator or predicate.
    #[must_use]
    pub const fn pairing(&self) -> Pairing {
        match self {
            Self::Unequal
            | Self::Before
            | Self::After
            | Self::DiffSlots
            | Self::Disjoint
            | Self::SlotBefore
            | Self::SlotAfter
            | Self::FeatureEqual { .. }
            | Self::FeatureUnequal { .. }
            | Self::FeatureLess { .. }
            | Self::FeatureGreater { .. }
            | Self::FeatureMatch { .. } => Pairing::Predicate,
            _ => Pairing::Generator,
        }
    }

    /// Whether this relation is an instance of a parametrized family, which
    /// the legend describes once for all instances.
    const fn is_parametrized(&self) -> bool {
        matches!(
            self,
            Self::NearFirst(_)
                | Self::NearLast(_)
                | Self::NearBoundary(_)
                | Self::NearBefore(_)
                | Self::NearAfter(_)
                | Self::FeatureEqual { .. }
                | Self::FeatureUnequal { .. }
                | Self::FeatureLess { .. }
                | Self::FeatureGreater { .. }
                | Self::FeatureMatch { .. }
        )
    }

    /// The node features a feature comparison reads.
    #[must_use]
    pub fn feature_names(&self) -> Vec<&str> {
        match self {
            Self::FeatureEqual { left, right }
            | Self::FeatureUnequal { left, right }
            | Self::FeatureLess { left, right }
            | Self::FeatureGreater { left, right }
            | Self::FeatureMatch { left, right, .. } => vec![left.as_str(), right.as_str()],
            _ => Vec::new(),
        }
    }

    /// Whether this is an ordering relation that bounds its target on one
    /// side only.
    #[must_use]
    pub const fn is_half_bound(&self) -> bool {
        matches!(
            self,
            Self::Before | Self::After | Self::SlotBefore | Self::SlotAfter
        )
    }

    /// All nodes `m` with `self(n, m)`, without duplicates.
    /// Predicates have no generator and return nothing.
    pub fn successors<C: Corpus + ?Sized>(&self, corpus: &C, n: NodeId) -> Vec<NodeId> {
        let max_slot = corpus.max_slot();
        let (Some(first), Some(last)) = (corpus.first_slot(n), corpus.last_slot(n)) else {
            return Vec::new();
        };
        match self {
            Self::Equal => vec![n],
            Self::SameSlots => {
                let slots = corpus.oslots(n);
                let mut out = vec![n];
                if slots.len() == 1 && slots[0] != n {
                    out.push(slots[0]);
                }
                out.extend(
                    corpus
                        .embedders(n)
                        .iter()
                        .filter(|m| corpus.oslots(**m) == slots),
                );
                out
            }
            Self::Overlap => {
                let mut out: BTreeSet<NodeId> = BTreeSet::new();
                for s in corpus.oslots(n) {
                    out.insert(*s);
                    out.extend(corpus.embedders(*s).iter().copied());
                }
                out.into_iter().collect()
            }
            Self::Embeds => {
                if corpus.is_slot(n) {
                    return Vec::new();
                }
                let mut out = corpus.embeddees(n).to_vec();
                out.extend_from_slice(corpus.oslots(n));
                out
            }
            Self::EmbeddedIn => corpus.embedders(n).to_vec(),
            Self::SameFirst => starting_in(corpus, first, first),
            Self::SameLast => ending_in(corpus, last, last),
            Self::SameBoundary => starting_in(corpus, first, first)
                .into_iter()
                .filter(|m| corpus.last_slot(*m) == Some(last))
                .collect(),
            Self::AdjBefore => {
                let next = last.saturating_add(1);
                if next > max_slot {
                    return Vec::new();
                }
                starting_in(corpus, next, next)
            }
            Self::AdjAfter => {
                if first <= 1 {
                    return Vec::new();
                }
                ending_in(corpus, first.saturating_sub(1), first.saturating_sub(1))
            }
            Self::NearFirst(k) => {
                let (lo, hi) = window(first, *k, max_slot);
                starting_in(corpus, lo, hi)
            }
            Self::NearLast(k) => {
                let (lo, hi) = window(last, *k, max_slot);
                ending_in(corpus, lo, hi)
            }
            Self::NearBoundary(k) => {
                let (lo, hi) = window(first, *k, max_slot);
                starting_in(corpus, lo, hi)
                    .into_iter()
                    .filter(|m| corpus.last_slot(*m).is_some_and(|l| l.abs_diff(last) <= *k))
                    .collect()
            }
            Self::NearBefore(k) => {
                let (lo, hi) = window(last.saturating_add(1), *k, max_slot);
                starting_in(corpus, lo, hi)
            }
            Self::NearAfter(k) => {
                let (lo, hi) = window(first.saturating_sub(1), *k, max_slot);
                ending_in(corpus, lo, hi)
            }
            Self::Edge {
                feature,
                direction,
                filter,
            } => {
                let pick = |targets: &[crate::corpus::EdgeTarget]| -> Vec<NodeId> {
                    targets
                        .iter()
                        .filter(|(_, v)| filter.matches(v.as_ref()))
                        .map(|(m, _)| *m)
                        .collect()
                };
                match direction {
                    EdgeDirection::Forward => pick(corpus.edges_from(feature, n)),
                    EdgeDirection::Backward => pick(corpus.edges_to(feature, n)),
                    EdgeDirection::Both => {
                        let mut out: BTreeSet<NodeId> =
                            pick(corpus.edges_from(feature, n)).into_iter().collect();
                        out.extend(pick(corpus.edges_to(feature, n)));
                        out.into_iter().collect()
                    }
                }
            }
            Self::Unequal
            | Self::Before
            | Self::After
            | Self::DiffSlots
            | Self::Disjoint
            | Self::SlotBefore
            | Self::SlotAfter
            | Self::FeatureEqual { .. }
            | Self::FeatureUnequal { .. }
            | Self::FeatureLess { .. }
            | Self::FeatureGreater { .. }
            | Self::FeatureMatch { .. } => Vec::new(),
        }
    }

    /// Whether `self(n, m)` holds.
    pub fn holds<C: Corpus + ?Sized>(&self, corpus: &C, n: NodeId, m: NodeId) -> bool {
        if let Some(outcome) = self.compare_values(corpus, n, m) {
            return outcome;
        }
        let (Some(nf), Some(nl), Some(mf), Some(ml)) = (
            corpus.first_slot(n),
            corpus.last_slot(n),
            corpus.first_slot(m),
            corpus.last_slot(m),
        ) else {
            return false;
        };
        match self {
            Self::Equal => n == m,
            Self::Unequal => n != m,
            Self::Before => corpus.rank(n) < corpus.rank(m),
            Self::After => corpus.rank(n) > corpus.rank(m),
            Self::SameSlots => corpus.oslots(n) == corpus.oslots(m),
            Self::Overlap => intersects(corpus.oslots(n), corpus.oslots(m)),
            Self::DiffSlots => corpus.oslots(n) != corpus.oslots(m),
            Self::Disjoint => !intersects(corpus.oslots(n), corpus.oslots(m)),
            Self::Embeds => embeds(corpus, n, m),
            Self::EmbeddedIn => embeds(corpus, m, n),
            Self::SlotBefore => nl < mf,
            Self::SlotAfter => nf > ml,
            Self::SameFirst => nf == mf,
            Self::SameLast => nl == ml,
            Self::SameBoundary => nf == mf && nl == ml,
            Self::AdjBefore => nl.saturating_add(1) == mf,
            Self::AdjAfter => ml.saturating_add(1) == nf,
            Self::NearFirst(k) => nf.abs_diff(mf) <= *k,
            Self::NearLast(k) => nl.abs_diff(ml) <= *k,
            Self::NearBoundary(k) => nf.abs_diff(mf) <= *k && nl.abs_diff(ml) <= *k,
            Self::NearBefore(k) => mf.abs_diff(nl.saturating_add(1)) <= *k,
            Self::NearAfter(k) => ml.abs_diff(nf.saturating_sub(1)) <= *k,
            Self::Edge { .. } => self.successors(corpus, n).contains(&m),
            Self::FeatureEqual { .. }
            | Self::FeatureUnequal { .. }
            | Self::FeatureLess { .. }
            | Self::FeatureGreater { .. }
            | Self::FeatureMatch { .. } => false,
        }
    }

    /// The outcome of a feature comparison, `None` for other relations.
    fn compare_values<C: Corpus + ?Sized>(&self, corpus: &C, n: NodeId, m: NodeId) -> Option<bool> {
        let outcome = match self {
            Self::FeatureEqual { left, right } => {
                same_value(corpus.value(left, n), corpus.value(right, m))
            }
            Self::FeatureUnequal { left, right } => {
                !same_value(corpus.value(left, n), corpus.value(right, m))
            }
            Self::FeatureLess { left, right } => {
                ordered(corpus.value(right, m), corpus.value(left, n))
            }
            Self::FeatureGreater { left, right } => {
                ordered(corpus.value(left, n), corpus.value(right, m))
            }
            Self::FeatureMatch {
                left,
                pattern,
                right,
            } => match (corpus.value(left, n), corpus.value(right, m)) {
                (Some(a), Some(b)) => stripped(pattern, a) == stripped(pattern, b),
                _ => false,
            },
            _ => return None,
        };
        Some(outcome)
    }
}

fn same_value(a: Option<&FeatureValue>, b: Option<&FeatureValue>) -> bool {
    a.is_some() && a == b
}

/// Whether `a > b` for two present values of the same type.
fn ordered(a: Option<&FeatureValue>, b: Option<&FeatureValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.feature_type() == b.feature_type() && a > b,
        _ => false,
    }
}

/// A value with every match of `pattern` deleted.
fn stripped(pattern: &Regex, value: &FeatureValue) -> String {
    pattern.replace_all(&value.to_string(), "").into_owned()
}

/// Slot window `[center - k, center + k]` clipped to the slot range.
fn window(center: u64, k: u64, max_slot: u64) -> (u64, u64) {
    (
        center.saturating_sub(k).max(1),
        center.saturating_add(k).min(max_slot),
    )
}

/// Nodes whose first slot lies in `lo..=hi`.
fn starting_in<C: Corpus + ?Sized>(corpus: &C, lo: u64, hi: u64) -> Vec<NodeId> {
    let mut out = Vec::new();
    for s in lo..=hi {
        out.push(NodeId(s));
        out.extend_from_slice(corpus.starting_at(s));
    }
    out
}

/// Nodes whose last slot lies in `lo..=hi`.
fn ending_in<C: Corpus + ?Sized>(corpus: &C, lo: u64, hi: u64) -> Vec<NodeId> {
    let mut out = Vec::new();
    for s in lo..=hi {
        out.push(NodeId(s));
        out.extend_from_slice(corpus.ending_at(s));
    }
    out
}

/// Whether two ascending slot lists share a slot.
fn intersects(a: &[NodeId], b: &[NodeId]) -> bool {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => return true,
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    false
}

/// Whether the non-slot `outer` covers every slot of a different node `inner`.
fn embeds<C: Corpus + ?Sized>(corpus: &C, outer: NodeId, inner: NodeId) -> bool {
    if outer == inner || corpus.is_slot(outer) {
        return false;
    }
    let covering = corpus.oslots(outer);
    corpus
        .oslots(inner)
        .iter()
        .all(|s| covering.binary_search(s).is_ok())
}

// =============================================================================
// INDEXED NARROWING
// =============================================================================

/// Narrow both yarns of an `Indexed` relation at once.
///
/// Returns `None` for relations that have no indexed narrowing.
pub fn spin_indexed<C: Corpus + ?Sized>(
    op: &RelOp,
    corpus: &C,
    yarn_f: &BTreeSet<NodeId>,
    yarn_t: &BTreeSet<NodeId>,
) -> Option<(BTreeSet<NodeId>, BTreeSet<NodeId>)> {
    match op {
        RelOp::Equal => {
            let both: BTreeSet<NodeId> = yarn_f.intersection(yarn_t).copied().collect();
            Some((both.clone(), both))
        }
        RelOp::SameSlots => {
            let keys_f: BTreeSet<&[NodeId]> = yarn_f.iter().map(|n| corpus.oslots(*n)).collect();
            let keys_t: BTreeSet<&[NodeId]> = yarn_t.iter().map(|n| corpus.oslots(*n)).collect();
            Some((
                yarn_f
                    .iter()
                    .filter(|n| keys_t.contains(corpus.oslots(**n)))
                    .copied()
                    .collect(),
                yarn_t
                    .iter()
                    .filter(|n| keys_f.contains(corpus.oslots(**n)))
                    .copied()
                    .collect(),
            ))
        }
        RelOp::Overlap => {
            let slots_f: BTreeSet<NodeId> = yarn_f
                .iter()
                .flat_map(|n| corpus.oslots(*n).iter().copied())
                .collect();
            let slots_t: BTreeSet<NodeId> = yarn_t
                .iter()
                .flat_map(|n| corpus.oslots(*n).iter().copied())
                .collect();
            Some((
                yarn_f
                    .iter()
                    .filter(|n| corpus.oslots(**n).iter().any(|s| slots_t.contains(s)))
                    .copied()
                    .collect(),
                yarn_t
                    .iter()
                    .filter(|n| corpus.oslots(**n).iter().any(|s| slots_f.contains(s)))
                    .copied()
                    .collect(),
            ))
        }
        RelOp::FeatureEqual { left, right } => Some(narrow_by_key(yarn_f, yarn_t, |n| {
            corpus.value(left, n).cloned()
        }, |m| corpus.value(right, m).cloned())),
        RelOp::FeatureMatch {
            left,
            pattern,
            right,
        } => Some(narrow_by_key(
            yarn_f,
            yarn_t,
            |n| corpus.value(left, n).map(|v| stripped(pattern, v)),
            |m| corpus.value(right, m).map(|v| stripped(pattern, v)),
        )),
        _ => None,
    }
}

/// Keep the nodes on either side whose key occurs on the other side. Nodes
/// without a key are dropped.
fn narrow_by_key<K, F, T>(
    yarn_f: &BTreeSet<NodeId>,
    yarn_t: &BTreeSet<NodeId>,
    key_f: F,
    key_t: T,
) -> (BTreeSet<NodeId>, BTreeSet<NodeId>)
where
    K: Ord,
    F: Fn(NodeId) -> Option<K>,
    T: Fn(NodeId) -> Option<K>,
{
    let keyed_f: Vec<(NodeId, K)> = yarn_f.iter().filter_map(|n| key_f(*n).map(|k| (*n, k))).collect();
    let keyed_t: Vec<(NodeId, K)> = yarn_t.iter().filter_map(|m| key_t(*m).map(|k| (*m, k))).collect();
    let keys_f: BTreeSet<&K> = keyed_f.iter().map(|(_, k)| k).collect();
    let keys_t: BTreeSet<&K> = keyed_t.iter().map(|(_, k)| k).collect();
    (
        keyed_f
            .iter()
            .filter(|(_, k)| keys_t.contains(k))
            .map(|(n, _)| *n)
            .collect(),
        keyed_t
            .iter()
            .filter(|(_, k)| keys_f.contains(k))
            .map(|(m, _)| *m)
            .collect(),
    )
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Constructor of a k-parametrized relation.
type FamilyCtor = fn(u64) -> RelOp;

/// A k-parametrized family: its acronym, its converse's acronym, both
/// constructors and a description.
struct Family {
    acro: &'static str,
    converse: &'static str,
    op: FamilyCtor,
    converse_op: FamilyCtor,
    desc: &'static str,
    converse_desc: &'static str,
}

const FAMILIES: &[Family] = &[
    Family {
        acro: "=k:",
        converse: "=k:",
        op: RelOp::NearFirst,
        converse_op: RelOp::NearFirst,
        desc: "left and right start at k-nearly the same slot",
        converse_desc: "left and right start at k-nearly the same slot",
    },
    Family {
        acro: ":k=",
        converse: ":k=",
        op: RelOp::NearLast,
        converse_op: RelOp::NearLast,
        desc: "left and right end at k-nearly the same slot",
        converse_desc: "left and right end at k-nearly the same slot",
    },
    Family {
        acro: ":k:",
        converse: ":k:",
        op: RelOp::NearBoundary,
        converse_op: RelOp::NearBoundary,
        desc: "left and right start and end at k-nearly the same slots",
        converse_desc: "left and right start and end at k-nearly the same slots",
    },
    Family {
        acro: "<k:",
        converse: ":k>",
        op: RelOp::NearBefore,
        converse_op: RelOp::NearAfter,
        desc: "left ends k-nearly immediately before right starts",
        converse_desc: "left starts k-nearly immediately after right ends",
    },
];

/// Base relations in converse pairs.
fn base_relations() -> Vec<Relation> {
    use RelOp as R;
    let ratio = |pm: u64| Spin::Ratio(pm);
    vec![
        Relation::new("=", Spin::Indexed, R::Equal, "left equal to right (as node)"),
        Relation::new("=", Spin::Indexed, R::Equal, "left equal to right (as node)"),
        Relation::new("#", ratio(999), R::Unequal, "left unequal to right (as node)"),
        Relation::new("#", ratio(999), R::Unequal, "left unequal to right (as node)"),
        Relation::new("<", ratio(500), R::Before, "left before right (canonical order)"),
        Relation::new(">", ratio(500), R::After, "left after right (canonical order)"),
        Relation::new("==", Spin::Indexed, R::SameSlots, "left occupies the same slots as right"),
        Relation::new("==", Spin::Indexed, R::SameSlots, "left occupies the same slots as right"),
        Relation::new("&&", Spin::Indexed, R::Overlap, "left has slots in common with right"),
        Relation::new("&&", Spin::Indexed, R::Overlap, "left has slots in common with right"),
        Relation::new("##", ratio(990), R::DiffSlots, "left and right occupy different slot sets"),
        Relation::new("##", ratio(990), R::DiffSlots, "left and right occupy different slot sets"),
        Relation::new("||", ratio(900), R::Disjoint, "left and right have no slots in common"),
        Relation::new("||", ratio(900), R::Disjoint, "left and right have no slots in common"),
        Relation::new("[[", Spin::Generic, R::Embeds, "left embeds right"),
        Relation::new("]]", Spin::Generic, R::EmbeddedIn, "left embedded in right"),
        Relation::new("<<", ratio(490), R::SlotBefore, "left completely before right"),
        Relation::new(">>", ratio(490), R::SlotAfter, "left completely after right"),
        Relation::new("=:", Spin::Generic, R::SameFirst, "left and right start at the same slot"),
        Relation::new("=:", Spin::Generic, R::SameFirst, "left and right start at the same slot"),
        Relation::new(":=", Spin::Generic, R::SameLast, "left and right end at the same slot"),
        Relation::new(":=", Spin::Generic, R::SameLast, "left and right end at the same slot"),
        Relation::new("::", Spin::Generic, R::SameBoundary, "left and right start and end at the same slots"),
        Relation::new("::", Spin::Generic, R::SameBoundary, "left and right start and end at the same slots"),
        Relation::new("<:", Spin::Generic, R::AdjBefore, "left immediately before right"),
        Relation::new(":>", Spin::Generic, R::AdjAfter, "left immediately after right"),
    ]
}

/// The relations known to one query.
///
/// Seeded with the base relations and the edge relations of the corpus;
/// grows as the semantic analyzer meets k-parametrized or filtered edge
/// relations.
#[derive(Debug, Clone)]
pub struct RelationRegistry {
    relations: Vec<Relation>,
    by_name: BTreeMap<String, usize>,
    /// Edge features the corpus offers, for the legend.
    edge_features: Vec<String>,
}

impl RelationRegistry {
    /// The base relations only.
    #[must_use]
    pub fn base() -> Self {
        let mut registry = Self {
            relations: Vec::new(),
            by_name: BTreeMap::new(),
            edge_features: Vec::new(),
        };
        let mut base = base_relations().into_iter();
        while let (Some(a), Some(b)) = (base.next(), base.next()) {
            registry.push_pair(a, b);
        }
        registry
    }

    /// The base relations plus the plain edge relations of a corpus.
    pub fn for_corpus<C: Corpus + ?Sized>(corpus: &C) -> Self {
        let mut registry = Self::base();
        for feature in corpus.edge_feature_names() {
            for direction in [EdgeDirection::Forward, EdgeDirection::Both] {
                let acro = direction.acronym(&feature);
                registry.edge_relation(&acro, &feature, direction, FeatureConstraint::Any);
            }
            registry.edge_features.push(feature);
        }
        registry
    }

    /// Number of registered relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether no relations are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// A relation by id.
    #[must_use]
    pub fn get(&self, id: usize) -> Option<&Relation> {
        self.relations.get(id)
    }

    /// The converse of a relation.
    #[must_use]
    pub const fn converse(id: usize) -> usize {
        id ^ 1
    }

    /// Look up a relation by acronym, registering a k-parametrized variant or
    /// a feature comparison if the acronym instantiates one.
    pub fn resolve(&mut self, acro: &str) -> Option<usize> {
        if let Some(id) = self.by_name.get(acro) {
            return Some(*id);
        }
        if acro.starts_with('.') {
            let [rel, conv] = feature_comparison(acro)?;
            return Some(self.push_pair(rel, conv));
        }
        let (pre, k, post) = split_k(acro)?;
        let family_acro = format!("{pre}k{post}");
        for family in FAMILIES {
            let (op, converse_op, desc, converse_desc, converse) = if family.acro == family_acro {
                (family.op, family.converse_op, family.desc, family.converse_desc, family.converse)
            } else if family.converse == family_acro {
                (family.converse_op, family.op, family.converse_desc, family.desc, family.acro)
            } else {
                continue;
            };
            let converse_acro = converse.replacen('k', &k.to_string(), 1);
            let id = self.push_pair(
                Relation::new(acro, Spin::Generic, op(k), desc),
                Relation::new(&converse_acro, Spin::Generic, converse_op(k), converse_desc),
            );
            return Some(id);
        }
        None
    }

    /// Register (or find) an edge relation and its converse.
    pub fn edge_relation(
        &mut self,
        acro: &str,
        feature: &str,
        direction: EdgeDirection,
        filter: FeatureConstraint,
    ) -> usize {
        if let Some(id) = self.by_name.get(acro) {
            return *id;
        }
        let inner = &acro[1..acro.len().saturating_sub(1)];
        let converse_acro = direction.converse().acronym(inner);
        let describe = |d: EdgeDirection| match d {
            EdgeDirection::Forward => format!("edge feature \"{feature}\" from left to right"),
            EdgeDirection::Backward => format!("edge feature \"{feature}\" from right to left"),
            EdgeDirection::Both => format!("edge feature \"{feature}\" between left and right"),
        };
        let rel = |a: &str, d: EdgeDirection| Relation {
            acro: a.to_string(),
            spin: Spin::Generic,
            op: RelOp::Edge {
                feature: feature.to_string(),
                direction: d,
                filter: filter.clone(),
            },
            desc: describe(d),
        };
        let forward = rel(acro, direction);
        let backward = rel(&converse_acro, direction.converse());
        self.push_pair(forward, backward)
    }

    fn push_pair(&mut self, a: Relation, b: Relation) -> usize {
        let id = self.relations.len();
        // For self-converse pairs the later entry wins the name, either is fine.
        self.by_name.insert(a.acro.clone(), id);
        self.by_name.insert(b.acro.clone(), id + 1);
        self.relations.push(a);
        self.relations.push(b);
        if self.relations[id].acro == self.relations[id + 1].acro {
            id + 1
        } else {
            id
        }
    }

    /// One line per relation: acronym right-aligned, then description.
    #[must_use]
    pub fn legend(&self) -> String {
        let mut out = String::new();
        let mut seen = BTreeSet::new();
        for rel in self.relations.iter().filter(|r| !matches!(r.op, RelOp::Edge { .. })) {
            if rel.op.is_parametrized() || !seen.insert(rel.acro.clone()) {
                continue;
            }
            legend_line(&mut out, &rel.acro, &rel.desc);
        }
        for family in FAMILIES {
            legend_line(&mut out, family.acro, family.desc);
            if family.converse != family.acro {
                legend_line(&mut out, family.converse, family.converse_desc);
            }
        }
        for (acro, desc) in FEATURE_COMPARISONS {
            legend_line(&mut out, acro, desc);
        }
        legend_line(&mut out, "-name>", "edge feature \"name\" from left to right");
        legend_line(&mut out, "<name-", "edge feature \"name\" from right to left");
        legend_line(&mut out, "<name>", "edge feature \"name\" either way");
        legend_line(
            &mut out,
            "-name=v>",
            "edge with value filter (=, #, <, >, ~ as for features)",
        );
        if !self.edge_features.is_empty() {
            legend_line(&mut out, "edge features:", &self.edge_features.join(", "));
        }
        out
    }
}

fn legend_line(out: &mut String, acro: &str, desc: &str) {
    out.push_str(&format!("{acro:>23} {desc}\n"));
}

// =============================================================================
// FEATURE COMPARISONS
// =============================================================================

const FEATURE_COMPARISONS: [(&str, &str); 6] = [
    (".f.", "feature f of left equal to feature f of right"),
    (".f=g.", "feature f of left equal to feature g of right"),
    (".f#g.", "feature f of left unequal to feature g of right"),
    (".f<g.", "feature f of left less than feature g of right"),
    (".f>g.", "feature f of left greater than feature g of right"),
    (
        ".f~r~g.",
        "feature f of left equal to feature g of right after deleting matches of r",
    ),
];

fn is_feature_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '_' | '-'))
}

/// Parse a feature comparison acronym into the relation and its converse.
fn feature_comparison(acro: &str) -> Option<[Relation; 2]> {
    let inner = acro.strip_prefix('.')?.strip_suffix('.')?;
    let (left, op, right) = match (inner.find('~'), inner.rfind('~')) {
        (Some(a), Some(b)) if a < b => (&inner[..a], &inner[a..=b], &inner[b + 1..]),
        _ => match inner.find(['=', '#', '<', '>']) {
            Some(i) => (&inner[..i], &inner[i..=i], &inner[i + 1..]),
            None => (inner, "", inner),
        },
    };
    if !is_feature_name(left) || !is_feature_name(right) {
        return None;
    }
    let (l, r) = (left.to_string(), right.to_string());
    let describe = |a: &str, how: &str, b: &str| {
        format!("feature {a} of left {how} feature {b} of right")
    };
    let (spin, op_lr, op_rl, how_lr, how_rl, converse) = match op {
        "" | "=" => (
            Spin::Indexed,
            RelOp::FeatureEqual { left: l.clone(), right: r.clone() },
            RelOp::FeatureEqual { left: r, right: l },
            "equal to".to_string(),
            "equal to".to_string(),
            if op.is_empty() { acro.to_string() } else { format!(".{right}={left}.") },
        ),
        "#" => (
            Spin::Ratio(800),
            RelOp::FeatureUnequal { left: l.clone(), right: r.clone() },
            RelOp::FeatureUnequal { left: r, right: l },
            "unequal to".to_string(),
            "unequal to".to_string(),
            format!(".{right}#{left}."),
        ),
        "<" => (
            Spin::Ratio(400),
            RelOp::FeatureLess { left: l.clone(), right: r.clone() },
            RelOp::FeatureGreater { left: r, right: l },
            "less than".to_string(),
            "greater than".to_string(),
            format!(".{right}>{left}."),
        ),
        ">" => (
            Spin::Ratio(400),
            RelOp::FeatureGreater { left: l.clone(), right: r.clone() },
            RelOp::FeatureLess { left: r, right: l },
            "greater than".to_string(),
            "less than".to_string(),
            format!(".{right}<{left}."),
        ),
        _ => {
            let source = &op[1..op.len() - 1];
            let pattern = Regex::new(source).ok()?;
            let how = format!("equal to, after deleting matches of {source},");
            (
                Spin::Indexed,
                RelOp::FeatureMatch { left: l.clone(), pattern: pattern.clone(), right: r.clone() },
                RelOp::FeatureMatch { left: r, pattern, right: l },
                how.clone(),
                how,
                format!(".{right}{op}{left}."),
            )
        }
    };
    Some([
        Relation::new(acro, spin, op_lr, &describe(left, &how_lr, right)),
        Relation::new(&converse, spin, op_rl, &describe(right, &how_rl, left)),
    ])
}

/// Split `pre k post` with a single run of digits `k`.
fn split_k(acro: &str) -> Option<(&str, u64, &str)> {
    let start = acro.find(|c: char| c.is_ascii_digit())?;
    let len = acro[start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(acro.len() - start);
    let (pre, rest) = acro.split_at(start);
    let (digits, post) = rest.split_at(len);
    if post.contains(|c: char| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(|k| (pre, k, post))
}

/// The static catalogue of relations, without corpus edge features.
#[must_use]
pub fn relations_legend() -> String {
    RelationRegistry::base().legend()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusBuilder, MemoryCorpus};
    use crate::FeatureValue;

    /// Eight slots, two clauses, three phrases, one edge feature.
    fn sample() -> MemoryCorpus {
        let mut b = CorpusBuilder::new("word", 8);
        b.add_node("clause", &[1, 2, 3, 4]).expect("insert"); // 9
        b.add_node("clause", &[5, 6, 7, 8]).expect("insert"); // 10
        b.add_node("phrase", &[1, 2]).expect("insert"); // 11
        b.add_node("phrase", &[3, 4]).expect("insert"); // 12
        b.add_node("phrase", &[4, 5, 6]).expect("insert"); // 13
        b.declare_edge_feature("sim", Some(crate::FeatureType::Int));
        b.add_edge("sim", NodeId(11), NodeId(12), Some(FeatureValue::Int(90)))
            .expect("edge");
        b.add_edge("sim", NodeId(12), NodeId(13), Some(FeatureValue::Int(40)))
            .expect("edge");
        b.build().expect("build")
    }

    fn all_ops() -> Vec<RelOp> {
        let mut ops: Vec<RelOp> = base_relations().into_iter().map(|r| r.op).collect();
        for k in [0, 1, 2] {
            for family in FAMILIES {
                ops.push((family.op)(k));
                ops.push((family.converse_op)(k));
            }
        }
        ops
    }

    #[test]
    fn generators_agree_with_holds() {
        let c = sample();
        let nodes: Vec<NodeId> = (1..=c.max_node()).map(NodeId).collect();
        for op in all_ops().iter().filter(|op| op.pairing() == Pairing::Generator) {
            for n in &nodes {
                let generated: BTreeSet<NodeId> = op.successors(&c, *n).into_iter().collect();
                let tested: BTreeSet<NodeId> =
                    nodes.iter().filter(|m| op.holds(&c, *n, **m)).copied().collect();
                assert_eq!(generated, tested, "{op:?} from {n}");
            }
        }
    }

    #[test]
    fn generators_yield_no_duplicates() {
        let c = sample();
        for op in all_ops() {
            for n in 1..=c.max_node() {
                let out = op.successors(&c, NodeId(n));
                let unique: BTreeSet<NodeId> = out.iter().copied().collect();
                assert_eq!(out.len(), unique.len(), "{op:?} from {n}");
            }
        }
    }

    #[test]
    fn converse_pairs_are_symmetric() {
        let c = sample();
        let registry = RelationRegistry::base();
        for id in 0..registry.len() {
            let rel = registry.get(id).expect("relation");
            let conv = registry.get(RelationRegistry::converse(id)).expect("converse");
            for a in 1..=c.max_node() {
                for b in 1..=c.max_node() {
                    assert_eq!(
                        rel.op.holds(&c, NodeId(a), NodeId(b)),
                        conv.op.holds(&c, NodeId(b), NodeId(a)),
                        "{} ({a},{b})",
                        rel.acro
                    );
                }
            }
        }
    }

    #[test]
    fn embedding_and_adjacency() {
        let c = sample();
        assert!(RelOp::Embeds.holds(&c, NodeId(9), NodeId(11)));
        assert!(RelOp::Embeds.holds(&c, NodeId(9), NodeId(3)));
        assert!(!RelOp::Embeds.holds(&c, NodeId(9), NodeId(13)));
        assert!(RelOp::AdjBefore.holds(&c, NodeId(11), NodeId(12)));
        assert!(RelOp::AdjBefore.holds(&c, NodeId(4), NodeId(10)));
        assert!(RelOp::AdjBefore.successors(&c, NodeId(8)).is_empty());
        assert!(RelOp::AdjAfter.successors(&c, NodeId(1)).is_empty());
        assert!(RelOp::NearBefore(1).holds(&c, NodeId(11), NodeId(13)));
        assert!(RelOp::Overlap.holds(&c, NodeId(12), NodeId(13)));
        assert!(RelOp::SlotBefore.holds(&c, NodeId(11), NodeId(10)));
    }

    #[test]
    fn edge_filters() {
        let c = sample();
        let mut registry = RelationRegistry::for_corpus(&c);
        let any = registry.resolve("-sim>").expect("plain edge");
        let rel = registry.get(any).expect("relation");
        assert_eq!(rel.op.successors(&c, NodeId(11)), vec![NodeId(12)]);

        let strong = registry.edge_relation(
            "-sim>50>",
            "sim",
            EdgeDirection::Forward,
            FeatureConstraint::Greater(50),
        );
        let rel = registry.get(strong).expect("relation");
        assert!(rel.op.holds(&c, NodeId(11), NodeId(12)));
        assert!(!rel.op.holds(&c, NodeId(12), NodeId(13)));
        let conv = registry.get(RelationRegistry::converse(strong)).expect("converse");
        assert_eq!(conv.acro, "<sim>50-");
        assert!(conv.op.holds(&c, NodeId(12), NodeId(11)));

        let both = registry.resolve("<sim>").expect("both ways");
        let rel = registry.get(both).expect("relation");
        assert_eq!(rel.op.successors(&c, NodeId(12)), vec![NodeId(11), NodeId(13)]);
    }

    #[test]
    fn k_relations_are_registered_on_demand() {
        let mut registry = RelationRegistry::base();
        let before = registry.len();
        let id = registry.resolve("<2:").expect("family");
        assert_eq!(registry.len(), before + 2);
        assert_eq!(registry.get(id).expect("rel").acro, "<2:");
        assert_eq!(
            registry.get(RelationRegistry::converse(id)).expect("conv").acro,
            ":2>"
        );
        assert_eq!(registry.resolve(":2>"), Some(RelationRegistry::converse(id)));
        assert_eq!(registry.resolve("<2:"), Some(id));
        assert!(registry.resolve("~3~").is_none());
        assert!(registry.resolve("=1:2").is_none());
    }

    const COMPARISONS: [&str; 8] = [
        ".g.", ".text=text.", ".g#g.", ".len<len.", ".len>len.", ".g~[aeiou]~g.", ".text~a~text.", ".len#g.",
    ];

    #[test]
    fn feature_comparisons_resolve_in_converse_pairs() {
        let mut registry = RelationRegistry::base();
        let id = registry.resolve(".len<len.").expect("less");
        let conv = registry.get(RelationRegistry::converse(id)).expect("converse");
        assert_eq!(conv.acro, ".len>len.");
        assert_eq!(registry.resolve(".len>len."), Some(RelationRegistry::converse(id)));

        let id = registry.resolve(".g.").expect("equal");
        assert_eq!(registry.get(id).expect("rel").acro, ".g.");
        assert_eq!(registry.get(id).expect("rel").spin, Spin::Indexed);
        assert_eq!(registry.resolve(".g."), Some(id));

        let id = registry.resolve(".a~x+~b.").expect("regex");
        assert_eq!(
            registry.get(RelationRegistry::converse(id)).expect("converse").acro,
            ".b~x+~a."
        );
        assert!(registry.resolve(".a~(~b.").is_none());
        assert!(registry.resolve(".a b.").is_none());
        assert!(registry.resolve(".=.").is_none());
    }

    #[test]
    fn feature_comparisons_are_symmetric() {
        let c = crate::fixtures::letters();
        let mut registry = RelationRegistry::base();
        for acro in COMPARISONS {
            let id = registry.resolve(acro).expect("comparison");
            let rel = registry.get(id).expect("relation");
            let conv = registry.get(RelationRegistry::converse(id)).expect("converse");
            assert_eq!(rel.op.pairing(), Pairing::Predicate);
            for a in 1..=c.max_node() {
                for b in 1..=c.max_node() {
                    assert_eq!(
                        rel.op.holds(&c, NodeId(a), NodeId(b)),
                        conv.op.holds(&c, NodeId(b), NodeId(a)),
                        "{acro} ({a},{b})"
                    );
                }
            }
        }
    }

    #[test]
    fn feature_comparison_semantics() {
        let c = crate::fixtures::letters();
        let mut registry = RelationRegistry::base();
        let mut holds = |acro: &str, n: u64, m: u64| {
            let id = registry.resolve(acro).expect("comparison");
            registry.get(id).expect("rel").op.holds(&c, NodeId(n), NodeId(m))
        };
        // t h e c a t a d o g
        assert!(holds(".g.", 1, 6));
        assert!(!holds(".g.", 1, 2));
        assert!(!holds(".g.", 11, 12), "words have no g");
        assert!(holds(".g#g.", 1, 2));
        assert!(holds(".g#g.", 11, 12), "both missing counts as unequal");
        assert!(!holds(".g#g.", 5, 7));
        assert!(holds(".len>len.", 11, 13));
        assert!(!holds(".len<len.", 11, 12));
        assert!(holds(".g<g.", 5, 3));
        assert!(!holds(".len<g.", 13, 1), "integers and strings do not compare");
        // up to the last vowel: "the" and "a" leave nothing, "cat" leaves "t"
        assert!(holds(".text~^.*[aeiou]~text.", 11, 13));
        assert!(!holds(".text~^.*[aeiou]~text.", 11, 12));
        assert!(holds(".g~[aeiou]~g.", 3, 5));
    }

    #[test]
    fn indexed_feature_comparisons_match_pairwise_narrowing() {
        let c = crate::fixtures::letters();
        let all: BTreeSet<NodeId> = (1..=c.max_node()).map(NodeId).collect();
        let vowels: BTreeSet<NodeId> = [NodeId(3), NodeId(5), NodeId(9), NodeId(11)].into();
        let mut registry = RelationRegistry::base();
        for acro in [".g.", ".text=text.", ".g~[aeiou]~g.", ".g~^.*$~g."] {
            let id = registry.resolve(acro).expect("comparison");
            let op = &registry.get(id).expect("rel").op;
            let (f, t) = spin_indexed(op, &c, &vowels, &all).expect("indexed");
            let want_f: BTreeSet<NodeId> = vowels
                .iter()
                .filter(|n| all.iter().any(|m| op.holds(&c, **n, *m)))
                .copied()
                .collect();
            let want_t: BTreeSet<NodeId> = all
                .iter()
                .filter(|m| vowels.iter().any(|n| op.holds(&c, *n, **m)))
                .copied()
                .collect();
            assert_eq!(f, want_f, "{acro}");
            assert_eq!(t, want_t, "{acro}");
        }
    }

    #[test]
    fn indexed_spin_matches_pairwise_narrowing() {
        let c = sample();
        let all: BTreeSet<NodeId> = (1..=c.max_node()).map(NodeId).collect();
        let phrases: BTreeSet<NodeId> = [NodeId(11), NodeId(12)].into();
        for op in [RelOp::Equal, RelOp::SameSlots, RelOp::Overlap] {
            let (f, t) = spin_indexed(&op, &c, &phrases, &all).expect("indexed");
            let want_f: BTreeSet<NodeId> = phrases
                .iter()
                .filter(|n| all.iter().any(|m| op.holds(&c, **n, *m)))
                .copied()
                .collect();
            let want_t: BTreeSet<NodeId> = all
                .iter()
                .filter(|m| phrases.iter().any(|n| op.holds(&c, *n, **m)))
                .copied()
                .collect();
            assert_eq!(f, want_f, "{op:?}");
            assert_eq!(t, want_t, "{op:?}");
        }
    }

    #[test]
    fn legend_lists_every_acronym() {
        let legend = relations_legend();
        for acro in ["=", "#", "<", ">", "==", "&&", "##", "||", "[[", "]]", "<<", ">>", "=:", ":=", "::", "<:", ":>", "=k:", ":k=", ":k:", "<k:", ":k>", "-name>", ".f.", ".f=g.", ".f#g.", ".f<g.", ".f>g.", ".f~r~g."] {
            assert!(
                legend.lines().any(|l| l.split_whitespace().next() == Some(acro)),
                "missing {acro}"
            );
        }
        let mut registry = RelationRegistry::base();
        registry.resolve(".g=h.").expect("comparison");
        registry.resolve("<3:").expect("family");
        assert_eq!(registry.legend(), legend, "instances are not listed");
    }
}
