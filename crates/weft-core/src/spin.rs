//! # Constraint Propagation
//!
//! Narrows the yarn (candidate set) of every query node before any result
//! is stitched together.
//!
//! ## Atoms
//!
//! A yarn starts as all nodes of the atom's type (or its custom set, or the
//! whole corpus for `.`) that satisfy the feature conditions. Quantifiers then remove nodes:
//!
//! - `/without/`: nodes for which the body has a result
//! - `/where/ A /have/ B`: nodes with a result of A that does not extend to
//!   a result of A and B
//! - `/with/ A /or/ B`: nodes for which no alternative has a result
//!
//! ## Edges
//!
//! Each edge removes the nodes at either end that have no partner at the
//! other end. Edges are processed cheapest first until nothing changes.
//! Generic narrowing that would test too many pairs is skipped.

use crate::query::Query;
use crate::relations::{Pairing, Relation, RelationRegistry, Spin, spin_indexed};
use crate::semantics::BoundQuantifier;
use crate::syntax::{QuKind, clean_parent};
use crate::primitives::{ANY_TYPE, PER_MILLE};
use crate::{Corpus, NodeId, SearchConfig, WeftError};
use std::collections::BTreeSet;

// =============================================================================
// SPREAD ESTIMATION
// =============================================================================

/// Up to `limit` evenly spaced members of a yarn.
#[must_use]
pub fn sample(yarn: &BTreeSet<NodeId>, limit: usize) -> Vec<NodeId> {
    let limit = limit.max(1);
    if yarn.len() <= limit {
        return yarn.iter().copied().collect();
    }
    yarn.iter()
        .step_by(yarn.len() / limit)
        .take(limit)
        .copied()
        .collect()
}

/// Expected number of partners in `yarn_t` of a node in `yarn_f`, per mille.
///
/// Sampling is deterministic: the same yarns always give the same estimate.
pub fn estimate_spread<C: Corpus + ?Sized>(
    corpus: &C,
    relation: &Relation,
    yarn_f: &BTreeSet<NodeId>,
    yarn_t: &BTreeSet<NodeId>,
    config: &SearchConfig,
) -> u64 {
    if let Spin::Ratio(ratio) = relation.spin {
        return (yarn_t.len() as u64).saturating_mul(ratio);
    }
    let sources = sample(yarn_f, config.try_limit_from);
    if sources.is_empty() {
        return 0;
    }
    let op = &relation.op;
    let total: u64 = match op.pairing() {
        Pairing::Generator => sources
            .iter()
            .map(|n| {
                let hits = op
                    .successors(corpus, *n)
                    .iter()
                    .filter(|m| yarn_t.contains(m))
                    .count() as u64;
                hits.saturating_mul(PER_MILLE)
            })
            .sum(),
        Pairing::Predicate => {
            let targets = sample(yarn_t, config.try_limit_to);
            if targets.is_empty() {
                return 0;
            }
            let size = yarn_t.len() as u64;
            sources
                .iter()
                .map(|n| {
                    let hits = targets
                        .iter()
                        .filter(|m| op.holds(corpus, *n, **m))
                        .count() as u64;
                    hits.saturating_mul(size).saturating_mul(PER_MILLE) / targets.len() as u64
                })
                .sum()
        }
    };
    total / sources.len() as u64
}

/// Keep the nodes of both yarns that take part in at least one pair.
fn narrow<C: Corpus + ?Sized>(
    corpus: &C,
    relation: &Relation,
    yarn_f: &BTreeSet<NodeId>,
    yarn_t: &BTreeSet<NodeId>,
) -> (BTreeSet<NodeId>, BTreeSet<NodeId>) {
    let op = &relation.op;
    let mut new_f = BTreeSet::new();
    let mut new_t = BTreeSet::new();
    for n in yarn_f {
        let hits: Vec<NodeId> = match op.pairing() {
            Pairing::Generator => op
                .successors(corpus, *n)
                .into_iter()
                .filter(|m| yarn_t.contains(m))
                .collect(),
            Pairing::Predicate => yarn_t
                .iter()
                .filter(|m| op.holds(corpus, *n, **m))
                .copied()
                .collect(),
        };
        if !hits.is_empty() {
            new_f.insert(*n);
            new_t.extend(hits);
        }
    }
    (new_f, new_t)
}

// =============================================================================
// QUERY PASSES
// =============================================================================

impl<C: Corpus + ?Sized> Query<'_, C> {
    /// Initial yarns from node types, features and quantifiers.
    pub(crate) fn spin_atoms(&mut self) -> Result<(), WeftError> {
        let Some(graph) = &self.graph else {
            return Ok(());
        };
        let mut yarns = Vec::with_capacity(graph.qnodes.len());
        for qnode in &graph.qnodes {
            let candidates: Vec<NodeId> = match self.sets.get(&qnode.otype) {
                Some(set) => set.iter().copied().collect(),
                None if qnode.otype == ANY_TYPE => (1..=self.corpus.max_node()).map(NodeId).collect(),
                None => self.corpus.nodes_of_type(&qnode.otype).to_vec(),
            };
            let mut yarn: BTreeSet<NodeId> = candidates
                .into_iter()
                .filter(|n| {
                    qnode
                        .features
                        .iter()
                        .all(|(feature, c)| c.matches(self.corpus.value(feature, *n)))
                })
                .collect();
            for quantifier in &qnode.quantifiers {
                if yarn.is_empty() {
                    break;
                }
                yarn = self.apply_quantifier(yarn, &qnode.src, quantifier)?;
            }
            yarns.push(yarn);
        }
        self.initial_sizes = yarns.iter().map(BTreeSet::len).collect();
        self.yarns = yarns;
        Ok(())
    }

    fn apply_quantifier(
        &self,
        yarn: BTreeSet<NodeId>,
        src: &str,
        quantifier: &BoundQuantifier,
    ) -> Result<BTreeSet<NodeId>, WeftError> {
        let atom = clean_parent(src, &quantifier.parent)?;
        let offset = self.offset.saturating_add(quantifier.line);
        let wrap = |source: WeftError| WeftError::Quantifier {
            line: offset,
            source: Box::new(source),
        };
        let body = |i: usize| quantifier.templates.get(i).map_or("", String::as_str);

        match quantifier.kind {
            QuKind::Without => {
                let hits = self
                    .sub_results(format!("{atom}\n{}", body(0)), offset, 1)
                    .map_err(wrap)?;
                let excluded: BTreeSet<NodeId> = hits.iter().filter_map(|r| r.first()).copied().collect();
                Ok(yarn.difference(&excluded).copied().collect())
            }
            QuKind::Where | QuKind::Have => {
                let antecedent = format!("{atom}\n{}", body(0));
                let all = self.sub_results(antecedent.clone(), offset, 0).map_err(wrap)?;
                let Some(width) = all.first().map(Vec::len) else {
                    return Ok(yarn);
                };
                let held = self
                    .sub_results(format!("{antecedent}\n{}", body(1)), offset, width)
                    .map_err(wrap)?;
                let failing: BTreeSet<NodeId> = all
                    .difference(&held)
                    .filter_map(|r| r.first())
                    .copied()
                    .collect();
                Ok(yarn.difference(&failing).copied().collect())
            }
            QuKind::With | QuKind::Or => {
                let mut kept = BTreeSet::new();
                for i in 0..quantifier.templates.len() {
                    let hits = self
                        .sub_results(format!("{atom}\n{}", body(i)), offset, 1)
                        .map_err(wrap)?;
                    kept.extend(
                        hits.iter()
                            .filter_map(|r| r.first())
                            .filter(|n| yarn.contains(n))
                            .copied(),
                    );
                }
                Ok(kept)
            }
            QuKind::End => Ok(yarn),
        }
    }

    /// Results of a quantifier body: full tuples for `shallow == 0`,
    /// otherwise distinct prefixes of that length.
    fn sub_results(
        &self,
        template: String,
        offset: usize,
        shallow: usize,
    ) -> Result<BTreeSet<Vec<NodeId>>, WeftError> {
        let mut query = self.nested(template, offset);
        query.study(None)?;
        if shallow == 0 {
            Ok(query.results().collect())
        } else {
            Ok(query.fetch_shallow(shallow))
        }
    }

    /// Estimate the spread of every edge from the current yarns, and of its
    /// converse when `both` is set.
    pub(crate) fn estimate_spreads(&mut self, both: bool) {
        let Some(graph) = &self.graph else {
            return;
        };
        let spread = |rel: usize, f: usize, t: usize| -> u64 {
            graph.registry.get(rel).map_or(0, |relation| {
                estimate_spread(
                    self.corpus,
                    relation,
                    &self.yarns[f],
                    &self.yarns[t],
                    &self.config,
                )
            })
        };
        let forward: Vec<u64> = graph
            .qedges
            .iter()
            .map(|e| spread(e.rel, e.from, e.to))
            .collect();
        let backward: Vec<u64> = if both {
            graph
                .qedges
                .iter()
                .map(|e| spread(RelationRegistry::converse(e.rel), e.to, e.from))
                .collect()
        } else {
            Vec::new()
        };
        self.spreads = forward;
        self.spreads_c = backward;
    }

    /// Narrow yarns along the edges until no edge can narrow any further.
    pub(crate) fn spin_edges(&mut self) {
        self.estimate_spreads(false);
        let Some(graph) = self.graph.take() else {
            return;
        };
        let n_edges = graph.qedges.len();
        let mut uptodate = vec![false; n_edges];

        while !self.yarns.iter().any(BTreeSet::is_empty) {
            let Some(e) = (0..n_edges)
                .filter(|e| !uptodate[*e])
                .min_by_key(|e| (self.edge_cost(graph.qedges[*e].from, graph.qedges[*e].to, *e), *e))
            else {
                break;
            };
            uptodate[e] = true;
            let edge = graph.qedges[e];
            let (f, t) = (edge.from, edge.to);
            if f == t {
                continue;
            }
            let Some(relation) = graph.registry.get(edge.rel) else {
                continue;
            };
            let (before_f, before_t) = (self.yarns[f].len(), self.yarns[t].len());
            self.spin_edge(relation, e, f, t);
            let changed_f = self.yarns[f].len() != before_f;
            let changed_t = self.yarns[t].len() != before_t;
            if !(changed_f || changed_t) {
                continue;
            }
            self.thinned.insert(e);
            for (other, oe) in graph.qedges.iter().enumerate() {
                let touches = |q: usize| oe.from == q || oe.to == q;
                if other != e && ((changed_f && touches(f)) || (changed_t && touches(t))) {
                    uptodate[other] = false;
                }
            }
        }
        self.graph = Some(graph);
    }

    /// Cost of spinning an edge: big yarns at either end and a big spread
    /// make it expensive.
    fn edge_cost(&self, f: usize, t: usize, e: usize) -> u64 {
        let fraction = |q: usize| -> u64 {
            let initial = self.initial_sizes.get(q).copied().unwrap_or(0) as u64;
            if initial == 0 {
                return 0;
            }
            self.yarns[q].len() as u64 * PER_MILLE / initial
        };
        let (yf_f, yf_t) = (fraction(f), fraction(t));
        (yf_f * yf_f / PER_MILLE)
            .saturating_add(yf_t * yf_t / PER_MILLE)
            .saturating_add(self.spreads.get(e).copied().unwrap_or(0))
    }

    fn spin_edge(&mut self, relation: &Relation, e: usize, f: usize, t: usize) {
        let narrowed = match relation.spin {
            Spin::Ratio(_) => None,
            Spin::Indexed => spin_indexed(&relation.op, self.corpus, &self.yarns[f], &self.yarns[t])
                .or_else(|| Some(narrow(self.corpus, relation, &self.yarns[f], &self.yarns[t]))),
            Spin::Generic => {
                let spread = self.spreads.get(e).copied().unwrap_or(0);
                let work = u128::from(spread) * self.yarns[f].len() as u128 / u128::from(PER_MILLE);
                if work >= u128::from(self.config.spin_limit) {
                    tracing::warn!(
                        edge = e,
                        relation = %relation.acro,
                        work = %work,
                        "skipping narrowing: too many pairs"
                    );
                    None
                } else {
                    Some(narrow(self.corpus, relation, &self.yarns[f], &self.yarns[t]))
                }
            }
        };
        if let Some((new_f, new_t)) = narrowed {
            self.yarns[f] = new_f;
            self.yarns[t] = new_t;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::fixtures::letters;
    use crate::semantics::CustomSets;
    use crate::{MemoryCorpus, QueryState};

    fn study<'c>(corpus: &'c MemoryCorpus, sets: &'c CustomSets, template: &str) -> Query<'c, MemoryCorpus> {
        let mut query = Query::new(corpus, template, sets, SearchConfig::default());
        query.study(None).expect("study");
        query
    }

    fn words(corpus: &MemoryCorpus, query: &Query<'_, MemoryCorpus>) -> Vec<String> {
        let mut texts: Vec<String> = query
            .fetch(None)
            .iter()
            .filter_map(|r| corpus.value("text", r[0]))
            .map(ToString::to_string)
            .collect();
        texts.sort();
        texts
    }

    #[test]
    fn sampling_is_even_and_bounded() {
        let yarn: BTreeSet<NodeId> = (1..=100).map(NodeId).collect();
        let picked = sample(&yarn, 10);
        assert_eq!(picked.len(), 10);
        assert_eq!(picked[0], NodeId(1));
        assert_eq!(picked[1], NodeId(11));
        assert_eq!(sample(&yarn, 1000).len(), 100);
        assert!(sample(&BTreeSet::new(), 10).is_empty());
    }

    #[test]
    fn spreads_of_embedding() {
        let corpus = letters();
        let mut registry = RelationRegistry::base();
        let up = registry.resolve("]]").expect("]]");
        let down = RelationRegistry::converse(up);
        let letters_yarn: BTreeSet<NodeId> = corpus.nodes_of_type("letter").iter().copied().collect();
        let words_yarn: BTreeSet<NodeId> = corpus.nodes_of_type("word").iter().copied().collect();
        let config = SearchConfig::default();

        let relation = registry.get(up).expect("relation");
        // every letter is in exactly one word
        assert_eq!(estimate_spread(&corpus, relation, &letters_yarn, &words_yarn, &config), 1000);

        let relation = registry.get(down).expect("relation");
        // words have 3, 3, 1 and 3 letters
        assert_eq!(estimate_spread(&corpus, relation, &words_yarn, &letters_yarn, &config), 2500);
    }

    #[test]
    fn ratio_spreads_scale_with_target() {
        let corpus = letters();
        let mut registry = RelationRegistry::base();
        let before = registry.resolve("<").expect("<");
        let relation = registry.get(before).expect("relation");
        let yarn: BTreeSet<NodeId> = (1..=10).map(NodeId).collect();
        assert_eq!(
            estimate_spread(&corpus, relation, &yarn, &yarn, &SearchConfig::default()),
            5000
        );
    }

    #[test]
    fn edges_narrow_both_ends() {
        let corpus = letters();
        let sets = CustomSets::new();
        let query = study(&corpus, &sets, "word text=cat\n  letter");
        assert_eq!(query.yarns()[0].len(), 1);
        let letters: Vec<NodeId> = query.yarns()[1].iter().copied().collect();
        assert_eq!(letters, vec![NodeId(4), NodeId(5), NodeId(6)]);
        assert!(!query.thinned.is_empty());
    }

    #[test]
    fn spin_limit_only_affects_narrowing() {
        let corpus = letters();
        let sets = CustomSets::new();
        // adjacency crosses word boundaries: c-a and t-a
        let template = "w1:letter\n<: w2:letter g=a";
        let config = SearchConfig {
            spin_limit: 0,
            ..SearchConfig::default()
        };
        let mut tight = Query::new(&corpus, template, &sets, config);
        tight.study(None).expect("study");
        let loose = study(&corpus, &sets, template);
        let mut a = tight.fetch(None);
        let mut b = loose.fetch(None);
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn without_removes_matches() {
        let corpus = letters();
        let sets = CustomSets::new();
        let query = study(&corpus, &sets, "word\n/without/\n  letter g=a\n/-/");
        assert_eq!(words(&corpus, &query), vec!["dog", "the"]);
    }

    #[test]
    fn where_have_is_vacuous_without_antecedent() {
        let corpus = letters();
        let sets = CustomSets::new();
        // only the second sentence has a word "a", and it contains no x
        let query = study(
            &corpus,
            &sets,
            "sentence\n/where/\n  word text=a\n/have/\n    letter g=x\n/-/",
        );
        let results = query.fetch(None);
        assert_eq!(results, vec![vec![NodeId(15)]]);

        let query = study(
            &corpus,
            &sets,
            "sentence\n/where/\n  word text=a\n/have/\n    letter g=a\n/-/",
        );
        assert_eq!(query.fetch(None).len(), 2);
    }

    #[test]
    fn with_or_keeps_any_alternative() {
        let corpus = letters();
        let sets = CustomSets::new();
        let query = study(
            &corpus,
            &sets,
            "word\n/with/\n  letter g=o\n/or/\n  letter g=h\n/-/",
        );
        assert_eq!(words(&corpus, &query), vec!["dog", "the"]);
    }

    #[test]
    fn parent_reference_in_quantifier() {
        let corpus = letters();
        let sets = CustomSets::new();
        let query = study(
            &corpus,
            &sets,
            "w:word\n/without/\n..\n  letter g=t\n/-/",
        );
        assert_eq!(words(&corpus, &query), vec!["a", "dog"]);
    }

    #[test]
    fn any_type_yarn_spans_all_levels() {
        let corpus = letters();
        let sets = CustomSets::new();
        let query = study(&corpus, &sets, ". g=a");
        let yarn: Vec<NodeId> = query.yarns()[0].iter().copied().collect();
        assert_eq!(yarn, vec![NodeId(5), NodeId(7)]);

        let query = study(&corpus, &sets, ". len>2");
        let yarn: Vec<NodeId> = query.yarns()[0].iter().copied().collect();
        assert_eq!(yarn, vec![NodeId(11), NodeId(12), NodeId(14)]);

        let query = study(&corpus, &sets, "sentence\n  .");
        // 15 holds 6 letters and 2 words, 16 holds 4 letters and 2 words
        assert_eq!(query.fetch(None).len(), 14);
    }

    #[test]
    fn any_type_atom_in_quantifier() {
        let corpus = letters();
        let sets = CustomSets::new();
        let query = study(&corpus, &sets, ". len*\n/without/\n  letter g=a\n/-/");
        let mut found: Vec<NodeId> = query.fetch(None).into_iter().map(|r| r[0]).collect();
        found.sort();
        // everything except cat, a and the first sentence
        let all = (1..=16).map(NodeId);
        let want: Vec<NodeId> = all
            .filter(|n| ![NodeId(12), NodeId(13), NodeId(15), NodeId(16)].contains(n))
            .collect();
        assert_eq!(found, want);
    }

    #[test]
    fn quantifier_errors_point_into_the_body() {
        let corpus = letters();
        let sets = CustomSets::new();
        let mut query = Query::new(
            &corpus,
            "word\n/without/\n  planet\n/-/",
            &sets,
            SearchConfig::default(),
        );
        let err = query.study(None).expect_err("unknown type");
        match &err {
            WeftError::Quantifier { line, source } => {
                assert_eq!(*line, 1);
                assert!(matches!(**source, WeftError::Semantic(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.diagnostics()[0].line, Some(2));
        assert!(matches!(query.state(), QueryState::Failed(_)));
    }
}
