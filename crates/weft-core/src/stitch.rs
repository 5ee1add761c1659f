//! # Stitcher
//!
//! Enumerates the results of a planned query by depth-first backtracking.
//!
//! The plan is compiled into steps. The first step binds the seed node to
//! each member of its yarn; every further step either binds a new node to
//! the partners of an already bound node (intersected with its yarn) or
//! tests a relation between two bound nodes. The search state lives in an
//! explicit frame stack, so results are produced one at a time.
//!
//! In shallow mode only distinct prefixes of a fixed length are produced:
//! once a prefix has a completion, the rest of its subtree is skipped.

use crate::planner::{Dir, Plan};
use crate::relations::{Pairing, RelationRegistry};
use crate::semantics::QEdge;
use crate::{Corpus, NodeId, ResultTuple};
use std::collections::BTreeSet;

/// A relation that must hold from a bound node to the step's node.
#[derive(Debug, Clone, Copy)]
struct Link {
    from: usize,
    rel: usize,
}

#[derive(Debug, Clone)]
struct Step {
    node: usize,
    /// Whether this step binds `node`, or only tests it.
    binds: bool,
    links: Vec<Link>,
}

#[derive(Debug)]
struct Frame {
    candidates: Vec<NodeId>,
    cursor: usize,
}

/// Lazy result enumeration over a plan.
pub struct Stitcher<'q, C: Corpus + ?Sized> {
    corpus: &'q C,
    registry: &'q RelationRegistry,
    yarns: &'q [BTreeSet<NodeId>],
    steps: Vec<Step>,
    /// Prefix length in shallow mode, 0 for full results.
    shallow: usize,
    /// Step at which the whole prefix is bound.
    prefix_step: usize,
    inst: Vec<Option<NodeId>>,
    frames: Vec<Frame>,
    seen: BTreeSet<ResultTuple>,
    started: bool,
}

impl<'q, C: Corpus + ?Sized> Stitcher<'q, C> {
    /// Compile a plan. `shallow` is the prefix length, 0 for full tuples.
    pub fn new(
        corpus: &'q C,
        registry: &'q RelationRegistry,
        qedges: &[QEdge],
        yarns: &'q [BTreeSet<NodeId>],
        plan: &Plan,
        shallow: usize,
    ) -> Self {
        let n_qnodes = yarns.len();
        let mut bound = vec![false; n_qnodes];
        let mut bind_step = vec![0usize; n_qnodes];
        let mut steps = Vec::with_capacity(plan.edges.len() + 1);
        if plan.seed < n_qnodes {
            bound[plan.seed] = true;
            steps.push(Step {
                node: plan.seed,
                binds: true,
                links: Vec::new(),
            });
        }

        let oriented = |edge: usize, dir: Dir| -> (Link, usize) {
            let e = qedges[edge];
            match dir {
                Dir::Forward => (
                    Link {
                        from: e.from,
                        rel: e.rel,
                    },
                    e.to,
                ),
                Dir::Backward => (
                    Link {
                        from: e.to,
                        rel: RelationRegistry::converse(e.rel),
                    },
                    e.from,
                ),
            }
        };
        for plan_edge in &plan.edges {
            let (link, to) = oriented(plan_edge.edge, plan_edge.dir);
            let mut links = vec![link];
            links.extend(
                plan_edge
                    .merged
                    .iter()
                    .map(|(edge, dir)| oriented(*edge, *dir).0),
            );
            let binds = !bound[to];
            if binds {
                bound[to] = true;
                bind_step[to] = steps.len();
            }
            steps.push(Step {
                node: to,
                binds,
                links,
            });
        }

        let shallow = shallow.min(n_qnodes);
        let prefix_step = bind_step[..shallow].iter().copied().max().unwrap_or(0);
        Self {
            corpus,
            registry,
            yarns,
            steps,
            shallow,
            prefix_step,
            inst: vec![None; n_qnodes],
            frames: Vec::new(),
            seen: BTreeSet::new(),
            started: false,
        }
    }

    fn holds(&self, link: Link, to: NodeId) -> bool {
        let Some(from) = self.inst[link.from] else {
            return false;
        };
        self.registry
            .get(link.rel)
            .is_some_and(|r| r.op.holds(self.corpus, from, to))
    }

    fn frame(&self, k: usize) -> Frame {
        let step = &self.steps[k];
        let candidates = if !step.binds {
            match self.inst[step.node] {
                Some(n) if step.links.iter().all(|l| self.holds(*l, n)) => vec![n],
                _ => Vec::new(),
            }
        } else if step.links.is_empty() {
            self.yarns[step.node].iter().copied().collect()
        } else {
            let yarn = &self.yarns[step.node];
            let generator = step.links.iter().position(|l| {
                self.registry
                    .get(l.rel)
                    .is_some_and(|r| r.op.pairing() == Pairing::Generator)
            });
            let pool: Vec<NodeId> = match generator {
                Some(i) => {
                    let link = step.links[i];
                    match (self.inst[link.from], self.registry.get(link.rel)) {
                        (Some(from), Some(r)) => r
                            .op
                            .successors(self.corpus, from)
                            .into_iter()
                            .filter(|m| yarn.contains(m))
                            .collect(),
                        _ => Vec::new(),
                    }
                }
                None => yarn.iter().copied().collect(),
            };
            pool.into_iter()
                .filter(|m| {
                    step.links
                        .iter()
                        .enumerate()
                        .all(|(j, l)| Some(j) == generator || self.holds(*l, *m))
                })
                .collect()
        };
        Frame {
            candidates,
            cursor: 0,
        }
    }

    fn pop(&mut self) {
        let k = self.frames.len().saturating_sub(1);
        self.frames.pop();
        if let Some(step) = self.steps.get(k) {
            if step.binds {
                self.inst[step.node] = None;
            }
        }
    }

    fn tuple(&self, len: usize) -> ResultTuple {
        self.inst.iter().take(len).flatten().copied().collect()
    }
}

impl<C: Corpus + ?Sized> Iterator for Stitcher<'_, C> {
    type Item = ResultTuple;

    fn next(&mut self) -> Option<ResultTuple> {
        if !self.started {
            self.started = true;
            if self.steps.is_empty() {
                return None;
            }
            let first = self.frame(0);
            self.frames.push(first);
        }
        loop {
            let k = self.frames.len().checked_sub(1)?;
            let frame = &mut self.frames[k];
            let Some(n) = frame.candidates.get(frame.cursor).copied() else {
                self.pop();
                continue;
            };
            frame.cursor += 1;
            let step = &self.steps[k];
            if step.binds {
                self.inst[step.node] = Some(n);
            }

            if self.shallow > 0 && k == self.prefix_step {
                let prefix = self.tuple(self.shallow);
                if self.seen.contains(&prefix) {
                    continue;
                }
            }

            if k + 1 < self.steps.len() {
                let next = self.frame(k + 1);
                self.frames.push(next);
                continue;
            }

            if self.shallow == 0 {
                return Some(self.tuple(self.inst.len()));
            }
            let prefix = self.tuple(self.shallow);
            while self.frames.len() > self.prefix_step + 1 {
                self.pop();
            }
            self.seen.insert(prefix.clone());
            return Some(prefix);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
