//! # Planner
//!
//! Orders the query edges into a retrieval plan for the stitcher.
//!
//! Every strategy grows a connected frontier from a seed node. Each round
//! first takes all edges whose endpoints are both in the frontier, then the
//! cheapest edge that brings in exactly one new node. Strategies differ in
//! the seed and in the cost of an edge:
//!
//! | Strategy             | Seed                        | Edge cost                 |
//! |----------------------|-----------------------------|---------------------------|
//! | `small_choice_multi` | smallest yarn               | spread, merged half-bounds |
//! | `small_choice_first` | smallest yarn               | spread                    |
//! | `by_yarn_size`       | smallest yarn               | spread x source yarn      |
//! | `spread_1_first`     | largest spread-1 subgraph   | spread                    |
//! | `big_choice_first`   | largest yarn                | inverse spread            |
//!
//! Ties are broken by the lowest edge index, forward before backward.

use crate::relations::RelationRegistry;
use crate::semantics::QEdge;
use crate::{WeftError, primitives::PER_MILLE};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// STRATEGIES
// =============================================================================

/// A plan construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    SmallChoiceMulti,
    SmallChoiceFirst,
    ByYarnSize,
    Spread1First,
    BigChoiceFirst,
}

impl Strategy {
    /// All strategies, default first.
    pub const ALL: [Self; 5] = [
        Self::SmallChoiceMulti,
        Self::SmallChoiceFirst,
        Self::ByYarnSize,
        Self::Spread1First,
        Self::BigChoiceFirst,
    ];

    /// The name used in templates, configuration and the CLI.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SmallChoiceMulti => "small_choice_multi",
            Self::SmallChoiceFirst => "small_choice_first",
            Self::ByYarnSize => "by_yarn_size",
            Self::Spread1First => "spread_1_first",
            Self::BigChoiceFirst => "big_choice_first",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|s| s.name()).collect();
                WeftError::UnknownStrategy(format!(
                    "\"{s}\" (allowed: {})",
                    allowed.join(", ")
                ))
            })
    }
}

// =============================================================================
// PLAN
// =============================================================================

/// Orientation of a plan edge with respect to its query edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dir {
    /// Walk from `from` to `to` with the relation itself.
    Forward,
    /// Walk from `to` to `from` with the converse relation.
    Backward,
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEdge {
    pub edge: usize,
    pub dir: Dir,
    /// Further half-bound edges into the same node, checked jointly.
    pub merged: Vec<(usize, Dir)>,
}

/// A retrieval plan: the seed node and the edges in stitching order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub strategy: Strategy,
    pub seed: usize,
    pub edges: Vec<PlanEdge>,
    /// Query nodes in the order the stitcher binds them.
    pub order: Vec<usize>,
    /// Edges subsumed by multi-edges.
    pub removed: BTreeSet<usize>,
}

/// What the planner needs to know about a studied query.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub qedges: &'a [QEdge],
    pub registry: &'a RelationRegistry,
    pub yarn_sizes: &'a [usize],
    /// Estimated spread per edge, from `from` to `to`, per mille.
    pub spreads: &'a [u64],
    /// Estimated spread per edge, from `to` to `from`, per mille.
    pub spreads_c: &'a [u64],
}

impl PlanInput<'_> {
    /// Endpoints of an oriented edge: (source, target).
    #[must_use]
    pub fn ends(&self, edge: usize, dir: Dir) -> (usize, usize) {
        let e = self.qedges[edge];
        match dir {
            Dir::Forward => (e.from, e.to),
            Dir::Backward => (e.to, e.from),
        }
    }

    fn spread(&self, edge: usize, dir: Dir) -> u64 {
        let spreads = match dir {
            Dir::Forward => self.spreads,
            Dir::Backward => self.spreads_c,
        };
        spreads.get(edge).copied().unwrap_or(0)
    }

    fn is_half_bound(&self, edge: usize) -> bool {
        self.registry
            .get(self.qedges[edge].rel)
            .is_some_and(|r| r.op.is_half_bound())
    }

    fn size(&self, q: usize) -> usize {
        self.yarn_sizes.get(q).copied().unwrap_or(0)
    }
}

/// Build a plan with the given strategy.
pub fn plan(strategy: Strategy, input: &PlanInput<'_>) -> Result<Plan, WeftError> {
    let n_qnodes = input.yarn_sizes.len();
    let mut growth = match strategy {
        Strategy::BigChoiceFirst => {
            let seed = (0..n_qnodes)
                .rev()
                .max_by_key(|q| input.size(*q))
                .unwrap_or(0);
            Growth::new(input, seed)
        }
        Strategy::Spread1First => spread_1_start(input),
        _ => {
            let seed = (0..n_qnodes).min_by_key(|q| input.size(*q)).unwrap_or(0);
            Growth::new(input, seed)
        }
    };

    let cost = |edge: usize, dir: Dir| -> u64 {
        let spread = input.spread(edge, dir);
        match strategy {
            Strategy::ByYarnSize => {
                let (from, _) = input.ends(edge, dir);
                let work = u128::from(spread) * input.size(from) as u128 / u128::from(PER_MILLE);
                u64::try_from(work).unwrap_or(u64::MAX)
            }
            Strategy::BigChoiceFirst => u64::MAX - spread,
            _ => spread,
        }
    };
    growth.run(&cost, strategy == Strategy::SmallChoiceMulti);

    let plan = Plan {
        strategy,
        seed: growth.order.first().copied().unwrap_or(0),
        edges: growth.edges,
        order: growth.order,
        removed: growth.removed,
    };
    check_complete(&plan, n_qnodes, input.qedges.len())?;
    Ok(plan)
}

fn check_complete(plan: &Plan, n_qnodes: usize, n_qedges: usize) -> Result<(), WeftError> {
    let expected: Vec<usize> = (0..n_qnodes).collect();
    let mut nodes = plan.order.clone();
    nodes.sort_unstable();
    if nodes != expected {
        return Err(WeftError::Planning(format!(
            "Object mismatch in plan:\nIn template: {expected:?}\nIn plan    : {nodes:?}"
        )));
    }

    let mut covered: BTreeSet<usize> = plan.removed.clone();
    for step in &plan.edges {
        covered.insert(step.edge);
        covered.extend(step.merged.iter().map(|(e, _)| *e));
    }
    let expected: Vec<usize> = (0..n_qedges).collect();
    let edges: Vec<usize> = covered.into_iter().collect();
    if edges != expected {
        return Err(WeftError::Planning(format!(
            "Relation mismatch in plan:\nIn template: {expected:?}\nIn plan    : {edges:?}"
        )));
    }
    Ok(())
}

// =============================================================================
// FRONTIER GROWTH
// =============================================================================

struct Growth<'a> {
    input: &'a PlanInput<'a>,
    inside: Vec<bool>,
    done: Vec<bool>,
    order: Vec<usize>,
    edges: Vec<PlanEdge>,
    removed: BTreeSet<usize>,
}

/// A candidate extension: cost, leading edge, and the merged rest.
type Candidate = (u64, usize, Dir, Vec<(usize, Dir)>);

impl<'a> Growth<'a> {
    fn new(input: &'a PlanInput<'a>, seed: usize) -> Self {
        let n_qnodes = input.yarn_sizes.len();
        let mut inside = vec![false; n_qnodes];
        let mut order = Vec::new();
        if seed < n_qnodes {
            inside[seed] = true;
            order.push(seed);
        }
        Self {
            input,
            inside,
            done: vec![false; input.qedges.len()],
            order,
            edges: Vec::new(),
            removed: BTreeSet::new(),
        }
    }

    fn take(&mut self, edge: usize, dir: Dir, merged: Vec<(usize, Dir)>) {
        let (_, to) = self.input.ends(edge, dir);
        self.done[edge] = true;
        for (e, _) in &merged {
            self.done[*e] = true;
            self.removed.insert(*e);
        }
        if !self.inside[to] {
            self.inside[to] = true;
            self.order.push(to);
        }
        self.edges.push(PlanEdge { edge, dir, merged });
    }

    fn run(&mut self, cost: &dyn Fn(usize, Dir) -> u64, multi: bool) {
        loop {
            let mut added = false;
            for edge in 0..self.done.len() {
                let e = self.input.qedges[edge];
                if !self.done[edge] && self.inside[e.from] && self.inside[e.to] {
                    self.take(edge, Dir::Forward, Vec::new());
                    added = true;
                }
            }

            let mut best: Option<Candidate> = None;
            for edge in 0..self.done.len() {
                for dir in [Dir::Forward, Dir::Backward] {
                    if self.extends(edge, dir) {
                        let cand = (cost(edge, dir), edge, dir, Vec::new());
                        best = cheaper(best, cand);
                    }
                }
            }
            if multi {
                for cand in self.multi_candidates() {
                    best = cheaper(best, cand);
                }
            }

            if let Some((_, edge, dir, merged)) = best {
                self.take(edge, dir, merged);
                added = true;
            }
            if !added {
                break;
            }
        }
    }

    fn extends(&self, edge: usize, dir: Dir) -> bool {
        let (from, to) = self.input.ends(edge, dir);
        !self.done[edge] && self.inside[from] && !self.inside[to]
    }

    /// Groups of at least two half-bound edges into the same new node.
    fn multi_candidates(&self) -> Vec<Candidate> {
        let mut groups: Vec<(usize, Vec<(usize, Dir)>)> = Vec::new();
        for edge in 0..self.done.len() {
            if !self.input.is_half_bound(edge) {
                continue;
            }
            for dir in [Dir::Forward, Dir::Backward] {
                if !self.extends(edge, dir) {
                    continue;
                }
                let (_, to) = self.input.ends(edge, dir);
                match groups.iter_mut().find(|(t, _)| *t == to) {
                    Some((_, members)) => members.push((edge, dir)),
                    None => groups.push((to, vec![(edge, dir)])),
                }
            }
        }
        groups
            .into_iter()
            .filter(|(_, members)| members.len() > 1)
            .map(|(to, members)| {
                let spreads: Vec<u64> = members
                    .iter()
                    .map(|(e, d)| self.input.spread(*e, *d))
                    .collect();
                let cost = combined_spread(&spreads, self.input.size(to));
                let (edge, dir) = members[0];
                (cost, edge, dir, members[1..].to_vec())
            })
            .collect()
    }
}

fn cheaper(best: Option<Candidate>, cand: Candidate) -> Option<Candidate> {
    match best {
        Some(b) if (b.0, b.1, b.2) <= (cand.0, cand.1, cand.2) => Some(b),
        _ => Some(cand),
    }
}

/// Expected number of target nodes satisfying all constraints at once,
/// assuming they are independent. Per mille.
#[must_use]
pub fn combined_spread(spreads: &[u64], target_size: usize) -> u64 {
    let Some((first, rest)) = spreads.split_first() else {
        return 0;
    };
    let denominator = target_size as u128 * u128::from(PER_MILLE);
    if denominator == 0 {
        return 0;
    }
    let mut acc = u128::from(*first);
    for spread in rest {
        acc = acc.saturating_mul(u128::from(*spread)) / denominator;
    }
    u64::try_from(acc).unwrap_or(u64::MAX)
}

/// Seed with the node from which the most spread-1 edges can be walked.
fn spread_1_start<'a>(input: &'a PlanInput<'a>) -> Growth<'a> {
    let mut s1: Vec<(usize, Dir)> = Vec::new();
    for edge in 0..input.qedges.len() {
        for dir in [Dir::Forward, Dir::Backward] {
            if input.spread(edge, dir) <= PER_MILLE {
                s1.push((edge, dir));
            }
        }
    }

    let mut best: Option<Growth<'a>> = None;
    for seed in 0..input.yarn_sizes.len() {
        let mut growth = Growth::new(input, seed);
        loop {
            let mut added = false;
            for (edge, dir) in &s1 {
                let (from, _) = input.ends(*edge, *dir);
                if !growth.done[*edge] && growth.inside[from] {
                    growth.take(*edge, *dir, Vec::new());
                    added = true;
                }
            }
            if !added {
                break;
            }
        }
        let size = growth.order.len() + growth.edges.len();
        if best
            .as_ref()
            .is_none_or(|b| b.order.len() + b.edges.len() < size)
        {
            best = Some(growth);
        }
    }
    best.unwrap_or_else(|| Growth::new(input, 0))
}

// =============================================================================
// TESTS
// =============================================================================
