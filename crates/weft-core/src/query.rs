//! # Query Module
//!
//! One search template, studied against one corpus.
//!
//! - `study` runs the pipeline: tokenize, analyze, check connectivity,
//!   spin atoms, spin edges, estimate spreads, plan
//! - `results`/`fetch` drive the stitcher lazily
//! - `count` walks the results without keeping them
//! - `show_plan` renders the plan and the mapping from result positions to
//!   template lines
//!
//! Quantifiers evaluate their bodies as nested queries; a nested query
//! shares the corpus, the custom sets, the predicates and the configuration
//! of its parent.

use crate::constraint::Predicates;
use crate::planner::{Dir, Plan, PlanInput, Strategy};
use crate::relations::RelationRegistry;
use crate::semantics::{CustomSets, QueryGraph};
use crate::stitch::Stitcher;
use crate::{
    Corpus, NodeId, ResultTuple, SearchConfig, WeftError, connectivity, planner, semantics, syntax,
};
use std::collections::{BTreeMap, BTreeSet};

static NO_PREDICATES: Predicates = BTreeMap::new();

/// Where a query is in its life cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryState {
    /// Not studied yet.
    Fresh,
    /// Study failed; the query has no results.
    Failed(WeftError),
    /// Some query node has no candidates; the query has no results.
    Empty,
    /// Planned and ready to deliver results.
    Ready,
}

/// A search template bound to a corpus.
#[derive(Debug)]
pub struct Query<'c, C: Corpus + ?Sized> {
    pub(crate) corpus: &'c C,
    pub(crate) sets: &'c CustomSets,
    predicates: &'c Predicates,
    pub(crate) config: SearchConfig,
    template: String,
    /// Line of the outermost template where this template starts.
    pub(crate) offset: usize,
    /// Quantifier nesting depth.
    pub(crate) level: usize,
    strategy: Strategy,
    pub(crate) graph: Option<QueryGraph>,
    pub(crate) yarns: Vec<BTreeSet<NodeId>>,
    /// Yarn sizes right after the atoms were spun.
    pub(crate) initial_sizes: Vec<usize>,
    pub(crate) spreads: Vec<u64>,
    pub(crate) spreads_c: Vec<u64>,
    pub(crate) thinned: BTreeSet<usize>,
    plan: Option<Plan>,
    state: QueryState,
}

impl<'c, C: Corpus + ?Sized> Query<'c, C> {
    /// A fresh query. Call [`Query::study`] before asking for results.
    #[must_use]
    pub fn new(
        corpus: &'c C,
        template: impl Into<String>,
        sets: &'c CustomSets,
        config: SearchConfig,
    ) -> Self {
        Self {
            corpus,
            sets,
            predicates: &NO_PREDICATES,
            config,
            template: template.into(),
            offset: 0,
            level: 0,
            strategy: Strategy::default(),
            graph: None,
            yarns: Vec::new(),
            initial_sizes: Vec::new(),
            spreads: Vec::new(),
            spreads_c: Vec::new(),
            thinned: BTreeSet::new(),
            plan: None,
            state: QueryState::Fresh,
        }
    }

    /// Custom predicates that `f?name` conditions refer to.
    #[must_use]
    pub fn with_predicates(mut self, predicates: &'c Predicates) -> Self {
        self.predicates = predicates;
        self
    }

    /// A query for a quantifier body, starting at line `offset` of the
    /// outermost template.
    pub(crate) fn nested(&self, template: String, offset: usize) -> Self {
        let mut query = Self::new(self.corpus, template, self.sets, self.config)
            .with_predicates(self.predicates);
        query.offset = offset;
        query.level = self.level.saturating_add(1);
        query.strategy = self.strategy;
        query
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[must_use]
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Whether the query can be asked for results.
    #[must_use]
    pub fn is_good(&self) -> bool {
        matches!(self.state, QueryState::Ready | QueryState::Empty)
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The analyzed query graph, once study got that far.
    #[must_use]
    pub fn graph(&self) -> Option<&QueryGraph> {
        self.graph.as_ref()
    }

    /// The candidate set of every query node.
    #[must_use]
    pub fn yarns(&self) -> &[BTreeSet<NodeId>] {
        &self.yarns
    }

    #[must_use]
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    // =========================================================================
    // STUDY
    // =========================================================================

    /// Parse, check, narrow and plan the query.
    ///
    /// `None` keeps the current strategy. On failure the query stays in
    /// [`QueryState::Failed`] and the error is returned.
    pub fn study(&mut self, strategy: Option<Strategy>) -> Result<(), WeftError> {
        if let Some(strategy) = strategy {
            self.strategy = strategy;
        }
        self.graph = None;
        self.yarns.clear();
        self.initial_sizes.clear();
        self.spreads.clear();
        self.spreads_c.clear();
        self.thinned.clear();
        self.plan = None;

        match self.prepare() {
            Ok(state) => {
                self.state = state;
                Ok(())
            }
            Err(e) => {
                self.state = QueryState::Failed(e.clone());
                Err(e)
            }
        }
    }

    fn prepare(&mut self) -> Result<QueryState, WeftError> {
        self.report("Checking search template ...");
        let tokens = syntax::tokenize(&self.template).map_err(|e| shift(e, self.offset))?;
        let graph = semantics::analyze(self.corpus, tokens, self.sets, self.predicates, self.offset)
            .map_err(|e| shift(e, self.offset))?;
        connectivity::check(graph.qnodes.len(), &graph.qedges)?;
        let (n_qnodes, n_qedges) = (graph.qnodes.len(), graph.qedges.len());
        self.graph = Some(graph);

        self.report(&format!("Setting up search space for {n_qnodes} objects ..."));
        self.spin_atoms()?;
        if self.has_empty_yarn() {
            return Ok(QueryState::Empty);
        }

        self.report(&format!(
            "Constraining search space with {n_qedges} relations ..."
        ));
        self.spin_edges();
        self.report(&format!("\t{} edges thinned", self.thinned.len()));
        if self.has_empty_yarn() {
            return Ok(QueryState::Empty);
        }

        self.estimate_spreads(true);
        self.report(&format!(
            "Setting up retrieval plan with strategy {} ...",
            self.strategy
        ));
        let plan = {
            let Some(graph) = &self.graph else {
                return Ok(QueryState::Empty);
            };
            let sizes: Vec<usize> = self.yarns.iter().map(BTreeSet::len).collect();
            planner::plan(
                self.strategy,
                &PlanInput {
                    qedges: &graph.qedges,
                    registry: &graph.registry,
                    yarn_sizes: &sizes,
                    spreads: &self.spreads,
                    spreads_c: &self.spreads_c,
                },
            )?
        };
        self.plan = Some(plan);

        let total: usize = self.yarns.iter().map(BTreeSet::len).sum();
        self.report(&format!("Ready to deliver results from {total} nodes"));
        Ok(QueryState::Ready)
    }

    fn has_empty_yarn(&self) -> bool {
        self.yarns.iter().any(BTreeSet::is_empty)
    }

    /// Progress messages: visible for the outer query, debug-level for
    /// quantifier bodies.
    pub(crate) fn report(&self, message: &str) {
        if self.level == 0 {
            tracing::info!("{}", message);
        } else {
            tracing::debug!(level = self.level, "{}", message);
        }
    }

    // =========================================================================
    // RESULTS
    // =========================================================================

    fn stitcher(&self, shallow: usize) -> Option<Stitcher<'_, C>> {
        if self.state != QueryState::Ready {
            return None;
        }
        let graph = self.graph.as_ref()?;
        let plan = self.plan.as_ref()?;
        Some(Stitcher::new(
            self.corpus,
            &graph.registry,
            &graph.qedges,
            &self.yarns,
            plan,
            shallow,
        ))
    }

    /// All results, lazily, in query node order.
    ///
    /// A query that is not ready yields nothing.
    pub fn results(&self) -> impl Iterator<Item = ResultTuple> + '_ {
        self.stitcher(0).into_iter().flatten()
    }

    /// Distinct result prefixes of length `size` (at least 1).
    ///
    /// With `size` 1 this is the set of nodes of the first query node that
    /// take part in some result.
    #[must_use]
    pub fn fetch_shallow(&self, size: usize) -> BTreeSet<ResultTuple> {
        self.stitcher(size.max(1)).into_iter().flatten().collect()
    }

    /// Up to `limit` results, or all of them.
    #[must_use]
    pub fn fetch(&self, limit: Option<usize>) -> Vec<ResultTuple> {
        self.results().take(limit.unwrap_or(usize::MAX)).collect()
    }

    /// Count results, logging progress every `progress` results and
    /// stopping at `limit` (0 means no limit).
    ///
    /// Missing arguments come from the configuration.
    pub fn count(&self, progress: Option<usize>, limit: Option<usize>) -> Result<usize, WeftError> {
        if !self.is_good() {
            return Err(WeftError::QueryFailed);
        }
        let progress = progress.unwrap_or(self.config.progress).max(1);
        let limit = limit.unwrap_or(self.config.count_limit);
        let until = if limit > 0 {
            limit.to_string()
        } else {
            "the end of the results".to_string()
        };
        tracing::info!("Counting results per {} up to {} ...", progress, until);

        let mut i = 0usize;
        for _ in self.results() {
            i += 1;
            if i % progress == 0 {
                tracing::info!("   {}", i);
            }
            if limit > 0 && i >= limit {
                break;
            }
        }
        tracing::info!("Done: {} results", i);
        Ok(i)
    }

    // =========================================================================
    // PLAN DISPLAY
    // =========================================================================

    /// Render the plan. With `details`, also the yarn sizes, the performance
    /// parameters and the edges in stitching order.
    #[must_use]
    pub fn show_plan(&self, details: bool) -> String {
        let mut out = String::new();
        let Some(graph) = self.graph.as_ref().filter(|_| self.is_good()) else {
            return out;
        };
        let order: Vec<usize> = self
            .plan
            .as_ref()
            .map(|p| p.order.clone())
            .unwrap_or_default();

        if details {
            if let Some(plan) = &self.plan {
                self.write_details(&mut out, graph, plan);
            }
        }

        push_line(
            &mut out,
            "The results are connected to the original search template as follows:",
        );
        for (i, line) in self.template.split('\n').enumerate() {
            let q = order.iter().find(|q| graph.qnodes[**q].line == i);
            let (marker, node) = match q {
                Some(q) => ("R", q.to_string()),
                None => ("", String::new()),
            };
            push_line(
                &mut out,
                &format!("{:>2} {marker:<1}{node:<2} {line}", i + self.offset),
            );
        }
        out
    }

    fn write_details(&self, out: &mut String, graph: &QueryGraph, plan: &Plan) {
        let n_edges = plan.edges.len() + plan.removed.len();
        push_line(
            out,
            &format!(
                "Search with {} objects and {} relations",
                plan.order.len(),
                n_edges
            ),
        );
        push_line(out, "Results are instantiations of the following objects:");
        for q in &plan.order {
            push_line(out, &self.node_line(graph, *q, false));
        }
        if plan.edges.is_empty() {
            return;
        }
        push_line(out, "Performance parameters:");
        for (name, value) in self.config.params() {
            push_line(out, &format!("\t{name:<20} = {value:>7}"));
        }
        push_line(
            out,
            "Instantiations are computed along the following relations:",
        );
        push_line(out, &self.node_line(graph, plan.seed, true));
        for step in &plan.edges {
            push_line(out, &self.edge_line(graph, step.edge, step.dir));
            for (edge, dir) in &step.merged {
                push_line(out, &self.edge_line(graph, *edge, *dir));
            }
        }
    }

    fn node_line(&self, graph: &QueryGraph, q: usize, second: bool) -> String {
        let space = " ".repeat(19);
        let otype = &graph.qnodes[q].otype;
        let size = self.yarns.get(q).map_or(0, BTreeSet::len);
        if second {
            format!("node {space} {q:>2}-{otype:<13} ({size:>6}   choices)")
        } else {
            format!("node {q:>2}-{otype:<13} {space} ({size:>6}   choices)")
        }
    }

    fn edge_line(&self, graph: &QueryGraph, edge: usize, dir: Dir) -> String {
        let e = graph.qedges[edge];
        let (f, rel, t, spread) = match dir {
            Dir::Forward => (e.from, e.rel, e.to, self.spreads.get(edge)),
            Dir::Backward => (
                e.to,
                RelationRegistry::converse(e.rel),
                e.from,
                self.spreads_c.get(edge),
            ),
        };
        let acro = graph.registry.get(rel).map_or("?", |r| r.acro.as_str());
        let spread = spread.copied().unwrap_or(0);
        let thinned = if self.thinned.contains(&edge) {
            " (thinned)"
        } else {
            ""
        };
        format!(
            "edge {f:>2}-{:<13} {acro:^2} {t:>2}-{:<13} ({:>6}.{} choices{thinned})",
            graph.qnodes[f].otype,
            graph.qnodes[t].otype,
            spread / 1000,
            (spread % 1000) / 100,
        )
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// Move the diagnostics of a template error into outer template lines.
fn shift(err: WeftError, offset: usize) -> WeftError {
    if offset == 0 {
        return err;
    }
    let lines = |d: Vec<crate::Diagnostic>| d.into_iter().map(|d| d.shifted(offset)).collect();
    match err {
        WeftError::Syntax(d) => WeftError::Syntax(lines(d)),
        WeftError::Semantic(d) => WeftError::Semantic(lines(d)),
        other => other,
    }
}

// =============================================================================
// TESTS
// =============================================================================
