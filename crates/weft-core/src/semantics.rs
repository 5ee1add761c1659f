//! # Semantic Analysis
//!
//! Turns tokens into a query graph and checks it against the corpus.
//!
//! ## Grammar
//!
//! - Indentation nests atoms: a child gets an implicit `]]` edge to its
//!   parent, a leading operator relates the previous sibling (or the parent
//!   for a first child) to the new atom
//! - Relation lines connect named atoms; they are resolved after all atoms
//! - An atom whose type is the name of another atom is that same node
//!
//! ## Validation
//!
//! - Node types must exist in the corpus or name a custom node set; `.`
//!   stands for any type
//! - Features must exist, and their conditions must fit the value type
//! - Custom predicates (`f?name`) must be registered
//! - Relation operators must be known; k-parametrized and edge relations are
//!   registered on first use
//!
//! Every problem is collected; any problem fails the whole template.

use crate::relations::{EdgeDirection, RelationRegistry};
use crate::syntax::{Features, OpToken, QuKind, Token, de_context};
use crate::constraint::Predicates;
use crate::{Corpus, Diagnostic, FeatureConstraint, NodeId, WeftError, primitives};
use std::collections::{BTreeMap, BTreeSet};

/// Named node sets that atoms may use instead of a node type.
pub type CustomSets = BTreeMap<String, BTreeSet<NodeId>>;

// =============================================================================
// QUERY GRAPH
// =============================================================================

/// A quantifier ready for evaluation: its bodies have the parent reference
/// replaced by `parent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuantifier {
    pub kind: QuKind,
    pub templates: Vec<String>,
    pub parent: String,
    pub line: usize,
}

/// A query node.
#[derive(Debug, Clone)]
pub struct QNode {
    pub otype: String,
    pub features: Features,
    /// The atom line as written, without indentation.
    pub src: String,
    pub line: usize,
    pub quantifiers: Vec<BoundQuantifier>,
}

/// A query edge: `rel(from, to)`, with `rel` an index into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QEdge {
    pub from: usize,
    pub rel: usize,
    pub to: usize,
    pub line: usize,
}

/// The outcome of semantic analysis.
#[derive(Debug, Clone)]
pub struct QueryGraph {
    pub qnodes: Vec<QNode>,
    pub qedges: Vec<QEdge>,
    pub registry: RelationRegistry,
}

/// An edge before its operator has been resolved.
struct RawEdge {
    from: usize,
    op: OpToken,
    to: usize,
    line: usize,
}

fn implicit(op: &str) -> OpToken {
    OpToken {
        text: op.to_string(),
        edge: None,
    }
}

// =============================================================================
// GRAMMAR
// =============================================================================

struct Grammar {
    qnodes: Vec<QNode>,
    edges: Vec<RawEdge>,
    names: BTreeMap<String, usize>,
    bad: Vec<Diagnostic>,
}

impl Grammar {
    fn edge(&mut self, from: usize, op: OpToken, to: usize, line: usize) {
        self.edges.push(RawEdge { from, op, to, line });
    }
}

fn grammar(tokens: Vec<Token>) -> Result<Grammar, WeftError> {
    let mut g = Grammar {
        qnodes: Vec::new(),
        edges: Vec::new(),
        names: BTreeMap::new(),
        bad: Vec::new(),
    };
    // indent -> last qnode at that indent; one entry per open level
    let mut stack: BTreeMap<usize, usize> = BTreeMap::new();
    let mut prev_was_atom = None;

    let (mut ordered, rels): (Vec<Token>, Vec<Token>) = tokens
        .into_iter()
        .partition(|t| !matches!(t, Token::Rel { .. }));
    ordered.extend(rels);

    for token in ordered {
        let is_atom = matches!(token, Token::Atom { .. } | Token::Op { .. });
        match token {
            Token::Atom {
                line,
                indent,
                op,
                name,
                otype,
                src,
                features,
                quantifiers,
            } => {
                let quantifiers = quantifiers
                    .iter()
                    .map(|qu| {
                        de_context(qu, &name).map(|(templates, parent)| BoundQuantifier {
                            kind: qu.kind,
                            templates,
                            parent,
                            line: qu.line,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                g.qnodes.push(QNode {
                    otype,
                    features,
                    src,
                    line,
                    quantifiers,
                });
                let q = g.qnodes.len() - 1;
                let key = if name.is_empty() { format!(":{line}") } else { name };
                g.names.insert(key, q);
                place(&mut g, &mut stack, line, indent, op, Some(q));
            }
            Token::Op { line, indent, op } => {
                place(&mut g, &mut stack, line, indent, Some(op), None);
            }
            Token::Feat { line, features } => match (prev_was_atom, g.qnodes.last_mut()) {
                (Some(true), Some(last)) => last.features.extend(features),
                _ => {
                    let shown: Vec<String> = features
                        .iter()
                        .map(|(k, v)| format!("{k}{v}"))
                        .collect();
                    g.bad.push(Diagnostic::at(
                        line,
                        format!("Features without atom: \"{}\"", shown.join(" ")),
                    ));
                }
            },
            Token::Rel { line, from, op, to } => {
                let f = g.names.get(&from).copied();
                let t = g.names.get(&to).copied();
                for (q, n) in [(f, &from), (t, &to)] {
                    if q.is_none() {
                        g.bad.push(Diagnostic::at(
                            line,
                            format!("Relation with undefined name: \"{n}\""),
                        ));
                    }
                }
                if let (Some(f), Some(t)) = (f, t) {
                    g.edge(f, op, t, line);
                }
            }
        }
        prev_was_atom = Some(is_atom);
    }

    // An atom whose type names another atom is that atom.
    for q in 0..g.qnodes.len() {
        let Some(refer) = g.names.get(&g.qnodes[q].otype).copied() else {
            continue;
        };
        let otype = g.qnodes[refer].otype.clone();
        let line = g.qnodes[q].line;
        g.qnodes[q].otype = otype;
        g.edge(q, implicit(primitives::SAME_NODE), refer, line);
    }

    if g.bad.is_empty() {
        Ok(g)
    } else {
        Err(WeftError::Semantic(g.bad))
    }
}

/// Connect an atom (or a lonely operator when `q` is `None`) according to its
/// indentation.
fn place(
    g: &mut Grammar,
    stack: &mut BTreeMap<usize, usize>,
    line: usize,
    indent: usize,
    op: Option<OpToken>,
    q: Option<usize>,
) {
    let embedded = || implicit(primitives::EMBEDDED_IN);
    let Some((&top_indent, &top)) = stack.last_key_value() else {
        if indent > 0 {
            g.bad.push(Diagnostic::at(
                line,
                format!("Unexpected indent: {indent}, expected 0"),
            ));
        }
        if op.is_some() {
            g.bad.push(Diagnostic::at(
                line,
                "Lonely relation: not allowed at outermost level",
            ));
        }
        if let Some(q) = q {
            stack.insert(0, q);
        }
        return;
    };
    let parent = stack.range(..top_indent).next_back().map(|(_, p)| *p);

    if indent == top_indent {
        match (q, parent) {
            (None, Some(parent)) => {
                if let Some(op) = op {
                    g.edge(top, op, parent, line);
                }
            }
            (Some(q), Some(parent)) => {
                g.edge(q, embedded(), parent, line);
                if let Some(op) = op {
                    g.edge(top, op, q, line);
                }
            }
            (Some(q), None) => {
                if let Some(op) = op {
                    g.edge(top, op, q, line);
                }
            }
            // A lonely operator between two outermost atoms relates nothing.
            (None, None) => {}
        }
    } else if indent > top_indent {
        let Some(q) = q else {
            g.bad.push(Diagnostic::at(
                line,
                "Lonely relation: not allowed as first child",
            ));
            return;
        };
        g.edge(q, embedded(), top, line);
        if let Some(op) = op {
            g.edge(top, op, q, line);
        }
    } else {
        let Some(&sibling) = stack.get(&indent) else {
            let allowed: Vec<String> = stack
                .keys()
                .filter(|i| **i < indent)
                .map(ToString::to_string)
                .collect();
            g.bad.push(Diagnostic::at(
                line,
                format!(
                    "Unexpected indent: {indent}, expected one of {}",
                    allowed.join(", ")
                ),
            ));
            return;
        };
        let outer = stack.range(..indent).next_back().map(|(_, p)| *p);
        if let Some(outer) = outer {
            match q {
                None => {
                    if let Some(op) = op {
                        g.edge(sibling, op, outer, line);
                    }
                }
                Some(q) => {
                    g.edge(q, embedded(), outer, line);
                    if let Some(op) = op {
                        g.edge(sibling, op, q, line);
                    }
                }
            }
        } else if let (Some(q), Some(op)) = (q, op) {
            g.edge(sibling, op, q, line);
        }
        stack.retain(|i, _| *i <= indent);
    }
    if let Some(q) = q {
        stack.insert(indent, q);
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Problems grouped by feature and offending value, with the lines involved.
type ValueProblems = BTreeMap<String, BTreeMap<String, Vec<usize>>>;

fn join_lines(lines: &[usize], offset: usize) -> String {
    lines
        .iter()
        .map(|l| l.saturating_add(offset).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Analyze tokens against a corpus.
///
/// `offset` is only used to render line lists inside messages; the
/// diagnostics themselves carry local line numbers.
pub fn analyze<C: Corpus + ?Sized>(
    corpus: &C,
    tokens: Vec<Token>,
    sets: &CustomSets,
    predicates: &Predicates,
    offset: usize,
) -> Result<QueryGraph, WeftError> {
    let Grammar {
        mut qnodes,
        edges,
        ..
    } = grammar(tokens)?;

    let mut bad: Vec<Diagnostic> = Vec::new();
    let mut registry = RelationRegistry::for_corpus(corpus);

    // (a) node types
    let levels = corpus.levels();
    let mut types_good = true;
    for qnode in &qnodes {
        if qnode.otype == primitives::ANY_TYPE
            || sets.contains_key(&qnode.otype)
            || levels.iter().any(|l| *l == qnode.otype)
        {
            continue;
        }
        bad.push(Diagnostic::at(
            qnode.line,
            format!("Unknown object type: \"{}\"", qnode.otype),
        ));
        types_good = false;
    }
    if !types_good {
        bad.push(Diagnostic::general(format!(
            "Valid object types are: {}",
            levels.join(", ")
        )));
        if !sets.is_empty() {
            let names: Vec<&str> = sets.keys().map(String::as_str).collect();
            bad.push(Diagnostic::general(format!(
                "Or choose a custom set from: {}",
                names.join(", ")
            )));
        }
    }

    // (b) node features
    let mut missing: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut wrong: ValueProblems = BTreeMap::new();
    let mut has_values: ValueProblems = BTreeMap::new();
    let mut unbound: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut bind = |constraint: FeatureConstraint, line: usize| {
        constraint.bind(predicates).unwrap_or_else(|name| {
            unbound.entry(name).or_default().push(line);
            FeatureConstraint::Any
        })
    };
    for qnode in &mut qnodes {
        let features = std::mem::take(&mut qnode.features);
        for (name, constraint) in features {
            let Some(value_type) = corpus.node_feature_type(&name) else {
                missing.entry(name.clone()).or_default().push(qnode.line);
                qnode.features.insert(name, constraint);
                continue;
            };
            match constraint.typed(value_type) {
                Ok(typed) => {
                    qnode.features.insert(name, bind(typed, qnode.line));
                }
                Err(values) => {
                    for v in values {
                        wrong
                            .entry(name.clone())
                            .or_default()
                            .entry(v)
                            .or_default()
                            .push(qnode.line);
                    }
                    qnode.features.insert(name, FeatureConstraint::Any);
                }
            }
        }
    }

    // (c) relations
    let mut qedges = Vec::with_capacity(edges.len());
    let mut unknown = false;
    let mut edge_features: BTreeSet<String> = BTreeSet::new();
    let mut compared: BTreeSet<String> = BTreeSet::new();
    for edge in edges {
        let rel = match &edge.op.edge {
            Some((feature, condition)) => {
                let Some(value_type) = corpus.edge_feature_type(feature) else {
                    missing.entry(feature.clone()).or_default().push(edge.line);
                    continue;
                };
                edge_features.insert(feature.clone());
                let filter = match (condition, value_type) {
                    (FeatureConstraint::Present | FeatureConstraint::Any, _) => {
                        FeatureConstraint::Any
                    }
                    (other, None) => {
                        has_values
                            .entry(feature.clone())
                            .or_default()
                            .entry(other.to_string())
                            .or_default()
                            .push(edge.line);
                        continue;
                    }
                    (other, Some(t)) => match other.clone().typed(t) {
                        Ok(typed) => bind(typed, edge.line),
                        Err(values) => {
                            for v in values {
                                wrong
                                    .entry(feature.clone())
                                    .or_default()
                                    .entry(v)
                                    .or_default()
                                    .push(edge.line);
                            }
                            continue;
                        }
                    },
                };
                let direction = EdgeDirection::of(&edge.op.text).unwrap_or(EdgeDirection::Both);
                Some(registry.edge_relation(&edge.op.text, feature, direction, filter))
            }
            None => registry.resolve(&edge.op.text),
        };
        match rel {
            Some(rel) => {
                let read = registry.get(rel).map(|r| r.op.feature_names()).unwrap_or_default();
                for name in read {
                    if corpus.node_feature_type(name).is_none() {
                        missing.entry(name.to_string()).or_default().push(edge.line);
                    }
                    compared.insert(name.to_string());
                }
                qedges.push(QEdge {
                    from: edge.from,
                    rel,
                    to: edge.to,
                    line: edge.line,
                });
            }
            None => {
                bad.push(Diagnostic::at(
                    edge.line,
                    format!("Unknown relation: \"{}\"", edge.op.text),
                ));
                unknown = true;
            }
        }
    }
    if unknown {
        bad.push(Diagnostic::general(format!(
            "Allowed relations:\n{}",
            registry.legend()
        )));
    }

    for (name, lines) in &missing {
        bad.push(Diagnostic::general(format!(
            "Missing feature \"{name}\" in line(s) {}",
            join_lines(lines, offset)
        )));
    }
    for (name, lines) in &unbound {
        bad.push(Diagnostic::general(format!(
            "Unknown predicate \"{name}\" in line(s) {}",
            join_lines(lines, offset)
        )));
    }
    for (name, values) in &has_values {
        bad.push(Diagnostic::general(format!(
            "Feature \"{name}\" cannot have values:"
        )));
        for (value, lines) in values {
            bad.push(Diagnostic::general(format!(
                "    \"{value}\" superfluous: line(s) {}",
                join_lines(lines, offset)
            )));
        }
    }
    for (name, values) in &wrong {
        let expected = corpus
            .node_feature_type(name)
            .or_else(|| corpus.edge_feature_type(name).flatten());
        bad.push(Diagnostic::general(format!(
            "Feature \"{name}\" has wrong values:"
        )));
        for (value, lines) in values {
            let why = match expected {
                Some(crate::FeatureType::Str) => "is not a string condition",
                _ => "is not a number",
            };
            bad.push(Diagnostic::general(format!(
                "    \"{value}\" {why}: line(s) {}",
                join_lines(lines, offset)
            )));
        }
    }

    if !bad.is_empty() {
        return Err(WeftError::Semantic(bad));
    }

    // (d) load what the query reads
    let mut used: BTreeSet<String> = qnodes
        .iter()
        .flat_map(|q| q.features.keys().cloned())
        .collect();
    used.extend(edge_features);
    used.extend(compared);
    corpus.ensure_loaded(&used)?;

    Ok(QueryGraph {
        qnodes,
        qedges,
        registry,
    })
}

// =============================================================================
// TESTS
// =============================================================================
