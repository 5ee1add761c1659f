//! # Connectivity Gate
//!
//! A query whose relation graph falls apart into several components would
//! produce the cross product of independent searches. Such queries are
//! rejected before any corpus data is touched.

use crate::semantics::QEdge;
use crate::{Diagnostic, WeftError};

/// Connected components of the query graph, ignoring edge direction.
///
/// Components are sorted by their smallest query node; nodes within a
/// component are ascending.
#[must_use]
pub fn components(n_qnodes: usize, qedges: &[QEdge]) -> Vec<Vec<usize>> {
    let mut root: Vec<usize> = (0..n_qnodes).collect();

    fn find(root: &mut [usize], mut q: usize) -> usize {
        while root[q] != q {
            root[q] = root[root[q]];
            q = root[q];
        }
        q
    }

    for e in qedges {
        if e.from >= n_qnodes || e.to >= n_qnodes {
            continue;
        }
        let (a, b) = (find(&mut root, e.from), find(&mut root, e.to));
        if a != b {
            root[a.max(b)] = a.min(b);
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot_of: Vec<Option<usize>> = vec![None; n_qnodes];
    for q in 0..n_qnodes {
        let r = find(&mut root, q);
        match slot_of[r] {
            Some(g) => groups[g].push(q),
            None => {
                slot_of[r] = Some(groups.len());
                groups.push(vec![q]);
            }
        }
    }
    groups
}

/// Reject empty and disconnected queries.
pub fn check(n_qnodes: usize, qedges: &[QEdge]) -> Result<(), WeftError> {
    let parts = components(n_qnodes, qedges);
    match parts.len() {
        0 => Err(WeftError::Semantic(vec![Diagnostic::general(
            "Search without instructions. Tell me what to look for.",
        )])),
        1 => Ok(()),
        n => {
            let mut bad = vec![Diagnostic::general(format!(
                "More than one connected components ({n}):"
            ))];
            for part in &parts {
                let members: Vec<String> = part.iter().map(ToString::to_string).collect();
                bad.push(Diagnostic::general(format!(
                    "    query nodes {}",
                    members.join(", ")
                )));
            }
            bad.push(Diagnostic::general(
                "Either run the subqueries one by one, or connect the components by a relation",
            ));
            Err(WeftError::Semantic(bad))
        }
    }
}
