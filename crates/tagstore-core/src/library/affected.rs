//! Affected-node traversal
//!
//! A node's rendered display name can change when its own tags change, or
//! when a node it reaches through node-reference tags changes. Starting
//! from the nodes whose links or tag values changed, walk referrers
//! breadth-first with a visited set, so reference cycles terminate.

use std::collections::{HashSet, VecDeque};

use crate::error::Result;
use crate::template::DisplayTemplate;

/// The slice of library state the traversal reads
pub(crate) trait Graph {
    /// Display template of a node, `None` if it does not exist
    fn template(&mut self, node: i64) -> Result<Option<DisplayTemplate>>;

    /// `(node, class name)` for every node holding a node-reference tag
    /// that points at `node`
    fn referrers(&mut self, node: i64) -> Result<Vec<(i64, String)>>;
}

/// Nodes whose display name may have changed, in discovery order
///
/// A changed node is included when its template mentions `class_name`
/// (always, when `class_name` is `None`). A referrer is included when its
/// template follows the referring class into other nodes.
pub(crate) fn affected_nodes<G: Graph + ?Sized>(
    graph: &mut G,
    changed: &[i64],
    class_name: Option<&str>,
) -> Result<Vec<i64>> {
    let mut affected = Vec::new();
    let mut visited = HashSet::new();
    let mut queue: VecDeque<i64> = VecDeque::new();

    for &node in changed {
        if !visited.insert(node) {
            continue;
        }
        let Some(template) = graph.template(node)? else {
            continue;
        };
        if class_name.map_or(true, |class| template.depends_on(class)) {
            affected.push(node);
        }
        queue.push_back(node);
    }

    while let Some(node) = queue.pop_front() {
        for (referrer, class) in graph.referrers(node)? {
            if visited.contains(&referrer) {
                continue;
            }
            let Some(template) = graph.template(referrer)? else {
                continue;
            };
            if template.traverses(&class) {
                visited.insert(referrer);
                affected.push(referrer);
                queue.push_back(referrer);
            }
        }
    }
    Ok(affected)
}
