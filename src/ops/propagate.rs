use std::collections::VecDeque;

use indexmap::IndexSet;

use crate::ops::deps::DependencyGraph;
use crate::ops::store::NodeStore;

/// Every indexed node whose derived values can change when `seeds` change.
///
/// Derived values flow from a node to its parent and to the nodes it is
/// blocked by, so the closure follows exactly those two edges. Unknown seeds
/// are skipped; cycles through tree and dependency edges terminate.
pub fn affected_closure<I>(store: &NodeStore, graph: &DependencyGraph, seeds: I) -> IndexSet<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: IndexSet<String> = IndexSet::new();
    let mut queue: VecDeque<String> = seeds.into_iter().collect();
    while let Some(id) = queue.pop_front() {
        let Some(node) = store.get(&id) else {
            continue;
        };
        if out.contains(&id) {
            continue;
        }
        if let Some(ref parent) = node.parent_id {
            queue.push_back(parent.clone());
        }
        queue.extend(graph.blocked_by(&id));
        out.insert(id);
    }
    out
}

/// Seeds for a change to `id`: the node itself plus the nodes it blocks,
/// whose suppression depends on its status.
pub fn seeds_for(graph: &DependencyGraph, id: &str) -> Vec<String> {
    let mut seeds = vec![id.to_string()];
    seeds.extend(graph.blocking(id));
    seeds
}
