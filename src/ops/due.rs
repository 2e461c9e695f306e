use std::collections::{HashMap, VecDeque};

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use indexmap::IndexSet;

use crate::model::node::Node;
use crate::ops::deps::DependencyGraph;
use crate::ops::store::NodeStore;

/// Due dates derived for one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DueDates {
    /// Shown on reads: own date, descendant tasks and open tasks this blocks
    pub effective: Option<NaiveDateTime>,
    /// Handed to the parent. A note's own date is left out, its subtree is not.
    pub upward: Option<NaiveDateTime>,
}

impl DueDates {
    fn seed(node: &Node) -> Self {
        let own = node.due_date;
        DueDates {
            effective: own,
            upward: if node.is_task() { own } else { None },
        }
    }

    fn lower(&mut self, value: Option<NaiveDateTime>, upward: bool) -> bool {
        let before = *self;
        self.effective = earliest(self.effective, value);
        if upward {
            self.upward = earliest(self.upward, value);
        }
        *self != before
    }
}

/// Derived due dates per node id
pub type DueCache = HashMap<String, DueDates>;

/// An open task imposes its deadline on whatever blocks it.
fn feeds_blockers(node: &Node) -> bool {
    node.is_open_task()
}

fn earliest(a: Option<NaiveDateTime>, b: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Recompute due dates for `affected`, reading contributions from outside the
/// set out of `cache` and writing the results back into it.
///
/// `affected` must be closed under the parent and blocked-by edges (see
/// `propagate::affected_closure`) so nodes outside it cannot depend on it.
pub fn propagate_due(store: &NodeStore, graph: &DependencyGraph, affected: &IndexSet<String>, cache: &mut DueCache) {
    let mut dates: HashMap<&str, DueDates> = affected
        .iter()
        .filter_map(|id| store.get(id).map(|n| (id.as_str(), DueDates::seed(n))))
        .collect();

    let cached = |node: &Node, cache: &DueCache| -> DueDates {
        cache.get(&node.id).copied().unwrap_or_else(|| DueDates::seed(node))
    };

    for id in affected {
        let Some(node) = store.get(id) else {
            continue;
        };
        let Some(mut value) = dates.get(id.as_str()).copied() else {
            continue;
        };
        for child in store.children(id) {
            if !affected.contains(&child.id) {
                value.lower(cached(child, cache).upward, true);
            }
        }
        for source in graph.blocking(id) {
            if let Some(blocked) = store.get(&source)
                && feeds_blockers(blocked)
                && !affected.contains(&source)
            {
                value.lower(cached(blocked, cache).effective, node.is_task());
            }
        }
        dates.insert(id.as_str(), value);
    }

    let mut queue: VecDeque<&str> = dates.keys().copied().collect();
    while let Some(id) = queue.pop_front() {
        let (Some(node), Some(value)) = (store.get(id), dates.get(id).copied()) else {
            continue;
        };
        // a child reaches both of its parent's dates
        let mut sends: Vec<(String, Option<NaiveDateTime>, bool)> = Vec::new();
        if let Some(ref parent) = node.parent_id {
            sends.push((parent.clone(), value.upward, true));
        }
        if feeds_blockers(node) {
            for blocker in graph.blocked_by(id) {
                sends.push((blocker, value.effective, false));
            }
        }
        for (receiver, sent, from_child) in sends {
            if sent.is_none() {
                continue;
            }
            let Some(key) = affected.get(receiver.as_str()) else {
                continue;
            };
            let reaches_upward = from_child || store.get(key).is_some_and(Node::is_task);
            let Some(slot) = dates.get_mut(key.as_str()) else {
                continue;
            };
            if slot.lower(sent, reaches_upward) {
                queue.push_back(key.as_str());
            }
        }
    }

    for (id, value) in dates {
        cache.insert(id.to_string(), value);
    }
}

/// Last minute of the local day
pub fn end_of_day(now_local: NaiveDateTime) -> NaiveDateTime {
    now_local.date().and_time(NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN))
}

/// The due date a chore must move to, if any: today 23:59 when it has none
/// or when it passed before the current minute.
pub fn rollover_target(due: Option<NaiveDateTime>, now_local: NaiveDateTime) -> Option<NaiveDateTime> {
    match due {
        None => Some(end_of_day(now_local)),
        Some(due) if to_minute(due) < to_minute(now_local) => Some(end_of_day(now_local)),
        Some(_) => None,
    }
}

fn to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
