//! Computed priority.
//!
//! Every open, non-chore task has a *baseline* from its own fields: a base
//! score from its raw priority, a due-date urgency term, a small bonus for
//! quick tasks and one for work already in progress. On top of that:
//!
//! - a parent scores at least the best computed score among its open children;
//! - a task with an incomplete blocker is suppressed to a fraction of its
//!   score, and its unsuppressed score is attributed to each of its blockers;
//! - done and cancelled tasks score zero and pass nothing on;
//! - chores (priority 5) score urgency plus the quick bonus in a bucket of
//!   their own and take no part in either rule.
//!
//! Scores are relaxed to a fixed point over a worklist bounded to the
//! affected set, so mixed tree/dependency cycles terminate.

use std::collections::{HashMap, VecDeque};

use chrono::NaiveDateTime;
use indexmap::IndexSet;

use crate::model::node::{Node, Priority};
use crate::model::view::PriorityBucket;
use crate::ops::deps::DependencyGraph;
use crate::ops::store::NodeStore;

pub const SUPPRESSION_FACTOR: f64 = 0.25;
pub const QUICK_BONUS: f64 = 5.0;
pub const IN_PROGRESS_BONUS: f64 = 15.0;
/// Content shorter than this (in characters) counts as quick
pub const QUICK_CONTENT_LIMIT: usize = 280;
pub const URGENCY_CEILING: f64 = 130.0;

const DUE_URGENCY: f64 = 100.0;
const OVERDUE_RANGE: f64 = URGENCY_CEILING - DUE_URGENCY;
const URGENCY_SCALE_DAYS: f64 = 7.0;
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorityScore {
    /// Score before blocker suppression; what blockers inherit
    pub unsuppressed: f64,
    pub computed: f64,
    pub blocked: bool,
    pub bucket: PriorityBucket,
}

pub type ScoreCache = HashMap<String, PriorityScore>;

/// 80, 60, 40, 20 for priorities 1 to 4; chores are off this scale.
pub fn base_score(priority: Priority) -> f64 {
    if priority.is_chore() {
        0.0
    } else {
        f64::from(5 - priority.value()) * 20.0
    }
}

/// Rises toward 100 as the due date approaches, then toward the ceiling
/// the longer it is overdue.
pub fn urgency(due: Option<NaiveDateTime>, now_local: NaiveDateTime) -> f64 {
    let Some(due) = due else {
        return 0.0;
    };
    let days = (due - now_local).num_seconds() as f64 / 86_400.0;
    if days >= 0.0 {
        DUE_URGENCY * (-days / URGENCY_SCALE_DAYS).exp()
    } else {
        DUE_URGENCY + OVERDUE_RANGE * (1.0 - (days / URGENCY_SCALE_DAYS).exp())
    }
}

/// No open subtasks and short content
pub fn is_quick(store: &NodeStore, node: &Node) -> bool {
    node.content.chars().count() < QUICK_CONTENT_LIMIT
        && store.children(&node.id).iter().all(|c| !c.is_open_task())
}

/// Whether any of `id`'s blockers is a task still open
pub fn has_incomplete_blocker(store: &NodeStore, graph: &DependencyGraph, id: &str) -> bool {
    graph
        .blocked_by(id)
        .iter()
        .filter_map(|b| store.get(b))
        .any(Node::is_open_task)
}

/// Score from the node's own fields alone
pub fn baseline(store: &NodeStore, node: &Node, now_local: NaiveDateTime) -> f64 {
    if !node.is_open_task() || node.is_chore() {
        return 0.0;
    }
    let mut score = base_score(node.priority) + urgency(node.due_date, now_local);
    if is_quick(store, node) {
        score += QUICK_BONUS;
    }
    if node.status == crate::model::NodeStatus::InProgress {
        score += IN_PROGRESS_BONUS;
    }
    score
}

fn chore_score(store: &NodeStore, node: &Node, now_local: NaiveDateTime) -> f64 {
    if !node.is_open_task() {
        return 0.0;
    }
    let quick = if is_quick(store, node) { QUICK_BONUS } else { 0.0 };
    urgency(node.due_date, now_local) + quick
}

/// Open tasks and notes surface their score to their parent
fn feeds_parent(node: &Node) -> bool {
    !node.is_closed_task() && !node.is_chore()
}

/// Open, non-chore tasks attribute their urgency to their blockers
fn feeds_blockers(node: &Node) -> bool {
    node.is_open_task() && !node.is_chore()
}

fn finish(store: &NodeStore, node: &Node, unsuppressed: f64, blocked: bool, now_local: NaiveDateTime) -> PriorityScore {
    if node.is_chore() {
        let score = chore_score(store, node, now_local);
        return PriorityScore {
            unsuppressed: score,
            computed: score,
            blocked,
            bucket: PriorityBucket::Chore,
        };
    }
    let computed = if node.is_closed_task() {
        0.0
    } else if blocked {
        unsuppressed * SUPPRESSION_FACTOR
    } else {
        unsuppressed
    };
    PriorityScore {
        unsuppressed,
        computed,
        blocked,
        bucket: PriorityBucket::Ranked,
    }
}

/// Recompute scores for `affected`, reading contributions from outside the
/// set out of `cache` and writing the results back into it.
pub fn evaluate_priorities(
    store: &NodeStore,
    graph: &DependencyGraph,
    affected: &IndexSet<String>,
    now_local: NaiveDateTime,
    cache: &mut ScoreCache,
) {
    let mut unsuppressed: HashMap<&str, f64> = HashMap::new();
    let mut blocked: HashMap<&str, bool> = HashMap::new();

    for id in affected {
        let Some(node) = store.get(id) else {
            continue;
        };
        let is_blocked = node.is_task() && has_incomplete_blocker(store, graph, id);
        let mut score = baseline(store, node, now_local);
        if !node.is_chore() {
            for child in store.children(id) {
                if feeds_parent(child) && !affected.contains(&child.id) {
                    let inherited = cache.get(&child.id).map_or(0.0, |s| s.computed);
                    score = score.max(inherited);
                }
            }
            for source in graph.blocking(id) {
                if let Some(node) = store.get(&source)
                    && feeds_blockers(node)
                    && !affected.contains(&source)
                {
                    let inherited = cache.get(&source).map_or(0.0, |s| s.unsuppressed);
                    score = score.max(inherited);
                }
            }
        }
        unsuppressed.insert(id.as_str(), score);
        blocked.insert(id.as_str(), is_blocked);
    }

    let mut queue: VecDeque<&str> = unsuppressed.keys().copied().collect();
    while let Some(id) = queue.pop_front() {
        let Some(node) = store.get(id) else {
            continue;
        };
        let own = unsuppressed[id];
        let score = finish(store, node, own, blocked[id], now_local);

        let mut offers: Vec<(String, f64)> = Vec::new();
        if feeds_parent(node)
            && let Some(ref parent) = node.parent_id
        {
            offers.push((parent.clone(), score.computed));
        }
        if feeds_blockers(node) {
            offers.extend(graph.blocked_by(id).into_iter().map(|b| (b, own)));
        }

        for (receiver, offered) in offers {
            let Some(key) = affected.get(receiver.as_str()) else {
                continue;
            };
            if store.get(key).is_some_and(Node::is_chore) {
                continue;
            }
            let Some(slot) = unsuppressed.get_mut(key.as_str()) else {
                continue;
            };
            if offered > *slot + EPSILON {
                *slot = offered;
                queue.push_back(key.as_str());
            }
        }
    }

    for (id, value) in &unsuppressed {
        if let Some(node) = store.get(id) {
            let score = finish(store, node, *value, blocked[id], now_local);
            cache.insert(id.to_string(), score);
        }
    }
}
