//! Integration tests for the sync engine: API mutations, reconciliation of
//! external file changes, derived values and the watch loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use tasknotes::io::recovery::{RecoveryCategory, read_recovery_entries};
use tasknotes::io::vault_io::{init_vault, load_vault};
use tasknotes::model::{NewNode, NodeMode, NodePatch, NodeStatus, Vault};
use tasknotes::ops::{
    Clock, DeleteMode, ListQuery, ReconcileOutcome, SearchQuery, SortKey, SyncEngine,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A clock the test can move
#[derive(Clone)]
struct TestClock(Arc<Mutex<DateTime<Utc>>>);

impl TestClock {
    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Self {
        TestClock(Arc::new(Mutex::new(
            Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap(),
        )))
    }

    fn set(&self, y: i32, m: u32, d: u32, h: u32, min: u32) {
        *self.0.lock().unwrap() = Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap();
    }

    fn clock(&self) -> Clock {
        let inner = Arc::clone(&self.0);
        Arc::new(move || *inner.lock().unwrap())
    }
}

fn new_vault() -> (TempDir, Vault) {
    let tmp = TempDir::new().unwrap();
    let vault = init_vault(tmp.path(), Some("test")).unwrap();
    (tmp, vault)
}

fn open_at(vault: &Vault, clock: &TestClock) -> SyncEngine {
    SyncEngine::with_clock(vault.clone(), clock.clock()).unwrap()
}

fn file_of(engine: &SyncEngine, id: &str) -> PathBuf {
    engine.get_node(id).unwrap().file_path.expect("node has a file")
}

fn due(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

fn edit_file(path: &Path, from: &str, to: &str) {
    let text = fs::read_to_string(path).unwrap();
    assert!(text.contains(from), "{} does not contain {:?}:\n{}", path.display(), from, text);
    fs::write(path, text.replacen(from, to, 1)).unwrap();
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        actual
    );
}

// ---------------------------------------------------------------------------
// API mutations
// ---------------------------------------------------------------------------

#[test]
fn create_writes_a_file_and_ignores_its_own_write() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);

    let view = engine
        .create_node(NewNode::task("Write report").with_priority(2))
        .unwrap();
    let path = file_of(&engine, view.id());
    assert_eq!(path, vault.nodes_dir().join("write-report.md"));

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains(&format!("id: {}\n", view.id())));
    assert!(text.contains("title: \"Write report\"\n"));
    assert!(text.contains("created_at: 2024-03-01T10:00:00Z\n"));

    assert_eq!(engine.reconcile(&path).unwrap(), ReconcileOutcome::SelfWrite);
}

#[test]
fn clashing_titles_get_distinct_files() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);

    let a = engine.create_node(NewNode::note("Ideas")).unwrap();
    let b = engine.create_node(NewNode::note("Ideas")).unwrap();
    let path_a = file_of(&engine, a.id());
    let path_b = file_of(&engine, b.id());
    assert_ne!(path_a, path_b);
    let short: String = b.id().chars().take(8).collect();
    assert_eq!(path_b, vault.nodes_dir().join(format!("ideas-{}.md", short)));
}

#[test]
fn update_bumps_timestamp_and_rewrites_file() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("Draft")).unwrap().id().to_string();

    clock.set(2024, 3, 1, 11, 30);
    let view = engine
        .update_node(&id, &NodePatch::status(NodeStatus::InProgress))
        .unwrap();
    assert_eq!(view.node.status, NodeStatus::InProgress);
    assert_eq!(
        view.node.updated_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 11, 30, 0).unwrap()
    );

    let text = fs::read_to_string(file_of(&engine, &id)).unwrap();
    assert!(text.contains("status: in_progress\n"));
    assert!(text.contains("updated_at: 2024-03-01T11:30:00Z\n"));
}

#[test]
fn unknown_ids_are_reported() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);

    let err = engine.get_node("missing").unwrap_err();
    assert!(err.is_not_found());
    let err = engine
        .update_node("missing", &NodePatch::status(NodeStatus::Done))
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn moving_a_node_under_its_descendant_is_rejected() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let parent = engine.create_node(NewNode::note("Project")).unwrap().id().to_string();
    let child = engine
        .create_node(NewNode::task("Step").with_parent(parent.clone()))
        .unwrap()
        .id()
        .to_string();

    let err = engine.move_node(&parent, Some(&child)).unwrap_err();
    assert!(err.is_cycle());
    assert_eq!(engine.get_node(&parent).unwrap().node.parent_id, None);

    let moved = engine.move_node(&child, None).unwrap();
    assert_eq!(moved.node.parent_id, None);
    assert_eq!(engine.get_node(&parent).unwrap().children_count, 0);
}

#[test]
fn delete_archives_the_whole_subtree() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let parent = engine.create_node(NewNode::note("Project")).unwrap().id().to_string();
    let child = engine
        .create_node(NewNode::task("Step").with_parent(parent.clone()))
        .unwrap()
        .id()
        .to_string();
    let parent_file = file_of(&engine, &parent);

    let report = engine.delete_node(&parent, DeleteMode::Recursive).unwrap();
    assert_eq!(report.removed, vec![child.clone(), parent.clone()]);
    assert_eq!(report.archived.len(), 2);
    for archived in &report.archived {
        assert!(archived.starts_with(vault.archive_dir()));
        assert!(archived.exists());
    }
    assert!(!parent_file.exists());
    assert!(engine.get_node(&child).unwrap_err().is_not_found());
}

#[test]
fn tags_flow_down_the_tree() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let mut area = NewNode::note("Garden");
    area.tags = vec!["home".into()];
    let area = engine.create_node(area).unwrap().id().to_string();
    let step = engine
        .create_node(NewNode::task("Prune roses").with_parent(area.clone()))
        .unwrap();
    assert_eq!(step.node.tags, vec!["home"]);
    let step = step.id().to_string();

    clock.set(2024, 3, 1, 10, 5);
    let patch = NodePatch {
        tags: Some(vec!["home".into(), "weekend".into()]),
        ..Default::default()
    };
    engine.update_node(&area, &patch).unwrap();
    assert_eq!(engine.get_node(&step).unwrap().node.tags, vec!["home", "weekend"]);
    let text = fs::read_to_string(file_of(&engine, &step)).unwrap();
    assert!(text.contains("tags: [\"home\", \"weekend\"]\n"));
    assert_eq!(engine.reconcile(&file_of(&engine, &step)).unwrap(), ReconcileOutcome::SelfWrite);

    // an edit made in another tool is pushed down as well
    edit_file(
        &file_of(&engine, &area),
        "tags: [\"home\", \"weekend\"]",
        "tags: [\"home\", \"weekend\", \"outside\"]",
    );
    edit_file(&file_of(&engine, &area), "updated_at: 2024-03-01T10:05:00Z", "updated_at: 2024-03-01T10:06:00Z");
    engine.reconcile(&file_of(&engine, &area)).unwrap();
    assert_eq!(
        engine.get_node(&step).unwrap().node.tags,
        vec!["home", "weekend", "outside"]
    );
}

#[test]
fn status_changes_are_recorded() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("File taxes")).unwrap().id().to_string();
    assert!(engine.get_events(&id).unwrap().is_empty());

    clock.set(2024, 3, 1, 11, 0);
    engine.update_node(&id, &NodePatch::status(NodeStatus::InProgress)).unwrap();
    // edits that keep the status are not events
    let patch = NodePatch {
        priority: Some(1),
        ..Default::default()
    };
    engine.update_node(&id, &patch).unwrap();

    clock.set(2024, 3, 1, 12, 0);
    let path = file_of(&engine, &id);
    edit_file(&path, "status: in_progress", "status: done");
    edit_file(&path, "updated_at: 2024-03-01T11:00:01Z", "updated_at: 2024-03-01T12:00:00Z");
    engine.reconcile(&path).unwrap();

    let events = engine.get_events(&id).unwrap();
    let steps: Vec<(NodeStatus, NodeStatus)> = events.iter().map(|e| (e.from, e.to)).collect();
    assert_eq!(
        steps,
        vec![
            (NodeStatus::InProgress, NodeStatus::Done),
            (NodeStatus::Todo, NodeStatus::InProgress),
        ]
    );
    assert_eq!(events[1].occurred_at, Utc.with_ymd_and_hms(2024, 3, 1, 11, 0, 0).unwrap());
    assert!(engine.get_events("missing").unwrap_err().is_not_found());
}

#[test]
fn failed_archive_leaves_the_node_in_place() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let parent = engine.create_node(NewNode::note("Project")).unwrap().id().to_string();
    let child = engine
        .create_node(NewNode::task("Step").with_parent(parent.clone()))
        .unwrap()
        .id()
        .to_string();
    let parent_file = file_of(&engine, &parent);
    let child_file = file_of(&engine, &child);

    fs::remove_dir_all(vault.archive_dir()).unwrap();
    fs::write(vault.archive_dir(), "not a directory").unwrap();

    assert!(engine.delete_node(&parent, DeleteMode::Recursive).is_err());
    assert!(parent_file.exists());
    assert!(child_file.exists());
    assert_eq!(engine.get_node(&child).unwrap().node.parent_id.as_deref(), Some(parent.as_str()));
    assert_eq!(engine.get_node(&parent).unwrap().children_count, 1);

    let entries = read_recovery_entries(&vault.root, None);
    assert!(entries.iter().any(|e| e.category == RecoveryCategory::Archive));

    let stats = engine.sync().unwrap();
    assert_eq!((stats.created, stats.removed), (0, 0));
}

#[test]
fn delete_with_reparent_keeps_children() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let top = engine.create_node(NewNode::note("Area")).unwrap().id().to_string();
    let middle = engine
        .create_node(NewNode::note("Project").with_parent(top.clone()))
        .unwrap()
        .id()
        .to_string();
    let leaf = engine
        .create_node(NewNode::task("Step").with_parent(middle.clone()))
        .unwrap()
        .id()
        .to_string();

    let report = engine.delete_node(&middle, DeleteMode::Reparent).unwrap();
    assert_eq!(report.removed, vec![middle]);
    assert_eq!(report.reparented, vec![leaf.clone()]);

    let view = engine.get_node(&leaf).unwrap();
    assert_eq!(view.node.parent_id.as_deref(), Some(top.as_str()));
    let text = fs::read_to_string(view.file_path.unwrap()).unwrap();
    assert!(text.contains(&format!("parent_id: {}\n", top)));
}

// ---------------------------------------------------------------------------
// Dependencies and derived values
// ---------------------------------------------------------------------------

#[test]
fn blocked_tasks_are_suppressed_and_blockers_inherit() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let urgent = engine
        .create_node(NewNode::task("Ship release").with_priority(1))
        .unwrap()
        .id()
        .to_string();
    let chore = engine
        .create_node(NewNode::task("Fix CI").with_priority(4))
        .unwrap()
        .id()
        .to_string();

    // base 80 + quick bonus 5
    assert_close(engine.get_node(&urgent).unwrap().computed_priority, 85.0);
    assert_close(engine.get_node(&chore).unwrap().computed_priority, 25.0);

    assert!(engine.add_dependency(&urgent, &chore).unwrap());
    assert!(!engine.add_dependency(&urgent, &chore).unwrap());

    let blocked = engine.get_node(&urgent).unwrap();
    assert!(blocked.blocked);
    assert_close(blocked.computed_priority, 85.0 * 0.25);
    assert_close(engine.get_node(&chore).unwrap().computed_priority, 85.0);

    let text = fs::read_to_string(file_of(&engine, &urgent)).unwrap();
    assert!(text.contains(&format!("blocked_by: [\"{}\"]\n", chore)));

    // finishing the blocker lifts the suppression
    engine
        .update_node(&chore, &NodePatch::status(NodeStatus::Done))
        .unwrap();
    let unblocked = engine.get_node(&urgent).unwrap();
    assert!(!unblocked.blocked);
    assert_close(unblocked.computed_priority, 85.0);

    assert!(engine.remove_dependency(&urgent, &chore).unwrap());
    assert!(!engine.remove_dependency(&urgent, &chore).unwrap());
    let text = fs::read_to_string(file_of(&engine, &urgent)).unwrap();
    assert!(!text.contains("blocked_by"));
}

#[test]
fn dependency_cycles_are_rejected() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let a = engine.create_node(NewNode::task("A")).unwrap().id().to_string();
    let b = engine.create_node(NewNode::task("B")).unwrap().id().to_string();
    let c = engine.create_node(NewNode::task("C")).unwrap().id().to_string();

    engine.add_dependency(&a, &b).unwrap();
    engine.add_dependency(&b, &c).unwrap();
    let err = engine.add_dependency(&c, &a).unwrap_err();
    assert!(err.is_cycle());
    assert!(engine.get_dependencies(&c).unwrap().blocked_by.is_empty());

    let deps = engine.get_dependencies(&b).unwrap();
    assert_eq!(deps.blocked_by.len(), 1);
    assert_eq!(deps.blocked_by[0].id(), c);
    assert_eq!(deps.blocking[0].id(), a);
}

#[test]
fn parents_take_the_earliest_due_date_of_their_tasks() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let project = engine
        .create_node(NewNode::note("Launch").with_due(due(2024, 3, 20, 17, 0)))
        .unwrap()
        .id()
        .to_string();
    engine
        .create_node(
            NewNode::task("Book venue")
                .with_parent(project.clone())
                .with_due(due(2024, 3, 5, 12, 0))
                .with_priority(2),
        )
        .unwrap();

    let view = engine.get_node(&project).unwrap();
    assert_eq!(view.node.due_date, Some(due(2024, 3, 20, 17, 0)));
    assert_eq!(view.effective_due, Some(due(2024, 3, 5, 12, 0)));
    assert!(view.computed_priority > 0.0);
    assert_eq!(view.children_count, 1);
}

#[test]
fn due_dates_reach_past_intermediate_notes() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let root = engine.create_node(NewNode::task("Move house")).unwrap().id().to_string();
    let folder = engine
        .create_node(NewNode::note("Paperwork").with_parent(root.clone()).with_due(due(2024, 3, 2, 9, 0)))
        .unwrap()
        .id()
        .to_string();
    let leaf = engine
        .create_node(NewNode::task("Change address").with_parent(folder.clone()))
        .unwrap()
        .id()
        .to_string();
    assert_eq!(engine.get_node(&root).unwrap().effective_due, None);

    let patch = NodePatch {
        due_date: Some(Some(due(2024, 3, 5, 9, 0))),
        ..Default::default()
    };
    engine.update_node(&leaf, &patch).unwrap();

    assert_eq!(engine.get_node(&root).unwrap().effective_due, Some(due(2024, 3, 5, 9, 0)));
    // the note still shows its own earlier date
    assert_eq!(engine.get_node(&folder).unwrap().effective_due, Some(due(2024, 3, 2, 9, 0)));
}

#[test]
fn chores_roll_over_to_the_end_of_the_current_day() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine
        .create_node(NewNode::task("Water plants").with_priority(5))
        .unwrap()
        .id()
        .to_string();

    let view = engine.get_node(&id).unwrap();
    assert_eq!(view.node.due_date, Some(due(2024, 3, 1, 23, 59)));
    assert_eq!(view.bucket, tasknotes::model::PriorityBucket::Chore);

    clock.set(2024, 3, 2, 9, 0);
    let view = engine.get_node(&id).unwrap();
    assert_eq!(view.node.due_date, Some(due(2024, 3, 2, 23, 59)));
    let text = fs::read_to_string(file_of(&engine, &id)).unwrap();
    assert!(text.contains("due_date: 2024-03-02T23:59:00\n"));

    // compared at minute precision: still current within its own minute
    *clock.0.lock().unwrap() = Utc.with_ymd_and_hms(2024, 3, 2, 23, 59, 30).unwrap();
    let view = engine.get_node(&id).unwrap();
    assert_eq!(view.node.due_date, Some(due(2024, 3, 2, 23, 59)));

    clock.set(2024, 3, 3, 0, 0);
    let view = engine.get_node(&id).unwrap();
    assert_eq!(view.node.due_date, Some(due(2024, 3, 3, 23, 59)));
}

#[test]
fn timezone_offset_is_persisted() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 23, 0);
    let engine = open_at(&vault, &clock);
    let id = engine
        .create_node(NewNode::task("Take out bins").with_priority(5))
        .unwrap()
        .id()
        .to_string();
    assert_eq!(engine.get_node(&id).unwrap().node.due_date, Some(due(2024, 3, 1, 23, 59)));

    // 23:00 UTC is already the next day at +02:00
    engine.set_timezone_offset(120).unwrap();
    assert_eq!(engine.timezone_offset().unwrap().minutes(), 120);
    assert_eq!(engine.get_node(&id).unwrap().node.due_date, Some(due(2024, 3, 2, 23, 59)));
    assert_eq!(load_vault(&vault.root).unwrap().offset().minutes(), 120);

    assert!(engine.set_timezone_offset(24 * 60).is_err());
    assert_eq!(engine.timezone_offset().unwrap().minutes(), 120);
}

// ---------------------------------------------------------------------------
// Reading and querying
// ---------------------------------------------------------------------------

#[test]
fn search_tree_and_backlinks() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let mut milk = NewNode::task("Buy milk").with_priority(2);
    milk.tags = vec!["errands".into()];
    let milk = engine.create_node(milk).unwrap().id().to_string();
    let plan = engine
        .create_node(NewNode::note("Weekly plan").with_content("Remember [[Buy Milk]] on Friday\n"))
        .unwrap()
        .id()
        .to_string();
    engine
        .create_node(NewNode::task("Call mum").with_parent(plan.clone()))
        .unwrap();

    let hits = engine.search(&SearchQuery::new("MILK")).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.view.id()).collect();
    assert_eq!(hits.len(), 2);
    assert!(ids.contains(&milk.as_str()));
    assert!(ids.contains(&plan.as_str()));
    assert!(engine.search(&SearchQuery::new("   ")).unwrap().is_empty());

    let backlinks = engine.get_backlinks(&milk).unwrap();
    assert_eq!(backlinks.len(), 1);
    assert_eq!(backlinks[0].id(), plan);

    let tree = engine.get_tree(None).unwrap();
    assert_eq!(tree.len(), 2);
    let plan_tree = tree.iter().find(|t| t.view.id() == plan).unwrap();
    assert_eq!(plan_tree.children.len(), 1);
    assert_eq!(plan_tree.children[0].view.node.title, "Call mum");

    let graph = engine.get_graph().unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 2);
}

#[test]
fn listing_filters_and_sorts() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    engine.create_node(NewNode::task("Low").with_priority(4)).unwrap();
    engine.create_node(NewNode::task("High").with_priority(1)).unwrap();
    engine.create_node(NewNode::note("Reference")).unwrap();

    let mut query = ListQuery {
        sort: SortKey::Computed,
        ..Default::default()
    };
    let titles: Vec<String> = engine
        .list_nodes(&query)
        .unwrap()
        .into_iter()
        .map(|v| v.node.title)
        .collect();
    assert_eq!(titles, vec!["High", "Low", "Reference"]);

    query.filter.mode = Some(NodeMode::Note);
    let notes = engine.list_nodes(&query).unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].node.title, "Reference");
}

#[test]
fn id_prefixes_resolve_when_unique() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("Only")).unwrap().id().to_string();

    assert_eq!(engine.resolve_id(&id[..6]).unwrap(), id);
    assert_eq!(engine.resolve_id(&id).unwrap(), id);
    assert!(engine.resolve_id("zzzz").unwrap_err().is_not_found());
}

// ---------------------------------------------------------------------------
// Reconciling external changes
// ---------------------------------------------------------------------------

#[test]
fn opening_a_vault_reports_scan_counts_and_mints_ids() {
    let (_tmp, vault) = new_vault();
    let nodes = vault.nodes_dir();
    fs::write(nodes.join("groceries.md"), "---\ntitle: Groceries\n---\neggs\n").unwrap();
    fs::write(nodes.join("untitled.md"), "---\nmode: note\n---\n").unwrap();
    fs::write(nodes.join("broken.md"), "no header here\n").unwrap();
    fs::write(nodes.join("notes.txt"), "ignored\n").unwrap();

    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let stats = engine.initial_scan();
    assert_eq!((stats.created, stats.updated, stats.removed, stats.skipped), (2, 0, 0, 1));

    let text = fs::read_to_string(nodes.join("groceries.md")).unwrap();
    assert!(text.starts_with("---\nid: "));
    assert!(text.ends_with("---\neggs\n"));

    // the title falls back to the file name
    let views = engine.list_nodes(&ListQuery::default()).unwrap();
    assert!(views.iter().any(|v| v.node.title == "untitled" && v.node.mode == NodeMode::Note));

    // broken.md is kept on disk and logged
    assert!(nodes.join("broken.md").exists());
    let entries = read_recovery_entries(&vault.root, None);
    assert!(entries.iter().any(|e| e.category == RecoveryCategory::Parser));
}

#[test]
fn newer_external_edits_are_applied() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("Draft")).unwrap().id().to_string();
    let path = file_of(&engine, &id);

    let text = fs::read_to_string(&path).unwrap();
    let edited = text
        .replace("title: \"Draft\"", "title: \"Final draft\"")
        .replace("updated_at: 2024-03-01T10:00:00Z", "updated_at: 2024-03-01T12:00:00Z");
    fs::write(&path, edited).unwrap();

    assert_eq!(
        engine.reconcile(&path).unwrap(),
        ReconcileOutcome::Updated {
            id: id.clone(),
            fields: vec!["title"]
        }
    );
    let view = engine.get_node(&id).unwrap();
    assert_eq!(view.node.title, "Final draft");
    assert_eq!(
        view.node.updated_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    );
    assert_eq!(engine.reconcile(&path).unwrap(), ReconcileOutcome::Unchanged);
}

#[test]
fn edits_without_a_new_timestamp_are_bumped() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("Draft")).unwrap().id().to_string();
    let path = file_of(&engine, &id);

    clock.set(2024, 3, 1, 10, 15);
    edit_file(&path, "priority: 3", "priority: 1");
    assert_eq!(
        engine.reconcile(&path).unwrap(),
        ReconcileOutcome::Updated {
            id: id.clone(),
            fields: vec!["priority"]
        }
    );

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("priority: 1\n"));
    assert!(text.contains("updated_at: 2024-03-01T10:15:00Z\n"));
    assert_eq!(engine.reconcile(&path).unwrap(), ReconcileOutcome::SelfWrite);
}

#[test]
fn stale_files_are_overwritten_and_logged() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("Draft")).unwrap().id().to_string();
    let path = file_of(&engine, &id);
    let original = fs::read_to_string(&path).unwrap();

    clock.set(2024, 3, 1, 11, 0);
    engine
        .update_node(
            &id,
            &NodePatch {
                title: Some("Second draft".into()),
                ..Default::default()
            },
        )
        .unwrap();

    // an editor saves its older buffer over the file
    fs::write(&path, original.replace("title: \"Draft\"", "title: \"Old edit\"")).unwrap();
    assert!(matches!(
        engine.reconcile(&path).unwrap(),
        ReconcileOutcome::Skipped(_)
    ));

    assert_eq!(engine.get_node(&id).unwrap().node.title, "Second draft");
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("title: \"Second draft\"\n"));

    let entries = read_recovery_entries(&vault.root, None);
    let conflict = entries
        .iter()
        .find(|e| e.category == RecoveryCategory::Conflict)
        .expect("conflict entry");
    assert!(conflict.body.contains("Old edit"));
}

#[test]
fn malformed_edits_keep_the_indexed_record() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::task("Keep me")).unwrap().id().to_string();
    let path = file_of(&engine, &id);

    edit_file(&path, "priority: 3", "priority: eleven");
    assert!(matches!(
        engine.reconcile(&path).unwrap(),
        ReconcileOutcome::Skipped(_)
    ));
    assert_eq!(engine.get_node(&id).unwrap().node.title, "Keep me");
    assert!(fs::read_to_string(&path).unwrap().contains("priority: eleven"));

    // fixing the file brings it back in line
    edit_file(&path, "priority: eleven", "priority: 2");
    assert!(matches!(
        engine.reconcile(&path).unwrap(),
        ReconcileOutcome::Updated { .. }
    ));
    assert_eq!(engine.get_node(&id).unwrap().node.priority.value(), 2);
}

#[test]
fn renamed_files_keep_their_identity() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::note("Journal")).unwrap().id().to_string();
    let old = file_of(&engine, &id);
    let new = vault.nodes_dir().join("diary.md");

    fs::rename(&old, &new).unwrap();
    assert_eq!(
        engine.reconcile(&new).unwrap(),
        ReconcileOutcome::Renamed {
            id: id.clone(),
            from: old.clone()
        }
    );
    assert_eq!(engine.reconcile(&old).unwrap(), ReconcileOutcome::Unchanged);
    assert_eq!(file_of(&engine, &id), new);
}

#[test]
fn rescan_picks_up_renames() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let id = engine.create_node(NewNode::note("Journal")).unwrap().id().to_string();
    let old = file_of(&engine, &id);
    let new = vault.nodes_dir().join("a-journal.md");

    fs::rename(&old, &new).unwrap();
    let stats = engine.sync().unwrap();
    assert_eq!((stats.updated, stats.removed), (1, 0));
    assert_eq!(file_of(&engine, &id), new);
}

#[test]
fn children_of_a_removed_parent_become_top_level() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let parent = engine.create_node(NewNode::note("Trip")).unwrap().id().to_string();
    let child = engine
        .create_node(NewNode::task("Pack").with_parent(parent.clone()))
        .unwrap()
        .id()
        .to_string();
    let parent_file = file_of(&engine, &parent);

    fs::remove_file(&parent_file).unwrap();
    engine.reconcile(&parent_file).unwrap();
    assert_eq!(engine.get_node(&child).unwrap().node.parent_id, None);
    assert!(engine.get_tree(None).unwrap().iter().any(|t| t.view.id() == child));

    clock.set(2024, 3, 1, 10, 5);
    let stats = engine.sync().unwrap();
    assert_eq!(stats.updated, 1);
    let text = fs::read_to_string(file_of(&engine, &child)).unwrap();
    assert!(!text.contains("parent_id"));
    assert!(text.contains("updated_at: 2024-03-01T10:05:00Z\n"));
}

#[test]
fn removed_files_leave_dormant_links() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let waiting = engine.create_node(NewNode::task("Deploy")).unwrap().id().to_string();
    let blocker = engine.create_node(NewNode::task("Review")).unwrap().id().to_string();
    engine.add_dependency(&waiting, &blocker).unwrap();
    let blocker_file = file_of(&engine, &blocker);
    let saved = fs::read_to_string(&blocker_file).unwrap();

    fs::remove_file(&blocker_file).unwrap();
    assert_eq!(
        engine.reconcile(&blocker_file).unwrap(),
        ReconcileOutcome::Removed(blocker.clone())
    );
    assert!(engine.get_node(&blocker).unwrap_err().is_not_found());
    assert!(!engine.get_node(&waiting).unwrap().blocked);
    assert!(engine.get_dependencies(&waiting).unwrap().blocked_by.is_empty());
    assert!(engine.links().unwrap().is_empty());

    // the file comes back and the link resumes
    fs::write(&blocker_file, saved).unwrap();
    assert_eq!(
        engine.reconcile(&blocker_file).unwrap(),
        ReconcileOutcome::Created(blocker.clone())
    );
    assert!(engine.get_node(&waiting).unwrap().blocked);
}

#[test]
fn links_to_unknown_nodes_are_dropped() {
    let (_tmp, vault) = new_vault();
    let clock = TestClock::at(2024, 3, 1, 10, 0);
    let engine = open_at(&vault, &clock);
    let path = vault.nodes_dir().join("orphan.md");
    fs::write(
        &path,
        "---\ntitle: Orphan\nblocked_by: [\"no-such-node\"]\n---\n",
    )
    .unwrap();

    let ReconcileOutcome::Created(id) = engine.reconcile(&path).unwrap() else {
        panic!("expected a new node");
    };
    assert!(!engine.get_node(&id).unwrap().blocked);
    assert!(!fs::read_to_string(&path).unwrap().contains("no-such-node"));
}

// ---------------------------------------------------------------------------
// Watching
// ---------------------------------------------------------------------------

fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    cond()
}

#[test]
fn watcher_indexes_files_written_by_other_tools() {
    let (_tmp, vault) = new_vault();
    let engine = Arc::new(SyncEngine::open(vault.clone()).unwrap());
    let handle = engine.start_watching().unwrap();

    let path = vault.nodes_dir().join("from-editor.md");
    // several saves in a row settle into one reconcile
    fs::write(&path, "---\ntitle: First\n---\n").unwrap();
    fs::write(&path, "---\ntitle: From editor\n---\nbody\n").unwrap();

    let found = wait_for(|| {
        engine
            .list_nodes(&ListQuery::default())
            .unwrap()
            .iter()
            .any(|v| v.node.title == "From editor")
    });
    assert!(found, "watcher never indexed the file");
    assert_eq!(engine.list_nodes(&ListQuery::default()).unwrap().len(), 1);

    // removal drops the node
    fs::remove_file(&path).unwrap();
    let gone = wait_for(|| engine.list_nodes(&ListQuery::default()).unwrap().is_empty());
    assert!(gone, "watcher never dropped the removed file");

    handle.stop();
}
