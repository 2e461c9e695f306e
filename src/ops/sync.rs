//! The sync engine keeps the in-memory index and the vault's node files
//! consistent in both directions.
//!
//! API mutations update the index, write the node's file and propagate
//! derived values over the affected set. Filesystem changes (from the watch
//! loop or a rescan) go through `reconcile`, which diffs the file against the
//! indexed record. Files the engine wrote itself are recognized by their
//! SHA-256 fingerprint and ignored.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::io::config_io::save_offset;
use crate::io::debounce::run_debounce_loop;
use crate::io::events::{StatusEvent, record_status_change};
use crate::io::recovery::{
    RecoveryCategory, RecoveryEntry, atomic_write, log_parse_failure, log_recovery, log_write_failure,
};
use crate::io::vault_io::{VaultError, archive_file, list_node_files, slugify};
use crate::io::watcher::NodeWatcher;
use crate::model::node::{NewNode, Node, NodePatch, NodeStatus};
use crate::model::time::TzOffset;
use crate::model::vault::Vault;
use crate::model::view::{NodeView, PriorityBucket};
use crate::ops::deps::{DependencyGraph, GraphError};
use crate::ops::due::{DueCache, propagate_due, rollover_target};
use crate::ops::priority::{ScoreCache, evaluate_priorities};
use crate::ops::propagate::{affected_closure, seeds_for};
use crate::ops::store::{DeleteMode, NodeStore, StoreError};
use crate::parse::{parse_node, serialize_node};

/// Source of "now"; injectable so tests can move time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type Fingerprint = [u8; 32];

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error("timezone offset out of range: {0} minutes (max ±{max})", max = TzOffset::MAX_MINUTES)]
    InvalidOffset(i32),
    #[error("could not write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("could not watch vault: {0}")]
    Watch(#[from] notify::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("node index lock poisoned")]
    Poisoned,
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Store(StoreError::NotFound(_)))
    }

    pub fn is_cycle(&self) -> bool {
        matches!(
            self,
            SyncError::Store(StoreError::Cycle { .. }) | SyncError::Graph(GraphError::Cycle { .. })
        )
    }
}

/// What reconciling one file did to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Content matches what was last read
    Unchanged,
    /// Content matches what the engine last wrote
    SelfWrite,
    Created(String),
    Updated { id: String, fields: Vec<&'static str> },
    /// The file vanished and its row was dropped
    Removed(String),
    Skipped(String),
    /// A known node showed up under a new path
    Renamed { id: String, from: PathBuf },
}

/// Counters from a full rescan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl SyncStats {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Created(_) => self.created += 1,
            ReconcileOutcome::Updated { .. } | ReconcileOutcome::Renamed { .. } => self.updated += 1,
            ReconcileOutcome::Removed(_) => self.removed += 1,
            ReconcileOutcome::Skipped(_) => self.skipped += 1,
            ReconcileOutcome::Unchanged | ReconcileOutcome::SelfWrite => {}
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    /// Deleted ids, deepest first
    pub removed: Vec<String>,
    /// Where the deleted files went
    pub archived: Vec<PathBuf>,
    pub reparented: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Written,
    Read,
}

/// Everything guarded by the engine's lock
#[derive(Debug, Default)]
pub(crate) struct Index {
    pub(crate) store: NodeStore,
    pub(crate) graph: DependencyGraph,
    /// id -> current file
    pub(crate) files: HashMap<String, PathBuf>,
    paths: HashMap<PathBuf, String>,
    fingerprints: HashMap<PathBuf, (Fingerprint, Origin)>,
    pub(crate) due: DueCache,
    pub(crate) scores: ScoreCache,
    evaluated_at: Option<DateTime<Utc>>,
    pub(crate) offset: TzOffset,
    /// Earliest chore due date seen by evaluation
    next_rollover: Option<NaiveDateTime>,
}

impl Index {
    fn track(&mut self, id: &str, path: PathBuf) {
        if let Some(old) = self.files.insert(id.to_string(), path.clone())
            && old != path
        {
            self.paths.remove(&old);
            self.fingerprints.remove(&old);
        }
        self.paths.insert(path, id.to_string());
    }

    fn forget(&mut self, id: &str) {
        self.store.remove(id);
        if let Some(path) = self.files.remove(id) {
            self.paths.remove(&path);
            self.fingerprints.remove(&path);
        }
        self.due.remove(id);
        self.scores.remove(id);
    }

    pub(crate) fn view(&self, id: &str) -> Option<NodeView> {
        let node = self.store.get(id)?;
        let score = self.scores.get(id).copied().unwrap_or_default();
        let mut shown = node.clone();
        // a parent that is not indexed reads as none until it comes back
        if shown.parent_id.as_deref().is_some_and(|p| !self.store.contains(p)) {
            shown.parent_id = None;
        }
        Some(NodeView {
            node: shown,
            computed_priority: score.computed,
            bucket: if node.is_chore() {
                PriorityBucket::Chore
            } else {
                PriorityBucket::Ranked
            },
            effective_due: self.due.get(id).map_or(node.due_date, |d| d.effective),
            blocked: score.blocked,
            children_count: self.store.child_ids(id).len(),
            file_path: self.files.get(id).cloned(),
        })
    }
}

/// Result of applying one file, before its links and write-back are settled
struct Applied {
    outcome: ReconcileOutcome,
    seeds: Vec<String>,
    /// Node id and the `blocked_by` list read from its file
    links: Option<(String, Vec<String>)>,
    rewrite: bool,
    read: Option<(PathBuf, Fingerprint)>,
    /// Node whose tags should be pushed down its subtree once links settle
    inherit: Option<String>,
}

impl Applied {
    fn new(outcome: ReconcileOutcome) -> Self {
        Applied {
            outcome,
            seeds: Vec::new(),
            links: None,
            rewrite: false,
            read: None,
            inherit: None,
        }
    }
}

pub struct SyncEngine {
    vault: Vault,
    pub(crate) index: RwLock<Index>,
    clock: Clock,
    opened_with: SyncStats,
}

impl SyncEngine {
    /// Index the vault's node files.
    pub fn open(vault: Vault) -> Result<Self, SyncError> {
        let clock: Clock = Arc::new(Utc::now);
        Self::with_clock(vault, clock)
    }

    pub fn with_clock(vault: Vault, clock: Clock) -> Result<Self, SyncError> {
        let index = Index {
            offset: vault.offset(),
            ..Default::default()
        };
        let mut engine = SyncEngine {
            vault,
            index: RwLock::new(index),
            clock,
            opened_with: SyncStats::default(),
        };
        engine.opened_with = engine.sync()?;
        tracing::debug!(
            created = engine.opened_with.created,
            skipped = engine.opened_with.skipped,
            "vault indexed"
        );
        Ok(engine)
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Counters from the scan that built the index
    pub fn initial_scan(&self) -> SyncStats {
        self.opened_with
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub(crate) fn write_index(&self) -> Result<RwLockWriteGuard<'_, Index>, SyncError> {
        self.index.write().map_err(|_| SyncError::Poisoned)
    }

    /// Read access, re-evaluating derived values first when they are stale.
    pub(crate) fn read_index(&self) -> Result<RwLockReadGuard<'_, Index>, SyncError> {
        {
            let index = self.index.read().map_err(|_| SyncError::Poisoned)?;
            if !self.needs_refresh(&index) {
                return Ok(index);
            }
        }
        {
            let mut index = self.write_index()?;
            if self.needs_refresh(&index) {
                self.evaluate_all(&mut index);
            }
        }
        self.index.read().map_err(|_| SyncError::Poisoned)
    }

    fn needs_refresh(&self, index: &Index) -> bool {
        let now = self.now();
        let max_age = chrono::Duration::seconds(self.vault.config.sync.refresh_secs as i64);
        let aged = index.evaluated_at.is_none_or(|at| now - at >= max_age);
        let local = index.offset.local(now);
        aged || index
            .next_rollover
            .is_some_and(|due| rollover_target(Some(due), local).is_some())
    }

    // -----------------------------------------------------------------------
    // API mutations
    // -----------------------------------------------------------------------

    pub fn create_node(&self, fields: NewNode) -> Result<NodeView, SyncError> {
        let mut index = self.write_index()?;
        let node = index.store.create(fields, self.now())?;
        if let Err(e) = self.write_node(&mut index, &node.id) {
            index.forget(&node.id);
            return Err(e);
        }
        let seeds = seeds_for(&index.graph, &node.id);
        self.propagate(&mut index, seeds);
        tracing::debug!(id = %node.id, title = %node.title, "node created");
        view_of(&index, &node.id)
    }

    pub fn update_node(&self, id: &str, patch: &NodePatch) -> Result<NodeView, SyncError> {
        let mut index = self.write_index()?;
        let previous = index.store.require(id)?.clone();
        index.store.update(id, patch, self.now())?;
        if let Err(e) = self.write_node(&mut index, id) {
            index.store.replace(previous)?;
            return Err(e);
        }
        let status = index.store.require(id)?.status;
        if status != previous.status {
            self.log_status(id, previous.status, status);
        }
        if patch.tags.is_some() || patch.parent_id.is_some() {
            self.push_tags_down(&mut index, id);
        }
        let mut seeds = seeds_for(&index.graph, id);
        if patch.parent_id.is_some()
            && let Some(old_parent) = previous.parent_id
        {
            seeds.push(old_parent);
        }
        self.propagate(&mut index, seeds);
        view_of(&index, id)
    }

    /// Re-parent a node; `None` makes it a root.
    pub fn move_node(&self, id: &str, new_parent: Option<&str>) -> Result<NodeView, SyncError> {
        let patch = NodePatch {
            parent_id: Some(new_parent.map(str::to_string)),
            ..Default::default()
        };
        self.update_node(id, &patch)
    }

    /// Delete a node (and its subtree, unless reparenting), archiving each
    /// removed file. Links touching removed nodes are dropped.
    ///
    /// Files are archived before the index changes. If one cannot be moved,
    /// the files already archived are put back and the index is left as it
    /// was.
    pub fn delete_node(&self, id: &str, mode: DeleteMode) -> Result<DeleteReport, SyncError> {
        let mut index = self.write_index()?;
        let now = self.now();
        let parent = index.store.require(id)?.parent_id.clone();
        let doomed: Vec<String> = match mode {
            DeleteMode::Recursive => {
                let mut ids = index.store.descendants(id);
                ids.reverse();
                ids.push(id.to_string());
                ids
            }
            DeleteMode::Reparent => vec![id.to_string()],
        };

        let mut report = DeleteReport::default();
        let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
        let archive_dir = self.vault.archive_dir();
        for victim in &doomed {
            let Some(path) = index.files.get(victim).filter(|p| p.exists()).cloned() else {
                continue;
            };
            match archive_file(&path, &archive_dir) {
                Ok(target) => moved.push((path, target)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not archive node file");
                    let text = fs::read_to_string(&path).unwrap_or_default();
                    log_recovery(
                        &self.vault.root,
                        RecoveryEntry::new(RecoveryCategory::Archive, "archive failed; node kept")
                            .field("Source", path.display())
                            .field("Error", &e)
                            .body(text),
                    );
                    restore_archived(&moved);
                    return Err(e.into());
                }
            }
        }

        let outcome = index.store.delete(id, mode, now)?;
        let mut seeds: Vec<String> = parent.into_iter().collect();
        let mut rewrite: IndexSet<String> = outcome.reparented.iter().cloned().collect();
        for node in &outcome.removed {
            for link in index.graph.remove_node(&node.id) {
                if link.source_id != node.id {
                    rewrite.insert(link.source_id.clone());
                    seeds.push(link.source_id);
                } else {
                    seeds.push(link.target_id);
                }
            }
            index.forget(&node.id);
            report.removed.push(node.id.clone());
        }
        for (from, to) in moved {
            tracing::info!(from = %from.display(), to = %to.display(), "node archived");
            report.archived.push(to);
        }

        rewrite.retain(|id| index.store.contains(id));
        for id in &rewrite {
            // failures are logged and isolated to that file
            let _ = self.write_node(&mut index, id);
        }
        seeds.extend(rewrite);
        self.propagate(&mut index, seeds);
        report.reparented = outcome.reparented;
        Ok(report)
    }

    /// Record that `source` is blocked by `target`. Returns false if the link
    /// already existed.
    pub fn add_dependency(&self, source: &str, target: &str) -> Result<bool, SyncError> {
        let mut index = self.write_index()?;
        let previous = index.store.require(source)?.clone();
        index.store.require(target)?;
        if !index.graph.add_link(source, target)? {
            return Ok(false);
        }
        index.store.update(source, &NodePatch::default(), self.now())?;
        if let Err(e) = self.write_node(&mut index, source) {
            index.graph.remove_link(source, target);
            index.store.replace(previous)?;
            return Err(e);
        }
        self.propagate(&mut index, vec![source.to_string(), target.to_string()]);
        Ok(true)
    }

    /// Drop a link. Returns false if there was none.
    pub fn remove_dependency(&self, source: &str, target: &str) -> Result<bool, SyncError> {
        let mut index = self.write_index()?;
        let previous = index.store.require(source)?.clone();
        if !index.graph.remove_link(source, target) {
            return Ok(false);
        }
        index.store.update(source, &NodePatch::default(), self.now())?;
        if let Err(e) = self.write_node(&mut index, source) {
            // re-adding a link that was just removed cannot close a cycle
            let _ = index.graph.add_link(source, target);
            index.store.replace(previous)?;
            return Err(e);
        }
        self.propagate(&mut index, vec![source.to_string(), target.to_string()]);
        Ok(true)
    }

    /// Persist a new offset and re-evaluate everything under it.
    pub fn set_timezone_offset(&self, minutes: i32) -> Result<(), SyncError> {
        let offset = TzOffset::from_minutes(minutes).ok_or(SyncError::InvalidOffset(minutes))?;
        let mut index = self.write_index()?;
        save_offset(&self.vault.root, minutes)?;
        index.offset = offset;
        self.evaluate_all(&mut index);
        tracing::info!(minutes, "timezone offset updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Filesystem -> index
    // -----------------------------------------------------------------------

    /// Full rescan of the active directory.
    pub fn sync(&self) -> Result<SyncStats, SyncError> {
        let mut index = self.write_index()?;
        let files = list_node_files(&self.vault.nodes_dir())?;
        let mut stats = SyncStats::default();

        let known: Vec<PathBuf> = index.paths.keys().cloned().collect();
        let mut applied: Vec<Applied> = files.iter().map(|path| self.apply_file(&mut index, path)).collect();

        // Rows whose file disappeared, checked after renames were picked up
        let listed: HashSet<&PathBuf> = files.iter().collect();
        for path in known.iter().filter(|p| !listed.contains(p)) {
            applied.push(self.drop_vanished(&mut index, path));
        }

        // Links are resolved only once every row is in place
        for item in &mut applied {
            self.settle(&mut index, item);
            stats.record(&item.outcome);
        }

        for id in index.store.break_parent_cycles() {
            tracing::warn!(id = %id, "parent cycle in node files; detached node from its parent");
            let _ = self.write_node(&mut index, &id);
        }

        // every file has been read, so a parent still missing is gone for good
        let now = self.now();
        let detach = NodePatch {
            parent_id: Some(None),
            ..Default::default()
        };
        for id in index.store.dangling_parents() {
            tracing::info!(id = %id, "parent no longer exists; node is now top-level");
            if index.store.update(&id, &detach, now).is_ok() {
                let _ = self.write_node(&mut index, &id);
                stats.updated += 1;
            }
        }
        for id in index.store.inherit_all_tags(now) {
            tracing::debug!(id = %id, "inherited parent tags");
            let _ = self.write_node(&mut index, &id);
        }

        self.evaluate_all(&mut index);
        Ok(stats)
    }

    /// Bring the index in line with one file after it changed on disk.
    pub fn reconcile(&self, path: &Path) -> Result<ReconcileOutcome, SyncError> {
        let mut index = self.write_index()?;
        let mut applied = self.apply_file(&mut index, path);
        self.settle(&mut index, &mut applied);
        if let Some(id) = applied.inherit.take() {
            self.push_tags_down(&mut index, &id);
        }
        let seeds = std::mem::take(&mut applied.seeds);
        self.propagate(&mut index, seeds);
        Ok(applied.outcome)
    }

    fn apply_file(&self, index: &mut Index, path: &Path) -> Applied {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return self.drop_vanished(index, path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read node file");
                return Applied::new(ReconcileOutcome::Skipped(format!("unreadable: {}", e)));
            }
        };

        let print = fingerprint(&bytes);
        match index.fingerprints.get(path) {
            Some((p, Origin::Written)) if *p == print => {
                tracing::debug!(path = %path.display(), "ignoring self-write");
                return Applied::new(ReconcileOutcome::SelfWrite);
            }
            Some((p, Origin::Read)) if *p == print => return Applied::new(ReconcileOutcome::Unchanged),
            _ => {}
        }

        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                let lossy = String::from_utf8_lossy(e.as_bytes()).into_owned();
                return self.skip_malformed(index, path, &"file is not valid UTF-8", &lossy, print);
            }
        };
        let parsed = match parse_node(&text) {
            Ok(parsed) => parsed,
            Err(e) => return self.skip_malformed(index, path, &e, &text, print),
        };

        let now = self.now().trunc_subsecs(0);
        let mut rewrite = parsed.needs_completion();
        let mut renamed_from = None;
        let id = match (parsed.id.clone(), index.paths.get(path).cloned()) {
            // the id line was removed; keep the identity this path had
            (None, Some(known)) => known,
            (None, None) => uuid::Uuid::new_v4().to_string(),
            (Some(found), Some(known)) if found != known => {
                tracing::warn!(path = %path.display(), %known, %found, "node id changed on disk; restoring");
                rewrite = true;
                known
            }
            (Some(found), _) => {
                if let Some(other) = index.files.get(&found).cloned()
                    && other != path
                {
                    if other.exists() {
                        tracing::warn!(
                            path = %path.display(),
                            id = %found,
                            indexed = %other.display(),
                            "duplicate node id; skipping file"
                        );
                        index.fingerprints.insert(path.to_path_buf(), (print, Origin::Read));
                        return Applied::new(ReconcileOutcome::Skipped(format!(
                            "duplicate id {} already indexed from {}",
                            found,
                            other.display()
                        )));
                    }
                    renamed_from = Some(other);
                }
                found
            }
        };

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let created_missing = parsed.created_at.is_none();
        let file_updated = parsed.updated_at;
        let (mut node, blocked_by) = parsed.into_node(id.clone(), &stem, now);
        // dormant links resume when a node comes back
        let mut seeds = vec![id.clone()];
        seeds.extend(index.graph.blocking(&id));
        let mut inherit = true;

        let outcome = if let Some(existing) = index.store.get(&id).cloned() {
            if file_updated.is_some_and(|t| t < existing.updated_at) {
                return self.overwrite_stale(index, path, &id, &text);
            }
            if created_missing {
                node.created_at = existing.created_at;
            }
            if let Some(ref parent) = node.parent_id
                && existing.parent_id.as_ref() != Some(parent)
                && index.store.would_cycle(&id, parent)
            {
                tracing::warn!(id = %id, parent = %parent, "parent edit would create a cycle; keeping previous parent");
                node.parent_id = existing.parent_id.clone();
                rewrite = true;
            }

            let diff = NodePatch::diff(&existing, &node);
            let fields = diff.changed_fields();
            inherit = diff.tags.is_some() || diff.parent_id.is_some();
            let status_change = diff.status.map(|to| (existing.status, to));
            let bump = !fields.is_empty() && node.updated_at <= existing.updated_at;
            if fields.is_empty() {
                node.updated_at = node.updated_at.max(existing.updated_at);
            }
            if diff.parent_id.is_some()
                && let Some(old_parent) = existing.parent_id.clone()
            {
                seeds.push(old_parent);
            }

            index.track(&id, path.to_path_buf());
            if let Err(e) = index.store.replace(node) {
                return Applied::new(ReconcileOutcome::Skipped(e.to_string()));
            }
            if bump {
                // the file carries the old timestamp; write the bumped one back
                let _ = index.store.update(&id, &NodePatch::default(), now);
                rewrite = true;
            }
            if let Some((from, to)) = status_change {
                self.log_status(&id, from, to);
            }

            match renamed_from {
                Some(from) => ReconcileOutcome::Renamed { id: id.clone(), from },
                None if fields.is_empty() => ReconcileOutcome::Unchanged,
                None => ReconcileOutcome::Updated {
                    id: id.clone(),
                    fields,
                },
            }
        } else {
            if let Some(ref parent) = node.parent_id
                && parent == &id
            {
                node.parent_id = None;
                rewrite = true;
            }
            if let Err(e) = index.store.insert(node) {
                return Applied::new(ReconcileOutcome::Skipped(e.to_string()));
            }
            index.track(&id, path.to_path_buf());
            if let Some(parent) = index.store.get(&id).and_then(|n| n.parent_id.clone())
                && index.store.would_cycle(&id, &parent)
            {
                tracing::warn!(id = %id, parent = %parent, "new node closes a parent cycle; detaching it");
                let _ = index.store.move_node(&id, None, now);
                rewrite = true;
            }
            ReconcileOutcome::Created(id.clone())
        };

        Applied {
            outcome,
            seeds,
            links: Some((id.clone(), blocked_by)),
            rewrite,
            read: Some((path.to_path_buf(), print)),
            inherit: inherit.then_some(id),
        }
    }

    /// Apply the file's links, then write the node back or remember the
    /// content as read.
    fn settle(&self, index: &mut Index, applied: &mut Applied) {
        let Some((id, targets)) = applied.links.take() else {
            return;
        };
        let touched = self.apply_links(index, &id, &targets);
        if !touched.is_empty() {
            applied.seeds.extend(touched);
            match applied.outcome {
                ReconcileOutcome::Unchanged => {
                    applied.outcome = ReconcileOutcome::Updated {
                        id: id.clone(),
                        fields: vec!["blocked_by"],
                    };
                }
                ReconcileOutcome::Updated { ref mut fields, .. } => fields.push("blocked_by"),
                _ => {}
            }
        }

        if applied.rewrite {
            let _ = self.write_node(index, &id);
        } else if let Some((path, print)) = applied.read.take() {
            index.fingerprints.insert(path, (print, Origin::Read));
        }
    }

    /// Make the graph's blockers for `id` match the file. Unknown ids and
    /// links that would close a cycle are dropped. Returns the ids whose
    /// links changed.
    fn apply_links(&self, index: &mut Index, id: &str, targets: &[String]) -> Vec<String> {
        let mut known = Vec::with_capacity(targets.len());
        for target in targets {
            if index.store.contains(target) {
                known.push(target.clone());
            } else {
                tracing::warn!(node = %id, blocker = %target, "dropping link to unknown node");
            }
        }
        let changes = index.graph.set_blockers(id, &known);
        for (target, err) in &changes.rejected {
            tracing::warn!(node = %id, blocker = %target, error = %err, "dropping link");
        }
        let mut touched = changes.added;
        touched.extend(changes.removed);
        touched
    }

    fn drop_vanished(&self, index: &mut Index, path: &Path) -> Applied {
        let Some(id) = index.paths.get(path).cloned() else {
            return Applied::new(ReconcileOutcome::Unchanged);
        };
        if index.files.get(&id).map(PathBuf::as_path) != Some(path) {
            index.paths.remove(path);
            return Applied::new(ReconcileOutcome::Unchanged);
        }

        let mut seeds: Vec<String> = index
            .store
            .get(&id)
            .and_then(|n| n.parent_id.clone())
            .into_iter()
            .collect();
        seeds.extend(index.graph.blocked_by(&id));
        seeds.extend(index.graph.blocking(&id));
        // incoming links stay so they resume if the file comes back
        index.graph.set_blockers(&id, &[]);
        index.forget(&id);
        tracing::info!(id = %id, path = %path.display(), "node file removed; dropped from index");

        let mut applied = Applied::new(ReconcileOutcome::Removed(id));
        applied.seeds = seeds;
        applied
    }

    fn skip_malformed(
        &self,
        index: &mut Index,
        path: &Path,
        error: &dyn std::fmt::Display,
        text: &str,
        print: Fingerprint,
    ) -> Applied {
        tracing::warn!(path = %path.display(), error = %error, "skipping malformed node file");
        log_parse_failure(&self.vault.root, path, error, text);
        index.fingerprints.insert(path.to_path_buf(), (print, Origin::Read));
        Applied::new(ReconcileOutcome::Skipped(format!("malformed header: {}", error)))
    }

    /// The file is older than the indexed record: keep its text in the
    /// recovery log and put the indexed version back.
    fn overwrite_stale(&self, index: &mut Index, path: &Path, id: &str, text: &str) -> Applied {
        tracing::warn!(path = %path.display(), id = %id, "stale node file; rewriting from index");
        log_recovery(
            &self.vault.root,
            RecoveryEntry::new(RecoveryCategory::Conflict, "stale node file overwritten")
                .field("Source", path.display())
                .field("Node", id)
                .body(text),
        );
        index.track(id, path.to_path_buf());
        let _ = self.write_node(index, id);
        Applied::new(ReconcileOutcome::Skipped("stale edit replaced by the indexed version".to_string()))
    }

    // -----------------------------------------------------------------------
    // Index -> filesystem
    // -----------------------------------------------------------------------

    /// Serialize a node to its file and remember the fingerprint. A failure
    /// is logged with the unwritten content.
    fn write_node(&self, index: &mut Index, id: &str) -> Result<PathBuf, SyncError> {
        let node = index.store.require(id)?;
        let path = match index.files.get(id) {
            Some(path) => path.clone(),
            None => self.fresh_path(index, node),
        };
        let text = serialize_node(node, &index.graph.blocked_by(id));
        if let Err(e) = atomic_write(&path, text.as_bytes()) {
            tracing::warn!(path = %path.display(), error = %e, "node write failed");
            log_write_failure(&self.vault.root, &path, &e, &text);
            return Err(SyncError::Write { path, source: e });
        }
        index
            .fingerprints
            .insert(path.clone(), (fingerprint(text.as_bytes()), Origin::Written));
        index.track(id, path.clone());
        Ok(path)
    }

    fn fresh_path(&self, index: &Index, node: &Node) -> PathBuf {
        let dir = self.vault.nodes_dir();
        let slug = slugify(&node.title);
        let candidate = dir.join(format!("{}.md", slug));
        if !slug.is_empty() && !candidate.exists() && !index.paths.contains_key(&candidate) {
            return candidate;
        }
        let short: String = node.id.chars().take(8).collect();
        let stem = if slug.is_empty() { "node" } else { slug.as_str() };
        dir.join(format!("{}-{}.md", stem, short))
    }

    /// Merge `id`'s tags into its subtree and write back every node that
    /// gained one.
    fn push_tags_down(&self, index: &mut Index, id: &str) {
        for changed in index.store.inherit_tags(id, self.now()) {
            tracing::debug!(id = %changed, "inherited parent tags");
            let _ = self.write_node(index, &changed);
        }
    }

    fn log_status(&self, id: &str, from: NodeStatus, to: NodeStatus) {
        tracing::debug!(id, from = from.as_str(), to = to.as_str(), "status changed");
        let event = StatusEvent {
            node_id: id.to_string(),
            from,
            to,
            occurred_at: self.now().trunc_subsecs(0),
        };
        record_status_change(&self.vault.root, &event);
    }

    // -----------------------------------------------------------------------
    // Derived values
    // -----------------------------------------------------------------------

    /// Recompute derived values for everything `seeds` can reach, rolling
    /// over any chore in that set first.
    fn propagate(&self, index: &mut Index, seeds: Vec<String>) {
        let now = self.now();
        let local = index.offset.local(now);
        let affected = affected_closure(&index.store, &index.graph, seeds);
        self.roll_chores(index, &affected, now, local);
        propagate_due(&index.store, &index.graph, &affected, &mut index.due);
        evaluate_priorities(&index.store, &index.graph, &affected, local, &mut index.scores);
        for id in &affected {
            if let Some(node) = index.store.get(id)
                && node.is_chore()
                && let Some(due) = node.due_date
            {
                index.next_rollover = Some(index.next_rollover.map_or(due, |d| d.min(due)));
            }
        }
    }

    fn evaluate_all(&self, index: &mut Index) {
        let now = self.now();
        let local = index.offset.local(now);
        let all: IndexSet<String> = index.store.ids().cloned().collect();
        self.roll_chores(index, &all, now, local);
        index.due.clear();
        index.scores.clear();
        propagate_due(&index.store, &index.graph, &all, &mut index.due);
        evaluate_priorities(&index.store, &index.graph, &all, local, &mut index.scores);
        index.evaluated_at = Some(now);
        index.next_rollover = index
            .store
            .iter()
            .filter(|n| n.is_chore())
            .filter_map(|n| n.due_date)
            .min();
    }

    /// Move every chore in `ids` whose due date passed (or is missing) to
    /// today 23:59, writing each change back to its file.
    fn roll_chores(&self, index: &mut Index, ids: &IndexSet<String>, now: DateTime<Utc>, local: NaiveDateTime) {
        for id in ids {
            let Some(node) = index.store.get(id) else {
                continue;
            };
            if !node.is_chore() {
                continue;
            }
            let Some(target) = rollover_target(node.due_date, local) else {
                continue;
            };
            let patch = NodePatch {
                due_date: Some(Some(target)),
                ..Default::default()
            };
            if index.store.update(id, &patch, now).is_ok() {
                tracing::debug!(id = %id, due = %target, "chore rolled over");
                let _ = self.write_node(index, id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Watching
    // -----------------------------------------------------------------------

    /// Watch the active directory and reconcile each file once its events
    /// settle for the configured debounce window.
    pub fn start_watching(self: &Arc<Self>) -> Result<WatchHandle, SyncError> {
        let (watcher, rx) = NodeWatcher::start(&self.vault.nodes_dir())?;
        let stop = Arc::new(AtomicBool::new(false));
        let window = Duration::from_millis(self.vault.config.sync.debounce_ms);
        let engine = Arc::clone(self);
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("tasknotes-sync".to_string())
            .spawn(move || {
                run_debounce_loop(rx, window, thread_stop, |path| match engine.reconcile(&path) {
                    Ok(ReconcileOutcome::Unchanged | ReconcileOutcome::SelfWrite) => {}
                    Ok(outcome) => tracing::info!(path = %path.display(), ?outcome, "reconciled"),
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "reconcile failed"),
                });
            })?;

        Ok(WatchHandle {
            watcher: Some(watcher),
            stop,
            thread: Some(thread),
        })
    }
}

/// Keeps the watch loop alive; stops it when dropped.
pub struct WatchHandle {
    watcher: Option<NodeWatcher>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.watcher.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("sync thread panicked");
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Move archived files back to where they were.
fn restore_archived(moved: &[(PathBuf, PathBuf)]) {
    for (original, archived) in moved.iter().rev() {
        if let Err(e) = fs::rename(archived, original) {
            tracing::warn!(from = %archived.display(), to = %original.display(), error = %e, "could not restore archived file");
        }
    }
}

fn view_of(index: &Index, id: &str) -> Result<NodeView, SyncError> {
    index
        .view(id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
}

fn fingerprint(bytes: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}
