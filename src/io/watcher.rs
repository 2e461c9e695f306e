use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::io::vault_io::is_node_file;

/// Events sent from the file watcher to the debounce loop.
#[derive(Debug)]
pub enum FileEvent {
    /// One or more node files were created, modified or removed.
    Changed(Vec<PathBuf>),
}

/// A filesystem watcher on a vault's active node directory.
/// Watching stops when this is dropped.
pub struct NodeWatcher {
    _watcher: RecommendedWatcher,
}

impl NodeWatcher {
    /// Start watching `nodes_dir`. Relevant events arrive on the returned
    /// receiver; it disconnects once the watcher is dropped.
    pub fn start(nodes_dir: &Path) -> Result<(Self, mpsc::Receiver<FileEvent>), notify::Error> {
        let (tx, rx) = mpsc::channel();
        let dir = nodes_dir.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "watch error");
                        return;
                    }
                };

                match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
                    _ => return,
                }

                let relevant: Vec<PathBuf> = event
                    .paths
                    .into_iter()
                    .filter(|p| is_node_file(&dir, p))
                    .collect();

                if !relevant.is_empty() {
                    let _ = tx.send(FileEvent::Changed(relevant));
                }
            },
            Config::default(),
        )?;

        watcher.watch(nodes_dir, RecursiveMode::NonRecursive)?;
        Ok((NodeWatcher { _watcher: watcher }, rx))
    }
}
