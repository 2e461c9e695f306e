//! Per-file quiet-period debouncing between the watcher and reconciliation.
//!
//! Every event for a path pushes that path's deadline out by the window; a
//! path is released only once it has been quiet for the whole window, so a
//! burst of writes to one file yields a single reconciliation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::io::watcher::FileEvent;

/// Upper bound on a single wait, so a stop request is noticed promptly.
const IDLE_TICK: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event for `path` at `now`, restarting its quiet period.
    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The earliest instant at which some path becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every path whose quiet period has elapsed by `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.pending.remove(path);
        }
        due.sort();
        due
    }

    pub fn take_all(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.pending.drain().map(|(path, _)| path).collect();
        all.sort();
        all
    }
}

/// Drive a debouncer from `rx` until `stop` is set or the sender goes away,
/// calling `on_settled` once per quiet path. Pending paths are flushed when
/// the channel disconnects.
pub fn run_debounce_loop<F>(rx: Receiver<FileEvent>, window: Duration, stop: Arc<AtomicBool>, mut on_settled: F)
where
    F: FnMut(PathBuf),
{
    let mut debouncer = Debouncer::new(window);

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        let wait = debouncer
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .unwrap_or(IDLE_TICK)
            .min(IDLE_TICK);

        match rx.recv_timeout(wait) {
            Ok(FileEvent::Changed(paths)) => {
                let now = Instant::now();
                for path in paths {
                    debouncer.push(path, now);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for path in debouncer.take_all() {
                    on_settled(path);
                }
                return;
            }
        }

        for path in debouncer.take_due(Instant::now()) {
            on_settled(path);
        }
    }
}
