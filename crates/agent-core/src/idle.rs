//! Idle-shutdown watchdog and the stale-staging sweeper.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime};

const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const STALE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Tracks the two counters the idle predicate is built from.
#[derive(Default)]
pub struct IdleTracker {
    active_clients: AtomicI64,
    active_jobs: AtomicI64,
}

impl IdleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_connected(&self) {
        self.active_clients.fetch_add(1, Ordering::SeqCst);
    }

    pub fn client_disconnected(&self) {
        self.active_clients.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn job_started(&self) {
        self.active_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn job_finished(&self) {
        self.active_jobs.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_idle(&self) -> bool {
        self.active_clients.load(Ordering::SeqCst) == 0 && self.active_jobs.load(Ordering::SeqCst) == 0
    }
}

/// Blocks until the tracker has reported idle across one full sampling
/// interval, then returns so the caller can shut the service down.
pub async fn wait_until_idle(tracker: &IdleTracker) {
    let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
    interval.tick().await; // first tick fires immediately; wait for a real sample
    loop {
        interval.tick().await;
        if tracker.is_idle() {
            return;
        }
    }
}

/// Removes `packages/` entries whose name matches the staging pattern
/// `{key}.tmp-{random}` and whose age exceeds 24 hours. Per-entry failures
/// are logged and do not abort the sweep.
pub fn sweep_stale_staging(packages_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(packages_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !is_staging_name(&name) {
            continue;
        }
        if !older_than(&entry, STALE_AGE) {
            continue;
        }
        if let Err(e) = std::fs::remove_dir_all(entry.path()) {
            tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove stale staging directory");
        } else {
            tracing::debug!(path = %entry.path().display(), "removed stale staging directory");
        }
    }
}

fn is_staging_name(name: &str) -> bool {
    name.contains(".tmp-")
}

fn older_than(entry: &std::fs::DirEntry, age: Duration) -> bool {
    let Ok(metadata) = entry.metadata() else { return false };
    let created = metadata.created().or_else(|_| metadata.modified());
    match created {
        Ok(time) => SystemTime::now().duration_since(time).map(|elapsed| elapsed > age).unwrap_or(false),
        Err(_) => false,
    }
}

/// Runs the sweep once immediately, then on `SWEEP_INTERVAL` forever.
pub async fn run_sweeper(packages_dir: PathBuf) {
    sweep_stale_staging(&packages_dir);
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    interval.tick().await; // first tick fires immediately; skip the duplicate sweep
    loop {
        interval.tick().await;
        sweep_stale_staging(&packages_dir);
    }
}
