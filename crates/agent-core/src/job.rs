//! Deduplicating job registry: maps `(id, version)` to at-most-one running
//! job, attaching new subscribers to an existing job's event stream.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_types::{make_key, Event};
use rand::Rng;
use tokio::sync::broadcast;

use crate::broker::Broker;

/// Filesystem layout under a cache root: `{root}/packages/{key}` for
/// published packages, `{root}/packages/{key}.tmp-{random}` for staging.
#[derive(Clone)]
pub struct CachePaths {
    pub root: PathBuf,
}

impl CachePaths {
    pub fn new(root: PathBuf) -> Self {
        CachePaths { root }
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn final_dir(&self, key: &str) -> PathBuf {
        self.packages_dir().join(key)
    }

    pub fn new_staging_dir(&self, key: &str) -> PathBuf {
        let suffix: u64 = rand::rng().random();
        self.packages_dir().join(format!("{key}.tmp-{suffix:016x}"))
    }
}

/// What a job runner needs to do its work and report back.
pub struct JobContext {
    pub id: String,
    pub version: String,
    pub key: String,
    pub paths: CachePaths,
    pub broker: Arc<Broker>,
}

pub struct JobRegistry {
    broker: Arc<Broker>,
}

impl JobRegistry {
    pub fn new(broker: Arc<Broker>) -> Self {
        JobRegistry { broker }
    }

    /// The C4 contract: build the key, short-circuit on an existing final
    /// directory, otherwise dedup against any in-flight job and spawn `run`
    /// only for the job's owner.
    pub fn ensure_stream<F, Fut>(
        &self,
        paths: &CachePaths,
        id: &str,
        version: &str,
        run: F,
    ) -> broadcast::Receiver<Event>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let key = make_key(id, version);

        if final_directory_exists(paths, &key) {
            let (receiver, _owner) = self.broker.subscribe(&key);
            let path = paths.final_dir(&key).to_string_lossy().to_string();
            self.broker.publish(
                &key,
                Event::Hit { id: id.to_string(), version: version.to_string(), path: path.clone() },
            );
            self.broker.finish(
                &key,
                Event::Completed { id: id.to_string(), version: version.to_string(), path },
            );
            return receiver;
        }

        let (receiver, is_owner) = self.broker.subscribe(&key);
        if is_owner {
            let ctx = JobContext {
                id: id.to_string(),
                version: version.to_string(),
                key,
                paths: paths.clone(),
                broker: self.broker.clone(),
            };
            tokio::spawn(run(ctx));
        }
        receiver
    }
}

fn final_directory_exists(paths: &CachePaths, key: &str) -> bool {
    paths.final_dir(key).is_dir()
}

/// A job's double-check before downloading: another service instance (a
/// distinct process against the same root) may have published the package
/// meanwhile. Returns the final path if so.
pub fn recheck_final_directory(paths: &CachePaths, key: &str) -> Option<PathBuf> {
    let dir = paths.final_dir(key);
    dir.is_dir().then_some(dir)
}
