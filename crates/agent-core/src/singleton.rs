//! Singleton enforcement via a named OS rendezvous, plus the listener for
//! the service endpoint clients connect to.
//!
//! A lock file would need stale-lock detection (is the PID in it still
//! alive?). A named OS primitive sidesteps that: a domain socket bound at a
//! well-known path is the rendezvous — a bind failure followed by a failed
//! connect means the path is a stale leftover from a crashed process, safe
//! to remove and retry. Unix domain sockets only; a Windows build would need
//! a named-pipe equivalent here.

use std::path::PathBuf;

use tokio::net::UnixListener;

/// Holds both named endpoints for a cache root: the lock (whoever binds it
/// first is the service) and the service listener clients connect to.
pub struct Singleton {
    pub lock_listener: UnixListener,
    pub service_listener: UnixListener,
    lock_path: PathBuf,
    service_path: PathBuf,
}

impl Drop for Singleton {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
        let _ = std::fs::remove_file(&self.service_path);
    }
}

fn endpoint_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.sock"))
}

/// Attempts to become the service for this cache root. Returns `None` if
/// another process already owns the lock endpoint — the caller should
/// proceed as a plain client instead of starting a service loop.
pub async fn try_acquire(service_name: &str, lock_name: &str) -> std::io::Result<Option<Singleton>> {
    let lock_path = endpoint_path(lock_name);
    let Some(lock_listener) = bind_or_reclaim(&lock_path).await? else {
        return Ok(None);
    };

    let service_path = endpoint_path(service_name);
    // A stale service socket from a crashed prior instance of *this* same
    // process would otherwise make every connect to it fail; reclaim it
    // the same way.
    let service_listener = match bind_or_reclaim(&service_path).await? {
        Some(listener) => listener,
        None => {
            let _ = std::fs::remove_file(&lock_path);
            return Ok(None);
        }
    };

    Ok(Some(Singleton { lock_listener, service_listener, lock_path, service_path }))
}

/// Binds `path`. On `AddrInUse`, probes with a connect attempt: a live
/// peer means someone else holds it (returns `None`); a refused connection
/// means the socket file is stale, so it's removed and bind is retried once.
async fn bind_or_reclaim(path: &std::path::Path) -> std::io::Result<Option<UnixListener>> {
    match UnixListener::bind(path) {
        Ok(listener) => Ok(Some(listener)),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            if tokio::net::UnixStream::connect(path).await.is_ok() {
                return Ok(None);
            }
            let _ = std::fs::remove_file(path);
            match UnixListener::bind(path) {
                Ok(listener) => Ok(Some(listener)),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Connects to an already-running service, for the client side of `ensure`.
/// Distinguishes "nothing is listening yet" from other connect failures so
/// the CLI knows whether to spawn an agent process.
pub async fn connect(service_name: &str) -> std::io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(endpoint_path(service_name)).await
}
