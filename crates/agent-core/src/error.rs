//! The error taxonomy a job's outcome is classified into, and the typed
//! error that crosses the job → broker → IPC boundary.

use std::fmt;

/// One variant per error-handling category. `FilesystemRace` isn't here:
/// a rename race loss is a success path, not an error (see [`crate::publish`]).
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Malformed request or unknown `op`. Translated to CLI exit code 2.
    #[error("usage error: {0}")]
    Usage(String),

    /// Every registry failed on every retry attempt; carries one message
    /// per registry that was tried.
    #[error("resolution failed: {}", join_reasons(.0))]
    Resolution(Vec<String>),

    /// SRI/shasum mismatch or a malformed integrity string.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Path traversal, absolute path, or canonicalization escape in an
    /// archive entry.
    #[error("archive security violation: {0}")]
    ArchiveSecurity(String),

    /// A transient failure during download (connection reset, timeout,
    /// unexpected HTTP status on the tarball fetch itself). Not retried
    /// automatically; a later request re-enters the pipeline.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol violation: bad JSON, truncated line.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The job was cancelled cooperatively because the service is shutting
    /// down; its staging directory has been (or is about to be) removed.
    #[error("cancelled: service is shutting down")]
    Cancelled,
}

fn join_reasons(reasons: &[String]) -> String {
    reasons.join("; ")
}

impl From<reqwest::Error> for CoordinatorError {
    fn from(e: reqwest::Error) -> Self {
        CoordinatorError::TransientIo(e.to_string())
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        CoordinatorError::Protocol(e.to_string())
    }
}

impl CoordinatorError {
    /// The text carried in the wire `error` event's `message` field.
    pub fn wire_message(&self) -> String {
        self.to_string()
    }

    /// The log level §7 assigns to this category: Error for violations and
    /// resolution failure, Warning for recoverable transients.
    pub fn severity(&self) -> Severity {
        match self {
            CoordinatorError::ArchiveSecurity(_) | CoordinatorError::Resolution(_) => Severity::Error,
            CoordinatorError::Integrity(_) | CoordinatorError::Usage(_) | CoordinatorError::Protocol(_) => {
                Severity::Error
            }
            CoordinatorError::TransientIo(_) => Severity::Warning,
            CoordinatorError::Io(_) => Severity::Error,
            CoordinatorError::Cancelled => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}
