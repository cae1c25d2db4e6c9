//! Cache-root normalization, stable pipe-name derivation, and archive path
//! sanitization.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::CoordinatorError;

pub use agent_types::make_key;

/// Expands a leading `~` to `$HOME`, then creates (if missing) and
/// canonicalizes the root. Symlinks are resolved and trailing separators
/// stripped as a side effect of canonicalization.
pub fn normalize(root: &Path) -> std::io::Result<PathBuf> {
    let expanded = expand_home(root);
    std::fs::create_dir_all(&expanded)?;
    std::fs::canonicalize(&expanded)
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    home.join(rest)
}

/// Derives the two IPC endpoint names for a normalized root: the service
/// endpoint and the singleton lock endpoint. Both share the same 12-hex-char
/// digest so the same root always yields the same pair, and distinct roots
/// diverge with overwhelming probability.
pub fn derive_pipe_names(root: &Path, pipe_base: &str) -> (String, String) {
    let digest = Sha256::digest(root.to_string_lossy().as_bytes());
    let hash12: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    let service_name = format!("{pipe_base}-{hash12}");
    let lock_name = format!("{pipe_base}-lock-{hash12}");
    (service_name, lock_name)
}

fn has_windows_drive_prefix(s: &str) -> bool {
    let mut chars = s.chars();
    matches!((chars.next(), chars.next()), (Some(c), Some(':')) if c.is_ascii_alphabetic())
}

/// Resolves an archive entry's path against a canonicalized staging
/// directory, rejecting absolute paths and any path that would escape the
/// staging prefix. The escape check tracks path segments lexically rather
/// than calling `fs::canonicalize` on the destination, since most entries
/// don't exist on disk yet at sanitization time; resolution is still fully
/// component-aware, not a substring check.
pub fn sanitize_archive_path(raw: &str, staging_canon: &Path) -> Result<PathBuf, CoordinatorError> {
    let slashed = raw.replace('\\', "/");
    let trimmed = slashed.trim_start_matches("./");

    if trimmed.starts_with('/') || has_windows_drive_prefix(trimmed) {
        return Err(CoordinatorError::ArchiveSecurity(format!(
            "absolute path in archive entry: {raw}"
        )));
    }

    let mut segments: Vec<std::ffi::OsString> = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(CoordinatorError::ArchiveSecurity(format!(
                        "archive entry escapes staging directory: {raw}"
                    )));
                }
            }
            Component::CurDir => {}
            Component::Normal(segment) => segments.push(segment.to_os_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoordinatorError::ArchiveSecurity(format!(
                    "absolute path in archive entry: {raw}"
                )));
            }
        }
    }

    let mut resolved = staging_canon.to_path_buf();
    for segment in segments {
        resolved.push(segment);
    }

    if !resolved.starts_with(staging_canon) {
        return Err(CoordinatorError::ArchiveSecurity(format!(
            "archive entry escapes staging directory: {raw}"
        )));
    }

    Ok(resolved)
}
