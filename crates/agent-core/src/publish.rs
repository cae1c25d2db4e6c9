//! Atomic publish: rename a staging directory into its final name, treating
//! a losing race as success rather than failure.

use std::path::{Path, PathBuf};

use crate::error::CoordinatorError;

/// Renames `staging` to `final_dir`. If the rename fails because
/// `final_dir` now exists, a concurrent process published first: the
/// staging directory is deleted and the outcome is still `Ok`, pointing at
/// the winner's directory. Any other failure is fatal.
pub fn publish_atomic(staging: &Path, final_dir: &Path) -> Result<PathBuf, CoordinatorError> {
    match std::fs::rename(staging, final_dir) {
        Ok(()) => Ok(final_dir.to_path_buf()),
        Err(e) if final_dir.is_dir() => {
            let _ = std::fs::remove_dir_all(staging);
            let _ = e;
            Ok(final_dir.to_path_buf())
        }
        Err(e) => Err(CoordinatorError::Io(e)),
    }
}
