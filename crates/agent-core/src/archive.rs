//! Safe extraction of a gzip-compressed tar archive into a staging
//! directory: path-traversal and absolute-path rejection, symlinks and
//! other non-regular entries skipped silently.

use std::fs;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::error::CoordinatorError;
use crate::key::sanitize_archive_path;

/// Extracts `tar_path` into `staging`. Runs synchronously (the `tar`/`flate2`
/// crates are blocking); callers on an async runtime should wrap this in
/// `spawn_blocking`. Checked cooperatively against `shutdown` between
/// entries, so a service shutdown mid-extraction stops within one entry.
pub fn extract(tar_path: &Path, staging: &Path, shutdown: &CancellationToken) -> Result<(), CoordinatorError> {
    let staging_canon = fs::canonicalize(staging)?;
    let file = fs::File::open(tar_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        if shutdown.is_cancelled() {
            return Err(CoordinatorError::Cancelled);
        }
        let mut entry = entry?;
        let kind = entry.header().entry_type();

        if !(kind.is_dir() || kind.is_file()) {
            // Symlinks, hardlinks, devices, etc: IG packages never need
            // these, and admitting them opens escape paths.
            continue;
        }

        let raw_path = entry.path()?.to_string_lossy().into_owned();
        let dest = sanitize_archive_path(&raw_path, &staging_canon)?;

        if kind.is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&dest)?;
            std::io::copy(&mut entry, &mut out)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn build_tarball(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_regular_files_into_staging() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("key.tmp-abc");
        fs::create_dir_all(&staging).unwrap();
        let tar_path = dir.path().join("package.tgz");
        build_tarball(&tar_path, &[("package/package.json", b"{}")]);

        extract(&tar_path, &staging, &CancellationToken::new()).unwrap();

        let mut contents = String::new();
        use std::io::Read;
        fs::File::open(staging.join("package/package.json"))
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "{}");
    }

    #[test]
    fn rejects_path_traversal_entries() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("key.tmp-abc");
        fs::create_dir_all(&staging).unwrap();
        let tar_path = dir.path().join("package.tgz");
        build_tarball(&tar_path, &[("../../etc/passwd", b"evil")]);

        let err = extract(&tar_path, &staging, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CoordinatorError::ArchiveSecurity(_)));
        assert!(!dir.path().parent().unwrap().join("etc/passwd").exists());
    }

    #[test]
    fn rejects_absolute_path_entries() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("key.tmp-abc");
        fs::create_dir_all(&staging).unwrap();
        let tar_path = dir.path().join("package.tgz");
        build_tarball(&tar_path, &[("/etc/passwd", b"evil")]);

        let err = extract(&tar_path, &staging, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CoordinatorError::ArchiveSecurity(_)));
    }

    #[test]
    fn stops_extracting_once_shutdown_is_cancelled() {
        let dir = tempdir().unwrap();
        let staging = dir.path().join("key.tmp-abc");
        fs::create_dir_all(&staging).unwrap();
        let tar_path = dir.path().join("package.tgz");
        build_tarball(&tar_path, &[("package/a.json", b"{}"), ("package/b.json", b"{}")]);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let err = extract(&tar_path, &staging, &shutdown).unwrap_err();
        assert!(matches!(err, CoordinatorError::Cancelled));
        assert!(!staging.join("package/a.json").exists());
    }
}
