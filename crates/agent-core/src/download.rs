//! Streams a resolved tarball to disk while incrementally hashing it, then
//! verifies SRI and/or shasum integrity before handing off to extraction.

use std::path::{Path, PathBuf};

use agent_types::{Event, ResolvedPackage};
use base64::Engine;
use futures_util::StreamExt;
use sha1::Sha1;
use sha2::Sha512;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::error::CoordinatorError;

const CHUNK_LOG_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Downloads `resolved.tarball_url` into `staging/package.tgz`, verifying
/// whichever of `integrity`/`shasum` is present. Returns the tarball path on
/// success; any failure leaves the caller responsible for staging cleanup.
pub async fn download_and_verify(
    http: &reqwest::Client,
    resolved: &ResolvedPackage,
    staging: &Path,
    broker: &Broker,
    key: &str,
    id: &str,
    version: &str,
    shutdown: &CancellationToken,
) -> Result<PathBuf, CoordinatorError> {
    let tar_path = staging.join("package.tgz");

    let response = http.get(&resolved.tarball_url).send().await?;
    if !response.status().is_success() {
        return Err(CoordinatorError::TransientIo(format!(
            "HTTP {} fetching tarball from {}",
            response.status(),
            resolved.tarball_url
        )));
    }

    let total = response.content_length();
    broker.publish(
        key,
        Event::Progress {
            id: id.to_string(),
            version: version.to_string(),
            message: match total {
                Some(bytes) => format!("downloading ({bytes} bytes)"),
                None => "downloading".to_string(),
            },
        },
    );

    let wants_sha512 = resolved.integrity.as_deref().is_some_and(|s| s.starts_with("sha512-"));
    let mut sha512 = wants_sha512.then(Sha512::default);
    let mut sha1 = resolved.shasum.is_some().then(Sha1::default);

    let mut file = tokio::fs::File::create(&tar_path).await?;
    let mut written: u64 = 0;
    let mut next_log_at = CHUNK_LOG_THRESHOLD;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        if shutdown.is_cancelled() {
            return Err(CoordinatorError::Cancelled);
        }
        let chunk = chunk.map_err(CoordinatorError::from)?;
        file.write_all(&chunk).await?;
        if let Some(hasher) = sha512.as_mut() {
            use sha2::Digest;
            hasher.update(&chunk);
        }
        if let Some(hasher) = sha1.as_mut() {
            use sha1::Digest;
            hasher.update(&chunk);
        }
        written += chunk.len() as u64;
        if written >= next_log_at {
            broker.publish(
                key,
                Event::Progress {
                    id: id.to_string(),
                    version: version.to_string(),
                    message: format!("downloaded {written} bytes"),
                },
            );
            next_log_at += CHUNK_LOG_THRESHOLD;
        }
    }
    file.flush().await?;
    drop(file);

    verify_integrity(resolved, sha512, sha1)?;

    if resolved.integrity.is_none() && resolved.shasum.is_none() {
        broker.publish(
            key,
            Event::Progress {
                id: id.to_string(),
                version: version.to_string(),
                message: "no integrity metadata provided by registry; proceeding unverified".to_string(),
            },
        );
    }

    Ok(tar_path)
}

fn verify_integrity(
    resolved: &ResolvedPackage,
    sha512: Option<Sha512>,
    sha1: Option<Sha1>,
) -> Result<(), CoordinatorError> {
    use sha1::Digest as _;
    use sha2::Digest as _;

    if let Some(integrity) = &resolved.integrity {
        let Some(expected_b64) = integrity.strip_prefix("sha512-") else {
            // Unrecognized integrity scheme: nothing to verify against.
            return Ok(());
        };
        let expected = base64::engine::general_purpose::STANDARD
            .decode(expected_b64)
            .map_err(|_| CoordinatorError::Integrity("malformed sha512 integrity string".to_string()))?;
        let actual = sha512.expect("sha512 hasher present when integrity is sha512-").finalize();
        if !constant_time_eq(&actual, &expected) {
            return Err(CoordinatorError::Integrity("sha512 integrity mismatch".to_string()));
        }
    }

    if let Some(shasum) = &resolved.shasum {
        let expected = hex::decode(shasum)
            .map_err(|_| CoordinatorError::Integrity("malformed shasum".to_string()))?;
        let actual = sha1.expect("sha1 hasher present when shasum is set").finalize();
        if !constant_time_eq(&actual, &expected) {
            return Err(CoordinatorError::Integrity("shasum mismatch".to_string()));
        }
    }

    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
