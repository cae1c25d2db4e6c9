//! Ordered-registry resolution of FHIR IG package manifests.
//!
//! Tries each configured registry base URL in order, stopping at the first
//! one that yields a usable tarball URL. Transport failures, HTTP error
//! statuses, and malformed manifests are all recorded per-registry and the
//! loop continues; only exhausting every registry is a terminal failure.

use agent_retry::RetryConfig;
use agent_types::{Manifest, ResolvedPackage};
use reqwest::header::{ACCEPT, CONTENT_TYPE};

const ACCEPT_HEADER: &str = "application/json, application/octet-stream, application/gzip, */*";

pub struct RegistryClient {
    http: reqwest::Client,
    registries: Vec<String>,
}

impl RegistryClient {
    pub fn new(http: reqwest::Client, registries: Vec<String>) -> Self {
        RegistryClient { http, registries }
    }

    /// Tries every registry once, in order. Returns the accumulated
    /// per-registry error strings if none succeeded.
    pub async fn resolve_once(&self, id: &str, version: &str) -> Result<ResolvedPackage, Vec<String>> {
        let mut errors = Vec::with_capacity(self.registries.len());
        for base in &self.registries {
            match self.try_registry(base, id, version).await {
                Ok(resolved) => return Ok(resolved),
                Err(e) => errors.push(e),
            }
        }
        Err(errors)
    }

    /// Wraps [`resolve_once`](Self::resolve_once) in the retry schedule from
    /// `agent-retry`: a full pass over every registry counts as one attempt.
    pub async fn resolve(
        &self,
        id: &str,
        version: &str,
        retry: &RetryConfig,
    ) -> Result<ResolvedPackage, Vec<String>> {
        agent_retry::retry_async(retry, |_attempt| self.resolve_once(id, version)).await
    }

    async fn try_registry(&self, base: &str, id: &str, version: &str) -> Result<ResolvedPackage, String> {
        let url = format!("{}/{id}/{version}", base.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| format!("{base}: {e}"))?;

        if resp.status().as_u16() >= 400 {
            return Err(format!("{base}: HTTP {}", resp.status().as_u16()));
        }

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));

        if !is_json {
            // Non-JSON response: the manifest URL itself is the tarball.
            return Ok(ResolvedPackage {
                tarball_url: url,
                origin_registry: base.to_string(),
                integrity: None,
                shasum: None,
            });
        }

        let manifest_url = resp.url().clone();
        let bytes = resp.bytes().await.map_err(|e| format!("{base}: {e}"))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| format!("{base}: malformed manifest ({e})"))?;
        let dist = manifest
            .dist_for(version)
            .ok_or_else(|| format!("{base}: manifest missing dist.tarball"))?;
        let tarball = dist
            .tarball
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("{base}: manifest missing dist.tarball"))?;

        let tarball_url = resolve_tarball_url(&manifest_url, tarball)
            .map_err(|e| format!("{base}: {e}"))?;

        Ok(ResolvedPackage {
            tarball_url,
            origin_registry: base.to_string(),
            integrity: dist.integrity.clone(),
            shasum: dist.shasum.clone(),
        })
    }
}

/// Resolves a manifest's `dist.tarball` against the manifest's own URL.
///
/// Scheme-relative URLs (`//host/path`) are ambiguous about which scheme to
/// inherit; real registries never emit them, so they're treated as a
/// resolution failure rather than guessed at.
fn resolve_tarball_url(manifest_url: &reqwest::Url, tarball: &str) -> Result<String, String> {
    if tarball.starts_with("//") {
        return Err("scheme-relative tarball URL is ambiguous".to_string());
    }
    manifest_url
        .join(tarball)
        .map(|u| u.to_string())
        .map_err(|e| format!("invalid tarball URL: {e}"))
}
