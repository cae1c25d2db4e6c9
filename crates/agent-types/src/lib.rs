//! Wire protocol and shared domain types for the download coordinator.
//!
//! Kept dependency-free beyond `serde`/`serde_json` so both the service
//! core and any future library-facing caller can share these shapes without
//! pulling in the coordinator's runtime.

use serde::{Deserialize, Serialize};

/// A `(package-id, version)` pair's canonical cache key: `lower(id)#version`.
///
/// Formation is the only part of key derivation that belongs here; path
/// construction and pipe-name hashing stay in `agent-core` since they need
/// filesystem and crypto primitives this crate doesn't depend on.
pub fn make_key(id: &str, version: &str) -> String {
    format!("{}#{version}", id.to_lowercase())
}

/// The one request shape accepted on a client connection.
///
/// Deserialized permissively (`op` is just a `String`) so an unrecognized
/// value produces the protocol's `"Unknown operation: <op>"` error instead
/// of a generic parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub op: String,
    pub id: String,
    pub version: String,
}

/// A validated `ensure` request, produced after `Request::op` is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureRequest {
    pub id: String,
    pub version: String,
}

impl Request {
    /// Validates `op == "ensure"`, returning the unknown op string on
    /// mismatch so the caller can build the protocol error message.
    pub fn into_ensure(self) -> Result<EnsureRequest, String> {
        if self.op == "ensure" {
            Ok(EnsureRequest { id: self.id, version: self.version })
        } else {
            Err(self.op)
        }
    }
}

/// One line of the service-to-client event stream.
///
/// `Hit`, `Completed`, and `Error` are the only terminal variants; exactly
/// one of them ends every stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Start { id: String, version: String },
    Progress { id: String, version: String, message: String },
    Hit { id: String, version: String, path: String },
    Completed { id: String, version: String, path: String },
    Error { id: String, version: String, message: String },
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Hit { .. } | Event::Completed { .. } | Event::Error { .. })
    }

    pub fn id(&self) -> &str {
        match self {
            Event::Start { id, .. }
            | Event::Progress { id, .. }
            | Event::Hit { id, .. }
            | Event::Completed { id, .. }
            | Event::Error { id, .. } => id,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Event::Start { version, .. }
            | Event::Progress { version, .. }
            | Event::Hit { version, .. }
            | Event::Completed { version, .. }
            | Event::Error { version, .. } => version,
        }
    }
}

/// Output of registry resolution (C5), consumed by the download pipeline (C6).
///
/// Immutable once produced; at most one exists per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub tarball_url: String,
    pub origin_registry: String,
    pub integrity: Option<String>,
    pub shasum: Option<String>,
}

/// `dist` object of a registry manifest response.
#[derive(Debug, Clone, Deserialize)]
pub struct Dist {
    pub tarball: Option<String>,
    pub integrity: Option<String>,
    pub shasum: Option<String>,
}

/// A registry manifest, permissive about where `dist` lives: top-level, or
/// nested under `versions.<version>`.
#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    pub dist: Option<Dist>,
    #[serde(default)]
    pub versions: std::collections::HashMap<String, VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub dist: Option<Dist>,
}

impl Manifest {
    /// Resolves the `dist` object to use: top-level first, else
    /// `versions[version].dist`.
    pub fn dist_for(&self, version: &str) -> Option<&Dist> {
        self.dist.as_ref().or_else(|| self.versions.get(version).and_then(|v| v.dist.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_key_lowercases_id_only() {
        assert_eq!(make_key("HL7.FHIR.US.CORE", "6.1.0"), "hl7.fhir.us.core#6.1.0");
        assert_eq!(make_key("hl7.fhir.us.core", "6.1.0"), "hl7.fhir.us.core#6.1.0");
    }

    #[test]
    fn unknown_op_is_rejected_with_the_literal_op_string() {
        let req = Request { op: "delete".into(), id: "x".into(), version: "1.0.0".into() };
        assert_eq!(req.into_ensure().unwrap_err(), "delete");
    }

    #[test]
    fn request_parses_from_protocol_json() {
        let req: Request =
            serde_json::from_str(r#"{"op":"ensure","id":"hl7.fhir.us.core","version":"6.1.0"}"#)
                .unwrap();
        assert_eq!(req.op, "ensure");
        let ensure = req.into_ensure().unwrap();
        assert_eq!(ensure.id, "hl7.fhir.us.core");
    }

    #[test]
    fn event_json_matches_protocol_shapes() {
        let hit = Event::Hit { id: "a".into(), version: "1".into(), path: "/p".into() };
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["type"], "hit");
        assert_eq!(json["path"], "/p");
        assert!(hit.is_terminal());

        let progress =
            Event::Progress { id: "a".into(), version: "1".into(), message: "downloading".into() };
        assert!(!progress.is_terminal());
    }

    #[test]
    fn manifest_prefers_top_level_dist_over_versioned() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"dist":{"tarball":"https://x/top.tgz"},"versions":{"1.0.0":{"dist":{"tarball":"https://x/nested.tgz"}}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.dist_for("1.0.0").unwrap().tarball.as_deref(), Some("https://x/top.tgz"));
    }

    #[test]
    fn manifest_falls_back_to_versioned_dist() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"versions":{"1.0.0":{"dist":{"tarball":"https://x/nested.tgz"}}}}"#,
        )
        .unwrap();
        assert_eq!(
            manifest.dist_for("1.0.0").unwrap().tarball.as_deref(),
            Some("https://x/nested.tgz")
        );
        assert!(manifest.dist_for("2.0.0").is_none());
    }

    proptest::proptest! {
        #[test]
        fn make_key_is_idempotent_under_repeated_lowercasing(id in "[a-zA-Z.]{1,40}", version in "[0-9.]{1,10}") {
            let once = make_key(&id, &version);
            let twice = make_key(&once.split('#').next().unwrap(), &version);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
