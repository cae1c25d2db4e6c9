//! # agent-core
//!
//! The download coordinator for `fhir-ig-agent`: a per-cache-root background
//! service that deduplicates concurrent requests for FHIR Implementation
//! Guide tarballs, fetches them from ordered registries, verifies integrity,
//! extracts them safely, and publishes the result atomically.
//!
//! ## Pipeline
//!
//! A client request for `(id, version)` flows through:
//!
//! 1. [`key`] normalizes the cache root and forms the package key.
//! 2. [`singleton`] ensures at most one service process owns the root and
//!    listens for client connections.
//! 3. [`job`] deduplicates concurrent requests for the same key, attaching
//!    late subscribers to an in-flight job or a freshly re-checked result.
//! 4. [`agent_registry`] resolves an ordered list of registries to a tarball
//!    URL and optional integrity metadata.
//! 5. [`download`] streams the tarball to a staging directory while hashing
//!    it incrementally, verifying SRI/shasum before extraction.
//! 6. [`archive`] extracts the verified tarball into the staging directory,
//!    rejecting path traversal and skipping link entries.
//! 7. [`publish`] renames the staging directory into place atomically.
//! 8. [`idle`] watches connection/job counters and shuts the service down
//!    once both reach zero, and periodically sweeps abandoned staging dirs.
//!
//! [`broker`] is the fan-out primitive [`job`] and the engine build on: one
//! event stream per in-flight key, delivered to every subscriber.
//!
//! [`engine`] wires all of the above into the two entrypoints the CLI calls:
//! [`engine::run_agent`] (the `--agent` service loop) and
//! [`engine::ensure`] (the client side of `ensure <id> <version>`).

pub mod archive;
pub mod broker;
pub mod config;
pub mod download;
pub mod engine;
pub mod error;
pub mod idle;
pub mod job;
pub mod key;
pub mod logging;
pub mod protocol;
pub mod publish;
pub mod singleton;

#[cfg(test)]
mod property_tests;

#[cfg(test)]
mod stress_tests;
