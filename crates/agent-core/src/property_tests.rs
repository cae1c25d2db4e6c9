//! Property tests spanning more than one module's own test suite: invariants
//! that should hold for *any* input, not just the handful of examples each
//! module's unit tests exercise.

use std::path::{Path, PathBuf};

use proptest::prelude::*;

use crate::error::CoordinatorError;
use crate::job::CachePaths;
use crate::key::derive_pipe_names;

proptest! {
    /// Every per-registry reason passed into `Resolution` shows up verbatim
    /// in the message the wire protocol sends to clients.
    #[test]
    fn resolution_error_message_contains_every_reason(
        reasons in proptest::collection::vec("[a-zA-Z0-9 :._-]{1,24}", 1..6)
    ) {
        let err = CoordinatorError::Resolution(reasons.clone());
        let message = err.wire_message();
        for reason in &reasons {
            prop_assert!(message.contains(reason.as_str()));
        }
    }

    /// A freshly minted staging directory always lives directly under
    /// `packages/`, is named after its key, and carries the `.tmp-` marker
    /// the sweeper keys off of.
    #[test]
    fn staging_dir_lives_under_packages_and_carries_its_key(
        key in "[a-z0-9.]{1,12}#[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}"
    ) {
        let paths = CachePaths::new(PathBuf::from("/cache-root"));
        let staging = paths.new_staging_dir(&key);

        prop_assert!(staging.starts_with(paths.packages_dir()));
        let name = staging.file_name().unwrap().to_string_lossy().into_owned();
        prop_assert!(name.starts_with(&format!("{key}.tmp-")));
    }

    /// Two distinct cache roots never collide on either derived endpoint
    /// name, and a root's lock/service names never collide with each other.
    #[test]
    fn derive_pipe_names_is_collision_free_across_roots(
        root_a in "[a-z/]{1,16}",
        root_b in "[a-z/]{1,16}",
        pipe_base in "[a-z-]{3,20}"
    ) {
        prop_assume!(root_a != root_b);
        let (service_a, lock_a) = derive_pipe_names(Path::new(&root_a), &pipe_base);
        let (service_b, lock_b) = derive_pipe_names(Path::new(&root_b), &pipe_base);

        prop_assert_ne!(service_a.clone(), lock_a.clone());
        prop_assert!(service_a.starts_with(&pipe_base));
        prop_assert!(lock_a.starts_with(&pipe_base));
        prop_assert_ne!(service_a, service_b);
    }
}
