//! Integration tests for olmrun against a kind cluster running OLM
//!
//! These tests tell the story of an operator author running a package from
//! a local packagemanifests directory on a real cluster.
//!
//! # Test Organization
//!
//! - `packagemanifests`: install and uninstall of packages in the
//!   AllNamespaces and OwnNamespace modes, and of two packages side by side
//!
//! # Running These Tests
//!
//! These tests are ignored by default because they need a kind cluster and
//! network access to install OLM:
//!
//! ```bash
//! cargo test -p olmrun-lifecycle --test kind -- --ignored --nocapture
//!
//! # Use a specific OLM release or operator image
//! OLMRUN_TEST_OLM_VERSION=v0.28.0 \
//! OLMRUN_TEST_OPERATOR_IMAGE=registry.k8s.io/pause:3.9 \
//!   cargo test -p olmrun-lifecycle --test kind -- --ignored
//! ```

mod helpers;
