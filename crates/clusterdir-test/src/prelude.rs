//! Prelude module - commonly used test helpers.

pub use crate::fixtures::{
    CAPABILITY_ADMIN, CLUSTER_EDITOR, ROOT_SEED, TEST_EPOCH, TestAuthority,
    seeded_capability_store, test_authority, test_clock, test_keypair, test_principal,
};
pub use crate::harness::{TestContext, init_test_logging, setup_test_logging};
