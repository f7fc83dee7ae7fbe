//! Reward-spec-to-context-vector compilation and caching (§4.3 / C3).

mod engine;
mod mixing;

pub use engine::{
    ContextBackend, ContextEngine, ContextError, SnapshotSource, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE,
    MIN_BATCH_SIZE,
};
pub use mixing::{linear, normalized, slerp, SLERP_DEGENERATE_THRESHOLD};
