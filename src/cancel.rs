//! Cooperative cancellation
//!
//! Nothing is interrupted mid-evaluation. Workers check the token before
//! pulling the next assignment and search strategies check it before each
//! pass, so cancellation latency is bounded by one evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, idempotent cancel flag
///
/// # Example
///
/// ```
/// use strategy_optimizer::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
///
/// assert!(!token.is_cancelled());
/// handle.cancel();
/// handle.cancel(); // idempotent
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; returns `true` only for the call that flipped the flag
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
