//! Cooperative cancellation between pipeline stages.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::{AnalysisError, Stage};

/// A cancellation token that can be shared between a caller and a
/// running analysis.
///
/// Clones share state: cancelling any clone cancels them all. The
/// pipeline only looks at the token between stages, never inside one.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any
    /// clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`AnalysisError::Cancelled`] if cancellation was
    /// requested before `stage` starts.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Cancelled`] naming `stage`.
    pub fn check(&self, stage: Stage) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            log::debug!("cancellation observed before {stage}");
            return Err(AnalysisError::Cancelled { stage });
        }
        Ok(())
    }
}
