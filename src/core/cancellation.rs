use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A cheap, clonable flag used to abandon queued work.
///
/// Every clone observes the same flag. Cancelling is one-way: once set, a token
/// never becomes un-cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled.
    ///
    /// # Returns
    /// `true` if this call flipped the flag, `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
