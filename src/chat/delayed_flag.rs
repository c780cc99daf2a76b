//! A flag that becomes set a fixed delay after it is armed, unless reset first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Nominal delay before the abort affordance appears.
pub const ABORT_VISIBILITY_DELAY: Duration = Duration::from_millis(1000);

/// A cancellable delayed trigger.
///
/// The timer task is aborted on [`DelayedFlag::reset`] and on drop, so a flag scoped to a turn
/// can never fire after the turn ends.
#[derive(Debug, Default)]
pub struct DelayedFlag {
    flag: Arc<AtomicBool>,
    timer: Option<JoinHandle<()>>,
}

impl DelayedFlag {
    /// Create an unarmed flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the flag to become set after `delay`.  Re-arming restarts the delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, delay: Duration) {
        self.reset();
        let flag = Arc::clone(&self.flag);
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::Release);
        }));
    }

    /// Cancel any pending timer and clear the flag.
    pub fn reset(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.flag.store(false, Ordering::Release);
    }

    /// Has the delay elapsed since the flag was armed?
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Drop for DelayedFlag {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
