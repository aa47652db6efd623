//! Parked wait slots
//!
//! A blocking read parks its process on a [`WaitSlot`] instead of spinning:
//! the scheduler skips a terminal whose foreground process is parked on an
//! unfired latch, and the posting interrupt handler unparks it.

use core::sync::atomic::{AtomicBool, Ordering};

pub struct WaitSlot {
    parked: AtomicBool,
    latch: AtomicBool,
}

impl WaitSlot {
    pub const fn new() -> Self {
        WaitSlot {
            parked: AtomicBool::new(false),
            latch: AtomicBool::new(false),
        }
    }

    /// Fire the latch and unpark the waiter. Handler context.
    pub fn notify(&self) {
        self.latch.store(true, Ordering::SeqCst);
        self.parked.store(false, Ordering::SeqCst);
    }

    /// True while a waiter is parked here with the latch unfired.
    pub fn is_parked(&self) -> bool {
        self.parked.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.latch.store(false, Ordering::SeqCst);
        self.parked.store(false, Ordering::SeqCst);
    }

    /// Force the parked state (scheduler tests).
    #[cfg(not(target_os = "none"))]
    pub fn parked_for_test(&self) {
        self.parked.store(true, Ordering::SeqCst);
    }

    /// Consume the latch if fired.
    pub fn try_take(&self) -> bool {
        self.latch.swap(false, Ordering::SeqCst)
    }

    /// Block until the latch fires. The wait burns no cycles: each pass
    /// parks, sleeps until some interrupt, and re-checks.
    ///
    /// On the host double there is no interrupt source, so an unfired
    /// latch is a test-sequencing bug; fail loudly instead of hanging.
    pub fn wait(&self) {
        loop {
            if self.try_take() {
                self.parked.store(false, Ordering::SeqCst);
                return;
            }
            self.parked.store(true, Ordering::SeqCst);
            #[cfg(not(target_os = "none"))]
            panic!("blocking wait with no pending notification");
            #[cfg(target_os = "none")]
            crate::arch::wait_for_interrupt();
        }
    }
}

impl Default for WaitSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_then_wait_completes() {
        let slot = WaitSlot::new();
        slot.notify();
        assert!(!slot.is_parked());
        slot.wait();
        assert!(!slot.is_parked());
        // The latch was consumed.
        assert!(!slot.try_take());
    }

    #[test]
    #[should_panic(expected = "no pending notification")]
    fn host_wait_without_notify_fails_fast() {
        WaitSlot::new().wait();
    }
}
