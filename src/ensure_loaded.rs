//! The `ensureIsLoaded` latch (spec §4.H).
//!
//! Used by every store's subscription type: if enabled, the first
//! observation forces a `highPriority` fetch and presents `Loading` until
//! the underlying status reaches a terminal state (`Success`/`Error`),
//! after which the latch releases and every subsequent observation
//! passes the real status through.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::status::Status;

pub struct EnsureLoaded {
  enabled: bool,
  satisfied: AtomicBool,
}

impl EnsureLoaded {
  pub fn new(enabled: bool) -> Self {
    Self {
      enabled,
      satisfied: AtomicBool::new(!enabled),
    }
  }

  /// True on the very first call if the latch is enabled and still
  /// unsatisfied: the caller should force a `highPriority` schedule.
  pub fn should_force_fetch(&self) -> bool {
    self.enabled && !self.satisfied.load(Ordering::Acquire)
  }

  /// Present `status` to the subscriber, honoring the latch: while
  /// latched, always reports `Loading` (`is_loading = true`) regardless
  /// of the underlying status, and releases once the underlying status
  /// becomes terminal.
  pub fn present(&self, status: Status) -> (Status, bool) {
    if self.enabled && !self.satisfied.load(Ordering::Acquire) {
      if status.is_terminal() {
        self.satisfied.store(true, Ordering::Release);
        return (status, false);
      }
      return (Status::Loading, true);
    }
    (status, status.is_loading())
  }
}
