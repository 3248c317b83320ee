//! Focus invalidator (spec §4.I).
//!
//! The DOM/window `focus`/`visibilitychange` integration itself is an
//! out-of-scope external collaborator (spec §1); this module is just the
//! hook those events drive: "on visible/focus, invalidate everything at
//! low priority" for whichever store it's attached to.

use std::sync::Arc;

use crate::status::FetchType;

/// Implemented by each store so `FocusInvalidator` can drive it
/// generically.
pub trait FocusInvalidatable {
  /// Invalidate every tracked resource at the given priority (low, per
  /// the window-focus hook's contract, but exposed generally).
  fn invalidate_all(&self, priority: FetchType);
}

/// Wires a store to the "on focus/visible, invalidate everything at low
/// priority" hook described in spec §4.I.
pub struct FocusInvalidator<S: FocusInvalidatable + ?Sized> {
  target: Arc<S>,
  enabled: bool,
}

impl<S: FocusInvalidatable + ?Sized> FocusInvalidator<S> {
  pub fn new(target: Arc<S>, enabled: bool) -> Self {
    Self { target, enabled }
  }

  /// Call from the embedding application's window `focus`/
  /// `visibilitychange` listener.
  pub fn on_focus_or_visible(&self) {
    if self.enabled {
      self.target.invalidate_all(FetchType::LowPriority);
    }
  }
}
