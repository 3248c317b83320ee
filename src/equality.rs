//! Reference stability (spec §4.J, invariant 6).
//!
//! When a freshly fetched value deep-equals the value already sitting in a
//! slot, the prior `Arc` is reused instead of the new one, so that
//! subscribers comparing by pointer (or by a selector's `Arc::ptr_eq`
//! shortcut) don't see spurious churn.

use std::sync::Arc;

/// `prev == None` -> wrap `current`. Otherwise, if `prev` and `current` are
/// equal by `PartialEq`, return `prev` unchanged (same `Arc`, same
/// pointer); if they differ, return `current` wrapped fresh.
pub fn reuse_prev_if_equal<T: PartialEq>(prev: Option<&Arc<T>>, current: T) -> Arc<T> {
  match prev {
    None => Arc::new(current),
    Some(prev) if prev.as_ref() == &current => Arc::clone(prev),
    Some(_) => Arc::new(current),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn no_prior_value_wraps_current() {
    let result = reuse_prev_if_equal::<i32>(None, 5);
    assert_eq!(*result, 5);
  }

  #[test]
  fn equal_values_reuse_prior_reference() {
    let prev = Arc::new(vec![1, 2, 3]);
    let result = reuse_prev_if_equal(Some(&prev), vec![1, 2, 3]);
    assert!(Arc::ptr_eq(&prev, &result));
  }

  #[test]
  fn differing_values_return_a_fresh_reference() {
    let prev = Arc::new(vec![1, 2, 3]);
    let result = reuse_prev_if_equal(Some(&prev), vec![9]);
    assert!(!Arc::ptr_eq(&prev, &result));
    assert_eq!(*result, vec![9]);
  }
}
