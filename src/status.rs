//! Status vocabulary, fetch-type priorities, and schedule results shared by
//! every store built on the orchestrator.

/// A resource's observable lifecycle state (spec §3).
///
/// `Idle` means "never fetched". `Deleted` is the tombstone pseudo-status
/// for a keyed entry that was explicitly removed; it only appears on
/// collection/list-query items, never on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
  Idle,
  Loading,
  Refetching,
  LoadingMore,
  Error,
  Success,
  Deleted,
}

impl Status {
  pub fn is_loading(self) -> bool {
    matches!(self, Status::Loading)
  }

  pub fn is_terminal(self) -> bool {
    matches!(self, Status::Success | Status::Error)
  }
}

/// Fetch priority, totally ordered low → high (spec §3, §4.D).
///
/// `Ord` follows declaration order, matching `fetchTypePriority =
/// { lowPriority: 0, highPriority: 1, realtimeUpdate: 2 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchType {
  LowPriority,
  HighPriority,
  RealtimeUpdate,
}

impl FetchType {
  pub fn priority(self) -> u8 {
    match self {
      FetchType::LowPriority => 0,
      FetchType::HighPriority => 1,
      FetchType::RealtimeUpdate => 2,
    }
  }
}

/// Outcome of a call to `scheduleFetch` (spec §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleResult {
  Started,
  Skipped,
  Scheduled,
  RtScheduled,
}

/// "When the next subscriber mounts, schedule a fetch at this priority."
///
/// `None` is the spec's `false`: no latent refetch request.
pub type RefetchOnMount = Option<FetchType>;

/// Strengthen `current` with `incoming`, per invariant 3: `refetchOnMount`
/// only increases in priority; an incoming priority at or below the
/// current one is a silent no-op. Returns `true` if `current` changed.
pub fn strengthen_refetch_on_mount(current: &mut RefetchOnMount, incoming: FetchType) -> bool {
  let should_set = match current {
    None => true,
    Some(existing) => incoming.priority() > existing.priority(),
  };
  if should_set {
    *current = Some(incoming);
  }
  should_set
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fetch_type_priority_is_totally_ordered() {
    assert!(FetchType::LowPriority < FetchType::HighPriority);
    assert!(FetchType::HighPriority < FetchType::RealtimeUpdate);
  }

  #[test]
  fn strengthen_only_increases() {
    let mut r: RefetchOnMount = None;
    assert!(strengthen_refetch_on_mount(&mut r, FetchType::LowPriority));
    assert_eq!(r, Some(FetchType::LowPriority));

    assert!(strengthen_refetch_on_mount(&mut r, FetchType::HighPriority));
    assert_eq!(r, Some(FetchType::HighPriority));

    // Same-or-lower priority is a no-op.
    assert!(!strengthen_refetch_on_mount(&mut r, FetchType::LowPriority));
    assert_eq!(r, Some(FetchType::HighPriority));
    assert!(!strengthen_refetch_on_mount(&mut r, FetchType::HighPriority));
    assert_eq!(r, Some(FetchType::HighPriority));

    assert!(strengthen_refetch_on_mount(&mut r, FetchType::RealtimeUpdate));
    assert_eq!(r, Some(FetchType::RealtimeUpdate));
  }
}
