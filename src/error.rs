//! Error taxonomy (spec §7, §10.2).
//!
//! The orchestrator and stores synthesize two cases of their own —
//! `Aborted` and `NotFound` — distinct from whatever error type the
//! caller's `fetchFn` produces. Both are funneled through the caller's
//! `errorNormalizer` into the caller's own error type `E`, so that a
//! store's public API always surfaces `E`, never this crate's internal
//! enum.

use thiserror::Error;

/// Errors synthesized by this crate, before normalization.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
  /// The fetch result was discarded: a newer fetch superseded it, a
  /// mutation was in progress, or the fetch was retroactively aborted.
  #[error("fetch aborted")]
  Aborted,

  /// `await_fetch` completed but no data was ever committed to the slot.
  #[error("not found")]
  NotFound,

  /// An item-orchestrator operation was attempted on a list-query store
  /// that was not configured with a `fetch_item_fn`.
  #[error("No fetchItemFn was provided")]
  MissingItemFetcher,
}

/// Either a user fetch-callback failure or a synthesized orchestration
/// error, prior to normalization into the caller's error type `E`.
#[derive(Debug, Clone, Error)]
pub enum FetchError<UserErr: std::error::Error> {
  #[error(transparent)]
  User(UserErr),
  #[error(transparent)]
  Orchestration(#[from] OrchestrationError),
}

impl<UserErr: std::error::Error> FetchError<UserErr> {
  pub fn user(err: UserErr) -> Self {
    FetchError::User(err)
  }
}

/// A caller-supplied function turning this crate's error taxonomy into the
/// caller's own normalized error type (spec §6's `errorNormalizer`).
pub type ErrorNormalizer<UserErr, E> = dyn Fn(FetchError<UserErr>) -> E + Send + Sync;
