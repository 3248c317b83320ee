//! Single-document store (spec §4.E): one orchestrator with a unit
//! parameter type, wrapping a user fetch callback with the status state
//! machine and refetch-on-mount bookkeeping shared by every store.
//!
//! Grounded on `cache/layer.rs::fetch_one` (fetch-with-cached-state for a
//! single entity) combined with `query.rs`'s status transitions.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::config::StoreConfig;
use crate::equality::reuse_prev_if_equal;
use crate::error::{FetchError, OrchestrationError};
use crate::ensure_loaded::EnsureLoaded;
use crate::focus::FocusInvalidatable;
use crate::orchestrator::{FetchContext, FetchOrchestrator};
use crate::status::{strengthen_refetch_on_mount, FetchType, RefetchOnMount, ScheduleResult, Status};

pub type DocumentFetchFuture<T, UserErr> = Pin<Box<dyn Future<Output = Result<T, UserErr>> + Send>>;
pub type DocumentFetchFn<T, UserErr> = Arc<dyn Fn() -> DocumentFetchFuture<T, UserErr> + Send + Sync>;

/// `{ data, error, status, refetchOnMount }` (spec §3).
#[derive(Clone)]
pub struct DocumentState<T, E> {
  pub data: Option<Arc<T>>,
  pub error: Option<E>,
  pub status: Status,
  pub refetch_on_mount: RefetchOnMount,
}

impl<T, E> Default for DocumentState<T, E> {
  fn default() -> Self {
    Self {
      data: None,
      error: None,
      status: Status::Idle,
      refetch_on_mount: Some(FetchType::LowPriority),
    }
  }
}

/// Options recognized by `DocumentStore::mount` (spec §6 subscriber-hook
/// options, document-relevant subset).
#[derive(Default, Clone, Copy)]
pub struct DocumentMountOptions {
  pub disabled: bool,
  pub disable_refetch_on_mount: bool,
  pub ensure_is_loaded: bool,
}

/// What a mounted subscriber observes (`isLoading = status == loading`,
/// spec §6).
pub struct DocumentSnapshot<T, E> {
  pub data: Option<Arc<T>>,
  pub error: Option<E>,
  pub status: Status,
  pub is_loading: bool,
}

pub struct DocumentStore<T, UserErr: std::error::Error, E> {
  orchestrator: Arc<FetchOrchestrator<()>>,
  state: Arc<Mutex<DocumentState<T, E>>>,
  watch_tx: watch::Sender<DocumentState<T, E>>,
  config: StoreConfig<UserErr, E>,
  on_invalidate: Option<Arc<dyn Fn(FetchType) + Send + Sync>>,
}

impl<T, UserErr, E> DocumentStore<T, UserErr, E>
where
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  pub fn new(
    fetch_fn: DocumentFetchFn<T, UserErr>,
    config: StoreConfig<UserErr, E>,
    get_initial_data: Option<Arc<dyn Fn() -> Option<T> + Send + Sync>>,
    on_invalidate: Option<Arc<dyn Fn(FetchType) + Send + Sync>>,
  ) -> Arc<Self> {
    let mut initial = DocumentState::default();
    if let Some(get_initial_data) = &get_initial_data {
      if let Some(data) = get_initial_data() {
        initial.data = Some(Arc::new(data));
        initial.status = Status::Success;
        initial.refetch_on_mount = if config.disable_initial_data_invalidation {
          None
        } else {
          Some(FetchType::LowPriority)
        };
      }
    }

    let state = Arc::new(Mutex::new(initial.clone()));
    let (watch_tx, _rx) = watch::channel(initial);

    let orchestrator_config = config.orchestrator_config();
    let state_for_fetch = Arc::clone(&state);
    let watch_tx_for_fetch = watch_tx.clone();
    let normalizer = Arc::clone(&config.error_normalizer);
    let user_fetch_fn = Arc::clone(&fetch_fn);

    let orchestrator_fetch_fn = Arc::new(move |ctx: FetchContext<()>, _params: ()| {
      let state = Arc::clone(&state_for_fetch);
      let watch_tx = watch_tx_for_fetch.clone();
      let normalizer = Arc::clone(&normalizer);
      let user_fetch_fn = Arc::clone(&user_fetch_fn);
      let fut: Pin<Box<dyn Future<Output = bool> + Send>> = Box::pin(async move {
        {
          let mut st = state.lock().unwrap();
          st.status = if st.status == Status::Success {
            Status::Refetching
          } else {
            Status::Loading
          };
          st.error = None;
          st.refetch_on_mount = None;
          let _ = watch_tx.send(st.clone());
        }

        let result = user_fetch_fn().await;

        if ctx.should_abort() {
          return false;
        }

        match result {
          Ok(data) => {
            let mut st = state.lock().unwrap();
            st.data = Some(reuse_prev_if_equal(st.data.as_ref(), data));
            st.status = Status::Success;
            st.error = None;
            let _ = watch_tx.send(st.clone());
            true
          }
          Err(e) => {
            let mut st = state.lock().unwrap();
            st.status = Status::Error;
            st.error = Some(normalizer(FetchError::user(e)));
            let _ = watch_tx.send(st.clone());
            false
          }
        }
      });
      fut
    });

    let orchestrator = FetchOrchestrator::new(orchestrator_fetch_fn, orchestrator_config);

    Arc::new(Self {
      orchestrator,
      state,
      watch_tx,
      config,
      on_invalidate,
    })
  }

  pub fn schedule_fetch(&self, fetch_type: FetchType) -> ScheduleResult {
    self.orchestrator.schedule_fetch(fetch_type, ())
  }

  /// §4.E `awaitFetch`.
  pub async fn await_fetch(&self) -> Result<Arc<T>, E> {
    let was_aborted = self.orchestrator.await_fetch(()).await;
    if was_aborted {
      return Err(self.config.normalize(FetchError::Orchestration(OrchestrationError::Aborted)));
    }
    let data = self.state.lock().unwrap().data.clone();
    data.ok_or_else(|| self.config.normalize(FetchError::Orchestration(OrchestrationError::NotFound)))
  }

  /// §4.E `invalidateData`, with the spec's default priority
  /// (`highPriority`).
  pub fn invalidate(&self) {
    self.invalidate_data(FetchType::HighPriority);
  }

  pub fn invalidate_data(&self, priority: FetchType) {
    let changed = {
      let mut st = self.state.lock().unwrap();
      let changed = strengthen_refetch_on_mount(&mut st.refetch_on_mount, priority);
      if changed {
        let _ = self.watch_tx.send(st.clone());
      }
      changed
    };
    if changed {
      if let Some(cb) = &self.on_invalidate {
        cb(priority);
      }
    }
  }

  /// §4.E `updateState`: immutable deep update over `data`; a no-op if
  /// `data` is absent.
  pub fn update_state(&self, producer: impl FnOnce(&mut T)) {
    let mut st = self.state.lock().unwrap();
    if let Some(data) = st.data.clone() {
      let mut updated = (*data).clone();
      producer(&mut updated);
      st.data = Some(Arc::new(updated));
      let _ = self.watch_tx.send(st.clone());
    }
  }

  /// §4.E `reset`.
  pub fn reset(&self) {
    self.orchestrator.reset();
    let mut st = self.state.lock().unwrap();
    *st = DocumentState::default();
    let _ = self.watch_tx.send(st.clone());
  }

  pub fn snapshot(&self) -> DocumentState<T, E> {
    self.state.lock().unwrap().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<DocumentState<T, E>> {
    self.watch_tx.subscribe()
  }

  /// §4.E `useDocument(options)`, minus the DOM-level subscription
  /// machinery (out of scope per spec §1): computes and issues the
  /// on-mount schedule, and returns a handle the embedding subscription
  /// primitive drives for the rest of the mounted lifetime.
  pub fn mount(self: &Arc<Self>, options: DocumentMountOptions) -> DocumentSubscription<T, UserErr, E> {
    let ensure_loaded = EnsureLoaded::new(options.ensure_is_loaded);

    if !options.disabled {
      let (current_refetch, status) = {
        let st = self.state.lock().unwrap();
        (st.refetch_on_mount, st.status)
      };
      let should_schedule = if options.disable_refetch_on_mount {
        current_refetch.is_some() || status == Status::Idle
      } else {
        true
      };
      if should_schedule || ensure_loaded.should_force_fetch() {
        let priority = if ensure_loaded.should_force_fetch() {
          FetchType::HighPriority
        } else {
          current_refetch.unwrap_or(FetchType::LowPriority)
        };
        self.orchestrator.schedule_fetch(priority, ());
      }
    }

    DocumentSubscription {
      store: Arc::clone(self),
      ensure_loaded,
      invalidation_was_triggered: AtomicBool::new(false),
    }
  }
}

impl<T, UserErr, E> FocusInvalidatable for DocumentStore<T, UserErr, E>
where
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  fn invalidate_all(&self, priority: FetchType) {
    self.invalidate_data(priority);
  }
}

/// A mounted document subscriber: owns the `ensureIsLoaded` latch and the
/// per-subscription "schedule at most one refetch per invalidation event
/// window" dedup (spec §4.E).
pub struct DocumentSubscription<T, UserErr: std::error::Error, E> {
  store: Arc<DocumentStore<T, UserErr, E>>,
  ensure_loaded: EnsureLoaded,
  invalidation_was_triggered: AtomicBool,
}

impl<T, UserErr, E> DocumentSubscription<T, UserErr, E>
where
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// Call when the embedding subscription primitive observes the store's
  /// `refetch_on_mount` become set (an invalidate-event reschedule).
  /// Schedules at most once per event window.
  pub fn on_invalidation_observed(&self) {
    if self.invalidation_was_triggered.swap(true, Ordering::AcqRel) {
      return;
    }
    let priority = self.store.state.lock().unwrap().refetch_on_mount;
    if let Some(priority) = priority {
      self.store.orchestrator.schedule_fetch(priority, ());
    }
  }

  /// Call when starting to wait for the *next* invalidation event.
  pub fn reset_invalidation_window(&self) {
    self.invalidation_was_triggered.store(false, Ordering::Release);
  }

  pub fn snapshot(&self) -> DocumentSnapshot<T, E> {
    let st = self.store.state.lock().unwrap();
    let (status, is_loading) = self.ensure_loaded.present(st.status);
    DocumentSnapshot {
      data: st.data.clone(),
      error: st.error.clone(),
      status,
      is_loading,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicU32;
  use std::time::Duration;
  use thiserror::Error;

  #[derive(Debug, Clone, Error, PartialEq)]
  #[error("boom")]
  struct UserError;

  #[derive(Debug, Clone, PartialEq)]
  struct NormalizedError(String);

  fn normalizer() -> impl Fn(FetchError<UserError>) -> NormalizedError + Send + Sync + 'static {
    |err: FetchError<UserError>| NormalizedError(err.to_string())
  }

  #[tokio::test(start_paused = true)]
  async fn fetch_success_commits_data_and_reuses_prior_reference() {
    let call_count = Arc::new(AtomicU32::new(0));
    let call_count_writer = Arc::clone(&call_count);
    let fetch_fn: DocumentFetchFn<Vec<i32>, UserError> = Arc::new(move || {
      let call_count = Arc::clone(&call_count_writer);
      Box::pin(async move {
        call_count.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1, 2, 3])
      })
    });

    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), None, None);
    store.schedule_fetch(FetchType::HighPriority);
    tokio::time::advance(Duration::from_millis(5)).await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, Status::Success);
    assert_eq!(*snapshot.data.unwrap(), vec![1, 2, 3]);

    let first_ref = store.snapshot().data.unwrap();
    store.schedule_fetch(FetchType::HighPriority);
    tokio::time::advance(Duration::from_millis(300)).await;
    let second_ref = store.snapshot().data.unwrap();
    assert!(Arc::ptr_eq(&first_ref, &second_ref));
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn fetch_error_is_normalized_and_stored() {
    let fetch_fn: DocumentFetchFn<i32, UserError> = Arc::new(|| Box::pin(async move { Err(UserError) }));
    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), None, None);
    store.schedule_fetch(FetchType::HighPriority);
    tokio::time::advance(Duration::from_millis(5)).await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert!(snapshot.error.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn await_fetch_returns_not_found_when_nothing_committed() {
    let fetch_fn: DocumentFetchFn<i32, UserError> = Arc::new(|| Box::pin(async move { Err(UserError) }));
    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), None, None);
    let result = store.await_fetch().await;
    assert!(result.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn invalidate_data_only_strengthens_priority() {
    let fetch_fn: DocumentFetchFn<i32, UserError> = Arc::new(|| Box::pin(async move { Ok(1) }));
    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), None, None);

    store.invalidate_data(FetchType::HighPriority);
    assert_eq!(store.snapshot().refetch_on_mount, Some(FetchType::HighPriority));

    store.invalidate_data(FetchType::LowPriority);
    assert_eq!(store.snapshot().refetch_on_mount, Some(FetchType::HighPriority));

    store.invalidate_data(FetchType::RealtimeUpdate);
    assert_eq!(store.snapshot().refetch_on_mount, Some(FetchType::RealtimeUpdate));
  }

  #[tokio::test(start_paused = true)]
  async fn ensure_is_loaded_forces_loading_until_terminal() {
    let fetch_fn: DocumentFetchFn<i32, UserError> = Arc::new(|| {
      Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(7)
      })
    });
    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), None, None);
    let subscription = store.mount(DocumentMountOptions {
      ensure_is_loaded: true,
      ..Default::default()
    });

    let snap = subscription.snapshot();
    assert!(snap.is_loading);
    assert_eq!(snap.status, Status::Loading);

    tokio::time::advance(Duration::from_millis(60)).await;
    let snap = subscription.snapshot();
    assert!(!snap.is_loading);
    assert_eq!(snap.status, Status::Success);
  }

  #[tokio::test(start_paused = true)]
  async fn reset_restores_defaults() {
    let fetch_fn: DocumentFetchFn<i32, UserError> = Arc::new(|| Box::pin(async move { Ok(9) }));
    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), None, None);
    store.schedule_fetch(FetchType::HighPriority);
    tokio::time::advance(Duration::from_millis(5)).await;
    assert_eq!(store.snapshot().status, Status::Success);

    store.reset();
    let snap = store.snapshot();
    assert_eq!(snap.status, Status::Idle);
    assert!(snap.data.is_none());
    assert_eq!(snap.refetch_on_mount, Some(FetchType::LowPriority));
  }

  #[tokio::test(start_paused = true)]
  async fn initial_data_seeds_success_and_schedules_low_priority_invalidation() {
    let fetch_fn: DocumentFetchFn<i32, UserError> = Arc::new(|| Box::pin(async move { Ok(99) }));
    let get_initial: Arc<dyn Fn() -> Option<i32> + Send + Sync> = Arc::new(|| Some(1));
    let store = DocumentStore::new(fetch_fn, StoreConfig::new(normalizer()), Some(get_initial), None);
    let snap = store.snapshot();
    assert_eq!(snap.status, Status::Success);
    assert_eq!(*snap.data.unwrap(), 1);
    assert_eq!(snap.refetch_on_mount, Some(FetchType::LowPriority));
  }
}
