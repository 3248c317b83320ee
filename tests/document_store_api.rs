//! Black-box scenarios against `DocumentStore`'s public API only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetch_orchestra::document_store::{DocumentFetchFn, DocumentStore};
use fetch_orchestra::{FetchType, StoreConfig};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("fetch failed")]
struct UserError;

#[derive(Debug, Clone, PartialEq)]
struct NormalizedError(String);

fn config() -> StoreConfig<UserError, NormalizedError> {
  StoreConfig::new(|err| NormalizedError(err.to_string()))
}

#[tokio::test(start_paused = true)]
async fn overfetching_collapses_to_a_single_network_call() {
  let calls = Arc::new(AtomicU32::new(0));
  let calls_writer = Arc::clone(&calls);
  let fetch_fn: DocumentFetchFn<Vec<u32>, UserError> = Arc::new(move || {
    let calls = Arc::clone(&calls_writer);
    Box::pin(async move {
      calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(200)).await;
      Ok(vec![1, 2, 3])
    })
  });

  let store = DocumentStore::new(fetch_fn, config(), None, None);
  for _ in 0..4 {
    store.schedule_fetch(FetchType::HighPriority);
    tokio::time::advance(Duration::from_millis(10)).await;
  }
  tokio::time::advance(Duration::from_millis(500)).await;

  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn await_fetch_returns_data_with_a_stable_reference_across_equal_refetches() {
  let fetch_fn: DocumentFetchFn<Vec<u32>, UserError> = Arc::new(|| Box::pin(async move { Ok(vec![9, 9]) }));
  let store = DocumentStore::new(fetch_fn, config(), None, None);

  let first = store.await_fetch().await.unwrap();
  tokio::time::advance(Duration::from_millis(210)).await;
  store.schedule_fetch(FetchType::HighPriority);
  let second = store.await_fetch().await.unwrap();

  assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test(start_paused = true)]
async fn invalidate_then_mount_schedules_at_the_strengthened_priority() {
  let calls = Arc::new(AtomicU32::new(0));
  let calls_writer = Arc::clone(&calls);
  let fetch_fn: DocumentFetchFn<u32, UserError> = Arc::new(move || {
    let calls = Arc::clone(&calls_writer);
    Box::pin(async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(1)
    })
  });
  let store = DocumentStore::new(fetch_fn, config(), None, None);
  store.await_fetch().await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  store.invalidate_data(FetchType::LowPriority);
  store.invalidate_data(FetchType::HighPriority);
  assert_eq!(store.snapshot().refetch_on_mount, Some(FetchType::HighPriority));

  let _subscription = store.mount(Default::default());
  tokio::time::advance(Duration::from_millis(5)).await;
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}
