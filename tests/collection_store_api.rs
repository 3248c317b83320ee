//! Black-box scenarios against `CollectionStore`'s public API only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetch_orchestra::collection_store::{CollectionFetchFn, CollectionStore, ItemSlot};
use fetch_orchestra::{FetchType, ScheduleResult, Status, StoreConfig};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("fetch failed")]
struct UserError;

#[derive(Debug, Clone, PartialEq)]
struct NormalizedError(String);

fn config() -> StoreConfig<UserError, NormalizedError> {
  StoreConfig::new(|err| NormalizedError(err.to_string()))
}

fn echo_fetch_fn() -> CollectionFetchFn<String, String, UserError> {
  Arc::new(|payload: String| Box::pin(async move { Ok(format!("loaded-{payload}")) }))
}

#[tokio::test(start_paused = true)]
async fn each_key_fetches_and_resolves_independently() {
  let store = CollectionStore::new(echo_fetch_fn(), config(), None, None, None);

  let a = store.await_fetch("a".to_string()).await.unwrap();
  let b = store.await_fetch("b".to_string()).await.unwrap();

  assert_eq!(*a, "loaded-a");
  assert_eq!(*b, "loaded-b");
}

#[tokio::test(start_paused = true)]
async fn a_mutation_aborts_every_in_flight_key_then_flushes_on_end() {
  let started = Arc::new(AtomicU32::new(0));
  let started_writer = Arc::clone(&started);
  let fetch_fn: CollectionFetchFn<String, String, UserError> = Arc::new(move |payload: String| {
    started_writer.fetch_add(1, Ordering::SeqCst);
    Box::pin(async move {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok(payload)
    })
  });
  let store = CollectionStore::new(fetch_fn, config(), None, None, None);
  store.schedule_fetch("a".to_string(), FetchType::HighPriority);
  store.schedule_fetch("b".to_string(), FetchType::HighPriority);
  tokio::time::advance(Duration::from_millis(10)).await;

  let mutation = store.start_mutation();
  tokio::time::advance(Duration::from_millis(100)).await;

  match store.get_item_state(&"a".to_string()) {
    ItemSlot::Present(item) => assert!(item.data.is_none(), "aborted fetch must not commit"),
    _ => panic!("expected a present-but-uncommitted slot"),
  }

  let queued = store.schedule_fetch("a".to_string(), FetchType::HighPriority);
  assert_eq!(queued, ScheduleResult::Scheduled);

  mutation.end();
  tokio::time::advance(Duration::from_millis(110)).await;
  assert_eq!(started.load(Ordering::SeqCst), 3);
  match store.get_item_state(&"a".to_string()) {
    ItemSlot::Present(item) => assert_eq!(*item.data.unwrap(), "a"),
    _ => panic!("expected a resolved slot after flush"),
  }
}

#[tokio::test(start_paused = true)]
async fn deleted_items_stay_tombstoned_until_re_added() {
  let store = CollectionStore::new(echo_fetch_fn(), config(), None, None, None);
  store.add_item_to_state("a".to_string(), "seed".to_string());
  store.delete_item_state(&"a".to_string());

  assert!(matches!(store.get_item_state(&"a".to_string()), ItemSlot::Deleted));
  let selected = store.select_item(&"a".to_string(), Default::default());
  assert_eq!(selected.status, Status::Deleted);

  store.add_item_to_state("a".to_string(), "revived".to_string());
  match store.get_item_state(&"a".to_string()) {
    ItemSlot::Present(item) => assert_eq!(*item.data.unwrap(), "revived"),
    _ => panic!("expected the tombstone to be replaced"),
  }
}
