//! Black-box scenarios against `ListQueryStore`'s public API only.

use std::sync::Arc;
use std::time::Duration;

use fetch_orchestra::list_query_store::{FetchListFn, ListQueryStore, SyncItemAndQuery};
use fetch_orchestra::{FetchType, ScheduleResult, StoreConfig};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("fetch failed")]
struct UserError;

#[derive(Debug, Clone, PartialEq)]
struct NormalizedError(String);

fn config() -> StoreConfig<UserError, NormalizedError> {
  StoreConfig::new(|err| NormalizedError(err.to_string()))
}

fn paging_fetch_list_fn(total: usize) -> FetchListFn<String, u32, String, UserError> {
  Arc::new(move |_payload: String, size: usize| {
    Box::pin(async move {
      let take = size.min(total);
      let items: Vec<(u32, String)> = (0..take as u32).map(|i| (i, format!("item-{i}"))).collect();
      Ok((items, take < total))
    })
  })
}

#[tokio::test(start_paused = true)]
async fn load_more_asks_for_a_bigger_page_and_keeps_prior_items_in_order() {
  let store = ListQueryStore::new(paging_fetch_list_fn(100), None, config(), 10, None, None);
  let page = store.await_fetch("feed".to_string()).await.unwrap();
  assert_eq!(page.items.len(), 10);
  assert!(page.has_more);

  store.load_more("feed".to_string(), 10);
  tokio::time::advance(Duration::from_millis(5)).await;

  let page = store.query_page(&"feed".to_string()).unwrap();
  assert_eq!(page.items.len(), 20);
  for (i, item) in page.items.iter().enumerate() {
    assert_eq!(**item.as_ref().unwrap(), format!("item-{i}"));
  }
}

#[tokio::test(start_paused = true)]
async fn load_more_is_skipped_once_the_query_reports_no_more_pages() {
  let store = ListQueryStore::new(paging_fetch_list_fn(4), None, config(), 10, None, None);
  store.await_fetch("feed".to_string()).await.unwrap();

  let result = store.load_more("feed".to_string(), 10);
  assert_eq!(result, ScheduleResult::Skipped);
}

#[tokio::test(start_paused = true)]
async fn deleting_an_item_tombstones_it_out_of_every_query_that_held_it() {
  let store = ListQueryStore::new(paging_fetch_list_fn(3), None, config(), 10, None, None);
  store.await_fetch("feed".to_string()).await.unwrap();
  assert!(store.get_item(&1u32).is_some());

  store.delete_item_state(&1u32);

  assert!(store.get_item(&1u32).is_none());
  let page = store.query_page(&"feed".to_string()).unwrap();
  assert_eq!(page.items.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidating_an_item_cascades_to_every_query_it_syncs_with() {
  let sync_item_and_query: SyncItemAndQuery<u32, String> = Arc::new(|item: &u32, query: &String| query == "feed" && *item < 10);
  let store = ListQueryStore::new(paging_fetch_list_fn(3), None, config(), 10, None, Some(sync_item_and_query));
  store.await_fetch("feed".to_string()).await.unwrap();
  tokio::time::advance(Duration::from_millis(210)).await;

  store.invalidate_item(|item| *item == 1, FetchType::HighPriority);

  assert_eq!(store.query_refetch_on_mount(&"feed".to_string()), Some(FetchType::HighPriority));
}
