//! List-query store (spec §4.G): named queries over a shared entity pool,
//! with pagination and optional cross-entity invalidation sync.
//!
//! Grounded on `cache/layer.rs::fetch_incremental` (merge freshly fetched
//! pages into an existing pool), generalized to named queries, a separate
//! item-level orchestrator collection, and the cross-entity sync rules
//! this spec adds on top.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::collection_orchestrator::CollectionOrchestrator;
use crate::config::StoreConfig;
use crate::equality::reuse_prev_if_equal;
use crate::error::{FetchError, OrchestrationError};
use crate::ensure_loaded::EnsureLoaded;
use crate::focus::FocusInvalidatable;
use crate::key::serialize_key;
use crate::orchestrator::{FetchContext, FetchFn};
use crate::status::{strengthen_refetch_on_mount, FetchType, RefetchOnMount, ScheduleResult, Status};

/// Whether a query-level fetch is a first/refetch load or a
/// page-growing `loadMore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryOp {
  Load,
  LoadMore,
}

type QueryFetchParams<QP> = (QueryOp, QP, usize);

pub type FetchListFuture<IP, T, UserErr> = Pin<Box<dyn Future<Output = Result<(Vec<(IP, T)>, bool), UserErr>> + Send>>;
pub type FetchListFn<QP, IP, T, UserErr> = Arc<dyn Fn(QP, usize) -> FetchListFuture<IP, T, UserErr> + Send + Sync>;
pub type FetchItemFuture<T, UserErr> = Pin<Box<dyn Future<Output = Result<T, UserErr>> + Send>>;
pub type FetchItemFn<IP, T, UserErr> = Arc<dyn Fn(IP) -> FetchItemFuture<T, UserErr> + Send + Sync>;
pub type SyncQueries<QP> = Arc<dyn Fn(&QP, &QP) -> bool + Send + Sync>;
pub type SyncItemAndQuery<IP, QP> = Arc<dyn Fn(&IP, &QP) -> bool + Send + Sync>;

struct PoolEntry<T> {
  data: Arc<T>,
}

struct ItemQueryState<IP, E> {
  payload: IP,
  status: Status,
  error: Option<E>,
  was_loaded: bool,
  refetch_on_mount: RefetchOnMount,
}

struct QueryState<QP, E> {
  payload: QP,
  status: Status,
  error: Option<E>,
  has_more: bool,
  was_loaded: bool,
  refetch_on_mount: RefetchOnMount,
  items: Vec<String>,
  size: usize,
}

impl<QP: Clone, E> QueryState<QP, E> {
  fn new(payload: QP) -> Self {
    Self {
      payload,
      status: Status::Idle,
      error: None,
      has_more: true,
      was_loaded: false,
      refetch_on_mount: None,
      items: Vec::new(),
      size: 0,
    }
  }
}

struct ListQueryState<QP, IP, T, E> {
  items: HashMap<String, Option<PoolEntry<T>>>,
  item_queries: HashMap<String, Option<ItemQueryState<IP, E>>>,
  queries: HashMap<String, QueryState<QP, E>>,
}

/// Where a newly added item is spliced into a query's ordered `items`.
#[derive(Clone, Copy)]
pub enum SplicePosition {
  Start,
  End,
  Index(usize),
}

/// A resolved, ordered page: each item's key paired with its resolved
/// pool data (`None` if the key is tombstoned or not yet resolved).
pub struct QueryPage<T, E> {
  pub status: Status,
  pub is_loading: bool,
  pub error: Option<E>,
  pub has_more: bool,
  pub items: Vec<Option<Arc<T>>>,
}

pub struct ListQueryStore<QP, IP, T, UserErr: std::error::Error, E> {
  fetch_list_fn: FetchListFn<QP, IP, T, UserErr>,
  fetch_item_fn: Option<FetchItemFn<IP, T, UserErr>>,
  query_orchestrators: Arc<CollectionOrchestrator<QueryFetchParams<QP>>>,
  item_orchestrators: Option<Arc<CollectionOrchestrator<IP>>>,
  state: Arc<Mutex<ListQueryState<QP, IP, T, E>>>,
  watch_tx: watch::Sender<u64>,
  config: StoreConfig<UserErr, E>,
  default_query_size: usize,
  sync_queries: Option<SyncQueries<QP>>,
  sync_item_and_query: Option<SyncItemAndQuery<IP, QP>>,
}

impl<QP, IP, T, UserErr, E> ListQueryStore<QP, IP, T, UserErr, E>
where
  QP: Serialize + Clone + Send + Sync + 'static,
  IP: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    fetch_list_fn: FetchListFn<QP, IP, T, UserErr>,
    fetch_item_fn: Option<FetchItemFn<IP, T, UserErr>>,
    config: StoreConfig<UserErr, E>,
    default_query_size: usize,
    sync_queries: Option<SyncQueries<QP>>,
    sync_item_and_query: Option<SyncItemAndQuery<IP, QP>>,
  ) -> Arc<Self> {
    let state: Arc<Mutex<ListQueryState<QP, IP, T, E>>> = Arc::new(Mutex::new(ListQueryState {
      items: HashMap::new(),
      item_queries: HashMap::new(),
      queries: HashMap::new(),
    }));
    let (watch_tx, _rx) = watch::channel(0u64);

    let orchestrator_config = config.orchestrator_config();

    let item_orchestrators = fetch_item_fn.as_ref().map(|fetch_item_fn| {
      let state_for_fetch = Arc::clone(&state);
      let watch_tx_for_fetch = watch_tx.clone();
      let normalizer = Arc::clone(&config.error_normalizer);
      let user_fetch_item_fn = Arc::clone(fetch_item_fn);

      let item_orchestrator_fetch_fn: FetchFn<IP> = Arc::new(move |ctx: FetchContext<IP>, payload: IP| {
        let state = Arc::clone(&state_for_fetch);
        let watch_tx = watch_tx_for_fetch.clone();
        let normalizer = Arc::clone(&normalizer);
        let user_fetch_item_fn = Arc::clone(&user_fetch_item_fn);
        Box::pin(async move {
          let ikey = serialize_key(&payload);
          {
            let mut st = state.lock().unwrap();
            let was_loaded = st.item_queries.get(&ikey).and_then(|s| s.as_ref()).is_some_and(|s| s.was_loaded);
            st.item_queries.insert(
              ikey.clone(),
              Some(ItemQueryState {
                payload: payload.clone(),
                status: if was_loaded { Status::Refetching } else { Status::Loading },
                error: None,
                was_loaded,
                refetch_on_mount: None,
              }),
            );
            watch_tx.send_modify(|v| *v += 1);
          }

          let result = user_fetch_item_fn(payload.clone()).await;
          if ctx.should_abort() {
            return false;
          }

          let mut st = state.lock().unwrap();
          let committed = match result {
            Ok(data) => {
              let prev = st.items.get(&ikey).and_then(|s| s.as_ref()).map(|e| &e.data);
              let reused = reuse_prev_if_equal(prev, data);
              st.items.insert(ikey.clone(), Some(PoolEntry { data: reused }));
              st.item_queries.insert(
                ikey.clone(),
                Some(ItemQueryState {
                  payload,
                  status: Status::Success,
                  error: None,
                  was_loaded: true,
                  refetch_on_mount: None,
                }),
              );
              true
            }
            Err(e) => {
              let normalized = normalizer(FetchError::user(e));
              st.item_queries.insert(
                ikey.clone(),
                Some(ItemQueryState {
                  payload,
                  status: Status::Error,
                  error: Some(normalized),
                  was_loaded: false,
                  refetch_on_mount: None,
                }),
              );
              false
            }
          };
          watch_tx.send_modify(|v| *v += 1);
          committed
        })
      });
      CollectionOrchestrator::new(item_orchestrator_fetch_fn, orchestrator_config.clone())
    });

    let state_for_fetch = Arc::clone(&state);
    let watch_tx_for_fetch = watch_tx.clone();
    let normalizer = Arc::clone(&config.error_normalizer);
    let user_fetch_list_fn = Arc::clone(&fetch_list_fn);
    let item_orchestrators_for_fetch = item_orchestrators.clone();

    let query_orchestrator_fetch_fn: FetchFn<QueryFetchParams<QP>> =
      Arc::new(move |ctx: FetchContext<QueryFetchParams<QP>>, (op, payload, requested_size): QueryFetchParams<QP>| {
        let state = Arc::clone(&state_for_fetch);
        let watch_tx = watch_tx_for_fetch.clone();
        let normalizer = Arc::clone(&normalizer);
        let user_fetch_list_fn = Arc::clone(&user_fetch_list_fn);
        let item_orchestrators = item_orchestrators_for_fetch.clone();
        Box::pin(async move {
          let qkey = serialize_key(&payload);

          let query_size = {
            let mut st = state.lock().unwrap();
            let entry = st.queries.entry(qkey.clone()).or_insert_with(|| QueryState::new(payload.clone()));
            let query_size = match op {
              QueryOp::LoadMore => entry.size + requested_size,
              QueryOp::Load if entry.was_loaded => entry.size.max(requested_size),
              QueryOp::Load => requested_size,
            };
            entry.size = query_size;
            entry.status = match op {
              QueryOp::LoadMore => Status::LoadingMore,
              _ if entry.was_loaded => Status::Refetching,
              _ => Status::Loading,
            };
            entry.error = None;
            entry.refetch_on_mount = None;
            watch_tx.send_modify(|v| *v += 1);
            query_size
          };

          let result = user_fetch_list_fn(payload.clone(), query_size).await;

          if ctx.should_abort() {
            return false;
          }

          match result {
            Ok((returned_items, has_more)) => {
              let start_time = ctx.start_time();
              let mut st = state.lock().unwrap();
              let mut item_keys = Vec::with_capacity(returned_items.len());
              for (item_payload, data) in returned_items {
                let ikey = serialize_key(&item_payload);
                item_keys.push(ikey.clone());

                let prev = st.items.get(&ikey).and_then(|s| s.as_ref()).map(|e| &e.data);
                let reused = reuse_prev_if_equal(prev, data);
                st.items.insert(ikey.clone(), Some(PoolEntry { data: reused }));

                let should_set_success = match st.item_queries.get(&ikey) {
                  None => true,
                  Some(None) => true,
                  Some(Some(iq)) => iq.status.is_terminal(),
                };
                if should_set_success {
                  st.item_queries.insert(
                    ikey.clone(),
                    Some(ItemQueryState {
                      payload: item_payload,
                      status: Status::Success,
                      error: None,
                      was_loaded: true,
                      refetch_on_mount: None,
                    }),
                  );
                }

                // A list fetch that resolved this item counts as that item's
                // own most recent fetch for throttle purposes.
                if let Some(item_orchestrators) = &item_orchestrators {
                  item_orchestrators.get(&ikey).note_external_fetch_start(start_time);
                }
              }

              if let Some(entry) = st.queries.get_mut(&qkey) {
                entry.items = item_keys.clone();
                entry.status = Status::Success;
                entry.has_more = has_more;
                entry.was_loaded = true;
              }
              watch_tx.send_modify(|v| *v += 1);
              true
            }
            Err(e) => {
              let mut st = state.lock().unwrap();
              let normalized = normalizer(FetchError::user(e));
              if let Some(entry) = st.queries.get_mut(&qkey) {
                entry.status = Status::Error;
                entry.error = Some(normalized);
              }
              watch_tx.send_modify(|v| *v += 1);
              false
            }
          }
        })
      });

    let query_orchestrators = CollectionOrchestrator::new(query_orchestrator_fetch_fn, orchestrator_config);

    Arc::new(Self {
      fetch_list_fn,
      fetch_item_fn,
      query_orchestrators,
      item_orchestrators,
      state,
      watch_tx,
      config,
      default_query_size,
      sync_queries,
      sync_item_and_query,
    })
  }

  fn query_key_of(payload: &QP) -> String {
    serialize_key(payload)
  }

  fn item_key_of(payload: &IP) -> String {
    serialize_key(payload)
  }

  pub fn schedule_fetch(&self, payload: QP, fetch_type: FetchType) -> ScheduleResult {
    let qkey = Self::query_key_of(&payload);
    self
      .query_orchestrators
      .get(&qkey)
      .schedule_fetch(fetch_type, (QueryOp::Load, payload, self.default_query_size))
  }

  /// §4.G load-more: skipped if the query is absent, has no more, or is
  /// not currently in `success`.
  pub fn load_more(&self, payload: QP, size: usize) -> ScheduleResult {
    let qkey = Self::query_key_of(&payload);
    let eligible = {
      let st = self.state.lock().unwrap();
      st.queries.get(&qkey).is_some_and(|q| q.has_more && q.status == Status::Success)
    };
    if !eligible {
      return ScheduleResult::Skipped;
    }
    self.query_orchestrators.get(&qkey).schedule_fetch(FetchType::HighPriority, (QueryOp::LoadMore, payload, size))
  }

  pub async fn await_fetch(&self, payload: QP) -> Result<QueryPage<T, E>, E> {
    let qkey = Self::query_key_of(&payload);
    let was_aborted = self
      .query_orchestrators
      .get(&qkey)
      .await_fetch((QueryOp::Load, payload, self.default_query_size))
      .await;
    if was_aborted {
      return Err(self.config.normalize(FetchError::Orchestration(OrchestrationError::Aborted)));
    }
    self.get_query_page(&qkey).ok_or_else(|| self.config.normalize(FetchError::Orchestration(OrchestrationError::NotFound)))
  }

  fn get_query_page(&self, qkey: &str) -> Option<QueryPage<T, E>> {
    let st = self.state.lock().unwrap();
    let query = st.queries.get(qkey)?;
    let items = query
      .items
      .iter()
      .map(|ikey| st.items.get(ikey).and_then(|s| s.as_ref()).map(|e| Arc::clone(&e.data)))
      .collect();
    Some(QueryPage {
      status: query.status,
      is_loading: query.status == Status::Loading,
      error: query.error.clone(),
      has_more: query.has_more,
      items,
    })
  }

  pub fn query_page(&self, payload: &QP) -> Option<QueryPage<T, E>> {
    self.get_query_page(&Self::query_key_of(payload))
  }

  /// The priority a mounted subscriber would fetch at on its next mount,
  /// if any (spec §4.D `refetchOnMount`).
  pub fn query_refetch_on_mount(&self, payload: &QP) -> RefetchOnMount {
    let qkey = Self::query_key_of(payload);
    self.state.lock().unwrap().queries.get(&qkey).and_then(|q| q.refetch_on_mount)
  }

  /// §4.G `invalidateQuery` with cross-entity sync fan-out, one level
  /// deep.
  pub fn invalidate_query(&self, predicate: impl Fn(&QP) -> bool, priority: FetchType) {
    let keys: Vec<String> = {
      let st = self.state.lock().unwrap();
      st.queries.iter().filter(|(_, q)| predicate(&q.payload)).map(|(k, _)| k.clone()).collect()
    };
    for key in keys {
      self.invalidate_query_by_key(&key, priority, true);
    }
  }

  fn invalidate_query_by_key(&self, key: &str, priority: FetchType, cascade: bool) -> bool {
    let (changed, payload) = {
      let mut st = self.state.lock().unwrap();
      match st.queries.get_mut(key) {
        Some(q) => (strengthen_refetch_on_mount(&mut q.refetch_on_mount, priority), Some(q.payload.clone())),
        None => (false, None),
      }
    };
    if !changed {
      return false;
    }
    self.watch_tx.send_modify(|v| *v += 1);

    if cascade {
      if let Some(payload) = payload {
        if let Some(sync_item_and_query) = &self.sync_item_and_query {
          let matching_items: Vec<String> = {
            let st = self.state.lock().unwrap();
            st.item_queries
              .iter()
              .filter_map(|(k, v)| v.as_ref().filter(|iq| sync_item_and_query(&iq.payload, &payload)).map(|_| k.clone()))
              .collect()
          };
          for ikey in matching_items {
            self.invalidate_item_by_key(&ikey, priority, false);
          }
        }
        if let Some(sync_queries) = &self.sync_queries {
          let matching_queries: Vec<String> = {
            let st = self.state.lock().unwrap();
            st.queries
              .iter()
              .filter(|(k, q)| k.as_str() != key && sync_queries(&payload, &q.payload))
              .map(|(k, _)| k.clone())
              .collect()
          };
          for other in matching_queries {
            self.invalidate_query_by_key(&other, priority, false);
          }
        }
      }
    }
    true
  }

  /// §4.G `invalidateItem` with the symmetric cascade.
  pub fn invalidate_item(&self, predicate: impl Fn(&IP) -> bool, priority: FetchType) {
    let keys: Vec<String> = {
      let st = self.state.lock().unwrap();
      st.item_queries
        .iter()
        .filter_map(|(k, v)| v.as_ref().filter(|iq| predicate(&iq.payload)).map(|_| k.clone()))
        .collect()
    };
    for key in keys {
      self.invalidate_item_by_key(&key, priority, true);
    }
  }

  fn invalidate_item_by_key(&self, key: &str, priority: FetchType, cascade: bool) -> bool {
    let (changed, payload) = {
      let mut st = self.state.lock().unwrap();
      match st.item_queries.get_mut(key) {
        Some(Some(iq)) => (strengthen_refetch_on_mount(&mut iq.refetch_on_mount, priority), Some(iq.payload.clone())),
        _ => (false, None),
      }
    };
    if !changed {
      return false;
    }
    self.watch_tx.send_modify(|v| *v += 1);

    if cascade {
      if let (Some(payload), Some(sync_item_and_query)) = (payload, &self.sync_item_and_query) {
        let matching_queries: Vec<String> = {
          let st = self.state.lock().unwrap();
          st.queries
            .iter()
            .filter(|(_, q)| sync_item_and_query(&payload, &q.payload))
            .map(|(k, _)| k.clone())
            .collect()
        };
        for qkey in matching_queries {
          self.invalidate_query_by_key(&qkey, priority, false);
        }
      }
    }
    true
  }

  /// §4.G `addItemToState`.
  pub fn add_item_to_state(&self, payload: IP, data: T, add_to_queries: &[(QP, SplicePosition)]) {
    let ikey = Self::item_key_of(&payload);
    {
      let mut st = self.state.lock().unwrap();
      st.items.insert(ikey.clone(), Some(PoolEntry { data: Arc::new(data) }));
      st.item_queries.insert(
        ikey.clone(),
        Some(ItemQueryState {
          payload,
          status: Status::Success,
          error: None,
          was_loaded: true,
          refetch_on_mount: None,
        }),
      );
      for (query_payload, position) in add_to_queries {
        let qkey = Self::query_key_of(query_payload);
        if let Some(query) = st.queries.get_mut(&qkey) {
          match *position {
            SplicePosition::Start => query.items.insert(0, ikey.clone()),
            SplicePosition::End => query.items.push(ikey.clone()),
            SplicePosition::Index(i) => query.items.insert(i.min(query.items.len()), ikey.clone()),
          }
        }
      }
    }
    self.watch_tx.send_modify(|v| *v += 1);
  }

  /// §4.G `deleteItemState`: tombstones the pool/itemQueries slots and
  /// splices the key out of every query's `items[]`.
  pub fn delete_item_state(&self, payload: &IP) {
    let ikey = Self::item_key_of(payload);
    {
      let mut st = self.state.lock().unwrap();
      st.items.insert(ikey.clone(), None);
      st.item_queries.insert(ikey.clone(), None);
      for query in st.queries.values_mut() {
        query.items.retain(|k| k != &ikey);
      }
    }
    self.watch_tx.send_modify(|v| *v += 1);
  }

  pub fn get_item(&self, payload: &IP) -> Option<Arc<T>> {
    let ikey = Self::item_key_of(payload);
    self.state.lock().unwrap().items.get(&ikey).and_then(|s| s.as_ref()).map(|e| Arc::clone(&e.data))
  }

  pub fn schedule_item_fetch(&self, payload: IP, fetch_type: FetchType) -> Result<ScheduleResult, E> {
    let Some(item_orchestrators) = &self.item_orchestrators else {
      return Err(self.config.normalize(FetchError::Orchestration(OrchestrationError::MissingItemFetcher)));
    };
    let ikey = Self::item_key_of(&payload);
    Ok(item_orchestrators.get(&ikey).schedule_fetch(fetch_type, payload))
  }

  pub async fn await_item_fetch(&self, payload: IP) -> Result<Arc<T>, E> {
    let Some(item_orchestrators) = &self.item_orchestrators else {
      return Err(self.config.normalize(FetchError::Orchestration(OrchestrationError::MissingItemFetcher)));
    };
    let ikey = Self::item_key_of(&payload);
    let was_aborted = item_orchestrators.get(&ikey).await_fetch(payload).await;
    if was_aborted {
      return Err(self.config.normalize(FetchError::Orchestration(OrchestrationError::Aborted)));
    }
    self
      .get_item_by_key(&ikey)
      .ok_or_else(|| self.config.normalize(FetchError::Orchestration(OrchestrationError::NotFound)))
  }

  fn get_item_by_key(&self, ikey: &str) -> Option<Arc<T>> {
    self.state.lock().unwrap().items.get(ikey).and_then(|s| s.as_ref()).map(|e| Arc::clone(&e.data))
  }

  pub fn reset(&self) {
    self.query_orchestrators.reset();
    if let Some(item_orchestrators) = &self.item_orchestrators {
      item_orchestrators.reset();
    }
    let mut st = self.state.lock().unwrap();
    st.items.clear();
    st.item_queries.clear();
    st.queries.clear();
    drop(st);
    self.watch_tx.send_modify(|v| *v += 1);
  }

  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.watch_tx.subscribe()
  }

  /// `useListQuery(payload, options)` on-mount scheduling, mirroring
  /// `DocumentStore::mount`.
  pub fn mount(self: &Arc<Self>, payload: QP, options: ListQueryMountOptions) -> ListQuerySubscription<QP, IP, T, UserErr, E> {
    let ensure_loaded = EnsureLoaded::new(options.ensure_is_loaded);
    if !options.disabled && !options.is_off_screen {
      let qkey = Self::query_key_of(&payload);
      let (current_refetch, was_loaded) = {
        let st = self.state.lock().unwrap();
        match st.queries.get(&qkey) {
          Some(q) => (q.refetch_on_mount, q.was_loaded),
          None => (None, false),
        }
      };
      let should_schedule = if options.disable_refetch_on_mount {
        !was_loaded || current_refetch.is_some()
      } else {
        true
      };
      if should_schedule || ensure_loaded.should_force_fetch() {
        let priority = if ensure_loaded.should_force_fetch() {
          FetchType::HighPriority
        } else {
          current_refetch.unwrap_or(FetchType::LowPriority)
        };
        self.schedule_fetch(payload.clone(), priority);
      }
    }
    ListQuerySubscription {
      store: Arc::clone(self),
      payload,
      ensure_loaded,
    }
  }
}

impl<QP, IP, T, UserErr, E> FocusInvalidatable for ListQueryStore<QP, IP, T, UserErr, E>
where
  QP: Serialize + Clone + Send + Sync + 'static,
  IP: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  /// §4.I: invalidate every query, and every item iff an item fetcher is
  /// configured.
  fn invalidate_all(&self, priority: FetchType) {
    self.invalidate_query(|_| true, priority);
    if self.fetch_item_fn.is_some() {
      self.invalidate_item(|_| true, priority);
    }
  }
}

#[derive(Default, Clone, Copy)]
pub struct ListQueryMountOptions {
  pub disabled: bool,
  pub disable_refetch_on_mount: bool,
  pub ensure_is_loaded: bool,
  pub is_off_screen: bool,
}

pub struct ListQuerySubscription<QP, IP, T, UserErr: std::error::Error, E> {
  store: Arc<ListQueryStore<QP, IP, T, UserErr, E>>,
  payload: QP,
  ensure_loaded: EnsureLoaded,
}

impl<QP, IP, T, UserErr, E> ListQuerySubscription<QP, IP, T, UserErr, E>
where
  QP: Serialize + Clone + Send + Sync + 'static,
  IP: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  pub fn load_more(&self, size: usize) -> ScheduleResult {
    self.store.load_more(self.payload.clone(), size)
  }

  pub fn snapshot(&self) -> Option<QueryPage<T, E>> {
    let mut page = self.store.query_page(&self.payload)?;
    let (status, is_loading) = self.ensure_loaded.present(page.status);
    page.status = status;
    page.is_loading = is_loading;
    Some(page)
  }
}
