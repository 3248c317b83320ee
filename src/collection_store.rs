//! Keyed-collection store (spec §4.F): one entity per cache key, each
//! backed by its own orchestrator via [`CollectionOrchestrator`].
//!
//! Grounded on `jira/cached_client.rs`'s per-issue-key fetch-with-state
//! pattern, generalized to an arbitrary payload/key scheme.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::collection_orchestrator::CollectionOrchestrator;
use crate::config::StoreConfig;
use crate::equality::reuse_prev_if_equal;
use crate::error::{FetchError, OrchestrationError};
use crate::ensure_loaded::EnsureLoaded;
use crate::focus::FocusInvalidatable;
use crate::key::{key_from_value, serialize_key};
use crate::orchestrator::{FetchContext, FetchFn};
use crate::status::{strengthen_refetch_on_mount, FetchType, RefetchOnMount, ScheduleResult, Status};

pub type CollectionFetchFuture<T, UserErr> = Pin<Box<dyn Future<Output = Result<T, UserErr>> + Send>>;
pub type CollectionFetchFn<P, T, UserErr> = Arc<dyn Fn(P) -> CollectionFetchFuture<T, UserErr> + Send + Sync>;
pub type CollectionItemKeyFn<P> = Arc<dyn Fn(&P) -> Value + Send + Sync>;
pub type CollectionInvalidateHook<P> = Arc<dyn Fn(P, FetchType) + Send + Sync>;

/// `{ data, error, status, payload, refetchOnMount, wasLoaded }` (spec §3).
#[derive(Clone)]
pub struct ItemState<P, T, E> {
  pub payload: P,
  pub data: Option<Arc<T>>,
  pub error: Option<E>,
  pub status: Status,
  pub refetch_on_mount: RefetchOnMount,
  pub was_loaded: bool,
}

/// A keyed slot's three-way existence (spec §3: absent vs. tombstone vs.
/// present).
pub enum ItemSlot<P, T, E> {
  Missing,
  Deleted,
  Present(ItemState<P, T, E>),
}

#[derive(Default, Clone, Copy)]
pub struct ItemSelectOptions {
  pub return_idle_status: bool,
  pub return_refetching_status: bool,
}

pub struct SelectedItem<T, E> {
  pub data: Option<Arc<T>>,
  pub error: Option<E>,
  pub status: Status,
  pub is_loading: bool,
}

pub struct CollectionStore<P, T, UserErr: std::error::Error, E> {
  orchestrators: Arc<CollectionOrchestrator<P>>,
  state: Arc<Mutex<HashMap<String, Option<ItemState<P, T, E>>>>>,
  watch_tx: watch::Sender<u64>,
  config: StoreConfig<UserErr, E>,
  get_collection_item_key: Option<CollectionItemKeyFn<P>>,
  on_invalidate: Option<CollectionInvalidateHook<P>>,
}

impl<P, T, UserErr, E> CollectionStore<P, T, UserErr, E>
where
  P: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  pub fn new(
    fetch_fn: CollectionFetchFn<P, T, UserErr>,
    config: StoreConfig<UserErr, E>,
    get_collection_item_key: Option<CollectionItemKeyFn<P>>,
    get_initial_data: Option<Vec<(P, T)>>,
    on_invalidate: Option<CollectionInvalidateHook<P>>,
  ) -> Arc<Self> {
    let state: Arc<Mutex<HashMap<String, Option<ItemState<P, T, E>>>>> = Arc::new(Mutex::new(HashMap::new()));
    let (watch_tx, _rx) = watch::channel(0u64);

    if let Some(initial) = &get_initial_data {
      let mut st = state.lock().unwrap();
      for (payload, data) in initial {
        let key = Self::key_for(payload, &get_collection_item_key);
        let refetch_on_mount = if config.disable_initial_data_invalidation {
          None
        } else {
          Some(FetchType::LowPriority)
        };
        st.insert(
          key,
          Some(ItemState {
            payload: payload.clone(),
            data: Some(Arc::new(data.clone())),
            error: None,
            status: Status::Success,
            refetch_on_mount,
            was_loaded: true,
          }),
        );
      }
    }

    let orchestrator_config = config.orchestrator_config();
    let state_for_fetch = Arc::clone(&state);
    let watch_tx_for_fetch = watch_tx.clone();
    let normalizer = Arc::clone(&config.error_normalizer);
    let user_fetch_fn = Arc::clone(&fetch_fn);
    let key_fn = get_collection_item_key.clone();

    let orchestrator_fetch_fn: FetchFn<P> = Arc::new(move |ctx: FetchContext<P>, payload: P| {
      let state = Arc::clone(&state_for_fetch);
      let watch_tx = watch_tx_for_fetch.clone();
      let normalizer = Arc::clone(&normalizer);
      let user_fetch_fn = Arc::clone(&user_fetch_fn);
      let key_fn = key_fn.clone();
      Box::pin(async move {
        let key = Self::key_for(&payload, &key_fn);

        {
          let mut st = state.lock().unwrap();
          let was_loaded = st.get(&key).and_then(|s| s.as_ref()).is_some_and(|s| s.was_loaded);
          let prior_data = st.get(&key).and_then(|s| s.as_ref()).and_then(|s| s.data.clone());
          st.insert(
            key.clone(),
            Some(ItemState {
              payload: payload.clone(),
              data: prior_data,
              error: None,
              status: if was_loaded { Status::Refetching } else { Status::Loading },
              refetch_on_mount: None,
              was_loaded,
            }),
          );
          let _ = watch_tx.send_modify(|v| *v += 1);
        }

        let result = user_fetch_fn(payload.clone()).await;

        if ctx.should_abort() {
          return false;
        }

        let mut st = state.lock().unwrap();
        let committed = match result {
          Ok(data) => {
            let prev = st.get(&key).and_then(|s| s.as_ref()).and_then(|s| s.data.as_ref());
            let reused = reuse_prev_if_equal(prev, data);
            st.insert(
              key.clone(),
              Some(ItemState {
                payload,
                data: Some(reused),
                error: None,
                status: Status::Success,
                refetch_on_mount: None,
                was_loaded: true,
              }),
            );
            true
          }
          Err(e) => {
            let normalized = normalizer(FetchError::user(e));
            st.insert(
              key.clone(),
              Some(ItemState {
                payload,
                data: None,
                error: Some(normalized),
                status: Status::Error,
                refetch_on_mount: None,
                was_loaded: false,
              }),
            );
            false
          }
        };
        watch_tx.send_modify(|v| *v += 1);
        committed
      })
    });

    let orchestrators = CollectionOrchestrator::new(orchestrator_fetch_fn, orchestrator_config);

    Arc::new(Self {
      orchestrators,
      state,
      watch_tx,
      config,
      get_collection_item_key,
      on_invalidate,
    })
  }

  fn key_for(payload: &P, key_fn: &Option<CollectionItemKeyFn<P>>) -> String {
    match key_fn {
      Some(f) => key_from_value(&f(payload)),
      None => serialize_key(payload),
    }
  }

  pub fn key_of(&self, payload: &P) -> String {
    Self::key_for(payload, &self.get_collection_item_key)
  }

  pub fn schedule_fetch(&self, payload: P, fetch_type: FetchType) -> ScheduleResult {
    let key = self.key_of(&payload);
    self.orchestrators.get(&key).schedule_fetch(fetch_type, payload)
  }

  /// §4.F `awaitFetch`.
  pub async fn await_fetch(&self, payload: P) -> Result<Arc<T>, E> {
    let key = self.key_of(&payload);
    let was_aborted = self.orchestrators.get(&key).await_fetch(payload).await;
    if was_aborted {
      return Err(self.config.normalize(FetchError::Orchestration(OrchestrationError::Aborted)));
    }
    let data = self.state.lock().unwrap().get(&key).and_then(|s| s.as_ref()).and_then(|s| s.data.clone());
    data.ok_or_else(|| self.config.normalize(FetchError::Orchestration(OrchestrationError::NotFound)))
  }

  /// §4.F `invalidateItem`. A tombstoned (deleted) item is left alone: a
  /// deletion has no pending refetch to strengthen.
  pub fn invalidate_item(&self, payload: &P, priority: FetchType) -> bool {
    let key = self.key_of(payload);
    let changed = {
      let mut st = self.state.lock().unwrap();
      match st.get_mut(&key) {
        Some(Some(item)) => strengthen_refetch_on_mount(&mut item.refetch_on_mount, priority),
        Some(None) => false,
        None => {
          st.insert(
            key.clone(),
            Some(ItemState {
              payload: payload.clone(),
              data: None,
              error: None,
              status: Status::Idle,
              refetch_on_mount: Some(priority),
              was_loaded: false,
            }),
          );
          true
        }
      }
    };
    if changed {
      self.watch_tx.send_modify(|v| *v += 1);
      if let Some(cb) = &self.on_invalidate {
        cb(payload.clone(), priority);
      }
    }
    changed
  }

  /// §4.F `startMutation`: begins a mutation on every key with a live
  /// orchestrator, returning a guard that ends all of them together.
  pub fn start_mutation(&self) -> CollectionMutationGuard<P> {
    let guards = self
      .orchestrators
      .keys()
      .into_iter()
      .map(|key| self.orchestrators.get(&key).start_mutation())
      .collect();
    CollectionMutationGuard { guards }
  }

  /// §4.F `updateItemState`: immutable deep update over `data`; a no-op
  /// if the slot is absent, tombstoned, or has no committed data.
  pub fn update_item_state(&self, payload: &P, producer: impl FnOnce(&mut T)) {
    let key = self.key_of(payload);
    let mut st = self.state.lock().unwrap();
    if let Some(Some(item)) = st.get_mut(&key) {
      if let Some(data) = item.data.clone() {
        let mut updated = (*data).clone();
        producer(&mut updated);
        item.data = Some(Arc::new(updated));
        drop(st);
        self.watch_tx.send_modify(|v| *v += 1);
      }
    }
  }

  /// §4.F `addItemToState`.
  pub fn add_item_to_state(&self, payload: P, data: T) {
    let key = self.key_of(&payload);
    {
      let mut st = self.state.lock().unwrap();
      st.insert(
        key,
        Some(ItemState {
          payload,
          data: Some(Arc::new(data)),
          error: None,
          status: Status::Success,
          refetch_on_mount: None,
          was_loaded: true,
        }),
      );
    }
    self.watch_tx.send_modify(|v| *v += 1);
  }

  /// §4.F `deleteItemState`: leaves a tombstone, preserved so subscribers
  /// observe the transition.
  pub fn delete_item_state(&self, payload: &P) {
    let key = self.key_of(payload);
    {
      let mut st = self.state.lock().unwrap();
      st.insert(key, None);
    }
    self.watch_tx.send_modify(|v| *v += 1);
  }

  pub fn get_item_state(&self, payload: &P) -> ItemSlot<P, T, E> {
    let key = self.key_of(payload);
    match self.state.lock().unwrap().get(&key) {
      None => ItemSlot::Missing,
      Some(None) => ItemSlot::Deleted,
      Some(Some(item)) => ItemSlot::Present(item.clone()),
    }
  }

  /// §4.F `useMultipleItems` selection semantics.
  pub fn select_item(&self, payload: &P, options: ItemSelectOptions) -> SelectedItem<T, E> {
    let key = self.key_of(payload);
    let st = self.state.lock().unwrap();
    match st.get(&key) {
      None => {
        let status = if options.return_idle_status { Status::Idle } else { Status::Loading };
        SelectedItem {
          data: None,
          error: None,
          status,
          is_loading: status == Status::Loading,
        }
      }
      Some(None) => SelectedItem {
        data: None,
        error: None,
        status: Status::Deleted,
        is_loading: false,
      },
      Some(Some(item)) => {
        let status = if item.status == Status::Refetching && !options.return_refetching_status {
          Status::Success
        } else {
          item.status
        };
        SelectedItem {
          data: item.data.clone(),
          error: item.error.clone(),
          status,
          is_loading: status == Status::Loading,
        }
      }
    }
  }

  pub fn reset(&self) {
    self.orchestrators.reset();
    self.state.lock().unwrap().clear();
    self.watch_tx.send_modify(|v| *v += 1);
  }

  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.watch_tx.subscribe()
  }

  /// Mount a single item (§4.F `useItem`), mirroring the document store's
  /// `mount`.
  pub fn mount_item(self: &Arc<Self>, payload: P, options: ItemMountOptions) -> ItemSubscription<P, T, UserErr, E> {
    let ensure_loaded = EnsureLoaded::new(options.ensure_is_loaded);
    if !options.disabled && !options.is_off_screen {
      let key = self.key_of(&payload);
      let (current_refetch, was_loaded) = {
        let st = self.state.lock().unwrap();
        match st.get(&key) {
          Some(Some(item)) => (item.refetch_on_mount, item.was_loaded),
          _ => (None, false),
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
    ItemSubscription {
      store: Arc::clone(self),
      payload,
      ensure_loaded,
      invalidation_was_triggered: AtomicBool::new(false),
      is_off_screen: AtomicBool::new(options.is_off_screen),
    }
  }

  /// Mount a dynamic set of items (§4.F `useMultipleItems`).
  pub fn mount_multiple_items(
    self: &Arc<Self>,
    payloads: &[P],
    options: MultiItemMountOptions,
  ) -> MultiItemSubscription<P, T, UserErr, E> {
    let subscription = MultiItemSubscription {
      store: Arc::clone(self),
      options,
      ignore_items_in_refetch_on_mount: Mutex::new(HashSet::new()),
    };
    subscription.update_queried_payloads(payloads);
    subscription
  }
}

impl<P, T, UserErr, E> FocusInvalidatable for CollectionStore<P, T, UserErr, E>
where
  P: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  fn invalidate_all(&self, priority: FetchType) {
    let keys: Vec<String> = self.state.lock().unwrap().keys().cloned().collect();
    let payloads: Vec<P> = keys
      .iter()
      .filter_map(|k| match self.state.lock().unwrap().get(k) {
        Some(Some(item)) => Some(item.payload.clone()),
        _ => None,
      })
      .collect();
    for payload in payloads {
      self.invalidate_item(&payload, priority);
    }
  }
}

pub struct CollectionMutationGuard<P> {
  guards: Vec<crate::orchestrator::MutationGuard<P>>,
}

impl<P: Clone + Send + Sync + 'static> CollectionMutationGuard<P> {
  /// Ends every key's mutation, returning `true` if at least one of them
  /// was still its orchestrator's latest mutation.
  pub fn end(self) -> bool {
    let mut any_latest = false;
    for guard in self.guards {
      if guard.end() {
        any_latest = true;
      }
    }
    any_latest
  }
}

#[derive(Default, Clone, Copy)]
pub struct ItemMountOptions {
  pub disabled: bool,
  pub disable_refetch_on_mount: bool,
  pub ensure_is_loaded: bool,
  pub is_off_screen: bool,
}

pub struct ItemSubscription<P, T, UserErr: std::error::Error, E> {
  store: Arc<CollectionStore<P, T, UserErr, E>>,
  payload: P,
  ensure_loaded: EnsureLoaded,
  invalidation_was_triggered: AtomicBool,
  is_off_screen: AtomicBool,
}

impl<P, T, UserErr, E> ItemSubscription<P, T, UserErr, E>
where
  P: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  pub fn on_invalidation_observed(&self) {
    if self.is_off_screen.load(Ordering::Acquire) {
      return;
    }
    if self.invalidation_was_triggered.swap(true, Ordering::AcqRel) {
      return;
    }
    let key = self.store.key_of(&self.payload);
    let priority = match self.store.state.lock().unwrap().get(&key) {
      Some(Some(item)) => item.refetch_on_mount,
      _ => None,
    };
    if let Some(priority) = priority {
      self.store.schedule_fetch(self.payload.clone(), priority);
    }
  }

  pub fn reset_invalidation_window(&self) {
    self.invalidation_was_triggered.store(false, Ordering::Release);
  }

  /// Toggle whether this subscriber is off-screen; while `true`, neither
  /// scheduling nor invalidation-driven rescheduling happens for it.
  pub fn set_off_screen(&self, off_screen: bool) {
    self.is_off_screen.store(off_screen, Ordering::Release);
  }

  pub fn snapshot(&self, options: ItemSelectOptions) -> SelectedItem<T, E> {
    let mut selected = self.store.select_item(&self.payload, options);
    let (status, is_loading) = self.ensure_loaded.present(selected.status);
    selected.status = status;
    selected.is_loading = is_loading;
    selected
  }
}

#[derive(Default, Clone, Copy)]
pub struct MultiItemMountOptions {
  pub disable_refetch_on_mount: bool,
  pub is_off_screen: bool,
}

/// Tracks a dynamic, caller-updated set of queried payloads, applying the
/// "per-payload refetch-on-mount, deduped for this lifetime" algorithm
/// (spec §4.F).
pub struct MultiItemSubscription<P, T, UserErr: std::error::Error, E> {
  store: Arc<CollectionStore<P, T, UserErr, E>>,
  options: MultiItemMountOptions,
  ignore_items_in_refetch_on_mount: Mutex<HashSet<String>>,
}

impl<P, T, UserErr, E> MultiItemSubscription<P, T, UserErr, E>
where
  P: Serialize + Clone + Send + Sync + 'static,
  T: Clone + PartialEq + Send + Sync + 'static,
  UserErr: std::error::Error + Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  pub fn update_queried_payloads(&self, payloads: &[P]) {
    if self.options.is_off_screen {
      return;
    }
    let mut ignore = self.ignore_items_in_refetch_on_mount.lock().unwrap();
    let mut current_keys = HashSet::with_capacity(payloads.len());

    for payload in payloads {
      let key = self.store.key_of(payload);
      current_keys.insert(key.clone());
      if ignore.contains(&key) {
        continue;
      }

      let (was_loaded, refetch_on_mount) = match self.store.state.lock().unwrap().get(&key) {
        Some(Some(item)) => (item.was_loaded, item.refetch_on_mount),
        _ => (false, None),
      };
      let should_fetch = !was_loaded || refetch_on_mount.is_some();

      if self.options.disable_refetch_on_mount {
        if should_fetch {
          self.store.schedule_fetch(payload.clone(), refetch_on_mount.unwrap_or(FetchType::LowPriority));
        }
      } else {
        self.store.schedule_fetch(payload.clone(), refetch_on_mount.unwrap_or(FetchType::LowPriority));
      }
      ignore.insert(key);
    }

    ignore.retain(|k| current_keys.contains(k));
  }

  pub fn select(&self, payload: &P, options: ItemSelectOptions) -> SelectedItem<T, E> {
    self.store.select_item(payload, options)
  }
}
