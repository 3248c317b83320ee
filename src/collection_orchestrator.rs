//! Lazy map from key -> orchestrator (spec §4.C). Each entry is fully
//! independent; no cross-key coordination lives here.
//!
//! Grounded on `cache/layer.rs`'s `CacheLayer<S>` wrapping its storage in
//! an `Arc` and handing out clones; here the "storage" is a map of
//! per-key [`FetchOrchestrator`]s built lazily on first access.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::orchestrator::{FetchFn, FetchOrchestrator, OrchestratorConfig, OrchestratorEvent};

/// A keyed collection of independent [`FetchOrchestrator`]s, created
/// lazily on first access to a given key.
pub struct CollectionOrchestrator<P> {
  fetch_fn: FetchFn<P>,
  config: OrchestratorConfig,
  entries: Mutex<HashMap<String, Arc<FetchOrchestrator<P>>>>,
  listener: Mutex<Option<Arc<dyn Fn(String, OrchestratorEvent) + Send + Sync>>>,
}

impl<P: Clone + Send + Sync + 'static> CollectionOrchestrator<P> {
  pub fn new(fetch_fn: FetchFn<P>, config: OrchestratorConfig) -> Arc<Self> {
    Arc::new(Self {
      fetch_fn,
      config,
      entries: Mutex::new(HashMap::new()),
      listener: Mutex::new(None),
    })
  }

  /// Register a listener invoked with the originating key whenever any
  /// entry's orchestrator emits an event.
  pub fn on_event(self: &Arc<Self>, listener: impl Fn(String, OrchestratorEvent) + Send + Sync + 'static) {
    *self.listener.lock().unwrap() = Some(Arc::new(listener));
  }

  /// Get (creating if absent) the orchestrator for `key`.
  pub fn get(self: &Arc<Self>, key: &str) -> Arc<FetchOrchestrator<P>> {
    let mut entries = self.entries.lock().unwrap();
    if let Some(existing) = entries.get(key) {
      return Arc::clone(existing);
    }
    let mut keyed_config = self.config.clone();
    keyed_config.debug_name = Some(match &self.config.debug_name {
      Some(name) => format!("{name}[{key}]"),
      None => format!("[{key}]"),
    });
    let orchestrator = FetchOrchestrator::new(Arc::clone(&self.fetch_fn), keyed_config);
    let me = Arc::clone(self);
    let key_owned = key.to_string();
    orchestrator.on_event(move |event| {
      let listener = me.listener.lock().unwrap().clone();
      if let Some(listener) = listener {
        listener(key_owned.clone(), event);
      }
    });
    entries.insert(key.to_string(), Arc::clone(&orchestrator));
    orchestrator
  }

  /// True iff an orchestrator has already been created for `key`.
  pub fn contains(&self, key: &str) -> bool {
    self.entries.lock().unwrap().contains_key(key)
  }

  /// Drop every entry. Existing `Arc<FetchOrchestrator<P>>` handles held
  /// elsewhere keep working; `get` will build fresh ones afterwards.
  pub fn reset(&self) {
    self.entries.lock().unwrap().clear();
  }

  pub fn keys(&self) -> Vec<String> {
    self.entries.lock().unwrap().keys().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::FetchType;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn noop_fetch_fn() -> FetchFn<()> {
    Arc::new(|_ctx, _params| Box::pin(async move { true }))
  }

  #[test]
  fn get_is_lazy_and_stable_per_key() {
    let collection = CollectionOrchestrator::new(noop_fetch_fn(), OrchestratorConfig::default());
    assert!(!collection.contains("a"));

    let a1 = collection.get("a");
    let a2 = collection.get("a");
    assert!(Arc::ptr_eq(&a1, &a2));

    let b = collection.get("b");
    assert!(!Arc::ptr_eq(&a1, &b));
    assert_eq!(collection.keys().len(), 2);
  }

  #[test]
  fn reset_clears_all_entries() {
    let collection = CollectionOrchestrator::new(noop_fetch_fn(), OrchestratorConfig::default());
    collection.get("a");
    collection.get("b");
    collection.reset();
    assert!(!collection.contains("a"));
    assert!(!collection.contains("b"));
  }

  #[tokio::test(start_paused = true)]
  async fn entries_are_independent() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_writer = Arc::clone(&counter);
    let fetch_fn: FetchFn<()> = Arc::new(move |_ctx, _params| {
      let counter = Arc::clone(&counter_writer);
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        true
      })
    });
    let collection = CollectionOrchestrator::new(fetch_fn, OrchestratorConfig::default());

    collection.get("a").schedule_fetch(FetchType::HighPriority, ());
    collection.get("b").schedule_fetch(FetchType::HighPriority, ());
    tokio::time::advance(std::time::Duration::from_millis(5)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }
}
