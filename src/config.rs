//! Factory configuration shared by every store (spec §6, §10.3).
//!
//! Grounded on `config.rs`'s `Config`/`JiraConfig` struct-with-defaults
//! shape, minus `serde::Deserialize`/on-disk loading: this crate has no
//! config file, so the configuration surface is a plain builder
//! constructed in-process by the embedding application.

use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;
use crate::orchestrator::DynamicRealtimeThrottle;

/// Configuration shared by `DocumentStore`, `CollectionStore`, and
/// `ListQueryStore`.
///
/// `UserErr` is the error type the caller's fetch callbacks produce;
/// `E` is the caller's own normalized error type, produced by
/// `error_normalizer`.
pub struct StoreConfig<UserErr: std::error::Error, E> {
  pub debug_name: Option<String>,
  pub error_normalizer: Arc<dyn Fn(FetchError<UserErr>) -> E + Send + Sync>,
  pub low_priority_throttle: Duration,
  pub medium_priority_throttle: Duration,
  pub dynamic_realtime_throttle: Option<DynamicRealtimeThrottle>,
  pub disable_refetch_on_mount: bool,
  pub disable_refetch_on_window_focus: bool,
  pub disable_initial_data_invalidation: bool,
}

impl<UserErr: std::error::Error, E> StoreConfig<UserErr, E> {
  /// Build a config with the spec's stated defaults
  /// (`lowPriorityThrottleMs = 200`, `mediumPriorityThrottleMs = 10`,
  /// refetch-on-mount and focus-invalidation enabled).
  pub fn new(error_normalizer: impl Fn(FetchError<UserErr>) -> E + Send + Sync + 'static) -> Self {
    Self {
      debug_name: None,
      error_normalizer: Arc::new(error_normalizer),
      low_priority_throttle: Duration::from_millis(200),
      medium_priority_throttle: Duration::from_millis(10),
      dynamic_realtime_throttle: None,
      disable_refetch_on_mount: false,
      disable_refetch_on_window_focus: false,
      disable_initial_data_invalidation: false,
    }
  }

  pub fn with_debug_name(mut self, name: impl Into<String>) -> Self {
    self.debug_name = Some(name.into());
    self
  }

  pub fn with_low_priority_throttle(mut self, duration: Duration) -> Self {
    self.low_priority_throttle = duration;
    self
  }

  pub fn with_medium_priority_throttle(mut self, duration: Duration) -> Self {
    self.medium_priority_throttle = duration;
    self
  }

  pub fn with_dynamic_realtime_throttle(
    mut self,
    f: impl Fn(Duration) -> Duration + Send + Sync + 'static,
  ) -> Self {
    self.dynamic_realtime_throttle = Some(Arc::new(f));
    self
  }

  pub fn disable_refetch_on_mount(mut self) -> Self {
    self.disable_refetch_on_mount = true;
    self
  }

  pub fn disable_refetch_on_window_focus(mut self) -> Self {
    self.disable_refetch_on_window_focus = true;
    self
  }

  pub fn disable_initial_data_invalidation(mut self) -> Self {
    self.disable_initial_data_invalidation = true;
    self
  }

  pub(crate) fn orchestrator_config(&self) -> crate::orchestrator::OrchestratorConfig {
    crate::orchestrator::OrchestratorConfig {
      debug_name: self.debug_name.clone(),
      low_priority_throttle: self.low_priority_throttle,
      medium_priority_throttle: self.medium_priority_throttle,
      dynamic_realtime_throttle: self.dynamic_realtime_throttle.clone(),
    }
  }

  pub(crate) fn normalize(&self, err: FetchError<UserErr>) -> E {
    (self.error_normalizer)(err)
  }
}
