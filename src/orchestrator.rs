//! Per-resource fetch orchestrator: priority scheduler, abort discipline,
//! dynamic realtime throttling, and mutation gating (spec §4.B — the
//! algorithmic heart of this crate).
//!
//! Grounded on `query.rs`'s `Query<T>` (a fetch-state machine driven by
//! `tokio::spawn` + a channel back to the caller), generalized with the
//! priority/abort/mutation machinery the spec calls for. Every state
//! transition happens inside one short synchronous critical section
//! guarded by a `std::sync::Mutex`; `tokio::spawn` is used to hand the
//! user's fetch future to the runtime without ever holding that mutex
//! across an `.await` (spec §5).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::status::{FetchType, ScheduleResult};

/// A boxed future resolving to whether the fetch round-trip itself
/// succeeded (distinct from whether the *data* was committed — the
/// fetch body closure owns that decision and reports it here so the
/// orchestrator can update its duration-based throttle math).
pub type FetchFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// The user-supplied fetch callback, shared across every invocation for a
/// given resource (or, via `CollectionOrchestrator`, every key).
pub type FetchFn<P> = Arc<dyn Fn(FetchContext<P>, P) -> FetchFuture + Send + Sync>;

/// A function computing the realtime throttle window from the duration of
/// the last fetch. Supplying one activates dynamic RT throttling.
pub type DynamicRealtimeThrottle = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Events emitted by the orchestrator when a queued fetch actually starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorEvent {
  ScheduledFetchStarted,
  ScheduledRtFetchStarted,
}

/// Tunables for one orchestrator (spec §4.B "Configuration").
#[derive(Clone)]
pub struct OrchestratorConfig {
  pub debug_name: Option<String>,
  pub low_priority_throttle: Duration,
  pub medium_priority_throttle: Duration,
  pub dynamic_realtime_throttle: Option<DynamicRealtimeThrottle>,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      debug_name: None,
      low_priority_throttle: Duration::from_millis(200),
      medium_priority_throttle: Duration::from_millis(10),
      dynamic_realtime_throttle: None,
    }
  }
}

struct InProgress {
  start_time: Instant,
  on_end: Vec<Box<dyn FnOnce() + Send>>,
  rtu_on_end: Option<Box<dyn FnOnce() + Send>>,
}

struct OrchestratorState<P> {
  in_progress: Option<InProgress>,
  scheduled: Option<P>,
  realtime_scheduled: Option<AbortHandle>,
  last_fetch_start_time: Option<Instant>,
  last_fetch_duration: Option<Duration>,
  last_fetch_was_aborted: bool,
  mutation_is_in_progress: bool,
  last_mutation_id: u64,
  last_fetch_id: u64,
  abort_fetches_before_or_equal: u64,
  on_mutation_end: Option<Box<dyn FnOnce() + Send>>,
}

impl<P> Default for OrchestratorState<P> {
  fn default() -> Self {
    Self {
      in_progress: None,
      scheduled: None,
      realtime_scheduled: None,
      last_fetch_start_time: None,
      last_fetch_duration: None,
      last_fetch_was_aborted: false,
      mutation_is_in_progress: false,
      last_mutation_id: 0,
      last_fetch_id: 0,
      abort_fetches_before_or_equal: 0,
      on_mutation_end: None,
    }
  }
}

/// The context passed to the user's fetch callback (spec §3 `FetchContext`).
pub struct FetchContext<P> {
  orchestrator: Arc<FetchOrchestrator<P>>,
  fetch_id: u64,
  start_time: Instant,
}

impl<P: Clone + Send + Sync + 'static> FetchContext<P> {
  /// True iff this fetch's result must be discarded: a newer fetch has
  /// started, a mutation is in progress, or this fetch was retroactively
  /// aborted by `start_mutation`. Calling this while it evaluates to true
  /// also marks `last_fetch_was_aborted`, so `await_fetch` can observe it.
  pub fn should_abort(&self) -> bool {
    let mut st = self.orchestrator.state.lock().unwrap();
    let aborted = self.fetch_id != st.last_fetch_id
      || st.mutation_is_in_progress
      || self.fetch_id <= st.abort_fetches_before_or_equal;
    if aborted {
      st.last_fetch_was_aborted = true;
    }
    aborted
  }

  /// Wall-clock start time of this fetch (monotonic `Instant`, so duration
  /// math is exact even when the system clock changes).
  pub fn start_time(&self) -> Instant {
    self.start_time
  }
}

/// A handle returned by `start_mutation`; call `end()` exactly once when
/// the mutation's own network round-trip completes.
pub struct MutationGuard<P> {
  orchestrator: Arc<FetchOrchestrator<P>>,
  mutation_id: u64,
}

impl<P: Clone + Send + Sync + 'static> MutationGuard<P> {
  /// Ends the mutation. Returns `true` iff this was still the most recent
  /// mutation (an older `end()` call after a newer `start_mutation` is a
  /// no-op that returns `false`).
  pub fn end(self) -> bool {
    self.orchestrator.end_mutation(self.mutation_id)
  }
}

/// The per-resource fetch scheduler (spec §4.B).
pub struct FetchOrchestrator<P> {
  fetch_fn: FetchFn<P>,
  config: OrchestratorConfig,
  state: Mutex<OrchestratorState<P>>,
  listener: Mutex<Option<Arc<dyn Fn(OrchestratorEvent) + Send + Sync>>>,
}

impl<P: Clone + Send + Sync + 'static> FetchOrchestrator<P> {
  pub fn new(fetch_fn: FetchFn<P>, config: OrchestratorConfig) -> Arc<Self> {
    Arc::new(Self {
      fetch_fn,
      config,
      state: Mutex::new(OrchestratorState::default()),
      listener: Mutex::new(None),
    })
  }

  /// Register a listener for `scheduled-fetch-started` /
  /// `scheduled-rt-fetch-started` events.
  pub fn on_event(&self, listener: impl Fn(OrchestratorEvent) + Send + Sync + 'static) {
    *self.listener.lock().unwrap() = Some(Arc::new(listener));
  }

  fn emit(&self, event: OrchestratorEvent) {
    let listener = self.listener.lock().unwrap().clone();
    if let Some(listener) = listener {
      listener(event);
    }
  }

  pub fn has_pending_fetch(&self) -> bool {
    self.state.lock().unwrap().scheduled.is_some()
  }

  pub fn fetch_is_in_progress(&self) -> bool {
    self.state.lock().unwrap().in_progress.is_some()
  }

  pub fn mutation_is_in_progress(&self) -> bool {
    self.state.lock().unwrap().mutation_is_in_progress
  }

  fn name(&self) -> &str {
    self.config.debug_name.as_deref().unwrap_or("unnamed")
  }

  /// Restore all fields to their initial values (test teardown).
  pub fn reset(&self) {
    let mut st = self.state.lock().unwrap();
    if let Some(handle) = st.realtime_scheduled.take() {
      handle.abort();
    }
    *st = OrchestratorState::default();
  }

  /// §4.B `scheduleFetch`.
  pub fn schedule_fetch(self: &Arc<Self>, fetch_type: FetchType, params: P) -> ScheduleResult {
    let mut st = self.state.lock().unwrap();
    self.schedule_fetch_locked(&mut st, fetch_type, params)
  }

  fn schedule_fetch_locked(
    self: &Arc<Self>,
    st: &mut OrchestratorState<P>,
    fetch_type: FetchType,
    params: P,
  ) -> ScheduleResult {
    let now = Instant::now();

    // Step 1: cold upgrade.
    let mut fetch_type = fetch_type;
    if st.last_fetch_start_time.is_none() {
      fetch_type = FetchType::HighPriority;
    }

    // Step 2: dynamic RT branch.
    if fetch_type == FetchType::RealtimeUpdate && self.config.dynamic_realtime_throttle.is_some()
    {
      if self.try_schedule_rtu_locked(st, now, params.clone()) {
        return ScheduleResult::RtScheduled;
      }
      // addDelayedRTU/scheduleRTU returned false: fall through as a
      // normal highPriority schedule.
      fetch_type = FetchType::HighPriority;
    }

    // Step 3.
    if self.should_skip_locked(st, fetch_type, now) {
      tracing::debug!(name = self.name(), ?fetch_type, "skipping fetch");
      return ScheduleResult::Skipped;
    }

    // Step 4.
    if self.should_schedule_locked(st, fetch_type) {
      tracing::debug!(name = self.name(), ?fetch_type, "queuing fetch behind in-flight work");
      st.scheduled = Some(params);
      return ScheduleResult::Scheduled;
    }

    // Step 5.
    tracing::debug!(name = self.name(), ?fetch_type, "starting fetch");
    self.start_fetch_locked(st, params, now);
    ScheduleResult::Started
  }

  fn should_skip_locked(&self, st: &OrchestratorState<P>, ft: FetchType, now: Instant) -> bool {
    match ft {
      FetchType::HighPriority => st
        .in_progress
        .as_ref()
        .is_some_and(|ip| now.saturating_duration_since(ip.start_time) < self.config.medium_priority_throttle),
      FetchType::LowPriority => {
        st.in_progress.is_some()
          || st.scheduled.is_some()
          || st.mutation_is_in_progress
          || st.last_fetch_start_time.is_some_and(|t| {
            now.saturating_duration_since(t) < self.config.low_priority_throttle
          })
      }
      FetchType::RealtimeUpdate => false,
    }
  }

  fn should_schedule_locked(&self, st: &OrchestratorState<P>, ft: FetchType) -> bool {
    match ft {
      FetchType::LowPriority => false,
      _ => st.in_progress.is_some() || st.mutation_is_in_progress,
    }
  }

  /// §4.B `startFetch` steps 1-3 (the synchronous part); spawns a task
  /// that runs the user callback and then applies steps 5-7 via
  /// `finish_fetch`.
  fn start_fetch_locked(self: &Arc<Self>, st: &mut OrchestratorState<P>, params: P, start_time: Instant) {
    st.last_fetch_id += 1;
    let fetch_id = st.last_fetch_id;
    let prior_last_start = st.last_fetch_start_time;
    st.last_fetch_start_time = Some(start_time);
    st.last_fetch_was_aborted = false;
    st.in_progress = Some(InProgress {
      start_time,
      on_end: Vec::new(),
      rtu_on_end: None,
    });
    if let Some(handle) = st.realtime_scheduled.take() {
      handle.abort();
    }

    let me = Arc::clone(self);
    let fetch_fn = Arc::clone(&self.fetch_fn);
    let params_for_task = params;
    tokio::spawn(async move {
      let ctx = FetchContext {
        orchestrator: Arc::clone(&me),
        fetch_id,
        start_time,
      };
      let result = fetch_fn(ctx, params_for_task).await;
      me.finish_fetch(fetch_id, start_time, prior_last_start, result);
    });
  }

  /// §4.B `startFetch` steps 5-7, run after the user future resolves.
  fn finish_fetch(
    self: &Arc<Self>,
    _fetch_id: u64,
    start_time: Instant,
    prior_last_start: Option<Instant>,
    result: bool,
  ) {
    let (on_end, rtu_on_end, should_flush) = {
      let mut st = self.state.lock().unwrap();

      // Step 5: in_progress cleared externally (start_mutation) while we
      // were awaiting the user future.
      if st.in_progress.is_none() {
        st.last_fetch_start_time = prior_last_start;
        tracing::warn!(name = self.name(), "fetch commit discarded, mutation started mid-flight");
        return;
      }

      // Step 6.
      if st.last_fetch_was_aborted {
        tracing::warn!(name = self.name(), "fetch commit discarded, superseded or aborted");
      } else if result {
        st.last_fetch_duration = Some(start_time.elapsed());
        tracing::info!(name = self.name(), elapsed_ms = start_time.elapsed().as_millis() as u64, "fetch completed");
      }

      // Step 7.
      if let Some(handle) = st.realtime_scheduled.take() {
        handle.abort();
      }
      let in_progress = st.in_progress.take().unwrap();
      let should_flush = st.scheduled.is_some();
      (in_progress.on_end, in_progress.rtu_on_end, should_flush)
    };

    for cb in on_end {
      cb();
    }
    if let Some(cb) = rtu_on_end {
      cb();
    }
    if should_flush {
      self.flush_scheduled();
    }
  }

  /// §4.B `flushScheduled`.
  fn flush_scheduled(self: &Arc<Self>) {
    let mut st = self.state.lock().unwrap();
    if let Some(params) = st.scheduled.take() {
      self.emit(OrchestratorEvent::ScheduledFetchStarted);
      let now = Instant::now();
      self.start_fetch_locked(&mut st, params, now);
    }
  }

  /// §4.B `startMutation`.
  pub fn start_mutation(self: &Arc<Self>) -> MutationGuard<P> {
    let mut st = self.state.lock().unwrap();
    st.mutation_is_in_progress = true;
    st.abort_fetches_before_or_equal = st.last_fetch_id;
    st.in_progress = None;
    st.last_mutation_id += 1;
    MutationGuard {
      orchestrator: Arc::clone(self),
      mutation_id: st.last_mutation_id,
    }
  }

  fn end_mutation(self: &Arc<Self>, mutation_id: u64) -> bool {
    let (is_latest, on_mutation_end) = {
      let mut st = self.state.lock().unwrap();
      let is_latest = st.last_mutation_id == mutation_id;
      let on_mutation_end = if is_latest {
        st.mutation_is_in_progress = false;
        st.on_mutation_end.take()
      } else {
        None
      };
      (is_latest, on_mutation_end)
    };
    if is_latest {
      if let Some(cb) = on_mutation_end {
        cb();
      }
      self.flush_scheduled();
    }
    is_latest
  }

  /// §4.B `scheduleRTU`. Returns `true` if the realtime update was
  /// coalesced/queued (caller should treat the schedule as
  /// `rt-scheduled`); `false` if dynamic throttling doesn't apply right
  /// now and the caller should fall through to a normal highPriority
  /// schedule.
  fn try_schedule_rtu_locked(self: &Arc<Self>, st: &mut OrchestratorState<P>, now: Instant, params: P) -> bool {
    let duration = st.last_fetch_duration;
    let start = st.last_fetch_start_time;
    if self.config.dynamic_realtime_throttle.is_none() {
      return false;
    }
    if duration.is_none_or(|d| d.is_zero()) || start.is_none() {
      return false;
    }

    if st.realtime_scheduled.is_some() {
      return true;
    }

    if st.in_progress.is_some() {
      let me = Arc::clone(self);
      let params = params.clone();
      st.in_progress.as_mut().unwrap().rtu_on_end = Some(Box::new(move || {
        me.reattempt_delayed_rtu(params);
      }));
      return true;
    }

    if st.mutation_is_in_progress {
      let me = Arc::clone(self);
      let params = params.clone();
      st.on_mutation_end = Some(Box::new(move || {
        me.reattempt_delayed_rtu(params);
      }));
      return true;
    }

    self.add_delayed_rtu_locked(st, now, params)
  }

  /// Re-attempt `addDelayedRTU` once the condition that deferred it
  /// (an in-flight fetch, or an in-flight mutation) has cleared. If
  /// throttling no longer applies, start the realtime fetch immediately
  /// rather than silently dropping it.
  fn reattempt_delayed_rtu(self: &Arc<Self>, params: P) {
    let mut st = self.state.lock().unwrap();
    let now = Instant::now();
    if !self.add_delayed_rtu_locked(&mut st, now, params.clone()) {
      self.emit(OrchestratorEvent::ScheduledRtFetchStarted);
      self.start_fetch_locked(&mut st, params, now);
    }
  }

  /// §4.B `addDelayedRTU`.
  fn add_delayed_rtu_locked(self: &Arc<Self>, st: &mut OrchestratorState<P>, now: Instant, params: P) -> bool {
    let last_start = st.last_fetch_start_time.unwrap();
    let last_duration = st.last_fetch_duration.unwrap();
    let idle_since = now.saturating_duration_since(last_start + last_duration);
    let min_interval = (self.config.dynamic_realtime_throttle.as_ref().unwrap())(last_duration);

    if idle_since >= min_interval {
      return false;
    }

    let delay = min_interval - idle_since;
    let me = Arc::clone(self);
    let params = params.clone();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      me.on_rtu_timer_fire(params);
    });
    st.realtime_scheduled = Some(handle.abort_handle());
    true
  }

  fn on_rtu_timer_fire(self: &Arc<Self>, params: P) {
    let mut st = self.state.lock().unwrap();
    st.realtime_scheduled = None;
    self.emit(OrchestratorEvent::ScheduledRtFetchStarted);
    let now = Instant::now();
    self.start_fetch_locked(&mut st, params, now);
  }

  /// Lets an external bulk fetch (the list-query store's query-level
  /// fetch) tell this per-item orchestrator "treat this as my most recent
  /// fetch", so item-level low/medium-priority throttling accounts for
  /// data that arrived via a list fetch rather than a direct item fetch.
  pub fn note_external_fetch_start(&self, start_time: Instant) {
    let mut st = self.state.lock().unwrap();
    if st.last_fetch_start_time.is_none_or(|t| start_time > t) {
      st.last_fetch_start_time = Some(start_time);
    }
  }

  /// §4.B `awaitFetch`.
  pub async fn await_fetch(self: &Arc<Self>, params: P) -> bool {
    let rx = {
      let mut st = self.state.lock().unwrap();
      self.schedule_fetch_locked(&mut st, FetchType::HighPriority, params);
      st.in_progress.as_mut().map(|ip| {
        let (tx, rx) = tokio::sync::oneshot::channel();
        ip.on_end.push(Box::new(move || {
          let _ = tx.send(());
        }));
        rx
      })
    };
    if let Some(rx) = rx {
      let _ = rx.await;
    }
    self.state.lock().unwrap().last_fetch_was_aborted
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn counting_fetch_fn(
    counter: Arc<AtomicU32>,
    delay: Duration,
  ) -> FetchFn<()> {
    Arc::new(move |_ctx, _params| {
      let counter = Arc::clone(&counter);
      Box::pin(async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        true
      })
    })
  }

  #[tokio::test(start_paused = true)]
  async fn overfetching_collapses_to_one_network_call() {
    let counter = Arc::new(AtomicU32::new(0));
    let orchestrator =
      FetchOrchestrator::new(counting_fetch_fn(Arc::clone(&counter), Duration::from_millis(200)), OrchestratorConfig::default());

    orchestrator.schedule_fetch(FetchType::HighPriority, ());
    tokio::time::advance(Duration::from_millis(10)).await;
    orchestrator.schedule_fetch(FetchType::HighPriority, ());
    tokio::time::advance(Duration::from_millis(10)).await;
    orchestrator.schedule_fetch(FetchType::HighPriority, ());
    tokio::time::advance(Duration::from_millis(10)).await;
    orchestrator.schedule_fetch(FetchType::HighPriority, ());

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn low_priority_throttle_skips_then_starts() {
    let counter = Arc::new(AtomicU32::new(0));
    let orchestrator = FetchOrchestrator::new(
      counting_fetch_fn(Arc::clone(&counter), Duration::from_millis(1)),
      OrchestratorConfig::default(),
    );

    let r1 = orchestrator.schedule_fetch(FetchType::LowPriority, ());
    assert_eq!(r1, ScheduleResult::Started); // cold -> upgraded to highPriority
    tokio::time::advance(Duration::from_millis(5)).await;

    let r2 = orchestrator.schedule_fetch(FetchType::LowPriority, ());
    assert_eq!(r2, ScheduleResult::Skipped);

    tokio::time::advance(Duration::from_millis(100)).await;
    let r3 = orchestrator.schedule_fetch(FetchType::LowPriority, ());
    assert_eq!(r3, ScheduleResult::Skipped);

    tokio::time::advance(Duration::from_millis(210)).await;
    let r4 = orchestrator.schedule_fetch(FetchType::LowPriority, ());
    assert_eq!(r4, ScheduleResult::Started);
  }

  #[tokio::test(start_paused = true)]
  async fn mutation_aborts_in_flight_fetch_and_flushes_after() {
    let observed_abort = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let observed_abort_writer = Arc::clone(&observed_abort);
    let started = Arc::new(AtomicU32::new(0));
    let started_writer = Arc::clone(&started);

    let fetch_fn: FetchFn<()> = Arc::new(move |ctx, _params| {
      started_writer.fetch_add(1, Ordering::SeqCst);
      let observed_abort = Arc::clone(&observed_abort_writer);
      Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if ctx.should_abort() {
          observed_abort.store(true, Ordering::SeqCst);
          return false;
        }
        true
      })
    });

    let orchestrator = FetchOrchestrator::new(fetch_fn, OrchestratorConfig::default());
    orchestrator.schedule_fetch(FetchType::HighPriority, ());
    tokio::time::advance(Duration::from_millis(50)).await;

    let mutation = orchestrator.start_mutation();
    assert!(orchestrator.mutation_is_in_progress());

    tokio::time::advance(Duration::from_millis(100)).await;
    assert!(observed_abort.load(Ordering::SeqCst));

    // A schedule while mutating is queued, not started.
    let r = orchestrator.schedule_fetch(FetchType::HighPriority, ());
    assert_eq!(r, ScheduleResult::Scheduled);
    assert_eq!(started.load(Ordering::SeqCst), 1);

    let was_latest = mutation.end();
    assert!(was_latest);
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn realtime_dynamic_throttle_coalesces_updates() {
    let started = Arc::new(AtomicU32::new(0));
    let started_writer = Arc::clone(&started);
    let fetch_fn: FetchFn<()> = Arc::new(move |_ctx, _params| {
      started_writer.fetch_add(1, Ordering::SeqCst);
      Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(1600)).await;
        true
      })
    });

    let config = OrchestratorConfig {
      dynamic_realtime_throttle: Some(Arc::new(|d: Duration| {
        let over = d.as_millis() as f64 - 400.0;
        let ms = over.max(0.0).powf(2.6).min(60_000.0);
        Duration::from_millis(ms as u64)
      })),
      ..Default::default()
    };
    let orchestrator = FetchOrchestrator::new(fetch_fn, config);

    // Cold start, upgraded to highPriority, runs the 1600ms fetch.
    orchestrator.schedule_fetch(FetchType::RealtimeUpdate, ());
    tokio::time::advance(Duration::from_millis(1650)).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);

    orchestrator.schedule_fetch(FetchType::RealtimeUpdate, ());
    tokio::time::advance(Duration::from_millis(230)).await; // total +250ms
    orchestrator.schedule_fetch(FetchType::RealtimeUpdate, ());
    tokio::time::advance(Duration::from_millis(220)).await; // total +470ms
    orchestrator.schedule_fetch(FetchType::RealtimeUpdate, ());

    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(started.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn reset_restores_initial_state() {
    let counter = Arc::new(AtomicU32::new(0));
    let orchestrator = FetchOrchestrator::new(
      counting_fetch_fn(Arc::clone(&counter), Duration::from_millis(1)),
      OrchestratorConfig::default(),
    );
    orchestrator.schedule_fetch(FetchType::HighPriority, ());
    tokio::time::advance(Duration::from_millis(5)).await;
    orchestrator.reset();
    assert!(!orchestrator.fetch_is_in_progress());
    assert!(!orchestrator.has_pending_fetch());
    assert!(!orchestrator.mutation_is_in_progress());
  }
}
