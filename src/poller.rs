//! Inventory reconciliation loop.
//!
//! Fetches the full workload list on a fixed interval and publishes it as an
//! immutable snapshot. At most one list fetch is ever outstanding: scheduled
//! ticks that find a fetch in flight are dropped, and forced refreshes that
//! find one in flight are folded into a single trailing re-fetch.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::ConsoleApi;
use crate::model::Workload;
use crate::session::SessionGuard;
use crate::timer::{StopFlag, TimerHandle};

#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    pub workloads: Arc<Vec<Workload>>,
    /// Incremented on every successful fetch; 0 means nothing fetched yet.
    pub generation: u64,
    pub fetched_at: Option<String>,
    /// Last non-auth fetch error, cleared by the next successful fetch.
    pub error: Option<String>,
}

impl InventorySnapshot {
    pub fn find(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    /// A fetch was already in flight; this request was dropped.
    Skipped,
    /// A fetch was already in flight; it will fetch once more when done.
    Coalesced,
    Failed,
    SessionLost,
}

type SnapshotCallback = Arc<dyn Fn(&InventorySnapshot) + Send + Sync>;

#[derive(Debug, Default)]
struct Flight {
    in_flight: bool,
    rerun: bool,
}

/// Holds the single list-fetch slot. Both flags live under one lock so a
/// coalesced refresh and the end of a flight can never interleave.
struct FlightGuard<'a> {
    state: &'a Mutex<Flight>,
    released: bool,
}

impl<'a> FlightGuard<'a> {
    fn acquire(state: &'a Mutex<Flight>, forced: bool) -> Result<Self, RefreshOutcome> {
        let mut f = state.lock().unwrap_or_else(PoisonError::into_inner);
        if f.in_flight {
            if forced {
                f.rerun = true;
                return Err(RefreshOutcome::Coalesced);
            }
            return Err(RefreshOutcome::Skipped);
        }
        *f = Flight {
            in_flight: true,
            rerun: false,
        };
        Ok(FlightGuard {
            state,
            released: false,
        })
    }

    /// Returns true when a refresh was coalesced during the last fetch and the
    /// slot is kept for another one; otherwise the slot is released.
    fn rerun_or_release(&mut self) -> bool {
        let mut f = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if f.rerun {
            f.rerun = false;
            return true;
        }
        f.in_flight = false;
        self.released = true;
        false
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Flight::default();
        }
    }
}

pub struct InventoryPoller {
    api: Arc<dyn ConsoleApi>,
    guard: Arc<SessionGuard>,
    snapshot: Mutex<InventorySnapshot>,
    flight: Mutex<Flight>,
    timer: Mutex<Option<TimerHandle>>,
    callbacks: Mutex<Vec<SnapshotCallback>>,
}

impl InventoryPoller {
    pub fn new(api: Arc<dyn ConsoleApi>, guard: Arc<SessionGuard>) -> Arc<Self> {
        Arc::new(Self {
            api,
            guard,
            snapshot: Mutex::new(InventorySnapshot::default()),
            flight: Mutex::new(Flight::default()),
            timer: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Begin polling. The first tick fires immediately. Calling `start` again
    /// replaces the running schedule.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        self.stop();
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = TimerHandle::spawn("inventory-poller", move |stop| async move {
            let origin = Instant::now();
            let mut ticker = tokio::time::interval_at(origin, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if stop.is_stopped() {
                    break;
                }
                let Some(poller) = weak.upgrade() else {
                    break;
                };
                if poller.tick(&stop).await == RefreshOutcome::SessionLost {
                    break;
                }
                drop(poller);
                // Ticks that came due during the fetch are dropped, not fired late.
                ticker.reset_at(next_boundary(origin, interval, Instant::now()));
            }
        });
        tracing::info!(interval = ?interval, "inventory polling started");
        self.guard.register_timer(handle.clone());
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Safe to call repeatedly; no tick runs after this returns.
    pub fn stop(&self) {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(t) = timer {
            if t.cancel() {
                tracing::info!("inventory polling stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Fetch now, outside the schedule. Never overlaps an outstanding fetch.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.run(None, true).await
    }

    async fn tick(&self, stop: &StopFlag) -> RefreshOutcome {
        self.run(Some(stop), false).await
    }

    async fn run(&self, stop: Option<&StopFlag>, forced: bool) -> RefreshOutcome {
        if !self.guard.is_active() {
            self.guard.on_auth_failure();
            return RefreshOutcome::SessionLost;
        }
        let mut flight = match FlightGuard::acquire(&self.flight, forced) {
            Ok(f) => f,
            Err(outcome) => {
                if outcome == RefreshOutcome::Coalesced {
                    tracing::debug!("refresh coalesced into in-flight fetch");
                } else {
                    tracing::debug!("tick skipped, fetch in flight");
                }
                return outcome;
            }
        };
        loop {
            let outcome = self.fetch_once(stop).await;
            if outcome == RefreshOutcome::SessionLost || stop.is_some_and(StopFlag::is_stopped) {
                return outcome;
            }
            if !flight.rerun_or_release() {
                return outcome;
            }
        }
    }

    async fn fetch_once(&self, stop: Option<&StopFlag>) -> RefreshOutcome {
        let res = self.api.list_pods().await;
        if stop.is_some_and(StopFlag::is_stopped) {
            return RefreshOutcome::Skipped;
        }
        match res {
            Ok(workloads) => {
                let count = workloads.len();
                let snap = self.update(|s| InventorySnapshot {
                    workloads: Arc::new(workloads),
                    generation: s.generation + 1,
                    fetched_at: Some(now_rfc3339()),
                    error: None,
                });
                tracing::debug!(generation = snap.generation, workloads = count, "inventory refreshed");
                RefreshOutcome::Updated
            }
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(error = %e, "inventory fetch unauthorized");
                self.guard.on_auth_failure();
                RefreshOutcome::SessionLost
            }
            Err(e) => {
                tracing::warn!(error = %e, "inventory fetch failed");
                let message = e.user_message("Failed to load workloads");
                self.update(|s| InventorySnapshot {
                    error: Some(message),
                    ..s.clone()
                });
                RefreshOutcome::Failed
            }
        }
    }

    /// Replace the snapshot atomically and notify subscribers outside the lock.
    fn update(&self, f: impl FnOnce(&InventorySnapshot) -> InventorySnapshot) -> InventorySnapshot {
        let snap = {
            let mut cur = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            *cur = f(&cur);
            cur.clone()
        };
        let callbacks: Vec<SnapshotCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for cb in callbacks {
            cb(&snap);
        }
        snap
    }

    pub fn on_snapshot(&self, callback: impl Fn(&InventorySnapshot) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// First multiple of `period` after `origin` that lies strictly after `now`.
fn next_boundary(origin: Instant, period: Duration, now: Instant) -> Instant {
    let period_ns = period.as_nanos().max(1);
    let elapsed_ns = now.saturating_duration_since(origin).as_nanos();
    let k = elapsed_ns / period_ns + 1;
    u64::try_from(k * period_ns)
        .ok()
        .and_then(|ns| origin.checked_add(Duration::from_nanos(ns)))
        .unwrap_or(now + period)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ApiError;
    use crate::api::fake::FakeApi;
    use crate::session::Session;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup(pods: Vec<Workload>) -> (Arc<FakeApi>, Arc<SessionGuard>, Arc<InventoryPoller>) {
        let fake = FakeApi::with_pods(pods);
        let guard = Arc::new(SessionGuard::new(
            Some(Session::new("tok", "acme", false)),
            None,
        ));
        let poller = InventoryPoller::new(fake.clone(), guard.clone());
        (fake, guard, poller)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_never_overlap_an_outstanding_fetch() {
        let (fake, _guard, poller) = setup(vec![Workload::new("a", "nginx")]);
        let _gate = fake.hold();
        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fake.list_calls(), 1);

        // Many intervals pass while the first fetch is held open.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.list_calls(), 1);
        assert_eq!(poller.force_refresh().await, RefreshOutcome::Coalesced);

        fake.release();
        tokio::time::sleep(Duration::from_millis(10)).await;
        // One trailing fetch for the coalesced refresh, none for the skipped ticks.
        assert_eq!(fake.list_calls(), 2);
        assert!(!fake.overlap_detected.load(Ordering::SeqCst));
        assert_eq!(poller.snapshot().workloads.len(), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_missed_during_a_fetch_do_not_fire_late() {
        let (fake, _guard, poller) = setup(vec![Workload::new("a", "nginx")]);
        let _gate = fake.hold();
        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(9_510)).await;
        assert_eq!(fake.list_calls(), 1);

        fake.release();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.list_calls(), 1);

        // Schedule resumes on the next period boundary.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fake.list_calls(), 2);
        poller.stop();
    }

    #[test]
    fn coalesced_refresh_keeps_the_flight_until_rerun() {
        let state = Mutex::new(Flight::default());
        let mut first = FlightGuard::acquire(&state, false).unwrap();
        assert_eq!(
            FlightGuard::acquire(&state, true).err(),
            Some(RefreshOutcome::Coalesced)
        );
        // The coalesced request is honoured before the slot is given up.
        assert!(first.rerun_or_release());
        assert_eq!(
            FlightGuard::acquire(&state, false).err(),
            Some(RefreshOutcome::Skipped)
        );
        assert!(!first.rerun_or_release());

        let second = FlightGuard::acquire(&state, false).unwrap();
        drop(first);
        assert_eq!(
            FlightGuard::acquire(&state, true).err(),
            Some(RefreshOutcome::Coalesced)
        );
        drop(second);
        assert!(FlightGuard::acquire(&state, false).is_ok());
    }

    #[test]
    fn next_boundary_skips_missed_periods() {
        let origin = Instant::now();
        let s = Duration::from_secs(1);
        assert_eq!(next_boundary(origin, s, origin), origin + s);
        assert_eq!(
            next_boundary(origin, s, origin + Duration::from_millis(9_510)),
            origin + Duration::from_secs(10)
        );
        assert_eq!(next_boundary(origin, s, origin + s * 2), origin + s * 3);
    }

    #[tokio::test]
    async fn non_auth_error_keeps_snapshot_and_sets_flag() {
        let (fake, guard, poller) = setup(vec![Workload::new("a", "nginx")]);
        assert_eq!(poller.force_refresh().await, RefreshOutcome::Updated);
        let before = poller.snapshot();

        fake.fail_next(ApiError::Transport("timeout".into()));
        assert_eq!(poller.force_refresh().await, RefreshOutcome::Failed);
        let after = poller.snapshot();
        assert_eq!(after.workloads, before.workloads);
        assert_eq!(after.generation, before.generation);
        assert_eq!(after.error.as_deref(), Some("Failed to load workloads"));
        assert!(guard.is_active());

        assert_eq!(poller.force_refresh().await, RefreshOutcome::Updated);
        assert!(poller.snapshot().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn errors_do_not_stop_the_schedule() {
        let (fake, _guard, poller) = setup(vec![]);
        fake.fail_next(ApiError::Transport("down".into()));
        poller.start(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(poller.snapshot().error.is_some());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.list_calls(), 2);
        assert!(poller.snapshot().error.is_none());
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_tears_down_and_stops_ticking() {
        let (fake, guard, poller) = setup(vec![]);
        let redirect = guard.redirects();
        fake.fail_next(ApiError::Unauthorized { status: 401 });
        poller.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(guard.current_credential().is_none());
        assert!(*redirect.borrow());
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.list_calls(), 1);
        assert_eq!(guard.redirect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_final() {
        let (fake, _guard, poller) = setup(vec![]);
        poller.start(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(3)).await;
        let seen = fake.list_calls();
        assert_eq!(seen, 2);
        poller.stop();
        poller.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fake.list_calls(), seen);
    }

    #[tokio::test]
    async fn subscribers_see_whole_snapshots() {
        let (_fake, _guard, poller) = setup(vec![
            Workload::new("a", "nginx"),
            Workload::new("b", "redis"),
        ]);
        let seen = Arc::new(AtomicUsize::new(0));
        let s2 = seen.clone();
        poller.on_snapshot(move |snap| {
            s2.store(snap.workloads.len(), Ordering::SeqCst);
        });
        poller.force_refresh().await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(poller.snapshot().find("b").is_some());
    }

    #[tokio::test]
    async fn no_session_means_no_fetch() {
        let fake = FakeApi::with_pods(vec![]);
        let guard = Arc::new(SessionGuard::new(None, None));
        let poller = InventoryPoller::new(fake.clone(), guard.clone());
        assert_eq!(poller.force_refresh().await, RefreshOutcome::SessionLost);
        assert_eq!(fake.list_calls(), 0);
        assert_eq!(guard.redirect_count(), 1);
    }
}
