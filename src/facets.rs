//! On-demand secondary views of one workload.
//!
//! At most one workload is open at a time. Selecting a data-bearing facet
//! fetches it; only the metrics facet refreshes itself, on a timer that lives
//! exactly as long as the facet stays selected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::api::error::{ApiError, ApiResult};
use crate::api::ConsoleApi;
use crate::model::{EnvVars, MetricsSample, VolumeDescriptor};
use crate::session::SessionGuard;
use crate::timer::{StopFlag, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FacetKind {
    #[default]
    Info,
    Logs,
    Metrics,
    Environment,
    Storage,
}

impl FacetKind {
    pub const ALL: [FacetKind; 5] = [
        FacetKind::Info,
        FacetKind::Logs,
        FacetKind::Metrics,
        FacetKind::Environment,
        FacetKind::Storage,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FacetKind::Info => "Info",
            FacetKind::Logs => "Logs",
            FacetKind::Metrics => "Metrics",
            FacetKind::Environment => "Env",
            FacetKind::Storage => "Storage",
        }
    }

    /// Info is rendered from the inventory record and never fetched.
    pub fn needs_fetch(self) -> bool {
        self != FacetKind::Info
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FacetData {
    Logs(String),
    Metrics(MetricsSample),
    Environment(EnvVars),
    Storage(Vec<VolumeDescriptor>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FacetView {
    Info,
    Loading,
    Ready(FacetData),
    /// Scoped to this facet; nothing else is affected.
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FacetUpdate {
    pub key: String,
    pub facet: FacetKind,
    pub view: FacetView,
}

type FacetCallback = Arc<dyn Fn(&FacetUpdate) + Send + Sync>;

#[derive(Default)]
struct Detail {
    key: Option<String>,
    facet: FacetKind,
    /// Bumped on every open, close and facet change. Results carrying an
    /// older epoch are discarded.
    epoch: u64,
    views: HashMap<FacetKind, FacetView>,
}

pub struct DetailFacetLoader {
    api: Arc<dyn ConsoleApi>,
    guard: Arc<SessionGuard>,
    metrics_interval: Duration,
    detail: Mutex<Detail>,
    metrics_timer: Mutex<Option<TimerHandle>>,
    pending: Mutex<Option<AbortHandle>>,
    callbacks: Mutex<Vec<FacetCallback>>,
}

impl DetailFacetLoader {
    pub fn new(
        api: Arc<dyn ConsoleApi>,
        guard: Arc<SessionGuard>,
        metrics_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            guard,
            metrics_interval,
            detail: Mutex::new(Detail::default()),
            metrics_timer: Mutex::new(None),
            pending: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    /// Open `key`. When another workload is already open on a data-bearing
    /// facet, that facet is kept and fetched for the new workload.
    pub fn open(self: &Arc<Self>, key: &str) {
        self.halt_work();
        let (epoch, facet) = {
            let mut d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
            if d.key.is_none() {
                d.facet = FacetKind::Info;
            }
            d.key = Some(key.to_string());
            d.epoch += 1;
            d.views.clear();
            (d.epoch, d.facet)
        };
        tracing::debug!(key, facet = facet.label(), "detail opened");
        self.enter(key, facet, epoch);
    }

    /// Close the detail view. The metrics timer is cancelled before this returns.
    pub fn close(&self) {
        self.halt_work();
        let mut d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = d.key.take() {
            tracing::debug!(key = %key, "detail closed");
        }
        d.epoch += 1;
        d.facet = FacetKind::Info;
        d.views.clear();
    }

    /// Switch facets. Re-selecting the current facet reloads it. Ignored while closed.
    pub fn select_facet(self: &Arc<Self>, facet: FacetKind) {
        let (key, epoch) = {
            let mut d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(key) = d.key.clone() else {
                return;
            };
            d.facet = facet;
            d.epoch += 1;
            (key, d.epoch)
        };
        self.halt_work();
        self.enter(&key, facet, epoch);
    }

    pub fn on_data(&self, callback: impl Fn(&FacetUpdate) + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Open workload and its selected facet.
    pub fn current(&self) -> Option<(String, FacetKind)> {
        let d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
        d.key.clone().map(|k| (k, d.facet))
    }

    /// View of the selected facet, or `None` when closed.
    pub fn view(&self) -> Option<FacetView> {
        let facet = self.current()?.1;
        self.view_of(facet)
    }

    pub fn view_of(&self, facet: FacetKind) -> Option<FacetView> {
        let d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
        d.key.as_ref()?;
        if facet == FacetKind::Info {
            return Some(FacetView::Info);
        }
        d.views.get(&facet).cloned()
    }

    pub fn metrics_timer_running(&self) -> bool {
        self.metrics_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Cancel the metrics timer and any one-shot fetch still running.
    fn halt_work(&self) {
        if let Some(t) = self
            .metrics_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            t.cancel();
        }
        if let Some(h) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            h.abort();
        }
    }

    fn enter(self: &Arc<Self>, key: &str, facet: FacetKind, epoch: u64) {
        if !facet.needs_fetch() {
            self.emit(FacetUpdate {
                key: key.to_string(),
                facet,
                view: FacetView::Info,
            });
            return;
        }
        self.mark_loading(key, facet, epoch);
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        if facet == FacetKind::Metrics {
            self.start_metrics_timer(weak, key, epoch);
        } else {
            let task = tokio::spawn(async move {
                if let Some(loader) = weak.upgrade() {
                    let res = loader.load(&key, facet).await;
                    loader.apply(&key, facet, epoch, res);
                }
            });
            *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(task.abort_handle());
        }
    }

    fn start_metrics_timer(&self, weak: Weak<Self>, key: String, epoch: u64) {
        let interval = self.metrics_interval;
        let handle = TimerHandle::spawn("metrics-facet", move |stop: StopFlag| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if stop.is_stopped() {
                    break;
                }
                let Some(loader) = weak.upgrade() else {
                    break;
                };
                let res = loader.load(&key, FacetKind::Metrics).await;
                if stop.is_stopped() {
                    break;
                }
                loader.apply(&key, FacetKind::Metrics, epoch, res);
            }
        });
        self.guard.register_timer(handle.clone());
        *self
            .metrics_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn load(&self, key: &str, facet: FacetKind) -> ApiResult<FacetData> {
        Ok(match facet {
            FacetKind::Logs => FacetData::Logs(self.api.pod_logs(key).await?),
            FacetKind::Metrics => FacetData::Metrics(self.api.pod_metrics(key).await?),
            FacetKind::Environment => FacetData::Environment(self.api.get_env(key).await?),
            FacetKind::Storage => FacetData::Storage(self.api.list_storage(key).await?),
            FacetKind::Info => {
                return Err(ApiError::Decode("info facet has no remote data".into()))
            }
        })
    }

    fn mark_loading(&self, key: &str, facet: FacetKind, epoch: u64) {
        let view = {
            let mut d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
            if d.epoch != epoch {
                return;
            }
            // Keep showing the last data while it reloads.
            match d.views.get(&facet) {
                Some(FacetView::Ready(_)) => return,
                _ => {
                    d.views.insert(facet, FacetView::Loading);
                    FacetView::Loading
                }
            }
        };
        self.emit(FacetUpdate {
            key: key.to_string(),
            facet,
            view,
        });
    }

    fn apply(&self, key: &str, facet: FacetKind, epoch: u64, res: ApiResult<FacetData>) {
        let view = match res {
            Ok(data) => FacetView::Ready(data),
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(key, facet = facet.label(), "facet fetch unauthorized");
                self.guard.on_auth_failure();
                return;
            }
            Err(e) => {
                tracing::debug!(key, facet = facet.label(), error = %e, "facet fetch failed");
                FacetView::Error(e.user_message(&format!("Failed to load {}", facet.label().to_lowercase())))
            }
        };
        {
            let mut d = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
            if d.epoch != epoch || d.key.as_deref() != Some(key) {
                tracing::trace!(key, facet = facet.label(), "stale facet result dropped");
                return;
            }
            d.views.insert(facet, view.clone());
        }
        self.emit(FacetUpdate {
            key: key.to_string(),
            facet,
            view,
        });
    }

    fn emit(&self, update: FacetUpdate) {
        let callbacks: Vec<FacetCallback> = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for cb in callbacks {
            cb(&update);
        }
    }
}

impl Drop for DetailFacetLoader {
    fn drop(&mut self) {
        self.halt_work();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::model::Workload;
    use crate::session::Session;

    fn setup() -> (Arc<FakeApi>, Arc<SessionGuard>, Arc<DetailFacetLoader>) {
        let fake = FakeApi::with_pods(vec![Workload::new("db", "postgres")]);
        let guard = Arc::new(SessionGuard::new(
            Some(Session::new("tok", "acme", false)),
            None,
        ));
        let loader = DetailFacetLoader::new(fake.clone(), guard.clone(), Duration::from_secs(5));
        (fake, guard, loader)
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_timer_lives_only_while_selected() {
        let (fake, _guard, loader) = setup();
        loader.open("db");
        assert_eq!(loader.view(), Some(FacetView::Info));
        assert!(!loader.metrics_timer_running());

        loader.select_facet(FacetKind::Metrics);
        assert!(loader.metrics_timer_running());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fake.metrics_calls(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.metrics_calls(), 2);
        assert!(matches!(
            loader.view(),
            Some(FacetView::Ready(FacetData::Metrics(_)))
        ));

        loader.close();
        assert!(!loader.metrics_timer_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.metrics_calls(), 2);
        assert_eq!(loader.view(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_metrics_stops_its_timer() {
        let (fake, _guard, loader) = setup();
        loader.open("db");
        loader.select_facet(FacetKind::Metrics);
        tokio::time::sleep(Duration::from_millis(10)).await;
        loader.select_facet(FacetKind::Logs);
        assert!(!loader.metrics_timer_running());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.metrics_calls(), 1);
        // Logs was fetched once, no auto-refresh.
        assert_eq!(fake.count("logs:"), 1);
    }

    #[tokio::test]
    async fn facet_errors_stay_scoped() {
        let (fake, guard, loader) = setup();
        fake.fail_metrics(true);
        fake.set_logs("db", "ready to accept connections");
        loader.open("db");
        loader.select_facet(FacetKind::Metrics);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            loader.view(),
            Some(FacetView::Error("Failed to load metrics".into()))
        );

        loader.select_facet(FacetKind::Logs);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            loader.view(),
            Some(FacetView::Ready(FacetData::Logs(
                "ready to accept connections".into()
            )))
        );
        assert!(guard.is_active());
        loader.close();
    }

    #[tokio::test]
    async fn info_needs_no_fetch_and_close_drops_late_results() {
        let (fake, _guard, loader) = setup();
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        loader.on_data(move |u| sink.lock().unwrap().push(u.clone()));

        loader.open("db");
        assert_eq!(fake.calls().len(), 0);

        loader.select_facet(FacetKind::Environment);
        loader.close();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let seen = updates.lock().unwrap();
        assert!(seen
            .iter()
            .all(|u| !matches!(u.view, FacetView::Ready(_))));
        assert_eq!(loader.view(), None);
    }

    #[tokio::test]
    async fn reopening_on_a_data_facet_fetches_for_new_key() {
        let (fake, _guard, loader) = setup();
        fake.set_logs("db", "db logs");
        fake.set_logs("web", "web logs");
        loader.open("db");
        loader.select_facet(FacetKind::Logs);
        tokio::time::sleep(Duration::from_millis(10)).await;

        loader.open("web");
        assert_eq!(loader.current(), Some(("web".into(), FacetKind::Logs)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            loader.view(),
            Some(FacetView::Ready(FacetData::Logs("web logs".into())))
        );
        assert_eq!(fake.count("logs:web"), 1);
    }

    #[tokio::test]
    async fn select_while_closed_is_ignored() {
        let (fake, _guard, loader) = setup();
        loader.select_facet(FacetKind::Storage);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(fake.calls().is_empty());
        assert_eq!(loader.current(), None);
    }
}
