//! In-memory backend used by component tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::error::{ApiError, ApiResult};
use super::ConsoleApi;
use crate::model::{
    AutoBackupPolicy, BackupRecord, BackupStatus, CreateRequest, EnvVars, MetricsSample,
    ScalingConfig, StorageRequest, VolumeDescriptor, Workload,
};

#[derive(Default)]
struct State {
    pods: Vec<Workload>,
    env: HashMap<String, EnvVars>,
    storage: HashMap<String, Vec<VolumeDescriptor>>,
    scaling: HashMap<String, ScalingConfig>,
    backups: HashMap<String, Vec<BackupRecord>>,
    auto_backup: HashMap<String, AutoBackupPolicy>,
    logs: HashMap<String, String>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
    calls: Mutex<Vec<String>>,
    list_in_flight: AtomicBool,
    pub overlap_detected: AtomicBool,
    list_calls: AtomicUsize,
    metrics_calls: AtomicUsize,
    /// When set, list and mutating calls wait here before answering.
    gate: Mutex<Option<Arc<Notify>>>,
    scripted: Mutex<VecDeque<ApiError>>,
    fail_metrics: AtomicBool,
}

impl FakeApi {
    pub fn with_pods(pods: Vec<Workload>) -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().pods = pods;
        Arc::new(fake)
    }

    /// Hold every gated call until the returned `Notify` is signalled.
    pub fn hold(&self) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(n.clone());
        n
    }

    pub fn release(&self) {
        if let Some(n) = self.gate.lock().unwrap().take() {
            n.notify_waiters();
        }
    }

    /// The next call of any kind fails with `err`.
    pub fn fail_next(&self, err: ApiError) {
        self.scripted.lock().unwrap().push_back(err);
    }

    pub fn fail_metrics(&self, on: bool) {
        self.fail_metrics.store(on, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn metrics_calls(&self) -> usize {
        self.metrics_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn set_logs(&self, name: &str, logs: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert(name.into(), logs.into());
    }

    async fn enter(&self, call: String) -> ApiResult<()> {
        self.calls.lock().unwrap().push(call);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(n) = gate {
            n.notified().await;
        }
        match self.scripted.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn require_pod(&self, name: &str) -> ApiResult<()> {
        if self.state.lock().unwrap().pods.iter().any(|p| p.name == name) {
            Ok(())
        } else {
            Err(ApiError::Rejected {
                status: 404,
                detail: Some(format!("Pod {name} not found")),
            })
        }
    }
}

#[async_trait]
impl ConsoleApi for FakeApi {
    async fn list_pods(&self) -> ApiResult<Vec<Workload>> {
        if self.list_in_flight.swap(true, Ordering::SeqCst) {
            self.overlap_detected.store(true, Ordering::SeqCst);
            panic!("overlapping list fetch");
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let res = self.enter("list".into()).await;
        self.list_in_flight.store(false, Ordering::SeqCst);
        res?;
        Ok(self.state.lock().unwrap().pods.clone())
    }

    async fn create_pod(&self, req: &CreateRequest) -> ApiResult<()> {
        self.enter(format!("create:{}", req.service_type)).await?;
        let mut st = self.state.lock().unwrap();
        let name = format!("{}-{}", req.service_type, st.pods.len() + 1);
        st.pods.push(Workload::new(name, req.service_type.clone()));
        Ok(())
    }

    async fn delete_pod(&self, name: &str) -> ApiResult<()> {
        self.enter(format!("delete:{name}")).await?;
        self.require_pod(name)?;
        self.state.lock().unwrap().pods.retain(|p| p.name != name);
        Ok(())
    }

    async fn restart_pod(&self, name: &str) -> ApiResult<()> {
        self.enter(format!("restart:{name}")).await?;
        self.require_pod(name)?;
        let mut st = self.state.lock().unwrap();
        if let Some(p) = st.pods.iter_mut().find(|p| p.name == name) {
            p.restart_count += 1;
        }
        Ok(())
    }

    async fn pod_logs(&self, name: &str) -> ApiResult<String> {
        self.calls.lock().unwrap().push(format!("logs:{name}"));
        Ok(self
            .state
            .lock()
            .unwrap()
            .logs
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn pod_metrics(&self, name: &str) -> ApiResult<MetricsSample> {
        self.calls.lock().unwrap().push(format!("metrics:{name}"));
        let n = self.metrics_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(ApiError::Transport("metrics-server unavailable".into()));
        }
        Ok(MetricsSample {
            cpu: format!("{n}m"),
            memory: "64Mi".into(),
            cpu_percent: Some(n as f64),
            memory_percent: Some(12.5),
        })
    }

    async fn get_env(&self, name: &str) -> ApiResult<EnvVars> {
        self.calls.lock().unwrap().push(format!("env:{name}"));
        Ok(self
            .state
            .lock()
            .unwrap()
            .env
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_env(&self, name: &str, env: &EnvVars) -> ApiResult<()> {
        self.enter(format!("put_env:{name}")).await?;
        self.state
            .lock()
            .unwrap()
            .env
            .insert(name.into(), env.clone());
        Ok(())
    }

    async fn list_storage(&self, name: &str) -> ApiResult<Vec<VolumeDescriptor>> {
        self.calls.lock().unwrap().push(format!("storage:{name}"));
        Ok(self
            .state
            .lock()
            .unwrap()
            .storage
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_storage(&self, name: &str, req: &StorageRequest) -> ApiResult<()> {
        self.enter(format!("add_storage:{name}")).await?;
        let mut st = self.state.lock().unwrap();
        let vols = st.storage.entry(name.into()).or_default();
        let idx = vols.len();
        vols.push(VolumeDescriptor {
            name: format!("{name}-vol-{idx}"),
            size_gb: Some(req.size_gb as f64),
            mount_path: Some(req.mount_path.clone()),
            status: Some("Bound".into()),
        });
        Ok(())
    }

    async fn get_scaling(&self, name: &str) -> ApiResult<Option<ScalingConfig>> {
        Ok(self.state.lock().unwrap().scaling.get(name).copied())
    }

    async fn set_scaling(&self, name: &str, cfg: &ScalingConfig) -> ApiResult<()> {
        self.enter(format!("set_scaling:{name}")).await?;
        self.state.lock().unwrap().scaling.insert(name.into(), *cfg);
        Ok(())
    }

    async fn remove_scaling(&self, name: &str) -> ApiResult<()> {
        self.enter(format!("remove_scaling:{name}")).await?;
        self.state.lock().unwrap().scaling.remove(name);
        Ok(())
    }

    async fn list_backups(&self, name: &str) -> ApiResult<Vec<BackupRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .backups
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_backup(&self, name: &str) -> ApiResult<()> {
        self.enter(format!("backup:{name}")).await?;
        let mut st = self.state.lock().unwrap();
        let list = st.backups.entry(name.into()).or_default();
        let idx = list.len();
        list.push(BackupRecord {
            name: format!("{name}-backup-{idx}"),
            created_at: None,
            status: BackupStatus::Completed,
        });
        Ok(())
    }

    async fn restore_backup(&self, name: &str, backup: &str) -> ApiResult<()> {
        self.enter(format!("restore:{name}:{backup}")).await?;
        let known = self
            .state
            .lock()
            .unwrap()
            .backups
            .get(name)
            .is_some_and(|b| b.iter().any(|r| r.name == backup));
        if known {
            Ok(())
        } else {
            Err(ApiError::Rejected {
                status: 404,
                detail: Some(format!("Backup {backup} not found")),
            })
        }
    }

    async fn get_auto_backup(&self, name: &str) -> ApiResult<Option<AutoBackupPolicy>> {
        Ok(self.state.lock().unwrap().auto_backup.get(name).cloned())
    }

    async fn set_auto_backup(&self, name: &str, policy: &AutoBackupPolicy) -> ApiResult<()> {
        self.enter(format!("set_auto_backup:{name}")).await?;
        self.state
            .lock()
            .unwrap()
            .auto_backup
            .insert(name.into(), policy.clone());
        Ok(())
    }

    async fn disable_auto_backup(&self, name: &str) -> ApiResult<()> {
        self.enter(format!("disable_auto_backup:{name}")).await?;
        self.state.lock().unwrap().auto_backup.remove(name);
        Ok(())
    }
}
