//! Single-flight execution of mutating workload actions.
//!
//! Every action is keyed by `(workload key, action kind)`. While a key is in
//! flight a second dispatch for it resolves to [`ActionOutcome::Busy`] on its
//! first poll, without issuing a request. Unrelated keys run concurrently.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::api::error::ApiResult;
use crate::api::ConsoleApi;
use crate::model::{AutoBackupPolicy, CreateRequest, EnvVars, ScalingConfig, StorageRequest};
use crate::notify::{NotificationQueue, Severity};
use crate::poller::InventoryPoller;
use crate::session::SessionGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Create,
    Delete,
    Restart,
    SetEnvironment,
    AddStorage,
    ConfigureScaling,
    RemoveScaling,
    CreateBackup,
    RestoreBackup,
    ConfigureAutoBackup,
    DisableAutoBackup,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Create => "create",
            ActionKind::Delete => "delete",
            ActionKind::Restart => "restart",
            ActionKind::SetEnvironment => "set-env",
            ActionKind::AddStorage => "add-storage",
            ActionKind::ConfigureScaling => "scaling",
            ActionKind::RemoveScaling => "remove-scaling",
            ActionKind::CreateBackup => "backup",
            ActionKind::RestoreBackup => "restore",
            ActionKind::ConfigureAutoBackup => "auto-backup",
            ActionKind::DisableAutoBackup => "disable-auto-backup",
        };
        f.write_str(s)
    }
}

/// A mutating request together with its payload. Configuration payloads are
/// the complete desired state and replace whatever the server holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create {
        service_type: String,
        custom_image: Option<String>,
    },
    Delete,
    Restart,
    SetEnvironment(EnvVars),
    AddStorage(StorageRequest),
    ConfigureScaling(ScalingConfig),
    RemoveScaling,
    CreateBackup,
    RestoreBackup { backup: String },
    ConfigureAutoBackup(AutoBackupPolicy),
    DisableAutoBackup,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create { .. } => ActionKind::Create,
            Action::Delete => ActionKind::Delete,
            Action::Restart => ActionKind::Restart,
            Action::SetEnvironment(_) => ActionKind::SetEnvironment,
            Action::AddStorage(_) => ActionKind::AddStorage,
            Action::ConfigureScaling(_) => ActionKind::ConfigureScaling,
            Action::RemoveScaling => ActionKind::RemoveScaling,
            Action::CreateBackup => ActionKind::CreateBackup,
            Action::RestoreBackup { .. } => ActionKind::RestoreBackup,
            Action::ConfigureAutoBackup(_) => ActionKind::ConfigureAutoBackup,
            Action::DisableAutoBackup => ActionKind::DisableAutoBackup,
        }
    }

    /// Client-side payload checks. Returns the payload to send.
    fn validated(self) -> Result<Self, String> {
        match self {
            Action::Create {
                service_type,
                custom_image,
            } => {
                let service_type = service_type.trim().to_string();
                if service_type.is_empty() {
                    return Err("Service type is required".into());
                }
                let custom_image = custom_image
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                if service_type == "custom" && custom_image.is_none() {
                    return Err("A custom service needs an image".into());
                }
                Ok(Action::Create {
                    service_type,
                    custom_image,
                })
            }
            Action::SetEnvironment(env) => Ok(Action::SetEnvironment(env.normalized())),
            Action::AddStorage(req) => req.validate().map(|_| Action::AddStorage(req)),
            Action::ConfigureScaling(cfg) => cfg.validate().map(|_| Action::ConfigureScaling(cfg)),
            Action::RestoreBackup { backup } if backup.trim().is_empty() => {
                Err("Backup name is required".into())
            }
            other => Ok(other),
        }
    }

    fn success_message(&self, key: &str) -> String {
        match self {
            Action::Create { service_type, .. } => format!("Pod created successfully ({service_type})"),
            Action::Delete => format!("Pod deleted successfully ({key})"),
            Action::Restart => format!("Restarting {key}"),
            Action::SetEnvironment(env) if env.is_empty() => {
                format!("Environment cleared for {key}")
            }
            Action::SetEnvironment(env) => {
                format!("Environment updated for {key} ({} variables)", env.len())
            }
            Action::AddStorage(req) => format!("Added {} GB volume to {key}", req.size_gb),
            Action::ConfigureScaling(_) => format!("Autoscaling configured for {key}"),
            Action::RemoveScaling => format!("Autoscaling removed from {key}"),
            Action::CreateBackup => format!("Backup started for {key}"),
            Action::RestoreBackup { backup } => format!("Restoring {key} from {backup}"),
            Action::ConfigureAutoBackup(_) => format!("Automatic backups enabled for {key}"),
            Action::DisableAutoBackup => format!("Automatic backups disabled for {key}"),
        }
    }

    fn failure_message(&self) -> &'static str {
        match self {
            Action::Create { .. } => "Failed to create pod",
            Action::Delete => "Failed to delete pod",
            Action::Restart => "Failed to restart pod",
            Action::SetEnvironment(_) => "Failed to update environment",
            Action::AddStorage(_) => "Failed to add storage",
            Action::ConfigureScaling(_) => "Failed to configure autoscaling",
            Action::RemoveScaling => "Failed to remove autoscaling",
            Action::CreateBackup => "Failed to create backup",
            Action::RestoreBackup { .. } => "Failed to restore backup",
            Action::ConfigureAutoBackup(_) => "Failed to configure automatic backups",
            Action::DisableAutoBackup => "Failed to disable automatic backups",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionState {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded(String),
    Failed(String),
    /// The same key and kind was already in flight; nothing was sent.
    Busy,
    SessionExpired,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded(_))
    }
}

type RecordKey = (String, ActionKind);

pub struct ActionDispatcher {
    api: Arc<dyn ConsoleApi>,
    guard: Arc<SessionGuard>,
    poller: Arc<InventoryPoller>,
    notices: Arc<NotificationQueue>,
    records: Mutex<HashMap<RecordKey, ActionState>>,
}

/// Holds a record in flight; dropping it returns the record to `Idle`, also
/// when the dispatch future is cancelled mid-request.
struct Flight<'a> {
    records: &'a Mutex<HashMap<RecordKey, ActionState>>,
    key: RecordKey,
}

impl Flight<'_> {
    fn set(&self, state: ActionState) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key.clone(), state);
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl ActionDispatcher {
    pub fn new(
        api: Arc<dyn ConsoleApi>,
        guard: Arc<SessionGuard>,
        poller: Arc<InventoryPoller>,
        notices: Arc<NotificationQueue>,
    ) -> Self {
        Self {
            api,
            guard,
            poller,
            notices,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self, key: &str, kind: ActionKind) -> ActionState {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(key.to_string(), kind))
            .copied()
            .unwrap_or_default()
    }

    fn begin(&self, key: &str, kind: ActionKind) -> Option<Flight<'_>> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let rk = (key.to_string(), kind);
        if records.get(&rk) == Some(&ActionState::InFlight) {
            return None;
        }
        records.insert(rk.clone(), ActionState::InFlight);
        Some(Flight {
            records: &self.records,
            key: rk,
        })
    }

    /// Run `action` against `key`. Always resolves to an outcome; every
    /// outcome except `Busy` pushes exactly one notification.
    pub async fn dispatch(&self, key: &str, action: Action) -> ActionOutcome {
        let kind = action.kind();
        let Some(flight) = self.begin(key, kind) else {
            tracing::debug!(key, %kind, "action busy");
            return ActionOutcome::Busy;
        };

        if !self.guard.is_active() {
            self.guard.on_auth_failure();
            flight.set(ActionState::Failed);
            self.notices
                .push("Session expired, please log in again", Severity::Warning);
            return ActionOutcome::SessionExpired;
        }

        let action = match action.validated() {
            Ok(a) => a,
            Err(msg) => {
                flight.set(ActionState::Failed);
                self.notices.push(msg.clone(), Severity::Error);
                return ActionOutcome::Failed(msg);
            }
        };

        tracing::info!(key, %kind, "dispatching action");
        match self.execute(key, &action).await {
            Ok(()) => {
                let msg = action.success_message(key);
                flight.set(ActionState::Succeeded);
                self.notices.push(msg.clone(), Severity::Success);
                drop(flight);
                self.poller.force_refresh().await;
                ActionOutcome::Succeeded(msg)
            }
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(key, %kind, error = %e, "action unauthorized");
                flight.set(ActionState::Failed);
                self.guard.on_auth_failure();
                self.notices
                    .push(e.user_message(action.failure_message()), Severity::Warning);
                ActionOutcome::SessionExpired
            }
            Err(e) => {
                tracing::warn!(key, %kind, error = %e, "action failed");
                let msg = e.user_message(action.failure_message());
                flight.set(ActionState::Failed);
                self.notices.push(msg.clone(), Severity::Error);
                ActionOutcome::Failed(msg)
            }
        }
    }

    async fn execute(&self, key: &str, action: &Action) -> ApiResult<()> {
        let api = &self.api;
        match action {
            Action::Create {
                service_type,
                custom_image,
            } => {
                api.create_pod(&CreateRequest::new(service_type.clone(), custom_image.clone()))
                    .await
            }
            Action::Delete => api.delete_pod(key).await,
            Action::Restart => api.restart_pod(key).await,
            Action::SetEnvironment(env) => api.put_env(key, env).await,
            Action::AddStorage(req) => api.add_storage(key, req).await,
            Action::ConfigureScaling(cfg) => api.set_scaling(key, cfg).await,
            Action::RemoveScaling => api.remove_scaling(key).await,
            Action::CreateBackup => api.create_backup(key).await,
            Action::RestoreBackup { backup } => api.restore_backup(key, backup).await,
            Action::ConfigureAutoBackup(policy) => api.set_auto_backup(key, policy).await,
            Action::DisableAutoBackup => api.disable_auto_backup(key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::{detail_to_string, ApiError};
    use crate::api::fake::FakeApi;
    use crate::model::Workload;
    use crate::session::Session;
    use futures::FutureExt;
    use std::time::Duration;

    struct Rig {
        fake: Arc<FakeApi>,
        guard: Arc<SessionGuard>,
        poller: Arc<InventoryPoller>,
        notices: Arc<NotificationQueue>,
        dispatcher: Arc<ActionDispatcher>,
    }

    fn rig(pods: Vec<Workload>) -> Rig {
        let fake = FakeApi::with_pods(pods);
        let guard = Arc::new(SessionGuard::new(
            Some(Session::new("tok", "acme", false)),
            None,
        ));
        let poller = InventoryPoller::new(fake.clone(), guard.clone());
        let notices = Arc::new(NotificationQueue::new(Duration::from_secs(60)));
        let dispatcher = Arc::new(ActionDispatcher::new(
            fake.clone(),
            guard.clone(),
            poller.clone(),
            notices.clone(),
        ));
        Rig {
            fake,
            guard,
            poller,
            notices,
            dispatcher,
        }
    }

    #[tokio::test]
    async fn second_dispatch_is_busy_without_a_request() {
        let r = rig(vec![Workload::new("nginx-1", "nginx")]);
        let _gate = r.fake.hold();
        let d = r.dispatcher.clone();
        let first = tokio::spawn(async move { d.dispatch("nginx-1", Action::Delete).await });
        tokio::task::yield_now().await;
        assert_eq!(
            r.dispatcher.state("nginx-1", ActionKind::Delete),
            ActionState::InFlight
        );

        let second = r.dispatcher.dispatch("nginx-1", Action::Delete).now_or_never();
        assert_eq!(second, Some(ActionOutcome::Busy));
        assert_eq!(r.fake.count("delete:"), 1);

        r.fake.release();
        assert!(first.await.unwrap().is_success());
        assert_eq!(r.fake.count("delete:"), 1);
        assert_eq!(
            r.dispatcher.state("nginx-1", ActionKind::Delete),
            ActionState::Idle
        );
    }

    #[tokio::test]
    async fn unrelated_keys_run_concurrently() {
        let r = rig(vec![Workload::new("a", "nginx"), Workload::new("b", "nginx")]);
        let _gate = r.fake.hold();
        let d1 = r.dispatcher.clone();
        let d2 = r.dispatcher.clone();
        let t1 = tokio::spawn(async move { d1.dispatch("a", Action::Restart).await });
        let t2 = tokio::spawn(async move { d2.dispatch("b", Action::Restart).await });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(r.fake.count("restart:"), 2);
        // Same workload, different kind, is also independent.
        assert_eq!(
            r.dispatcher.state("a", ActionKind::Delete),
            ActionState::Idle
        );
        r.fake.release();
        assert!(t1.await.unwrap().is_success());
        assert!(t2.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn delete_notifies_and_next_snapshot_drops_the_pod() {
        let r = rig(vec![
            Workload::new("nginx-1", "nginx"),
            Workload::new("redis-1", "redis"),
        ]);
        r.poller.force_refresh().await;
        assert!(r.poller.snapshot().find("nginx-1").is_some());

        let out = r.dispatcher.dispatch("nginx-1", Action::Delete).await;
        assert!(out.is_success());
        let n = r.notices.current_notification().unwrap();
        assert_eq!(n.severity, Severity::Success);
        assert!(n.message.contains("deleted"));
        let snap = r.poller.snapshot();
        assert!(snap.find("nginx-1").is_none());
        assert_eq!(snap.workloads.len(), 1);
    }

    #[tokio::test]
    async fn env_update_replaces_wholesale() {
        let r = rig(vec![Workload::new("app", "custom")]);
        let foo = EnvVars::from_pairs([("FOO", "bar")]);
        assert!(r
            .dispatcher
            .dispatch("app", Action::SetEnvironment(foo))
            .await
            .is_success());
        assert!(r
            .dispatcher
            .dispatch("app", Action::SetEnvironment(EnvVars::default()))
            .await
            .is_success());
        assert!(r.fake.get_env("app").await.unwrap().is_empty());
        assert_eq!(r.fake.count("put_env:app"), 2);
    }

    #[tokio::test]
    async fn structured_detail_reaches_the_notification() {
        let r = rig(vec![Workload::new("db", "postgres")]);
        let detail = serde_json::json!([
            {"loc": ["body", "min_replicas"], "msg": "must be >= 1", "type": "value_error"}
        ]);
        r.fake.fail_next(ApiError::Rejected {
            status: 422,
            detail: detail_to_string(&detail),
        });
        let cfg = ScalingConfig {
            min_replicas: 1,
            max_replicas: 3,
            cpu_target_percent: 70,
        };
        let out = r
            .dispatcher
            .dispatch("db", Action::ConfigureScaling(cfg))
            .await;
        assert_eq!(out, ActionOutcome::Failed("min_replicas: must be >= 1".into()));
        let n = r.notices.current_notification().unwrap();
        assert_eq!(n.severity, Severity::Error);
        assert_eq!(n.message, "min_replicas: must be >= 1");
        assert_eq!(
            r.dispatcher.state("db", ActionKind::ConfigureScaling),
            ActionState::Idle
        );
    }

    #[tokio::test]
    async fn transport_error_uses_generic_message() {
        let r = rig(vec![Workload::new("web", "nginx")]);
        r.fake.fail_next(ApiError::Transport("connection reset".into()));
        let out = r.dispatcher.dispatch("web", Action::Restart).await;
        assert_eq!(out, ActionOutcome::Failed("Failed to restart pod".into()));
        // No automatic retry.
        assert_eq!(r.fake.count("restart:"), 1);
    }

    #[tokio::test]
    async fn invalid_payload_is_rejected_locally() {
        let r = rig(vec![Workload::new("web", "nginx")]);
        let out = r
            .dispatcher
            .dispatch(
                "custom",
                Action::Create {
                    service_type: "custom".into(),
                    custom_image: Some("  ".into()),
                },
            )
            .await;
        assert!(matches!(out, ActionOutcome::Failed(_)));
        assert_eq!(r.fake.count("create:"), 0);
        assert!(r.notices.current_notification().is_some());
    }

    #[tokio::test]
    async fn unauthorized_action_tears_down_session_once() {
        let r = rig(vec![Workload::new("web", "nginx")]);
        r.fake.fail_next(ApiError::Unauthorized { status: 403 });
        let out = r.dispatcher.dispatch("web", Action::Delete).await;
        assert_eq!(out, ActionOutcome::SessionExpired);
        assert!(r.guard.current_credential().is_none());
        assert_eq!(r.guard.redirect_count(), 1);
        assert_eq!(
            r.notices.current_notification().unwrap().severity,
            Severity::Warning
        );

        // Without a session nothing else goes out.
        let again = r.dispatcher.dispatch("web", Action::Restart).await;
        assert_eq!(again, ActionOutcome::SessionExpired);
        assert_eq!(r.fake.count("restart:"), 0);
        assert_eq!(r.guard.redirect_count(), 1);
    }

    #[tokio::test]
    async fn restore_and_backups() {
        let r = rig(vec![Workload::new("db", "postgres")]);
        assert!(r
            .dispatcher
            .dispatch("db", Action::CreateBackup)
            .await
            .is_success());
        let backups = r.fake.list_backups("db").await.unwrap();
        let out = r
            .dispatcher
            .dispatch(
                "db",
                Action::RestoreBackup {
                    backup: backups[0].name.clone(),
                },
            )
            .await;
        assert!(out.is_success());
        let missing = r
            .dispatcher
            .dispatch(
                "db",
                Action::RestoreBackup {
                    backup: "nope".into(),
                },
            )
            .await;
        assert_eq!(missing, ActionOutcome::Failed("Backup nope not found".into()));
    }
}
