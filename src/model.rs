use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::facets::FacetUpdate;
use crate::notify::Notification;
use crate::poller::InventorySnapshot;

/// A single deployed unit (pod) owned by the current tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub name: String,
    #[serde(rename = "type", alias = "service_type", alias = "serviceType", default)]
    pub service_type: String,
    #[serde(default)]
    pub status: WorkloadStatus,
    #[serde(default, alias = "ageDuration", alias = "age_duration")]
    pub age: String,
    #[serde(
        default,
        alias = "restartCount",
        alias = "restarts",
        deserialize_with = "lenient_u32"
    )]
    pub restart_count: u32,
    #[serde(
        default,
        alias = "cpuUsagePercent",
        alias = "cpu_usage_percent",
        alias = "cpuPercent",
        deserialize_with = "lenient_opt_f64"
    )]
    pub cpu_percent: Option<f64>,
    #[serde(
        default,
        alias = "memoryUsagePercent",
        alias = "memory_usage_percent",
        alias = "memoryPercent",
        deserialize_with = "lenient_opt_f64"
    )]
    pub memory_percent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cost: f64,
    #[serde(default, alias = "groupId", deserialize_with = "lenient_opt_string")]
    pub group_id: Option<String>,
    #[serde(
        default,
        alias = "externalAddress",
        alias = "external_ip",
        alias = "url",
        deserialize_with = "lenient_opt_string"
    )]
    pub external_address: Option<String>,
}

impl Workload {
    /// Minimal record, mostly useful for fixtures and the create dialog preview.
    pub fn new(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            status: WorkloadStatus::Unknown,
            age: String::new(),
            restart_count: 0,
            cpu_percent: None,
            memory_percent: None,
            cost: 0.0,
            group_id: None,
            external_address: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum WorkloadStatus {
    Pending,
    Running,
    Failed,
    Terminated,
    #[default]
    Unknown,
}

impl WorkloadStatus {
    pub const ALL: [WorkloadStatus; 5] = [
        WorkloadStatus::Pending,
        WorkloadStatus::Running,
        WorkloadStatus::Failed,
        WorkloadStatus::Terminated,
        WorkloadStatus::Unknown,
    ];

    /// Map the free-form status string reported by the backend onto the fixed enum.
    pub fn from_api(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        match s.as_str() {
            "running" | "ready" => WorkloadStatus::Running,
            "pending" | "containercreating" | "podinitializing" => WorkloadStatus::Pending,
            "failed" | "error" | "crashloopbackoff" | "imagepullbackoff" | "errimagepull" => {
                WorkloadStatus::Failed
            }
            "terminated" | "terminating" | "succeeded" | "completed" => WorkloadStatus::Terminated,
            _ if s.starts_with("running") => WorkloadStatus::Running,
            _ => WorkloadStatus::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkloadStatus::Pending => "Pending",
            WorkloadStatus::Running => "Running",
            WorkloadStatus::Failed => "Failed",
            WorkloadStatus::Terminated => "Terminated",
            WorkloadStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl<'de> Deserialize<'de> for WorkloadStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().map(Self::from_api).unwrap_or_default())
    }
}

/// Numbers occasionally arrive as strings ("12.50") or null; both are accepted.
fn lenient_opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(v.and_then(|v| value_as_f64(&v)))
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(lenient_opt_f64(d)?.unwrap_or(0.0))
}

/// Counts fall back to 0 when missing, null, negative or unparsable.
fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = lenient_opt_f64(d)?.unwrap_or(0.0);
    Ok(if v.is_finite() && v >= 0.0 { v.min(u32::MAX as f64) as u32 } else { 0 })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(_) => None,
    })
}

fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

/// Render a scalar JSON value for display; used where the backend mixes numbers and strings.
fn lenient_display<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match v {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

/// Normalize an environment variable name: uppercase, anything outside `[A-Z0-9_]` becomes `_`.
pub fn normalize_env_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The full environment of a workload. Always submitted wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvVars(pub BTreeMap<String, String>);

impl EnvVars {
    /// Build a normalized set; empty keys are dropped and later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut out = BTreeMap::new();
        for (k, v) in pairs {
            let key = normalize_env_key(k.as_ref());
            if key.is_empty() {
                continue;
            }
            out.insert(key, v.into());
        }
        EnvVars(out)
    }

    /// Parse `KEY=VALUE` arguments as typed on the command line.
    pub fn parse_assignments<S: AsRef<str>>(args: &[S]) -> anyhow::Result<Self> {
        let mut pairs = Vec::with_capacity(args.len());
        for a in args {
            let a = a.as_ref();
            let (k, v) = a
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {a:?}"))?;
            pairs.push((k.to_string(), v.to_string()));
        }
        Ok(Self::from_pairs(pairs))
    }

    pub fn normalized(&self) -> Self {
        Self::from_pairs(self.0.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "sizeGb", alias = "size", deserialize_with = "lenient_opt_f64")]
    pub size_gb: Option<f64>,
    #[serde(default, alias = "mountPath")]
    pub mount_path: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRequest {
    pub size_gb: u32,
    pub mount_path: String,
}

impl StorageRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.size_gb == 0 {
            return Err("Storage size must be at least 1 GB".into());
        }
        if !self.mount_path.starts_with('/') {
            return Err(format!(
                "Mount path must be absolute, got {:?}",
                self.mount_path
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(alias = "minReplicas")]
    pub min_replicas: u32,
    #[serde(alias = "maxReplicas")]
    pub max_replicas: u32,
    #[serde(alias = "cpuTargetPercent", alias = "target_cpu_percent")]
    pub cpu_target_percent: u32,
}

impl ScalingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_replicas == 0 {
            return Err("Minimum replicas must be at least 1".into());
        }
        if self.max_replicas < self.min_replicas {
            return Err(format!(
                "Maximum replicas ({}) must not be below minimum ({})",
                self.max_replicas, self.min_replicas
            ));
        }
        if !(1..=100).contains(&self.cpu_target_percent) {
            return Err("CPU target must be between 1 and 100 percent".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BackupStatus {
    Completed,
    InProgress,
    Failed,
    #[default]
    Unknown,
}

impl<'de> Deserialize<'de> for BackupStatus {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "succeeded" | "success" | "done" => BackupStatus::Completed,
            "in_progress" | "inprogress" | "running" | "pending" => BackupStatus::InProgress,
            "failed" | "error" => BackupStatus::Failed,
            _ => BackupStatus::Unknown,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub name: String,
    #[serde(default, alias = "createdAt", alias = "created")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: BackupStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoBackupPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_schedule")]
    pub schedule: String,
    #[serde(default = "default_backup_retention", alias = "retentionCount", alias = "retention_count")]
    pub retention: u32,
}

fn default_backup_schedule() -> String {
    "0 2 * * *".into()
}

fn default_backup_retention() -> u32 {
    7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    #[serde(default, deserialize_with = "lenient_display")]
    pub cpu: String,
    #[serde(default, deserialize_with = "lenient_display")]
    pub memory: String,
    #[serde(default, alias = "cpuPercent", deserialize_with = "lenient_opt_f64")]
    pub cpu_percent: Option<f64>,
    #[serde(default, alias = "memoryPercent", deserialize_with = "lenient_opt_f64")]
    pub memory_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRequest {
    pub service_type: String,
    pub custom_image: Option<String>,
}

impl CreateRequest {
    /// A custom image is only forwarded for the `custom` service type.
    pub fn new(service_type: impl Into<String>, custom_image: Option<String>) -> Self {
        let service_type = service_type.into();
        let custom_image = if service_type == "custom" {
            custom_image.filter(|s| !s.trim().is_empty())
        } else {
            None
        };
        Self {
            service_type,
            custom_image,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub company_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Service types offered by the create dialog, in display order.
pub const SERVICE_TYPES: &[&str] = &[
    "nginx",
    "wordpress",
    "postgres",
    "mysql",
    "redis",
    "rabbitmq",
    "uptime-kuma",
    "custom",
];

/// Events emitted by the controller and consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    Snapshot(InventorySnapshot),
    Facet(FacetUpdate),
    Notification(Option<Notification>),
    Info(String),
    /// The session is gone; presentation layers must leave the dashboard.
    SessionEnded,
}
