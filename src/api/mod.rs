//! Console backend contract and response normalization.
//!
//! Every component talks to the backend through [`ConsoleApi`]. Responses are
//! normalized here into one canonical shape, whatever wrapping the server used.

pub mod error;
#[cfg(test)]
pub mod fake;
mod http;

pub use http::HttpConsoleApi;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::model::{
    AutoBackupPolicy, BackupRecord, CreateRequest, EnvVars, MetricsSample, ScalingConfig,
    StorageRequest, VolumeDescriptor, Workload,
};
use error::{ApiError, ApiResult};

#[async_trait]
pub trait ConsoleApi: Send + Sync {
    async fn list_pods(&self) -> ApiResult<Vec<Workload>>;
    async fn create_pod(&self, req: &CreateRequest) -> ApiResult<()>;
    async fn delete_pod(&self, name: &str) -> ApiResult<()>;
    async fn restart_pod(&self, name: &str) -> ApiResult<()>;

    async fn pod_logs(&self, name: &str) -> ApiResult<String>;
    async fn pod_metrics(&self, name: &str) -> ApiResult<MetricsSample>;

    async fn get_env(&self, name: &str) -> ApiResult<EnvVars>;
    /// Replaces the whole environment of `name` with `env`.
    async fn put_env(&self, name: &str, env: &EnvVars) -> ApiResult<()>;

    async fn list_storage(&self, name: &str) -> ApiResult<Vec<VolumeDescriptor>>;
    async fn add_storage(&self, name: &str, req: &StorageRequest) -> ApiResult<()>;

    async fn get_scaling(&self, name: &str) -> ApiResult<Option<ScalingConfig>>;
    async fn set_scaling(&self, name: &str, cfg: &ScalingConfig) -> ApiResult<()>;
    async fn remove_scaling(&self, name: &str) -> ApiResult<()>;

    async fn list_backups(&self, name: &str) -> ApiResult<Vec<BackupRecord>>;
    async fn create_backup(&self, name: &str) -> ApiResult<()>;
    async fn restore_backup(&self, name: &str, backup: &str) -> ApiResult<()>;

    async fn get_auto_backup(&self, name: &str) -> ApiResult<Option<AutoBackupPolicy>>;
    async fn set_auto_backup(&self, name: &str, policy: &AutoBackupPolicy) -> ApiResult<()>;
    async fn disable_auto_backup(&self, name: &str) -> ApiResult<()>;
}

/// Accept either a bare array or an object wrapping the array under one of `keys`.
pub fn normalize_list<T: DeserializeOwned>(value: Value, keys: &[&str]) -> ApiResult<Vec<T>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let found = keys.iter().find_map(|k| map.remove(*k));
            match found {
                Some(Value::Array(items)) => items,
                Some(Value::Null) => Vec::new(),
                None if map.is_empty() => Vec::new(),
                Some(other) => {
                    return Err(ApiError::Decode(format!(
                        "expected a list, got {}",
                        kind_of(&other)
                    )))
                }
                None => {
                    return Err(ApiError::Decode(format!(
                        "none of {keys:?} present in response object"
                    )))
                }
            }
        }
        other => {
            return Err(ApiError::Decode(format!(
                "expected a list, got {}",
                kind_of(&other)
            )))
        }
    };
    // One malformed record must not cost the rest of the list.
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, v)| match serde_json::from_value(v) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "dropping undecodable list item");
                None
            }
        })
        .collect())
}

/// `{envVars: {...}}`, `{env_vars: {...}}`, `{env: {...}}` or a bare map.
pub fn normalize_env(value: Value) -> ApiResult<EnvVars> {
    let map = match value {
        Value::Null => return Ok(EnvVars::default()),
        Value::Object(mut map) => {
            match ["envVars", "env_vars", "env"]
                .iter()
                .find_map(|k| map.remove(*k))
            {
                Some(Value::Object(inner)) => inner,
                Some(Value::Null) => serde_json::Map::new(),
                Some(other) => {
                    return Err(ApiError::Decode(format!(
                        "expected env map, got {}",
                        kind_of(&other)
                    )))
                }
                None => map,
            }
        }
        other => {
            return Err(ApiError::Decode(format!(
                "expected env map, got {}",
                kind_of(&other)
            )))
        }
    };
    Ok(EnvVars::from_pairs(map.into_iter().map(|(k, v)| {
        let v = match v {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        (k, v)
    })))
}

/// `{logs: "..."}` or a bare string.
pub fn normalize_logs(value: Value) -> ApiResult<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Object(mut map) => match map.remove("logs") {
            Some(Value::String(s)) => Ok(s),
            Some(Value::Null) | None => Ok(String::new()),
            Some(Value::Array(lines)) => Ok(lines
                .into_iter()
                .map(|l| match l {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n")),
            Some(other) => Ok(other.to_string()),
        },
        other => Err(ApiError::Decode(format!(
            "expected logs, got {}",
            kind_of(&other)
        ))),
    }
}

/// `null`, `{}` and `{"enabled": false}` all mean "not configured".
pub fn normalize_optional<T: DeserializeOwned>(value: Value) -> ApiResult<Option<T>> {
    match &value {
        Value::Null => return Ok(None),
        Value::Object(map) if map.is_empty() => return Ok(None),
        Value::Object(map) if map.get("enabled") == Some(&Value::Bool(false)) && map.len() == 1 => {
            return Ok(None)
        }
        _ => {}
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ApiError::Decode(e.to_string()))
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
