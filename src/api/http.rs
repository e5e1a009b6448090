use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use super::{normalize_env, normalize_list, normalize_logs, normalize_optional, ConsoleApi};
use crate::config::ConsoleConfig;
use crate::model::{
    AutoBackupPolicy, BackupRecord, CreateRequest, EnvVars, MetricsSample, RegisterRequest,
    ScalingConfig, StorageRequest, TokenResponse, VolumeDescriptor, Workload,
};
use crate::session::{Session, SessionGuard};

/// reqwest-backed implementation of the console API.
#[derive(Clone)]
pub struct HttpConsoleApi {
    http: reqwest::Client,
    base: Url,
    guard: Arc<SessionGuard>,
}

impl HttpConsoleApi {
    pub fn new(cfg: &ConsoleConfig, guard: Arc<SessionGuard>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .user_agent(format!("tenant-console/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build HTTP client")?;
        let base = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base_url {:?}", cfg.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("base_url {:?} cannot carry a path", cfg.base_url);
        }
        Ok(Self { http, base, guard })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn pod(&self, name: &str, rest: &[&str]) -> Url {
        let mut segments = Vec::with_capacity(rest.len() + 2);
        segments.push("pods");
        segments.push(name);
        segments.extend_from_slice(rest);
        self.endpoint(&segments)
    }

    /// Authorize, send, and classify the response status.
    async fn send(&self, req: RequestBuilder) -> ApiResult<reqwest::Response> {
        let req = self.guard.authorize(req)?;
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::from_response(status, &body))
    }

    async fn value(&self, method: Method, url: Url) -> ApiResult<Value> {
        let resp = self.send(self.http.request(method, url)).await?;
        read_json(resp).await
    }

    async fn call(&self, method: Method, url: Url) -> ApiResult<()> {
        self.send(self.http.request(method, url)).await.map(|_| ())
    }

    async fn call_json<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: &B,
    ) -> ApiResult<()> {
        self.send(self.http.request(method, url).json(body))
            .await
            .map(|_| ())
    }

    /// Exchange username and password for a session. Not authorized by the guard.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<Session> {
        let resp = self
            .http
            .post(self.endpoint(&["token"]))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status, &body));
        }
        let token: TokenResponse = resp.json().await?;
        Ok(Session::new(token.access_token, token.company, token.is_admin))
    }

    pub async fn register(&self, req: &RegisterRequest) -> ApiResult<()> {
        let resp = self
            .http
            .post(self.endpoint(&["register"]))
            .json(req)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::from_response(status, &body))
    }
}

async fn read_json(resp: reqwest::Response) -> ApiResult<Value> {
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl ConsoleApi for HttpConsoleApi {
    async fn list_pods(&self) -> ApiResult<Vec<Workload>> {
        let v = self.value(Method::GET, self.endpoint(&["pods"])).await?;
        normalize_list(v, &["pods", "items", "workloads"])
    }

    async fn create_pod(&self, req: &CreateRequest) -> ApiResult<()> {
        self.call_json(Method::POST, self.endpoint(&["pods"]), req)
            .await
    }

    async fn delete_pod(&self, name: &str) -> ApiResult<()> {
        self.call(Method::DELETE, self.pod(name, &[])).await
    }

    async fn restart_pod(&self, name: &str) -> ApiResult<()> {
        self.call(Method::POST, self.pod(name, &["restart"])).await
    }

    async fn pod_logs(&self, name: &str) -> ApiResult<String> {
        let v = self.value(Method::GET, self.pod(name, &["logs"])).await?;
        normalize_logs(v)
    }

    async fn pod_metrics(&self, name: &str) -> ApiResult<MetricsSample> {
        let v = self.value(Method::GET, self.pod(name, &["metrics"])).await?;
        serde_json::from_value(v).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get_env(&self, name: &str) -> ApiResult<EnvVars> {
        let v = self.value(Method::GET, self.pod(name, &["env"])).await?;
        normalize_env(v)
    }

    async fn put_env(&self, name: &str, env: &EnvVars) -> ApiResult<()> {
        let body = serde_json::json!({ "env_vars": env });
        self.call_json(Method::PUT, self.pod(name, &["env"]), &body)
            .await
    }

    async fn list_storage(&self, name: &str) -> ApiResult<Vec<VolumeDescriptor>> {
        let v = self.value(Method::GET, self.pod(name, &["storage"])).await?;
        normalize_list(v, &["volumes", "storage", "items"])
    }

    async fn add_storage(&self, name: &str, req: &StorageRequest) -> ApiResult<()> {
        self.call_json(Method::POST, self.pod(name, &["storage"]), req)
            .await
    }

    async fn get_scaling(&self, name: &str) -> ApiResult<Option<ScalingConfig>> {
        let v = self.value(Method::GET, self.pod(name, &["scaling"])).await?;
        normalize_optional(v)
    }

    async fn set_scaling(&self, name: &str, cfg: &ScalingConfig) -> ApiResult<()> {
        self.call_json(Method::POST, self.pod(name, &["scaling"]), cfg)
            .await
    }

    async fn remove_scaling(&self, name: &str) -> ApiResult<()> {
        self.call(Method::DELETE, self.pod(name, &["scaling"])).await
    }

    async fn list_backups(&self, name: &str) -> ApiResult<Vec<BackupRecord>> {
        let v = self.value(Method::GET, self.pod(name, &["backups"])).await?;
        normalize_list(v, &["backups", "items"])
    }

    async fn create_backup(&self, name: &str) -> ApiResult<()> {
        self.call(Method::POST, self.pod(name, &["backups"])).await
    }

    async fn restore_backup(&self, name: &str, backup: &str) -> ApiResult<()> {
        self.call(Method::POST, self.pod(name, &["restore", backup]))
            .await
    }

    async fn get_auto_backup(&self, name: &str) -> ApiResult<Option<AutoBackupPolicy>> {
        let v = self
            .value(Method::GET, self.pod(name, &["auto-backup"]))
            .await?;
        normalize_optional(v)
    }

    async fn set_auto_backup(&self, name: &str, policy: &AutoBackupPolicy) -> ApiResult<()> {
        self.call_json(Method::POST, self.pod(name, &["auto-backup"]), policy)
            .await
    }

    async fn disable_auto_backup(&self, name: &str) -> ApiResult<()> {
        self.call(Method::DELETE, self.pod(name, &["auto-backup"]))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpConsoleApi {
        let cfg = ConsoleConfig {
            base_url: base.into(),
            ..Default::default()
        };
        HttpConsoleApi::new(&cfg, Arc::new(SessionGuard::new(None, None))).unwrap()
    }

    #[test]
    fn pod_paths_are_escaped_segments() {
        let a = api("http://backend:30001");
        assert_eq!(
            a.pod("wp-1", &["restore", "nightly 1"]).as_str(),
            "http://backend:30001/pods/wp-1/restore/nightly%201"
        );
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let a = api("https://example.com/api");
        assert_eq!(a.endpoint(&["pods"]).as_str(), "https://example.com/api/pods");
        assert_eq!(
            a.pod("db", &["auto-backup"]).as_str(),
            "https://example.com/api/pods/db/auto-backup"
        );
    }

    #[tokio::test]
    async fn calls_without_session_are_never_sent() {
        // Port 9 (discard) is never contacted: the guard rejects first.
        let a = api("http://127.0.0.1:9");
        let res = a.list_pods().await;
        assert!(matches!(res, Err(ApiError::NoSession)));
        assert_eq!(a.guard.redirect_count(), 1);
    }
}
