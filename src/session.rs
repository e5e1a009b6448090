//! Process-wide session and the guard that owns every write to it.
//!
//! The guard is the only place the credential changes: `establish` on login and
//! the teardown path shared by `on_auth_failure` and `logout`. Teardown clears
//! the credential, cancels every registered timer and raises the redirect
//! signal exactly once.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex, PoisonError,
};
use tokio::sync::watch;

use crate::api::error::{ApiError, ApiResult};
use crate::timer::TimerHandle;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    token: String,
    pub tenant: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Session {
    pub fn new(token: impl Into<String>, tenant: impl Into<String>, is_admin: bool) -> Self {
        Self {
            token: token.into(),
            tenant: tenant.into(),
            is_admin,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("tenant", &self.tenant)
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// Bearer credential handed out for the duration of a single call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// On-disk copy of the session so one-shot commands can reuse a login.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Session>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => {
                let session = serde_json::from_str(&s)
                    .with_context(|| format!("parse session file {}", self.path.display()))?;
                Ok(Some(session))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("read {}", self.path.display())),
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let body = serde_json::to_vec_pretty(session)?;
        write_private(&self.path, &body)
            .with_context(|| format!("write {}", self.path.display()))
    }

    pub fn erase(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

#[cfg(unix)]
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    f.write_all(body)
}

#[cfg(not(unix))]
fn write_private(path: &Path, body: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    AuthFailure,
    Logout,
}

pub struct SessionGuard {
    session: Mutex<Option<Session>>,
    timers: Mutex<Vec<TimerHandle>>,
    torn_down: AtomicBool,
    redirects: AtomicU64,
    redirect_tx: watch::Sender<bool>,
    store: Option<SessionStore>,
}

impl SessionGuard {
    pub fn new(initial: Option<Session>, store: Option<SessionStore>) -> Self {
        let (redirect_tx, _) = watch::channel(false);
        Self {
            session: Mutex::new(initial),
            timers: Mutex::new(Vec::new()),
            torn_down: AtomicBool::new(false),
            redirects: AtomicU64::new(0),
            redirect_tx,
            store,
        }
    }

    /// Restore a persisted session, if any.
    pub fn from_store(store: SessionStore) -> Result<Self> {
        let initial = store.load()?;
        Ok(Self::new(initial, Some(store)))
    }

    pub fn current_credential(&self) -> Option<Credential> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| Credential(s.token.clone()))
    }

    pub fn tenant(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.tenant.clone())
    }

    pub fn is_active(&self) -> bool {
        self.current_credential().is_some()
    }

    /// Attach the bearer credential. Without one the request is not issued and
    /// the redirect path runs instead.
    pub fn authorize(&self, request: reqwest::RequestBuilder) -> ApiResult<reqwest::RequestBuilder> {
        match self.current_credential() {
            Some(c) => Ok(request.bearer_auth(c.bearer())),
            None => {
                self.on_auth_failure();
                Err(ApiError::NoSession)
            }
        }
    }

    /// Install a fresh session after a successful login.
    pub fn establish(&self, session: Session) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(&session)?;
        }
        tracing::info!(tenant = %session.tenant, "session established");
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
        self.torn_down.store(false, Ordering::Release);
        self.redirect_tx.send_replace(false);
        Ok(())
    }

    pub fn on_auth_failure(&self) {
        self.teardown(TeardownReason::AuthFailure);
    }

    pub fn logout(&self) {
        self.teardown(TeardownReason::Logout);
    }

    fn teardown(&self, reason: TeardownReason) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let timers: Vec<TimerHandle> = std::mem::take(
            &mut *self.timers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for t in &timers {
            t.cancel();
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.erase() {
                tracing::warn!(error = %format!("{e:#}"), "failed to erase stored session");
            }
        }
        self.redirects.fetch_add(1, Ordering::AcqRel);
        self.redirect_tx.send_replace(true);
        tracing::warn!(?reason, timers = timers.len(), "session torn down");
    }

    /// Track a timer so teardown can cancel it. Registering after teardown
    /// cancels the timer immediately.
    pub fn register_timer(&self, timer: TimerHandle) {
        if self.torn_down.load(Ordering::Acquire) {
            timer.cancel();
            return;
        }
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(|t| !t.is_cancelled());
        timers.push(timer);
    }

    /// Receiver that flips to `true` when the dashboard must be left.
    pub fn redirects(&self) -> watch::Receiver<bool> {
        self.redirect_tx.subscribe()
    }

    pub fn redirect_count(&self) -> u64 {
        self.redirects.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn active_guard() -> SessionGuard {
        SessionGuard::new(Some(Session::new("tok", "acme", false)), None)
    }

    #[test]
    fn auth_failure_twice_redirects_once() {
        let guard = active_guard();
        let rx = guard.redirects();
        guard.on_auth_failure();
        guard.on_auth_failure();
        assert!(guard.current_credential().is_none());
        assert_eq!(guard.redirect_count(), 1);
        assert!(*rx.borrow());
    }

    #[test]
    fn missing_credential_blocks_the_request() {
        let guard = SessionGuard::new(None, None);
        let client = reqwest::Client::new();
        let res = guard.authorize(client.get("http://127.0.0.1:9/pods"));
        assert!(matches!(res, Err(ApiError::NoSession)));
        assert_eq!(guard.redirect_count(), 1);
    }

    #[test]
    fn authorize_attaches_bearer() {
        let guard = active_guard();
        let client = reqwest::Client::new();
        let req = guard
            .authorize(client.get("http://127.0.0.1:9/pods"))
            .unwrap()
            .build()
            .unwrap();
        let header = req.headers().get(reqwest::header::AUTHORIZATION).unwrap();
        assert_eq!(header.to_str().unwrap(), "Bearer tok");
    }

    #[tokio::test]
    async fn teardown_cancels_registered_timers() {
        let guard = active_guard();
        let timer = TimerHandle::spawn("probe", |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        guard.register_timer(timer.clone());
        guard.logout();
        assert!(timer.is_cancelled());

        let late = TimerHandle::spawn("late", |_| async {});
        guard.register_timer(late.clone());
        assert!(late.is_cancelled());
    }

    #[test]
    fn establish_rearms_redirect() {
        let guard = active_guard();
        guard.on_auth_failure();
        guard.establish(Session::new("t2", "acme", true)).unwrap();
        assert_eq!(guard.tenant().as_deref(), Some("acme"));
        assert!(!*guard.redirects().borrow());
        guard.on_auth_failure();
        assert_eq!(guard.redirect_count(), 2);
    }

    #[test]
    fn store_round_trips_and_erases() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));
        assert!(store.load().unwrap().is_none());
        store.save(&Session::new("tok", "acme", false)).unwrap();
        let guard = SessionGuard::from_store(store.clone()).unwrap();
        assert!(guard.is_active());
        guard.on_auth_failure();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn debug_never_prints_the_token() {
        let s = format!("{:?}", Session::new("supersecret", "acme", false));
        assert!(!s.contains("supersecret"));
    }
}
