//! Cancelable background timers.
//!
//! A timer is a spawned tokio task plus a shared stop flag. Cancelling sets the
//! flag first and then aborts the task, so a tick that already woke up observes
//! the flag before issuing any work.

use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn stop(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

#[derive(Debug, Clone)]
pub struct TimerHandle {
    name: &'static str,
    flag: StopFlag,
    abort: AbortHandle,
}

impl TimerHandle {
    /// Spawn `body` on the current runtime. The body receives the stop flag and
    /// must check it after every wake-up.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopFlag) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let flag = StopFlag::default();
        let task = tokio::spawn(body(flag.clone()));
        tracing::debug!(timer = name, "timer started");
        Self {
            name,
            flag,
            abort: task.abort_handle(),
        }
    }

    /// Idempotent. Returns true only for the call that actually stopped the timer.
    pub fn cancel(&self) -> bool {
        let first = self.flag.stop();
        self.abort.abort();
        if first {
            tracing::debug!(timer = self.name, "timer cancelled");
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_stopped()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
