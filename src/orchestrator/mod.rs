//! Application-level wiring.
//!
//! `Console` assembles the session guard, poller, dispatcher, facet loader and
//! notification slot around one API implementation. The controller drives them
//! from UI commands; one-shot CLI commands use the same pieces directly.

mod controller;

use std::sync::Arc;

use crate::api::ConsoleApi;
use crate::config::ConsoleConfig;
use crate::dispatcher::ActionDispatcher;
use crate::facets::DetailFacetLoader;
use crate::notify::NotificationQueue;
use crate::poller::InventoryPoller;
use crate::session::SessionGuard;

pub(crate) use controller::{run_controller, UiCommand};

pub(crate) struct Console {
    pub cfg: ConsoleConfig,
    pub guard: Arc<SessionGuard>,
    pub api: Arc<dyn ConsoleApi>,
    pub poller: Arc<InventoryPoller>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub facets: Arc<DetailFacetLoader>,
    pub notices: Arc<NotificationQueue>,
}

impl Console {
    pub fn new(cfg: ConsoleConfig, guard: Arc<SessionGuard>, api: Arc<dyn ConsoleApi>) -> Self {
        let poller = InventoryPoller::new(api.clone(), guard.clone());
        let notices = Arc::new(NotificationQueue::new(cfg.notification_ttl));
        let dispatcher = Arc::new(ActionDispatcher::new(
            api.clone(),
            guard.clone(),
            poller.clone(),
            notices.clone(),
        ));
        let facets = DetailFacetLoader::new(api.clone(), guard.clone(), cfg.metrics_refresh_interval);
        Self {
            cfg,
            guard,
            api,
            poller,
            dispatcher,
            facets,
            notices,
        }
    }
}
