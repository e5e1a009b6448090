use crate::classify::{filter_by_tab, Tab};
use crate::facets::{FacetKind, FacetView};
use crate::model::{ConsoleEvent, Workload, SERVICE_TYPES};
use crate::notify::Notification;
use crate::poller::InventorySnapshot;
use std::collections::HashMap;

/// Index of the help tab, after the category tabs.
pub const HELP_TAB: usize = Tab::ALL.len();

pub enum Modal {
    /// Destructive-action gate in front of a delete dispatch.
    ConfirmDelete { name: String },
    Create { type_idx: usize, image: String },
}

impl Modal {
    pub fn create() -> Self {
        Modal::Create {
            type_idx: 0,
            image: String::new(),
        }
    }
}

pub struct DetailState {
    pub key: String,
    pub facet: FacetKind,
    pub views: HashMap<FacetKind, FacetView>,
    pub scroll: u16,
}

#[derive(Default)]
pub struct UiState {
    pub tab: usize,
    pub snapshot: InventorySnapshot,
    pub selected: usize,
    pub detail: Option<DetailState>,
    pub notification: Option<Notification>,
    pub info: String,
    pub modal: Option<Modal>,
    pub tenant: String,
    pub session_ended: bool,
}

impl UiState {
    pub fn current_tab(&self) -> Option<Tab> {
        Tab::ALL.get(self.tab).copied()
    }

    pub fn visible(&self) -> Vec<&Workload> {
        match self.current_tab() {
            Some(t) => filter_by_tab(&self.snapshot.workloads, t),
            None => Vec::new(),
        }
    }

    pub fn selected_workload(&self) -> Option<&Workload> {
        self.visible().get(self.selected).copied()
    }

    pub fn next_tab(&mut self) {
        self.tab = (self.tab + 1) % (HELP_TAB + 1);
        self.selected = 0;
    }

    pub fn prev_tab(&mut self) {
        self.tab = (self.tab + HELP_TAB) % (HELP_TAB + 1);
        self.selected = 0;
    }

    pub fn move_selection(&mut self, delta: isize) {
        let n = self.visible().len();
        if n == 0 {
            self.selected = 0;
            return;
        }
        let next = self.selected as isize + delta;
        self.selected = next.clamp(0, n as isize - 1) as usize;
    }

    /// Mirror the loader: reopening keeps the selected facet.
    pub fn open_detail(&mut self, key: &str) {
        let facet = self
            .detail
            .as_ref()
            .map(|d| d.facet)
            .unwrap_or_default();
        self.detail = Some(DetailState {
            key: key.to_string(),
            facet,
            views: HashMap::new(),
            scroll: 0,
        });
    }

    pub fn select_facet(&mut self, facet: FacetKind) {
        if let Some(d) = self.detail.as_mut() {
            d.facet = facet;
            d.scroll = 0;
        }
    }

    pub fn apply_event(&mut self, ev: ConsoleEvent) {
        match ev {
            ConsoleEvent::Snapshot(snap) => self.apply_snapshot(snap),
            ConsoleEvent::Facet(update) => {
                if let Some(d) = self.detail.as_mut() {
                    if d.key == update.key {
                        d.views.insert(update.facet, update.view);
                    }
                }
            }
            ConsoleEvent::Notification(n) => self.notification = n,
            ConsoleEvent::Info(msg) => self.info = msg,
            ConsoleEvent::SessionEnded => self.session_ended = true,
        }
    }

    /// Replace the snapshot, keeping the cursor on the same workload when it survives.
    fn apply_snapshot(&mut self, snap: InventorySnapshot) {
        let selected_name = self.selected_workload().map(|w| w.name.clone());
        self.snapshot = snap;
        if let Some(name) = selected_name {
            if let Some(i) = self.visible().iter().position(|w| w.name == name) {
                self.selected = i;
            }
        }
        self.move_selection(0);
        if let Some(err) = &self.snapshot.error {
            self.info = err.clone();
        }
    }

    pub fn create_type(type_idx: usize) -> &'static str {
        SERVICE_TYPES[type_idx % SERVICE_TYPES.len()]
    }
}
