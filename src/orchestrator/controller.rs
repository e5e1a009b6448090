//! Dashboard lifecycle controller.
//!
//! Owns polling, detail facets and action dispatch for one session and emits
//! events for presentation layers.

use super::Console;
use crate::dispatcher::{Action, ActionOutcome};
use crate::facets::FacetKind;
use crate::model::ConsoleEvent;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio::time::Duration;

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Refresh,
    Dispatch { key: String, action: Action },
    OpenDetail(String),
    SelectFacet(FacetKind),
    CloseDetail,
    DismissNotification,
    Logout,
    Quit,
}

/// Forward the notification slot when it changed since the last call.
fn publish_notice(console: &Console, event_tx: &UnboundedSender<ConsoleEvent>, last: &mut Option<u64>) {
    let current = console.notices.current_notification();
    let id = current.as_ref().map(|n| n.id);
    if id != *last {
        *last = id;
        let _ = event_tx.send(ConsoleEvent::Notification(current));
    }
}

/// Run the dashboard until the UI quits or the session ends.
pub(crate) async fn run_controller(
    console: Arc<Console>,
    event_tx: UnboundedSender<ConsoleEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    if !console.guard.is_active() {
        let _ = event_tx.send(ConsoleEvent::SessionEnded);
        return Ok(());
    }

    {
        let tx = event_tx.clone();
        console.poller.on_snapshot(move |snap| {
            let _ = tx.send(ConsoleEvent::Snapshot(snap.clone()));
        });
        let tx = event_tx.clone();
        console.facets.on_data(move |update| {
            let _ = tx.send(ConsoleEvent::Facet(update.clone()));
        });
    }

    let mut redirects = console.guard.redirects();
    console.poller.start(console.cfg.poll_interval);

    // Dispatches run off the loop so a slow mutation never blocks commands.
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut last_notice: Option<u64> = None;
    // Notifications expire lazily; re-check often enough to clear them on time.
    let mut notice_tick = tokio::time::interval(Duration::from_millis(500));

    let ended = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Refresh) => {
                        let poller = console.poller.clone();
                        tasks.spawn(async move {
                            poller.force_refresh().await;
                        });
                    }
                    Some(UiCommand::Dispatch { key, action }) => {
                        let c = console.clone();
                        let tx = event_tx.clone();
                        tasks.spawn(async move {
                            let kind = action.kind();
                            if c.dispatcher.dispatch(&key, action).await == ActionOutcome::Busy {
                                let _ = tx.send(ConsoleEvent::Info(format!(
                                    "{kind} already in progress for {key}"
                                )));
                            }
                        });
                        // The dispatcher may have resolved synchronously (validation).
                        publish_notice(&console, &event_tx, &mut last_notice);
                    }
                    Some(UiCommand::OpenDetail(key)) => console.facets.open(&key),
                    Some(UiCommand::SelectFacet(facet)) => console.facets.select_facet(facet),
                    Some(UiCommand::CloseDetail) => console.facets.close(),
                    Some(UiCommand::DismissNotification) => {
                        console.notices.dismiss();
                        publish_notice(&console, &event_tx, &mut last_notice);
                    }
                    Some(UiCommand::Logout) => {
                        // The redirect branch below finishes the teardown.
                        console.guard.logout();
                    }
                    Some(UiCommand::Quit) | None => break false,
                }
            }
            changed = redirects.changed() => {
                if changed.is_err() || *redirects.borrow_and_update() {
                    break true;
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(error = %e, "controller task panicked");
                    }
                }
                publish_notice(&console, &event_tx, &mut last_notice);
            }
            _ = notice_tick.tick() => {
                publish_notice(&console, &event_tx, &mut last_notice);
            }
        }
    };

    console.poller.stop();
    console.facets.close();
    tasks.abort_all();
    if ended {
        tracing::info!("session ended, leaving dashboard");
        publish_notice(&console, &event_tx, &mut last_notice);
        let _ = event_tx.send(ConsoleEvent::SessionEnded);
    }
    Ok(())
}
