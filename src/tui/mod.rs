mod help;
mod state;

use crate::api::HttpConsoleApi;
use crate::config::ConsoleConfig;
use crate::dispatcher::Action;
use crate::facets::{FacetData, FacetKind, FacetView};
use crate::model::{ConsoleEvent, WorkloadStatus, SERVICE_TYPES};
use crate::notify::Severity;
use crate::orchestrator::{self, Console, UiCommand};
use crate::session::SessionGuard;
use crate::text_summary;
use anyhow::{bail, Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, TableState, Tabs, Wrap},
    Terminal,
};
use state::{DetailState, Modal, UiState, HELP_TAB};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(
    cfg: ConsoleConfig,
    guard: Arc<SessionGuard>,
    api: Arc<HttpConsoleApi>,
) -> Result<()> {
    if !guard.is_active() {
        bail!("not logged in; run `tenant-console login <username>`");
    }
    crate::logging::init_file(&ConsoleConfig::log_path())?;
    tracing::info!("dashboard starting");
    let tenant = guard.tenant().unwrap_or_default();
    let console = Arc::new(Console::new(cfg, guard.clone(), api));

    let (event_tx, event_rx) = mpsc::unbounded_channel::<ConsoleEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(tenant, event_rx, cmd_tx));

    let res = orchestrator::run_controller(console, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    if !guard.is_active() {
        eprintln!("Session ended. Run `tenant-console login <username>` to sign in again.");
    }
    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    tenant: String,
    mut event_rx: UnboundedReceiver<ConsoleEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        tenant,
        info: "Loading workloads…".into(),
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        let mut controller_gone = false;
        loop {
            match event_rx.try_recv() {
                Ok(ev) => state.apply_event(ev),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    controller_gone = true;
                    break;
                }
            }
        }
        if state.session_ended || controller_gone {
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if let (KeyModifiers::CONTROL, KeyCode::Char('c')) = (k.modifiers, k.code) {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
                if state.modal.is_some() {
                    handle_modal_key(&mut state, &cmd_tx, k.code);
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Tab) => state.next_tab(),
                    (_, KeyCode::BackTab) => state.prev_tab(),
                    (_, KeyCode::Char('?')) => state.tab = HELP_TAB,
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => state.move_selection(1),
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => state.move_selection(-1),
                    (_, KeyCode::PageDown) => {
                        if let Some(d) = state.detail.as_mut() {
                            d.scroll = d.scroll.saturating_add(10);
                        }
                    }
                    (_, KeyCode::PageUp) => {
                        if let Some(d) = state.detail.as_mut() {
                            d.scroll = d.scroll.saturating_sub(10);
                        }
                    }
                    (_, KeyCode::Enter) => {
                        if let Some(name) = state.selected_workload().map(|w| w.name.clone()) {
                            state.open_detail(&name);
                            let _ = cmd_tx.send(UiCommand::OpenDetail(name));
                        }
                    }
                    (_, KeyCode::Esc) => {
                        if state.detail.take().is_some() {
                            let _ = cmd_tx.send(UiCommand::CloseDetail);
                        } else if state.notification.is_some() {
                            let _ = cmd_tx.send(UiCommand::DismissNotification);
                        }
                    }
                    (_, KeyCode::Char(c @ '1'..='5')) => {
                        if state.detail.is_some() {
                            let facet = FacetKind::ALL[(c as u8 - b'1') as usize];
                            state.select_facet(facet);
                            let _ = cmd_tx.send(UiCommand::SelectFacet(facet));
                        }
                    }
                    (_, KeyCode::Char('r')) => match state.detail.as_ref().map(|d| d.facet) {
                        Some(facet) => {
                            let _ = cmd_tx.send(UiCommand::SelectFacet(facet));
                        }
                        None => {
                            state.info = "Refreshing…".into();
                            let _ = cmd_tx.send(UiCommand::Refresh);
                        }
                    },
                    (_, KeyCode::Char('n')) => state.modal = Some(Modal::create()),
                    (_, KeyCode::Char('d')) => {
                        if let Some(name) = state.selected_workload().map(|w| w.name.clone()) {
                            state.modal = Some(Modal::ConfirmDelete { name });
                        }
                    }
                    (_, KeyCode::Char('R')) => {
                        if let Some(name) = state.selected_workload().map(|w| w.name.clone()) {
                            let _ = cmd_tx.send(UiCommand::Dispatch {
                                key: name,
                                action: Action::Restart,
                            });
                        }
                    }
                    (_, KeyCode::Char('b')) => {
                        if let Some(name) = state.selected_workload().map(|w| w.name.clone()) {
                            let _ = cmd_tx.send(UiCommand::Dispatch {
                                key: name,
                                action: Action::CreateBackup,
                            });
                        }
                    }
                    (_, KeyCode::Char('y')) => {
                        let addr = state
                            .selected_workload()
                            .and_then(|w| w.external_address.clone());
                        state.info = match addr {
                            Some(a) => match copy_to_clipboard(&a) {
                                Ok(()) => format!("Copied {a}"),
                                Err(e) => format!("Clipboard failed: {e:#}"),
                            },
                            None => "Selected workload has no external address".into(),
                        };
                    }
                    (_, KeyCode::Char('L')) => {
                        let _ = cmd_tx.send(UiCommand::Logout);
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn handle_modal_key(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>, code: KeyCode) {
    let Some(modal) = state.modal.as_mut() else {
        return;
    };
    match modal {
        Modal::ConfirmDelete { name } => match code {
            KeyCode::Char('y') | KeyCode::Enter => {
                let _ = cmd_tx.send(UiCommand::Dispatch {
                    key: name.clone(),
                    action: Action::Delete,
                });
                state.modal = None;
            }
            KeyCode::Char('n') | KeyCode::Esc => state.modal = None,
            _ => {}
        },
        Modal::Create { type_idx, image } => {
            let custom = UiState::create_type(*type_idx) == "custom";
            match code {
                KeyCode::Esc => state.modal = None,
                KeyCode::Left => *type_idx = (*type_idx + SERVICE_TYPES.len() - 1) % SERVICE_TYPES.len(),
                KeyCode::Right => *type_idx = (*type_idx + 1) % SERVICE_TYPES.len(),
                KeyCode::Backspace if custom => {
                    image.pop();
                }
                KeyCode::Char(c) if custom => image.push(c),
                KeyCode::Enter => {
                    let service_type = UiState::create_type(*type_idx).to_string();
                    let custom_image = Some(image.clone()).filter(|s| !s.is_empty());
                    let _ = cmd_tx.send(UiCommand::Dispatch {
                        key: service_type.clone(),
                        action: Action::Create {
                            service_type,
                            custom_image,
                        },
                    });
                    state.modal = None;
                }
                _ => {}
            }
        }
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);

    let mut titles: Vec<Line> = crate::classify::Tab::ALL
        .iter()
        .map(|t| Line::from(t.label()))
        .collect();
    titles.push(Line::from("Help"));
    let tabs = Tabs::new(titles)
        .select(state.tab)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("tenant-console · {}", state.tenant)),
        )
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    let header = text_summary::inventory_summary(&state.snapshot.workloads);
    let header_line = header.lines.first().cloned().unwrap_or_default();
    let updated = state
        .snapshot
        .fetched_at
        .as_deref()
        .map(|t| format!("  |  updated {t}"))
        .unwrap_or_default();
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::raw(header_line),
            Span::styled(updated, Style::default().fg(Color::DarkGray)),
        ])),
        chunks[1],
    );

    if state.tab == HELP_TAB {
        help::draw_help(chunks[2], f);
    } else if let Some(detail) = state.detail.as_ref() {
        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)].as_ref())
            .split(chunks[2]);
        draw_table(body[0], f, state);
        draw_detail(body[1], f, state, detail);
    } else {
        draw_table(chunks[2], f, state);
    }

    draw_status_bar(chunks[3], f, state);

    if let Some(modal) = state.modal.as_ref() {
        draw_modal(area, f, modal);
    }
}

fn status_color(status: WorkloadStatus) -> Color {
    match status {
        WorkloadStatus::Running => Color::Green,
        WorkloadStatus::Pending => Color::Yellow,
        WorkloadStatus::Failed => Color::Red,
        WorkloadStatus::Terminated => Color::Gray,
        WorkloadStatus::Unknown => Color::DarkGray,
    }
}

fn draw_table(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let visible = state.visible();
    let rows: Vec<Row> = visible
        .iter()
        .map(|w| {
            Row::new(vec![
                Cell::from(w.name.clone()),
                Cell::from(w.service_type.clone()),
                Cell::from(w.status.label())
                    .style(Style::default().fg(status_color(w.status))),
                Cell::from(w.age.clone()),
                Cell::from(w.restart_count.to_string()),
                Cell::from(
                    w.cpu_percent
                        .map(|p| format!("{p:.0}%"))
                        .unwrap_or_else(|| "-".into()),
                ),
                Cell::from(format!("${:.2}", w.cost)),
            ])
        })
        .collect();

    let title = match state.current_tab() {
        Some(t) => format!("{} ({})", t.label(), visible.len()),
        None => String::new(),
    };
    let table = Table::new(
        rows,
        [
            Constraint::Min(16),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(8),
            Constraint::Length(4),
            Constraint::Length(5),
            Constraint::Length(9),
        ],
    )
    .header(
        Row::new(vec!["Name", "Type", "Status", "Age", "Rst", "CPU", "Cost/mo"])
            .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().borders(Borders::ALL).title(title))
    .row_highlight_style(Style::default().bg(Color::DarkGray));

    let mut table_state = TableState::default();
    if !visible.is_empty() {
        table_state.select(Some(state.selected));
    }
    f.render_stateful_widget(table, area, &mut table_state);
}

fn facet_lines(state: &UiState, detail: &DetailState) -> Vec<Line<'static>> {
    let to_lines = |v: Vec<String>| v.into_iter().map(Line::from).collect::<Vec<_>>();
    if detail.facet == FacetKind::Info {
        return match state.snapshot.find(&detail.key) {
            Some(w) => to_lines(text_summary::workload_info(w).lines),
            None => vec![Line::styled(
                "Workload no longer exists",
                Style::default().fg(Color::Yellow),
            )],
        };
    }
    match detail.views.get(&detail.facet) {
        None | Some(FacetView::Loading) => {
            vec![Line::styled("Loading…", Style::default().fg(Color::DarkGray))]
        }
        Some(FacetView::Info) => Vec::new(),
        Some(FacetView::Error(e)) => vec![Line::styled(e.clone(), Style::default().fg(Color::Red))],
        Some(FacetView::Ready(data)) => match data {
            FacetData::Logs(s) if s.is_empty() => vec![Line::from("(no logs)")],
            FacetData::Logs(s) => s.lines().map(|l| Line::from(l.to_string())).collect(),
            FacetData::Metrics(m) => to_lines(text_summary::metrics_lines(m).lines),
            FacetData::Environment(env) => to_lines(text_summary::env_lines(env).lines),
            FacetData::Storage(v) => to_lines(text_summary::storage_lines(v).lines),
        },
    }
}

fn draw_detail(area: Rect, f: &mut ratatui::Frame, state: &UiState, detail: &DetailState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let selected = FacetKind::ALL
        .iter()
        .position(|k| *k == detail.facet)
        .unwrap_or(0);
    let tabs = Tabs::new(
        FacetKind::ALL
            .iter()
            .enumerate()
            .map(|(i, k)| Line::from(format!("{} {}", i + 1, k.label())))
            .collect::<Vec<_>>(),
    )
    .select(selected)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(detail.key.clone()),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    let p = Paragraph::new(facet_lines(state, detail))
        .wrap(Wrap { trim: false })
        .scroll((detail.scroll, 0))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(p, chunks[1]);
}

fn draw_status_bar(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let line = match state.notification.as_ref() {
        Some(n) => {
            let color = match n.severity {
                Severity::Success => Color::Green,
                Severity::Info => Color::Cyan,
                Severity::Warning => Color::Yellow,
                Severity::Error => Color::Red,
            };
            Line::styled(n.message.clone(), Style::default().fg(color))
        }
        None => Line::styled(state.info.clone(), Style::default().fg(Color::Gray)),
    };
    f.render_widget(Paragraph::new(line), area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

fn draw_modal(area: Rect, f: &mut ratatui::Frame, modal: &Modal) {
    let key = Style::default().fg(Color::Magenta);
    let (title, lines) = match modal {
        Modal::ConfirmDelete { name } => (
            "Delete workload",
            vec![
                Line::from(format!("Delete {name}? This cannot be undone.")),
                Line::from(""),
                Line::from(vec![
                    Span::styled("y", key),
                    Span::raw(" delete   "),
                    Span::styled("n", key),
                    Span::raw(" cancel"),
                ]),
            ],
        ),
        Modal::Create { type_idx, image } => {
            let ty = UiState::create_type(*type_idx);
            let mut lines = vec![Line::from(vec![
                Span::raw("Type:  "),
                Span::styled("◀ ", key),
                Span::styled(ty, Style::default().fg(Color::Yellow)),
                Span::styled(" ▶", key),
            ])];
            if ty == "custom" {
                lines.push(Line::from(format!("Image: {image}_")));
            }
            lines.push(Line::from(""));
            lines.push(Line::from(vec![
                Span::styled("enter", key),
                Span::raw(" create   "),
                Span::styled("esc", key),
                Span::raw(" cancel"),
            ]));
            ("Create workload", lines)
        }
    };
    let rect = centered(area, 52, lines.len() as u16 + 2);
    f.render_widget(Clear, rect);
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title)),
        rect,
    );
}

// Global clipboard manager channel - initialized once on first use
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;

static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Clipboard contents live only as long as the `Clipboard` that set them on
/// some platforms, so a dedicated thread holds each one briefly.
fn init_clipboard_manager() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });
        tx
    })
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    init_clipboard_manager()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}
