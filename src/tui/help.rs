use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &'static str, pad: usize, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(" ".repeat(pad)),
        Span::raw(desc),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit"),
        ]),
        key_line("tab", 9, "Next category (shift-tab: previous)"),
        key_line("↑/↓ j/k", 5, "Move selection"),
        key_line("enter", 7, "Open details"),
        key_line("esc", 9, "Close details / dialog, dismiss notification"),
        key_line("r", 11, "Refresh inventory (in details: reload facet)"),
        key_line("n", 11, "Create workload"),
        key_line("d", 11, "Delete selected (asks for confirmation)"),
        key_line("R", 11, "Restart selected"),
        key_line("b", 11, "Back up selected"),
        key_line("y", 11, "Copy external address to clipboard"),
        key_line("L", 11, "Log out"),
        key_line("?", 11, "Show this help"),
        Line::from(""),
        Line::from("Details:"),
        key_line("1-5", 9, "Info, Logs, Metrics, Env, Storage"),
        key_line("PgUp/PgDn", 3, "Scroll"),
        Line::from(""),
        Line::from("Create dialog:"),
        key_line("←/→", 9, "Cycle service type"),
        key_line("text", 8, "Image for the custom type"),
        key_line("enter", 7, "Submit"),
        Line::from(""),
        Line::from("Metrics refresh automatically while their facet is open."),
        Line::from("Environment changes replace the whole set; use the CLI `env set`."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
