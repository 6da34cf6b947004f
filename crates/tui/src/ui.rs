use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style, Modifier},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use lastz_core::logger::{self, LogLine};
use lastz_core::types::{InstanceEntry, OrchestratorState};
use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let (banner_label, banner_bg) = {
        let orch = app.orch_state.lock().unwrap();
        match *orch {
            OrchestratorState::Running => ("RUNNING (Press S to stop)", Color::Green),
            OrchestratorState::Stopping => ("STOPPING...", Color::Yellow),
            OrchestratorState::Stopped => ("STOPPED (Press S to start)", Color::Red),
        }
    };

    let mut lines: Vec<Line> = vec![
        Line::from(vec![
            Span::styled(" j", Style::default().fg(Color::Yellow)),
            Span::raw("/"),
            Span::styled("k", Style::default().fg(Color::Yellow)),
            Span::raw(" move, "),
            Span::styled("space", Style::default().fg(Color::Yellow)),
            Span::raw(" enable, "),
            Span::styled("r", Style::default().fg(Color::Yellow)),
            Span::raw(" restart, "),
            Span::styled("l", Style::default().fg(Color::Yellow)),
            Span::raw(" logs, "),
            Span::styled("q", Style::default().fg(Color::Yellow)),
            Span::raw(" quit"),
        ]),
        Line::from(""),
    ];

    {
        let entries = app.state.lock().unwrap();
        for (i, entry) in entries.iter().enumerate() {
            lines.extend(instance_lines(entry, i == app.selected, banner_bg));
        }
    }

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let banner_width = left_chunks[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let pad_right = pad_total - pad_left;
    let centered_banner = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_right));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered_banner,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left_chunks[0]);

    let list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(list, left_chunks[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let max_scroll = total.saturating_sub(visible_height);
        let scroll = app.log_scroll.min(max_scroll);
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end]
            .iter()
            .map(|m| log_line(m))
            .collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

/// Header row plus, for enabled instances, the live task/state and last outcome.
fn instance_lines(entry: &InstanceEntry, selected: bool, accent: Color) -> Vec<Line<'static>> {
    let prefix = if selected { "> " } else { "  " };
    let checkbox = if entry.enabled { "[●]" } else { "[ ]" };
    let mut lines = vec![Line::from(vec![
        Span::raw(prefix),
        Span::styled(checkbox, Style::default().fg(accent)),
        Span::raw(" "),
        Span::styled(entry.name.clone(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::styled(
            format!("  {} · {}", entry.layout, entry.routine.join(", ")),
            Style::default().fg(Color::DarkGray),
        ),
    ])];
    if !entry.enabled {
        return lines;
    }

    if let Some(err) = &entry.error {
        lines.push(Line::from(Span::styled(format!("    err: {}", err), Style::default().fg(Color::Red))));
        return lines;
    }
    let s = &entry.status;
    if let Some(task) = &s.task {
        lines.push(Line::from(vec![
            Span::styled(format!("    {} ", task), Style::default().fg(Color::Yellow)),
            Span::styled(s.state.clone().unwrap_or_default(), Style::default().fg(Color::Cyan)),
        ]));
    }
    if let Some(outcome) = &s.last_outcome {
        let color = if outcome.contains("Aborted") { Color::Red } else { Color::DarkGray };
        lines.push(Line::from(Span::styled(format!("    last: {}", outcome), Style::default().fg(color))));
    }
    lines
}

fn prefix_color(idx: u8) -> Color {
    match idx {
        logger::COLOR_GRAY => Color::DarkGray,
        logger::COLOR_BLUE => Color::LightBlue,
        logger::COLOR_GREEN => Color::LightGreen,
        logger::COLOR_MAGENTA => Color::LightMagenta,
        logger::COLOR_CYAN => Color::Cyan,
        logger::COLOR_YELLOW => Color::Yellow,
        _ => Color::White,
    }
}

/// Colour a structured log line for the log pane.
fn log_line(raw: &str) -> Line<'static> {
    let Some(LogLine { level, prefix, color, timestamp, message }) = logger::parse_line(raw) else {
        return Line::from(raw.to_string());
    };
    let line_color = prefix_color(color);

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];
    match level.as_str() {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(line_color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(line_color)));
    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastz_core::types::InstanceStatus;

    #[test]
    fn unstructured_log_line_is_kept_verbatim() {
        let line = log_line("plain text");
        assert_eq!(line.spans.len(), 1);
    }

    #[test]
    fn warn_line_gets_level_tag_and_prefix() {
        let line = log_line("WARN\x1ffarm1\x1f3\x1f10:00:00\x1fretrying");
        let text: Vec<String> = line.spans.iter().map(|s| s.content.to_string()).collect();
        assert_eq!(text, vec!["10:00:00", " ", "warn ", "farm1", " ", "retrying"]);
        assert_eq!(line.spans[3].style.fg, Some(Color::LightGreen));
    }

    #[test]
    fn disabled_instance_shows_header_only() {
        let entry = InstanceEntry {
            name: "farm1".into(),
            layout: "540p".into(),
            routine: vec!["radar_quests".into()],
            enabled: false,
            status: InstanceStatus { task: Some("radar_quests".into()), ..Default::default() },
            error: None,
        };
        assert_eq!(instance_lines(&entry, true, Color::Green).len(), 1);
        let running = InstanceEntry { enabled: true, ..entry };
        assert_eq!(instance_lines(&running, false, Color::Green).len(), 2);
    }
}
