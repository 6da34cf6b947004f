use ratatui::{
    Frame,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

/// Modal yes/no prompt drawn over the instance list.
pub struct ConfirmDialog {
    pub message: String,
    pub selected: bool, // true = Yes, false = No
}

impl ConfirmDialog {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            selected: false,
        }
    }

    pub fn toggle(&mut self) {
        self.selected = !self.selected;
    }

    fn button(label: &str, active: bool, bg: Color) -> Span<'_> {
        let style = if active {
            Style::default().fg(Color::Black).bg(bg).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        Span::styled(label, style)
    }

    pub fn render(&self, f: &mut Frame) {
        let width = (self.message.chars().count() as u16 + 6).max(34);
        let area = centered_rect(width, 6, f.area());
        f.render_widget(Clear, area);

        let lines = vec![
            Line::from(""),
            Line::from(Span::styled(self.message.as_str(), Style::default().fg(Color::White))),
            Line::from(""),
            Line::from(vec![
                Self::button("  [Yes]  ", self.selected, Color::Green),
                Span::raw("   "),
                Self::button("  [No]  ", !self.selected, Color::Red),
            ]),
        ];
        let dialog = Paragraph::new(lines).alignment(Alignment::Center).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(" Quit "),
        );
        f.render_widget(dialog, area);
    }
}

/// Return a centered `Rect` of `width` columns and `height` rows inside `area`.
fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_no() {
        let mut d = ConfirmDialog::new("Quit?");
        assert!(!d.selected);
        d.toggle();
        assert!(d.selected);
    }

    #[test]
    fn centered_rect_is_clamped() {
        let r = centered_rect(80, 10, Rect::new(0, 0, 40, 5));
        assert_eq!((r.width, r.height), (40, 5));
        assert_eq!(centered_rect(10, 2, Rect::new(0, 0, 30, 10)), Rect::new(10, 4, 10, 2));
    }
}
