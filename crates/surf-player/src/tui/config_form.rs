//! ConfigForm: credential entry popup, built on tui-input.
//!
//! Tab / arrows switch fields, Enter saves once both fields are filled,
//! Esc or F1 closes the form.

use ratatui::crossterm::event::{Event, KeyCode, KeyEvent};
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};
use surf_proto::state::Credentials;
use tui_input::{backend::crossterm::EventHandler, Input};

use super::theme::{
    style_bold, style_muted, style_secondary, C_ERROR, C_FILTER_BG, C_FILTER_FG, C_PANEL_BORDER_FOCUSED, C_PRIMARY,
};

#[derive(Debug, PartialEq, Eq)]
pub enum FormAction {
    Save(Credentials),
    Close,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Username,
    Password,
}

pub struct ConfigForm {
    username: Input,
    password: Input,
    focus: Field,
    error: Option<String>,
}

impl ConfigForm {
    /// `username` pre-fills the form from the stored credentials.
    pub fn new(username: Option<&str>) -> Self {
        let mut form = Self {
            username: username.map_or_else(Input::default, |u| Input::new(u.to_string())),
            password: Input::default(),
            focus: Field::Username,
            error: None,
        };
        form.reset();
        form
    }

    /// Called whenever the form opens. The password is never kept around.
    pub fn reset(&mut self) {
        self.password = Input::default();
        self.focus = if self.username.value().is_empty() {
            Field::Username
        } else {
            Field::Password
        };
        self.error = None;
    }

    fn focused_mut(&mut self) -> &mut Input {
        match self.focus {
            Field::Username => &mut self.username,
            Field::Password => &mut self.password,
        }
    }

    fn switch_focus(&mut self) {
        self.focus = match self.focus {
            Field::Username => Field::Password,
            Field::Password => Field::Username,
        };
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> FormAction {
        match key.code {
            KeyCode::Esc | KeyCode::F(1) => FormAction::Close,
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.switch_focus();
                FormAction::None
            }
            KeyCode::Enter => {
                if self.focus == Field::Username && self.password.value().is_empty() {
                    self.focus = Field::Password;
                    return FormAction::None;
                }
                let credentials = Credentials::new(self.username.value().trim(), self.password.value());
                if credentials.is_complete() {
                    self.error = None;
                    FormAction::Save(credentials)
                } else {
                    self.error = Some("username and password are required".to_string());
                    FormAction::None
                }
            }
            _ => {
                self.focused_mut().handle_event(&Event::Key(key));
                self.error = None;
                FormAction::None
            }
        }
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect, notice: Option<&str>) {
        let popup = centered_rect(52, 9, area);
        frame.render_widget(Clear, popup);

        let block = Block::default()
            .title(Span::styled(" account ", style_bold(C_PRIMARY)))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(C_PANEL_BORDER_FOCUSED));
        let inner = block.inner(popup);
        frame.render_widget(block, popup);

        let rows = Layout::vertical([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);

        let masked = "•".repeat(self.password.value().chars().count());
        self.draw_field(frame, rows[0], "username", self.username.value(), Field::Username);
        self.draw_field(frame, rows[2], "password", &masked, Field::Password);

        let message = match (&self.error, notice) {
            (Some(err), _) => Span::styled(err.clone(), Style::default().fg(C_ERROR)),
            (None, Some(notice)) => Span::styled(notice.to_string(), style_secondary()),
            (None, None) => Span::raw(""),
        };
        frame.render_widget(Paragraph::new(Line::from(message)), rows[3]);
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                "tab switch · enter save · esc close",
                style_muted(),
            ))),
            rows[4],
        );

        let cursor = match self.focus {
            Field::Username => (rows[0], self.username.visual_cursor()),
            Field::Password => (rows[2], self.password.visual_cursor()),
        };
        let x = cursor.0.x + LABEL_WIDTH + cursor.1 as u16;
        frame.set_cursor_position((x.min(cursor.0.right().saturating_sub(1)), cursor.0.y));
    }

    fn draw_field(&self, frame: &mut Frame, area: Rect, label: &str, value: &str, field: Field) {
        let label_style = if self.focus == field {
            style_bold(C_FILTER_FG)
        } else {
            style_secondary()
        };
        let line = Line::from(vec![
            Span::styled(format!("{:<10}", label), label_style),
            Span::styled(value.to_string(), Style::default().fg(C_PRIMARY)),
        ]);
        frame.render_widget(Paragraph::new(line).style(Style::default().bg(C_FILTER_BG)), area);
    }
}

const LABEL_WIDTH: u16 = 10;

fn centered_rect(width: u16, height: u16, r: Rect) -> Rect {
    let [_, row, _] = Layout::vertical([Constraint::Min(0), Constraint::Length(height), Constraint::Min(0)]).areas(r);
    let [_, cell, _] =
        Layout::horizontal([Constraint::Min(0), Constraint::Length(width), Constraint::Min(0)]).areas(row);
    cell
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;

    fn press(form: &mut ConfigForm, code: KeyCode) -> FormAction {
        form.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(form: &mut ConfigForm, text: &str) {
        for c in text.chars() {
            press(form, KeyCode::Char(c));
        }
    }

    #[test]
    fn enter_moves_to_password_then_saves() {
        let mut form = ConfigForm::new(None);
        type_text(&mut form, "viewer");
        assert_eq!(press(&mut form, KeyCode::Enter), FormAction::None);
        type_text(&mut form, "s3cret");
        assert_eq!(
            press(&mut form, KeyCode::Enter),
            FormAction::Save(Credentials::new("viewer", "s3cret"))
        );
    }

    #[test]
    fn incomplete_form_is_not_saved() {
        let mut form = ConfigForm::new(None);
        press(&mut form, KeyCode::Tab);
        type_text(&mut form, "pw");
        assert_eq!(press(&mut form, KeyCode::Enter), FormAction::None);
        assert!(form.error.is_some());
        type_text(&mut form, "x");
        assert!(form.error.is_none());
    }

    #[test]
    fn reset_clears_password_and_focuses_it() {
        let mut form = ConfigForm::new(None);
        type_text(&mut form, "viewer");
        press(&mut form, KeyCode::Tab);
        type_text(&mut form, "pw");
        form.reset();
        assert_eq!(form.password.value(), "");
        assert_eq!(form.username.value(), "viewer");
        assert_eq!(form.focus, Field::Password);
    }

    #[test]
    fn escape_and_menu_key_close() {
        let mut form = ConfigForm::new(None);
        assert_eq!(press(&mut form, KeyCode::Esc), FormAction::Close);
        assert_eq!(press(&mut form, KeyCode::F(1)), FormAction::Close);
    }

    #[test]
    fn stored_username_is_prefilled() {
        let mut form = ConfigForm::new(Some("viewer"));
        assert_eq!(form.username.value(), "viewer");
        assert_eq!(form.focus, Field::Password);
        type_text(&mut form, "pw");
        assert_eq!(
            press(&mut form, KeyCode::Enter),
            FormAction::Save(Credentials::new("viewer", "pw"))
        );
    }
}
