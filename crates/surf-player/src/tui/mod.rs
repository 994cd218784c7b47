//! Terminal front end: input surface, on-screen display and config form.
//!
//! - A blocking task reads terminal events and forwards them over mpsc.
//! - Controller snapshots arrive on a watch channel; each one triggers a redraw.
//! - Keys are folded into `RemoteKey`s and sent to the controller; nothing
//!   here mutates playback state directly.

mod channel_list;
mod config_form;
mod theme;

use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MediaKeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use surf_proto::protocol::{Command, ControllerSnapshot, Phase, PlaybackStatus, RemoteKey};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::core::CoreEvent;
use channel_list::{ChannelListPane, ListAction, LIST_WIDTH};
use config_form::{ConfigForm, FormAction};
use theme::{
    faded, style_bold, style_default, style_muted, style_secondary, C_ACCENT, C_CONNECTING, C_ERROR,
    C_PANEL_BORDER, C_PLAYING, C_PRIMARY,
};

/// What a terminal key means to the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Remote(RemoteKey),
    Refresh,
    ToggleChannelList,
    Quit,
}

/// Fold terminal keys (and their aliases) into the remote vocabulary.
pub fn map_key(key: &KeyEvent) -> Option<KeyAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(KeyAction::Quit);
    }
    let remote = match key.code {
        KeyCode::PageUp | KeyCode::Up | KeyCode::Char('+') => RemoteKey::ChannelUp,
        KeyCode::PageDown | KeyCode::Down | KeyCode::Char('-') => RemoteKey::ChannelDown,
        KeyCode::Char(c @ '0'..='9') => RemoteKey::Digit(c as u8 - b'0'),
        KeyCode::Char('m') | KeyCode::F(1) | KeyCode::Menu => RemoteKey::Menu,
        KeyCode::Char('f') => RemoteKey::Fullscreen,
        KeyCode::Esc => RemoteKey::Escape,
        KeyCode::Char(' ')
        | KeyCode::Media(MediaKeyCode::PlayPause | MediaKeyCode::Play | MediaKeyCode::Pause) => RemoteKey::PlayPause,
        KeyCode::Char('r') => return Some(KeyAction::Refresh),
        KeyCode::Char('l') => return Some(KeyAction::ToggleChannelList),
        KeyCode::Char('q') => return Some(KeyAction::Quit),
        _ => return None,
    };
    Some(KeyAction::Remote(remote))
}

pub struct App {
    events: mpsc::Sender<CoreEvent>,
    snapshots: watch::Receiver<ControllerSnapshot>,
    snapshot: ControllerSnapshot,
    form: ConfigForm,
    channel_list: ChannelListPane,
    log_path: PathBuf,
    /// When the overlay started fading out, with the fade length.
    fade: Option<(Instant, Duration)>,
    should_quit: bool,
}

impl App {
    pub fn new(
        events: mpsc::Sender<CoreEvent>,
        snapshots: watch::Receiver<ControllerSnapshot>,
        saved_username: Option<String>,
        log_path: PathBuf,
    ) -> Self {
        let snapshot = snapshots.borrow().clone();
        Self {
            events,
            snapshots,
            snapshot,
            form: ConfigForm::new(saved_username.as_deref()),
            channel_list: ChannelListPane::new(),
            log_path,
            fade: None,
            should_quit: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let result = self.event_loop(&mut terminal).await;

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        result
    }

    async fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<Event>(256);
        tokio::task::spawn_blocking(move || loop {
            if tx.is_closed() {
                break;
            }
            match event::poll(Duration::from_millis(250)) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if tx.blocking_send(ev).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {}
                Err(_) => break,
            }
        });

        // Fade animation frames.
        let mut fade_tick = tokio::time::interval(Duration::from_millis(100));
        fade_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal.draw(|f| self.draw(f))?;
            }
            needs_redraw = false;

            if self.should_quit {
                break;
            }

            tokio::select! {
                Some(ev) = rx.recv() => {
                    needs_redraw = self.handle_event(ev).await;
                }
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        info!("App: controller gone, exiting");
                        break;
                    }
                    let snapshot = self.snapshots.borrow_and_update().clone();
                    self.on_snapshot(snapshot);
                    needs_redraw = true;
                }
                _ = fade_tick.tick() => {
                    needs_redraw = self.fade.is_some();
                    if let Some((started, length)) = self.fade {
                        if started.elapsed() > length {
                            self.fade = None;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn on_snapshot(&mut self, snapshot: ControllerSnapshot) {
        let was_visible = self.snapshot.overlay.name_visible;
        let now_visible = snapshot.overlay.name_visible;
        match (was_visible, now_visible, snapshot.overlay.fade) {
            (true, false, Some(length)) => self.fade = Some((Instant::now(), length)),
            (_, true, _) => self.fade = None,
            _ => {}
        }
        if snapshot.config_open && !self.snapshot.config_open {
            self.form.reset();
        }
        self.snapshot = snapshot;
        self.channel_list.sync(&self.snapshot);
    }

    async fn send(&mut self, cmd: Command) {
        if self.events.send(CoreEvent::Command(cmd)).await.is_err() {
            self.should_quit = true;
        }
    }

    async fn handle_event(&mut self, ev: Event) -> bool {
        let key = match ev {
            Event::Key(key) if key.kind == KeyEventKind::Press => key,
            Event::Resize(..) => return true,
            _ => return false,
        };

        if self.snapshot.config_open {
            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                self.quit().await;
                return true;
            }
            match self.form.handle_key(key) {
                FormAction::Save(credentials) => self.send(Command::SaveCredentials(credentials)).await,
                FormAction::Close => self.send(Command::Key(RemoteKey::Menu)).await,
                FormAction::None => {}
            }
            return true;
        }

        if self.channel_list.is_visible() {
            match self.channel_list.handle_key(key, self.snapshot.channels.as_slice()) {
                ListAction::Pick(source_url) => {
                    self.send(Command::SelectChannel { source_url }).await;
                    return true;
                }
                ListAction::Moved | ListAction::Closed => return true,
                ListAction::Ignored => {}
            }
        }

        match map_key(&key) {
            Some(KeyAction::Remote(remote)) => self.send(Command::Key(remote)).await,
            Some(KeyAction::Refresh) => self.send(Command::RefreshPlaylist).await,
            Some(KeyAction::ToggleChannelList) => self.channel_list.toggle(&self.snapshot),
            Some(KeyAction::Quit) => self.quit().await,
            None => return false,
        }
        true
    }

    async fn quit(&mut self) {
        self.send(Command::Quit).await;
        self.should_quit = true;
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    fn draw(&self, frame: &mut Frame) {
        let [body, status] = Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());
        let stage = if self.channel_list.is_visible() {
            let [list, stage] = Layout::horizontal([Constraint::Length(LIST_WIDTH), Constraint::Min(0)]).areas(body);
            self.channel_list.draw(frame, list, &self.snapshot);
            stage
        } else {
            body
        };

        let block = Block::default()
            .title(Span::styled(" chansurf ", style_secondary()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(C_PANEL_BORDER));
        let inner = block.inner(stage);
        frame.render_widget(block, stage);

        self.draw_stage(frame, inner);
        self.draw_status(frame, status);

        if self.snapshot.config_open {
            self.form.draw(frame, inner, self.snapshot.notice.as_deref());
        }
    }

    /// Overlay color, or `None` when it should not be drawn at all.
    fn overlay_color(&self, visible: bool, color: Color) -> Option<Color> {
        if visible {
            return Some(color);
        }
        let (started, length) = self.fade?;
        let progress = started.elapsed().as_secs_f32() / length.as_secs_f32().max(f32::EPSILON);
        (progress < 1.0).then(|| faded(color, progress))
    }

    fn draw_stage(&self, frame: &mut Frame, area: Rect) {
        let snap = &self.snapshot;
        let [top, middle, bottom] = Layout::vertical([
            Constraint::Length(2),
            Constraint::Min(0),
            Constraint::Length(2),
        ])
        .areas(area);

        let center = match (snap.phase, snap.channel_count, snap.status) {
            (_, _, PlaybackStatus::AttachFailed) => {
                Some(Span::styled("video engine unavailable", style_bold(C_ERROR)))
            }
            (Phase::Bootstrapping, _, _) if !snap.config_open => Some(Span::styled("loading channels…", style_muted())),
            (_, Some(0), _) => Some(Span::styled("no channels available", style_muted())),
            _ => None,
        };
        if let Some(span) = center {
            let [_, row, _] =
                Layout::vertical([Constraint::Min(0), Constraint::Length(1), Constraint::Min(0)]).areas(middle);
            frame.render_widget(Paragraph::new(Line::from(span)).alignment(Alignment::Center), row);
        }

        if let (Some(number), Some(color)) = (
            snap.number_label,
            self.overlay_color(snap.overlay.number_visible, C_ACCENT),
        ) {
            frame.render_widget(
                Paragraph::new(Line::from(Span::styled(format!("{} ", number), style_bold(color))))
                    .alignment(Alignment::Right),
                top,
            );
        }

        if !snap.channel_label.is_empty() {
            let base = match snap.status {
                PlaybackStatus::Unavailable(_) => C_ERROR,
                _ => C_PRIMARY,
            };
            if let Some(color) = self.overlay_color(snap.overlay.name_visible, base) {
                frame.render_widget(
                    Paragraph::new(Line::from(Span::styled(format!(" {}", snap.channel_label), style_bold(color)))),
                    bottom,
                );
            }
        }
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let snap = &self.snapshot;
        let (label, color) = match snap.status {
            PlaybackStatus::Idle => ("idle".to_string(), C_PRIMARY),
            PlaybackStatus::Loading => ("loading".to_string(), C_CONNECTING),
            PlaybackStatus::Playing => ("playing".to_string(), C_PLAYING),
            PlaybackStatus::Paused => ("paused".to_string(), C_CONNECTING),
            PlaybackStatus::Unavailable(kind) => (format!("{} error", kind), C_ERROR),
            PlaybackStatus::AttachFailed => ("no engine".to_string(), C_ERROR),
        };
        let mut spans = vec![
            Span::styled(" ● ", Style::default().fg(color)),
            Span::styled(label, style_default()),
        ];
        if let Some(count) = snap.channel_count {
            spans.push(Span::styled(format!("  {} channels", count), style_secondary()));
        }
        if let Some(at) = snap.last_refresh {
            spans.push(Span::styled(format!("  refreshed {}", at.format("%H:%M")), style_muted()));
        }
        if let Some(notice) = &snap.notice {
            spans.push(Span::styled(format!("  {}", notice), Style::default().fg(C_CONNECTING)));
        }
        spans.push(Span::styled(
            format!("  pgup/pgdn · 0-9 · l list · m menu · f full · r refresh · q quit · log {}", self.log_path.display()),
            style_muted(),
        ));
        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn aliases_fold_into_remote_keys() {
        for code in [KeyCode::PageUp, KeyCode::Up, KeyCode::Char('+')] {
            assert_eq!(map_key(&key(code)), Some(KeyAction::Remote(RemoteKey::ChannelUp)));
        }
        for code in [KeyCode::PageDown, KeyCode::Down, KeyCode::Char('-')] {
            assert_eq!(map_key(&key(code)), Some(KeyAction::Remote(RemoteKey::ChannelDown)));
        }
        for code in [KeyCode::Char('m'), KeyCode::F(1), KeyCode::Menu] {
            assert_eq!(map_key(&key(code)), Some(KeyAction::Remote(RemoteKey::Menu)));
        }
        assert_eq!(
            map_key(&key(KeyCode::Media(MediaKeyCode::PlayPause))),
            Some(KeyAction::Remote(RemoteKey::PlayPause))
        );
        assert_eq!(
            map_key(&key(KeyCode::Char(' '))),
            Some(KeyAction::Remote(RemoteKey::PlayPause))
        );
    }

    #[test]
    fn digits_and_app_keys() {
        assert_eq!(map_key(&key(KeyCode::Char('7'))), Some(KeyAction::Remote(RemoteKey::Digit(7))));
        assert_eq!(map_key(&key(KeyCode::Char('r'))), Some(KeyAction::Refresh));
        assert_eq!(map_key(&key(KeyCode::Char('l'))), Some(KeyAction::ToggleChannelList));
        assert_eq!(map_key(&key(KeyCode::Char('q'))), Some(KeyAction::Quit));
        assert_eq!(
            map_key(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyAction::Quit)
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        assert_eq!(map_key(&key(KeyCode::Char('z'))), None);
        assert_eq!(map_key(&key(KeyCode::Tab)), None);
    }
}
