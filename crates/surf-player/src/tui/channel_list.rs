//! ChannelListPane: the whole playlist down the left edge, pickable with the
//! arrow keys. The cursor is local to the pane; only Enter reaches the
//! controller, as a pick by source URL.

use ratatui::crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState},
    Frame,
};
use surf_proto::channel::Channel;
use surf_proto::protocol::{ControllerSnapshot, PlaybackStatus};

use super::theme::{
    style_bold, style_muted, style_secondary, C_CONNECTING, C_ERROR, C_MUTED, C_PANEL_BORDER_FOCUSED, C_PLAYING,
    C_PRIMARY, C_SELECTION_BG,
};

pub const LIST_WIDTH: u16 = 36;

const PAGE: usize = 10;

#[derive(Debug, PartialEq, Eq)]
pub enum ListAction {
    /// Tune to this source.
    Pick(String),
    Moved,
    Closed,
    /// Not a pane key; handle it as a remote key.
    Ignored,
}

#[derive(Debug, Default)]
pub struct ChannelListPane {
    visible: bool,
    cursor: usize,
}

impl ChannelListPane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Show the pane with the cursor on the current channel, or hide it.
    pub fn toggle(&mut self, snapshot: &ControllerSnapshot) {
        self.visible = !self.visible;
        if self.visible {
            self.cursor = snapshot.current.as_ref().map_or(0, |c| c.index);
        }
    }

    /// Keep the cursor inside a list that may have shrunk on refresh.
    pub fn sync(&mut self, snapshot: &ControllerSnapshot) {
        self.cursor = self.cursor.min(snapshot.channels.len().saturating_sub(1));
    }

    pub fn handle_key(&mut self, key: KeyEvent, channels: &[Channel]) -> ListAction {
        let last = channels.len().saturating_sub(1);
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down | KeyCode::Char('j') => self.cursor = (self.cursor + 1).min(last),
            KeyCode::PageUp => self.cursor = self.cursor.saturating_sub(PAGE),
            KeyCode::PageDown => self.cursor = (self.cursor + PAGE).min(last),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.cursor = last,
            KeyCode::Enter => {
                return match channels.get(self.cursor) {
                    Some(channel) => ListAction::Pick(channel.source_url.clone()),
                    None => ListAction::Moved,
                };
            }
            KeyCode::Esc | KeyCode::Char('l') => {
                self.visible = false;
                return ListAction::Closed;
            }
            _ => return ListAction::Ignored,
        }
        ListAction::Moved
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect, snapshot: &ControllerSnapshot) {
        let current = snapshot.current.as_ref().map(|c| c.index);
        let items: Vec<ListItem> = snapshot
            .channels
            .as_slice()
            .iter()
            .map(|channel| self.render_item(channel, current == Some(channel.index), snapshot.status))
            .collect();

        let block = Block::default()
            .title(Span::styled(format!(" channels {} ", items.len()), style_secondary()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(C_PANEL_BORDER_FOCUSED));
        let mut state = ListState::default().with_selected((!items.is_empty()).then_some(self.cursor));
        frame.render_stateful_widget(List::new(items).block(block), area, &mut state);
    }

    fn render_item<'a>(&self, channel: &'a Channel, is_current: bool, status: PlaybackStatus) -> ListItem<'a> {
        let (icon, icon_color) = if is_current {
            match status {
                PlaybackStatus::Playing => ("▶", C_PLAYING),
                PlaybackStatus::Paused => ("⏸", C_CONNECTING),
                PlaybackStatus::Loading => ("⋯", C_CONNECTING),
                PlaybackStatus::Unavailable(_) | PlaybackStatus::AttachFailed => ("✗", C_ERROR),
                PlaybackStatus::Idle => ("■", C_MUTED),
            }
        } else {
            (" ", C_MUTED)
        };
        let is_selected = channel.index == self.cursor;
        let name_style = match (is_current, is_selected) {
            (true, _) => style_bold(icon_color),
            (false, true) => style_bold(C_PRIMARY),
            (false, false) => style_secondary(),
        };

        let line = Line::from(vec![
            Span::styled(format!("{:>4} ", channel.number()), style_muted()),
            Span::styled(icon, Style::default().fg(icon_color)),
            Span::raw(" "),
            Span::styled(channel.display_name.as_str(), name_style),
        ]);
        let item = ListItem::new(line);
        if is_selected {
            item.style(Style::default().bg(C_SELECTION_BG))
        } else {
            item
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::crossterm::event::KeyModifiers;
    use surf_proto::channel::{ChannelList, ChannelRecord};

    fn channels(names: &[&str]) -> ChannelList {
        ChannelList::from_records(names.iter().map(|name| ChannelRecord {
            display_name: name.to_string(),
            logo_url: None,
            source_url: format!("http://tv/{}.m3u8", name),
        }))
    }

    fn snapshot(list: ChannelList, current: Option<usize>) -> ControllerSnapshot {
        ControllerSnapshot {
            current: current.and_then(|i| list.get(i).cloned()),
            channel_count: Some(list.len()),
            channels: list,
            ..ControllerSnapshot::default()
        }
    }

    fn press(pane: &mut ChannelListPane, code: KeyCode, list: &ChannelList) -> ListAction {
        pane.handle_key(KeyEvent::new(code, KeyModifiers::NONE), list.as_slice())
    }

    #[test]
    fn opens_on_the_current_channel() {
        let list = channels(&["a", "b", "c"]);
        let mut pane = ChannelListPane::new();
        pane.toggle(&snapshot(list.clone(), Some(2)));
        assert!(pane.is_visible());
        assert_eq!(
            press(&mut pane, KeyCode::Enter, &list),
            ListAction::Pick("http://tv/c.m3u8".into())
        );
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let list = channels(&["a", "b", "c"]);
        let mut pane = ChannelListPane::new();
        pane.toggle(&snapshot(list.clone(), None));

        assert_eq!(press(&mut pane, KeyCode::Up, &list), ListAction::Moved);
        assert_eq!(pane.cursor, 0);
        press(&mut pane, KeyCode::PageDown, &list);
        assert_eq!(pane.cursor, 2);
        press(&mut pane, KeyCode::Char('k'), &list);
        assert_eq!(pane.cursor, 1);

        pane.sync(&snapshot(channels(&["x"]), None));
        assert_eq!(pane.cursor, 0);
    }

    #[test]
    fn remote_keys_pass_through_and_escape_closes() {
        let list = channels(&["a"]);
        let mut pane = ChannelListPane::new();
        pane.toggle(&snapshot(list.clone(), Some(0)));

        assert_eq!(press(&mut pane, KeyCode::Char('5'), &list), ListAction::Ignored);
        assert_eq!(press(&mut pane, KeyCode::Char(' '), &list), ListAction::Ignored);
        assert_eq!(press(&mut pane, KeyCode::Esc, &list), ListAction::Closed);
        assert!(!pane.is_visible());
    }

    #[test]
    fn enter_on_an_empty_list_picks_nothing() {
        let list = ChannelList::empty();
        let mut pane = ChannelListPane::new();
        pane.toggle(&snapshot(list.clone(), None));
        assert_eq!(press(&mut pane, KeyCode::Enter, &list), ListAction::Moved);
    }
}
