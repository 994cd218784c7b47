//! Messages between the front end and the controller.
//!
//! Commands flow in over an mpsc channel; the controller publishes a full
//! `ControllerSnapshot` over a watch channel after every event it handles.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, ChannelList};
use crate::state::Credentials;

/// The fixed key vocabulary of the input surface. Device-specific aliases are
/// folded into these by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteKey {
    Digit(u8),
    ChannelUp,
    ChannelDown,
    Menu,
    Fullscreen,
    Escape,
    PlayPause,
}

/// Messages sent from the front end to the controller.
#[derive(Debug, Clone)]
pub enum Command {
    Key(RemoteKey),
    /// The config surface saved a credential pair.
    SaveCredentials(Credentials),
    /// User-initiated playlist refresh.
    RefreshPlaylist,
    /// Tune to the channel carrying this source, picked from the channel list.
    SelectChannel { source_url: String },
    Quit,
}

/// Classified playback failure. Selects logging and what the viewer sees;
/// none of these are retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Drm,
    Media,
    Playback,
    Manifest,
    Key,
    License,
    Network,
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Drm => "DRM",
            ErrorKind::Media => "media",
            ErrorKind::Playback => "playback",
            ErrorKind::Manifest => "manifest",
            ErrorKind::Key => "key",
            ErrorKind::License => "license",
            ErrorKind::Network => "network",
            ErrorKind::Generic => "generic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Bootstrapping,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    /// The current channel failed to load or play; it stays selected.
    Unavailable(ErrorKind),
    /// The engine could not be attached; nothing can play this session.
    AttachFailed,
}

/// Overlay visibility. `fade` is set only when the indicators were hidden by
/// the hold timer, and gives the duration of the hide transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayView {
    pub name_visible: bool,
    pub number_visible: bool,
    pub fade: Option<Duration>,
}

impl Default for OverlayView {
    fn default() -> Self {
        Self {
            name_visible: true,
            number_visible: true,
            fade: None,
        }
    }
}

/// Everything the front end needs to render one frame.
#[derive(Debug, Clone, Default)]
pub struct ControllerSnapshot {
    pub phase: Phase,
    pub config_open: bool,
    /// `None` until the first playlist refresh completes.
    pub channel_count: Option<usize>,
    /// The list as of the last successful refresh.
    pub channels: ChannelList,
    pub current: Option<Channel>,
    /// Channel name as shown, annotated when the channel is unavailable.
    pub channel_label: String,
    /// Channel number as shown: the numeric-entry echo while digits are being
    /// typed, otherwise the current channel's number.
    pub number_label: Option<u64>,
    pub overlay: OverlayView,
    pub status: PlaybackStatus,
    /// Latest non-fatal problem worth telling the viewer about.
    pub notice: Option<String>,
    pub last_refresh: Option<chrono::DateTime<chrono::Local>>,
}
