//! Input decoder: turns remote/keyboard keys into navigation intents.
//!
//! ```text
//!   Idle ──digit──▶ AccumulatingDigits ──digit──▶ (restart 3 s timer)
//!    ▲                     │
//!    └────── timer fires: GoToAbsolute(buffer - 1)
//! ```
//!
//! The digit timer is a deadline field, not a spawned task: the owner polls
//! `next_deadline()` / `poll()` from its event loop. There is at most one
//! pending deadline, so only the most recent digit can commit.

use std::time::Duration;

use surf_proto::protocol::RemoteKey;
use tokio::time::Instant;
use tracing::debug;

/// Inactivity window after the last digit before the entry commits.
pub const DIGIT_COMMIT_DELAY: Duration = Duration::from_millis(3000);

/// Navigation intents consumed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Relative step, wraps around the list.
    Step(i64),
    /// Echo of the digits typed so far; not a channel change.
    PreviewNumber(u64),
    /// Zero-indexed absolute target. Out-of-range targets are discarded.
    GoToAbsolute(i64),
    ToggleConfig,
    ToggleFullscreen,
    ExitFullscreen,
    TogglePlayback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    AccumulatingDigits,
}

/// Result of one key press.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub intents: Vec<Intent>,
    /// The host should suppress its own handling of this key (scrolling,
    /// text entry, ...).
    pub prevent_default: bool,
}

impl Decoded {
    fn ignored() -> Self {
        Self::default()
    }

    fn one(intent: Intent, prevent_default: bool) -> Self {
        Self {
            intents: vec![intent],
            prevent_default,
        }
    }
}

#[derive(Debug, Default)]
pub struct InputDecoder {
    buffer: u64,
    commit_at: Option<Instant>,
}

impl InputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DecoderState {
        if self.commit_at.is_some() {
            DecoderState::AccumulatingDigits
        } else {
            DecoderState::Idle
        }
    }

    /// Decode one key. With `navigation_enabled == false` (config surface
    /// open) only the config toggle is recognized.
    pub fn handle_key(&mut self, key: RemoteKey, now: Instant, navigation_enabled: bool) -> Decoded {
        if !navigation_enabled && key != RemoteKey::Menu {
            return Decoded::ignored();
        }

        match key {
            RemoteKey::ChannelUp => Decoded::one(Intent::Step(1), true),
            RemoteKey::ChannelDown => Decoded::one(Intent::Step(-1), true),
            RemoteKey::Digit(d) if d <= 9 => {
                self.buffer = self.buffer.saturating_mul(10).saturating_add(d as u64);
                self.commit_at = Some(now + DIGIT_COMMIT_DELAY);
                debug!("input: digit {} buffer={}", d, self.buffer);
                Decoded::one(Intent::PreviewNumber(self.buffer), true)
            }
            RemoteKey::Digit(_) => Decoded::ignored(),
            RemoteKey::Menu => Decoded::one(Intent::ToggleConfig, true),
            RemoteKey::Fullscreen => Decoded::one(Intent::ToggleFullscreen, false),
            RemoteKey::Escape => Decoded::one(Intent::ExitFullscreen, false),
            RemoteKey::PlayPause => Decoded::one(Intent::TogglePlayback, true),
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.commit_at
    }

    /// Commit the numeric entry if its inactivity window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Intent> {
        let due = self.commit_at.is_some_and(|at| now >= at);
        if !due {
            return None;
        }
        // One-indexed on screen, zero-indexed in the store.
        let target = i64::try_from(self.buffer).unwrap_or(i64::MAX) - 1;
        debug!("input: committing numeric entry {} -> index {}", self.buffer, target);
        self.cancel();
        Some(Intent::GoToAbsolute(target))
    }

    /// Drop any pending numeric entry without committing it.
    pub fn cancel(&mut self) {
        self.buffer = 0;
        self.commit_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(decoder: &mut InputDecoder, key: RemoteKey, now: Instant) -> Vec<Intent> {
        decoder.handle_key(key, now, true).intents
    }

    #[test]
    fn paging_keys_step_immediately() {
        let mut decoder = InputDecoder::new();
        let now = Instant::now();
        let up = decoder.handle_key(RemoteKey::ChannelUp, now, true);
        assert_eq!(up.intents, vec![Intent::Step(1)]);
        assert!(up.prevent_default);
        assert_eq!(press(&mut decoder, RemoteKey::ChannelDown, now), vec![Intent::Step(-1)]);
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn digits_within_window_commit_once() {
        let mut decoder = InputDecoder::new();
        let t0 = Instant::now();

        assert_eq!(press(&mut decoder, RemoteKey::Digit(1), t0), vec![Intent::PreviewNumber(1)]);
        let t1 = t0 + Duration::from_millis(2500);
        assert_eq!(press(&mut decoder, RemoteKey::Digit(2), t1), vec![Intent::PreviewNumber(12)]);
        assert_eq!(decoder.state(), DecoderState::AccumulatingDigits);

        // The first digit's window would have closed here; the second restarted it.
        assert_eq!(decoder.poll(t0 + DIGIT_COMMIT_DELAY), None);
        assert_eq!(decoder.next_deadline(), Some(t1 + DIGIT_COMMIT_DELAY));

        assert_eq!(decoder.poll(t1 + DIGIT_COMMIT_DELAY), Some(Intent::GoToAbsolute(11)));
        assert_eq!(decoder.poll(t1 + DIGIT_COMMIT_DELAY * 2), None);
        assert_eq!(decoder.state(), DecoderState::Idle);
    }

    #[test]
    fn separated_digits_commit_twice() {
        let mut decoder = InputDecoder::new();
        let t0 = Instant::now();

        press(&mut decoder, RemoteKey::Digit(1), t0);
        assert_eq!(decoder.poll(t0 + DIGIT_COMMIT_DELAY), Some(Intent::GoToAbsolute(0)));

        let t1 = t0 + DIGIT_COMMIT_DELAY + Duration::from_millis(10);
        assert_eq!(press(&mut decoder, RemoteKey::Digit(2), t1), vec![Intent::PreviewNumber(2)]);
        assert_eq!(decoder.poll(t1 + DIGIT_COMMIT_DELAY), Some(Intent::GoToAbsolute(1)));
    }

    #[test]
    fn mode_keys_leave_buffer_alone() {
        let mut decoder = InputDecoder::new();
        let t0 = Instant::now();
        press(&mut decoder, RemoteKey::Digit(4), t0);

        assert_eq!(press(&mut decoder, RemoteKey::Menu, t0), vec![Intent::ToggleConfig]);
        let fs = decoder.handle_key(RemoteKey::Fullscreen, t0, true);
        assert_eq!(fs.intents, vec![Intent::ToggleFullscreen]);
        assert!(!fs.prevent_default);
        assert_eq!(press(&mut decoder, RemoteKey::Escape, t0), vec![Intent::ExitFullscreen]);
        assert_eq!(press(&mut decoder, RemoteKey::PlayPause, t0), vec![Intent::TogglePlayback]);

        assert_eq!(press(&mut decoder, RemoteKey::Digit(2), t0), vec![Intent::PreviewNumber(42)]);
    }

    #[test]
    fn config_open_only_decodes_menu() {
        let mut decoder = InputDecoder::new();
        let now = Instant::now();
        for key in [
            RemoteKey::Digit(3),
            RemoteKey::ChannelUp,
            RemoteKey::PlayPause,
            RemoteKey::Fullscreen,
        ] {
            let decoded = decoder.handle_key(key, now, false);
            assert!(decoded.intents.is_empty());
            assert!(!decoded.prevent_default);
        }
        assert_eq!(decoder.state(), DecoderState::Idle);
        assert_eq!(
            decoder.handle_key(RemoteKey::Menu, now, false).intents,
            vec![Intent::ToggleConfig]
        );
    }

    #[test]
    fn cancel_discards_entry() {
        let mut decoder = InputDecoder::new();
        let t0 = Instant::now();
        press(&mut decoder, RemoteKey::Digit(7), t0);
        decoder.cancel();
        assert_eq!(decoder.poll(t0 + DIGIT_COMMIT_DELAY), None);
        assert_eq!(press(&mut decoder, RemoteKey::Digit(1), t0), vec![Intent::PreviewNumber(1)]);
    }

    #[test]
    fn zero_commits_out_of_range_target() {
        let mut decoder = InputDecoder::new();
        let t0 = Instant::now();
        press(&mut decoder, RemoteKey::Digit(0), t0);
        assert_eq!(decoder.poll(t0 + DIGIT_COMMIT_DELAY), Some(Intent::GoToAbsolute(-1)));
    }

    #[test]
    fn long_bursts_saturate() {
        let mut decoder = InputDecoder::new();
        let t0 = Instant::now();
        for _ in 0..40 {
            press(&mut decoder, RemoteKey::Digit(9), t0);
        }
        assert_eq!(
            decoder.poll(t0 + DIGIT_COMMIT_DELAY),
            Some(Intent::GoToAbsolute(i64::MAX - 1))
        );
    }

    #[test]
    fn repeated_identical_keys_are_not_coalesced() {
        let mut decoder = InputDecoder::new();
        let now = Instant::now();
        let steps: Vec<_> = (0..5)
            .flat_map(|_| press(&mut decoder, RemoteKey::ChannelUp, now))
            .collect();
        assert_eq!(steps, vec![Intent::Step(1); 5]);
    }
}
