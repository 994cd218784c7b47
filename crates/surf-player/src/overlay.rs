//! Overlay timer: when the channel name/number indicators show and hide.
//!
//! Showing is instantaneous on a channel change. Hiding waits for playback to
//! start, holds for `OVERLAY_HOLD`, then fades over `OVERLAY_FADE`. A single
//! hide deadline exists at any time.

use std::time::Duration;

use surf_proto::protocol::OverlayView;
use tokio::time::Instant;

pub const OVERLAY_HOLD: Duration = Duration::from_millis(3000);
pub const OVERLAY_FADE: Duration = Duration::from_millis(2000);

#[derive(Debug, Default)]
pub struct OverlayTimer {
    view: OverlayView,
    hide_at: Option<Instant>,
}

impl OverlayTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> OverlayView {
        self.view
    }

    /// Show both indicators now and drop any pending hide.
    pub fn on_channel_changed(&mut self) {
        self.hide_at = None;
        self.view = OverlayView {
            name_visible: true,
            number_visible: true,
            fade: None,
        };
    }

    /// Digits are being typed: bring the number back without touching the
    /// name or the hide deadline.
    pub fn on_number_preview(&mut self) {
        self.view.number_visible = true;
        self.view.fade = None;
    }

    /// (Re)start the hold timer.
    pub fn on_playback_started(&mut self, now: Instant) {
        self.hide_at = Some(now + OVERLAY_HOLD);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.hide_at
    }

    /// Hide both indicators if the hold has elapsed. Returns true when the
    /// view changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.hide_at {
            Some(at) if now >= at => {
                self.hide_at = None;
                self.view = OverlayView {
                    name_visible: false,
                    number_visible: false,
                    fade: Some(OVERLAY_FADE),
                };
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.hide_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_change_shows_without_fade() {
        let mut overlay = OverlayTimer::new();
        let t0 = Instant::now();
        overlay.on_playback_started(t0);
        assert!(overlay.poll(t0 + OVERLAY_HOLD));

        overlay.on_channel_changed();
        let view = overlay.view();
        assert!(view.name_visible && view.number_visible);
        assert_eq!(view.fade, None);
    }

    #[test]
    fn hides_with_fade_after_hold() {
        let mut overlay = OverlayTimer::new();
        let t0 = Instant::now();
        overlay.on_channel_changed();
        overlay.on_playback_started(t0);

        assert!(!overlay.poll(t0 + OVERLAY_HOLD - Duration::from_millis(1)));
        assert!(overlay.view().name_visible);

        assert!(overlay.poll(t0 + OVERLAY_HOLD));
        let view = overlay.view();
        assert!(!view.name_visible && !view.number_visible);
        assert_eq!(view.fade, Some(OVERLAY_FADE));
        assert_eq!(overlay.next_deadline(), None);
    }

    #[test]
    fn playback_restart_reschedules_single_hide() {
        let mut overlay = OverlayTimer::new();
        let t0 = Instant::now();
        overlay.on_playback_started(t0);
        let t1 = t0 + Duration::from_millis(2000);
        overlay.on_playback_started(t1);

        assert_eq!(overlay.next_deadline(), Some(t1 + OVERLAY_HOLD));
        assert!(!overlay.poll(t0 + OVERLAY_HOLD));
        assert!(overlay.poll(t1 + OVERLAY_HOLD));
    }

    #[test]
    fn channel_change_cancels_pending_hide() {
        let mut overlay = OverlayTimer::new();
        let t0 = Instant::now();
        overlay.on_playback_started(t0);
        overlay.on_channel_changed();

        assert_eq!(overlay.next_deadline(), None);
        assert!(!overlay.poll(t0 + OVERLAY_HOLD * 2));
        assert!(overlay.view().name_visible);
    }

    #[test]
    fn preview_shows_number_only() {
        let mut overlay = OverlayTimer::new();
        let t0 = Instant::now();
        overlay.on_playback_started(t0);
        overlay.poll(t0 + OVERLAY_HOLD);

        overlay.on_number_preview();
        let view = overlay.view();
        assert!(view.number_visible);
        assert!(!view.name_visible);
        assert_eq!(view.fade, None);
    }
}
