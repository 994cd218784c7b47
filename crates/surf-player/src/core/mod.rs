//! Controller: single-owner event loop for all navigation and playback state.
//!
//! The front end sends `CoreEvent`s into this loop and renders the
//! `ControllerSnapshot` published on a watch channel after every event.
//! Playlist fetches and engine calls run on spawned tasks and report back
//! over channels owned by this loop, so every state transition happens here.
//!
//! Timers (numeric-entry commit, overlay hold) are deadlines held by the
//! decoder and overlay; the loop sleeps until the earliest one.
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use surf_proto::channel::Channel;
use surf_proto::config::{Config, DrmConfig};
use surf_proto::protocol::{Command, ControllerSnapshot, Phase, PlaybackStatus};
use surf_proto::state::{wrap_index, CredentialStore, Credentials, SelectionStore};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::drm::KeyProvisioner;
use crate::engine::{AdapterState, Engine, EngineNotice, EngineOutcome, PlaybackAdapter, PlaybackEvent};
use crate::error::{CredentialsError, PlaylistError};
use crate::input::{DecoderState, InputDecoder, Intent};
use crate::overlay::OverlayTimer;
use crate::playlist::{reanchor, Playlist, PlaylistSource, RefreshOutcome};


pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// All inputs into the controller loop.
#[derive(Debug)]
pub enum CoreEvent {
    Command(Command),
    Notice(EngineNotice),
}

/// Process-wide collaborators, built once at startup.
#[derive(Clone)]
pub struct SurfContext {
    pub config: Config,
    pub http: reqwest::Client,
}

type RefreshResult = (u64, Result<String, PlaylistError>);

pub struct Controller<E: Engine, S: PlaylistSource> {
    drm: DrmConfig,
    http: reqwest::Client,
    source: Arc<S>,
    selection: SelectionStore,
    credentials: CredentialStore,
    playlist: Playlist,
    decoder: InputDecoder,
    overlay: OverlayTimer,
    adapter: PlaybackAdapter<E>,
    refresh_tx: mpsc::Sender<RefreshResult>,
    refresh_rx: mpsc::Receiver<RefreshResult>,
    snapshot_tx: watch::Sender<ControllerSnapshot>,
    phase: Phase,
    config_open: bool,
    status: PlaybackStatus,
    /// Number echoed while digits are being typed.
    preview: Option<u64>,
    notice: Option<String>,
    last_refresh: Option<chrono::DateTime<chrono::Local>>,
}

impl<E: Engine, S: PlaylistSource> Controller<E, S> {
    pub fn new(ctx: SurfContext, engine: Arc<E>, source: S, snapshot_tx: watch::Sender<ControllerSnapshot>) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(8);
        let paths = &ctx.config.paths;
        Self {
            selection: SelectionStore::open(paths.state_file.clone()),
            credentials: CredentialStore::new(paths.credentials_file.clone()),
            drm: ctx.config.drm.clone(),
            http: ctx.http,
            source: Arc::new(source),
            playlist: Playlist::new(),
            decoder: InputDecoder::new(),
            overlay: OverlayTimer::new(),
            adapter: PlaybackAdapter::new(engine),
            refresh_tx,
            refresh_rx,
            snapshot_tx,
            phase: Phase::Bootstrapping,
            config_open: false,
            status: PlaybackStatus::Idle,
            preview: None,
            notice: None,
            last_refresh: None,
        }
    }

    /// Run until `Command::Quit` or until every event sender is dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) -> anyhow::Result<()> {
        info!("Controller: starting event loop");
        self.bootstrap();
        self.publish();

        let mut refresh_tick = tokio::time::interval_at(Instant::now() + REFRESH_INTERVAL, REFRESH_INTERVAL);
        refresh_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("Controller: event channel closed, shutting down");
                        break;
                    }
                    Some(CoreEvent::Command(Command::Quit)) => {
                        info!("Controller: quit requested");
                        break;
                    }
                    Some(CoreEvent::Command(cmd)) => self.handle_command(cmd),
                    Some(CoreEvent::Notice(notice)) => self.handle_notice(notice),
                },
                Some(outcome) = self.adapter.next_outcome() => self.handle_outcome(outcome),
                Some((generation, result)) = self.refresh_rx.recv() => self.handle_refresh(generation, result),
                _ = sleep_until(deadline) => self.handle_timers(Instant::now()),
                _ = refresh_tick.tick() => self.start_refresh("periodic"),
            }
            self.publish();
        }

        self.teardown().await;
        self.publish();
        Ok(())
    }

    // ── bootstrap / teardown ──────────────────────────────────────────────────

    fn bootstrap(&mut self) {
        let credentials = self.credentials.load();
        let provisioner = credentials.clone().and_then(|c| self.provisioner(c));
        self.adapter.initialize(provisioner);

        if credentials.is_some() {
            self.start_refresh("startup");
        } else {
            info!("Controller: no stored credentials, opening config");
            self.config_open = true;
        }
    }

    fn provisioner(&self, credentials: Credentials) -> Option<KeyProvisioner> {
        if !self.drm.enabled {
            return None;
        }
        Some(KeyProvisioner::new(self.http.clone(), &self.drm.licensing_url, credentials))
    }

    async fn teardown(&mut self) {
        self.decoder.cancel();
        self.overlay.cancel();
        self.preview = None;
        self.adapter.teardown().await;
        self.status = PlaybackStatus::Idle;
        info!("Controller: stopped");
    }

    // ── timers ────────────────────────────────────────────────────────────────

    fn next_deadline(&self) -> Option<Instant> {
        match (self.decoder.next_deadline(), self.overlay.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn handle_timers(&mut self, now: Instant) {
        if let Some(intent) = self.decoder.poll(now) {
            self.apply_intent(intent);
        }
        if self.overlay.poll(now) {
            debug!("Controller: overlay hidden");
        }
    }

    // ── commands ──────────────────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: Command) {
        debug!("Controller: command {:?}", cmd);
        match cmd {
            Command::Key(key) => {
                let decoded = self.decoder.handle_key(key, Instant::now(), !self.config_open);
                if !decoded.prevent_default {
                    debug!("Controller: {:?} left to the host", key);
                }
                for intent in decoded.intents {
                    self.apply_intent(intent);
                }
            }
            Command::SaveCredentials(credentials) => {
                if let Err(e) = self.save_credentials(credentials) {
                    warn!("Controller: credentials not saved: {}", e);
                    self.notice = Some(e.to_string());
                }
            }
            Command::RefreshPlaylist => self.start_refresh("user"),
            Command::SelectChannel { source_url } => self.select_source(&source_url),
            Command::Quit => {}
        }
    }

    fn save_credentials(&mut self, credentials: Credentials) -> Result<(), CredentialsError> {
        if !credentials.is_complete() {
            return Err(CredentialsError::Incomplete);
        }
        self.credentials.save(&credentials)?;
        info!("Controller: credentials saved for {}", credentials.username);
        self.notice = None;
        if let Some(provisioner) = self.provisioner(credentials) {
            self.adapter.provision(provisioner);
        }
        self.config_open = false;
        self.start_refresh("credentials saved");
        Ok(())
    }

    fn handle_notice(&mut self, notice: EngineNotice) {
        match notice {
            EngineNotice::Paused(true) if self.status == PlaybackStatus::Playing => {
                self.status = PlaybackStatus::Paused;
            }
            EngineNotice::Paused(false) if self.status == PlaybackStatus::Paused => {
                self.status = PlaybackStatus::Playing;
            }
            EngineNotice::Paused(_) => {}
        }
    }

    // ── intents ───────────────────────────────────────────────────────────────

    fn channel_count(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.playlist.len())
    }

    /// Validated selection, or `None` while there are no channels.
    fn current_index(&mut self) -> Option<usize> {
        let len = self.channel_count()?;
        Some(self.selection.validate(len))
    }

    fn current_channel(&mut self) -> Option<Channel> {
        let index = self.current_index()?;
        self.playlist.channels()?.get(index).cloned()
    }

    fn apply_intent(&mut self, intent: Intent) {
        debug!("Controller: intent {:?}", intent);
        match intent {
            Intent::Step(delta) => {
                let (Some(len), Some(current)) = (self.channel_count(), self.current_index()) else {
                    debug!("Controller: no channels, ignoring step");
                    return;
                };
                let target = wrap_index(current as i64 + delta, len);
                self.select(target);
            }
            Intent::PreviewNumber(number) => {
                self.preview = Some(number);
                self.overlay.on_number_preview();
            }
            Intent::GoToAbsolute(index) => {
                self.preview = None;
                let len = self.playlist.len();
                match usize::try_from(index) {
                    Ok(target) if target < len => self.select(target),
                    _ => warn!(
                        "Controller: channel {} out of range (1..={}), ignoring",
                        index.saturating_add(1),
                        len
                    ),
                }
            }
            Intent::ToggleConfig => {
                self.config_open = !self.config_open;
                if self.config_open {
                    info!("Controller: config opened");
                    if self.decoder.state() == DecoderState::AccumulatingDigits {
                        debug!("Controller: numeric entry cancelled");
                    }
                    self.decoder.cancel();
                    self.preview = None;
                } else {
                    info!("Controller: config closed");
                    self.start_refresh("config closed");
                }
            }
            Intent::ToggleFullscreen => self.adapter.toggle_fullscreen(),
            Intent::ExitFullscreen => self.adapter.exit_fullscreen(),
            Intent::TogglePlayback => self.adapter.toggle_playback(),
        }
    }

    /// Make `index` current: persist it, show the overlay, load the source.
    fn select(&mut self, index: usize) {
        if let Err(e) = self.selection.set(index as i64) {
            warn!("Controller: failed to persist selection: {}", e);
        }
        self.overlay.on_channel_changed();
        let Some(channel) = self.current_channel() else {
            return;
        };
        info!("Controller: channel {} {}", channel.number(), channel.display_name);
        self.load(&channel.source_url);
    }

    /// Tune to the channel carrying `source_url`, as picked from the list.
    fn select_source(&mut self, source_url: &str) {
        if self.config_open {
            debug!("Controller: config open, ignoring channel pick");
            return;
        }
        let Some(index) = self.playlist.channels().and_then(|list| list.position_of_source(source_url)) else {
            warn!("Controller: {} is not in the channel list", source_url);
            return;
        };
        self.decoder.cancel();
        self.preview = None;
        self.select(index);
    }

    fn load(&mut self, source_url: &str) {
        if self.status == PlaybackStatus::AttachFailed {
            debug!("Controller: engine unavailable, not loading {}", source_url);
            return;
        }
        self.adapter.load(source_url);
        if matches!(self.adapter.state(), AdapterState::Attaching | AdapterState::Loading) {
            self.status = PlaybackStatus::Loading;
        }
    }

    // ── playlist ──────────────────────────────────────────────────────────────

    fn start_refresh(&mut self, reason: &str) {
        let Some(credentials) = self.credentials.load() else {
            warn!("Controller: {} refresh skipped, no credentials", reason);
            return;
        };
        let generation = self.playlist.begin_refresh();
        info!("Controller: playlist refresh #{} ({})", generation, reason);
        let source = Arc::clone(&self.source);
        let tx = self.refresh_tx.clone();
        tokio::spawn(async move {
            let result = source.fetch(credentials).await;
            let _ = tx.send((generation, result)).await;
        });
    }

    fn handle_refresh(&mut self, generation: u64, result: Result<String, PlaylistError>) {
        let previous = self.current_channel();
        match self.playlist.apply(generation, result) {
            RefreshOutcome::Stale => {}
            RefreshOutcome::Failed(e) => {
                self.notice = Some(format!("Playlist refresh failed: {}", e));
            }
            RefreshOutcome::Empty => {
                self.phase = Phase::Ready;
                self.last_refresh = Some(chrono::Local::now());
                self.notice = Some("No channels available".to_string());
                self.overlay.cancel();
                self.adapter.stop();
                if self.status != PlaybackStatus::AttachFailed {
                    self.status = PlaybackStatus::Idle;
                }
            }
            RefreshOutcome::Replaced(list) => {
                self.phase = Phase::Ready;
                self.last_refresh = Some(chrono::Local::now());
                self.notice = None;

                let index = match previous.as_ref().and_then(|prev| reanchor(prev, &list)) {
                    Some(index) => {
                        if let Err(e) = self.selection.set(index as i64) {
                            warn!("Controller: failed to persist selection: {}", e);
                        }
                        index
                    }
                    None => self.current_index().unwrap_or(0),
                };
                let Some(channel) = list.get(index).cloned() else {
                    return;
                };
                if self.adapter.requested_source() == Some(channel.source_url.as_str()) {
                    debug!("Controller: {} unchanged after refresh", channel.display_name);
                    return;
                }
                self.overlay.on_channel_changed();
                info!("Controller: tuning to {} {}", channel.number(), channel.display_name);
                self.load(&channel.source_url);
            }
        }
    }

    // ── engine ────────────────────────────────────────────────────────────────

    fn handle_outcome(&mut self, outcome: EngineOutcome) {
        let Some(event) = self.adapter.on_outcome(outcome) else {
            return;
        };
        match event {
            PlaybackEvent::Attached => {}
            PlaybackEvent::Loaded { url } => debug!("Controller: loaded {}", url),
            PlaybackEvent::AttachFailed(reason) => {
                self.status = PlaybackStatus::AttachFailed;
                self.notice = Some(format!("Video engine unavailable: {}", reason));
            }
            PlaybackEvent::Started { url } => {
                debug!("Controller: playing {}", url);
                self.status = PlaybackStatus::Playing;
                self.overlay.on_playback_started(Instant::now());
            }
            PlaybackEvent::Failed { kind, detail } => {
                debug!("Controller: channel unavailable ({}): {}", kind, detail);
                self.status = PlaybackStatus::Unavailable(kind);
            }
            PlaybackEvent::KeysProvisioned(count) => debug!("Controller: {} keys ready", count),
            PlaybackEvent::KeyFetchFailed(reason) => {
                self.notice = Some(format!("Encrypted channels unavailable: {}", reason));
            }
        }
    }

    // ── snapshot ──────────────────────────────────────────────────────────────

    fn snapshot(&mut self) -> ControllerSnapshot {
        let current = self.current_channel();
        let channel_label = match (&current, self.status) {
            (Some(channel), PlaybackStatus::Unavailable(_)) => format!("{} (unavailable)", channel.display_name),
            (Some(channel), _) => channel.display_name.clone(),
            (None, _) => String::new(),
        };
        let number_label = self.preview.or_else(|| current.as_ref().map(|c| c.number() as u64));
        ControllerSnapshot {
            phase: self.phase,
            config_open: self.config_open,
            channel_count: self.playlist.channels().map(|list| list.len()),
            channels: self.playlist.channels().cloned().unwrap_or_default(),
            current,
            channel_label,
            number_label,
            overlay: self.overlay.view(),
            status: self.status,
            notice: self.notice.clone(),
            last_refresh: self.last_refresh,
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
