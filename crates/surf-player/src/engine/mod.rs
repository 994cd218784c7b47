//! Playback engine adapter.
//!
//! ```text
//!   Uninitialized ─initialize()─▶ Attaching ─ok─▶ Idle ─load()─▶ Loading ─▶ Playing
//!        ▲                           │                             │
//!        └──────── attach failed ────┘                             └─▶ Error(kind)
//!   any ─teardown()─▶ Destroyed
//! ```
//!
//! Engine calls run on spawned tasks and report back as `EngineOutcome`
//! messages, which the owner feeds into `on_outcome` from its event loop.
//! Every load carries a token; outcomes for anything but the latest token are
//! dropped, so a superseded load can never change state. The task of a
//! superseded load is also aborted.

pub mod drm;
pub mod mpv;

use std::future::Future;
use std::sync::Arc;

use surf_proto::protocol::ErrorKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::KeyFetchError;
use drm::{ClearKeys, KeySource};

/// Numeric error categories reported by engines.
pub mod codes {
    pub const DRM: u16 = 1001;
    pub const MEDIA: u16 = 1002;
    pub const MANIFEST: u16 = 1003;
    pub const PLAYBACK: u16 = 1004;
    pub const KEY: u16 = 1006;
    pub const LICENSE: u16 = 1007;
    pub const NETWORK: u16 = 1008;
    pub const GENERIC: u16 = 9999;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    pub code: u16,
    pub message: String,
}

impl EngineError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(codes::GENERIC, message)
    }
}

/// Unsolicited notifications from the engine (e.g. the viewer paused from the
/// video window itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotice {
    Paused(bool),
}

/// The external adaptive engine plus its media surface.
///
/// Implementations are shared across tasks, so every method takes `&self`.
pub trait Engine: Send + Sync + 'static {
    /// Whether the environment can apply clear keys at all.
    fn supports_clear_keys(&self) -> bool;

    fn attach(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn configure_clear_keys(&self, keys: ClearKeys) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Resolve once the source is loaded (or failed to load).
    fn load(&self, url: String) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn play(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn pause(&self) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn is_paused(&self) -> impl Future<Output = Result<bool, EngineError>> + Send;

    fn is_fullscreen(&self) -> impl Future<Output = Result<bool, EngineError>> + Send;

    fn set_fullscreen(&self, fullscreen: bool) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn destroy(&self) -> impl Future<Output = ()> + Send;
}

// ── classification ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Load,
    Play,
}

/// The one place engine errors are mapped onto the taxonomy. Uncategorized
/// play rejections count as playback errors; anything else uncategorized is
/// generic.
pub fn classify(stage: LoadStage, err: &EngineError) -> ErrorKind {
    match err.code {
        codes::DRM => ErrorKind::Drm,
        codes::MEDIA => ErrorKind::Media,
        codes::PLAYBACK => ErrorKind::Playback,
        codes::MANIFEST => ErrorKind::Manifest,
        codes::KEY => ErrorKind::Key,
        codes::LICENSE => ErrorKind::License,
        codes::NETWORK => ErrorKind::Network,
        _ if stage == LoadStage::Play => ErrorKind::Playback,
        _ => ErrorKind::Generic,
    }
}

fn log_classified(kind: ErrorKind, url: &str, err: &EngineError) {
    match kind {
        ErrorKind::Drm | ErrorKind::Key | ErrorKind::License => {
            error!("engine: {} error on {}: {}", kind, url, err)
        }
        ErrorKind::Network => warn!("engine: network error on {}: {}", url, err),
        _ => error!("engine: {} error on {}: {}", kind, url, err),
    }
}

// ── adapter ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Attaching,
    Idle,
    Loading,
    Playing,
    Error(ErrorKind),
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadToken(u64);

/// Completion messages from engine tasks.
#[derive(Debug)]
pub enum EngineOutcome {
    Attached(Result<(), EngineError>),
    Loaded(LoadToken),
    Played(LoadToken),
    Failed {
        token: LoadToken,
        stage: LoadStage,
        error: EngineError,
    },
    KeysProvisioned(Result<usize, KeyFetchError>),
}

/// What the controller hears about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Attached,
    AttachFailed(String),
    Loaded { url: String },
    Started { url: String },
    Failed { kind: ErrorKind, detail: String },
    KeysProvisioned(usize),
    KeyFetchFailed(String),
}

pub struct PlaybackAdapter<E: Engine> {
    engine: Arc<E>,
    state: AdapterState,
    latest: LoadToken,
    /// Source of the latest load request.
    requested: Option<String>,
    /// Load requested before attach completed.
    pending: Option<String>,
    outcome_tx: mpsc::Sender<EngineOutcome>,
    outcome_rx: mpsc::Receiver<EngineOutcome>,
    tasks: Vec<JoinHandle<()>>,
    /// The latest load; aborted when superseded or stopped.
    load_task: Option<JoinHandle<()>>,
}

impl<E: Engine> PlaybackAdapter<E> {
    pub fn new(engine: Arc<E>) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(64);
        Self {
            engine,
            state: AdapterState::Uninitialized,
            latest: LoadToken(0),
            requested: None,
            pending: None,
            outcome_tx,
            outcome_rx,
            tasks: Vec::new(),
            load_task: None,
        }
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Source of the most recent load request, including one deferred until
    /// attach completes.
    pub fn requested_source(&self) -> Option<&str> {
        self.pending.as_deref().or(self.requested.as_deref())
    }

    /// Next completion from an engine task. Never resolves to `None` while the
    /// adapter is alive.
    pub async fn next_outcome(&mut self) -> Option<EngineOutcome> {
        self.outcome_rx.recv().await
    }

    fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(tokio::spawn(fut));
    }

    /// Create and attach the engine. With a provisioner (and engine support),
    /// keys are fetched and applied as soon as the attach succeeds.
    pub fn initialize<K: KeySource>(&mut self, provisioner: Option<K>) {
        if self.state != AdapterState::Uninitialized {
            debug!("engine: initialize ignored in state {:?}", self.state);
            return;
        }
        self.state = AdapterState::Attaching;
        info!("engine: attaching");

        let engine = Arc::clone(&self.engine);
        let tx = self.outcome_tx.clone();
        let provisioner = provisioner.filter(|_| self.engine.supports_clear_keys());
        self.spawn(async move {
            let attached = engine.attach().await;
            let ok = attached.is_ok();
            if tx.send(EngineOutcome::Attached(attached)).await.is_err() || !ok {
                return;
            }
            if let Some(provisioner) = provisioner {
                let result = provision_keys(engine.as_ref(), &provisioner).await;
                let _ = tx.send(EngineOutcome::KeysProvisioned(result)).await;
            }
        });
    }

    /// Re-fetch keys (e.g. after credentials changed).
    pub fn provision<K: KeySource>(&mut self, provisioner: K) {
        if !self.engine.supports_clear_keys() {
            debug!("engine: clear keys unsupported, skipping provisioning");
            return;
        }
        if !self.is_attached() {
            debug!("engine: provisioning skipped in state {:?}", self.state);
            return;
        }
        let engine = Arc::clone(&self.engine);
        let tx = self.outcome_tx.clone();
        self.spawn(async move {
            let result = provision_keys(engine.as_ref(), &provisioner).await;
            let _ = tx.send(EngineOutcome::KeysProvisioned(result)).await;
        });
    }

    fn is_attached(&self) -> bool {
        matches!(
            self.state,
            AdapterState::Idle | AdapterState::Loading | AdapterState::Playing | AdapterState::Error(_)
        )
    }

    /// Request `url`. Supersedes any load in flight. Returns the token of the
    /// issued load, or `None` when nothing was issued.
    pub fn load(&mut self, url: &str) -> Option<LoadToken> {
        if url.trim().is_empty() {
            warn!("engine: ignoring load with empty source");
            return None;
        }
        match self.state {
            AdapterState::Attaching => {
                debug!("engine: attach in progress, deferring load of {}", url);
                self.pending = Some(url.to_string());
                return None;
            }
            AdapterState::Uninitialized | AdapterState::Destroyed => {
                warn!("engine: cannot load {} in state {:?}", url, self.state);
                return None;
            }
            _ => {}
        }

        self.latest = LoadToken(self.latest.0 + 1);
        let token = self.latest;
        self.requested = Some(url.to_string());
        self.state = AdapterState::Loading;
        debug!("engine: load {:?} {}", token, url);

        let engine = Arc::clone(&self.engine);
        let tx = self.outcome_tx.clone();
        let url = url.to_string();
        self.abort_load();
        self.load_task = Some(tokio::spawn(async move {
            let outcome = match engine.load(url).await {
                Err(error) => EngineOutcome::Failed {
                    token,
                    stage: LoadStage::Load,
                    error,
                },
                Ok(()) => {
                    if tx.send(EngineOutcome::Loaded(token)).await.is_err() {
                        return;
                    }
                    match engine.play().await {
                        Ok(()) => EngineOutcome::Played(token),
                        Err(error) => EngineOutcome::Failed {
                            token,
                            stage: LoadStage::Play,
                            error,
                        },
                    }
                }
            };
            let _ = tx.send(outcome).await;
        }));
        Some(token)
    }

    fn abort_load(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
    }

    /// Apply a task completion. Stale or post-teardown outcomes are dropped.
    pub fn on_outcome(&mut self, outcome: EngineOutcome) -> Option<PlaybackEvent> {
        if self.state == AdapterState::Destroyed {
            debug!("engine: dropping outcome after teardown: {:?}", outcome);
            return None;
        }

        match outcome {
            EngineOutcome::Attached(Ok(())) => {
                info!("engine: attached");
                self.state = AdapterState::Idle;
                if let Some(url) = self.pending.take() {
                    self.load(&url);
                }
                Some(PlaybackEvent::Attached)
            }
            EngineOutcome::Attached(Err(e)) => {
                error!("engine: attach failed: {}", e);
                self.state = AdapterState::Uninitialized;
                self.pending = None;
                Some(PlaybackEvent::AttachFailed(e.to_string()))
            }
            EngineOutcome::Loaded(token) => {
                if token != self.latest {
                    debug!("engine: stale load completion {:?}", token);
                    return None;
                }
                let url = self.requested.clone().unwrap_or_default();
                info!("engine: loaded {}", url);
                Some(PlaybackEvent::Loaded { url })
            }
            EngineOutcome::Played(token) => {
                if token != self.latest {
                    debug!("engine: stale play completion {:?}", token);
                    return None;
                }
                self.state = AdapterState::Playing;
                let url = self.requested.clone().unwrap_or_default();
                info!("engine: playing {}", url);
                Some(PlaybackEvent::Started { url })
            }
            EngineOutcome::Failed {
                token,
                stage,
                error,
            } => {
                if token != self.latest {
                    debug!("engine: stale failure {:?}: {}", token, error);
                    return None;
                }
                let kind = classify(stage, &error);
                let url = self.requested.as_deref().unwrap_or_default();
                log_classified(kind, url, &error);
                self.state = AdapterState::Error(kind);
                Some(PlaybackEvent::Failed {
                    kind,
                    detail: error.message,
                })
            }
            EngineOutcome::KeysProvisioned(Ok(count)) => {
                info!("engine: {} clear keys configured", count);
                Some(PlaybackEvent::KeysProvisioned(count))
            }
            EngineOutcome::KeysProvisioned(Err(e)) => {
                warn!("engine: key provisioning failed, encrypted channels will not play: {}", e);
                Some(PlaybackEvent::KeyFetchFailed(e.to_string()))
            }
        }
    }

    /// Stop whatever is playing. Loads in flight are superseded and the engine
    /// is paused; the next `load` starts fresh, even for the same source.
    pub fn stop(&mut self) {
        self.pending = None;
        self.requested = None;
        if !self.is_attached() {
            return;
        }
        self.latest = LoadToken(self.latest.0 + 1);
        self.abort_load();
        self.state = AdapterState::Idle;
        info!("engine: stopped");
        let engine = Arc::clone(&self.engine);
        self.spawn(async move {
            if let Err(e) = engine.pause().await {
                warn!("engine: pause on stop failed: {}", e);
            }
        });
    }

    /// Flip play/pause based on the live paused state.
    pub fn toggle_playback(&mut self) {
        if !self.is_attached() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        self.spawn(async move {
            let result = match engine.is_paused().await {
                Ok(true) => engine.play().await,
                Ok(false) => engine.pause().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                let kind = classify(LoadStage::Play, &e);
                warn!("engine: play/pause toggle failed ({}): {}", kind, e);
            }
        });
    }

    /// Enter or leave fullscreen based on the live fullscreen state.
    pub fn toggle_fullscreen(&mut self) {
        if !self.is_attached() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        self.spawn(async move {
            let result = match engine.is_fullscreen().await {
                Ok(fullscreen) => engine.set_fullscreen(!fullscreen).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!("engine: fullscreen toggled"),
                Err(e) => warn!("engine: fullscreen toggle failed: {}", e),
            }
        });
    }

    /// Leave fullscreen if currently fullscreen; otherwise nothing.
    pub fn exit_fullscreen(&mut self) {
        if !self.is_attached() {
            return;
        }
        let engine = Arc::clone(&self.engine);
        self.spawn(async move {
            match engine.is_fullscreen().await {
                Ok(true) => {
                    if let Err(e) = engine.set_fullscreen(false).await {
                        warn!("engine: exit fullscreen failed: {}", e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("engine: fullscreen query failed: {}", e),
            }
        });
    }

    /// Destroy the engine. Safe from any state; later calls do nothing.
    pub async fn teardown(&mut self) {
        if self.state == AdapterState::Destroyed {
            return;
        }
        info!("engine: teardown");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.abort_load();
        self.state = AdapterState::Destroyed;
        self.pending = None;
        self.engine.destroy().await;
    }
}

async fn provision_keys<E: Engine, K: KeySource>(engine: &E, provisioner: &K) -> Result<usize, KeyFetchError> {
    let keys = provisioner.fetch().await?;
    let count = keys.len();
    if count == 0 {
        warn!("drm: licensing endpoint returned no usable keys");
    }
    if let Err(e) = engine.configure_clear_keys(keys).await {
        warn!("drm: engine rejected key configuration: {}", e);
        return Ok(0);
    }
    Ok(count)
}

#[cfg(test)]
pub(crate) mod testing;
