/// mpv-backed engine: one child process, driven over JSON IPC.
///
/// ```text
///   MpvEngine::attach()
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event / property-change   → broadcast to subscribers
/// ```
///
/// `load()` subscribes to the event stream before issuing `loadfile` and then
/// waits for mpv to report the new playlist entry as loaded or failed.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surf_proto::config::MpvConfig;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::drm::ClearKeys;
use super::{codes, Engine, EngineError, EngineNotice};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property id for `pause`.
pub const OBS_PAUSE: u64 = 1;

/// A stream that never reports loaded or failed is treated as unreachable.
pub const LOAD_TIMEOUT: Duration = Duration::from_secs(15);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event / property-change that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// Returns `Some((obs_id, data))` if this is a property-change event.
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.event_name()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    /// Returns the event name, e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    pub fn playlist_entry_id(&self) -> Option<i64> {
        self.raw.get("playlist_entry_id")?.as_i64()
    }

    /// `file_error` of an `end-file` event whose reason is "error".
    pub fn load_error(&self) -> Option<&str> {
        if self.event_name()? != "end-file" || self.raw.get("reason")?.as_str()? != "error" {
            return None;
        }
        Some(
            self.raw
                .get("file_error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error"),
        )
    }
}

/// Map mpv's `file_error` strings onto engine error codes.
pub fn error_code_for(file_error: &str) -> u16 {
    match file_error {
        "loading failed" => codes::NETWORK,
        "unrecognized file format" => codes::MANIFEST,
        "no audio or video data played" | "unsupported format" => codes::MEDIA,
        "audio output initialization failed" | "video output initialization failed" => codes::PLAYBACK,
        _ => codes::GENERIC,
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn set_property(&self, name: &str, value: Value) -> anyhow::Result<()> {
        self.send(json!(["set_property", name, value])).await?;
        Ok(())
    }

    pub async fn get_bool(&self, name: &str) -> anyhow::Result<bool> {
        let resp = self.send(json!(["get_property", name])).await?;
        resp["data"]
            .as_bool()
            .ok_or_else(|| anyhow::anyhow!("mpv property {} is not a bool", name))
    }
}

fn start_io_tasks<S>(stream: S, events: broadcast::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);

    // req_id → reply channel. Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(reader, pending, events));

    MpvHandle { tx: cmd_tx }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, events: broadcast::Sender<MpvEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC connection closed")));
                }
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    // No subscribers is fine.
                    let _ = events.send(MpvEvent { raw: val });
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                let mut map = pending.lock().await;
                for (_, tx) in map.drain() {
                    let _ = tx.send(Err(anyhow::anyhow!("mpv IPC read error: {}", e)));
                }
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── engine ────────────────────────────────────────────────────────────────────

pub struct MpvEngine {
    settings: MpvConfig,
    socket_name: String,
    process: Mutex<Option<tokio::process::Child>>,
    handle: Mutex<Option<MpvHandle>>,
    events: broadcast::Sender<MpvEvent>,
    notice_tx: mpsc::Sender<EngineNotice>,
    observer: Mutex<Option<JoinHandle<()>>>,
}

impl MpvEngine {
    /// Returns the engine and the receiver for unsolicited notices.
    pub fn new(settings: MpvConfig) -> (Self, mpsc::Receiver<EngineNotice>) {
        let (events, _) = broadcast::channel(256);
        let (notice_tx, notice_rx) = mpsc::channel(16);
        let engine = Self {
            settings,
            socket_name: surf_proto::platform::mpv_socket_name(),
            process: Mutex::new(None),
            handle: Mutex::new(None),
            events,
            notice_tx,
            observer: Mutex::new(None),
        };
        (engine, notice_rx)
    }

    async fn handle(&self) -> Result<MpvHandle, EngineError> {
        self.handle
            .lock()
            .await
            .clone()
            .ok_or_else(|| EngineError::generic("mpv is not attached"))
    }

    fn spawn_process(&self) -> anyhow::Result<tokio::process::Child> {
        let binary = match &self.settings.binary {
            Some(path) => path.clone(),
            None => surf_proto::platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?,
        };
        let vol_arg = format!(
            "--volume={}",
            (self.settings.volume * 100.0).clamp(0.0, 100.0).round() as i64
        );
        let ipc_arg = surf_proto::platform::mpv_socket_arg(&self.socket_name);

        let stderr_path = surf_proto::platform::data_dir().join("mpv-stderr.log");
        let stderr_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&stderr_path)?;
        info!("mpv: logging stderr to {:?}", stderr_path);

        let child = tokio::process::Command::new(&binary)
            .arg("--idle=yes")
            .arg("--force-window=yes")
            .arg("--title=chansurf")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(&vol_arg)
            .args(&self.settings.extra_args)
            .stdout(std::process::Stdio::null())
            .stderr(stderr_file)
            .kill_on_drop(true)
            .spawn()?;
        info!("mpv: spawned {:?} with pid {:?}", binary, child.id());
        Ok(child)
    }

    #[cfg(unix)]
    async fn connect(&self) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream, self.events.clone()))
    }

    #[cfg(windows)]
    async fn connect(&self) -> anyhow::Result<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(start_io_tasks(client, self.events.clone()));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    async fn start(&self) -> anyhow::Result<()> {
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        info!("mpv: spawning new process");
        let child = self.spawn_process()?;
        *self.process.lock().await = Some(child);

        let handle = self.connect().await?;
        self.install(handle).await;
        Ok(())
    }

    /// Adopt a connected handle: observe pause and forward changes as notices.
    async fn install(&self, handle: MpvHandle) {
        let mut events = self.events.subscribe();
        let notice_tx = self.notice_tx.clone();
        let observer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(evt) => {
                        if let Some((OBS_PAUSE, data)) = evt.as_property_change() {
                            if let Some(paused) = data.as_bool() {
                                if notice_tx.send(EngineNotice::Paused(paused)).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!("mpv: pause observer lagged by {}", n),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        if let Some(old) = self.observer.lock().await.replace(observer) {
            old.abort();
        }

        match handle.send(json!(["observe_property", OBS_PAUSE, "pause"])).await {
            Ok(_) => debug!("mpv: observing pause"),
            Err(e) => warn!("mpv: observe_property pause failed: {}", e),
        }
        *self.handle.lock().await = Some(handle);
    }

    /// Resolve once mpv has started and loaded `entry`. Everything seen
    /// before our `start-file` is left over from the previous load, including
    /// its `file-loaded` (which carries no entry id).
    async fn wait_for_load(
        events: &mut broadcast::Receiver<MpvEvent>,
        entry: Option<i64>,
    ) -> Result<(), EngineError> {
        let mut started = false;
        loop {
            let evt = match events.recv().await {
                Ok(evt) => evt,
                Err(RecvError::Lagged(n)) => {
                    debug!("mpv: load waiter lagged by {}", n);
                    continue;
                }
                Err(RecvError::Closed) => return Err(EngineError::generic("mpv event stream closed")),
            };
            let ours = entry.is_none() || evt.playlist_entry_id() == entry;
            match evt.event_name() {
                Some("start-file") if ours => started = true,
                Some("file-loaded") if started => return Ok(()),
                Some("end-file") if started && ours => {
                    if let Some(file_error) = evt.load_error() {
                        return Err(EngineError::new(error_code_for(file_error), file_error));
                    }
                    if entry.is_some() {
                        return Err(EngineError::generic("load replaced before it finished"));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ipc_error(e: anyhow::Error) -> EngineError {
    EngineError::generic(e.to_string())
}

impl Engine for MpvEngine {
    fn supports_clear_keys(&self) -> bool {
        // ffmpeg's CENC support takes a single `decryption_key`.
        true
    }

    async fn attach(&self) -> Result<(), EngineError> {
        self.start().await.map_err(|e| EngineError::generic(format!("mpv attach failed: {}", e)))
    }

    async fn configure_clear_keys(&self, keys: ClearKeys) -> Result<(), EngineError> {
        let Some((kid, key)) = keys.iter().next() else {
            return Ok(());
        };
        if keys.len() > 1 {
            warn!("mpv: {} keys provided, only {} is applied", keys.len(), kid);
        }
        let handle = self.handle().await?;
        handle
            .set_property("demuxer-lavf-o", json!(format!("decryption_key={}", key)))
            .await
            .map_err(|e| EngineError::new(codes::KEY, e.to_string()))?;
        debug!("mpv: decryption key configured for kid {}", kid);
        Ok(())
    }

    async fn load(&self, url: String) -> Result<(), EngineError> {
        let handle = self.handle().await?;
        let mut events = self.events.subscribe();
        debug!("mpv: sending loadfile command for url={}", url);
        let resp = handle
            .send(json!(["loadfile", url, "replace"]))
            .await
            .map_err(ipc_error)?;
        let entry = resp["data"]["playlist_entry_id"].as_i64();

        tokio::time::timeout(LOAD_TIMEOUT, Self::wait_for_load(&mut events, entry))
            .await
            .map_err(|_| EngineError::new(codes::NETWORK, format!("no response within {:?}", LOAD_TIMEOUT)))?
    }

    async fn play(&self) -> Result<(), EngineError> {
        let handle = self.handle().await?;
        handle.set_property("pause", json!(false)).await.map_err(ipc_error)
    }

    async fn pause(&self) -> Result<(), EngineError> {
        let handle = self.handle().await?;
        handle.set_property("pause", json!(true)).await.map_err(ipc_error)
    }

    async fn is_paused(&self) -> Result<bool, EngineError> {
        let handle = self.handle().await?;
        handle.get_bool("pause").await.map_err(ipc_error)
    }

    async fn is_fullscreen(&self) -> Result<bool, EngineError> {
        let handle = self.handle().await?;
        handle.get_bool("fullscreen").await.map_err(ipc_error)
    }

    async fn set_fullscreen(&self, fullscreen: bool) -> Result<(), EngineError> {
        let handle = self.handle().await?;
        handle.set_property("fullscreen", json!(fullscreen)).await.map_err(ipc_error)
    }

    async fn destroy(&self) {
        if let Some(observer) = self.observer.lock().await.take() {
            observer.abort();
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle.send(json!(["quit"]))).await;
        }
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.kill().await;
            info!("mpv: process stopped");
        }
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;
    }
}
