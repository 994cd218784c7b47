use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::drm::{ClearKeys, KeySource};
use super::{Engine, EngineError};
use crate::error::KeyFetchError;

#[derive(Default)]
struct MockState {
    attach_delay: Duration,
    attach_error: Option<EngineError>,
    load_delays: HashMap<String, Duration>,
    load_errors: HashMap<String, EngineError>,
    play_error: Option<EngineError>,
    loads: Vec<String>,
    keys: Option<ClearKeys>,
    paused: bool,
    fullscreen: bool,
    destroyed: usize,
}

/// Scriptable in-memory engine. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct MockEngine {
    inner: Arc<Mutex<MockState>>,
    clear_keys: bool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clear_keys() -> Self {
        Self {
            clear_keys: true,
            ..Self::default()
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.inner.lock().unwrap())
    }

    pub fn set_attach_delay(&self, delay: Duration) {
        self.with(|s| s.attach_delay = delay);
    }

    pub fn fail_attach(&self, err: EngineError) {
        self.with(|s| s.attach_error = Some(err));
    }

    pub fn set_load_delay(&self, url: &str, delay: Duration) {
        self.with(|s| s.load_delays.insert(url.to_string(), delay));
    }

    pub fn fail_load(&self, url: &str, err: EngineError) {
        self.with(|s| s.load_errors.insert(url.to_string(), err));
    }

    pub fn fail_play(&self, err: EngineError) {
        self.with(|s| s.play_error = Some(err));
    }

    pub fn loads(&self) -> Vec<String> {
        self.with(|s| s.loads.clone())
    }

    pub fn keys(&self) -> Option<ClearKeys> {
        self.with(|s| s.keys.clone())
    }

    pub fn paused(&self) -> bool {
        self.with(|s| s.paused)
    }

    pub fn set_paused(&self, paused: bool) {
        self.with(|s| s.paused = paused);
    }

    pub fn fullscreen(&self) -> bool {
        self.with(|s| s.fullscreen)
    }

    pub fn destroy_count(&self) -> usize {
        self.with(|s| s.destroyed)
    }
}

impl Engine for MockEngine {
    fn supports_clear_keys(&self) -> bool {
        self.clear_keys
    }

    async fn attach(&self) -> Result<(), EngineError> {
        let (delay, err) = self.with(|s| (s.attach_delay, s.attach_error.clone()));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        err.map_or(Ok(()), Err)
    }

    async fn configure_clear_keys(&self, keys: ClearKeys) -> Result<(), EngineError> {
        self.with(|s| s.keys = Some(keys));
        Ok(())
    }

    async fn load(&self, url: String) -> Result<(), EngineError> {
        let (delay, err) = self.with(|s| {
            s.loads.push(url.clone());
            (
                s.load_delays.get(&url).copied().unwrap_or_default(),
                s.load_errors.get(&url).cloned(),
            )
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        err.map_or(Ok(()), Err)
    }

    async fn play(&self) -> Result<(), EngineError> {
        let err = self.with(|s| s.play_error.clone());
        match err {
            Some(e) => Err(e),
            None => {
                self.with(|s| s.paused = false);
                Ok(())
            }
        }
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.with(|s| s.paused = true);
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool, EngineError> {
        Ok(self.paused())
    }

    async fn is_fullscreen(&self) -> Result<bool, EngineError> {
        Ok(self.fullscreen())
    }

    async fn set_fullscreen(&self, fullscreen: bool) -> Result<(), EngineError> {
        self.with(|s| s.fullscreen = fullscreen);
        Ok(())
    }

    async fn destroy(&self) {
        self.with(|s| s.destroyed += 1);
    }
}

/// Licensing endpoint stand-in: serves a fixed key map or fails with a status.
#[derive(Clone)]
pub(crate) struct MockKeys {
    result: Result<ClearKeys, u16>,
}

impl MockKeys {
    pub fn serving(keys: ClearKeys) -> Self {
        Self { result: Ok(keys) }
    }

    pub fn failing(status: u16) -> Self {
        Self { result: Err(status) }
    }
}

impl KeySource for MockKeys {
    async fn fetch(&self) -> Result<ClearKeys, KeyFetchError> {
        self.result.clone().map_err(KeyFetchError::Status)
    }
}
