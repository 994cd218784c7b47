use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub playlist: PlaylistConfig,
    #[serde(default)]
    pub drm: DrmConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where the channel list comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistConfig {
    /// M3U endpoint, fetched with Basic auth from the stored credentials.
    #[serde(default = "default_playlist_url")]
    pub url: String,
}

/// Clear-key licensing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrmConfig {
    #[serde(default = "default_drm_enabled")]
    pub enabled: bool,
    #[serde(default = "default_licensing_url")]
    pub licensing_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    /// Explicit mpv binary. When unset, mpv is looked up beside the executable
    /// and then on PATH.
    #[serde(default)]
    pub binary: Option<PathBuf>,
    /// Extra command-line arguments passed verbatim to mpv.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_volume")]
    pub volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Durable current-channel index.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Durable username/password pair.
    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            url: default_playlist_url(),
        }
    }
}

impl Default for DrmConfig {
    fn default() -> Self {
        Self {
            enabled: default_drm_enabled(),
            licensing_url: default_licensing_url(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            binary: None,
            extra_args: Vec::new(),
            volume: default_volume(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            credentials_file: default_credentials_file(),
        }
    }
}

fn default_playlist_url() -> String {
    "http://127.0.0.1:8080/channels.m3u".to_string()
}

fn default_drm_enabled() -> bool {
    true
}

fn default_licensing_url() -> String {
    "http://127.0.0.1:8080/drm/licensing".to_string()
}

fn default_volume() -> f32 {
    0.8
}

fn default_state_file() -> PathBuf {
    platform::data_dir().join("state.json")
}

fn default_credentials_file() -> PathBuf {
    platform::config_dir().join("credentials.json")
}

impl Config {
    /// Load the config file, writing the defaults out on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
