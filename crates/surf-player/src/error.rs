//! Failures that are caught at their origin and forwarded to the controller
//! as events. None of these escape the controller loop.

use surf_proto::state::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    /// The source answered but produced no playable channels.
    #[error("playlist is empty")]
    Empty,
    #[error("no credentials stored")]
    MissingCredentials,
    #[error("playlist fetch failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("playlist fetch failed: HTTP {0}")]
    Status(u16),
}

#[derive(Debug, thiserror::Error)]
pub enum KeyFetchError {
    #[error("licensing request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("licensing request failed: HTTP {0}")]
    Status(u16),
    #[error("malformed licensing response: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialsError {
    #[error("both username and password are required")]
    Incomplete,
    #[error(transparent)]
    Store(#[from] StoreError),
}
