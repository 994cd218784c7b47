//! Playlist retrieval and refresh.
//!
//! A refresh is split in two: the fetch runs on a spawned task, and the
//! result is applied on the controller task. Each refresh is stamped with a
//! generation so that an older fetch finishing late cannot overwrite a newer
//! list.

use std::future::Future;

use surf_proto::channel::{parse_m3u, Channel, ChannelList};
use surf_proto::state::Credentials;
use tracing::{debug, info, warn};

use crate::error::PlaylistError;

/// Somewhere a playlist document can be fetched from.
pub trait PlaylistSource: Send + Sync + 'static {
    fn fetch(&self, credentials: Credentials) -> impl Future<Output = Result<String, PlaylistError>> + Send;
}

/// M3U over HTTP with Basic auth.
#[derive(Clone)]
pub struct HttpPlaylistSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPlaylistSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self { client, url: url.into() }
    }
}

impl PlaylistSource for HttpPlaylistSource {
    async fn fetch(&self, credentials: Credentials) -> Result<String, PlaylistError> {
        debug!("playlist: GET {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlaylistError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    /// A non-empty list replaced the previous one.
    Replaced(ChannelList),
    /// The source answered with nothing playable; the list is now empty.
    Empty,
    /// Transport failure; the previous list is untouched.
    Failed(PlaylistError),
    /// A newer refresh was started after this one.
    Stale,
}

/// The current channel list. `None` until the first refresh lands.
#[derive(Debug, Default)]
pub struct Playlist {
    channels: Option<ChannelList>,
    generation: u64,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> Option<&ChannelList> {
        self.channels.as_ref()
    }

    pub fn len(&self) -> usize {
        self.channels.as_ref().map_or(0, ChannelList::len)
    }

    /// Stamp a new refresh. Results from earlier stamps will be ignored.
    pub fn begin_refresh(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn apply(&mut self, generation: u64, result: Result<String, PlaylistError>) -> RefreshOutcome {
        if generation != self.generation {
            debug!("playlist: dropping refresh #{} (latest #{})", generation, self.generation);
            return RefreshOutcome::Stale;
        }
        let body = match result {
            Ok(body) => body,
            Err(PlaylistError::Empty) => String::new(),
            Err(e) => {
                warn!("playlist: refresh failed, keeping {} channels: {}", self.len(), e);
                return RefreshOutcome::Failed(e);
            }
        };

        let list = ChannelList::from_records(parse_m3u(&body));
        self.channels = Some(list.clone());
        if list.is_empty() {
            warn!("playlist: source returned no playable channels");
            RefreshOutcome::Empty
        } else {
            info!("playlist: {} channels", list.len());
            RefreshOutcome::Replaced(list)
        }
    }
}

/// Where the selection lands in a refreshed list: the same source if it is
/// still present, otherwise the same position clamped to the new length.
pub fn reanchor(previous: &Channel, list: &ChannelList) -> Option<usize> {
    if list.is_empty() {
        return None;
    }
    let index = list
        .position_of_source(&previous.source_url)
        .unwrap_or_else(|| previous.index.min(list.len() - 1));
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE: &str = "#EXTM3U\n\
        #EXTINF:-1 tvg-logo=\"http://img/a.png\",Alpha\nhttp://tv/a.m3u8\n\
        #EXTINF:-1,Bravo\nhttp://tv/b.m3u8\n\
        #EXTINF:-1,Charlie\nhttp://tv/c.m3u8\n";

    const TWO_REORDERED: &str = "#EXTM3U\n\
        #EXTINF:-1,Charlie\nhttp://tv/c.m3u8\n\
        #EXTINF:-1,Alpha\nhttp://tv/a.m3u8\n";

    fn refreshed(playlist: &mut Playlist, body: &str) -> ChannelList {
        let generation = playlist.begin_refresh();
        match playlist.apply(generation, Ok(body.to_string())) {
            RefreshOutcome::Replaced(list) => list,
            other => panic!("expected a list, got {:?}", other),
        }
    }

    #[test]
    fn unchanged_source_yields_identical_list() {
        let mut playlist = Playlist::new();
        let first = refreshed(&mut playlist, THREE);
        let second = refreshed(&mut playlist, THREE);
        assert_eq!(first, second);
        let bravo = first.get(1).unwrap();
        assert_eq!(reanchor(bravo, &second), Some(1));
    }

    #[test]
    fn selection_follows_source_across_reorder() {
        let mut playlist = Playlist::new();
        let old = refreshed(&mut playlist, THREE);
        let new = refreshed(&mut playlist, TWO_REORDERED);
        assert_eq!(reanchor(old.get(0).unwrap(), &new), Some(1));
        assert_eq!(reanchor(old.get(2).unwrap(), &new), Some(0));
        // Bravo is gone: position 1 still exists.
        assert_eq!(reanchor(old.get(1).unwrap(), &new), Some(1));
    }

    #[test]
    fn missing_source_clamps_position() {
        let mut playlist = Playlist::new();
        let old = refreshed(&mut playlist, THREE);
        let new = refreshed(&mut playlist, "#EXTINF:-1,Delta\nhttp://tv/d.m3u8\n");
        assert_eq!(reanchor(old.get(2).unwrap(), &new), Some(0));
        assert_eq!(reanchor(old.get(2).unwrap(), &ChannelList::empty()), None);
    }

    #[test]
    fn empty_source_replaces_with_empty_list() {
        let mut playlist = Playlist::new();
        refreshed(&mut playlist, THREE);
        let generation = playlist.begin_refresh();
        assert!(matches!(
            playlist.apply(generation, Ok("<html>oops</html>".into())),
            RefreshOutcome::Empty
        ));
        assert_eq!(playlist.channels().map(ChannelList::len), Some(0));
    }

    #[test]
    fn fetch_failure_keeps_previous_list() {
        let mut playlist = Playlist::new();
        let before = refreshed(&mut playlist, THREE);
        let generation = playlist.begin_refresh();
        assert!(matches!(
            playlist.apply(generation, Err(PlaylistError::Status(503))),
            RefreshOutcome::Failed(PlaylistError::Status(503))
        ));
        assert_eq!(playlist.channels(), Some(&before));
    }

    #[test]
    fn late_refresh_is_discarded() {
        let mut playlist = Playlist::new();
        let older = playlist.begin_refresh();
        let newer = playlist.begin_refresh();
        assert!(matches!(
            playlist.apply(newer, Ok(TWO_REORDERED.into())),
            RefreshOutcome::Replaced(_)
        ));
        assert!(matches!(playlist.apply(older, Ok(THREE.into())), RefreshOutcome::Stale));
        assert_eq!(playlist.len(), 2);
    }

    #[test]
    fn not_loaded_differs_from_empty() {
        let mut playlist = Playlist::new();
        assert!(playlist.channels().is_none());
        let generation = playlist.begin_refresh();
        playlist.apply(generation, Ok(String::new()));
        assert!(playlist.channels().is_some());
        assert_eq!(playlist.len(), 0);
    }
}
