//! Channel records and the immutable channel list rebuilt on every playlist
//! refresh.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One playable entry in the navigable list.
///
/// `index` is the position in the list it was built into; it is reassigned on
/// every refresh and carries no identity beyond that. `source_url` is the only
/// field that can re-anchor a selection across refreshes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub index: usize,
    pub display_name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    pub source_url: String,
}

impl Channel {
    /// One-indexed number shown to the viewer.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

/// A tokenizer output row, before indices are assigned.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelRecord {
    pub display_name: String,
    pub logo_url: Option<String>,
    pub source_url: String,
}

/// Ordered, immutable snapshot of the channel list.
///
/// Cloning is cheap (shared `Arc`), so a refresh swaps in a whole new list and
/// readers holding an older clone keep a consistent view.
#[derive(Debug, Clone)]
pub struct ChannelList {
    channels: Arc<[Channel]>,
}

impl Default for ChannelList {
    fn default() -> Self {
        Self {
            channels: Arc::from(Vec::new()),
        }
    }
}

impl ChannelList {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a list with contiguous indices. Records without a source URL are
    /// dropped; they cannot be played.
    pub fn from_records(records: impl IntoIterator<Item = ChannelRecord>) -> Self {
        let channels: Vec<Channel> = records
            .into_iter()
            .filter(|r| !r.source_url.trim().is_empty())
            .enumerate()
            .map(|(index, r)| Channel {
                index,
                display_name: r.display_name,
                logo_url: r.logo_url,
                source_url: r.source_url,
            })
            .collect();
        Self {
            channels: channels.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Channel> {
        self.channels.iter()
    }

    pub fn as_slice(&self) -> &[Channel] {
        &self.channels
    }

    /// Position of the first channel playing `source_url`.
    pub fn position_of_source(&self, source_url: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.source_url == source_url)
    }
}

impl PartialEq for ChannelList {
    fn eq(&self, other: &Self) -> bool {
        self.channels[..] == other.channels[..]
    }
}

impl Eq for ChannelList {}

// ── M3U tokenizer ─────────────────────────────────────────────────────────────

/// Parse extended-M3U text into channel records.
///
/// `#EXTINF:` lines carry the display name after the first comma and an
/// optional `tvg-logo="..."` attribute; the next non-comment line is the
/// source. A bare URL without a preceding `#EXTINF` uses the URL as its name.
/// Text with no URL lines at all yields no records.
pub fn parse_m3u(content: &str) -> Vec<ChannelRecord> {
    let mut records = Vec::new();
    let mut pending: Option<ChannelRecord> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            let display_name = rest
                .find(',')
                .map(|comma| rest[comma + 1..].trim().to_string())
                .unwrap_or_default();
            pending = Some(ChannelRecord {
                display_name,
                logo_url: attribute(rest, "tvg-logo"),
                source_url: String::new(),
            });
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        // Anything that is not a URL is noise (an HTML error page, a stray
        // attribute line) rather than a source.
        if !line.contains("://") {
            pending = None;
            continue;
        }

        let mut record = pending.take().unwrap_or_default();
        if record.display_name.is_empty() {
            record.display_name = line.to_string();
        }
        record.source_url = line.to_string();
        records.push(record);
    }

    records
}

fn attribute(extinf: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = extinf.find(&needle)? + needle.len();
    let len = extinf[start..].find('"')?;
    let value = &extinf[start..start + len];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="one" tvg-logo="http://logos/one.png" group-title="News",News One
http://streams/one.m3u8
#EXTINF:-1 tvg-id="two",Sports, Live
http://streams/two.mpd

#EXTINF:-1,Orphan without source
"#;

    #[test]
    fn parses_names_logos_and_sources() {
        let records = parse_m3u(SAMPLE);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].display_name, "News One");
        assert_eq!(records[0].logo_url.as_deref(), Some("http://logos/one.png"));
        assert_eq!(records[0].source_url, "http://streams/one.m3u8");
        assert_eq!(records[1].display_name, "Sports, Live");
        assert_eq!(records[1].logo_url, None);
    }

    #[test]
    fn bare_url_uses_url_as_name() {
        let records = parse_m3u("http://streams/bare.m3u8\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name, "http://streams/bare.m3u8");
    }

    #[test]
    fn list_indices_are_contiguous() {
        let mut records = parse_m3u(SAMPLE);
        records.insert(
            1,
            ChannelRecord {
                display_name: "blank".into(),
                logo_url: None,
                source_url: "  ".into(),
            },
        );
        let list = ChannelList::from_records(records);
        assert_eq!(list.len(), 2);
        for (i, channel) in list.iter().enumerate() {
            assert_eq!(channel.index, i);
            assert_eq!(channel.number(), i + 1);
        }
    }

    #[test]
    fn malformed_text_yields_empty_list() {
        let list = ChannelList::from_records(parse_m3u("<html>not a playlist</html>\n#EXTM3U"));
        assert!(list.is_empty());
        let list = ChannelList::from_records(parse_m3u("#EXTM3U\n#EXTINF:-1,Nothing\n"));
        assert!(list.is_empty());
    }

    #[test]
    fn same_text_builds_equal_lists() {
        let a = ChannelList::from_records(parse_m3u(SAMPLE));
        let b = ChannelList::from_records(parse_m3u(SAMPLE));
        assert_eq!(a, b);
        assert_eq!(a.position_of_source("http://streams/two.mpd"), Some(1));
        assert_eq!(a.position_of_source("http://streams/missing"), None);
    }
}
