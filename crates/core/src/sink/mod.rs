//! Capability traits for the effectful backends the dispatcher drives.
//!
//! Each backend (Spotify Connect, a thermal printer, a test double) provides
//! one implementation; the core only ever sees the trait objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ClassifiedUri, SinkError, UriKind, VolumeLevel};

const TITLE_LIMIT: usize = 30;
const SUBTITLE_LIMIT: usize = 35;

/// Starts and controls playback on a pre-configured output device.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Resolves the reference into provider content and starts playing it.
    async fn play(&self, classified: &ClassifiedUri) -> Result<(), SinkError>;

    async fn set_volume(&self, level: VolumeLevel) -> Result<(), SinkError>;

    /// Pauses when playing, resumes otherwise. `fallback` is replayed when
    /// the device has nothing loaded to resume.
    async fn toggle_pause(
        &self,
        fallback: Option<&ClassifiedUri>,
    ) -> Result<PlaybackState, SinkError>;

    /// What the device is playing right now, if anything.
    async fn now_playing(&self) -> Result<Option<NowPlaying>, SinkError>;
}

/// Renders a sticker for a reference and sends it to the printer.
#[async_trait]
pub trait PrintSink: Send + Sync {
    async fn print_sticker(
        &self,
        classified: &ClassifiedUri,
        label: Option<&StickerLabel>,
    ) -> Result<(), SinkError>;
}

/// Looks up display metadata used to caption stickers.
#[async_trait]
pub trait LabelSource: Send + Sync {
    async fn label(&self, classified: &ClassifiedUri) -> Result<StickerLabel, SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Playing,
    Paused,
}

/// Snapshot of the active playback on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlaying {
    /// Playlist, album or other context the device is playing from.
    pub context: Option<ClassifiedUri>,
    /// Album of the current track.
    pub track_album: Option<ClassifiedUri>,
}

impl NowPlaying {
    /// Reference worth printing: the playlist/album context, or the album
    /// of a track played without context. Other contexts (artists, shows)
    /// are not printable.
    pub fn printable(&self) -> Option<&ClassifiedUri> {
        match &self.context {
            Some(context) => {
                matches!(context.kind, UriKind::Playlist | UriKind::Album).then_some(context)
            }
            None => self.track_album.as_ref().filter(|album| album.is_known()),
        }
    }
}

/// Caption printed under the QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerLabel {
    pub title: String,
    pub subtitle: Option<String>,
}

impl StickerLabel {
    /// Builds a label, shortening long texts so they fit the sticker width.
    pub fn new(title: impl AsRef<str>, subtitle: Option<&str>) -> Self {
        Self {
            title: truncate(title.as_ref(), TITLE_LIMIT),
            subtitle: subtitle
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| truncate(s, SUBTITLE_LIMIT)),
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut short: String = text.chars().take(limit - 3).collect();
    short.push_str("...");
    short
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(kind: UriKind, id: &str) -> ClassifiedUri {
        ClassifiedUri {
            kind,
            id: id.to_string(),
            raw: format!("spotify:{kind}:{id}"),
        }
    }

    #[test]
    fn truncates_long_labels() {
        let label = StickerLabel::new(
            "An Extremely Long Playlist Name That Overflows",
            Some("Somebody With A Very Long Display Name Indeed"),
        );
        assert_eq!(label.title.chars().count(), 30);
        assert!(label.title.ends_with("..."));
        assert_eq!(label.subtitle.as_deref().map(|s| s.chars().count()), Some(35));
    }

    #[test]
    fn drops_blank_subtitles() {
        let label = StickerLabel::new("Title", Some("   "));
        assert_eq!(label.title, "Title");
        assert_eq!(label.subtitle, None);
    }

    #[test]
    fn prefers_playlist_or_album_context() {
        let now = NowPlaying {
            context: Some(uri(UriKind::Playlist, "p1")),
            track_album: Some(uri(UriKind::Album, "a1")),
        };
        assert_eq!(now.printable().map(|u| u.id.as_str()), Some("p1"));
    }

    #[test]
    fn falls_back_to_track_album_without_context() {
        let now = NowPlaying {
            context: None,
            track_album: Some(uri(UriKind::Album, "a1")),
        };
        assert_eq!(now.printable().map(|u| u.id.as_str()), Some("a1"));
    }

    #[test]
    fn unsupported_context_is_not_printable() {
        let now = NowPlaying {
            context: Some(ClassifiedUri::unknown("spotify:artist:xyz")),
            track_album: Some(uri(UriKind::Album, "a1")),
        };
        assert_eq!(now.printable(), None);
    }
}
