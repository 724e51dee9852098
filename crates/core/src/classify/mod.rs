use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::GrammarConfig;

/// Content kinds a payload may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UriKind {
    Track,
    Album,
    Playlist,
    Unknown,
}

impl UriKind {
    /// Maps a grammar type token (`track`, `album`, `playlist`) to a kind.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "track" => Some(Self::Track),
            "album" => Some(Self::Album),
            "playlist" => Some(Self::Playlist),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UriKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload interpreted as a reference to playable content.
///
/// `id` is empty exactly when `kind` is [`UriKind::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedUri {
    pub kind: UriKind,
    pub id: String,
    pub raw: String,
}

impl ClassifiedUri {
    pub fn unknown(raw: impl Into<String>) -> Self {
        Self {
            kind: UriKind::Unknown,
            id: String::new(),
            raw: raw.into(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.kind != UriKind::Unknown
    }

    /// Logical identity of the reference, ignoring its surface syntax.
    pub fn same_content(&self, other: &ClassifiedUri) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

/// Pure payload classifier driven by a [`GrammarConfig`].
///
/// Scheme, host and type tokens match ASCII case-insensitively; the
/// identifier segment is an opaque token and is returned verbatim.
#[derive(Debug, Clone)]
pub struct Classifier {
    schemes: Vec<String>,
    link_hosts: Vec<String>,
    kinds: Vec<UriKind>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&GrammarConfig::default())
    }
}

impl Classifier {
    pub fn new(grammar: &GrammarConfig) -> Self {
        Self {
            schemes: grammar.schemes.iter().map(|s| s.to_ascii_lowercase()).collect(),
            link_hosts: grammar
                .link_hosts
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            kinds: grammar
                .kinds
                .iter()
                .filter_map(|token| UriKind::from_token(token))
                .collect(),
        }
    }

    /// Classifies a decoded payload. Never fails: anything outside the
    /// configured grammars comes back as [`UriKind::Unknown`].
    pub fn classify(&self, payload: &str) -> ClassifiedUri {
        let trimmed = payload.trim();
        let parsed = self
            .classify_uri(trimmed)
            .or_else(|| self.classify_link(trimmed));

        match parsed {
            Some((kind, id)) => ClassifiedUri {
                kind,
                id,
                raw: payload.to_string(),
            },
            None => ClassifiedUri::unknown(payload),
        }
    }

    /// `scheme:type:id`
    fn classify_uri(&self, payload: &str) -> Option<(UriKind, String)> {
        let mut parts = payload.split(':');
        let scheme = parts.next()?;
        let kind = parts.next()?;
        let id = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if !self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
            return None;
        }
        self.accept(kind, id)
    }

    /// `https://host[/intl-xx]/type/id[?query][#fragment]`, with or without
    /// the URL scheme.
    fn classify_link(&self, payload: &str) -> Option<(UriKind, String)> {
        if self.link_hosts.is_empty() {
            return None;
        }
        let url = if payload.contains("://") {
            Url::parse(payload).ok()?
        } else {
            Url::parse(&format!("https://{payload}")).ok()?
        };
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?.to_ascii_lowercase();
        if !self.link_hosts.iter().any(|h| *h == host) {
            return None;
        }

        let mut segments = url
            .path_segments()?
            .filter(|segment| !segment.is_empty())
            .peekable();
        if segments
            .peek()
            .is_some_and(|segment| segment.to_ascii_lowercase().starts_with("intl-"))
        {
            segments.next();
        }
        let kind = segments.next()?;
        let id = segments.next()?;
        if segments.next().is_some() {
            return None;
        }
        self.accept(kind, id)
    }

    fn accept(&self, kind: &str, id: &str) -> Option<(UriKind, String)> {
        let kind = UriKind::from_token(kind)?;
        if !self.kinds.contains(&kind) || !is_opaque_id(id) {
            return None;
        }
        Some((kind, id.to_string()))
    }
}

fn is_opaque_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| !c.is_whitespace() && !matches!(c, ':' | '/' | '?' | '#' | '%'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::default()
    }

    #[test]
    fn classifies_uri_style_payloads() {
        let c = classifier();
        let playlist = c.classify("spotify:playlist:37i9dQZF1DX4WYpdgoIcn6");
        assert_eq!(playlist.kind, UriKind::Playlist);
        assert_eq!(playlist.id, "37i9dQZF1DX4WYpdgoIcn6");
        assert_eq!(playlist.raw, "spotify:playlist:37i9dQZF1DX4WYpdgoIcn6");

        assert_eq!(c.classify("spotify:track:abc123").kind, UriKind::Track);
        assert_eq!(c.classify("spotify:album:4aawyAB9vmqN3uQ7FjRGTy").kind, UriKind::Album);
    }

    #[test]
    fn link_and_uri_forms_classify_identically() {
        let c = classifier();
        let pairs = [
            (
                "spotify:playlist:37i9dQZF1DX4WYpdgoIcn6",
                "https://open.spotify.com/playlist/37i9dQZF1DX4WYpdgoIcn6?si=1a2b3c",
            ),
            (
                "spotify:album:4aawyAB9vmqN3uQ7FjRGTy",
                "https://open.spotify.com/intl-de/album/4aawyAB9vmqN3uQ7FjRGTy",
            ),
            ("spotify:track:abc123", "open.spotify.com/track/abc123#top"),
            ("spotify:track:abc123", "http://play.spotify.com/track/abc123/"),
        ];

        for (uri, link) in pairs {
            let a = c.classify(uri);
            let b = c.classify(link);
            assert!(a.is_known(), "{uri} should be recognized");
            assert!(a.same_content(&b), "{uri} and {link} differ: {a:?} vs {b:?}");
        }
    }

    #[test]
    fn preserves_identifier_case() {
        let classified = classifier().classify("SPOTIFY:Track:AbCdEf");
        assert_eq!(classified.kind, UriKind::Track);
        assert_eq!(classified.id, "AbCdEf");
    }

    #[test]
    fn unknown_payloads_have_empty_ids() {
        let c = classifier();
        for payload in [
            "not-a-real-code",
            "",
            "spotify:artist:0OdUWJ0sBjDrqHygGUXeCF",
            "spotify:track:",
            "spotify:track:abc:extra",
            "spotify:user:someone:playlist:abc",
            "youtube:track:abc",
            "https://example.com/track/abc",
            "https://open.spotify.com/track",
            "https://open.spotify.com/show/abc",
            "ftp://open.spotify.com/track/abc",
            "spotify:track:has space",
        ] {
            let classified = c.classify(payload);
            assert_eq!(classified.kind, UriKind::Unknown, "{payload:?}");
            assert!(classified.id.is_empty());
            assert_eq!(classified.raw, payload);
        }
    }

    #[test]
    fn respects_configured_grammar() {
        let grammar = GrammarConfig {
            schemes: vec!["music".to_string()],
            link_hosts: Vec::new(),
            kinds: vec!["album".to_string()],
        };
        let c = Classifier::new(&grammar);

        assert_eq!(c.classify("music:album:xyz").kind, UriKind::Album);
        assert_eq!(c.classify("music:track:xyz").kind, UriKind::Unknown);
        assert_eq!(c.classify("spotify:album:xyz").kind, UriKind::Unknown);
        assert_eq!(
            c.classify("https://open.spotify.com/album/xyz").kind,
            UriKind::Unknown
        );
    }

    #[test]
    fn trims_surrounding_whitespace_but_keeps_raw() {
        let classified = classifier().classify("  spotify:album:xyz\n");
        assert_eq!(classified.kind, UriKind::Album);
        assert_eq!(classified.id, "xyz");
        assert_eq!(classified.raw, "  spotify:album:xyz\n");
    }
}
