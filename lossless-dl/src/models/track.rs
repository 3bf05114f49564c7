//! Playlist track identity

use serde::{Deserialize, Serialize};

use crate::utils::formatting::{collapse_whitespace, normalize_key};

/// A track as read from the playlist source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub album: String,
}

/// Normalized (artist, title) identity used for dedupe and locking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey {
    pub artist: String,
    pub title: String,
}

impl Track {
    pub fn new(artist: impl Into<String>, title: impl Into<String>, album: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            album: album.into(),
        }
    }

    /// `Artist - Title`, used for logs and output file names
    pub fn display_name(&self) -> String {
        format!(
            "{} - {}",
            collapse_whitespace(&self.artist),
            collapse_whitespace(&self.title)
        )
    }

    pub fn key(&self) -> TrackKey {
        TrackKey {
            artist: normalize_key(&self.artist),
            title: normalize_key(&self.title),
        }
    }

    /// Search query variants, strictest first.
    ///
    /// `"artist title"` then `"title"` alone. Variants that normalize to the
    /// same text, or are empty, are dropped.
    pub fn query_variants(&self) -> Vec<String> {
        let artist = collapse_whitespace(&self.artist);
        let title = collapse_whitespace(&self.title);

        let mut variants: Vec<String> = Vec::with_capacity(2);
        for candidate in [format!("{} {}", artist, title), title] {
            let candidate = collapse_whitespace(&candidate);
            if candidate.is_empty() {
                continue;
            }
            let key = normalize_key(&candidate);
            if variants.iter().any(|v| normalize_key(v) == key) {
                continue;
            }
            variants.push(candidate);
        }
        variants
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_variants_strict_then_loose() {
        let track = Track::new("Artist 1", "Song A", "Album X");
        assert_eq!(track.query_variants(), vec!["Artist 1 Song A", "Song A"]);
    }

    #[test]
    fn test_query_variants_collapse_whitespace() {
        let track = Track::new("  Boards  of Canada ", "Roygbiv\t", "");
        assert_eq!(
            track.query_variants(),
            vec!["Boards of Canada Roygbiv", "Roygbiv"]
        );
    }

    #[test]
    fn test_query_variants_drop_duplicates_and_empty() {
        let no_artist = Track::new("", "Intro", "");
        assert_eq!(no_artist.query_variants(), vec!["Intro"]);

        let empty = Track::new(" ", " ", "");
        assert!(empty.query_variants().is_empty());
    }

    #[test]
    fn test_key_is_case_and_space_insensitive() {
        let a = Track::new("Daft Punk", "One More Time", "Discovery");
        let b = Track::new("daft  punk", "ONE MORE TIME ", "");
        assert_eq!(a.key(), b.key());
        assert_eq!(a.display_name(), "Daft Punk - One More Time");
    }
}
