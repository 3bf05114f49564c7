//! Candidate files discovered on the peer network

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::utils::formatting::{basename_any, extension_of};

/// Extensions treated as lossless when none are configured
pub const DEFAULT_LOSSLESS_EXTENSIONS: &[&str] =
    &["flac", "wav", "aiff", "aif", "alac", "ape", "wv", "tta"];

/// Format bucket a caller can rank on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Aiff,
    Flac,
    Wav,
    Alac,
    /// Every non-lossless extension
    Lossy,
}

impl FormatTag {
    /// Parse a user-supplied preference entry (`".FLAC"`, `"aif"`, `"lossy"`)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "aiff" | "aif" => Some(FormatTag::Aiff),
            "flac" => Some(FormatTag::Flac),
            "wav" => Some(FormatTag::Wav),
            "alac" => Some(FormatTag::Alac),
            "lossy" => Some(FormatTag::Lossy),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatTag::Aiff => "aiff",
            FormatTag::Flac => "flac",
            FormatTag::Wav => "wav",
            FormatTag::Alac => "alac",
            FormatTag::Lossy => "lossy",
        }
    }
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured set of lossless extensions (lower-case, no dot)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LosslessExtensions(BTreeSet<String>);

impl LosslessExtensions {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, extension: &str) -> bool {
        self.0.contains(extension)
    }
}

impl Default for LosslessExtensions {
    fn default() -> Self {
        Self::new(DEFAULT_LOSSLESS_EXTENSIONS)
    }
}

/// A single file discovered on the peer network for one track.
///
/// Identity is `(username, filename)`. Speed and queue length are optional
/// because peers do not always report them; ranking treats absence as the
/// worst value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Peer identity
    pub username: String,
    /// Full remote path, Windows or POSIX separators
    pub filename: String,
    /// Lower-cased extension derived from `filename` (empty when none)
    pub extension: String,
    /// Size in bytes, 0 when unknown
    pub size: u64,
    /// Advertised upload speed in bytes/s
    pub reported_speed: Option<u64>,
    /// Uploads queued ahead of us on that peer
    pub peer_queue_len: Option<u32>,
    /// Bitrate in kbps, when the peer reports it
    pub bitrate: Option<u32>,
    pub is_lossless: bool,
}

impl Candidate {
    pub fn new(
        username: impl Into<String>,
        filename: impl Into<String>,
        size: u64,
        reported_speed: Option<u64>,
        peer_queue_len: Option<u32>,
        bitrate: Option<u32>,
        lossless: &LosslessExtensions,
    ) -> Self {
        let filename = filename.into();
        let extension = extension_of(&filename).unwrap_or_default();
        let is_lossless = lossless.contains(&extension);
        Self {
            username: username.into(),
            filename,
            extension,
            size,
            reported_speed,
            peer_queue_len,
            bitrate,
            is_lossless,
        }
    }

    /// Dedupe identity
    pub fn key(&self) -> (&str, &str) {
        (&self.username, &self.filename)
    }

    /// Remote file name without directories
    pub fn basename(&self) -> &str {
        basename_any(&self.filename)
    }

    /// Preference bucket, `None` for lossless formats outside the taggable set
    pub fn format_tag(&self) -> Option<FormatTag> {
        if !self.is_lossless {
            return Some(FormatTag::Lossy);
        }
        match FormatTag::parse(&self.extension) {
            Some(FormatTag::Lossy) | None => None,
            tag => tag,
        }
    }

    /// `user | q=N | v=N KiB/s | basename`, for job logs
    pub fn label(&self) -> String {
        let speed = match self.reported_speed {
            Some(s) if s > 0 => format!("{:.0} KiB/s", s as f64 / 1024.0),
            _ => "?".to_string(),
        };
        let queue = self
            .peer_queue_len
            .map(|q| q.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!("{} | q={} | v={} | {}", self.username, queue, speed, self.basename())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(filename: &str) -> Candidate {
        Candidate::new("u1", filename, 1, None, None, None, &LosslessExtensions::default())
    }

    #[test]
    fn test_windows_path_normalization() {
        let c = candidate(r"C:\music\Artist\01 - Song.flac");
        assert_eq!(c.extension, "flac");
        assert_eq!(c.basename(), "01 - Song.flac");
        assert!(c.is_lossless);

        let posix = candidate("/music/Artist/01 - Song.flac");
        assert_eq!(posix.basename(), c.basename());
        assert_eq!(posix.extension, c.extension);
    }

    #[test]
    fn test_format_tags() {
        assert_eq!(candidate("/a/b.FLAC").format_tag(), Some(FormatTag::Flac));
        assert_eq!(candidate("/a/b.aif").format_tag(), Some(FormatTag::Aiff));
        assert_eq!(candidate("/a/b.mp3").format_tag(), Some(FormatTag::Lossy));
        assert_eq!(candidate("/a/noext").format_tag(), Some(FormatTag::Lossy));
        // Lossless but outside the taggable set
        assert_eq!(candidate("/a/b.ape").format_tag(), None);
    }

    #[test]
    fn test_configured_lossless_set() {
        let only_flac = LosslessExtensions::new([".FLAC"]);
        let wav = Candidate::new("u", "/x.wav", 0, None, None, None, &only_flac);
        let flac = Candidate::new("u", "/x.flac", 0, None, None, None, &only_flac);
        assert!(!wav.is_lossless);
        assert!(flac.is_lossless);
    }

    #[test]
    fn test_format_tag_parse() {
        assert_eq!(FormatTag::parse(" .AIF "), Some(FormatTag::Aiff));
        assert_eq!(FormatTag::parse("Lossy"), Some(FormatTag::Lossy));
        assert_eq!(FormatTag::parse("mp3"), None);
    }

    #[test]
    fn test_label() {
        let c = Candidate::new(
            "peer",
            r"D:\x\Song.flac",
            10,
            Some(2048),
            Some(3),
            None,
            &LosslessExtensions::default(),
        );
        assert_eq!(c.label(), "peer | q=3 | v=2 KiB/s | Song.flac");
        assert_eq!(candidate("/a.flac").label(), "u1 | q=? | v=? | a.flac");
    }
}
