//! Per-job download preferences

use serde::{Deserialize, Serialize};

use super::candidate::FormatTag;

/// Format order used when a request does not supply one
pub const DEFAULT_FORMAT_ORDER: &[FormatTag] = &[FormatTag::Aiff, FormatTag::Flac, FormatTag::Wav];

/// Format preference as sent by callers: a list, or a comma-separated string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FormatPreferenceInput {
    List(Vec<String>),
    Csv(String),
}

impl FormatPreferenceInput {
    fn entries(&self) -> Vec<&str> {
        match self {
            FormatPreferenceInput::List(items) => items.iter().map(String::as_str).collect(),
            FormatPreferenceInput::Csv(s) => s.split(',').collect(),
        }
    }
}

/// Clean a raw preference list.
///
/// Unknown entries and duplicates are dropped; `aif` counts as `aiff`. An
/// empty result falls back to [`DEFAULT_FORMAT_ORDER`].
pub fn normalize_format_order(input: Option<&FormatPreferenceInput>) -> Vec<FormatTag> {
    let mut order: Vec<FormatTag> = Vec::new();
    if let Some(input) = input {
        for tag in input.entries().into_iter().filter_map(FormatTag::parse) {
            if !order.contains(&tag) {
                order.push(tag);
            }
        }
    }
    if order.is_empty() {
        order = DEFAULT_FORMAT_ORDER.to_vec();
    }
    order
}

/// Effective preferences for a job or a preview request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPreferences {
    pub format_order: Vec<FormatTag>,
    pub allow_lossy_fallback: bool,
    /// Transfer attempts per track, across all candidates
    pub max_retries: usize,
}

impl DownloadPreferences {
    /// Build preferences, reconciling the `lossy` bucket with the fallback flag:
    /// appended when fallback is allowed and missing, removed when disallowed.
    pub fn new(mut format_order: Vec<FormatTag>, allow_lossy_fallback: bool, max_retries: usize) -> Self {
        if allow_lossy_fallback {
            if !format_order.contains(&FormatTag::Lossy) {
                format_order.push(FormatTag::Lossy);
            }
        } else {
            format_order.retain(|t| *t != FormatTag::Lossy);
        }
        Self {
            format_order,
            allow_lossy_fallback,
            max_retries: max_retries.max(1),
        }
    }

    pub fn from_input(
        input: Option<&FormatPreferenceInput>,
        allow_lossy_fallback: bool,
        max_retries: usize,
    ) -> Self {
        Self::new(normalize_format_order(input), allow_lossy_fallback, max_retries)
    }

    /// `aiff > flac > wav > lossy`
    pub fn label(&self) -> String {
        self.format_order
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_csv() {
        let input = FormatPreferenceInput::Csv(" FLAC, .aif ,mp3,flac,lossy".to_string());
        assert_eq!(
            normalize_format_order(Some(&input)),
            vec![FormatTag::Flac, FormatTag::Aiff, FormatTag::Lossy]
        );
    }

    #[test]
    fn test_normalize_empty_falls_back_to_default() {
        let input = FormatPreferenceInput::List(vec!["ogg".to_string(), "".to_string()]);
        assert_eq!(normalize_format_order(Some(&input)), DEFAULT_FORMAT_ORDER.to_vec());
        assert_eq!(normalize_format_order(None), DEFAULT_FORMAT_ORDER.to_vec());
    }

    #[test]
    fn test_lossy_reconciled_with_flag() {
        let allowed = DownloadPreferences::new(vec![FormatTag::Wav], true, 3);
        assert_eq!(allowed.format_order, vec![FormatTag::Wav, FormatTag::Lossy]);
        assert_eq!(allowed.label(), "wav > lossy");

        let denied = DownloadPreferences::new(vec![FormatTag::Lossy, FormatTag::Flac], false, 3);
        assert_eq!(denied.format_order, vec![FormatTag::Flac]);
    }

    #[test]
    fn test_max_retries_at_least_one() {
        let prefs = DownloadPreferences::new(vec![FormatTag::Flac], false, 0);
        assert_eq!(prefs.max_retries, 1);
    }

    #[test]
    fn test_deserialize_either_shape() {
        let list: FormatPreferenceInput = serde_json::from_str(r#"["wav","flac"]"#).unwrap();
        let csv: FormatPreferenceInput = serde_json::from_str(r#""wav,flac""#).unwrap();
        assert_eq!(normalize_format_order(Some(&list)), normalize_format_order(Some(&csv)));
    }
}
