//! Viewer settings and the audio URL policy they control.

use serde::{Deserialize, Serialize};

/// How times are rendered for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFormat {
    /// Follow the consumer's convention; rendering falls back to 24-hour.
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "24h")]
    Hour24,
}

/// Settings persisted across sessions, independent of the filter state.
///
/// Unknown fields in a stored object are ignored and missing fields take
/// their defaults, so older persisted shapes keep loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub time_format: TimeFormat,
    /// Route soundscape audio through the normalized endpoint.
    pub normalize_audio_urls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            time_format: TimeFormat::Auto,
            normalize_audio_urls: true,
        }
    }
}

impl Settings {
    /// Resolve an audio URL under the active normalization setting.
    pub fn audio_url(&self, url: &str) -> String {
        resolve_audio_url(url, self.normalize_audio_urls)
    }
}

/// Rewrite a soundscape URL to its loudness-normalized variant.
///
/// The normalized endpoint only exists on the app host, so the media host
/// is swapped in the same step. With `normalize` off the URL passes
/// through untouched.
pub fn resolve_audio_url(url: &str, normalize: bool) -> String {
    if !normalize {
        return url.to_string();
    }
    url.replace("/soundscapes/", "/soundscapes/normalize/")
        .replace("media.birdweather", "app.birdweather")
}
