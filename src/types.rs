//! Entities returned by the detections API.
//!
//! All structs mirror the GraphQL response shapes (camelCase on the wire)
//! and are immutable once deserialized.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A bird species as reported alongside each detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Species {
    pub id: String,
    pub common_name: String,
    pub scientific_name: String,
    /// Accent color assigned by the service, as a CSS hex string.
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Only requested by the species-detail query.
    #[serde(default)]
    pub wikipedia_summary: Option<String>,
}

/// A recording station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
}

/// Audio recording attached to a detection.
///
/// `id == None` means the service kept no playable audio for this
/// detection: a normal state, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Soundscape {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub download_filename: Option<String>,
    /// Length of the full soundscape in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Offset of the detection window within the soundscape, seconds.
    #[serde(default)]
    pub start_time: Option<f64>,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// A single species detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: String,
    /// Station-local timestamp with its UTC offset preserved.
    pub timestamp: DateTime<FixedOffset>,
    /// Model confidence in 0..=1.
    pub confidence: f64,
    #[serde(default)]
    pub probability: Option<f64>,
    pub species: Species,
    pub station: Station,
    #[serde(default)]
    pub soundscape: Option<Soundscape>,
}

impl Detection {
    /// Confidence as integer percentage (0..100).
    pub fn confidence_pct(&self) -> u32 {
        (self.confidence * 100.0).round() as u32
    }

    /// True when the detection carries downloadable audio.
    pub fn has_audio(&self) -> bool {
        self.soundscape
            .as_ref()
            .is_some_and(|s| s.id.is_some())
    }

    /// Calendar day of the detection in its own timezone, `YYYY-MM-DD`.
    pub fn day_key(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for Detection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Detection({}, {}, {:.4}, {})",
            self.species.common_name,
            self.station.name,
            self.confidence,
            self.timestamp.to_rfc3339(),
        )
    }
}

/// Cursor-pagination metadata attached to every connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    #[serde(default)]
    pub start_cursor: Option<String>,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

/// One page of a detections connection.
///
/// `total_count` covers the whole query window, not just this page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionPage {
    pub nodes: Vec<Detection>,
    pub total_count: u64,
    pub page_info: PageInfo,
}

/// One page of a stations connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationPage {
    pub nodes: Vec<Station>,
    pub total_count: u64,
    pub page_info: PageInfo,
}
