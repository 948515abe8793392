//! Formatting helpers for display and for the detections API.

use chrono::{DateTime, FixedOffset, NaiveDateTime};

use crate::settings::TimeFormat;

/// Render a wall-clock instant the way the detections API expects its
/// period bounds: `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn format_api_timestamp(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Render a detection time for display.
pub fn format_time(ts: &DateTime<FixedOffset>, format: TimeFormat) -> String {
    match format {
        TimeFormat::Hour12 => ts.format("%-I:%M:%S %p").to_string(),
        TimeFormat::Hour24 | TimeFormat::Auto => ts.format("%H:%M:%S").to_string(),
    }
}

/// Confidence as a one-decimal percentage, e.g. `87.3%`.
pub fn format_confidence(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

/// Human-readable file size in B, KB or MB.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Seconds as `m:ss`.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
