//! Client-side narrowing, ordering and grouping of detections.
//!
//! Everything here is pure: the same detections and the same filter state
//! always produce the same output, so the whole module is testable without
//! a network and safe to re-run on every view update.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::types::{Detection, Species, Station};

// ── filter state ─────────────────────────────────────────────────────────

/// Coarse daylight buckets over the detection's own local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    /// Bucket membership for an hour in 0..24. Night wraps midnight.
    pub fn contains_hour(self, hour: u32) -> bool {
        match self {
            TimeOfDay::Morning => (5..12).contains(&hour),
            TimeOfDay::Afternoon => (12..17).contains(&hour),
            TimeOfDay::Evening => (17..21).contains(&hour),
            TimeOfDay::Night => hour >= 21 || hour < 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    TimeDesc,
    TimeAsc,
    ConfidenceDesc,
    ConfidenceAsc,
    SpeciesAsc,
    SpeciesDesc,
}

/// The complete user-selected filter set.
///
/// Station and species selections keep parallel id/name vectors so the
/// names survive persistence without refetching the real records. Any
/// change to this struct invalidates pagination (the controller resets to
/// page 1 and a fresh cursor sequence).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterState {
    pub station_ids: Vec<String>,
    pub station_names: Vec<String>,
    pub species_ids: Vec<String>,
    pub species_names: Vec<String>,
    /// Minimum confidence in whole percent, 0..=100. Zero means no floor.
    pub min_confidence: u8,
    /// Empty means all times of day.
    pub time_of_day: Vec<TimeOfDay>,
    pub sort_order: SortOrder,
}

impl FilterState {
    /// Display-only station stubs rebuilt from the persisted id/name
    /// arrays. Never authoritative records; a missing name becomes
    /// `Station <id>`.
    pub fn selected_stations(&self) -> Vec<Station> {
        self.station_ids
            .iter()
            .enumerate()
            .map(|(i, id)| Station {
                id: id.clone(),
                name: self
                    .station_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("Station {id}")),
            })
            .collect()
    }

    /// Display-only `(id, common name)` pairs for the selected species.
    pub fn selected_species(&self) -> Vec<(String, String)> {
        self.species_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let name = self.species_names.get(i).cloned().unwrap_or_default();
                (id.clone(), name)
            })
            .collect()
    }
}

// ── filtering ────────────────────────────────────────────────────────────

/// True when the detection survives every active filter dimension.
pub fn matches_filters(detection: &Detection, filters: &FilterState) -> bool {
    if !filters.species_ids.is_empty() && !filters.species_ids.contains(&detection.species.id) {
        return false;
    }
    if detection.confidence * 100.0 < f64::from(filters.min_confidence) {
        return false;
    }
    if !filters.time_of_day.is_empty() {
        let hour = detection.timestamp.hour();
        if !filters.time_of_day.iter().any(|t| t.contains_hour(hour)) {
            return false;
        }
    }
    true
}

/// Apply the species, confidence and time-of-day predicates.
///
/// With no species selected, no buckets selected and a zero threshold the
/// result is the input unchanged.
pub fn filter_detections(detections: &[Detection], filters: &FilterState) -> Vec<Detection> {
    detections
        .iter()
        .filter(|d| matches_filters(d, filters))
        .cloned()
        .collect()
}

// ── sorting ──────────────────────────────────────────────────────────────

/// Species names compare case-insensitively, with a bytewise tiebreak so
/// the order is total.
fn species_name_cmp(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Stable in-place sort under the given order. Sorting twice gives the
/// same sequence as sorting once.
pub fn sort_detections(detections: &mut [Detection], order: SortOrder) {
    match order {
        SortOrder::TimeDesc => detections.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortOrder::TimeAsc => detections.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
        SortOrder::ConfidenceDesc => {
            detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence))
        }
        SortOrder::ConfidenceAsc => {
            detections.sort_by(|a, b| a.confidence.total_cmp(&b.confidence))
        }
        SortOrder::SpeciesAsc => detections
            .sort_by(|a, b| species_name_cmp(&a.species.common_name, &b.species.common_name)),
        SortOrder::SpeciesDesc => detections
            .sort_by(|a, b| species_name_cmp(&b.species.common_name, &a.species.common_name)),
    }
}

// ── grouping ─────────────────────────────────────────────────────────────

/// Detections of one species, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeciesGroup {
    pub species: Species,
    pub detections: Vec<Detection>,
}

/// Group by species id, one group per distinct species, groups ordered by
/// common name ascending regardless of the active sort order.
pub fn group_by_species(detections: &[Detection]) -> Vec<SpeciesGroup> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<SpeciesGroup> = Vec::new();
    for d in detections {
        let slot = *index.entry(d.species.id.clone()).or_insert_with(|| {
            groups.push(SpeciesGroup {
                species: d.species.clone(),
                detections: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].detections.push(d.clone());
    }
    groups.sort_by(|a, b| species_name_cmp(&a.species.common_name, &b.species.common_name));
    groups
}

/// Detections of one calendar day (the detection's own timezone).
#[derive(Debug, Clone, PartialEq)]
pub struct DayGroup {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub detections: Vec<Detection>,
}

/// Group by calendar day, newest day first. Used by the species-detail
/// view where a single species spans many days.
pub fn group_by_day(detections: &[Detection]) -> Vec<DayGroup> {
    let mut by_day: BTreeMap<String, Vec<Detection>> = BTreeMap::new();
    for d in detections {
        by_day.entry(d.day_key()).or_default().push(d.clone());
    }
    by_day
        .into_iter()
        .rev()
        .map(|(date, detections)| DayGroup { date, detections })
        .collect()
}

/// Distinct species of the input in first-seen order. Feeds the species
/// filter dropdown for the current page.
pub fn unique_species(detections: &[Detection]) -> Vec<Species> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for d in detections {
        if seen.insert(d.species.id.clone()) {
            out.push(d.species.clone());
        }
    }
    out
}
