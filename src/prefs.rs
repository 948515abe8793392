//! Typed persistence over a [`PreferenceStore`].
//!
//! Owns the storage keys, the JSON shapes behind them, the bounded
//! search history and a change-notification hook. Corrupt stored values
//! never fail a caller: they log a warning and fall back to defaults.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::filters::FilterState;
use crate::settings::Settings;
use crate::store::PreferenceStore;

pub const FILTERS_KEY: &str = "birdweather_filters";
pub const SETTINGS_KEY: &str = "birdweather_settings";
pub const SEARCH_HISTORY_KEY: &str = "birdweather_search_history";
pub const SIDEBAR_COLLAPSED_KEY: &str = "birdweather_sidebar_collapsed";
pub const LAYOUT_MODE_KEY: &str = "layoutMode";
pub const PAGE_SIZE_KEY: &str = "pageSize";

pub const MAX_HISTORY_ITEMS: usize = 10;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// How many recent-search suggestions a dropdown shows.
const RECENT_SUGGESTIONS: usize = 5;

// ── persisted shapes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Station,
    Species,
}

/// One remembered search selection, newest first in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHistoryItem {
    #[serde(rename = "type")]
    pub kind: SearchKind,
    pub id: String,
    pub name: String,
    /// Unix milliseconds of the selection.
    pub timestamp: i64,
}

/// Detections list presentation, persisted as a bare string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayoutMode {
    #[default]
    Timeline,
    Grouped,
}

impl LayoutMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LayoutMode::Timeline => "timeline",
            LayoutMode::Grouped => "grouped",
        }
    }

    /// Unknown values fall back to the timeline layout.
    pub fn parse(s: &str) -> Self {
        match s {
            "grouped" => LayoutMode::Grouped,
            _ => LayoutMode::Timeline,
        }
    }
}

// ── typed facade ─────────────────────────────────────────────────────────

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Typed reads and writes over an injected store, with change
/// subscriptions keyed by storage key.
pub struct Preferences<S> {
    store: S,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
}

impl<S: PreferenceStore> Preferences<S> {
    pub fn new(store: S) -> Self {
        Preferences {
            store,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Register a callback invoked with the storage key after every save.
    /// Callbacks run with no lock held, so they may call back into the
    /// preferences. Returns a handle for [`Preferences::unsubscribe`].
    pub fn subscribe(&self, listener: impl Fn(&str) + Send + Sync + 'static) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id);
    }

    fn notify(&self, key: &str) {
        // dispatch outside the lock: listeners may write back or
        // (un)subscribe from their callback
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(key);
        }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("ignoring corrupt value for {key}: {e}");
                None
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => {
                if let Err(e) = self.store.set(key, &raw) {
                    warn!("cannot persist {key}: {e}");
                }
            }
            Err(e) => warn!("cannot serialize {key}: {e}"),
        }
        self.notify(key);
    }

    // ── filters ──────────────────────────────────────────────────────────

    pub fn filters(&self) -> FilterState {
        self.get_json(FILTERS_KEY).unwrap_or_default()
    }

    pub fn save_filters(&self, filters: &FilterState) {
        self.set_json(FILTERS_KEY, filters);
    }

    pub fn clear_filters(&self) {
        if let Err(e) = self.store.remove(FILTERS_KEY) {
            warn!("cannot clear {FILTERS_KEY}: {e}");
        }
        self.notify(FILTERS_KEY);
    }

    // ── settings ─────────────────────────────────────────────────────────

    pub fn settings(&self) -> Settings {
        self.get_json(SETTINGS_KEY).unwrap_or_default()
    }

    pub fn save_settings(&self, settings: &Settings) {
        self.set_json(SETTINGS_KEY, settings);
    }

    // ── search history ───────────────────────────────────────────────────

    pub fn search_history(&self) -> Vec<SearchHistoryItem> {
        self.get_json(SEARCH_HISTORY_KEY).unwrap_or_default()
    }

    /// Remember a selection. Duplicates by (kind, id) collapse to the new
    /// entry, newest entries come first, the list is capped.
    pub fn add_search_history(&self, kind: SearchKind, id: &str, name: &str) {
        let mut history = self.search_history();
        history.retain(|item| !(item.kind == kind && item.id == id));
        history.insert(
            0,
            SearchHistoryItem {
                kind,
                id: id.to_string(),
                name: name.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            },
        );
        history.truncate(MAX_HISTORY_ITEMS);
        self.set_json(SEARCH_HISTORY_KEY, &history);
    }

    pub fn remove_search_history(&self, kind: SearchKind, id: &str) {
        let mut history = self.search_history();
        history.retain(|item| !(item.kind == kind && item.id == id));
        self.set_json(SEARCH_HISTORY_KEY, &history);
    }

    pub fn clear_search_history(&self) {
        if let Err(e) = self.store.remove(SEARCH_HISTORY_KEY) {
            warn!("cannot clear {SEARCH_HISTORY_KEY}: {e}");
        }
        self.notify(SEARCH_HISTORY_KEY);
    }

    /// Recently picked stations, excluding already-selected ids, capped
    /// for display in a dropdown.
    pub fn recent_stations(&self, exclude_ids: &[String]) -> Vec<SearchHistoryItem> {
        self.search_history()
            .into_iter()
            .filter(|item| item.kind == SearchKind::Station && !exclude_ids.contains(&item.id))
            .take(RECENT_SUGGESTIONS)
            .collect()
    }

    // ── layout / page size / sidebar ─────────────────────────────────────

    pub fn layout_mode(&self) -> LayoutMode {
        self.store
            .get(LAYOUT_MODE_KEY)
            .map(|raw| LayoutMode::parse(&raw))
            .unwrap_or_default()
    }

    pub fn save_layout_mode(&self, mode: LayoutMode) {
        if let Err(e) = self.store.set(LAYOUT_MODE_KEY, mode.as_str()) {
            warn!("cannot persist {LAYOUT_MODE_KEY}: {e}");
        }
        self.notify(LAYOUT_MODE_KEY);
    }

    pub fn page_size(&self) -> u32 {
        self.store
            .get(PAGE_SIZE_KEY)
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn save_page_size(&self, size: u32) {
        if let Err(e) = self.store.set(PAGE_SIZE_KEY, &size.to_string()) {
            warn!("cannot persist {PAGE_SIZE_KEY}: {e}");
        }
        self.notify(PAGE_SIZE_KEY);
    }

    pub fn sidebar_collapsed(&self) -> bool {
        self.get_json(SIDEBAR_COLLAPSED_KEY).unwrap_or(false)
    }

    pub fn save_sidebar_collapsed(&self, collapsed: bool) {
        self.set_json(SIDEBAR_COLLAPSED_KEY, &collapsed);
    }
}
