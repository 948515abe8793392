//! BirdWeather Explorer core – headless client for browsing, filtering and
//! exporting bird detections from the app.birdweather.com GraphQL API.
//!
//! The crate is UI-agnostic: [`DetectionsController`] drives paging, caching
//! and stale-while-revalidate refresh for a detection list, [`Preferences`]
//! persists user state through a pluggable [`PreferenceStore`], and
//! [`DownloadOrchestrator`] bundles a day's audio into a zip archive.

pub mod api;
pub mod cache;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod filters;
pub mod format;
pub mod prefs;
pub mod settings;
pub mod store;
pub mod types;

pub use api::{BirdWeatherClient, DetectionQuery, DetectionsGateway};
pub use config::ApiConfig;
pub use controller::{DetectionsController, LoadState, RequestIdentity};
pub use download::{DownloadArchive, DownloadOrchestrator, DownloadProgress};
pub use error::{Error, Result};
pub use filters::{DayGroup, FilterState, SortOrder, SpeciesGroup, TimeOfDay};
pub use prefs::{LayoutMode, Preferences, SearchHistoryItem, SearchKind};
pub use settings::{Settings, TimeFormat};
pub use store::{FileStore, MemoryStore, PreferenceStore};
pub use types::{Detection, DetectionPage, PageInfo, Soundscape, Species, Station, StationPage};
