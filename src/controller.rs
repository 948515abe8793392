//! Paging state machine over the detections gateway.
//!
//! Owns the selected date, filter set, page size and page number, plus the
//! cursor sequence that cursor pagination requires. Results are cached per
//! request identity, refetches are served stale-while-revalidate, and a
//! response is only applied while its identity still matches the
//! controller's current state, so superseded fetches fall on the floor.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};

use crate::api::{DetectionQuery, DetectionsGateway, SPECIES_FETCH_LIMIT, STATION_SEARCH_LIMIT};
use crate::cache::QueryCache;
use crate::error::Result;
use crate::filters::{filter_detections, group_by_day, sort_detections, DayGroup, FilterState};
use crate::prefs::DEFAULT_PAGE_SIZE;
use crate::types::{Detection, DetectionPage, PageInfo, StationPage};

/// How long a fetched page short-circuits a refetch.
pub const PAGE_FRESH_FOR: Duration = Duration::from_secs(60);
const PAGE_KEEP_FOR: Duration = Duration::from_secs(5 * 60);

/// Day-count aggregates change slowly; cache them longer.
pub const DAY_COUNTS_FRESH_FOR: Duration = Duration::from_secs(5 * 60);
const DAY_COUNTS_KEEP_FOR: Duration = Duration::from_secs(15 * 60);

/// Result-size ceiling for the monthly day-count aggregate.
pub const MONTHLY_FETCH_LIMIT: u32 = 10_000;

/// Lifecycle of the current page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing fetched yet.
    Idle,
    /// Fetching with no usable data for the current identity.
    Loading,
    /// Fetching while stale data for the current identity stays visible.
    Refreshing,
    Ready,
    Error(String),
}

/// What uniquely identifies one page request.
///
/// Client-side filter dimensions (species, confidence, time of day) are
/// deliberately absent: they narrow the fetched page locally and never
/// change what the service is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestIdentity {
    pub date: NaiveDate,
    pub station_ids: Vec<String>,
    pub page_size: u32,
    pub page: u32,
    pub after: Option<String>,
}

pub struct DetectionsController<G> {
    gateway: G,
    date: NaiveDate,
    filters: FilterState,
    page_size: u32,
    page: u32,
    /// `cursors[0]` is always the empty start token; `cursors[n]` exists
    /// only once page `n` has been fetched and reported a next page.
    cursors: Vec<String>,
    state: LoadState,
    detections: Vec<Detection>,
    total_count: u64,
    page_info: PageInfo,
    day_counts: HashMap<String, u64>,
    page_cache: QueryCache<RequestIdentity, DetectionPage>,
    day_count_cache: QueryCache<(NaiveDate, Vec<String>), HashMap<String, u64>>,
}

impl<G: DetectionsGateway> DetectionsController<G> {
    pub fn new(gateway: G, date: NaiveDate) -> Self {
        DetectionsController {
            gateway,
            date,
            filters: FilterState::default(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
            cursors: vec![String::new()],
            state: LoadState::Idle,
            detections: Vec::new(),
            total_count: 0,
            page_info: PageInfo::default(),
            day_counts: HashMap::new(),
            page_cache: QueryCache::new(PAGE_FRESH_FOR, PAGE_KEEP_FOR),
            day_count_cache: QueryCache::new(DAY_COUNTS_FRESH_FOR, DAY_COUNTS_KEEP_FOR),
        }
    }

    // ── accessors ────────────────────────────────────────────────────────

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    /// The error message when the last fetch failed.
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            LoadState::Error(message) => Some(message),
            _ => None,
        }
    }

    /// The raw current page, before client-side filtering.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    /// The current page narrowed and ordered by the active filter state.
    pub fn visible_detections(&self) -> Vec<Detection> {
        let mut visible = filter_detections(&self.detections, &self.filters);
        sort_detections(&mut visible, self.filters.sort_order);
        visible
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn total_pages(&self) -> u64 {
        self.total_count.div_ceil(u64::from(self.page_size))
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn cursors(&self) -> &[String] {
        &self.cursors
    }

    pub fn has_next_page(&self) -> bool {
        self.page_info.has_next_page
    }

    pub fn has_previous_page(&self) -> bool {
        self.page > 1
    }

    /// Detections per day for the month around the selected date,
    /// keyed `YYYY-MM-DD`.
    pub fn day_counts(&self) -> &HashMap<String, u64> {
        &self.day_counts
    }

    // ── state changes ────────────────────────────────────────────────────

    pub fn set_date(&mut self, date: NaiveDate) {
        if date != self.date {
            self.date = date;
            self.reset_paging();
        }
    }

    /// Replace the filter set. Any change, including dimensions that only
    /// filter client-side, restarts pagination from page 1.
    pub fn set_filters(&mut self, filters: FilterState) {
        if filters != self.filters {
            self.filters = filters;
            self.reset_paging();
        }
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        let page_size = page_size.max(1);
        if page_size != self.page_size {
            self.page_size = page_size;
            self.reset_paging();
        }
    }

    /// Advance one page. No-op unless the service reported a next page
    /// and its cursor has been recorded.
    pub fn next_page(&mut self) -> bool {
        if !self.page_info.has_next_page {
            return false;
        }
        if self.cursors.len() <= self.page as usize {
            return false;
        }
        self.page += 1;
        true
    }

    pub fn previous_page(&mut self) -> bool {
        if self.page <= 1 {
            return false;
        }
        self.page -= 1;
        true
    }

    fn reset_paging(&mut self) {
        self.page = 1;
        self.cursors = vec![String::new()];
    }

    /// The identity of the request the current state calls for.
    pub fn identity(&self) -> RequestIdentity {
        let after = self
            .cursors
            .get((self.page - 1) as usize)
            .filter(|c| !c.is_empty())
            .cloned();
        RequestIdentity {
            date: self.date,
            station_ids: self.filters.station_ids.clone(),
            page_size: self.page_size,
            page: self.page,
            after,
        }
    }

    fn build_query(identity: &RequestIdentity) -> DetectionQuery {
        DetectionQuery::day(
            identity.date,
            identity.page_size,
            identity.after.clone(),
            identity.station_ids.clone(),
        )
    }

    // ── fetching ─────────────────────────────────────────────────────────

    /// Fetch the current page, honoring the freshness window.
    pub async fn refresh(&mut self) {
        let Some((identity, query)) = self.begin_fetch(false) else {
            return;
        };
        let result = self.gateway.detections(&query).await;
        self.apply_result(&identity, result);
    }

    /// Re-issue the current request regardless of cache freshness. This is
    /// the only retry path; nothing retries automatically.
    pub async fn retry(&mut self) {
        let Some((identity, query)) = self.begin_fetch(true) else {
            return;
        };
        let result = self.gateway.detections(&query).await;
        self.apply_result(&identity, result);
    }

    /// First half of a fetch: short-circuit or transition into
    /// loading/refreshing and hand back what to ask the gateway.
    ///
    /// Returns `None` when no request is needed: either no station is
    /// selected (an unscoped query is never issued) or the cache is fresh.
    pub fn begin_fetch(&mut self, force: bool) -> Option<(RequestIdentity, DetectionQuery)> {
        if self.filters.station_ids.is_empty() {
            self.detections.clear();
            self.total_count = 0;
            self.page_info = PageInfo::default();
            self.state = LoadState::Ready;
            return None;
        }

        let identity = self.identity();
        if !force {
            if let Some(page) = self.page_cache.fresh(&identity) {
                debug!(page = identity.page, "serving page from cache");
                self.apply_page(&identity, page);
                return None;
            }
        }

        match self.page_cache.cached(&identity) {
            Some(stale) => {
                // keep showing the stale page while the refetch runs
                self.show_page(stale);
                self.state = LoadState::Refreshing;
            }
            None => {
                self.detections.clear();
                self.total_count = 0;
                self.state = LoadState::Loading;
            }
        }

        let query = Self::build_query(&identity);
        Some((identity, query))
    }

    /// Second half of a fetch: apply a gateway result, unless the
    /// controller has moved to a different identity in the meantime.
    pub fn apply_result(&mut self, identity: &RequestIdentity, result: Result<DetectionPage>) {
        if *identity != self.identity() {
            debug!(page = identity.page, "discarding superseded response");
            return;
        }
        match result {
            Ok(page) => {
                self.page_cache.insert(identity.clone(), page.clone());
                self.apply_page(identity, page);
            }
            Err(e) => {
                warn!("detections fetch failed: {e}");
                self.state = LoadState::Error(e.to_string());
            }
        }
    }

    fn apply_page(&mut self, identity: &RequestIdentity, page: DetectionPage) {
        self.record_cursor(identity.page, &page.page_info);
        self.show_page(page);
        self.state = LoadState::Ready;
    }

    fn show_page(&mut self, page: DetectionPage) {
        self.detections = page.nodes;
        self.total_count = page.total_count;
        self.page_info = page.page_info;
    }

    /// Append the end cursor for the page after `page`, once.
    fn record_cursor(&mut self, page: u32, info: &PageInfo) {
        if !info.has_next_page {
            return;
        }
        if self.cursors.len() != page as usize {
            return;
        }
        let Some(end) = info.end_cursor.as_deref() else {
            return;
        };
        if end.is_empty() || self.cursors.iter().any(|c| c == end) {
            return;
        }
        self.cursors.push(end.to_string());
    }

    // ── day counts ───────────────────────────────────────────────────────

    /// Refresh the per-day detection counts for the selected month.
    ///
    /// Failures are non-fatal: the previous mapping stays in place. With
    /// no station selected the mapping is empty and nothing is fetched.
    pub async fn refresh_day_counts(&mut self) {
        if self.filters.station_ids.is_empty() {
            self.day_counts.clear();
            return;
        }

        let month = self.date.with_day(1).unwrap_or(self.date);
        let key = (month, self.filters.station_ids.clone());
        if let Some(counts) = self.day_count_cache.fresh(&key) {
            self.day_counts = counts;
            return;
        }

        let query = DetectionQuery::month_of(
            self.date,
            MONTHLY_FETCH_LIMIT,
            self.filters.station_ids.clone(),
        );
        match self.gateway.detections(&query).await {
            Ok(page) => {
                let mut counts: HashMap<String, u64> = HashMap::new();
                for d in &page.nodes {
                    *counts.entry(d.day_key()).or_insert(0) += 1;
                }
                self.day_count_cache.insert(key, counts.clone());
                self.day_counts = counts;
            }
            Err(e) => {
                warn!("day-count fetch failed, keeping previous counts: {e}");
            }
        }
    }

    // ── search & species detail ──────────────────────────────────────────

    /// Stations whose name matches `text`, capped at the standard search
    /// ceiling.
    pub async fn search_stations(&self, text: &str) -> Result<StationPage> {
        self.gateway.search_stations(text, STATION_SEARCH_LIMIT).await
    }

    /// Recent detections of one species under the current station scope,
    /// grouped newest day first.
    pub async fn species_detail(&self, species_id: &str) -> Result<Vec<DayGroup>> {
        let page = self
            .gateway
            .species_detections(species_id, SPECIES_FETCH_LIMIT, &self.filters.station_ids)
            .await?;
        Ok(group_by_day(&page.nodes))
    }
}
