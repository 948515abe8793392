//! BirdWeather GraphQL gateway.
//!
//! Stateless query layer: every call maps to one POST against the GraphQL
//! endpoint and returns typed pages. Caching, paging state and retry
//! policy all live with the callers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::format::format_api_timestamp;
use crate::types::{DetectionPage, StationPage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result-size ceiling for station-name search.
pub const STATION_SEARCH_LIMIT: u32 = 50;
/// Result-size ceiling for the species-detail fetch.
pub const SPECIES_FETCH_LIMIT: u32 = 1000;

// ── query documents ──────────────────────────────────────────────────────

const DETECTIONS_QUERY: &str = r#"
query Detections($period: InputDuration, $first: Int, $after: String, $stationIds: [ID!]) {
  detections(period: $period, first: $first, after: $after, stationIds: $stationIds) {
    nodes {
      id
      timestamp
      confidence
      probability
      species { id commonName scientificName color imageUrl thumbnailUrl }
      station { id name }
      soundscape { id url downloadFilename duration startTime endTime filesize timestamp mode }
    }
    totalCount
    pageInfo { hasNextPage hasPreviousPage startCursor endCursor }
  }
}
"#;

const STATIONS_QUERY: &str = r#"
query Stations($query: String, $first: Int) {
  stations(query: $query, first: $first) {
    nodes { id name }
    totalCount
    pageInfo { hasNextPage hasPreviousPage startCursor endCursor }
  }
}
"#;

const SPECIES_DETECTIONS_QUERY: &str = r#"
query SpeciesDetections($speciesId: ID!, $first: Int, $stationIds: [ID!]) {
  detections(speciesId: $speciesId, first: $first, stationIds: $stationIds) {
    nodes {
      id
      timestamp
      confidence
      probability
      species { id commonName scientificName color imageUrl thumbnailUrl wikipediaSummary }
      station { id name }
      soundscape { id url downloadFilename duration startTime endTime filesize timestamp mode }
    }
    totalCount
    pageInfo { hasNextPage hasPreviousPage startCursor endCursor }
  }
}
"#;

// ── query parameters ─────────────────────────────────────────────────────

/// Parameters of one detections request.
///
/// The window is half-open `[from, to)` in wall-clock time. `after` is an
/// opaque continuation cursor; `None` starts at the beginning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetectionQuery {
    pub from: NaiveDateTime,
    pub to: NaiveDateTime,
    pub first: u32,
    pub after: Option<String>,
    pub station_ids: Vec<String>,
}

impl DetectionQuery {
    /// The whole of one calendar day.
    pub fn day(date: NaiveDate, first: u32, after: Option<String>, station_ids: Vec<String>) -> Self {
        let (from, to) = day_window(date);
        DetectionQuery {
            from,
            to,
            first,
            after: after.filter(|c| !c.is_empty()),
            station_ids,
        }
    }

    /// The whole calendar month containing `date` (used for the day-count
    /// aggregate behind the date picker).
    pub fn month_of(date: NaiveDate, first: u32, station_ids: Vec<String>) -> Self {
        let (from, to) = month_window(date);
        DetectionQuery {
            from,
            to,
            first,
            after: None,
            station_ids,
        }
    }
}

fn day_window(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(NaiveTime::MIN);
    let end = date
        .checked_add_days(Days::new(1))
        .unwrap_or(date)
        .and_time(NaiveTime::MIN);
    (start, end)
}

fn month_window(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let first = date.with_day(1).unwrap_or(date);
    let next = first.checked_add_months(Months::new(1)).unwrap_or(first);
    (first.and_time(NaiveTime::MIN), next.and_time(NaiveTime::MIN))
}

fn detection_variables(query: &DetectionQuery) -> serde_json::Value {
    let mut variables = serde_json::json!({
        "period": {
            "from": format_api_timestamp(query.from),
            "to": format_api_timestamp(query.to),
        },
        "first": query.first,
        "stationIds": query.station_ids,
    });
    if let Some(after) = &query.after {
        variables["after"] = serde_json::Value::String(after.clone());
    }
    variables
}

fn species_variables(species_id: &str, first: u32, station_ids: &[String]) -> serde_json::Value {
    let mut variables = serde_json::json!({
        "speciesId": species_id,
        "first": first,
    });
    if !station_ids.is_empty() {
        variables["stationIds"] = serde_json::json!(station_ids);
    }
    variables
}

// ── gateway trait ────────────────────────────────────────────────────────

/// The remote operations the crate needs from the detections service.
///
/// One production implementation exists ([`BirdWeatherClient`]); tests
/// substitute their own.
#[async_trait]
pub trait DetectionsGateway: Send + Sync {
    /// One page of detections for a window and station scope.
    async fn detections(&self, query: &DetectionQuery) -> Result<DetectionPage>;

    /// Stations whose name contains the search text.
    async fn search_stations(&self, query: &str, first: u32) -> Result<StationPage>;

    /// Detections of a single species, unpaginated up to `first`.
    async fn species_detections(
        &self,
        species_id: &str,
        first: u32,
        station_ids: &[String],
    ) -> Result<DetectionPage>;

    /// Raw bytes of one audio asset.
    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>>;
}

// ── production client ────────────────────────────────────────────────────

/// GraphQL-over-HTTP client for app.birdweather.com.
#[derive(Debug, Clone)]
pub struct BirdWeatherClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl BirdWeatherClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(BirdWeatherClient { http, config })
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        document: &str,
        variables: serde_json::Value,
        root: &str,
    ) -> Result<T> {
        let body = serde_json::json!({
            "query": document,
            "variables": variables,
        });
        let resp = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: serde_json::Value = resp.json().await?;
        decode(envelope, root)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Unwrap a GraphQL response envelope down to the node under `root`.
fn decode<T: DeserializeOwned>(body: serde_json::Value, root: &str) -> Result<T> {
    let envelope: Envelope =
        serde_json::from_value(body).map_err(|e| Error::MalformedResponse(e.to_string()))?;

    if let Some(errors) = envelope.errors {
        if !errors.is_empty() {
            let joined = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Graphql(joined));
        }
    }

    let Some(mut data) = envelope.data else {
        return Err(Error::MalformedResponse("missing data".to_string()));
    };
    let node = data
        .get_mut(root)
        .map(serde_json::Value::take)
        .ok_or_else(|| Error::MalformedResponse(format!("missing field: {root}")))?;
    serde_json::from_value(node).map_err(|e| Error::MalformedResponse(e.to_string()))
}

#[async_trait]
impl DetectionsGateway for BirdWeatherClient {
    async fn detections(&self, query: &DetectionQuery) -> Result<DetectionPage> {
        debug!(
            from = %query.from,
            to = %query.to,
            first = query.first,
            stations = query.station_ids.len(),
            "detections query"
        );
        self.graphql(DETECTIONS_QUERY, detection_variables(query), "detections")
            .await
    }

    async fn search_stations(&self, query: &str, first: u32) -> Result<StationPage> {
        debug!(query, first, "station search");
        let variables = serde_json::json!({ "query": query, "first": first });
        self.graphql(STATIONS_QUERY, variables, "stations").await
    }

    async fn species_detections(
        &self,
        species_id: &str,
        first: u32,
        station_ids: &[String],
    ) -> Result<DetectionPage> {
        debug!(species_id, first, "species detections query");
        self.graphql(
            SPECIES_DETECTIONS_QUERY,
            species_variables(species_id, first, station_ids),
            "detections",
        )
        .await
    }

    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: format!("audio fetch: {url}"),
            });
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
