//! Bulk audio export: fetch one day's detections and bundle their
//! soundscapes into a zip archive, one folder per species.
//!
//! Assets are fetched strictly one at a time so the media host never sees
//! a burst, and cancellation only ever has to skip the next fetch. A
//! failed asset is logged and skipped; it never sinks the batch.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::api::{DetectionQuery, DetectionsGateway};
use crate::error::{Error, Result};
use crate::filters::FilterState;
use crate::settings::resolve_audio_url;
use crate::types::Detection;

/// Single-request ceiling for the unpaginated export fetch.
pub const DOWNLOAD_FETCH_LIMIT: u32 = 10_000;

/// Attempted items out of the downloadable total. Skipped failures still
/// count as attempted, so `completed == total` marks the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub completed: usize,
    pub total: usize,
}

/// A finished archive, ready for the consumer to write wherever it wants.
#[derive(Debug, Clone)]
pub struct DownloadArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct DownloadOrchestrator<G> {
    gateway: G,
    normalize_audio: bool,
}

impl<G: DetectionsGateway> DownloadOrchestrator<G> {
    pub fn new(gateway: G, normalize_audio: bool) -> Self {
        DownloadOrchestrator {
            gateway,
            normalize_audio,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Export every downloadable detection of `date` under the station
    /// scope in `filters`.
    ///
    /// Returns `Ok(None)` when there is nothing to do (`total_count` is
    /// zero) or the token was cancelled before the archive was sealed; a
    /// cancelled run never produces an archive. Each run needs its own
    /// token so a fresh run always starts uncancelled.
    pub async fn download_all(
        &self,
        date: NaiveDate,
        filters: &FilterState,
        total_count: u64,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(DownloadProgress),
    ) -> Result<Option<DownloadArchive>> {
        if filters.station_ids.is_empty() {
            return Err(Error::NoStationSelected);
        }
        if total_count == 0 {
            return Ok(None);
        }

        // One unpaginated fetch; a failure here aborts the whole export.
        let query = DetectionQuery::day(
            date,
            DOWNLOAD_FETCH_LIMIT,
            None,
            filters.station_ids.clone(),
        );
        let page = self.gateway.detections(&query).await?;

        let folders = partition_by_species(&page.nodes);
        let total = page.nodes.iter().filter(|d| d.has_audio()).count();
        let mut completed = 0usize;
        on_progress(DownloadProgress { completed, total });

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        let mut cancelled = false;

        'species: for (folder, detections) in &folders {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            for detection in detections {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'species;
                }
                let Some(soundscape) = detection.soundscape.as_ref().filter(|s| s.id.is_some())
                else {
                    continue;
                };

                let url = resolve_audio_url(&soundscape.url, self.normalize_audio);
                match self.gateway.fetch_audio(&url).await {
                    Ok(bytes) => {
                        let name = audio_file_name(detection);
                        writer.start_file(format!("{folder}/{name}"), options)?;
                        writer.write_all(&bytes)?;
                    }
                    Err(e) => {
                        warn!("skipping {}: {e}", detection.id);
                    }
                }
                completed += 1;
                on_progress(DownloadProgress { completed, total });
            }
        }

        if cancelled {
            info!("download cancelled after {completed}/{total} files");
            return Ok(None);
        }

        let archive = writer.finish()?;
        let file_name = archive_name(date, filters);
        info!("bundled {completed}/{total} files into {file_name}");
        Ok(Some(DownloadArchive {
            file_name,
            bytes: archive.into_inner(),
        }))
    }
}

/// Species common name to detections, keyed by a filesystem-safe folder
/// name. Fetch order survives within each folder.
fn partition_by_species(detections: &[Detection]) -> BTreeMap<String, Vec<Detection>> {
    let mut folders: BTreeMap<String, Vec<Detection>> = BTreeMap::new();
    for d in detections {
        folders
            .entry(folder_name(&d.species.common_name))
            .or_default()
            .push(d.clone());
    }
    folders
}

/// Non-alphanumeric characters become underscores.
fn folder_name(species_name: &str) -> String {
    species_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// The service-provided download filename, or a timestamp/confidence
/// fallback like `2024-05-01_06-12-34_87pct.mp3`.
fn audio_file_name(detection: &Detection) -> String {
    if let Some(name) = detection
        .soundscape
        .as_ref()
        .and_then(|s| s.download_filename.as_deref())
    {
        if !name.is_empty() {
            return name.to_string();
        }
    }
    format!(
        "{}_{}pct.mp3",
        detection.timestamp.format("%Y-%m-%d_%H-%M-%S"),
        detection.confidence_pct(),
    )
}

fn archive_name(date: NaiveDate, filters: &FilterState) -> String {
    let suffix = if filters.station_ids.is_empty() {
        ""
    } else {
        "_filtered"
    };
    format!("birdweather_{}{suffix}.zip", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectionPage, PageInfo, Soundscape, Species, Station, StationPage};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::cell::RefCell;
    use std::io::Read;
    use std::sync::Mutex;

    struct MockGateway {
        page: DetectionPage,
        fail_fragment: Option<String>,
        detection_calls: Mutex<usize>,
        audio_calls: Mutex<Vec<String>>,
    }

    impl MockGateway {
        fn new(page: DetectionPage) -> Self {
            MockGateway {
                page,
                fail_fragment: None,
                detection_calls: Mutex::new(0),
                audio_calls: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(page: DetectionPage, fragment: &str) -> Self {
            MockGateway {
                fail_fragment: Some(fragment.to_string()),
                ..Self::new(page)
            }
        }

        fn audio_calls(&self) -> Vec<String> {
            self.audio_calls.lock().unwrap().clone()
        }

        fn detection_calls(&self) -> usize {
            *self.detection_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl DetectionsGateway for MockGateway {
        async fn detections(&self, _query: &DetectionQuery) -> crate::error::Result<DetectionPage> {
            *self.detection_calls.lock().unwrap() += 1;
            Ok(self.page.clone())
        }

        async fn search_stations(
            &self,
            _query: &str,
            _first: u32,
        ) -> crate::error::Result<StationPage> {
            Ok(StationPage::default())
        }

        async fn species_detections(
            &self,
            _species_id: &str,
            _first: u32,
            _station_ids: &[String],
        ) -> crate::error::Result<DetectionPage> {
            Ok(DetectionPage::default())
        }

        async fn fetch_audio(&self, url: &str) -> crate::error::Result<Vec<u8>> {
            self.audio_calls.lock().unwrap().push(url.to_string());
            if let Some(fragment) = &self.fail_fragment {
                if url.contains(fragment.as_str()) {
                    return Err(Error::Api {
                        status: 500,
                        message: "media host down".to_string(),
                    });
                }
            }
            Ok(url.as_bytes().to_vec())
        }
    }

    fn det(
        id: &str,
        ts: &str,
        confidence: f64,
        name: &str,
        soundscape: Option<Soundscape>,
    ) -> Detection {
        Detection {
            id: id.to_string(),
            timestamp: DateTime::parse_from_rfc3339(ts).unwrap(),
            confidence,
            probability: None,
            species: Species {
                id: name.to_string(),
                common_name: name.to_string(),
                scientific_name: format!("{name} sci"),
                color: "#808080".to_string(),
                image_url: None,
                thumbnail_url: None,
                wikipedia_summary: None,
            },
            station: Station {
                id: "9".to_string(),
                name: "Backyard".to_string(),
            },
            soundscape,
        }
    }

    fn soundscape(id: &str, url: &str, download_filename: Option<&str>) -> Soundscape {
        Soundscape {
            id: Some(id.to_string()),
            url: url.to_string(),
            download_filename: download_filename.map(String::from),
            duration: Some(12.0),
            start_time: Some(3.0),
            end_time: Some(6.0),
            filesize: Some(1024),
            timestamp: None,
            mode: None,
        }
    }

    fn sample_page() -> DetectionPage {
        DetectionPage {
            nodes: vec![
                det(
                    "d1",
                    "2024-05-01T06:12:34-04:00",
                    0.92,
                    "American Robin",
                    Some(soundscape(
                        "s1",
                        "https://media.birdweather.com/soundscapes/1.mp3",
                        Some("robin_morning.mp3"),
                    )),
                ),
                // no audio: not part of the downloadable total
                det("d2", "2024-05-01T09:00:00-04:00", 0.66, "American Robin", None),
                det(
                    "d3",
                    "2024-05-01T13:30:00-04:00",
                    0.75,
                    "American Crow",
                    Some(soundscape(
                        "s3",
                        "https://media.birdweather.com/soundscapes/3.mp3",
                        None,
                    )),
                ),
            ],
            total_count: 3,
            page_info: PageInfo::default(),
        }
    }

    fn station_filter() -> FilterState {
        FilterState {
            station_ids: vec!["9".to_string()],
            ..Default::default()
        }
    }

    fn may_first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn archive_file_names(archive: &DownloadArchive) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes.clone())).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_requires_station_scope() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), true);
        let err = orch
            .download_all(
                may_first(),
                &FilterState::default(),
                3,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoStationSelected));
        assert_eq!(orch.gateway().detection_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_total_is_a_noop() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), true);
        let result = orch
            .download_all(
                may_first(),
                &station_filter(),
                0,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(orch.gateway().detection_calls(), 0);
    }

    #[tokio::test]
    async fn test_bundles_species_folders() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), false);
        let events = RefCell::new(Vec::new());

        let archive = orch
            .download_all(
                may_first(),
                &station_filter(),
                3,
                &CancellationToken::new(),
                |p| events.borrow_mut().push(p),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(archive.file_name, "birdweather_2024-05-01_filtered.zip");
        assert_eq!(
            archive_file_names(&archive),
            [
                "American_Crow/2024-05-01_13-30-00_75pct.mp3",
                "American_Robin/robin_morning.mp3",
            ]
        );

        // d2 has no audio, so the batch is two items
        assert_eq!(
            events.borrow().as_slice(),
            [
                DownloadProgress { completed: 0, total: 2 },
                DownloadProgress { completed: 1, total: 2 },
                DownloadProgress { completed: 2, total: 2 },
            ]
        );

        // file contents come back byte for byte
        let mut zip = zip::ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        let mut content = String::new();
        zip.by_name("American_Robin/robin_morning.mp3")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "https://media.birdweather.com/soundscapes/1.mp3");
    }

    #[tokio::test]
    async fn test_normalization_rewrites_fetch_urls() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), true);
        orch.download_all(
            may_first(),
            &station_filter(),
            3,
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

        let calls = orch.gateway().audio_calls();
        assert!(calls
            .iter()
            .all(|u| u.starts_with("https://app.birdweather.com/soundscapes/normalize/")));
    }

    #[tokio::test]
    async fn test_failed_asset_is_skipped_but_counted() {
        let orch = DownloadOrchestrator::new(
            MockGateway::failing_on(sample_page(), "/soundscapes/1.mp3"),
            false,
        );
        let events = RefCell::new(Vec::new());

        let archive = orch
            .download_all(
                may_first(),
                &station_filter(),
                3,
                &CancellationToken::new(),
                |p| events.borrow_mut().push(p),
            )
            .await
            .unwrap()
            .unwrap();

        // the failed robin file is missing, the crow file made it
        assert_eq!(
            archive_file_names(&archive),
            ["American_Crow/2024-05-01_13-30-00_75pct.mp3"]
        );
        // progress still reached the full total
        assert_eq!(
            events.borrow().last(),
            Some(&DownloadProgress { completed: 2, total: 2 })
        );
    }

    #[tokio::test]
    async fn test_cancel_before_start_produces_nothing() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orch
            .download_all(may_first(), &station_filter(), 3, &cancel, |_| {})
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(orch.gateway().audio_calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_run_emits_no_archive() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), false);
        let cancel = CancellationToken::new();

        let result = orch
            .download_all(may_first(), &station_filter(), 3, &cancel, |p| {
                if p.completed == 1 {
                    cancel.cancel();
                }
            })
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(orch.gateway().audio_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_run_after_cancel_starts_at_zero() {
        let orch = DownloadOrchestrator::new(MockGateway::new(sample_page()), false);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let cancelled = orch
            .download_all(may_first(), &station_filter(), 3, &cancel, |_| {})
            .await
            .unwrap();
        assert!(cancelled.is_none());

        // a new run takes a new token and a zeroed progress counter
        let events = RefCell::new(Vec::new());
        let archive = orch
            .download_all(
                may_first(),
                &station_filter(),
                3,
                &CancellationToken::new(),
                |p| events.borrow_mut().push(p),
            )
            .await
            .unwrap();

        assert!(archive.is_some());
        assert_eq!(
            events.borrow().first(),
            Some(&DownloadProgress { completed: 0, total: 2 })
        );
    }

    #[test]
    fn test_folder_name_sanitization() {
        assert_eq!(folder_name("American Robin"), "American_Robin");
        assert_eq!(folder_name("Cooper's Hawk"), "Cooper_s_Hawk");
        assert_eq!(folder_name("Eurasian Collared-Dove"), "Eurasian_Collared_Dove");
    }

    #[test]
    fn test_audio_file_name_fallback() {
        let d = det(
            "d1",
            "2024-05-01T06:12:34-04:00",
            0.87,
            "American Robin",
            Some(soundscape("s1", "https://x/y.mp3", None)),
        );
        assert_eq!(audio_file_name(&d), "2024-05-01_06-12-34_87pct.mp3");

        let d = det(
            "d2",
            "2024-05-01T06:12:34-04:00",
            0.87,
            "American Robin",
            Some(soundscape("s2", "https://x/y.mp3", Some("given.mp3"))),
        );
        assert_eq!(audio_file_name(&d), "given.mp3");
    }

    #[test]
    fn test_archive_name_suffix() {
        assert_eq!(
            archive_name(may_first(), &station_filter()),
            "birdweather_2024-05-01_filtered.zip"
        );
        assert_eq!(
            archive_name(may_first(), &FilterState::default()),
            "birdweather_2024-05-01.zip"
        );
    }
}
