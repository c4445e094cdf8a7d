//! # Bulk Import
//!
//! Replays a Spotify extended streaming-history export through the listen
//! ingestor.
//!
//! Records are filtered in this order:
//! 1. `reason_end` other than `"trackdone"`
//! 2. timestamp outside the configured window
//! 3. empty track or artist name
//! 4. same artist, track and album as a record accepted less than five
//!    seconds earlier in the same file
//!
//! Survivors are submitted in file order. By default the first failed
//! submission aborts the rest of the file.

use crate::error::{IngestError, Result};
use crate::ingest::{ListenIngestor, SubmitListen, SubmitOutcome};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use core_runtime::config::ImportConfig;
use core_runtime::events::{CoreEvent, EventBus, ImportEvent};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// `reason_end` of a track that played to completion
pub const COMPLETED_REASON: &str = "trackdone";

/// Records closer together than this with the same names are one play
pub const REPEAT_WINDOW_SECS: i64 = 5;

/// Emit a progress event every this many records
const PROGRESS_INTERVAL: u64 = 100;

/// One entry of a streaming-history export. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamingHistoryRecord {
    pub ts: DateTime<Utc>,
    #[serde(default)]
    pub master_metadata_track_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_artist_name: Option<String>,
    #[serde(default)]
    pub master_metadata_album_album_name: Option<String>,
    #[serde(default)]
    pub reason_end: Option<String>,
    #[serde(default)]
    pub ms_played: Option<i64>,
}

impl StreamingHistoryRecord {
    pub fn track(&self) -> &str {
        self.master_metadata_track_name.as_deref().unwrap_or_default()
    }

    pub fn artist(&self) -> &str {
        self.master_metadata_album_artist_name
            .as_deref()
            .unwrap_or_default()
    }

    pub fn album(&self) -> &str {
        self.master_metadata_album_album_name
            .as_deref()
            .unwrap_or_default()
    }

    fn repeat_key(&self) -> String {
        format!("{}|{}|{}", self.artist(), self.track(), self.album())
    }
}

/// Counts for one import run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub file: String,
    /// Records examined, whatever their outcome
    pub processed: u64,
    /// Listens newly stored
    pub submitted: u64,
    /// Submissions the catalog already had
    pub duplicates: u64,
    /// Submissions that failed (only with `continue_on_error`)
    pub failed: u64,
    pub skipped_incomplete: u64,
    pub skipped_out_of_window: u64,
    pub skipped_empty: u64,
    pub skipped_repeat: u64,
    pub duration_secs: u64,
}

impl ImportReport {
    pub fn skipped(&self) -> u64 {
        self.skipped_incomplete + self.skipped_out_of_window + self.skipped_empty + self.skipped_repeat
    }
}

enum Filtered {
    Incomplete,
    OutOfWindow,
    Empty,
    Repeat,
}

/// Streams export files through a [`ListenIngestor`].
pub struct BulkImporter {
    ingestor: Arc<ListenIngestor>,
    config: ImportConfig,
    import_dir: PathBuf,
    events: EventBus,
}

impl BulkImporter {
    pub fn new(
        ingestor: Arc<ListenIngestor>,
        config: ImportConfig,
        import_dir: impl Into<PathBuf>,
        events: EventBus,
    ) -> Self {
        Self {
            ingestor,
            config,
            import_dir: import_dir.into(),
            events,
        }
    }

    pub fn import_dir(&self) -> &Path {
        &self.import_dir
    }

    /// Import `<import_dir>/<file_name>`.
    ///
    /// # Errors
    /// - `IngestError::InvalidInput` if `file_name` is not a plain file name
    /// - `IngestError::Io` / `ImportFormat` if the file cannot be read or parsed
    /// - `IngestError::ImportAborted` when a submission fails (fail-fast)
    /// - `IngestError::Cancelled` if `cancel` fires
    pub async fn import_file(
        &self,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportReport> {
        let path = resolve_import_file(&self.import_dir, file_name)?;
        self.import_path(&path, cancel).await
    }

    /// Import an export file at an explicit path.
    #[instrument(skip(self, path, cancel), fields(path = %path.display()))]
    pub async fn import_path(&self, path: &Path, cancel: &CancellationToken) -> Result<ImportReport> {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        info!(file = %file, "Beginning import");
        let bytes = tokio::fs::read(path).await?;
        let records: Vec<StreamingHistoryRecord> = serde_json::from_slice(&bytes)?;
        self.import_records(&file, records, cancel).await
    }

    /// Import already parsed records under the label `file`.
    pub async fn import_records(
        &self,
        file: &str,
        records: Vec<StreamingHistoryRecord>,
        cancel: &CancellationToken,
    ) -> Result<ImportReport> {
        let started = Instant::now();
        let mut report = ImportReport {
            file: file.to_string(),
            ..Default::default()
        };
        let mut last_accepted: HashMap<String, DateTime<Utc>> = HashMap::new();

        self.emit(ImportEvent::Started {
            file: file.to_string(),
            total_records: records.len() as u64,
        });

        for record in records {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&report));
            }

            if let Some(filtered) = filter_record(&self.config, &record, &last_accepted) {
                match filtered {
                    Filtered::Incomplete => report.skipped_incomplete += 1,
                    Filtered::OutOfWindow => {
                        debug!(ts = %record.ts, "Skipping record outside import window");
                        report.skipped_out_of_window += 1
                    }
                    Filtered::Empty => {
                        debug!("Skipping non-track record");
                        report.skipped_empty += 1
                    }
                    Filtered::Repeat => {
                        debug!(key = %record.repeat_key(), "Skipping repeat within {}s", REPEAT_WINDOW_SECS);
                        report.skipped_repeat += 1
                    }
                }
                report.processed += 1;
                self.maybe_progress(&report);
                continue;
            }

            let key = record.repeat_key();
            let ts = record.ts;
            match self.ingestor.submit(to_listen(&self.config, record), cancel).await {
                Ok(SubmitOutcome::Recorded { .. }) => {
                    report.submitted += 1;
                    last_accepted.insert(key, ts);
                }
                Ok(SubmitOutcome::Duplicate { .. }) => {
                    report.duplicates += 1;
                    last_accepted.insert(key, ts);
                }
                Ok(SubmitOutcome::Skipped(_)) => report.skipped_empty += 1,
                Err(err) if err.is_cancelled() => return Err(self.cancelled(&report)),
                Err(err) if self.config.continue_on_error => {
                    warn!(error = %err, key = %key, "Failed to import record, continuing");
                    report.failed += 1;
                }
                Err(err) => {
                    error!(error = %err, key = %key, processed = report.processed, "Failed to import record, aborting");
                    self.emit(ImportEvent::Failed {
                        file: file.to_string(),
                        processed: report.processed,
                        message: err.to_string(),
                    });
                    return Err(IngestError::ImportAborted {
                        file: file.to_string(),
                        processed: report.processed,
                        source: Box::new(err),
                    });
                }
            }
            report.processed += 1;
            self.maybe_progress(&report);

            if let Some(delay) = self.config.throttle() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(self.cancelled(&report)),
                }
            }
        }

        report.duration_secs = started.elapsed().as_secs();
        info!(
            file = %file,
            processed = report.processed,
            submitted = report.submitted,
            skipped = report.skipped(),
            failed = report.failed,
            "Import completed"
        );
        self.emit(ImportEvent::Completed {
            file: file.to_string(),
            processed: report.processed,
            submitted: report.submitted,
            skipped: report.skipped(),
            failed: report.failed,
            duration_secs: report.duration_secs,
        });
        Ok(report)
    }

    fn maybe_progress(&self, report: &ImportReport) {
        if report.processed % PROGRESS_INTERVAL == 0 {
            self.emit(ImportEvent::Progress {
                file: report.file.clone(),
                processed: report.processed,
                submitted: report.submitted,
                skipped: report.skipped(),
            });
        }
    }

    fn cancelled(&self, report: &ImportReport) -> IngestError {
        info!(file = %report.file, processed = report.processed, "Import cancelled");
        self.emit(ImportEvent::Cancelled {
            file: report.file.clone(),
            processed: report.processed,
        });
        IngestError::Cancelled
    }

    fn emit(&self, event: ImportEvent) {
        let _ = self.events.emit(CoreEvent::Import(event));
    }
}

fn filter_record(
    config: &ImportConfig,
    record: &StreamingHistoryRecord,
    last_accepted: &HashMap<String, DateTime<Utc>>,
) -> Option<Filtered> {
    if record.reason_end.as_deref() != Some(COMPLETED_REASON) {
        return Some(Filtered::Incomplete);
    }
    if !config.in_window(record.ts) {
        return Some(Filtered::OutOfWindow);
    }
    if record.track().is_empty() || record.artist().is_empty() {
        return Some(Filtered::Empty);
    }
    match last_accepted.get(&record.repeat_key()) {
        Some(previous) if record.ts - *previous < ChronoDuration::seconds(REPEAT_WINDOW_SECS) => {
            Some(Filtered::Repeat)
        }
        _ => None,
    }
}

fn to_listen(config: &ImportConfig, record: StreamingHistoryRecord) -> SubmitListen {
    let duration_secs = record.ms_played.unwrap_or(0).max(0) / 1000;
    let mut listen = SubmitListen::new(
        record.master_metadata_album_artist_name.unwrap_or_default(),
        record.master_metadata_track_name.unwrap_or_default(),
        record.ts,
    )
    .with_duration_secs(duration_secs)
    .with_client(config.client_label.clone())
    .with_user_id(config.user_id)
    .with_skip_artwork(!config.fetch_images_during_import);
    listen.names.release = record.master_metadata_album_album_name;
    listen
}

/// Accept only a bare file name inside the import directory.
fn resolve_import_file(import_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Ok(import_dir.join(name)),
        _ => Err(IngestError::InvalidInput(format!(
            "import file must be a plain file name: {}",
            file_name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(ts: &str, reason: &str) -> StreamingHistoryRecord {
        StreamingHistoryRecord {
            ts: ts.parse().unwrap(),
            master_metadata_track_name: Some("Y".to_string()),
            master_metadata_album_artist_name: Some("X".to_string()),
            master_metadata_album_album_name: Some("Z".to_string()),
            reason_end: Some(reason.to_string()),
            ms_played: Some(180_500),
        }
    }

    #[test]
    fn test_filter_order() {
        let config = ImportConfig::new().with_window(
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
        );
        let seen = HashMap::new();

        let skipped = record("2020-06-01T12:00:00Z", "fwdbtn");
        assert!(matches!(filter_record(&config, &skipped, &seen), Some(Filtered::Incomplete)));

        // Reason is checked before the window.
        let early_skip = record("2019-06-01T12:00:00Z", "fwdbtn");
        assert!(matches!(filter_record(&config, &early_skip, &seen), Some(Filtered::Incomplete)));

        let early = record("2019-06-01T12:00:00Z", "trackdone");
        assert!(matches!(filter_record(&config, &early, &seen), Some(Filtered::OutOfWindow)));

        let at_end = record("2021-01-01T00:00:00Z", "trackdone");
        assert!(matches!(filter_record(&config, &at_end, &seen), Some(Filtered::OutOfWindow)));

        let at_start = record("2020-01-01T00:00:00Z", "trackdone");
        assert!(filter_record(&config, &at_start, &seen).is_none());

        let mut untitled = record("2020-06-01T12:00:00Z", "trackdone");
        untitled.master_metadata_track_name = None;
        assert!(matches!(filter_record(&config, &untitled, &seen), Some(Filtered::Empty)));
    }

    #[test]
    fn test_repeat_window() {
        let config = ImportConfig::new();
        let first = record("2020-06-01T12:00:00Z", "trackdone");
        let mut seen = HashMap::new();
        seen.insert(first.repeat_key(), first.ts);

        let three_later = record("2020-06-01T12:00:03Z", "trackdone");
        assert!(matches!(filter_record(&config, &three_later, &seen), Some(Filtered::Repeat)));

        let five_later = record("2020-06-01T12:00:05Z", "trackdone");
        assert!(filter_record(&config, &five_later, &seen).is_none());

        let mut other_album = record("2020-06-01T12:00:03Z", "trackdone");
        other_album.master_metadata_album_album_name = Some("Z (Deluxe)".to_string());
        assert!(filter_record(&config, &other_album, &seen).is_none());
    }

    #[test]
    fn test_to_listen_converts_fields() {
        let config = ImportConfig::new().with_fetch_images(false);
        let listen = to_listen(&config, record("2020-06-01T12:00:00Z", "trackdone"));

        assert_eq!(listen.duration_secs, 180);
        assert_eq!(listen.client.as_deref(), Some("spotify"));
        assert_eq!(listen.user_id, 1);
        assert!(listen.skip_artwork);
        assert_eq!(listen.names.release.as_deref(), Some("Z"));
    }

    #[test]
    fn test_resolve_import_file_rejects_traversal() {
        let dir = Path::new("/srv/listens/import");
        assert_eq!(
            resolve_import_file(dir, "history.json").unwrap(),
            dir.join("history.json")
        );
        for bad in ["../secret.json", "/etc/passwd", "a/b.json", "", ".", ".."] {
            assert!(
                matches!(resolve_import_file(dir, bad), Err(IngestError::InvalidInput(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_record_parses_nulls_and_unknown_fields() {
        let json = r#"[{
            "ts": "2021-03-04T05:06:07Z",
            "platform": "android",
            "ms_played": 1234,
            "master_metadata_track_name": null,
            "master_metadata_album_artist_name": null,
            "master_metadata_album_album_name": null,
            "reason_end": "endplay",
            "episode_name": "Some Podcast"
        }]"#;
        let records: Vec<StreamingHistoryRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].track(), "");
        assert_eq!(records[0].ms_played, Some(1234));
        assert_eq!(records[0].ts, Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap());
    }
}
