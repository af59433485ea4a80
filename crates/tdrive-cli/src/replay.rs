//! `tdrive replay`: restore a backend snapshot, then feed a recorded JSONL
//! session (progress events and user actions) through the transfer service.
//!
//! Each line is either a bare bridge progress event or an action tagged with
//! `op`:
//!
//! ```text
//! {"op":"add_upload","id":"u1","name":"a.txt","local_path":"/tmp/a.txt","size":100}
//! {"direction":"upload","id":"u1","delta":40,"status":"uploading"}
//! {"op":"pause","id":"u1"}
//! {"op":"sleep","ms":250}
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use tdrive_core::config::TdriveConfig;
use tdrive_core::{TdriveResult, TransferKind};
use tdrive_transfer::{
    DownloadRequest, IncompleteTransfers, ProgressEvent, RawProgressEvent, RestorationImporter,
    TransferBackend, TransferInput, TransferService, TransferTaskStore, UploadRequest,
};

use crate::render::{self, BarRenderer, ConsoleErrors};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayLine {
    Progress(RawProgressEvent),
    AddUpload(UploadRequest),
    AddDownload(DownloadRequest),
    Cancel { id: String },
    Pause { id: String },
    Resume { id: String },
    Clear,
    Sleep { ms: u64 },
}

impl ReplayLine {
    fn parse(line: &str) -> TdriveResult<Self> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if value.get("op").is_some() {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(ReplayLine::Progress(serde_json::from_value(value)?))
        }
    }

    fn into_input(self) -> TdriveResult<Option<TransferInput>> {
        Ok(Some(match self {
            ReplayLine::Progress(raw) => TransferInput::Progress(ProgressEvent::try_from(raw)?),
            ReplayLine::AddUpload(req) => TransferInput::AddUpload(req),
            ReplayLine::AddDownload(req) => TransferInput::AddDownload(req),
            ReplayLine::Cancel { id } => TransferInput::Cancel(id),
            ReplayLine::Pause { id } => TransferInput::Pause(id),
            ReplayLine::Resume { id } => TransferInput::Resume(id),
            ReplayLine::Clear => TransferInput::ClearTerminal,
            ReplayLine::Sleep { .. } => return Ok(None),
        }))
    }
}

/// Backend for recorded sessions: commands are logged, outcomes come from the
/// recording itself.
struct ReplayBackend {
    snapshot: IncompleteTransfers,
}

impl TransferBackend for ReplayBackend {
    fn cancel_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        info!(kind = %kind, task_id = %id, "replay: cancel");
        Ok(())
    }

    fn pause_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        info!(kind = %kind, task_id = %id, "replay: pause");
        Ok(())
    }

    fn resume_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        info!(kind = %kind, task_id = %id, "replay: resume");
        Ok(())
    }

    fn incomplete_transfers(&self) -> TdriveResult<IncompleteTransfers> {
        Ok(self.snapshot.clone())
    }
}

pub struct ReplayOptions {
    pub snapshot: Option<PathBuf>,
    pub events: PathBuf,
    /// Delay between lines, for watching the bars move
    pub pace: Duration,
    pub show_progress: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub restored: usize,
    pub applied: usize,
    pub skipped: usize,
}

async fn load_snapshot(path: Option<&Path>) -> Result<IncompleteTransfers> {
    let Some(path) = path else {
        return Ok(IncompleteTransfers::default());
    };
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading snapshot: {}", path.display()))?;
    IncompleteTransfers::from_json(&json)
        .with_context(|| format!("parsing snapshot: {}", path.display()))
}

pub async fn run(
    config: &TdriveConfig,
    opts: &ReplayOptions,
) -> Result<(TransferTaskStore, ReplayStats)> {
    let snapshot = load_snapshot(opts.snapshot.as_deref()).await?;
    let multi = render::multi_progress(opts.show_progress);

    let backend = Arc::new(ReplayBackend { snapshot });
    let errors = Arc::new(ConsoleErrors::new(multi.clone()));
    let mut store = TransferTaskStore::new(backend, errors);

    let restored = RestorationImporter::new(config.transfer.chunk_size)
        .import_from_backend(&mut store)
        .context("restoring snapshot")?
        .imported;
    let mut stats = ReplayStats {
        restored,
        ..Default::default()
    };

    let renderer = Arc::new(BarRenderer::new(multi));
    let (service, handle) = TransferService::new(store, renderer.clone(), &config.transfer);
    let driver = tokio::spawn(service.run());

    let file = tokio::fs::File::open(&opts.events)
        .await
        .with_context(|| format!("opening events: {}", opts.events.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await.context("reading events")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parsed = ReplayLine::parse(line);
        if let Ok(ReplayLine::Sleep { ms }) = parsed {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            continue;
        }
        match parsed.and_then(ReplayLine::into_input) {
            Ok(Some(input)) => {
                handle
                    .send(input)
                    .await
                    .context("transfer service stopped early")?;
                stats.applied += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(line = line_no, "skipping line: {e}");
                stats.skipped += 1;
            }
        }

        if !opts.pace.is_zero() {
            tokio::time::sleep(opts.pace).await;
        }
    }

    handle.shutdown().await.context("stopping transfer service")?;
    let store = driver.await.context("transfer service task failed")?;
    renderer.finish();

    info!(
        restored = stats.restored,
        applied = stats.applied,
        skipped = stats.skipped,
        "replay finished"
    );
    Ok((store, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tdrive_transfer::TaskStatus;

    #[test]
    fn bare_event_line_is_progress() {
        let line = ReplayLine::parse(r#"{"direction":"upload","id":"u1","delta":4}"#).unwrap();
        assert!(matches!(line, ReplayLine::Progress(_)));
    }

    #[test]
    fn tagged_lines_parse_to_actions() {
        assert!(matches!(
            ReplayLine::parse(r#"{"op":"pause","id":"u1"}"#).unwrap(),
            ReplayLine::Pause { id } if id == "u1"
        ));
        assert!(matches!(
            ReplayLine::parse(r#"{"op":"clear"}"#).unwrap(),
            ReplayLine::Clear
        ));
        let add = ReplayLine::parse(
            r#"{"op":"add_download","id":"d1","item_id":"m1","name":"x.bin","size":10}"#,
        )
        .unwrap();
        match add {
            ReplayLine::AddDownload(req) => {
                assert_eq!(req.item_id, "m1");
                assert_eq!(req.size, 10);
            }
            other => panic!("expected AddDownload, got: {other:?}"),
        }
    }

    #[test]
    fn invalid_progress_is_rejected_at_conversion() {
        let line =
            ReplayLine::parse(r#"{"direction":"upload","id":"u1","delta":1,"transferred":2}"#)
                .unwrap();
        assert!(line.into_input().is_err());
    }

    #[tokio::test]
    async fn replays_snapshot_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("snapshot.json");
        std::fs::write(
            &snapshot,
            r#"{"downloads":{"old":{"total_size":100,"transferred_chunks":[0],"status":"downloading"}}}"#,
        )
        .unwrap();

        let events = dir.path().join("events.jsonl");
        let mut f = std::fs::File::create(&events).unwrap();
        writeln!(f, "# session").unwrap();
        writeln!(
            f,
            r#"{{"op":"add_upload","id":"u1","name":"a.txt","local_path":"/tmp/a.txt","size":100}}"#
        )
        .unwrap();
        writeln!(f, r#"{{"direction":"upload","id":"u1","delta":40,"status":"uploading"}}"#).unwrap();
        writeln!(f, "not json").unwrap();
        writeln!(f, r#"{{"direction":"upload","id":"u1","delta":70,"status":"success"}}"#).unwrap();
        writeln!(f, r#"{{"op":"resume","id":"old"}}"#).unwrap();
        drop(f);

        let mut config = TdriveConfig::default();
        config.transfer.chunk_size = 32;
        let opts = ReplayOptions {
            snapshot: Some(snapshot),
            events,
            pace: Duration::ZERO,
            show_progress: false,
        };

        let (store, stats) = run(&config, &opts).await.unwrap();
        assert_eq!(
            stats,
            ReplayStats {
                restored: 1,
                applied: 4,
                skipped: 1
            }
        );

        let u1 = store.task(TransferKind::Upload, "u1").unwrap();
        assert_eq!(u1.status, TaskStatus::Completed);
        assert_eq!(u1.progress, 100);

        let old = store.task(TransferKind::Download, "old").unwrap();
        assert_eq!(old.progress, 32);
        assert_eq!(old.status, TaskStatus::Queued);
    }
}
