//! Task records and the status lattice they move through.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use tdrive_core::{ItemKind, TdriveError};

/// Arena handle for a task. Children reference each other by handle, never by
/// embedded object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "uploading", alias = "downloading")]
    Transferring,
    StartingFolder,
    Paused,
    #[serde(alias = "success")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// `completed`, `failed` and `cancelled`: nothing more is expected without a retry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Bytes are (or are about to be) moving.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Transferring | TaskStatus::StartingFolder)
    }

    /// `starting_folder` is only meaningful on first arrival; afterwards it is
    /// treated as `transferring`.
    pub fn normalized(self) -> TaskStatus {
        match self {
            TaskStatus::StartingFolder => TaskStatus::Transferring,
            other => other,
        }
    }

    /// Whether a backend event may move a task from `self` to `next`.
    ///
    /// Explicit user retry (`resume`) bypasses this check; it is the only edge
    /// back into `queued`.
    pub fn accepts(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next.normalized()) {
            (Completed, Completed) | (Failed, Failed) => true,
            (Completed | Failed | Cancelled, _) => false,
            (current, Queued) => current == Queued,
            // in-flight progress that raced a pause must not un-pause the task
            (Paused, Transferring) => false,
            _ => true,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Transferring => "transferring",
            TaskStatus::StartingFolder => "starting_folder",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TdriveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" | "pending" => Ok(TaskStatus::Queued),
            "transferring" | "uploading" | "downloading" => Ok(TaskStatus::Transferring),
            "starting_folder" => Ok(TaskStatus::StartingFolder),
            "paused" => Ok(TaskStatus::Paused),
            "completed" | "success" => Ok(TaskStatus::Completed),
            "failed" | "error" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(TdriveError::InvalidEvent(format!("unknown status: {other}"))),
        }
    }
}

/// Where a task's bytes come from, for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskSource {
    /// Download of a cloud item
    Remote { item_id: String },
    /// Upload of a local file or folder into an optional cloud parent
    Local {
        path: PathBuf,
        remote_parent: Option<String>,
    },
    #[default]
    Unknown,
}

/// One tracked upload or download. Folder tasks own children through the
/// store's arena.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    pub source: TaskSource,
    /// Total bytes expected; 0 while unknown.
    pub size: u64,
    /// Bytes transferred so far; never above `size` once `size > 0`.
    pub progress: u64,
    pub status: TaskStatus,
    /// Bytes per second, advisory, only meaningful while transferring.
    pub speed: f64,
    /// Failure reason, set only while `status == Failed`.
    pub message: Option<String>,
    pub error_code: Option<String>,
    /// One-shot guard for the completion toast fired by the refresh tick.
    pub feedback_shown: bool,
    /// One-shot guard for the failure popup; at most one per failure occurrence.
    pub alert_shown: bool,
    /// Unix millis
    pub start_time: u64,
    /// Unix millis of the first completion. Set once, never cleared.
    pub completed_at: Option<u64>,
    /// Rate-limit deadline (unix millis) reported by the backend.
    pub waiting_until: Option<u64>,
    /// Leaf descendants (folders only)
    pub total_files: u64,
    pub completed_files: u64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: BTreeMap<String, NodeId>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ItemKind, now: u64) -> Self {
        Task {
            id: id.into(),
            name: name.into(),
            kind,
            source: TaskSource::Unknown,
            size: 0,
            progress: 0,
            status: TaskStatus::Queued,
            speed: 0.0,
            message: None,
            error_code: None,
            feedback_shown: false,
            alert_shown: false,
            start_time: now,
            completed_at: None,
            waiting_until: None,
            total_files: 0,
            completed_files: 0,
            parent: None,
            children: BTreeMap::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_source(mut self, source: TaskSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind.is_folder()
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn child_ids(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.progress)
    }

    pub(crate) fn clamp_progress(&mut self) {
        if self.size > 0 && self.progress > self.size {
            self.progress = self.size;
        }
    }

    /// Records the first completion time; later calls are no-ops.
    pub(crate) fn mark_completed(&mut self, now: u64) {
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if self.size > 0 {
            self.progress = self.size;
        }
        self.speed = 0.0;
        self.waiting_until = None;
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(TaskStatus::Queued.to_string(), "queued");
        assert_eq!(TaskStatus::StartingFolder.to_string(), "starting_folder");
        assert_eq!(TaskStatus::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn status_parses_backend_aliases() {
        assert_eq!("pending".parse::<TaskStatus>().unwrap(), TaskStatus::Queued);
        assert_eq!("uploading".parse::<TaskStatus>().unwrap(), TaskStatus::Transferring);
        assert_eq!("error".parse::<TaskStatus>().unwrap(), TaskStatus::Failed);
        assert!("bogus".parse::<TaskStatus>().is_err());

        let s: TaskStatus = serde_json::from_str("\"downloading\"").unwrap();
        assert_eq!(s, TaskStatus::Transferring);
    }

    #[test]
    fn terminal_statuses_reject_new_transitions() {
        assert!(!TaskStatus::Completed.accepts(TaskStatus::Transferring));
        assert!(!TaskStatus::Completed.accepts(TaskStatus::Failed));
        assert!(!TaskStatus::Failed.accepts(TaskStatus::Transferring));
        assert!(!TaskStatus::Cancelled.accepts(TaskStatus::Transferring));
        // duplicates are accepted so the reconciler can treat them idempotently
        assert!(TaskStatus::Completed.accepts(TaskStatus::Completed));
        assert!(TaskStatus::Failed.accepts(TaskStatus::Failed));
    }

    #[test]
    fn events_never_move_back_into_queued() {
        assert!(TaskStatus::Queued.accepts(TaskStatus::Queued));
        assert!(!TaskStatus::Transferring.accepts(TaskStatus::Queued));
        assert!(!TaskStatus::Paused.accepts(TaskStatus::Queued));
    }

    #[test]
    fn paused_ignores_transferring_but_takes_terminal() {
        assert!(!TaskStatus::Paused.accepts(TaskStatus::Transferring));
        assert!(!TaskStatus::Paused.accepts(TaskStatus::StartingFolder));
        assert!(TaskStatus::Paused.accepts(TaskStatus::Completed));
        assert!(TaskStatus::Paused.accepts(TaskStatus::Failed));
    }

    #[test]
    fn mark_completed_keeps_first_timestamp() {
        let mut task = Task::new("t", "t.bin", ItemKind::File, 0).with_size(10);
        task.mark_completed(100);
        task.mark_completed(200);
        assert_eq!(task.completed_at, Some(100));
        assert_eq!(task.progress, 10);
    }
}
