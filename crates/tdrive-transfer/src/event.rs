//! Inbound progress events.
//!
//! The bridge emits a flat JSON bag of optional fields ([`RawProgressEvent`]).
//! It is normalized once, at the edge, into the closed [`ProgressEvent`] so the
//! reconciler branches over an exhaustive set of cases.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use tdrive_core::{ItemKind, TdriveError, TdriveResult, TransferKind};

use crate::task::TaskStatus;

/// Which task an event addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTarget {
    TopLevel { id: String },
    /// A child of a folder task.
    Child { parent_id: String, id: String },
}

impl EventTarget {
    pub fn id(&self) -> &str {
        match self {
            EventTarget::TopLevel { id } | EventTarget::Child { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteUpdate {
    /// Total bytes transferred so far.
    Absolute(u64),
    /// Bytes transferred since the previous event.
    Delta(u64),
}

/// One entry of a folder manifest; nested folders carry their own entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildEntry {
    pub id: String,
    pub name: Option<String>,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub children: Vec<ChildEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Queued,
    Transferring,
    /// First status of a folder transfer, carrying its children manifest.
    StartingFolder { children: Vec<ChildEntry> },
    Paused,
    Completed,
    Failed {
        error_code: Option<String>,
        message: String,
    },
    Cancelled,
}

impl StatusUpdate {
    pub fn status(&self) -> TaskStatus {
        match self {
            StatusUpdate::Queued => TaskStatus::Queued,
            StatusUpdate::Transferring => TaskStatus::Transferring,
            StatusUpdate::StartingFolder { .. } => TaskStatus::StartingFolder,
            StatusUpdate::Paused => TaskStatus::Paused,
            StatusUpdate::Completed => TaskStatus::Completed,
            StatusUpdate::Failed { .. } => TaskStatus::Failed,
            StatusUpdate::Cancelled => TaskStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub kind: TransferKind,
    pub target: EventTarget,
    /// Display name, used when the event creates a task.
    pub name: Option<String>,
    pub bytes: Option<ByteUpdate>,
    pub status: Option<StatusUpdate>,
    pub speed: Option<f64>,
    /// Declared size; may arrive late or be revised.
    pub total: Option<u64>,
    /// Backend is rate limited for this many seconds.
    pub flood_wait_secs: Option<u64>,
}

impl ProgressEvent {
    pub fn top_level(kind: TransferKind, id: impl Into<String>) -> Self {
        Self::new(kind, EventTarget::TopLevel { id: id.into() })
    }

    pub fn child(kind: TransferKind, parent_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(
            kind,
            EventTarget::Child {
                parent_id: parent_id.into(),
                id: id.into(),
            },
        )
    }

    fn new(kind: TransferKind, target: EventTarget) -> Self {
        ProgressEvent {
            kind,
            target,
            name: None,
            bytes: None,
            status: None,
            speed: None,
            total: None,
            flood_wait_secs: None,
        }
    }

    pub fn transferred(mut self, bytes: u64) -> Self {
        self.bytes = Some(ByteUpdate::Absolute(bytes));
        self
    }

    pub fn delta(mut self, bytes: u64) -> Self {
        self.bytes = Some(ByteUpdate::Delta(bytes));
        self
    }

    pub fn status(mut self, status: StatusUpdate) -> Self {
        self.status = Some(status);
        self
    }

    pub fn failed(self, message: impl Into<String>) -> Self {
        self.status(StatusUpdate::Failed {
            error_code: None,
            message: message.into(),
        })
    }

    pub fn speed(mut self, bytes_per_sec: f64) -> Self {
        self.speed = Some(bytes_per_sec);
        self
    }

    pub fn total(mut self, size: u64) -> Self {
        self.total = Some(size);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn flood_wait(mut self, secs: u64) -> Self {
        self.flood_wait_secs = Some(secs);
        self
    }
}

/// Progress event as emitted by the native bridge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProgressEvent {
    pub direction: Option<TransferKind>,
    pub id: String,
    pub parent_id: Option<String>,
    pub name: Option<String>,
    pub transferred: Option<u64>,
    pub delta: Option<u64>,
    pub status: Option<String>,
    pub speed: Option<f64>,
    pub total: Option<u64>,
    pub error_code: Option<String>,
    #[serde(alias = "message")]
    pub error_message: Option<String>,
    pub children: Vec<ChildEntry>,
    pub flood_wait: Option<u64>,
}

impl RawProgressEvent {
    pub fn from_json(line: &str) -> TdriveResult<ProgressEvent> {
        let raw: RawProgressEvent = serde_json::from_str(line)?;
        ProgressEvent::try_from(raw)
    }
}

impl TryFrom<RawProgressEvent> for ProgressEvent {
    type Error = TdriveError;

    fn try_from(raw: RawProgressEvent) -> Result<Self, Self::Error> {
        let kind = raw
            .direction
            .ok_or_else(|| TdriveError::InvalidEvent(format!("{}: missing direction", raw.id)))?;
        if raw.id.is_empty() {
            return Err(TdriveError::InvalidEvent("missing task id".into()));
        }

        let target = match raw.parent_id.filter(|p| !p.is_empty()) {
            Some(parent_id) => EventTarget::Child {
                parent_id,
                id: raw.id,
            },
            None => EventTarget::TopLevel { id: raw.id },
        };

        let bytes = match (raw.transferred, raw.delta) {
            (Some(_), Some(_)) => {
                return Err(TdriveError::InvalidEvent(format!(
                    "{}: both transferred and delta set",
                    target.id()
                )))
            }
            (Some(abs), None) => Some(ByteUpdate::Absolute(abs)),
            (None, Some(delta)) => Some(ByteUpdate::Delta(delta)),
            (None, None) => None,
        };

        let status = match raw.status.as_deref() {
            None => None,
            Some(s) => Some(match TaskStatus::from_str(s)? {
                TaskStatus::Queued => StatusUpdate::Queued,
                TaskStatus::Transferring => StatusUpdate::Transferring,
                TaskStatus::StartingFolder => StatusUpdate::StartingFolder {
                    children: raw.children,
                },
                TaskStatus::Paused => StatusUpdate::Paused,
                TaskStatus::Completed => StatusUpdate::Completed,
                TaskStatus::Failed => StatusUpdate::Failed {
                    error_code: raw.error_code,
                    message: raw
                        .error_message
                        .unwrap_or_else(|| "Transfer failed".to_string()),
                },
                TaskStatus::Cancelled => StatusUpdate::Cancelled,
            }),
        };

        Ok(ProgressEvent {
            kind,
            target,
            name: raw.name,
            bytes,
            status,
            speed: raw.speed.filter(|s| s.is_finite() && *s >= 0.0),
            total: raw.total,
            flood_wait_secs: raw.flood_wait,
        })
    }
}
