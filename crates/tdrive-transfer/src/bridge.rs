//! Collaborator seams: the native transfer bridge, the error popup, and the renderer.
//!
//! None of these are owned by the tracker. Commands to the bridge are
//! fire-and-forget: their outcome arrives later as another progress event, or
//! not at all.

use tdrive_core::{TdriveResult, TransferKind};
use tracing::info;

use crate::restore::IncompleteTransfers;
use crate::store::TransferTaskStore;
use crate::task::Task;

/// Commands the tracker issues to the native bridge.
pub trait TransferBackend: Send + Sync {
    fn cancel_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()>;
    fn pause_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()>;
    fn resume_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()>;
    /// Snapshot of tasks that were in flight before this session started.
    fn incomplete_transfers(&self) -> TdriveResult<IncompleteTransfers>;
}

/// Payload handed to the error popup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: TransferKind,
    pub task_id: String,
    pub task_name: String,
    pub error_code: Option<String>,
    pub message: String,
}

/// Shows a one-shot error modal. Called at most once per task failure.
pub trait ErrorSurface: Send + Sync {
    fn show_error(&self, report: &ErrorReport);
}

/// Redraws lists and summary bars from the current store.
///
/// Receives a shared borrow only: rendering cannot mutate the store, which rules
/// out a merge re-entering itself through a redraw.
pub trait Renderer: Send + Sync {
    fn render(&self, store: &TransferTaskStore);

    /// Fired once per top-level task after it turns terminal.
    fn transfer_finished(&self, _kind: TransferKind, _task: &Task) {}
}

/// Backend that accepts every command without a native bridge behind it.
///
/// Used for replaying recorded sessions, where outcomes are already part of the
/// recorded event stream.
#[derive(Debug, Default, Clone)]
pub struct DetachedBackend;

impl TransferBackend for DetachedBackend {
    fn cancel_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        info!(kind = %kind, task_id = %id, "cancel requested (detached)");
        Ok(())
    }

    fn pause_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        info!(kind = %kind, task_id = %id, "pause requested (detached)");
        Ok(())
    }

    fn resume_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        info!(kind = %kind, task_id = %id, "resume requested (detached)");
        Ok(())
    }

    fn incomplete_transfers(&self) -> TdriveResult<IncompleteTransfers> {
        Ok(IncompleteTransfers::default())
    }
}
