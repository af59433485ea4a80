//! tdrive-transfer: client-side transfer tracker for uploads and downloads
//!
//! The native bridge executes transfers; this crate only tracks them. Progress
//! events are merged into an arena-backed task store, folder tasks derive their
//! state from their children, and a refresh loop drives the renderer while any
//! task is still in flight.

pub mod aggregate;
pub mod bridge;
pub mod event;
pub mod present;
pub mod reconcile;
pub mod refresh;
pub mod restore;
pub mod service;
pub mod store;
pub mod task;

pub use bridge::{DetachedBackend, ErrorReport, ErrorSurface, Renderer, TransferBackend};
pub use event::{ByteUpdate, ChildEntry, EventTarget, ProgressEvent, RawProgressEvent, StatusUpdate};
pub use present::{TaskView, TransferSummary};
pub use reconcile::MergeOutcome;
pub use restore::{ImportReport, IncompleteTransfers, RestorationImporter, TaskDescriptor};
pub use service::{TransferHandle, TransferInput, TransferService};
pub use store::{DownloadRequest, Location, TransferTaskStore, UploadRequest};
pub use task::{NodeId, Task, TaskSource, TaskStatus};
