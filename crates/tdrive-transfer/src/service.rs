//! Single-owner driver: one tokio task owns the store and interleaves user
//! actions, backend progress events and the refresh tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use tdrive_core::config::TransferConfig;
use tdrive_core::{TdriveError, TdriveResult};

use crate::bridge::Renderer;
use crate::event::ProgressEvent;
use crate::reconcile::MergeOutcome;
use crate::refresh;
use crate::store::{DownloadRequest, TransferTaskStore, UploadRequest};

/// Everything that can change the store, in arrival order.
#[derive(Debug, Clone)]
pub enum TransferInput {
    AddDownload(DownloadRequest),
    AddUpload(UploadRequest),
    Progress(ProgressEvent),
    Cancel(String),
    Pause(String),
    Resume(String),
    ClearTerminal,
    Shutdown,
}

/// Cloneable sender side of a running [`TransferService`].
#[derive(Debug, Clone)]
pub struct TransferHandle {
    tx: mpsc::Sender<TransferInput>,
}

impl TransferHandle {
    pub async fn send(&self, input: TransferInput) -> TdriveResult<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| TdriveError::Bridge("transfer service stopped".into()))
    }

    pub async fn add_download(&self, req: DownloadRequest) -> TdriveResult<()> {
        self.send(TransferInput::AddDownload(req)).await
    }

    pub async fn add_upload(&self, req: UploadRequest) -> TdriveResult<()> {
        self.send(TransferInput::AddUpload(req)).await
    }

    pub async fn progress(&self, event: ProgressEvent) -> TdriveResult<()> {
        self.send(TransferInput::Progress(event)).await
    }

    pub async fn cancel(&self, id: impl Into<String>) -> TdriveResult<()> {
        self.send(TransferInput::Cancel(id.into())).await
    }

    pub async fn pause(&self, id: impl Into<String>) -> TdriveResult<()> {
        self.send(TransferInput::Pause(id.into())).await
    }

    pub async fn resume(&self, id: impl Into<String>) -> TdriveResult<()> {
        self.send(TransferInput::Resume(id.into())).await
    }

    pub async fn clear_terminal(&self) -> TdriveResult<()> {
        self.send(TransferInput::ClearTerminal).await
    }

    pub async fn shutdown(&self) -> TdriveResult<()> {
        self.send(TransferInput::Shutdown).await
    }
}

pub struct TransferService {
    store: TransferTaskStore,
    renderer: Arc<dyn Renderer>,
    rx: mpsc::Receiver<TransferInput>,
    refresh_every: Duration,
}

impl TransferService {
    pub fn new(
        store: TransferTaskStore,
        renderer: Arc<dyn Renderer>,
        config: &TransferConfig,
    ) -> (Self, TransferHandle) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let service = TransferService {
            store,
            renderer,
            rx,
            refresh_every: Duration::from_millis(config.refresh_interval_ms.max(1)),
        };
        (service, TransferHandle { tx })
    }

    pub fn store(&self) -> &TransferTaskStore {
        &self.store
    }

    /// Run until [`TransferInput::Shutdown`] arrives or every handle is dropped.
    /// Returns the store so callers can inspect the final state.
    pub async fn run(mut self) -> TransferTaskStore {
        let mut ticker = tokio::time::interval(self.refresh_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.refresh_every.as_millis() as u64, "transfer service started");

        loop {
            tokio::select! {
                input = self.rx.recv() => {
                    match input {
                        None | Some(TransferInput::Shutdown) => break,
                        Some(input) => {
                            self.handle(input);
                            self.renderer.render(&self.store);
                        }
                    }
                }
                _ = ticker.tick(), if self.store.refresh_armed() => {
                    refresh::tick(&mut self.store, self.renderer.as_ref());
                }
            }
        }

        // one last pass so completions that landed after the final tick still get feedback
        refresh::tick(&mut self.store, self.renderer.as_ref());
        info!("transfer service stopped");
        self.store
    }

    fn handle(&mut self, input: TransferInput) {
        match input {
            TransferInput::AddDownload(req) => {
                self.store.add_download(req);
            }
            TransferInput::AddUpload(req) => {
                self.store.add_upload(req);
            }
            TransferInput::Progress(event) => {
                if self.store.merge(event) == MergeOutcome::Dropped {
                    debug!("progress event dropped");
                }
            }
            TransferInput::Cancel(id) => {
                self.store.cancel(&id);
            }
            TransferInput::Pause(id) => {
                self.store.pause(&id);
            }
            TransferInput::Resume(id) => {
                self.store.resume(&id);
            }
            TransferInput::ClearTerminal => {
                self.store.clear_terminal();
            }
            TransferInput::Shutdown => {}
        }
    }
}
