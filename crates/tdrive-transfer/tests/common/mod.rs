//! Recording collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tdrive_core::{ItemKind, TdriveResult, TransferKind};
use tdrive_transfer::{
    DownloadRequest, ErrorReport, ErrorSurface, IncompleteTransfers, Renderer, Task,
    TransferBackend, TransferTaskStore, UploadRequest,
};

#[derive(Default)]
pub struct RecordingBackend {
    pub calls: Mutex<Vec<String>>,
    pub snapshot: Mutex<IncompleteTransfers>,
}

impl RecordingBackend {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &str, kind: TransferKind, id: &str) -> TdriveResult<()> {
        self.calls.lock().unwrap().push(format!("{op}:{kind}:{id}"));
        Ok(())
    }
}

impl TransferBackend for RecordingBackend {
    fn cancel_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        self.record("cancel", kind, id)
    }

    fn pause_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        self.record("pause", kind, id)
    }

    fn resume_transfer(&self, kind: TransferKind, id: &str) -> TdriveResult<()> {
        self.record("resume", kind, id)
    }

    fn incomplete_transfers(&self) -> TdriveResult<IncompleteTransfers> {
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct RecordingErrors {
    pub reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingErrors {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl ErrorSurface for RecordingErrors {
    fn show_error(&self, report: &ErrorReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub renders: Mutex<usize>,
    pub finished: Mutex<Vec<String>>,
}

impl RecordingRenderer {
    pub fn renders(&self) -> usize {
        *self.renders.lock().unwrap()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

impl Renderer for RecordingRenderer {
    fn render(&self, _store: &TransferTaskStore) {
        *self.renders.lock().unwrap() += 1;
    }

    fn transfer_finished(&self, kind: TransferKind, task: &Task) {
        self.finished
            .lock()
            .unwrap()
            .push(format!("{kind}:{}:{}", task.id, task.status));
    }
}

pub struct Harness {
    pub store: TransferTaskStore,
    pub backend: Arc<RecordingBackend>,
    pub errors: Arc<RecordingErrors>,
}

pub fn harness() -> Harness {
    let backend = Arc::new(RecordingBackend::default());
    let errors = Arc::new(RecordingErrors::default());
    let store = TransferTaskStore::new(backend.clone(), errors.clone());
    Harness {
        store,
        backend,
        errors,
    }
}

pub fn upload(id: &str, name: &str, size: u64) -> UploadRequest {
    UploadRequest {
        id: id.into(),
        name: name.into(),
        local_path: PathBuf::from(format!("/home/user/{name}")),
        size,
        kind: ItemKind::File,
        remote_parent: None,
    }
}

pub fn download(id: &str, size: u64, kind: ItemKind) -> DownloadRequest {
    DownloadRequest {
        id: id.into(),
        item_id: format!("msg-{id}"),
        name: format!("{id}.bin"),
        size,
        kind,
    }
}
