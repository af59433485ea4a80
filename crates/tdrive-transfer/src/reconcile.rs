//! ProgressReconciler: applies one inbound [`ProgressEvent`] to the store and
//! keeps folder aggregates consistent.

use tracing::{debug, info};

use tdrive_core::ItemKind;

use crate::aggregate;
use crate::bridge::ErrorReport;
use crate::event::{ByteUpdate, ChildEntry, EventTarget, ProgressEvent, StatusUpdate};
use crate::store::TransferTaskStore;
use crate::task::{unix_millis, NodeId, Task, TaskStatus};

/// What a merge did with its event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Applied to an existing task.
    Applied,
    /// The event introduced the task (undeclared folder transfer or child).
    Created,
    /// The event referenced something the store does not know; nothing changed.
    Dropped,
}

impl TransferTaskStore {
    pub fn merge(&mut self, event: ProgressEvent) -> MergeOutcome {
        self.merge_at(event, unix_millis())
    }

    /// [`merge`](Self::merge) with an explicit clock, in unix millis.
    pub fn merge_at(&mut self, event: ProgressEvent, now: u64) -> MergeOutcome {
        let Some((node, created)) = self.resolve_target(&event, now) else {
            return MergeOutcome::Dropped;
        };

        let kind = event.kind;
        let (report, manifest) = self.apply(node, event, now);

        if let Some(entries) = manifest {
            self.materialize(node, &entries, now);
            aggregate::refresh_subtree(self, node, now);
        }
        aggregate::refresh_from(self, node, now);

        if let Some(report) = report {
            debug!(kind = %kind, task_id = %report.task_id, "surfacing transfer error");
            self.errors.show_error(&report);
        }

        self.arm_refresh();
        if created {
            MergeOutcome::Created
        } else {
            MergeOutcome::Applied
        }
    }

    /// Find (or, where allowed, create) the task an event addresses.
    fn resolve_target(&mut self, event: &ProgressEvent, now: u64) -> Option<(NodeId, bool)> {
        let starting_folder = matches!(event.status, Some(StatusUpdate::StartingFolder { .. }));
        let initial_size = event.total.unwrap_or(0);

        match &event.target {
            EventTarget::TopLevel { id } => {
                if let Some(loc) = self.find_in(event.kind, id) {
                    return Some((loc.node, false));
                }
                if !starting_folder {
                    debug!(kind = %event.kind, task_id = %id, "event for unknown task dropped");
                    return None;
                }
                // folder uploads can start before the UI registered them
                let name = event.name.clone().unwrap_or_else(|| id.clone());
                let task = Task::new(id.clone(), name, ItemKind::Folder, now).with_size(initial_size);
                let node = self.insert_root(event.kind, task)?;
                info!(kind = %event.kind, task_id = %id, "folder transfer discovered");
                Some((node, true))
            }
            EventTarget::Child { parent_id, id } => {
                let Some(parent) = self.find_in(event.kind, parent_id) else {
                    debug!(kind = %event.kind, parent_id = %parent_id, task_id = %id, "event for unknown parent dropped");
                    return None;
                };
                if !self.get(parent.node).map(Task::is_folder).unwrap_or(false) {
                    debug!(parent_id = %parent_id, task_id = %id, "child event for a file task dropped");
                    return None;
                }
                if let Some(node) = self.child(parent.node, id) {
                    return Some((node, false));
                }
                let kind = if starting_folder {
                    ItemKind::Folder
                } else {
                    ItemKind::File
                };
                let name = event.name.clone().unwrap_or_else(|| id.clone());
                let task = Task::new(id.clone(), name, kind, now).with_size(initial_size);
                let node = self.insert_child(parent.node, task)?;
                debug!(parent_id = %parent_id, task_id = %id, "child task synthesized");
                Some((node, true))
            }
        }
    }

    /// Apply the event's fields to one task. Returns an error report to surface
    /// and, on a folder start, the manifest to materialize.
    fn apply(
        &mut self,
        node: NodeId,
        event: ProgressEvent,
        now: u64,
    ) -> (Option<ErrorReport>, Option<Vec<ChildEntry>>) {
        let kind = event.kind;
        let Some(task) = self.get_mut(node) else {
            return (None, None);
        };

        // sizes are only ever revised upward
        if let Some(total) = event.total {
            task.size = task.size.max(total);
        }

        if !task.status.is_terminal() {
            match event.bytes {
                Some(ByteUpdate::Absolute(value)) => {
                    if task.status == TaskStatus::Queued || value >= task.progress {
                        task.progress = value;
                    } else {
                        debug!(task_id = %task.id, current = task.progress, value, "stale absolute progress ignored");
                    }
                    task.waiting_until = None;
                }
                Some(ByteUpdate::Delta(delta)) => {
                    task.progress = task.progress.saturating_add(delta);
                    task.waiting_until = None;
                }
                None => {}
            }
        }
        task.clamp_progress();

        if let Some(speed) = event.speed {
            task.speed = speed;
        }
        if let Some(secs) = event.flood_wait_secs {
            task.waiting_until = (secs > 0).then(|| now + secs * 1000);
        }

        let mut report = None;
        let mut manifest = None;
        if let Some(update) = event.status {
            let next = update.status();
            if !task.status.accepts(next) {
                debug!(task_id = %task.id, from = %task.status, to = %next, "status transition ignored");
                // a paused folder still learns its children
                if let StatusUpdate::StartingFolder { children } = update {
                    if !task.status.is_terminal() {
                        task.kind = ItemKind::Folder;
                        manifest = Some(children);
                    }
                }
            } else {
                match update {
                    StatusUpdate::StartingFolder { children } => {
                        task.kind = ItemKind::Folder;
                        task.status = TaskStatus::Transferring;
                        manifest = Some(children);
                    }
                    StatusUpdate::Completed => {
                        if task.status != TaskStatus::Completed {
                            info!(kind = %kind, task_id = %task.id, "transfer completed");
                        }
                        task.status = TaskStatus::Completed;
                        task.mark_completed(now);
                    }
                    StatusUpdate::Failed {
                        error_code,
                        message,
                    } => {
                        if task.status != TaskStatus::Failed {
                            info!(kind = %kind, task_id = %task.id, "transfer failed: {message}");
                        }
                        task.status = TaskStatus::Failed;
                        task.waiting_until = None;
                        task.message = Some(message.clone());
                        task.error_code = error_code.clone();
                        if !task.alert_shown {
                            task.alert_shown = true;
                            report = Some(ErrorReport {
                                kind,
                                task_id: task.id.clone(),
                                task_name: task.name.clone(),
                                error_code,
                                message,
                            });
                        }
                    }
                    other => task.status = other.status(),
                }
            }
        }

        if !task.status.is_active() {
            task.speed = 0.0;
        }
        (report, manifest)
    }

    /// Seed missing children from a folder manifest as `queued` with no progress.
    fn materialize(&mut self, parent: NodeId, entries: &[ChildEntry], now: u64) {
        for entry in entries {
            if entry.id.is_empty() {
                continue;
            }
            let node = match self.child(parent, &entry.id) {
                Some(node) => node,
                None => {
                    let kind = if entry.children.is_empty() {
                        entry.kind
                    } else {
                        ItemKind::Folder
                    };
                    let name = entry.name.clone().unwrap_or_else(|| entry.id.clone());
                    let task = Task::new(entry.id.clone(), name, kind, now).with_size(entry.size);
                    match self.insert_child(parent, task) {
                        Some(node) => node,
                        None => continue,
                    }
                }
            };
            if !entry.children.is_empty() {
                self.materialize(node, &entry.children, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{DetachedBackend, ErrorSurface};
    use crate::store::DownloadRequest;
    use std::sync::{Arc, Mutex};
    use tdrive_core::TransferKind;

    #[derive(Default)]
    struct CountingErrors(Mutex<Vec<ErrorReport>>);

    impl ErrorSurface for CountingErrors {
        fn show_error(&self, report: &ErrorReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    fn store() -> (TransferTaskStore, Arc<CountingErrors>) {
        let errors = Arc::new(CountingErrors::default());
        (
            TransferTaskStore::new(Arc::new(DetachedBackend), errors.clone()),
            errors,
        )
    }

    fn add(store: &mut TransferTaskStore, id: &str, size: u64, kind: ItemKind) {
        store.add_download(DownloadRequest {
            id: id.into(),
            item_id: id.into(),
            name: id.into(),
            size,
            kind,
        });
    }

    fn dl(id: &str) -> ProgressEvent {
        ProgressEvent::top_level(TransferKind::Download, id)
    }

    fn get<'a>(store: &'a TransferTaskStore, id: &str) -> &'a Task {
        store.task(TransferKind::Download, id).unwrap()
    }

    #[test]
    fn stale_absolute_update_does_not_regress() {
        let (mut store, _) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge(dl("d1").transferred(60).status(StatusUpdate::Transferring));
        store.merge(dl("d1").transferred(40));
        assert_eq!(get(&store, "d1").progress, 60);
    }

    #[test]
    fn size_is_only_revised_upward() {
        let (mut store, _) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge(dl("d1").transferred(80).status(StatusUpdate::Transferring));
        store.merge(dl("d1").total(40));
        let task = get(&store, "d1");
        assert_eq!(task.size, 100);
        assert_eq!(task.progress, 80);

        store.merge(dl("d1").total(150));
        assert_eq!(get(&store, "d1").size, 150);
    }

    #[test]
    fn queued_task_accepts_lower_checkpoint() {
        let (mut store, _) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge(dl("d1").transferred(60).status(StatusUpdate::Transferring));
        store.merge(dl("d1").failed("network"));
        assert!(store.resume("d1"));
        store.merge(dl("d1").transferred(32));
        assert_eq!(get(&store, "d1").progress, 32);
    }

    #[test]
    fn paused_task_ignores_transferring_but_counts_bytes() {
        let (mut store, _) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge(dl("d1").transferred(10).status(StatusUpdate::Transferring));
        store.pause("d1");
        store.merge(dl("d1").delta(5).speed(100.0).status(StatusUpdate::Transferring));

        let task = get(&store, "d1");
        assert_eq!(task.status, TaskStatus::Paused);
        assert_eq!(task.progress, 15);
        assert_eq!(task.speed, 0.0);
    }

    #[test]
    fn unknown_top_level_event_is_dropped() {
        let (mut store, _) = store();
        assert_eq!(store.merge(dl("ghost").delta(5)), MergeOutcome::Dropped);
        assert!(store.is_empty());
        assert!(!store.refresh_armed());
    }

    #[test]
    fn undeclared_folder_start_creates_root() {
        let (mut store, _) = store();
        let ev = ProgressEvent::top_level(TransferKind::Upload, "up-folder")
            .named("photos")
            .status(StatusUpdate::StartingFolder {
                children: vec![ChildEntry {
                    id: "p1".into(),
                    size: 8,
                    ..Default::default()
                }],
            });
        assert_eq!(store.merge(ev), MergeOutcome::Created);

        let root = store.task(TransferKind::Upload, "up-folder").unwrap();
        assert_eq!(root.name, "photos");
        assert!(root.is_folder());
        assert_eq!(root.total_files, 1);
        assert_eq!(root.size, 8);
    }

    #[test]
    fn child_event_for_unknown_child_synthesizes_it() {
        let (mut store, _) = store();
        add(&mut store, "f1", 0, ItemKind::Folder);
        let ev = ProgressEvent::child(TransferKind::Download, "f1", "late")
            .total(50)
            .transferred(20)
            .status(StatusUpdate::Transferring);
        assert_eq!(store.merge(ev), MergeOutcome::Created);

        let folder = get(&store, "f1");
        assert_eq!(folder.progress, 20);
        assert_eq!(folder.size, 50);
        assert_eq!(folder.status, TaskStatus::Transferring);
    }

    #[test]
    fn child_event_for_file_parent_is_dropped() {
        let (mut store, _) = store();
        add(&mut store, "d1", 10, ItemKind::File);
        let ev = ProgressEvent::child(TransferKind::Download, "d1", "c1").delta(1);
        assert_eq!(store.merge(ev), MergeOutcome::Dropped);
    }

    #[test]
    fn flood_wait_is_cleared_by_progress() {
        let (mut store, _) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge_at(dl("d1").status(StatusUpdate::Transferring).flood_wait(30), 1_000);
        assert_eq!(get(&store, "d1").waiting_until, Some(31_000));

        store.merge_at(dl("d1").delta(10), 2_000);
        assert_eq!(get(&store, "d1").waiting_until, None);
    }

    #[test]
    fn failure_carries_code_into_report() {
        let (mut store, errors) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge(dl("d1").status(StatusUpdate::Failed {
            error_code: Some("FLOOD".into()),
            message: "too many requests".into(),
        }));

        let reports = errors.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error_code.as_deref(), Some("FLOOD"));
        assert_eq!(reports[0].task_name, "d1");
        assert_eq!(get(&store, "d1").message.as_deref(), Some("too many requests"));
    }

    #[test]
    fn completed_task_ignores_later_bytes() {
        let (mut store, _) = store();
        add(&mut store, "d1", 100, ItemKind::File);
        store.merge(dl("d1").transferred(100).status(StatusUpdate::Completed));
        store.merge(dl("d1").delta(50).status(StatusUpdate::Transferring));

        let task = get(&store, "d1");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
    }
}
