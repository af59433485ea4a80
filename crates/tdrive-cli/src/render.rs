//! Terminal collaborators: one indicatif bar per top-level transfer, and
//! failure popups printed above the bars.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use tdrive_core::TransferKind;
use tdrive_transfer::present::{self, TaskView};
use tdrive_transfer::{ErrorReport, ErrorSurface, Renderer, Task, TaskStatus, TransferTaskStore};

pub fn multi_progress(visible: bool) -> MultiProgress {
    if visible {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} [{bar:40.cyan/blue}] {percent:>3}% {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
}

pub struct BarRenderer {
    multi: MultiProgress,
    bars: Mutex<HashMap<(TransferKind, String), ProgressBar>>,
}

impl BarRenderer {
    pub fn new(multi: MultiProgress) -> Self {
        BarRenderer {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar_for(
        &self,
        bars: &mut HashMap<(TransferKind, String), ProgressBar>,
        view: &TaskView,
    ) -> ProgressBar {
        bars.entry((view.kind, view.id.clone()))
            .or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(100));
                pb.set_style(bar_style());
                pb.set_prefix(format!("{:<8} {}", view.kind, view.name));
                pb
            })
            .clone()
    }

    /// Leave finished bars on screen and drop the rest.
    pub fn finish(&self) {
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        for (_, pb) in bars.drain() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
    }
}

impl Renderer for BarRenderer {
    fn render(&self, store: &TransferTaskStore) {
        let now = tdrive_transfer::task::unix_millis();
        let mut bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = Vec::new();

        for kind in TransferKind::ALL {
            for view in present::views(store, kind, now) {
                let mut pb = self.bar_for(&mut bars, &view);
                seen.push((kind, view.id.clone()));
                if pb.is_finished() {
                    if view.status.is_terminal() {
                        continue;
                    }
                    // retried after finishing: start a fresh bar
                    if let Some(old) = bars.remove(&(kind, view.id.clone())) {
                        self.multi.remove(&old);
                    }
                    pb = self.bar_for(&mut bars, &view);
                }
                pb.set_position(view.percent.round() as u64);
                let files = view
                    .files
                    .map(|(done, total)| format!(" {done}/{total} files"))
                    .unwrap_or_default();
                pb.set_message(format!(
                    "{} {} {} eta {}{}",
                    view.status, view.transferred, view.speed, view.eta, files
                ));
            }
        }

        // cancelled or cleared since the last redraw
        bars.retain(|key, pb| {
            let keep = seen.contains(key);
            if !keep {
                pb.finish_and_clear();
            }
            keep
        });
    }

    fn transfer_finished(&self, kind: TransferKind, task: &Task) {
        let bars = self.bars.lock().unwrap_or_else(|e| e.into_inner());
        let Some(pb) = bars.get(&(kind, task.id.clone())) else {
            return;
        };
        let msg = match task.status {
            TaskStatus::Completed => format!("done {}", present::format_bytes(task.size)),
            TaskStatus::Failed => format!(
                "failed: {}",
                task.message.as_deref().unwrap_or("unknown error")
            ),
            other => other.to_string(),
        };
        pb.set_position(present::percent(task).round() as u64);
        pb.finish_with_message(msg);
    }
}

/// Prints each failure once, above the progress bars.
pub struct ConsoleErrors {
    multi: MultiProgress,
}

impl ConsoleErrors {
    pub fn new(multi: MultiProgress) -> Self {
        ConsoleErrors { multi }
    }
}

impl ErrorSurface for ConsoleErrors {
    fn show_error(&self, report: &ErrorReport) {
        warn!(
            kind = %report.kind,
            task_id = %report.task_id,
            code = report.error_code.as_deref().unwrap_or(""),
            "{}",
            report.message
        );
        let code = report
            .error_code
            .as_deref()
            .map(|c| format!(" [{c}]"))
            .unwrap_or_default();
        let line = format!(
            "error: {} {} failed{}: {}",
            report.kind, report.task_name, code, report.message
        );
        if self.multi.println(&line).is_err() {
            eprintln!("{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tdrive_core::{ItemKind, TdriveResult};
    use tdrive_transfer::{
        IncompleteTransfers, ProgressEvent, StatusUpdate, TransferBackend, UploadRequest,
    };

    struct NoopBackend;

    impl TransferBackend for NoopBackend {
        fn cancel_transfer(&self, _: TransferKind, _: &str) -> TdriveResult<()> {
            Ok(())
        }
        fn pause_transfer(&self, _: TransferKind, _: &str) -> TdriveResult<()> {
            Ok(())
        }
        fn resume_transfer(&self, _: TransferKind, _: &str) -> TdriveResult<()> {
            Ok(())
        }
        fn incomplete_transfers(&self) -> TdriveResult<IncompleteTransfers> {
            Ok(IncompleteTransfers::default())
        }
    }

    fn bar(renderer: &BarRenderer, id: &str) -> ProgressBar {
        renderer.bars.lock().unwrap()[&(TransferKind::Upload, id.to_string())].clone()
    }

    #[test]
    fn retried_transfer_gets_a_live_bar() {
        let multi = multi_progress(false);
        let errors = Arc::new(ConsoleErrors::new(multi.clone()));
        let mut store = TransferTaskStore::new(Arc::new(NoopBackend), errors);
        let renderer = BarRenderer::new(multi);

        store.add_upload(UploadRequest {
            id: "u1".into(),
            name: "a.txt".into(),
            local_path: PathBuf::from("/tmp/a.txt"),
            size: 10,
            kind: ItemKind::File,
            remote_parent: None,
        });
        store.merge(ProgressEvent::top_level(TransferKind::Upload, "u1").failed("network down"));
        renderer.render(&store);
        let failed = store.task(TransferKind::Upload, "u1").unwrap().clone();
        renderer.transfer_finished(TransferKind::Upload, &failed);
        assert!(bar(&renderer, "u1").is_finished());

        assert!(store.resume("u1"));
        store.merge(ProgressEvent::top_level(TransferKind::Upload, "u1").transferred(4));
        renderer.render(&store);

        let live = bar(&renderer, "u1");
        assert!(!live.is_finished());
        assert_eq!(live.position(), 40);
    }

    #[test]
    fn finished_bar_stays_while_terminal() {
        let multi = multi_progress(false);
        let errors = Arc::new(ConsoleErrors::new(multi.clone()));
        let mut store = TransferTaskStore::new(Arc::new(NoopBackend), errors);
        let renderer = BarRenderer::new(multi);

        store.add_upload(UploadRequest {
            id: "u1".into(),
            name: "a.txt".into(),
            local_path: PathBuf::from("/tmp/a.txt"),
            size: 10,
            kind: ItemKind::File,
            remote_parent: None,
        });
        store.merge(
            ProgressEvent::top_level(TransferKind::Upload, "u1")
                .transferred(10)
                .status(StatusUpdate::Completed),
        );
        renderer.render(&store);
        let done = store.task(TransferKind::Upload, "u1").unwrap().clone();
        renderer.transfer_finished(TransferKind::Upload, &done);
        renderer.render(&store);

        assert!(bar(&renderer, "u1").is_finished());
    }
}
