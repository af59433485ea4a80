//! Read-only views over the store for display. Nothing here mutates a task.

use tdrive_core::TransferKind;

use crate::store::TransferTaskStore;
use crate::task::{Task, TaskStatus};

const ETA_PLACEHOLDER: &str = "--:--";
const DAY_SECS: u64 = 24 * 3600;

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return "-- B/s".to_string();
    }
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}

/// Durations of a day or more collapse to a coarse label.
pub fn format_eta(secs: u64) -> String {
    if secs >= DAY_SECS {
        "> 1 day".to_string()
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Seconds left at the current speed, when both speed and remaining bytes are known.
pub fn eta_seconds(remaining: u64, bytes_per_sec: f64) -> Option<u64> {
    if remaining == 0 || !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return None;
    }
    Some((remaining as f64 / bytes_per_sec).ceil() as u64)
}

/// Completion percentage in `0.0..=100.0`; 0 while the size is unknown.
pub fn percent(task: &Task) -> f64 {
    if task.size == 0 {
        return 0.0;
    }
    (task.progress as f64 / task.size as f64 * 100.0).min(100.0)
}

/// "1.5 MB / 3.0 MB", or just the transferred amount while the size is unknown.
pub fn transferred_label(task: &Task) -> String {
    if task.size == 0 {
        return format_bytes(task.progress);
    }
    format!("{} / {}", format_bytes(task.progress), format_bytes(task.size))
}

/// ETA column: a rate-limit countdown, a duration, or the placeholder.
pub fn eta_label(task: &Task, now: u64) -> String {
    if let Some(until) = task.waiting_until.filter(|&u| u > now) {
        return format!("waiting {}s", (until - now).div_ceil(1000));
    }
    if !task.status.is_active() {
        return ETA_PLACEHOLDER.to_string();
    }
    eta_seconds(task.remaining(), task.speed)
        .map(format_eta)
        .unwrap_or_else(|| ETA_PLACEHOLDER.to_string())
}

/// One display row.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskView {
    pub id: String,
    pub name: String,
    pub kind: TransferKind,
    pub is_folder: bool,
    pub status: TaskStatus,
    pub percent: f64,
    pub transferred: String,
    pub speed: String,
    pub eta: String,
    pub message: Option<String>,
    /// (completed, total) leaf files, folders only
    pub files: Option<(u64, u64)>,
    pub start_time: u64,
}

impl TaskView {
    pub fn of(kind: TransferKind, task: &Task, now: u64) -> Self {
        let speed = if task.status.is_active() {
            task.speed
        } else {
            0.0
        };
        TaskView {
            id: task.id.clone(),
            name: task.name.clone(),
            kind,
            is_folder: task.is_folder(),
            status: task.status.normalized(),
            percent: percent(task),
            transferred: transferred_label(task),
            speed: format_speed(speed),
            eta: eta_label(task, now),
            message: task.message.clone(),
            files: task
                .is_folder()
                .then_some((task.completed_files, task.total_files)),
            start_time: task.start_time,
        }
    }
}

/// Top-level rows of one collection, newest first.
pub fn views(store: &TransferTaskStore, kind: TransferKind, now: u64) -> Vec<TaskView> {
    let mut rows: Vec<TaskView> = store
        .roots(kind)
        .map(|task| TaskView::of(kind, task, now))
        .collect();
    rows.sort_by(|a, b| b.start_time.cmp(&a.start_time).then_with(|| a.id.cmp(&b.id)));
    rows
}

/// Totals across top-level tasks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferSummary {
    pub active: usize,
    pub queued: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Summed speed of active tasks, bytes/sec
    pub speed: f64,
    /// Bytes left across non-terminal tasks
    pub remaining: u64,
}

impl TransferSummary {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut summary = TransferSummary::default();
        for task in tasks {
            match task.status {
                s if s.is_active() => {
                    summary.active += 1;
                    summary.speed += task.speed;
                }
                TaskStatus::Queued => summary.queued += 1,
                TaskStatus::Paused => summary.paused += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
                _ => {}
            }
            if !task.status.is_terminal() {
                summary.remaining += task.remaining();
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.active + self.queued + self.paused + self.completed + self.failed + self.cancelled
    }

    pub fn eta_seconds(&self) -> Option<u64> {
        eta_seconds(self.remaining, self.speed)
    }

    pub fn eta_label(&self) -> String {
        self.eta_seconds()
            .map(format_eta)
            .unwrap_or_else(|| ETA_PLACEHOLDER.to_string())
    }

    pub fn speed_label(&self) -> String {
        format_speed(self.speed)
    }
}

/// Summary over one collection.
pub fn kind_summary(store: &TransferTaskStore, kind: TransferKind) -> TransferSummary {
    TransferSummary::from_tasks(store.roots(kind))
}

/// Summary over uploads and downloads together.
pub fn summary(store: &TransferTaskStore) -> TransferSummary {
    TransferSummary::from_tasks(
        TransferKind::ALL
            .iter()
            .flat_map(|&kind| store.roots(kind)),
    )
}
