//! Folder aggregation: a folder task's progress and status are derived purely
//! from its descendants.

use tracing::debug;

use crate::store::TransferTaskStore;
use crate::task::{NodeId, Task, TaskStatus};

/// Totals over the leaf descendants of a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FolderStats {
    pub size: u64,
    pub progress: u64,
    pub total_files: u64,
    pub completed_files: u64,
    pub failed_files: u64,
    pub active_files: u64,
    pub speed: f64,
}

impl FolderStats {
    fn absorb(&mut self, other: FolderStats) {
        self.size += other.size;
        self.progress += other.progress;
        self.total_files += other.total_files;
        self.completed_files += other.completed_files;
        self.failed_files += other.failed_files;
        self.active_files += other.active_files;
        self.speed += other.speed;
    }
}

/// A failed task, or one cancelled by the backend with a reason attached.
fn is_failure(task: &Task) -> bool {
    match task.status {
        TaskStatus::Failed => true,
        TaskStatus::Cancelled => task.message.is_some(),
        _ => false,
    }
}

/// Recursively total the descendants of `node`. Pure; does not touch the store.
pub fn folder_stats(store: &TransferTaskStore, node: NodeId) -> FolderStats {
    let mut stats = FolderStats::default();
    let Some(folder) = store.get(node) else {
        return stats;
    };

    for &child_node in folder.children.values() {
        let Some(child) = store.get(child_node) else {
            continue;
        };
        if child.has_children() {
            let sub = folder_stats(store, child_node);
            if is_failure(child) && sub.failed_files == 0 {
                stats.failed_files += 1;
            }
            stats.absorb(sub);
        } else if child.is_folder() {
            // folder whose manifest has not arrived yet: bytes only
            stats.size += child.size;
            stats.progress += child.progress;
            if is_failure(child) {
                stats.failed_files += 1;
            }
        } else {
            let progress = if child.size > 0 {
                child.progress.min(child.size)
            } else {
                child.progress
            };
            stats.size += child.size;
            stats.progress += progress;
            stats.total_files += 1;
            match child.status {
                TaskStatus::Completed => stats.completed_files += 1,
                s if s.is_active() => {
                    stats.active_files += 1;
                    stats.speed += child.speed;
                }
                _ => {}
            }
            if is_failure(child) {
                stats.failed_files += 1;
            }
        }
    }
    stats
}

/// Status a folder should show given its own status and its children's totals.
pub fn derive_status(own: TaskStatus, stats: &FolderStats) -> TaskStatus {
    if stats.failed_files > 0 {
        TaskStatus::Failed
    } else if stats.total_files > 0 && stats.completed_files == stats.total_files {
        TaskStatus::Completed
    } else if own.is_terminal() {
        own
    } else if own == TaskStatus::Paused {
        TaskStatus::Paused
    } else if stats.active_files > 0 {
        TaskStatus::Transferring
    } else {
        own.normalized()
    }
}

/// Recompute one folder from its children. Leaf tasks are left untouched.
pub(crate) fn refresh_node(store: &mut TransferTaskStore, node: NodeId, now: u64) {
    let stats = folder_stats(store, node);
    let Some(task) = store.get_mut(node) else {
        return;
    };
    if !task.has_children() {
        return;
    }

    task.progress = stats.progress;
    task.size = task.size.max(stats.size);
    task.total_files = stats.total_files;
    task.completed_files = stats.completed_files;
    task.clamp_progress();

    let next = derive_status(task.status, &stats);
    if next != task.status {
        debug!(task_id = %task.id, from = %task.status, to = %next, "folder status derived");
        match next {
            TaskStatus::Completed => task.mark_completed(now),
            TaskStatus::Failed => {
                task.message = Some(format!(
                    "{} of {} files failed",
                    stats.failed_files, stats.total_files
                ));
            }
            _ => {
                task.message = None;
                task.error_code = None;
            }
        }
        task.status = next;
    }
    // a completed folder shows full size even when child accounting is stale
    if task.status == TaskStatus::Completed && task.size > 0 {
        task.progress = task.size;
    }

    if !task.status.is_active() {
        task.speed = 0.0;
    } else if stats.speed > 0.0 {
        task.speed = stats.speed;
    }
}

/// Recompute `node` and every ancestor above it.
pub(crate) fn refresh_from(store: &mut TransferTaskStore, node: NodeId, now: u64) {
    let mut cursor = Some(node);
    while let Some(current) = cursor {
        refresh_node(store, current, now);
        cursor = store.get(current).and_then(|t| t.parent());
    }
}

/// Recompute a whole subtree bottom-up (used after bulk inserts).
pub(crate) fn refresh_subtree(store: &mut TransferTaskStore, node: NodeId, now: u64) {
    let children: Vec<NodeId> = store
        .get(node)
        .map(|t| t.children.values().copied().collect())
        .unwrap_or_default();
    for child in children {
        refresh_subtree(store, child, now);
    }
    refresh_node(store, node, now);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, completed: u64, failed: u64, active: u64) -> FolderStats {
        FolderStats {
            total_files: total,
            completed_files: completed,
            failed_files: failed,
            active_files: active,
            ..Default::default()
        }
    }

    #[test]
    fn failure_wins_over_everything() {
        assert_eq!(
            derive_status(TaskStatus::Transferring, &stats(3, 2, 1, 0)),
            TaskStatus::Failed
        );
    }

    #[test]
    fn completed_only_when_every_file_is_done() {
        assert_eq!(
            derive_status(TaskStatus::Transferring, &stats(3, 3, 0, 0)),
            TaskStatus::Completed
        );
        assert_eq!(
            derive_status(TaskStatus::Transferring, &stats(3, 2, 0, 1)),
            TaskStatus::Transferring
        );
        // an empty manifest never completes by aggregation
        assert_eq!(
            derive_status(TaskStatus::Queued, &stats(0, 0, 0, 0)),
            TaskStatus::Queued
        );
    }

    #[test]
    fn paused_folder_stays_paused_while_children_drain() {
        assert_eq!(
            derive_status(TaskStatus::Paused, &stats(3, 1, 0, 2)),
            TaskStatus::Paused
        );
    }

    #[test]
    fn idle_folder_keeps_its_own_pending_state() {
        assert_eq!(
            derive_status(TaskStatus::Queued, &stats(2, 0, 0, 0)),
            TaskStatus::Queued
        );
        assert_eq!(
            derive_status(TaskStatus::StartingFolder, &stats(2, 0, 0, 0)),
            TaskStatus::Transferring
        );
    }
}
