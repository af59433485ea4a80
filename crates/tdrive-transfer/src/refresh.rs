//! Periodic refresh tick: redraw, fire one-shot completion feedback, and stop
//! once nothing is left in flight.

use tdrive_core::TransferKind;
use tracing::debug;

use crate::bridge::Renderer;
use crate::store::TransferTaskStore;
use crate::task::NodeId;

/// Armed/disarmed state of the refresh loop. The driver only schedules ticks
/// while armed.
#[derive(Debug, Default, Clone)]
pub struct RefreshLoop {
    armed: bool,
    ticks: u64,
}

impl RefreshLoop {
    /// Returns true if the loop was not already running.
    pub fn arm(&mut self) -> bool {
        if self.armed {
            return false;
        }
        debug!("refresh loop started");
        self.armed = true;
        true
    }

    pub fn disarm(&mut self) {
        if self.armed {
            debug!(ticks = self.ticks, "refresh loop stopped");
        }
        self.armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Run one tick. Returns whether the loop is still armed afterwards.
pub fn tick(store: &mut TransferTaskStore, renderer: &dyn Renderer) -> bool {
    store.refresh.ticks += 1;
    renderer.render(store);

    let finished: Vec<(TransferKind, NodeId)> = TransferKind::ALL
        .iter()
        .flat_map(|&kind| {
            store
                .root_nodes(kind)
                .filter(|&node| {
                    store
                        .get(node)
                        .map(|t| t.status.is_terminal() && !t.feedback_shown)
                        .unwrap_or(false)
                })
                .map(move |node| (kind, node))
                .collect::<Vec<_>>()
        })
        .collect();

    for (kind, node) in finished {
        if let Some(task) = store.get(node) {
            renderer.transfer_finished(kind, task);
        }
        if let Some(task) = store.get_mut(node) {
            task.feedback_shown = true;
        }
    }

    if !store.has_non_terminal() {
        store.refresh.disarm();
    }
    store.refresh.is_armed()
}
