//! Actor owning the active-environment selection.
//!
//! All writes to the selection go through one task over an `mpsc` channel, so
//! concurrent `select` calls are serialized (last write wins). Reads are a
//! `watch` snapshot. Each selection bumps a generation counter; a revert timer
//! only takes effect if its generation is still current, so a stale timer can
//! never undo a newer selection even if its cancellation races with firing.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Capacity of the selection command channel.
const COMMAND_BUFFER: usize = 32;

/// Published view of the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionState {
    /// Currently active environment.
    pub active: String,
    /// When the pending revert fires, if one is scheduled.
    pub revert_at: Option<Instant>,
    /// Number of reverts that have taken effect since startup.
    pub reverts_fired: u64,
}

impl SelectionState {
    /// Returns true if a revert to the default is scheduled.
    pub fn revert_pending(&self) -> bool {
        self.revert_at.is_some()
    }
}

pub(crate) enum SelectionCommand {
    Select {
        name: String,
        reply: oneshot::Sender<()>,
    },
    RevertDue {
        generation: u64,
    },
}

struct SelectionActor {
    default: String,
    dwell: Duration,
    generation: u64,
    pending: Option<CancellationToken>,
    commands: mpsc::WeakSender<SelectionCommand>,
    state: watch::Sender<SelectionState>,
}

/// Spawns the selection actor; returns its command sender and state receiver.
///
/// Must be called from within a Tokio runtime.
pub(crate) fn spawn(
    default: &str,
    dwell: Duration,
) -> (
    mpsc::Sender<SelectionCommand>,
    watch::Receiver<SelectionState>,
) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (state_tx, state_rx) = watch::channel(SelectionState {
        active: default.to_string(),
        revert_at: None,
        reverts_fired: 0,
    });

    let actor = SelectionActor {
        default: default.to_string(),
        dwell,
        generation: 0,
        pending: None,
        commands: tx.downgrade(),
        state: state_tx,
    };
    tokio::spawn(actor.run(rx));

    (tx, state_rx)
}

impl SelectionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<SelectionCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SelectionCommand::Select { name, reply } => {
                    self.select(name);
                    let _ = reply.send(());
                }
                SelectionCommand::RevertDue { generation } => self.revert(generation),
            }
        }
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        debug!("Selection actor stopped");
    }

    fn select(&mut self, name: String) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
        self.generation += 1;

        let revert_at = if name == self.default {
            None
        } else {
            Some(self.schedule_revert())
        };

        info!(environment = %name, revert_in = ?revert_at.map(|_| self.dwell), "Environment selected");
        self.state.send_modify(|state| {
            state.active = name;
            state.revert_at = revert_at;
        });
    }

    fn schedule_revert(&mut self) -> Instant {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let generation = self.generation;
        let commands = self.commands.clone();
        let deadline = Instant::now() + self.dwell;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(commands) = commands.upgrade() {
                        let _ = commands.send(SelectionCommand::RevertDue { generation }).await;
                    }
                }
            }
        });

        self.pending = Some(token);
        deadline
    }

    fn revert(&mut self, generation: u64) {
        if generation != self.generation || self.pending.is_none() {
            debug!(generation, current = self.generation, "Ignoring stale revert");
            return;
        }
        self.pending = None;

        info!(environment = %self.default, "Selection reverted to default");
        let default = self.default.clone();
        self.state.send_modify(|state| {
            state.active = default;
            state.revert_at = None;
            state.reverts_fired += 1;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn select(tx: &mpsc::Sender<SelectionCommand>, name: &str) {
        let (reply, done) = oneshot::channel();
        tx.send(SelectionCommand::Select {
            name: name.to_string(),
            reply,
        })
        .await
        .unwrap();
        done.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_then_revert() {
        let (tx, state) = spawn("dev", Duration::from_secs(60));
        select(&tx, "prod").await;
        assert_eq!(state.borrow().active, "prod");
        assert!(state.borrow().revert_pending());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let snapshot = state.borrow().clone();
        assert_eq!(snapshot.active, "dev");
        assert!(!snapshot.revert_pending());
        assert_eq!(snapshot.reverts_fired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_ignored() {
        let (tx, state) = spawn("dev", Duration::from_secs(60));
        select(&tx, "prod").await;
        tx.send(SelectionCommand::RevertDue { generation: 0 })
            .await
            .unwrap();
        select(&tx, "prod").await;
        assert_eq!(state.borrow().active, "prod");
        assert_eq!(state.borrow().reverts_fired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selecting_default_schedules_nothing() {
        let (tx, state) = spawn("dev", Duration::from_secs(60));
        select(&tx, "prod").await;
        select(&tx, "dev").await;
        assert!(!state.borrow().revert_pending());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(state.borrow().reverts_fired, 0);
    }
}
