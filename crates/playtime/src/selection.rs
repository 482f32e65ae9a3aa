use parking_lot::Mutex;
use playtime_core::GameId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type Slots = Arc<Mutex<HashMap<GameId, mpsc::Sender<String>>>>;

/// Single-slot request/response mailbox keyed by game.
///
/// A session awaiting a user decision opens a slot; [`notify`](Self::notify)
/// delivers at most one process name into it without blocking. Late or
/// duplicate deliveries are dropped.
#[derive(Debug, Default)]
pub struct SelectionMailbox {
    slots: Slots,
}

/// Why a [`SelectionSlot`] wait ended without a process name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMiss {
    TimedOut,
    Cancelled,
}

impl SelectionMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the slot for `game_id`, replacing any stale one
    pub fn open(&self, game_id: &GameId) -> SelectionSlot {
        let (tx, rx) = mpsc::channel(1);
        let tx_for_slot = tx.clone();
        if self.slots.lock().insert(game_id.clone(), tx).is_some() {
            debug!(game_id = %game_id, "Replaced stale selection slot");
        }

        SelectionSlot {
            game_id: game_id.clone(),
            rx,
            own: tx_for_slot,
            slots: self.slots.clone(),
        }
    }

    /// Deliver a user's choice. Returns `false` when no request is pending
    /// for the game or a choice was already delivered.
    pub fn notify(&self, game_id: &GameId, process_name: &str) -> bool {
        let Some(tx) = self.slots.lock().get(game_id).cloned() else {
            debug!(game_id = %game_id, "No pending selection, ignoring");
            return false;
        };

        match tx.try_send(process_name.to_string()) {
            Ok(()) => true,
            Err(_) => {
                debug!(game_id = %game_id, "Selection already delivered, dropping duplicate");
                false
            }
        }
    }

    pub fn is_pending(&self, game_id: &GameId) -> bool {
        self.slots.lock().contains_key(game_id)
    }
}

/// Receiving side of a pending selection. Dropping it closes the slot.
#[derive(Debug)]
pub struct SelectionSlot {
    game_id: GameId,
    rx: mpsc::Receiver<String>,
    own: mpsc::Sender<String>,
    slots: Slots,
}

impl SelectionSlot {
    /// Wait for a process name until `timeout` elapses or `cancel` fires
    pub async fn wait(
        mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, SelectionMiss> {
        tokio::select! {
            _ = cancel.cancelled() => Err(SelectionMiss::Cancelled),
            received = tokio::time::timeout(timeout, self.rx.recv()) => match received {
                Ok(Some(name)) => Ok(name),
                // The slot holds a sender of its own, so the channel never closes
                Ok(None) => Err(SelectionMiss::Cancelled),
                Err(_) => Err(SelectionMiss::TimedOut),
            },
        }
    }
}

impl Drop for SelectionSlot {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        // Only remove the sender paired with this receiver
        if slots
            .get(&self.game_id)
            .is_some_and(|tx| tx.same_channel(&self.own))
        {
            slots.remove(&self.game_id);
        }
    }
}
