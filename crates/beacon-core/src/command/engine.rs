use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::{Command, CommandEngine};

/// How many processed command ids the dedup cache remembers.
pub const RECENT_COMMAND_CAPACITY: usize = 8;

// ── RecentCommands ───────────────────────────────────────────────────

/// Fixed-size ring of recently processed command ids. The oldest id is
/// evicted once the ring is full.
#[derive(Debug, Clone)]
pub struct RecentCommands {
    ids: VecDeque<String>,
    capacity: usize,
}

impl RecentCommands {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|seen| seen == id)
    }

    /// Remember `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(id.to_owned());
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for RecentCommands {
    fn default() -> Self {
        Self::new(RECENT_COMMAND_CAPACITY)
    }
}

// ── QueuedCommandEngine ──────────────────────────────────────────────

/// [`CommandEngine`] that forwards accepted commands to the application
/// over a bounded channel.
///
/// An id is only remembered once its command is queued, so a command
/// dropped on a full queue can still arrive again through another path.
#[derive(Debug)]
pub struct QueuedCommandEngine {
    recent: RecentCommands,
    tx: mpsc::Sender<Command>,
}

impl QueuedCommandEngine {
    pub fn new(queue_capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        (
            Self {
                recent: RecentCommands::default(),
                tx,
            },
            rx,
        )
    }

    pub fn recent(&self) -> &RecentCommands {
        &self.recent
    }
}

impl CommandEngine for QueuedCommandEngine {
    fn was_recently_processed(&self, id: &str) -> bool {
        self.recent.contains(id)
    }

    fn execute(&mut self, command: Command) {
        let id = command.id.clone();
        match self.tx.try_send(command) {
            Ok(()) => {
                self.recent.insert(&id);
            }
            Err(TrySendError::Full(command)) => {
                tracing::warn!(command_id = %command.id, "Command queue full, dropping");
            }
            Err(TrySendError::Closed(command)) => {
                tracing::warn!(command_id = %command.id, "Command consumer gone, dropping");
            }
        }
    }
}
