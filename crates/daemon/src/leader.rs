//! Leader-change signal consumed by the scheduler.

use tokio::sync::mpsc;

/// Receiving half handed to the scheduler.
#[derive(Debug)]
pub struct LeaderEvents {
    /// Current masters, leader first. An empty list means no leader is known.
    pub changes: mpsc::Receiver<Vec<String>>,
    /// Unrecoverable detector failures.
    pub fatal: mpsc::Receiver<String>,
}

/// Sending half kept by whatever detects leadership.
#[derive(Debug, Clone)]
pub struct LeaderSender {
    pub changes: mpsc::Sender<Vec<String>>,
    pub fatal: mpsc::Sender<String>,
}

pub fn channel(buffer: usize) -> (LeaderSender, LeaderEvents) {
    let (changes_tx, changes_rx) = mpsc::channel(buffer.max(1));
    let (fatal_tx, fatal_rx) = mpsc::channel(1);
    (
        LeaderSender {
            changes: changes_tx,
            fatal: fatal_tx,
        },
        LeaderEvents {
            changes: changes_rx,
            fatal: fatal_rx,
        },
    )
}

/// Announces the configured masters once. Used when no coordination service
/// tracks leadership; the senders are dropped afterwards.
pub fn static_leaders(masters: Vec<String>) -> LeaderEvents {
    let (tx, events) = channel(1);
    // The buffer holds exactly this one message.
    let _ = tx.changes.try_send(masters);
    events
}
