//! Change notification bus
//!
//! Every mutation the coordinator applies to the metadata store is
//! published here. Subscribers get each event at least once while they
//! keep up; a subscriber that falls behind the buffer receives a single
//! [`ChangeEvent::Resync`] and continues from the oldest retained event.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{trace, warn};
use vaultspace_core::domain::ChangeEvent;

/// Fan-out channel for [`ChangeEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Creates a bus retaining up to `capacity` undelivered events per
    /// subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event; a bus with no subscribers drops it
    pub fn publish(&self, event: ChangeEvent) {
        trace!(event = ?event, "Publishing change event");
        let _ = self.tx.send(event);
    }

    /// New subscription starting at the next published event
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receiving end of an [`EventBus`]
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    /// Waits for the next event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "Change subscriber lagged, requesting resync");
                Some(ChangeEvent::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Next event if one is ready
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Lagged(missed)) => {
                warn!(missed, "Change subscriber lagged, requesting resync");
                Some(ChangeEvent::Resync)
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }
}
