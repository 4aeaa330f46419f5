//! Change notifications for cache observers.
//!
//! Every committed store mutation is published to all live subscribers.
//! Events for one stop arrive in commit order because the store publishes
//! while it still holds its writer lock.

use parking_lot::Mutex;
use std::sync::Arc;
use stopsync_protocol::{FavouriteStop, StopId};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// A change to one cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The record that changed.
    pub stop_id: StopId,
    /// The value callers now see, or `None` if the record is gone.
    pub new_value: Option<FavouriteStop>,
}

/// Fan-out publisher of [`ChangeEvent`]s.
///
/// Cloning yields another handle to the same subscriber list.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    subscribers: Arc<Mutex<Vec<UnboundedSender<ChangeEvent>>>>,
}

impl ChangeNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber.
    pub fn subscribe(&self) -> ChangeSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        ChangeSubscription { rx }
    }

    /// Sends `event` to every subscriber, dropping closed ones.
    pub fn publish(&self, event: ChangeEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Receiving end of a subscription.
#[derive(Debug)]
pub struct ChangeSubscription {
    rx: UnboundedReceiver<ChangeEvent>,
}

impl ChangeSubscription {
    /// Waits for the next event. Returns `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Takes every queued event.
    pub fn drain(&mut self) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
