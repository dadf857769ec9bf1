use flume::{Receiver, Sender};
use parking_lot::Mutex;

/// Notification that a named property of a model changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyChanged {
    pub property: &'static str,
}

/// Subscriber list shared by the settings model and the runtime session.
///
/// Each subscriber gets its own unbounded channel; subscribers whose
/// receiver was dropped are pruned on the next notification.
#[derive(Default)]
pub struct Observers {
    senders: Mutex<Vec<Sender<PropertyChanged>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PropertyChanged> {
        let (tx, rx) = flume::unbounded();
        self.senders.lock().push(tx);
        rx
    }

    pub fn notify(&self, property: &'static str) {
        let mut senders = self.senders.lock();
        if senders.is_empty() {
            return;
        }
        senders.retain(|tx| tx.send(PropertyChanged { property }).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().len()
    }
}

// Subscriptions belong to one model instance and are not carried over to copies.
impl Clone for Observers {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
