use arc_swap::ArcSwap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::protocol::observer::{Observers, PropertyChanged};

/// Live state of one bridge: the latest line and value plus the two
/// activity flags.
///
/// Written by the reader thread, read by the broadcast thread and by the
/// owner. Values are immutable snapshots swapped in whole, so readers never
/// see a half-written string.
#[derive(Debug)]
pub struct RuntimeSession {
    raw_line: ArcSwap<String>,
    value: ArcSwap<String>,
    reading: AtomicBool,
    broadcasting: AtomicBool,
    observers: Observers,
}

impl Default for RuntimeSession {
    fn default() -> Self {
        Self {
            raw_line: ArcSwap::from_pointee(String::new()),
            value: ArcSwap::from_pointee(String::new()),
            reading: AtomicBool::new(false),
            broadcasting: AtomicBool::new(false),
            observers: Observers::new(),
        }
    }
}

impl RuntimeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self) -> flume::Receiver<PropertyChanged> {
        self.observers.subscribe()
    }

    pub fn latest_raw_line(&self) -> Arc<String> {
        self.raw_line.load_full()
    }

    pub fn set_raw_line(&self, line: &str) {
        self.raw_line.store(Arc::new(line.to_string()));
        self.observers.notify("latest_raw_line");
    }

    /// Latest processed value; `NAN` when the last line was rejected.
    pub fn latest_value(&self) -> Arc<String> {
        self.value.load_full()
    }

    pub fn set_value(&self, value: &str) {
        self.value.store(Arc::new(value.to_string()));
        self.observers.notify("latest_value");
    }

    pub fn clear_latest(&self) {
        self.raw_line.store(Arc::new(String::new()));
        self.value.store(Arc::new(String::new()));
        self.observers.notify("latest_raw_line");
        self.observers.notify("latest_value");
    }

    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_reading(&self, reading: bool) -> bool {
        let previous = self.reading.swap(reading, Ordering::SeqCst);
        if previous != reading {
            self.observers.notify("is_reading");
        }
        previous
    }

    pub fn is_broadcasting(&self) -> bool {
        self.broadcasting.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_broadcasting(&self, broadcasting: bool) -> bool {
        let previous = self.broadcasting.swap(broadcasting, Ordering::SeqCst);
        if previous != broadcasting {
            self.observers.notify("is_broadcasting");
        }
        previous
    }
}
