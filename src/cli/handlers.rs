//! Flume-based bridge handler, the CLI's default way of observing sessions.

use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::api::{
    error::{BridgeError, ErrorKind},
    traits::BridgeHandler,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    ValueUpdated {
        session: usize,
        value: String,
    },
    Error {
        session: Option<usize>,
        kind: ErrorKind,
        message: String,
    },
}

/// Forwards events into a channel while enabled.
pub struct FlumeHandler {
    sender: flume::Sender<BridgeEvent>,
    running: Arc<AtomicBool>,
}

impl FlumeHandler {
    pub fn new() -> (Self, flume::Receiver<BridgeEvent>) {
        let (sender, receiver) = flume::unbounded();
        let handler = Self {
            sender,
            running: Arc::new(AtomicBool::new(true)),
        };
        (handler, receiver)
    }

    /// Stop forwarding; later events are dropped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn forward(&self, event: BridgeEvent) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if self.sender.send(event).is_err() {
            log::debug!("bridge event dropped: receiver gone");
        }
    }
}

impl BridgeHandler for FlumeHandler {
    fn on_value_updated(&self, value: &str, session_index: usize) {
        self.forward(BridgeEvent::ValueUpdated {
            session: session_index,
            value: value.to_string(),
        });
    }

    fn on_error(&self, error: &BridgeError, session_index: Option<usize>) {
        self.forward(BridgeEvent::Error {
            session: session_index,
            kind: error.kind(),
            message: error.detailed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_until_stopped() {
        let (handler, rx) = FlumeHandler::new();
        handler.on_value_updated("3.25", 1);
        handler.on_error(&BridgeError::not_ready("no reading yet"), None);
        handler.stop();
        handler.on_value_updated("3.30", 1);

        assert_eq!(
            rx.try_recv().unwrap(),
            BridgeEvent::ValueUpdated {
                session: 1,
                value: "3.25".to_string()
            }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            BridgeEvent::Error {
                kind: ErrorKind::NotReady,
                ..
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_serialise_as_tagged_json() {
        let event = BridgeEvent::ValueUpdated {
            session: 0,
            value: "12.5".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"value_updated","session":0,"value":"12.5"}"#
        );
    }
}
