//! Callbacks raised by the bridge runtime.
//!
//! Both methods are invoked from background threads (reader loop, accept
//! loop). Implementations that feed a UI must marshal to its thread
//! themselves.

use super::error::BridgeError;

pub trait BridgeHandler: Send + Sync {
    /// A line was processed. `value` is the validated reading, `NAN` for a
    /// rejected line, or empty when there was nothing to process.
    fn on_value_updated(&self, value: &str, session_index: usize);

    /// A fault was caught at a loop boundary or during a toggle.
    fn on_error(&self, error: &BridgeError, session_index: Option<usize>);
}

/// Handler that ignores everything (useful for testing)
pub struct NoOpHandler;

impl BridgeHandler for NoOpHandler {
    fn on_value_updated(&self, _value: &str, _session_index: usize) {}

    fn on_error(&self, _error: &BridgeError, _session_index: Option<usize>) {}
}

/// Handler that writes every event to the log.
pub struct LoggingHandler;

impl BridgeHandler for LoggingHandler {
    fn on_value_updated(&self, value: &str, session_index: usize) {
        log::debug!("session {session_index}: value {value:?}");
    }

    fn on_error(&self, error: &BridgeError, session_index: Option<usize>) {
        match session_index {
            Some(index) => log::warn!("session {index}: {} ({})", error.detailed(), error.kind()),
            None => log::warn!("{} ({})", error.detailed(), error.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_handlers_are_object_safe() {
        let handlers: Vec<Box<dyn BridgeHandler>> = vec![Box::new(NoOpHandler), Box::new(LoggingHandler)];
        for handler in &handlers {
            handler.on_value_updated("12.5", 0);
            handler.on_error(&BridgeError::timeout("Serial port did not return a value in time"), Some(0));
        }
    }
}
