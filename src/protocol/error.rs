use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use strum::Display;

/// Broad category of a bridge fault.
///
/// Validation outcomes (stability mismatch, sequence mismatch, length
/// mismatch, unparseable value) are never errors; they surface as the
/// `NAN` sentinel instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid settings; fatal to the open attempt.
    Configuration,
    /// The port is already open, here or in another process.
    ResourceConflict,
    /// The device could not be opened or stopped responding.
    Hardware,
    /// A single read did not complete in time; the loop keeps going.
    Timeout,
    /// Address discovery, bind, or accept failed.
    Network,
    /// An operation was requested in a state that does not allow it.
    NotReady,
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// The single error type surfaced by the bridge runtime.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceConflict, message)
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Hardware, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReady, message)
    }

    /// Attach the lower-level cause.
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Message followed by the cause chain, for logs and event payloads.
    pub fn detailed(&self) -> String {
        let mut out = self.message.clone();
        let mut cause = StdError::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}
