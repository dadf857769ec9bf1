pub mod constants;
pub mod error;
pub mod network;
pub mod observer;
pub mod ports;
pub mod processor;
pub mod settings;

pub use constants::{FlowControl, Parity, StopBits, INVALID_VALUE};
pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use settings::{PortSettings, PortSettingsRecord, SerialParameters, SharedSettings};
