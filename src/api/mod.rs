pub mod broadcast;
pub mod reader;
pub mod session;
pub mod state;
pub mod traits;
pub mod utils;

// Re-export types from protocol
pub use crate::protocol::error;
pub use crate::protocol::{
    BridgeError, BridgeResult, ErrorKind, FlowControl, Parity, PortSettings, PortSettingsRecord,
    SerialParameters, SharedSettings, StopBits, INVALID_VALUE,
};

pub use broadcast::BroadcastServer;
pub use reader::{LineSource, PortOpener, ReaderState, SerialReader, StopMode, SystemPortOpener};
pub use session::{PortSession, SessionState};
pub use state::RuntimeSession;
pub use traits::{BridgeHandler, LoggingHandler, NoOpHandler};
pub use utils::open_serial_port;

// Re-export the CLI default handler (flume-based implementation)
pub use crate::cli::handlers::{BridgeEvent, FlumeHandler};
