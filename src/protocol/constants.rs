use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumIter, EnumString};

/// Canonical "no valid value" marker.
pub const INVALID_VALUE: &str = "NAN";

pub const DEFAULT_BROADCAST_PORT: u16 = 5050;
pub const MIN_TIMEOUT_MS: u32 = 500;
pub const DEFAULT_TIMEOUT_MS: u32 = 500;

/// How often the accept loop re-evaluates the latest value and checks for
/// pending clients.
pub const BROADCAST_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(value: Parity) -> Self {
        match value {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum StopBits {
    #[strum(to_string = "1")]
    One,
    #[strum(to_string = "2")]
    Two,
}

impl StopBits {
    /// Resolve the numeric setting; anything but 1 or 2 is unresolvable.
    pub fn from_count(count: u8) -> Option<Self> {
        match count {
            1 => Some(StopBits::One),
            2 => Some(StopBits::Two),
            _ => None,
        }
    }

    pub fn count(self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(value: StopBits) -> Self {
        match value {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum FlowControl {
    #[serde(rename = "None")]
    #[strum(to_string = "None")]
    None,
    #[serde(rename = "CTS/RTS")]
    #[strum(to_string = "CTS/RTS", serialize = "ctsrts", serialize = "hardware")]
    CtsRts,
    #[serde(rename = "DSR/DTR")]
    #[strum(to_string = "DSR/DTR", serialize = "dsrdtr")]
    DsrDtr,
    #[serde(rename = "XON/XOFF")]
    #[strum(to_string = "XON/XOFF", serialize = "xonxoff", serialize = "software")]
    XonXoff,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(value: FlowControl) -> Self {
        match value {
            FlowControl::None => serialport::FlowControl::None,
            // The backend only knows "hardware"; DSR/DTR handshaking rides on it.
            FlowControl::CtsRts | FlowControl::DsrDtr => serialport::FlowControl::Hardware,
            FlowControl::XonXoff => serialport::FlowControl::Software,
        }
    }
}

/// Resolve a data-bits count to the backend type.
pub fn data_bits_from_count(count: u8) -> Option<serialport::DataBits> {
    match count {
        5 => Some(serialport::DataBits::Five),
        6 => Some(serialport::DataBits::Six),
        7 => Some(serialport::DataBits::Seven),
        8 => Some(serialport::DataBits::Eight),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn flow_control_accepts_display_and_aliases() {
        assert_eq!(FlowControl::from_str("CTS/RTS").unwrap(), FlowControl::CtsRts);
        assert_eq!(FlowControl::from_str("xon/xoff").unwrap(), FlowControl::XonXoff);
        assert_eq!(FlowControl::from_str("hardware").unwrap(), FlowControl::CtsRts);
        assert_eq!(FlowControl::XonXoff.to_string(), "XON/XOFF");
        assert!(FlowControl::from_str("rts-only").is_err());
    }

    #[test]
    fn parity_round_trips_through_text() {
        assert_eq!(Parity::from_str("even").unwrap(), Parity::Even);
        assert_eq!(Parity::Odd.to_string(), "Odd");
    }

    #[test]
    fn stop_bits_only_resolve_one_and_two() {
        assert_eq!(StopBits::from_count(1), Some(StopBits::One));
        assert_eq!(StopBits::from_count(2), Some(StopBits::Two));
        assert_eq!(StopBits::from_count(3), None);
        assert_eq!(StopBits::Two.to_string(), "2");
    }
}
