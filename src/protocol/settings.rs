use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, net::IpAddr, sync::Arc, time::Duration};

use super::{
    constants::{
        data_bits_from_count, FlowControl, Parity, StopBits, DEFAULT_BROADCAST_PORT,
        DEFAULT_TIMEOUT_MS, MIN_TIMEOUT_MS,
    },
    error::{BridgeError, BridgeResult},
    observer::{Observers, PropertyChanged},
};

/// Settings shared between the reader thread, the broadcast thread and the
/// owner of a session.
pub type SharedSettings = Arc<RwLock<PortSettings>>;

/// Serial parameters resolved from a validated [`PortSettings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParameters {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub timeout: Duration,
}

impl SerialParameters {
    pub fn apply_builder(&self, b: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
        let b = match data_bits_from_count(self.data_bits) {
            Some(bits) => b.data_bits(bits),
            None => b,
        };
        b.stop_bits(self.stop_bits.into())
            .parity(self.parity.into())
            .flow_control(self.flow_control.into())
            .timeout(self.timeout)
    }
}

/// Plain serialisable form of [`PortSettings`].
///
/// Loading goes through the setters, so a file cannot smuggle in values the
/// clamping rules would reject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettingsRecord {
    pub port_id: String,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<u8>,
    pub parity: Option<Parity>,
    pub flow_control: Option<FlowControl>,
    pub timeout_ms: Option<u32>,
    pub stability_active: bool,
    pub stability_snippet: Option<String>,
    pub stability_start_pos: i64,
    pub sequence_active: bool,
    pub required_identical_count: i64,
    pub weight_start_pos: Option<i64>,
    pub weight_end_pos: Option<i64>,
    pub required_length: Option<i64>,
    pub broadcast_port: i64,
    pub broadcast_address: Option<IpAddr>,
    pub broadcast_invalid: bool,
}

/// Per-port configuration: serial parameters, parsing rules and broadcast
/// target, plus the sliding window of recent raw readings used by the
/// identical-readings rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "PortSettingsRecord", into = "PortSettingsRecord")]
pub struct PortSettings {
    port_id: String,
    baud_rate: Option<u32>,
    data_bits: Option<u8>,
    stop_bits: Option<u8>,
    parity: Option<Parity>,
    flow_control: Option<FlowControl>,
    timeout_ms: Option<u32>,

    stability_active: bool,
    stability_snippet: Option<String>,
    stability_start_pos: u32,

    sequence_active: bool,
    required_identical_count: usize,
    /// Most recent first, never longer than `required_identical_count`.
    history: VecDeque<String>,

    weight_start_pos: Option<u32>,
    weight_end_pos: Option<u32>,
    required_length: Option<u32>,

    broadcast_port: u16,
    broadcast_address: Option<IpAddr>,
    broadcast_invalid: bool,

    observers: Observers,
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettingsRecord::default().into()
    }
}

impl From<PortSettingsRecord> for PortSettings {
    fn from(record: PortSettingsRecord) -> Self {
        let mut settings = PortSettings {
            port_id: String::new(),
            baud_rate: None,
            data_bits: None,
            stop_bits: None,
            parity: None,
            flow_control: None,
            timeout_ms: Some(DEFAULT_TIMEOUT_MS),
            stability_active: false,
            stability_snippet: None,
            stability_start_pos: 0,
            sequence_active: false,
            required_identical_count: 1,
            history: VecDeque::new(),
            weight_start_pos: None,
            weight_end_pos: None,
            required_length: None,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            broadcast_address: None,
            broadcast_invalid: false,
            observers: Observers::new(),
        };
        settings.set_port_id(&record.port_id);
        settings.set_baud_rate(record.baud_rate);
        settings.set_data_bits(record.data_bits);
        settings.set_stop_bits(record.stop_bits);
        settings.set_parity(record.parity);
        settings.set_flow_control(record.flow_control);
        settings.set_timeout_ms(record.timeout_ms);
        settings.set_stability_active(record.stability_active);
        settings.set_stability_snippet(record.stability_snippet);
        settings.set_stability_start_pos(record.stability_start_pos);
        settings.set_sequence_active(record.sequence_active);
        settings.set_required_identical_count(record.required_identical_count);
        settings.set_weight_start_pos(record.weight_start_pos);
        settings.set_weight_end_pos(record.weight_end_pos);
        settings.set_required_length(record.required_length);
        settings.set_broadcast_port(record.broadcast_port);
        settings.set_broadcast_address(record.broadcast_address);
        settings.set_broadcast_invalid(record.broadcast_invalid);
        settings
    }
}

impl From<PortSettings> for PortSettingsRecord {
    fn from(settings: PortSettings) -> Self {
        settings.to_record()
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

impl PortSettings {
    pub fn new(port_id: &str) -> Self {
        let mut settings = Self::default();
        settings.set_port_id(port_id);
        settings
    }

    pub fn into_shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }

    pub fn to_record(&self) -> PortSettingsRecord {
        PortSettingsRecord {
            port_id: self.port_id.clone(),
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            flow_control: self.flow_control,
            timeout_ms: self.timeout_ms,
            stability_active: self.stability_active,
            stability_snippet: self.stability_snippet.clone(),
            stability_start_pos: self.stability_start_pos as i64,
            sequence_active: self.sequence_active,
            required_identical_count: self.required_identical_count as i64,
            weight_start_pos: self.weight_start_pos.map(i64::from),
            weight_end_pos: self.weight_end_pos.map(i64::from),
            required_length: self.required_length.map(i64::from),
            broadcast_port: self.broadcast_port as i64,
            broadcast_address: self.broadcast_address,
            broadcast_invalid: self.broadcast_invalid,
        }
    }

    /// Subscribe to property-change notifications.
    pub fn subscribe(&self) -> flume::Receiver<PropertyChanged> {
        self.observers.subscribe()
    }

    fn changed(&self, property: &'static str) {
        self.observers.notify(property);
    }

    // Identity

    pub fn port_id(&self) -> &str {
        &self.port_id
    }

    /// The first non-blank assignment wins; later ones are ignored.
    pub fn set_port_id(&mut self, port_id: &str) {
        if !self.port_id.trim().is_empty() {
            if self.port_id != port_id {
                log::debug!(
                    "ignoring port id change {} -> {}: identity is fixed",
                    self.port_id,
                    port_id
                );
            }
            return;
        }
        if self.port_id != port_id {
            self.port_id = port_id.to_string();
            self.changed("port_id");
        }
    }

    // Connection parameters

    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    pub fn set_baud_rate(&mut self, baud_rate: Option<u32>) {
        if self.baud_rate != baud_rate {
            self.baud_rate = baud_rate;
            self.changed("baud_rate");
        }
    }

    pub fn data_bits(&self) -> Option<u8> {
        self.data_bits
    }

    pub fn set_data_bits(&mut self, data_bits: Option<u8>) {
        if self.data_bits != data_bits {
            self.data_bits = data_bits;
            self.changed("data_bits");
        }
    }

    pub fn stop_bits(&self) -> Option<u8> {
        self.stop_bits
    }

    pub fn set_stop_bits(&mut self, stop_bits: Option<u8>) {
        if self.stop_bits != stop_bits {
            self.stop_bits = stop_bits;
            self.changed("stop_bits");
        }
    }

    pub fn parity(&self) -> Option<Parity> {
        self.parity
    }

    pub fn set_parity(&mut self, parity: Option<Parity>) {
        if self.parity != parity {
            self.parity = parity;
            self.changed("parity");
        }
    }

    pub fn flow_control(&self) -> Option<FlowControl> {
        self.flow_control
    }

    pub fn set_flow_control(&mut self, flow_control: Option<FlowControl>) {
        if self.flow_control != flow_control {
            self.flow_control = flow_control;
            self.changed("flow_control");
        }
    }

    pub fn timeout_ms(&self) -> Option<u32> {
        self.timeout_ms
    }

    /// Unset falls back to the default; values under the minimum are stored
    /// as given and rejected when the port is opened.
    pub fn set_timeout_ms(&mut self, timeout_ms: Option<u32>) {
        let timeout_ms = Some(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        if self.timeout_ms != timeout_ms {
            self.timeout_ms = timeout_ms;
            self.changed("timeout_ms");
        }
    }

    // Stability indicator

    pub fn stability_active(&self) -> bool {
        self.stability_active
    }

    pub fn set_stability_active(&mut self, active: bool) {
        if self.stability_active != active {
            self.stability_active = active;
            self.changed("stability_active");
        }
    }

    pub fn stability_snippet(&self) -> Option<&str> {
        self.stability_snippet.as_deref()
    }

    pub fn set_stability_snippet(&mut self, snippet: Option<String>) {
        if self.stability_snippet != snippet {
            self.stability_snippet = snippet;
            self.changed("stability_snippet");
        }
    }

    /// 1-based position of the snippet within a line.
    pub fn stability_start_pos(&self) -> u32 {
        self.stability_start_pos
    }

    pub fn set_stability_start_pos(&mut self, position: i64) {
        let position = if position < 0 { 1 } else { clamp_u32(position) };
        if self.stability_start_pos != position {
            self.stability_start_pos = position;
            self.changed("stability_start_pos");
        }
    }

    // Identical-readings sequence

    pub fn sequence_active(&self) -> bool {
        self.sequence_active
    }

    pub fn set_sequence_active(&mut self, active: bool) {
        if self.sequence_active != active {
            self.sequence_active = active;
            self.changed("sequence_active");
        }
    }

    pub fn required_identical_count(&self) -> usize {
        self.required_identical_count
    }

    /// Values below one are coerced to one; the history is trimmed to the new
    /// capacity right away.
    pub fn set_required_identical_count(&mut self, count: i64) {
        let count = usize::try_from(count.max(1)).unwrap_or(usize::MAX);
        if self.required_identical_count != count {
            self.required_identical_count = count;
            if self.history.len() > count {
                self.history.truncate(count);
                self.changed("history");
            }
            self.changed("required_identical_count");
        }
    }

    /// Recent raw readings, most recent first.
    pub fn history(&self) -> &VecDeque<String> {
        &self.history
    }

    /// Record a raw reading in the sliding window. Only tracked while the
    /// identical-readings rule is active.
    pub fn push_history(&mut self, raw_line: &str) {
        if !self.sequence_active {
            return;
        }
        self.history.push_front(raw_line.to_string());
        self.history.truncate(self.required_identical_count);
        self.changed("history");
    }

    pub fn clear_history(&mut self) {
        if !self.history.is_empty() {
            self.history.clear();
            self.changed("history");
        }
    }

    // Value extraction window

    pub fn weight_start_pos(&self) -> Option<u32> {
        self.weight_start_pos
    }

    /// Cannot move past the end position; negative values become 1.
    pub fn set_weight_start_pos(&mut self, position: Option<i64>) {
        let position = position.map(|value| match self.weight_end_pos {
            Some(end) if end > 0 && value > i64::from(end) => end,
            _ if value < 0 => 1,
            _ => clamp_u32(value),
        });
        if self.weight_start_pos != position {
            self.weight_start_pos = position;
            self.changed("weight_start_pos");
        }
    }

    pub fn weight_end_pos(&self) -> Option<u32> {
        self.weight_end_pos
    }

    /// Cannot move before the start position; negative values become 1.
    pub fn set_weight_end_pos(&mut self, position: Option<i64>) {
        let position = position.map(|value| match self.weight_start_pos {
            Some(start) if start > 0 && i64::from(start) > value => start,
            _ if value < 0 => 1,
            _ => clamp_u32(value),
        });
        if self.weight_end_pos != position {
            self.weight_end_pos = position;
            self.changed("weight_end_pos");
        }
    }

    pub fn required_length(&self) -> Option<u32> {
        self.required_length
    }

    pub fn set_required_length(&mut self, length: Option<i64>) {
        let length = length.map(|value| clamp_u32(value.max(0)));
        if self.required_length != length {
            self.required_length = length;
            self.changed("required_length");
        }
    }

    /// Whether raw lines must have exactly [`Self::required_length`] characters.
    pub fn must_conform_to_length(&self) -> bool {
        matches!(self.required_length, Some(length) if length > 0)
    }

    // Output

    pub fn broadcast_port(&self) -> u16 {
        self.broadcast_port
    }

    /// Non-positive values fall back to the default port, values above the
    /// TCP range are clamped to 65535.
    pub fn set_broadcast_port(&mut self, port: i64) {
        let port = if port <= 0 {
            DEFAULT_BROADCAST_PORT
        } else {
            u16::try_from(port).unwrap_or(u16::MAX)
        };
        if self.broadcast_port != port {
            self.broadcast_port = port;
            self.changed("broadcast_port");
        }
    }

    /// Bind address override; `None` means discover one from the network
    /// interfaces.
    pub fn broadcast_address(&self) -> Option<IpAddr> {
        self.broadcast_address
    }

    pub fn set_broadcast_address(&mut self, address: Option<IpAddr>) {
        if self.broadcast_address != address {
            self.broadcast_address = address;
            self.changed("broadcast_address");
        }
    }

    /// Whether clients are sent `NAN` while no valid reading exists.
    pub fn broadcast_invalid(&self) -> bool {
        self.broadcast_invalid
    }

    pub fn set_broadcast_invalid(&mut self, enabled: bool) {
        if self.broadcast_invalid != enabled {
            self.broadcast_invalid = enabled;
            self.changed("broadcast_invalid");
        }
    }

    /// Check everything needed to open the port and resolve it into
    /// [`SerialParameters`].
    pub fn validate(&self) -> BridgeResult<SerialParameters> {
        if self.port_id.trim().is_empty() {
            return Err(BridgeError::configuration("Selected port is blank."));
        }
        let baud_rate = self.baud_rate.filter(|baud| *baud > 0).ok_or_else(|| {
            BridgeError::configuration(
                "An invalid baud rate has been specified. Reselect baud rate and try again.",
            )
        })?;
        let data_bits = self
            .data_bits
            .filter(|bits| data_bits_from_count(*bits).is_some())
            .ok_or_else(|| {
                BridgeError::configuration(
                    "An invalid data bits value has been specified. Reselect data bits and try again.",
                )
            })?;
        let stop_bits = self
            .stop_bits
            .and_then(StopBits::from_count)
            .ok_or_else(|| BridgeError::configuration("Invalid value for stop bits encountered."))?;
        let parity = self
            .parity
            .ok_or_else(|| BridgeError::configuration("Invalid value for parity encountered."))?;
        let flow_control = self.flow_control.ok_or_else(|| {
            BridgeError::configuration(
                "An invalid flow control value has been specified. Reselect flow control and try again.",
            )
        })?;
        let timeout_ms = self
            .timeout_ms
            .filter(|ms| *ms >= MIN_TIMEOUT_MS)
            .ok_or_else(|| {
                BridgeError::configuration(
                    "An invalid timeout value has been specified. Reselect timeout and try again.",
                )
            })?;

        Ok(SerialParameters {
            port_name: self.port_id.clone(),
            baud_rate,
            data_bits,
            stop_bits,
            parity,
            flow_control,
            timeout: Duration::from_millis(u64::from(timeout_ms)),
        })
    }

    /// Short form such as `9600 8N1` for logs.
    pub fn line_summary(&self) -> String {
        let parity = match self.parity {
            Some(Parity::None) => "N",
            Some(Parity::Odd) => "O",
            Some(Parity::Even) => "E",
            None => "?",
        };
        format!(
            "{} {}{}{}",
            self.baud_rate
                .map(|baud| baud.to_string())
                .unwrap_or_else(|| "?".to_string()),
            self.data_bits
                .map(|bits| bits.to_string())
                .unwrap_or_else(|| "?".to_string()),
            parity,
            self.stop_bits
                .map(|bits| bits.to_string())
                .unwrap_or_else(|| "?".to_string()),
        )
    }
}
