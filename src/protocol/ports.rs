use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbDetails {
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

/// A serial port that can be picked as a reading source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortListing {
    pub name: String,
    pub kind: PortKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usb: Option<UsbDetails>,
}

impl PortListing {
    pub fn describe(&self) -> String {
        match &self.usb {
            Some(usb) => {
                let mut out = format!("{} - USB {:04x}:{:04x}", self.name, usb.vid, usb.pid);
                for part in [&usb.manufacturer, &usb.product].into_iter().flatten() {
                    out.push(' ');
                    out.push_str(part);
                }
                if let Some(serial) = &usb.serial_number {
                    out.push_str(" serial ");
                    out.push_str(serial);
                }
                out
            }
            None => format!("{} - {}", self.name, self.kind),
        }
    }
}

impl From<SerialPortInfo> for PortListing {
    fn from(info: SerialPortInfo) -> Self {
        let (kind, usb) = match info.port_type {
            SerialPortType::UsbPort(p) => (
                PortKind::Usb,
                Some(UsbDetails {
                    vid: p.vid,
                    pid: p.pid,
                    serial_number: p.serial_number,
                    manufacturer: p.manufacturer,
                    product: p.product,
                }),
            ),
            SerialPortType::PciPort => (PortKind::Pci, None),
            SerialPortType::BluetoothPort => (PortKind::Bluetooth, None),
            SerialPortType::Unknown => (PortKind::Unknown, None),
        };
        PortListing {
            name: info.port_name,
            kind,
            usb,
        }
    }
}

/// Serial ports present on this machine, USB adapters first.
pub fn enumerate_ports() -> Vec<PortListing> {
    match serialport::available_ports() {
        Ok(ports) => sort_and_dedup(ports.into_iter().map(PortListing::from).collect()),
        Err(err) => {
            log::warn!("failed to enumerate serial ports: {err}");
            Vec::new()
        }
    }
}

fn priority(name: &str) -> u8 {
    let n = name.to_lowercase();
    if n.contains("usb") {
        0
    } else if n.contains("acm") {
        1
    } else if n.contains("ttys") || n.contains("serial") || n.starts_with("com") {
        2
    } else {
        10
    }
}

/// Drop duplicate entries (macOS lists both `cu.` and `tty.` nodes, some
/// platforms report the same device twice) and order by likely relevance.
pub(crate) fn sort_and_dedup(ports: Vec<PortListing>) -> Vec<PortListing> {
    let mut seen = HashSet::new();
    let mut ports: Vec<PortListing> = ports
        .into_iter()
        .filter(|p| seen.insert(p.name.to_lowercase()))
        .collect();

    ports.sort_by(|a, b| {
        priority(&a.name)
            .cmp(&priority(&b.name))
            .then_with(|| a.name.cmp(&b.name))
    });
    ports
}
