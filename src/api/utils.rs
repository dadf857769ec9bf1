use std::io;

use super::error::{BridgeError, BridgeResult};
use crate::protocol::settings::SerialParameters;

const IN_USE: &str =
    "Another process on the system already has the specified COM port open. Re-select port and try again.";

fn is_conflict(err: &serialport::Error) -> bool {
    match err.kind() {
        serialport::ErrorKind::Io(kind) => matches!(
            kind,
            io::ErrorKind::PermissionDenied | io::ErrorKind::AddrInUse | io::ErrorKind::WouldBlock
        ),
        _ => {
            let description = err.to_string().to_lowercase();
            description.contains("busy")
                || description.contains("denied")
                || description.contains("in use")
        }
    }
}

fn classify_open_error(port: &str, err: serialport::Error) -> BridgeError {
    if is_conflict(&err) {
        BridgeError::conflict(IN_USE).with_source(err)
    } else {
        BridgeError::hardware(format!("Could not connect to serial port: {port}")).with_source(err)
    }
}

/// Open a serial port with the given parameters, enabling exclusive access on
/// Unix systems, and check that the handle actually answers.
pub fn open_serial_port(params: &SerialParameters) -> BridgeResult<Box<dyn serialport::SerialPort>> {
    let port = params.port_name.as_str();
    let builder = params.apply_builder(serialport::new(port, params.baud_rate));

    #[cfg(unix)]
    let handle: Box<dyn serialport::SerialPort> = {
        let mut handle = builder
            .open_native()
            .map_err(|err| classify_open_error(port, err))?;
        handle
            .set_exclusive(true)
            .map_err(|err| BridgeError::conflict(IN_USE).with_source(err))?;
        Box::new(handle)
    };

    #[cfg(not(unix))]
    let handle: Box<dyn serialport::SerialPort> = builder
        .open()
        .map_err(|err| classify_open_error(port, err))?;

    // A handle that cannot report its input queue never connected.
    handle.bytes_to_read().map_err(|err| {
        BridgeError::hardware(format!("Could not connect to serial port: {port}")).with_source(err)
    })?;

    log::info!(
        "opened {port} at {} baud, {} data bits, parity {}, {} stop bits, flow {}",
        params.baud_rate,
        params.data_bits,
        params.parity,
        params.stop_bits,
        params.flow_control
    );
    Ok(handle)
}
