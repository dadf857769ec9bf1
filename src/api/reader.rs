use parking_lot::Mutex;
use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use super::{
    error::{BridgeError, BridgeResult},
    state::RuntimeSession,
    traits::BridgeHandler,
    utils::open_serial_port,
};
use crate::protocol::{
    processor::process_and_validate,
    settings::{SerialParameters, SharedSettings},
};

/// Line-oriented view of a serial connection.
pub trait LineSource: Send {
    /// Block for one line (without its terminator) or until the configured
    /// timeout, which surfaces as [`io::ErrorKind::TimedOut`].
    fn read_line(&mut self) -> io::Result<String>;

    /// Drop whatever arrived after the line just read.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens a [`LineSource`] for validated parameters.
pub trait PortOpener: Send + Sync {
    fn open(&self, params: &SerialParameters) -> BridgeResult<Box<dyn LineSource>>;
}

/// Opens real serial ports through the `serialport` crate.
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, params: &SerialParameters) -> BridgeResult<Box<dyn LineSource>> {
        let port = open_serial_port(params)?;
        Ok(Box::new(SerialLineSource::new(port)))
    }
}

/// Splits the byte stream of a serial port into `\n`-terminated lines.
pub struct SerialLineSource {
    port: Box<dyn serialport::SerialPort>,
    pending: Vec<u8>,
}

impl SerialLineSource {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> Self {
        Self {
            port,
            pending: Vec::new(),
        }
    }
}

/// Longest unterminated line kept while waiting for `\n`.
const MAX_PENDING_BYTES: usize = 4096;

/// Drop the oldest bytes of an unterminated line beyond
/// [`MAX_PENDING_BYTES`]. Returns how many were dropped.
fn cap_pending(pending: &mut Vec<u8>) -> usize {
    if pending.len() <= MAX_PENDING_BYTES || pending.contains(&b'\n') {
        return 0;
    }
    let excess = pending.len() - MAX_PENDING_BYTES;
    pending.drain(..excess);
    excess
}

/// Cut the first complete line out of `pending`, dropping `\n` and a `\r`
/// before it.
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let end = pending.iter().position(|b| *b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

impl LineSource for SerialLineSource {
    fn read_line(&mut self) -> io::Result<String> {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = take_line(&mut self.pending) {
                return Ok(line);
            }
            let n = self.port.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "serial port closed",
                ));
            }
            self.pending.extend_from_slice(&chunk[..n]);
            let dropped = cap_pending(&mut self.pending);
            if dropped > 0 {
                log::warn!("no line terminator in {MAX_PENDING_BYTES} bytes, dropped {dropped}");
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ReaderState {
    Closed,
    Opening,
    Reading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Take the connection away from the loop as soon as the in-flight read
    /// returns and close it here.
    Forceful,
    /// Let the loop close the connection itself on its next check.
    Graceful,
}

type SharedSource = Arc<Mutex<Option<Box<dyn LineSource>>>>;

/// Owns the serial connection and the thread that reads from it.
pub struct SerialReader {
    settings: SharedSettings,
    runtime: Arc<RuntimeSession>,
    handler: Arc<dyn BridgeHandler>,
    opener: Arc<dyn PortOpener>,
    index: Arc<AtomicUsize>,
    state: Arc<Mutex<ReaderState>>,
    source: SharedSource,
    worker: Option<JoinHandle<()>>,
}

impl SerialReader {
    pub fn new(
        settings: SharedSettings,
        runtime: Arc<RuntimeSession>,
        handler: Arc<dyn BridgeHandler>,
        index: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            settings,
            runtime,
            handler,
            opener: Arc::new(SystemPortOpener),
            index,
            state: Arc::new(Mutex::new(ReaderState::Closed)),
            source: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    pub fn with_opener(mut self, opener: Arc<dyn PortOpener>) -> Self {
        self.set_opener(opener);
        self
    }

    /// Takes effect on the next [`Self::start`].
    pub fn set_opener(&mut self, opener: Arc<dyn PortOpener>) {
        self.opener = opener;
    }

    pub fn state(&self) -> ReaderState {
        *self.state.lock()
    }

    /// Validate the settings, open the port and start the read loop.
    pub fn start(&mut self) -> BridgeResult<()> {
        if self.runtime.is_reading() {
            return Err(BridgeError::conflict(
                "Serial port is already open, re-select port and try again.",
            ));
        }
        // a loop that ended on its own may still be winding down
        self.join_worker();

        *self.state.lock() = ReaderState::Opening;
        let opened = self
            .settings
            .read()
            .validate()
            .and_then(|params| self.opener.open(&params).map(|source| (params, source)));
        let (params, source) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                *self.state.lock() = ReaderState::Closed;
                return Err(err);
            }
        };

        self.settings.write().clear_history();
        *self.source.lock() = Some(source);
        self.runtime.set_reading(true);
        *self.state.lock() = ReaderState::Reading;

        let worker = ReadLoop {
            settings: Arc::clone(&self.settings),
            runtime: Arc::clone(&self.runtime),
            handler: Arc::clone(&self.handler),
            index: Arc::clone(&self.index),
            state: Arc::clone(&self.state),
            source: Arc::clone(&self.source),
        };
        let spawned = std::thread::Builder::new()
            .name(format!("reader-{}", params.port_name))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("reading from {}", params.port_name);
                Ok(())
            }
            Err(err) => {
                self.runtime.set_reading(false);
                drop(self.source.lock().take());
                *self.state.lock() = ReaderState::Closed;
                Err(BridgeError::hardware("Failed to start serial reader thread").with_source(err))
            }
        }
    }

    /// Stop reading. Returns once the loop thread has exited, which can take
    /// up to one read timeout.
    pub fn stop(&mut self, mode: StopMode) {
        self.runtime.set_reading(false);
        if mode == StopMode::Forceful {
            drop(self.source.lock().take());
        }
        self.join_worker();
        drop(self.source.lock().take());
        *self.state.lock() = ReaderState::Closed;
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("serial reader thread panicked");
            }
        }
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.stop(StopMode::Forceful);
    }
}

struct ReadLoop {
    settings: SharedSettings,
    runtime: Arc<RuntimeSession>,
    handler: Arc<dyn BridgeHandler>,
    index: Arc<AtomicUsize>,
    state: Arc<Mutex<ReaderState>>,
    source: SharedSource,
}

impl ReadLoop {
    fn run(self) {
        while self.runtime.is_reading() {
            let read = {
                let mut guard = self.source.lock();
                match guard.as_mut() {
                    Some(source) => source.read_line(),
                    None => break,
                }
            };

            match read {
                Ok(line) => {
                    if !self.runtime.is_reading() {
                        break;
                    }
                    self.handle_line(&line);
                    if let Some(source) = self.source.lock().as_mut() {
                        if let Err(err) = source.discard_input() {
                            log::debug!("failed to discard pending serial input: {err}");
                        }
                    }
                }
                Err(err)
                    if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    if !self.runtime.is_reading() {
                        break;
                    }
                    let err = BridgeError::timeout("Serial port did not return a value in time")
                        .with_source(err);
                    self.handler.on_error(&err, Some(self.index()));
                }
                Err(err) => {
                    if self.runtime.is_reading() {
                        let err = BridgeError::hardware("Serial port stopped responding")
                            .with_source(err);
                        log::error!("{}", err.detailed());
                        self.handler.on_error(&err, Some(self.index()));
                        self.runtime.set_reading(false);
                    }
                    break;
                }
            }
        }

        drop(self.source.lock().take());
        *self.state.lock() = ReaderState::Closed;
        log::info!("serial reader for session {} stopped", self.index());
    }

    fn index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    fn handle_line(&self, line: &str) {
        self.runtime.set_raw_line(line);
        let value = {
            let mut settings = self.settings.write();
            settings.push_history(line);
            process_and_validate(line, &settings, true)
        };
        self.runtime.set_value(&value);
        log::debug!("read {line:?} -> {value:?}");
        self.handler.on_value_updated(&value, self.index());
    }
}
