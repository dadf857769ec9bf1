use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use strum::Display;

use super::{
    broadcast::BroadcastServer,
    error::BridgeError,
    reader::{PortOpener, ReaderState, SerialReader, StopMode},
    state::RuntimeSession,
    traits::BridgeHandler,
};
use crate::protocol::settings::{PortSettings, SharedSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Idle,
    ReadingOnly,
    ReadingAndBroadcasting,
}

/// One configured serial port: its settings, reader and broadcast server.
///
/// Toggle operations never fail outward. Faults go to the handler and the
/// session is left in a consistent state.
pub struct PortSession {
    settings: SharedSettings,
    runtime: Arc<RuntimeSession>,
    handler: Arc<dyn BridgeHandler>,
    index: Arc<AtomicUsize>,
    reader: SerialReader,
    server: BroadcastServer,
}

impl PortSession {
    pub fn new(settings: PortSettings, index: usize, handler: Arc<dyn BridgeHandler>) -> Self {
        let settings = settings.into_shared();
        let runtime = RuntimeSession::new();
        let index = Arc::new(AtomicUsize::new(index));
        let reader = SerialReader::new(
            Arc::clone(&settings),
            Arc::clone(&runtime),
            Arc::clone(&handler),
            Arc::clone(&index),
        );
        let server = BroadcastServer::new(
            Arc::clone(&settings),
            Arc::clone(&runtime),
            Arc::clone(&handler),
            Arc::clone(&index),
        );
        Self {
            settings,
            runtime,
            handler,
            index,
            reader,
            server,
        }
    }

    /// Replace how serial ports are opened.
    pub fn with_opener(mut self, opener: Arc<dyn PortOpener>) -> Self {
        self.reader.set_opener(opener);
        self
    }

    pub fn settings(&self) -> SharedSettings {
        Arc::clone(&self.settings)
    }

    pub fn runtime(&self) -> Arc<RuntimeSession> {
        Arc::clone(&self.runtime)
    }

    pub fn port_id(&self) -> String {
        self.settings.read().port_id().to_string()
    }

    pub fn index(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    /// Callbacks raised after this report the new position.
    pub fn set_index(&self, index: usize) {
        self.index.store(index, Ordering::SeqCst);
    }

    pub fn is_reading(&self) -> bool {
        self.runtime.is_reading()
    }

    pub fn is_broadcasting(&self) -> bool {
        self.runtime.is_broadcasting()
    }

    pub fn reader_state(&self) -> ReaderState {
        self.reader.state()
    }

    pub fn state(&self) -> SessionState {
        match (self.is_reading(), self.is_broadcasting()) {
            (true, true) => SessionState::ReadingAndBroadcasting,
            (true, false) => SessionState::ReadingOnly,
            (false, _) => SessionState::Idle,
        }
    }

    fn report(&self, error: BridgeError) {
        log::warn!("{}: {}", self.port_id(), error.detailed());
        self.handler.on_error(&error, Some(self.index()));
    }

    /// Start reading, or shut the whole session down when already reading.
    pub fn toggle_reading(&mut self) -> SessionState {
        if self.is_reading() {
            self.shutdown();
        } else if let Err(err) = self.reader.start() {
            self.report(err);
        }
        self.state()
    }

    /// Start or stop answering TCP clients. Starting needs an active reader
    /// that has produced at least one line.
    pub fn toggle_broadcast(&mut self) -> SessionState {
        if self.is_broadcasting() {
            self.server.stop();
        } else if !self.broadcast_enabled() {
            self.report(BridgeError::not_ready(
                "Nothing to broadcast yet: start reading and wait for a first reading.",
            ));
        } else if let Err(err) = self.server.start() {
            self.report(err);
        }
        self.state()
    }

    /// Stop broadcasting, close the port right away and forget the last
    /// reading.
    pub fn shutdown(&mut self) {
        self.close(StopMode::Forceful);
    }

    fn close(&mut self, mode: StopMode) {
        if self.is_reading() || self.is_broadcasting() {
            log::info!("closing {} ({mode:?})", self.port_id());
        }
        self.server.stop();
        self.reader.stop(mode);
        self.runtime.clear_latest();
    }

    /// Stop the session if it is running, then apply `edit` to the settings.
    /// The session stays idle afterwards.
    pub fn reconfigure(&mut self, edit: impl FnOnce(&mut PortSettings)) -> SessionState {
        if self.state() != SessionState::Idle {
            self.shutdown();
        }
        edit(&mut *self.settings.write());
        self.state()
    }

    /// Give up the session. The read loop closes the port itself once the
    /// read in flight returns.
    pub fn remove(mut self) {
        self.close(StopMode::Graceful);
    }

    // Display strings for a front end.

    pub fn reading_button_text(&self) -> &'static str {
        if self.is_reading() {
            "Stop"
        } else {
            "Start"
        }
    }

    pub fn broadcast_button_text(&self) -> &'static str {
        if self.is_broadcasting() {
            "Stop"
        } else {
            "Start"
        }
    }

    /// Whether starting the broadcast makes sense right now.
    pub fn broadcast_enabled(&self) -> bool {
        self.is_reading() && !self.runtime.latest_raw_line().is_empty()
    }

    pub fn broadcast_endpoint(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    pub fn status_text(&self) -> String {
        let port = self.port_id();
        match (self.state(), self.broadcast_endpoint()) {
            (SessionState::ReadingAndBroadcasting, Some(endpoint)) => {
                format!("Receiving readings from {port} and broadcasting over {endpoint}")
            }
            (SessionState::ReadingAndBroadcasting, None) | (SessionState::ReadingOnly, _) => {
                format!("Receiving readings from {port}, not broadcasting currently")
            }
            (SessionState::Idle, _) => format!("Currently not doing anything with {port}"),
        }
    }
}

impl Drop for PortSession {
    fn drop(&mut self) {
        self.close(StopMode::Graceful);
    }
}
