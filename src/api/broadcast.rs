use parking_lot::Mutex;
use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    error::{BridgeError, BridgeResult},
    state::RuntimeSession,
    traits::BridgeHandler,
};
use crate::protocol::{
    constants::BROADCAST_POLL_INTERVAL, network::discover_bind_address,
    processor::transmit_payload, settings::SharedSettings,
};

const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

type SharedListener = Arc<Mutex<Option<TcpListener>>>;

/// One-shot TCP responder: every accepted client gets the latest value and
/// is disconnected.
pub struct BroadcastServer {
    settings: SharedSettings,
    runtime: Arc<RuntimeSession>,
    handler: Arc<dyn BridgeHandler>,
    index: Arc<AtomicUsize>,
    listener: SharedListener,
    local_addr: Option<SocketAddr>,
    worker: Option<JoinHandle<()>>,
}

impl BroadcastServer {
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
            index,
            listener: Arc::new(Mutex::new(None)),
            local_addr: None,
            worker: None,
        }
    }

    /// Address the listener is bound to, while broadcasting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.filter(|_| self.runtime.is_broadcasting())
    }

    /// Bind the listener and start the accept loop. Does nothing when the
    /// loop is already running.
    pub fn start(&mut self) -> BridgeResult<()> {
        if self.runtime.is_broadcasting() {
            return Ok(());
        }
        self.join_worker();

        let (address, port) = {
            let settings = self.settings.read();
            (settings.broadcast_address(), settings.broadcast_port())
        };
        let ip = match address {
            Some(ip) => ip,
            None => discover_bind_address()?,
        };

        let listener = TcpListener::bind((ip, port))
            .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
            .map_err(|err| {
                self.runtime.set_broadcasting(false);
                BridgeError::network(format!("Could not listen on {ip}:{port}")).with_source(err)
            })?;
        let local_addr = listener.local_addr().unwrap_or(SocketAddr::new(ip, port));

        *self.listener.lock() = Some(listener);
        self.local_addr = Some(local_addr);
        self.runtime.set_broadcasting(true);

        let worker = AcceptLoop {
            settings: Arc::clone(&self.settings),
            runtime: Arc::clone(&self.runtime),
            handler: Arc::clone(&self.handler),
            index: Arc::clone(&self.index),
            listener: Arc::clone(&self.listener),
        };
        match thread::Builder::new()
            .name(format!("broadcast-{local_addr}"))
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("broadcasting readings on {local_addr}");
                Ok(())
            }
            Err(err) => {
                self.runtime.set_broadcasting(false);
                drop(self.listener.lock().take());
                Err(BridgeError::network("Failed to start broadcast thread").with_source(err))
            }
        }
    }

    /// Stop accepting and release the socket. Safe to call when stopped.
    pub fn stop(&mut self) {
        self.runtime.set_broadcasting(false);
        drop(self.listener.lock().take());
        self.join_worker();
        self.local_addr = None;
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("broadcast thread panicked");
            }
        }
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptLoop {
    settings: SharedSettings,
    runtime: Arc<RuntimeSession>,
    handler: Arc<dyn BridgeHandler>,
    index: Arc<AtomicUsize>,
    listener: SharedListener,
}

impl AcceptLoop {
    fn run(self) {
        'poll: while self.runtime.is_broadcasting() && self.runtime.is_reading() {
            let broadcast_invalid = self.settings.read().broadcast_invalid();
            // clients stay queued in the backlog until there is something to send
            if let Some(payload) = transmit_payload(&self.runtime.latest_value(), broadcast_invalid) {
                loop {
                    let accepted = match self.listener.lock().as_ref() {
                        Some(listener) => listener.accept(),
                        None => break 'poll,
                    };
                    match accepted {
                        Ok((stream, peer)) => send_detached(stream, peer, payload.clone()),
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            let err = BridgeError::network("Failed to accept broadcast client")
                                .with_source(err);
                            log::error!("{}", err.detailed());
                            self.handler
                                .on_error(&err, Some(self.index.load(Ordering::SeqCst)));
                            break 'poll;
                        }
                    }
                }
            }
            thread::sleep(BROADCAST_POLL_INTERVAL);
        }

        self.runtime.set_broadcasting(false);
        drop(self.listener.lock().take());
        log::info!(
            "broadcast for session {} stopped",
            self.index.load(Ordering::SeqCst)
        );
    }
}

/// Write the payload on a short-lived thread so a slow client cannot stall
/// the accept loop.
fn send_detached(stream: TcpStream, peer: SocketAddr, payload: String) {
    let spawned = thread::Builder::new()
        .name(format!("client-{peer}"))
        .spawn(move || match send_payload(stream, payload.as_bytes()) {
            Ok(()) => log::debug!("sent {payload:?} to {peer}"),
            Err(err) => log::warn!("failed to send reading to {peer}: {err}"),
        });
    if let Err(err) = spawned {
        log::warn!("failed to spawn sender for {peer}: {err}");
    }
}

fn send_payload(mut stream: TcpStream, payload: &[u8]) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    stream.write_all(payload)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)
}
