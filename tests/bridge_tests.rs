use std::{
    collections::HashMap,
    io::{self, Read},
    net::{IpAddr, Ipv4Addr, TcpListener, TcpStream},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use scalecast::{
    core::SessionRegistry, BridgeEvent, BridgeError, BridgeResult, ErrorKind, FlowControl,
    FlumeHandler, LineSource, Parity, PortOpener, PortSession, PortSettings, PortSettingsRecord,
    SerialParameters, SessionState, INVALID_VALUE,
};

type Script = flume::Sender<io::Result<String>>;

/// Serial stand-in fed from a channel; an empty channel behaves like a read
/// timeout.
struct ScriptedSource {
    lines: flume::Receiver<io::Result<String>>,
    timeout: Duration,
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self) -> io::Result<String> {
        match self.lines.recv_timeout(self.timeout) {
            Ok(line) => line,
            Err(flume::RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "Operation timed out"))
            }
            Err(flume::RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "script finished"))
            }
        }
    }
}

#[derive(Default)]
struct ScriptedOpener {
    ports: HashMap<String, flume::Receiver<io::Result<String>>>,
}

impl ScriptedOpener {
    fn port(&mut self, name: &str) -> Script {
        let (tx, rx) = flume::unbounded();
        self.ports.insert(name.to_string(), rx);
        tx
    }
}

impl PortOpener for ScriptedOpener {
    fn open(&self, params: &SerialParameters) -> BridgeResult<Box<dyn LineSource>> {
        let lines = self.ports.get(&params.port_name).cloned().ok_or_else(|| {
            BridgeError::hardware(format!(
                "Could not connect to serial port: {}",
                params.port_name
            ))
        })?;
        Ok(Box::new(ScriptedSource {
            lines,
            timeout: params.timeout,
        }))
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn settings(port: &str, broadcast_port: u16) -> PortSettings {
    PortSettingsRecord {
        port_id: port.to_string(),
        baud_rate: Some(9600),
        data_bits: Some(8),
        stop_bits: Some(1),
        parity: Some(Parity::None),
        flow_control: Some(FlowControl::None),
        timeout_ms: Some(500),
        weight_start_pos: Some(1),
        weight_end_pos: Some(6),
        broadcast_port: i64::from(broadcast_port),
        broadcast_address: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        ..Default::default()
    }
    .into()
}

fn session_with(
    settings: PortSettings,
) -> (PortSession, Script, flume::Receiver<BridgeEvent>) {
    let mut opener = ScriptedOpener::default();
    let script = opener.port(settings.port_id());
    let (handler, events) = FlumeHandler::new();
    let session = PortSession::new(settings, 0, Arc::new(handler)).with_opener(Arc::new(opener));
    (session, script, events)
}

fn wait_for(
    events: &flume::Receiver<BridgeEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&BridgeEvent) -> bool,
) -> Option<BridgeEvent> {
    let deadline = Instant::now() + timeout;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

fn wait_value(events: &flume::Receiver<BridgeEvent>) -> Option<String> {
    match wait_for(events, Duration::from_secs(3), |e| {
        matches!(e, BridgeEvent::ValueUpdated { .. })
    })? {
        BridgeEvent::ValueUpdated { value, .. } => Some(value),
        _ => None,
    }
}

fn wait_error(events: &flume::Receiver<BridgeEvent>, kind: ErrorKind) -> Option<String> {
    match wait_for(events, Duration::from_secs(3), |e| {
        matches!(e, BridgeEvent::Error { kind: k, .. } if *k == kind)
    })? {
        BridgeEvent::Error { message, .. } => Some(message),
        _ => None,
    }
}

fn fetch(port: u16) -> io::Result<String> {
    let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port))?;
    stream.set_read_timeout(Some(Duration::from_secs(3)))?;
    let mut out = String::new();
    stream.read_to_string(&mut out)?;
    Ok(out)
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    check()
}

#[test]
fn test_lines_become_values() {
    let (mut session, script, events) = session_with(settings("SCRIPT0", free_port()));
    assert_eq!(session.toggle_reading(), SessionState::ReadingOnly);
    assert_eq!(session.reading_button_text(), "Stop");

    script.send(Ok("12.5kg".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("12.5"));
    assert_eq!(session.runtime().latest_raw_line().as_str(), "12.5kg");
    assert_eq!(session.runtime().latest_value().as_str(), "12.5");

    script.send(Ok("1.2.3".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some(INVALID_VALUE));

    assert_eq!(session.toggle_reading(), SessionState::Idle);
    assert!(session.runtime().latest_value().is_empty());
    assert_eq!(session.status_text(), "Currently not doing anything with SCRIPT0");
}

#[test]
fn test_invalid_settings_are_reported_not_thrown() {
    let mut settings = settings("SCRIPT0", free_port());
    settings.set_baud_rate(None);
    let (mut session, _script, events) = session_with(settings);

    assert_eq!(session.toggle_reading(), SessionState::Idle);
    let message = wait_error(&events, ErrorKind::Configuration).unwrap();
    assert!(message.contains("baud rate"));
}

#[test]
fn test_unknown_port_is_a_hardware_error() {
    let (handler, events) = FlumeHandler::new();
    let mut session = PortSession::new(settings("MISSING", free_port()), 0, Arc::new(handler))
        .with_opener(Arc::new(ScriptedOpener::default()));
    assert_eq!(session.toggle_reading(), SessionState::Idle);
    assert!(wait_error(&events, ErrorKind::Hardware).is_some());
}

#[test]
fn test_read_timeouts_are_reported_and_reading_continues() {
    let (mut session, script, events) = session_with(settings("SCRIPT0", free_port()));
    session.toggle_reading();

    let message = wait_error(&events, ErrorKind::Timeout).unwrap();
    assert!(message.starts_with("Serial port did not return a value in time"));
    assert!(session.is_reading());

    script.send(Ok("42".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("42"));
}

#[test]
fn test_port_failure_stops_reading() {
    let (mut session, script, events) = session_with(settings("SCRIPT0", free_port()));
    session.toggle_reading();
    script
        .send(Err(io::Error::new(io::ErrorKind::Other, "device unplugged")))
        .unwrap();

    assert!(wait_error(&events, ErrorKind::Hardware).is_some());
    assert!(wait_until(Duration::from_secs(2), || session.state() == SessionState::Idle));

    // the session can be started again afterwards
    assert_eq!(session.toggle_reading(), SessionState::ReadingOnly);
    script.send(Ok("3.5".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("3.5"));
}

#[test]
fn test_stop_waits_at_most_one_read_timeout() {
    let (mut session, _script, _events) = session_with(settings("SCRIPT0", free_port()));
    session.toggle_reading();
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert_eq!(session.toggle_reading(), SessionState::Idle);
    assert!(started.elapsed() < Duration::from_millis(1500));
}

#[test]
fn test_sequence_mode_needs_identical_lines() {
    let mut settings = settings("SCRIPT0", free_port());
    settings.set_sequence_active(true);
    settings.set_required_identical_count(2);
    let (mut session, script, events) = session_with(settings);
    session.toggle_reading();

    script.send(Ok("5.0".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some(INVALID_VALUE));
    script.send(Ok("5.0".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("5.0"));
    script.send(Ok("4.9".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some(INVALID_VALUE));

    let history: Vec<String> = session.settings().read().history().iter().cloned().collect();
    assert_eq!(history, ["4.9", "5.0"]);
}

#[test]
fn test_broadcast_requires_a_reading() {
    let (mut session, _script, events) = session_with(settings("SCRIPT0", free_port()));
    assert_eq!(session.toggle_broadcast(), SessionState::Idle);
    assert!(wait_error(&events, ErrorKind::NotReady).is_some());

    session.toggle_reading();
    assert!(!session.broadcast_enabled());
    assert_eq!(session.toggle_broadcast(), SessionState::ReadingOnly);
    assert!(wait_error(&events, ErrorKind::NotReady).is_some());
}

#[test]
fn test_each_client_gets_the_latest_value_once() {
    let port = free_port();
    let (mut session, script, events) = session_with(settings("SCRIPT0", port));
    session.toggle_reading();
    script.send(Ok("12.5kg".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("12.5"));

    assert!(session.broadcast_enabled());
    assert_eq!(session.toggle_broadcast(), SessionState::ReadingAndBroadcasting);
    assert_eq!(session.broadcast_button_text(), "Stop");
    assert_eq!(
        session.status_text(),
        format!("Receiving readings from SCRIPT0 and broadcasting over 127.0.0.1:{port}")
    );

    assert_eq!(fetch(port).unwrap(), "12.5");
    assert_eq!(fetch(port).unwrap(), "12.5");

    script.send(Ok("13,75kg".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("13,75"));
    assert_eq!(fetch(port).unwrap(), "13,75");

    assert_eq!(session.toggle_broadcast(), SessionState::ReadingOnly);
    assert_eq!(
        session.status_text(),
        "Receiving readings from SCRIPT0, not broadcasting currently"
    );
    assert!(wait_until(Duration::from_secs(2), || fetch(port).is_err()));
}

#[test]
fn test_clients_wait_while_reading_is_invalid() {
    let port = free_port();
    let (mut session, script, events) = session_with(settings("SCRIPT0", port));
    session.toggle_reading();
    script.send(Ok("1.2.3".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some(INVALID_VALUE));
    assert_eq!(session.toggle_broadcast(), SessionState::ReadingAndBroadcasting);

    let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    client
        .set_read_timeout(Some(Duration::from_millis(700)))
        .unwrap();
    let mut buf = [0u8; 16];
    assert!(client.read(&mut buf).is_err());

    script.send(Ok("7.25".to_string())).unwrap();
    assert_eq!(wait_value(&events).as_deref(), Some("7.25"));
    client.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    let mut out = String::new();
    client.read_to_string(&mut out).unwrap();
    assert_eq!(out, "7.25");
}

#[test]
fn test_broadcast_invalid_sends_sentinel() {
    let port = free_port();
    let mut settings = settings("SCRIPT0", port);
    settings.set_broadcast_invalid(true);
    let (mut session, script, events) = session_with(settings);
    session.toggle_reading();
    script.send(Ok("--.--kg".to_string())).unwrap();
    assert!(wait_value(&events).is_some());
    session.toggle_broadcast();

    assert_eq!(fetch(port).unwrap(), INVALID_VALUE);
}

#[test]
fn test_stopping_reading_also_stops_broadcast() {
    let port = free_port();
    let (mut session, script, events) = session_with(settings("SCRIPT0", port));
    session.toggle_reading();
    script.send(Ok("9".to_string())).unwrap();
    assert!(wait_value(&events).is_some());
    session.toggle_broadcast();
    assert_eq!(fetch(port).unwrap(), "9");

    assert_eq!(session.toggle_reading(), SessionState::Idle);
    assert!(!session.is_broadcasting());
    assert!(session.broadcast_endpoint().is_none());
    assert!(fetch(port).is_err());
}

#[test]
fn test_reconfigure_stops_the_session() {
    let (mut session, _script, _events) = session_with(settings("SCRIPT0", free_port()));
    session.toggle_reading();
    let state = session.reconfigure(|s| {
        s.set_weight_start_pos(Some(2));
        s.set_broadcast_port(0);
    });
    assert_eq!(state, SessionState::Idle);
    let shared = session.settings();
    let settings = shared.read();
    assert_eq!(settings.weight_start_pos(), Some(2));
    assert_eq!(settings.broadcast_port(), 5050);
}

#[test]
fn test_removed_session_releases_its_port() {
    let (mut session, script, _events) = session_with(settings("SCRIPT0", free_port()));
    assert_eq!(session.toggle_reading(), SessionState::ReadingOnly);
    // one receiver stays with the opener, the open port holds the other
    assert_eq!(script.receiver_count(), 2);

    let started = Instant::now();
    session.remove();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(script.receiver_count(), 0);
}

#[test]
fn test_registry_reports_new_index_after_removal() {
    let mut opener = ScriptedOpener::default();
    let _first = opener.port("SCRIPT0");
    let second = opener.port("SCRIPT1");
    let (handler, events) = FlumeHandler::new();
    let mut registry = SessionRegistry::new(Arc::new(handler)).with_opener(Arc::new(opener));

    registry.add(settings("SCRIPT0", free_port())).unwrap();
    registry.add(settings("SCRIPT1", free_port())).unwrap();
    for session in registry.iter_mut() {
        assert_eq!(session.toggle_reading(), SessionState::ReadingOnly);
    }

    registry.remove(0).unwrap();
    second.send(Ok("1.5".to_string())).unwrap();
    let event = wait_for(&events, Duration::from_secs(3), |e| {
        matches!(e, BridgeEvent::ValueUpdated { .. })
    })
    .unwrap();
    assert_eq!(
        event,
        BridgeEvent::ValueUpdated {
            session: 0,
            value: "1.5".to_string()
        }
    );

    registry.shutdown_all();
    assert!(registry.iter().all(|s| s.state() == SessionState::Idle));
}
