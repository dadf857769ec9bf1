use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use serde::Serialize;
use std::{
    collections::HashSet,
    net::IpAddr,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    config::BridgeConfig,
    handlers::{BridgeEvent, FlumeHandler},
};
use crate::{
    api::{BridgeHandler, LoggingHandler, SessionState},
    core::SessionRegistry,
    protocol::{
        constants::{FlowControl, Parity},
        network::{list_interfaces, select_bind_address, InterfaceAddress},
        ports::enumerate_ports,
        settings::PortSettingsRecord,
    },
};

const EVENT_POLL: Duration = Duration::from_millis(250);

/// Entry point for the binary after logging is up.
pub fn run(matches: &ArgMatches) -> Result<()> {
    let json = matches.get_flag("json");

    if matches.get_flag("list-ports") {
        return list_ports(json);
    }
    if matches.get_flag("list-interfaces") {
        return list_network_interfaces(json);
    }

    let config = load_config(matches)?;
    if let Some(path) = matches.get_one::<String>("save-config") {
        return save_config(&config, path);
    }
    if config.ports.is_empty() {
        bail!("No serial port configured: pass --port or --config (see --list-ports)");
    }

    run_bridge(&config, !matches.get_flag("no-broadcast"), json)
}

fn list_ports(json: bool) -> Result<()> {
    let ports = enumerate_ports();
    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
    } else if ports.is_empty() {
        eprintln!("No serial ports detected!");
    } else {
        for port in &ports {
            println!("{}", port.describe());
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InterfaceReport {
    interfaces: Vec<InterfaceAddress>,
    bind_address: Option<IpAddr>,
}

fn list_network_interfaces(json: bool) -> Result<()> {
    let interfaces = list_interfaces().context("Failed to list network interfaces")?;
    let bind_address = select_bind_address(&interfaces);
    if json {
        let report = InterfaceReport {
            interfaces,
            bind_address,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for iface in &interfaces {
        println!(
            "{:<16} {:<15} {:<8} {}",
            iface.name,
            iface.address,
            iface.kind,
            if iface.up { "up" } else { "down" }
        );
    }
    match bind_address {
        Some(address) => println!("broadcast address: {address}"),
        None => println!("broadcast address: none (pass --bind-address)"),
    }
    Ok(())
}

/// Ports from `--config` followed by the one described on the command line.
pub fn load_config(matches: &ArgMatches) -> Result<BridgeConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(record) = settings_from_args(matches)? {
        config.ports.push(record);
    }
    Ok(config)
}

/// Port settings described by command line flags, if `--port` was given.
pub fn settings_from_args(matches: &ArgMatches) -> Result<Option<PortSettingsRecord>> {
    let Some(port) = matches.get_one::<String>("port") else {
        return Ok(None);
    };

    let parity = matches
        .get_one::<String>("parity")
        .map(|p| Parity::from_str(p).map_err(|_| anyhow!("Invalid parity: {p}")))
        .transpose()?;
    let flow_control = matches
        .get_one::<String>("flow-control")
        .map(|f| FlowControl::from_str(f).map_err(|_| anyhow!("Invalid flow control: {f}")))
        .transpose()?;
    let stability_snippet = matches.get_one::<String>("stability-snippet").cloned();
    let identical_count = matches.get_one::<i64>("identical-count").copied();

    Ok(Some(PortSettingsRecord {
        port_id: port.clone(),
        baud_rate: matches.get_one::<u32>("baud-rate").copied(),
        data_bits: matches.get_one::<u8>("data-bits").copied(),
        stop_bits: matches.get_one::<u8>("stop-bits").copied(),
        parity,
        flow_control,
        timeout_ms: matches.get_one::<u32>("timeout").copied(),
        stability_active: stability_snippet.is_some(),
        stability_snippet,
        stability_start_pos: matches
            .get_one::<i64>("stability-position")
            .copied()
            .unwrap_or(1),
        sequence_active: identical_count.is_some(),
        required_identical_count: identical_count.unwrap_or(1),
        weight_start_pos: matches.get_one::<i64>("weight-start").copied(),
        weight_end_pos: matches.get_one::<i64>("weight-end").copied(),
        required_length: matches.get_one::<i64>("required-length").copied(),
        broadcast_port: matches
            .get_one::<i64>("broadcast-port")
            .copied()
            .unwrap_or(0),
        broadcast_address: matches.get_one::<IpAddr>("bind-address").copied(),
        broadcast_invalid: matches.get_flag("broadcast-invalid"),
    }))
}

/// Write the ports as a registry would hold them: clamped, and each port once.
fn save_config(config: &BridgeConfig, path: &str) -> Result<()> {
    let mut registry = SessionRegistry::new(Arc::new(LoggingHandler));
    for settings in config.port_settings() {
        let port_id = settings.port_id().to_string();
        registry
            .add(settings)
            .with_context(|| format!("Cannot save port {port_id:?}"))?;
    }
    BridgeConfig {
        ports: registry.settings_snapshot(),
    }
    .save(path)
}

fn emit(event: &BridgeEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        BridgeEvent::ValueUpdated { session, value } => println!("[{session}] {value}"),
        BridgeEvent::Error {
            session: Some(session),
            kind,
            message,
        } => eprintln!("[{session}] {kind}: {message}"),
        BridgeEvent::Error {
            session: None,
            kind,
            message,
        } => eprintln!("{kind}: {message}"),
    }
    Ok(())
}

/// Open every configured port, serve readings until Ctrl-C, then shut down.
pub fn run_bridge(config: &BridgeConfig, broadcast: bool, json: bool) -> Result<()> {
    let (handler, events) = FlumeHandler::new();
    let handler = Arc::new(handler);
    let mut registry = SessionRegistry::new(Arc::clone(&handler) as Arc<dyn BridgeHandler>);

    for settings in config.port_settings() {
        log::info!("configuring {} ({})", settings.port_id(), settings.line_summary());
        if let Err(err) = registry.add(settings) {
            handler.on_error(&err, None);
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    for session in registry.iter_mut() {
        session.toggle_reading();
    }

    // broadcasting starts once per session, after its first line arrives
    let mut broadcast_started: HashSet<usize> = HashSet::new();
    let mut outcome = Ok(());

    while running.load(Ordering::SeqCst) {
        match events.recv_timeout(EVENT_POLL) {
            Ok(event) => {
                emit(&event, json)?;
                if let BridgeEvent::ValueUpdated { session: index, .. } = event {
                    if !broadcast || broadcast_started.contains(&index) {
                        continue;
                    }
                    if let Some(session) = registry.get_mut(index) {
                        if session.broadcast_enabled() {
                            broadcast_started.insert(index);
                            if session.toggle_broadcast() == SessionState::ReadingAndBroadcasting {
                                log::info!("{}", session.status_text());
                            }
                        }
                    }
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                if registry.iter().all(|s| s.state() == SessionState::Idle) {
                    outcome = Err(anyhow!("No serial port is being read, giving up"));
                    break;
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    log::info!("shutting down");
    registry.shutdown_all();
    handler.stop();
    for event in events.try_iter() {
        emit(&event, json)?;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::build_command;

    #[test]
    fn flags_become_port_settings() {
        let matches = build_command()
            .try_get_matches_from([
                "scalecast",
                "--port",
                "/dev/ttyUSB0",
                "--parity",
                "even",
                "--flow-control",
                "XON/XOFF",
                "--weight-start",
                "4",
                "--weight-end",
                "9",
                "--identical-count",
                "3",
                "--broadcast-port",
                "70000",
            ])
            .unwrap();
        let record = settings_from_args(&matches).unwrap().unwrap();
        assert_eq!(record.parity, Some(Parity::Even));
        assert_eq!(record.flow_control, Some(FlowControl::XonXoff));
        assert!(record.sequence_active);
        assert!(!record.stability_active);
        assert_eq!(record.required_identical_count, 3);

        let settings = crate::protocol::PortSettings::from(record);
        assert_eq!(settings.broadcast_port(), 65535);
        assert_eq!(settings.weight_start_pos(), Some(4));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn unknown_parity_is_rejected() {
        let matches = build_command()
            .try_get_matches_from(["scalecast", "--port", "COM1", "--parity", "mark"])
            .unwrap();
        assert!(settings_from_args(&matches).is_err());
    }

    #[test]
    fn saved_config_is_clamped_and_rejects_duplicates() {
        let path = std::env::temp_dir().join(format!("scalecast-save-{}.json", std::process::id()));
        let path = path.to_string_lossy().into_owned();
        let mut config = BridgeConfig::default();
        config.ports.push(PortSettingsRecord {
            port_id: "COM4".to_string(),
            broadcast_port: 0,
            required_identical_count: -3,
            ..Default::default()
        });
        save_config(&config, &path).unwrap();
        let saved = BridgeConfig::from_file(&path).unwrap();
        assert_eq!(saved.ports[0].broadcast_port, 5050);
        assert_eq!(saved.ports[0].required_identical_count, 1);

        let duplicate = config.ports[0].clone();
        config.ports.push(duplicate);
        assert!(save_config(&config, &path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn no_port_means_no_settings() {
        let matches = build_command().try_get_matches_from(["scalecast"]).unwrap();
        assert!(settings_from_args(&matches).unwrap().is_none());
        assert!(load_config(&matches).unwrap().ports.is_empty());
    }
}
