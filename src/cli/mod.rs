pub mod actions;
pub mod config;
pub mod handlers;

use clap::{Arg, ArgAction, ArgMatches, Command};

/// Build the command line definition.
pub fn build_command() -> Command {
    Command::new("scalecast")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Read a scale or sensor over a serial port and serve the latest reading over TCP")
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-interfaces")
                .long("list-interfaces")
                .help("List local IPv4 interfaces and the address broadcasting would bind to, then exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output listings and events in JSON (events as JSONL)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Append log output to this file (also SCALECAST_LOG_FILE)")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Load port configurations from a JSON or TOML file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("save-config")
                .long("save-config")
                .help("Write the effective port configuration to FILE (format from extension) and exit")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial port to read from, e.g. /dev/ttyUSB0 or COM3")
                .value_name("PORT"),
        )
        .arg(
            Arg::new("baud-rate")
                .long("baud-rate")
                .help("Serial port baud rate")
                .value_name("BAUD")
                .default_value("9600")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("data-bits")
                .long("data-bits")
                .help("Data bits: 5, 6, 7 or 8")
                .value_name("BITS")
                .default_value("8")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("stop-bits")
                .long("stop-bits")
                .help("Stop bits: 1 or 2")
                .value_name("BITS")
                .default_value("1")
                .value_parser(clap::value_parser!(u8)),
        )
        .arg(
            Arg::new("parity")
                .long("parity")
                .help("Parity: none, odd, even")
                .value_name("PARITY")
                .default_value("none"),
        )
        .arg(
            Arg::new("flow-control")
                .long("flow-control")
                .help("Flow control: none, cts/rts, dsr/dtr, xon/xoff")
                .value_name("FLOW")
                .default_value("none"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Read timeout in milliseconds (minimum 500)")
                .value_name("MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("weight-start")
                .long("weight-start")
                .help("1-based position where the value starts in a line")
                .value_name("POS")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("weight-end")
                .long("weight-end")
                .help("1-based position where the value ends in a line")
                .value_name("POS")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("required-length")
                .long("required-length")
                .help("Reject lines whose length differs from LEN (0 disables)")
                .value_name("LEN")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("stability-snippet")
                .long("stability-snippet")
                .help("Only accept lines carrying this stability marker, e.g. ST")
                .value_name("TEXT"),
        )
        .arg(
            Arg::new("stability-position")
                .long("stability-position")
                .help("1-based position of the stability marker (default 1)")
                .value_name("POS")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64))
                .requires("stability-snippet"),
        )
        .arg(
            Arg::new("identical-count")
                .long("identical-count")
                .help("Only accept a value after COUNT identical lines in a row")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("broadcast-port")
                .long("broadcast-port")
                .help("TCP port to serve readings on")
                .value_name("PORT")
                .default_value("5050")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("bind-address")
                .long("bind-address")
                .help("Local address to serve readings on (default: first wired, then wireless interface)")
                .value_name("IP")
                .value_parser(clap::value_parser!(std::net::IpAddr)),
        )
        .arg(
            Arg::new("broadcast-invalid")
                .long("broadcast-invalid")
                .help("Answer clients with NAN while no valid reading exists instead of holding them")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-broadcast")
                .long("no-broadcast")
                .help("Only read and print values, do not open a TCP listener")
                .action(ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    build_command().get_matches()
}
