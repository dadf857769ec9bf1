use chrono::Local;
use log::LevelFilter;
use std::io::{self, Write};

use env_logger::{Builder, Target};

pub const LOG_FILE_ENV: &str = "SCALECAST_LOG_FILE";

/// Copies every record to the log file and to stderr, keeping stdout free
/// for command output.
struct TeeWriter {
    file: std::fs::File,
    stderr: io::Stderr,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.stderr.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.stderr.flush()
    }
}

/// Set up logging. `log_file` (or `SCALECAST_LOG_FILE`) adds an append-mode
/// file sink next to stderr; `RUST_LOG` still overrides the level.
pub fn init_logging(log_file: Option<&str>) {
    let path = log_file
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_FILE_ENV).ok().filter(|p| !p.is_empty()));

    match path {
        Some(path) => {
            if let Err(err) = init_file_logger(&path) {
                eprintln!("Failed to initialize file logger at '{path}': {err}");
                init_stderr_logger();
            }
        }
        None => init_stderr_logger(),
    }
}

fn init_stderr_logger() {
    let _ = Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

fn init_file_logger(path: &str) -> io::Result<()> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;

    let writer = TeeWriter {
        file,
        stderr: io::stderr(),
    };

    let _ = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(Target::Pipe(Box::new(writer)))
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .try_init();

    log::info!("File logger initialized at {path}");

    Ok(())
}
