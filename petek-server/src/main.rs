//! petek-server: a line-protocol TCP front end for the petek table.
//!
//! One OS thread per connection; each connection registers one table
//! worker for its lifetime. Configuration comes from argv and env:
//!
//! ```bash
//! petek-server --port 7171
//! PETEK_PORT=7171 PETEK_CAPACITY=100 RUST_LOG=info petek-server
//! ```

mod conn;
mod proto;
mod stats;

use std::net::TcpListener;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use petek::{Table, TableConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::stats::ServerStats;

const DEFAULT_PORT: u16 = 7171;

struct Settings {
    port: u16,
    capacity: usize,
    max_workers: usize,
}

fn settings() -> Result<Settings, String> {
    let mut port = env_parsed("PETEK_PORT")?.unwrap_or(DEFAULT_PORT);
    let capacity = env_parsed("PETEK_CAPACITY")?.unwrap_or(100);
    let max_workers = env_parsed("PETEK_MAX_WORKERS")?.unwrap_or(250);

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                let value = args.next().ok_or("--port needs a value")?;
                port = value
                    .parse()
                    .map_err(|_| format!("invalid port '{value}'"))?;
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }

    Ok(Settings {
        port,
        capacity,
        max_workers,
    })
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid {name} '{raw}'")),
        Err(_) => Ok(None),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = match settings() {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "bad configuration");
            return ExitCode::FAILURE;
        }
    };

    let stats = Arc::new(ServerStats::new());
    let table = Arc::new(Table::with_metrics(
        TableConfig {
            capacity: settings.capacity,
            max_workers: settings.max_workers,
            ..TableConfig::default()
        },
        stats.clone(),
    ));

    let listener = match TcpListener::bind(("0.0.0.0", settings.port)) {
        Ok(listener) => listener,
        Err(err) => {
            error!(port = settings.port, %err, "bind failed");
            return ExitCode::FAILURE;
        }
    };

    info!(
        port = settings.port,
        capacity = table.capacity(),
        max_workers = table.max_workers(),
        "listening"
    );

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let table = table.clone();
                let stats = stats.clone();
                thread::spawn(move || conn::serve(stream, table, stats));
            }
            Err(err) => {
                error!(%err, "accept failed");
            }
        }
    }
    ExitCode::SUCCESS
}
