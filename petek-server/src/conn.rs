//! Per-connection service loop: line framing, dispatch, responses.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use petek::{Error, Table, Worker};
use tracing::{debug, info, warn};

use crate::proto::{self, Request};
use crate::stats::ServerStats;

/// Serve one client until EOF or I/O error.
///
/// The worker registration brackets the whole connection: it is claimed
/// before the first request and released by drop on every exit path,
/// including I/O errors and panics unwinding out of dispatch.
pub fn serve(stream: TcpStream, table: Arc<Table>, stats: Arc<ServerStats>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".into());

    let mut worker = match table.register() {
        Ok(worker) => worker,
        Err(err) => {
            warn!(%peer, %err, "rejecting connection");
            let mut stream = stream;
            let _ = stream.write_all(b"ERR busy\n");
            return;
        }
    };

    info!(%peer, "client connected");

    let mut writer = match stream.try_clone() {
        Ok(clone) => clone,
        Err(err) => {
            warn!(%peer, %err, "could not clone stream");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let mut served = 0u64;

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(%peer, %err, "read failed");
                break;
            }
        }
        let trimmed = line.strip_suffix('\n').unwrap_or(&line);

        let response = match proto::parse(trimmed) {
            Ok(Request::Stats) => {
                let mut report = stats.report();
                report.push_str("END\n");
                report
            }
            Ok(request) => {
                let started = Instant::now();
                let response = dispatch(&mut worker, &stats, request);
                stats.record_latency(started.elapsed());
                response
            }
            Err(err) => format!("ERR {err}\n"),
        };

        if let Err(err) = writer.write_all(response.as_bytes()) {
            debug!(%peer, %err, "write failed");
            break;
        }
        served += 1;
    }

    info!(%peer, served, "client disconnected");
}

fn dispatch(worker: &mut Worker<'_>, stats: &ServerStats, request: Request) -> String {
    match request {
        Request::Get { key } => match worker.get(&key) {
            Some(value) => format!("{value}\n"),
            None => "(nil)\n".to_owned(),
        },
        Request::Set { key, value } => {
            stats.record_set();
            match worker.set(&key, &value) {
                Ok(()) => "OK\n".to_owned(),
                Err(Error::TableFull) => "ERR table full\n".to_owned(),
                Err(err) => format!("ERR {err}\n"),
            }
        }
        Request::Del { key } => {
            worker.del(&key);
            "OK\n".to_owned()
        }
        Request::Stats => unreachable!("handled by the caller"),
    }
}
