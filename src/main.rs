use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

use rollcalld::clock::SystemClock;
use rollcalld::config::Config;
use rollcalld::ipc;
use rollcalld::slots;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn worker(state: &ipc::AppState, lines: &Mutex<Receiver<String>>, out: &Mutex<io::Stdout>) {
    loop {
        let line = {
            let rx = lines.lock().unwrap_or_else(|p| p.into_inner());
            match rx.recv() {
                Ok(v) => v,
                Err(_) => break,
            }
        };

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                debug!(id = %req.id, method = %req.method, "request");
                ipc::handle_request(state, req)
            }
            // Can't reply with an id we never parsed.
            Err(e) => ipc::err("", "bad_json", e.to_string(), None),
        };

        let mut out = out.lock().unwrap_or_else(|p| p.into_inner());
        let _ = writeln!(
            out,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = out.flush();
    }
}

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    slots::validate_schedule(&slots::SCHEDULE)?;
    let config = Config::load()?;
    let state = ipc::AppState::new(config.clone(), Arc::new(SystemClock));
    if let Some(ws) = config.workspace.clone() {
        state.open_workspace(ws)?;
    }
    info!(
        workers = config.workers,
        ttl_secs = config.credential_ttl_secs,
        utc_offset_minutes = config.utc_offset_minutes,
        "rollcalld ready"
    );

    let (tx, rx) = mpsc::channel::<String>();
    let rx = Mutex::new(rx);
    let out = Mutex::new(io::stdout());

    thread::scope(|s| {
        for _ in 0..config.workers {
            s.spawn(|| worker(&state, &rx, &out));
        }

        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(v) => v,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
        drop(tx);
    });

    info!("stdin closed, shutting down");
    Ok(())
}
