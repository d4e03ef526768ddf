use std::io::{self, BufRead};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reldat::cli::{client_usage, parse_client_args};
use reldat::engine::Kind;
use reldat::transport::UdpTransport;
use reldat::ConnectionEngine;

/// The client only displays what the server sends back; it never
/// transforms and echoes data of its own.
fn display_and_discard(data: &[u8]) -> Vec<u8> {
    if !data.is_empty() {
        println!("{}", String::from_utf8_lossy(data));
    }
    Vec::new()
}

fn main() {
    env_logger::init();

    let raw_args: Vec<String> = std::env::args().collect();
    let program = raw_args.first().cloned().unwrap_or_else(|| "client".to_string());
    let args = &raw_args[1..];

    let client_args = match parse_client_args(args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("{}", client_usage(&program));
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            log::warn!("failed to install Ctrl-C handler: {e}");
        }
    }

    let transport = match UdpTransport::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: failed to open a UDP socket: {e}");
            std::process::exit(1);
        }
    };

    let server_addr = SocketAddr::from((client_args.peer, client_args.port));
    let mut engine = ConnectionEngine::with_handler(
        transport,
        client_args.window,
        Kind::Active,
        Box::new(display_and_discard),
    );

    if let Err(e) = engine.connect(server_addr) {
        eprintln!("error: failed to send OPEN to {server_addr}: {e}");
        std::process::exit(1);
    }

    log::info!("connecting to {server_addr}...");
    while running.load(Ordering::SeqCst) && !engine.is_established() {
        if let Err(e) = engine.tick() {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }

    if !engine.is_established() {
        return; // interrupted before the handshake finished
    }
    log::info!("connected");

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).unwrap_or(0) > 0 {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if let Err(e) = engine.send_user_data(trimmed.as_bytes()) {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        if let Err(e) = engine.send_eod() {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }

    while running.load(Ordering::SeqCst) {
        if let Err(e) = engine.tick() {
            eprintln!("error: {e}");
            break;
        }
    }

    let _ = engine.close();
}
