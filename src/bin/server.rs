use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reldat::cli::{parse_server_args, server_usage};
use reldat::transport::UdpTransport;
use reldat::ConnectionEngine;

fn main() {
    env_logger::init();

    let raw_args: Vec<String> = std::env::args().collect();
    let program = raw_args.first().cloned().unwrap_or_else(|| "server".to_string());
    let args = &raw_args[1..];

    let server_args = match parse_server_args(args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            eprintln!("{}", server_usage(&program));
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

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, server_args.port));
    let transport = match UdpTransport::bind(bind_addr) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: failed to bind UDP socket on port {}: {e}", server_args.port);
            std::process::exit(1);
        }
    };

    log::info!(
        "listening on port {} with receive window {} packets",
        server_args.port,
        server_args.window
    );

    let mut engine = ConnectionEngine::new(transport, server_args.window);
    if let Err(e) = engine.run(&running) {
        eprintln!("error: event loop failed: {e}");
        std::process::exit(1);
    }

    log::info!("shutting down");
}
