//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p splat_server -- [--addr 127.0.0.1:8080] [--tick-hz 30] [--config sandbox.json]
//!
//! Console commands:
//!   status         - Show server status
//!   reset          - Respawn the test crates, mats and balls
//!   wall [width]   - Replace test content with a brick pyramid
//!   quit           - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use splat_server::GameServer;
use splat_shared::config::SandboxConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> anyhow::Result<SandboxConfig> {
    let args: Vec<String> = env::args().collect();

    // The config file is the base; flags override it.
    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = &args[i + 1];
            let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path))?;
            SandboxConfig::from_json_str(&text).with_context(|| format!("parse {}", path))?
        }
        _ => SandboxConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(30);
                i += 2;
            }
            "--config" => i += 2,
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.server_addr, tick_hz = cfg.tick_hz, "Starting server");

    let mut server = GameServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'reset' to respawn test content, 'quit' to exit.");
    println!();

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
