//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p splat_client -- [--addr 127.0.0.1:8080]
//!
//! The client connects, subscribes, and mirrors the world. Intents are sent
//! at the server tick rate while in game.
//!
//! Console commands:
//!   join / leave               - Enter or leave the game
//!   subscribe / unsubscribe    - Toggle update broadcasts
//!   move <forward> <right>     - Hold a move direction (-1..1 each)
//!   look <yaw> <pitch>         - Aim, in degrees
//!   stop                       - Release movement
//!   jump / pickup / throw / refill
//!   crouch                     - Toggle crouch
//!   debug <0|1>                - Collider wireframes for our player
//!   status                     - Show client status
//!   quit                       - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use splat_client::{input::InputState, GameClient};
use splat_shared::{config::SandboxConfig, console::parse_command_line, net::DebugOptions};
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> SandboxConfig {
    let mut cfg = SandboxConfig::default();
    let args: Vec<String> = env::args().collect();
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
            _ => i += 1,
        }
    }
    cfg
}

fn axis(tokens: &[String], i: usize) -> f32 {
    tokens
        .get(i)
        .and_then(|t| t.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
        .clamp(-1.0, 1.0)
}

/// Runs one console line. `None` means quit.
async fn exec_command(
    client: &mut GameClient,
    input: &mut InputState,
    line: &str,
) -> anyhow::Result<Option<Vec<String>>> {
    let tokens = parse_command_line(line);
    let Some(command) = tokens.first() else {
        return Ok(Some(Vec::new()));
    };

    let out = match command.as_str() {
        "join" => {
            let me = client.join().await?;
            vec![format!("Joined as {:?}", me)]
        }
        "leave" => {
            client.leave().await?;
            *input = InputState::default();
            vec!["Left the game".to_string()]
        }
        "subscribe" => {
            client.subscribe().await?;
            Vec::new()
        }
        "unsubscribe" => {
            client.unsubscribe().await?;
            Vec::new()
        }
        "move" => {
            input.forward = axis(&tokens, 1);
            input.right = axis(&tokens, 2);
            Vec::new()
        }
        "look" => {
            let degrees = |i: usize| {
                tokens
                    .get(i)
                    .and_then(|t| t.parse::<f32>().ok())
                    .unwrap_or(0.0)
                    .to_radians()
            };
            input.yaw = degrees(1);
            input.pitch = degrees(2);
            Vec::new()
        }
        "stop" => {
            input.forward = 0.0;
            input.right = 0.0;
            Vec::new()
        }
        "jump" => {
            input.jump = true;
            Vec::new()
        }
        "pickup" => {
            input.interact = true;
            Vec::new()
        }
        "throw" => {
            input.primary = true;
            Vec::new()
        }
        "refill" => {
            input.secondary = true;
            Vec::new()
        }
        "crouch" => {
            input.crouch = !input.crouch;
            vec![format!("Crouch: {}", input.crouch)]
        }
        "debug" => {
            let on = tokens.get(1).is_some_and(|t| t == "1" || t == "on");
            client
                .set_debug(DebugOptions {
                    collider_wireframes: on,
                })
                .await?;
            vec![format!("Collider wireframes: {}", on)]
        }
        "status" => client.status(),
        "quit" | "exit" => return Ok(None),
        _ => client.console.exec(line)?,
    };
    Ok(Some(out))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
    info!(server = %addr, "Starting client");

    let mut client = GameClient::connect(addr).await.context("connect")?;
    client.subscribe().await?;

    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);
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

    println!("Client connected. Type 'join' to play, 'status' for info, 'quit' to exit.");
    println!();

    let mut input = InputState::default();
    let mut send_tick = tokio::time::interval(Duration::from_secs_f64(cfg.dt()));

    loop {
        tokio::select! {
            line = console_rx.recv() => {
                let Some(line) = line else { break };
                match exec_command(&mut client, &mut input, &line).await {
                    Ok(Some(output)) => {
                        for line in output {
                            println!("{}", line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => println!("Error: {:#}", e),
                }
            }
            msg = client.recv() => {
                if msg?.is_none() {
                    println!("Disconnected from server.");
                    break;
                }
            }
            _ = send_tick.tick() => {
                if client.me().is_some() {
                    client.send_input(input.to_intent()).await?;
                    input.release_buttons();
                }
            }
        }
    }

    Ok(())
}
