//! Server implementation.
//!
//! One task owns the [`Simulation`] and `select!`s between the wake-up
//! timer, new connections, connection events and console lines. Each
//! handler runs to completion before the next, so the tick is the only
//! writer of world state and needs no locks.
//!
//! Per connection:
//! - a reader task performs the `hello`/`welcome` handshake, then forwards
//!   parsed frames to the server task. Frames that do not parse are
//!   logged and skipped;
//! - a writer task drains a bounded outbound queue. A viewer that falls
//!   behind loses frames instead of stalling the tick.

use anyhow::{bail, Context};
use bytes::Bytes;
use splat_shared::{
    config::SandboxConfig,
    console::{parse_command_line, Console, CvarFlags, CvarValue},
    net::{
        decode_payload, ClientMsg, ReliableConn, ReliableListener, ServerMsg, SessionId,
        PROTOCOL_VERSION,
    },
};
use std::{collections::HashMap, future::Future, net::SocketAddr, time::Duration};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    rapier_backend::RapierBackend,
    simulation::{Outbox, Simulation},
};

/// Frames queued per viewer before new ones are dropped.
const OUTBOUND_QUEUE: usize = 64;
const INBOUND_QUEUE: usize = 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events from connection tasks to the server task.
#[derive(Debug)]
enum Inbound {
    Connected {
        id: SessionId,
        peer: SocketAddr,
        outbound: mpsc::Sender<Bytes>,
    },
    Message {
        id: SessionId,
        msg: ClientMsg,
    },
    Closed {
        id: SessionId,
    },
}

/// Outbound queues of every handshaken connection.
#[derive(Default)]
struct Connections {
    outbound: HashMap<SessionId, mpsc::Sender<Bytes>>,
}

impl Outbox for Connections {
    fn send(&mut self, session: SessionId, frame: Bytes) {
        let Some(tx) = self.outbound.get(&session) else {
            return;
        };
        if let Err(TrySendError::Full(_)) = tx.try_send(frame) {
            debug!(session = ?session, "Outbound queue full, dropping frame");
        }
    }
}

impl Connections {
    /// Queues a frame the client must not miss. A full or closed queue
    /// drops the connection instead and returns `false`.
    fn send_direct(&mut self, session: SessionId, frame: Bytes) -> bool {
        let Some(tx) = self.outbound.get(&session) else {
            return false;
        };
        if tx.try_send(frame).is_ok() {
            return true;
        }
        self.outbound.remove(&session);
        false
    }
}

/// Game server.
pub struct GameServer {
    pub console: Console,
    sim: Simulation<RapierBackend>,
    listener: ReliableListener,
    connections: Connections,

    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,
    quit: bool,
}

impl GameServer {
    /// Binds the listener and builds the world.
    pub async fn bind(cfg: SandboxConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = ReliableListener::bind(addr).await?;

        let mut console = Console::new();
        Self::register_cvars(&mut console, &cfg);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        let sim = Simulation::new(cfg.clone(), RapierBackend::new(cfg.physics));

        Ok(Self {
            console,
            sim,
            listener,
            connections: Connections::default(),
            inbound_tx,
            inbound_rx,
            console_rx: None,
            quit: false,
        })
    }

    fn register_cvars(console: &mut Console, cfg: &SandboxConfig) {
        console.register_cvar(
            "sv_tickrate",
            CvarValue::Int(i64::from(cfg.tick_hz)),
            "Simulation tick rate (set at startup)",
            CvarFlags::SERVER_ONLY | CvarFlags::READ_ONLY,
        );
        console.register_cvar(
            "sv_debug_global",
            CvarValue::Bool(cfg.global_debug),
            "debug requests toggle every collider, not just the caller's",
            CvarFlags::SERVER_ONLY,
        );
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn simulation(&self) -> &Simulation<RapierBackend> {
        &self.sim
    }

    /// Runs `ticks` steps without serving the network.
    pub fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        for _ in 0..ticks {
            self.sim.step(&mut self.connections)?;
        }
        Ok(())
    }

    /// Serves until `shutdown` resolves or the console asks to quit.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        let wake_every = Duration::from_millis(self.sim.config().wake_interval_ms.max(1));
        let mut wake = time::interval(wake_every);
        wake.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_wake = Instant::now();

        while !self.quit {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((conn, peer)) => self.spawn_connection(conn, peer),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(event) = self.inbound_rx.recv() => self.handle_inbound(event),
                line = recv_console(&mut self.console_rx) => match line {
                    Some(line) => {
                        for out in self.exec_console(&line)? {
                            println!("{out}");
                        }
                    }
                    None => self.console_rx = None,
                },
                _ = wake.tick() => {
                    let now = Instant::now();
                    let elapsed = now - last_wake;
                    last_wake = now;
                    self.sim.advance(elapsed, &mut self.connections)?;
                }
            }
        }

        info!(tick = self.sim.tick(), "Server stopped");
        Ok(())
    }

    fn spawn_connection(&self, conn: ReliableConn, peer: SocketAddr) {
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(conn, peer, inbound).await {
                debug!(%peer, error = %e, "Connection closed with error");
            }
        });
    }

    fn handle_inbound(&mut self, event: Inbound) {
        match event {
            Inbound::Connected { id, peer, outbound } => {
                self.connections.outbound.insert(id, outbound);
                self.sim.connect(id, Some(peer));
            }
            Inbound::Message { id, msg } => self.handle_message(id, msg),
            Inbound::Closed { id } => {
                self.connections.outbound.remove(&id);
                self.sim.disconnect(id);
            }
        }
    }

    fn handle_message(&mut self, id: SessionId, msg: ClientMsg) {
        let event = msg.name();
        debug!(session = ?id, event, "Client message");

        let result: anyhow::Result<()> = match msg {
            ClientMsg::Hello { .. } => Err(anyhow::anyhow!("duplicate hello")),
            ClientMsg::Subscribe => self.sim.subscribe(id).map_err(Into::into),
            ClientMsg::Unsubscribe => self.sim.unsubscribe(id).map_err(Into::into),
            ClientMsg::Join(request) => self.sim.join_frame(id, request).and_then(|frame| {
                if self.connections.send_direct(id, frame) {
                    Ok(())
                } else {
                    self.sim.disconnect(id);
                    Err(anyhow::anyhow!("join reply undeliverable, session dropped"))
                }
            }),
            ClientMsg::Leave => self.sim.leave(id).map(drop).map_err(Into::into),
            ClientMsg::Input(intent) => self.sim.input(id, intent).map_err(Into::into),
            ClientMsg::Debug(options) => self.sim.set_debug(id, options).map_err(Into::into),
        };

        if let Err(e) = result {
            warn!(session = ?id, event, error = %e, "Request ignored");
        }
    }

    /// Executes a console command.
    pub fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens = parse_command_line(line);
        let Some(command) = tokens.first() else {
            return Ok(Vec::new());
        };

        let out = match command.as_str() {
            "status" => {
                let mut out = self.sim.status();
                out.push(format!("Connections: {}", self.connections.outbound.len()));
                out
            }
            "reset" => {
                self.sim.reset_test_content();
                vec!["Test content reset".to_string()]
            }
            "wall" => {
                let width = match tokens.get(1).map(|w| w.parse::<u32>()) {
                    None => 5,
                    Some(Ok(width)) => width,
                    Some(Err(_)) => return Ok(vec!["Usage: wall [width]".to_string()]),
                };
                self.sim.build_test_wall(width);
                vec![format!("Built wall of width {}", width)]
            }
            "help" => {
                let mut commands: Vec<&str> = vec!["status", "reset", "wall", "quit"];
                commands.extend(self.console.command_names());
                vec![format!("Available commands: {}", commands.join(", "))]
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                self.quit = true;
                vec!["Shutting down".to_string()]
            }
            _ => match self.console.exec(line) {
                Ok(out) => out,
                Err(e) => vec![format!("Error: {:#}", e)],
            },
        };

        if let Some(value) = self.console.get_cvar("sv_debug_global") {
            self.sim.set_global_debug(value.as_bool());
        }
        Ok(out)
    }
}

/// Binds a server on an ephemeral localhost port with no test content.
pub async fn bind_ephemeral(tick_hz: u32) -> anyhow::Result<(GameServer, SandboxConfig)> {
    let mut cfg = SandboxConfig {
        server_addr: "127.0.0.1:0".to_string(),
        tick_hz,
        spawn_test_content: false,
        rng_seed: Some(1),
        ..SandboxConfig::default()
    };
    let server = GameServer::bind(cfg.clone()).await?;
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}

async fn recv_console(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handshake, then forward frames until the peer goes away.
async fn serve_connection(
    conn: ReliableConn,
    peer: SocketAddr,
    inbound: mpsc::Sender<Inbound>,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = conn.into_split();

    let hello = time::timeout(HANDSHAKE_TIMEOUT, reader.recv::<ClientMsg>())
        .await
        .context("handshake timeout")??;
    match hello {
        Some(ClientMsg::Hello { protocol }) if protocol == PROTOCOL_VERSION => {}
        Some(ClientMsg::Hello { protocol }) => {
            writer
                .send(&ServerMsg::Disconnect {
                    reason: format!("protocol {} unsupported, expected {}", protocol, PROTOCOL_VERSION),
                })
                .await?;
            bail!("protocol mismatch: {}", protocol);
        }
        Some(other) => {
            writer
                .send(&ServerMsg::Disconnect {
                    reason: "expected hello".to_string(),
                })
                .await?;
            bail!("unexpected handshake msg: {:?}", other.name());
        }
        None => return Ok(()),
    }

    let id = SessionId::new_unique();
    writer
        .send(&ServerMsg::Welcome {
            session_id: id,
            protocol: PROTOCOL_VERSION,
        })
        .await?;

    let (outbound, mut queue) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    inbound
        .send(Inbound::Connected { id, peer, outbound })
        .await
        .context("server task gone")?;
    info!(session = ?id, %peer, "Client connected");

    tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if writer.send_frame(&frame).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let result = loop {
        let payload = match reader.recv_payload().await {
            Ok(Some(payload)) => payload,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        let msg = match decode_payload::<ClientMsg>(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session = ?id, error = %e, "Malformed message ignored");
                continue;
            }
        };
        if inbound.send(Inbound::Message { id, msg }).await.is_err() {
            break Ok(());
        }
    };

    let _ = inbound.send(Inbound::Closed { id }).await;
    info!(session = ?id, %peer, "Client disconnected");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_builtins_and_cvars() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(30).await?;
        assert!(server.simulation().global_debug());

        server.exec_console("sv_debug_global 0")?;
        assert!(!server.simulation().global_debug());

        let out = server.exec_console("wall 2")?;
        assert_eq!(out, vec!["Built wall of width 2".to_string()]);
        assert_eq!(server.simulation().world().len(), 4);

        server.exec_console("reset")?;
        assert_eq!(server.simulation().world().len(), 31);

        let out = server.exec_console("set sv_tickrate 60")?;
        assert!(out[0].starts_with("Error"));

        let out = server.exec_console("status")?;
        assert!(out.iter().any(|l| l.starts_with("Tick:")));

        server.exec_console("quit")?;
        server.run_until(std::future::pending()).await?;
        Ok(())
    }

    #[tokio::test]
    async fn undeliverable_join_reply_drops_the_session() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(30).await?;
        let id = SessionId::new_unique();
        let (outbound, _queue) = mpsc::channel::<Bytes>(1);
        outbound.try_send(Bytes::from_static(b"backlog"))?;
        server.handle_inbound(Inbound::Connected {
            id,
            peer: "127.0.0.1:9".parse()?,
            outbound,
        });

        server.handle_message(id, ClientMsg::Join(Default::default()));
        assert!(server.simulation().sessions().is_empty());
        assert!(!server.connections.outbound.contains_key(&id));
        assert_eq!(server.simulation().world().len(), 1);

        // The reader's close event for the dropped session is harmless.
        server.handle_inbound(Inbound::Closed { id });
        assert!(server.simulation().sessions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn join_reply_is_queued_for_the_client() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(30).await?;
        let id = SessionId::new_unique();
        let (outbound, mut queue) = mpsc::channel::<Bytes>(4);
        server.handle_inbound(Inbound::Connected {
            id,
            peer: "127.0.0.1:9".parse()?,
            outbound,
        });

        server.handle_message(id, ClientMsg::Join(Default::default()));
        let frame = queue.try_recv()?;
        match decode_payload::<ServerMsg>(&frame[4..])? {
            ServerMsg::Joined(snapshot) => assert!(snapshot.owner().is_some()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(server.simulation().world().len(), 2);
        Ok(())
    }
}
