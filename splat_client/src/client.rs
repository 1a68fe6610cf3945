//! Client implementation.
//!
//! The client maintains:
//! - One reliable stream to the server, split into a writer and a reader task
//! - A mirror world rebuilt from every snapshot in synchronize mode
//! - The locally owned entity, learned from the `join` reply
//! - Console for user commands

use std::{net::SocketAddr, time::Duration};

use anyhow::{bail, Context};
use splat_shared::{
    components::{Player, Position},
    console::{Console, CvarFlags, CvarValue},
    ecs::{EntityId, World},
    net::{
        ClientMsg, DebugOptions, FrameWriter, InputIntent, JoinRequest, ReliableConn, ServerMsg,
        SessionId, PROTOCOL_VERSION,
    },
    snapshot::{ApplyMode, SnapshotCodec},
};
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// High-level game client.
pub struct GameClient {
    pub session_id: SessionId,
    pub console: Console,

    writer: FrameWriter,
    inbox: mpsc::UnboundedReceiver<ServerMsg>,

    mirror: World,
    codec: SnapshotCodec,
    me: Option<EntityId>,
    last_tick: Option<u64>,
    disconnect_reason: Option<String>,
}

impl GameClient {
    /// Connects to a server and performs the handshake.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %addr, "Connecting to server");

        let mut conn = ReliableConn::connect(addr).await?;
        conn.send(&ClientMsg::Hello {
            protocol: PROTOCOL_VERSION,
        })
        .await?;

        let welcome = time::timeout(HANDSHAKE_TIMEOUT, conn.recv::<ServerMsg>())
            .await
            .context("handshake timeout")??;
        let session_id = match welcome {
            Some(ServerMsg::Welcome {
                session_id,
                protocol,
            }) if protocol == PROTOCOL_VERSION => session_id,
            Some(ServerMsg::Disconnect { reason }) => bail!("server refused: {}", reason),
            Some(other) => bail!("expected welcome, got {:?}", other),
            None => bail!("server closed the connection during handshake"),
        };
        info!(session_id = ?session_id, "Connected to server");

        let (mut reader, writer) = conn.into_split();
        let (tx, inbox) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                match reader.recv::<ServerMsg>().await {
                    Ok(Some(msg)) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Reliable connection error");
                        break;
                    }
                }
            }
        });

        let mut console = Console::new();
        Self::register_cvars(&mut console);

        Ok(Self {
            session_id,
            console,
            writer,
            inbox,
            mirror: World::default(),
            codec: SnapshotCodec::synchronized(),
            me: None,
            last_tick: None,
            disconnect_reason: None,
        })
    }

    fn register_cvars(console: &mut Console) {
        console.register_cvar(
            "cl_wireframes",
            CvarValue::Bool(false),
            "Request collider wireframes when joining",
            CvarFlags::NONE,
        );
    }

    /// The mirrored world as of the last applied snapshot.
    pub fn world(&self) -> &World {
        &self.mirror
    }

    /// The locally owned player, while in game.
    pub fn me(&self) -> Option<EntityId> {
        self.me
    }

    pub fn my_position(&self) -> Option<Position> {
        self.me.and_then(|e| self.mirror.get::<Position>(e).copied())
    }

    pub fn my_player(&self) -> Option<Player> {
        self.me.and_then(|e| self.mirror.get::<Player>(e).copied())
    }

    /// Tick of the newest applied snapshot.
    pub fn last_tick(&self) -> Option<u64> {
        self.last_tick
    }

    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    async fn send(&mut self, msg: &ClientMsg) -> anyhow::Result<()> {
        debug!(event = msg.name(), "Sending");
        self.writer.send(msg).await
    }

    pub async fn subscribe(&mut self) -> anyhow::Result<()> {
        self.send(&ClientMsg::Subscribe).await
    }

    pub async fn unsubscribe(&mut self) -> anyhow::Result<()> {
        self.send(&ClientMsg::Unsubscribe).await
    }

    /// Joins the game and waits for the reply naming our entity.
    ///
    /// Updates that arrive first are applied as usual.
    pub async fn join(&mut self) -> anyhow::Result<EntityId> {
        let debug = DebugOptions {
            collider_wireframes: self
                .console
                .get_cvar("cl_wireframes")
                .is_some_and(CvarValue::as_bool),
        };
        self.send(&ClientMsg::Join(JoinRequest { debug })).await?;

        let deadline = time::Instant::now() + REPLY_TIMEOUT;
        loop {
            let msg = time::timeout_at(deadline, self.recv())
                .await
                .context("timed out waiting for join reply")??;
            match msg {
                Some(ServerMsg::Joined(_)) => break,
                Some(_) => continue,
                None => bail!("connection closed before join reply"),
            }
        }
        self.me.context("join reply did not name an owned entity")
    }

    /// Leaves the game. Spectating continues if subscribed.
    pub async fn leave(&mut self) -> anyhow::Result<()> {
        self.send(&ClientMsg::Leave).await?;
        self.me = None;
        Ok(())
    }

    pub async fn send_input(&mut self, intent: InputIntent) -> anyhow::Result<()> {
        self.send(&ClientMsg::Input(intent)).await
    }

    pub async fn set_debug(&mut self, options: DebugOptions) -> anyhow::Result<()> {
        self.send(&ClientMsg::Debug(options)).await
    }

    /// Waits for the next server message and folds it into the mirror.
    /// `None` once the connection is gone.
    pub async fn recv(&mut self) -> anyhow::Result<Option<ServerMsg>> {
        let Some(msg) = self.inbox.recv().await else {
            return Ok(None);
        };
        self.handle(&msg)?;
        Ok(Some(msg))
    }

    /// Like [`GameClient::recv`], but gives up after `wait`.
    pub async fn recv_timeout(&mut self, wait: Duration) -> anyhow::Result<Option<ServerMsg>> {
        match time::timeout(wait, self.recv()).await {
            Ok(result) => result,
            Err(_) => Ok(None),
        }
    }

    /// Applies every message already queued without waiting.
    pub fn drain(&mut self) -> anyhow::Result<usize> {
        let mut applied = 0;
        while let Ok(msg) = self.inbox.try_recv() {
            self.handle(&msg)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Waits for the next `update` and returns its tick.
    pub async fn wait_update(&mut self, wait: Duration) -> anyhow::Result<u64> {
        let deadline = time::Instant::now() + wait;
        loop {
            let msg = time::timeout_at(deadline, self.recv())
                .await
                .context("timed out waiting for update")??;
            match msg {
                Some(ServerMsg::Update(snapshot)) => return Ok(snapshot.tick),
                Some(_) => continue,
                None => bail!("connection closed"),
            }
        }
    }

    fn handle(&mut self, msg: &ServerMsg) -> anyhow::Result<()> {
        match msg {
            ServerMsg::Update(snapshot) => {
                self.codec
                    .apply(&mut self.mirror, snapshot, ApplyMode::Synchronize)
                    .context("apply update")?;
                self.last_tick = Some(snapshot.tick);
            }
            ServerMsg::Joined(snapshot) => {
                self.codec
                    .apply(&mut self.mirror, snapshot, ApplyMode::Synchronize)
                    .context("apply join reply")?;
                self.last_tick = Some(snapshot.tick);
                self.me = snapshot.owner();
                info!(entity = ?self.me, "Joined game");
            }
            ServerMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected from server");
                self.disconnect_reason = Some(reason.clone());
            }
            ServerMsg::Welcome { .. } => debug!("Ignoring repeated welcome"),
        }
        Ok(())
    }

    /// Status lines for the console.
    pub fn status(&self) -> Vec<String> {
        let mut out = vec![
            format!("Session: {:?}", self.session_id),
            format!("Tick: {:?}", self.last_tick),
            format!("Mirrored entities: {}", self.mirror.len()),
        ];
        match (self.me, self.my_position(), self.my_player()) {
            (Some(me), Some(pos), Some(player)) => out.push(format!(
                "Player {:?} at ({:.2}, {:.2}, {:.2}) balls={} can_jump={}",
                me, pos.x, pos.y, pos.z, player.num_balls, player.can_jump
            )),
            (Some(me), _, _) => out.push(format!("Player {:?} (not yet mirrored)", me)),
            (None, _, _) => out.push("Spectating".to_string()),
        }
        out
    }
}
