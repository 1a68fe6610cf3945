//! Networking primitives.
//!
//! One reliable TCP channel per viewer carrying length-prefixed (u32 BE)
//! JSON frames. Messages are externally tagged with their event name:
//! `{"input": {...}}`, `"subscribe"`, `{"update": {...}}`.

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::{math::Vec3, snapshot::Snapshot};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies one connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    pub fn new_unique() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-session debug flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DebugOptions {
    pub collider_wireframes: bool,
}

/// `join` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    pub debug: DebugOptions,
}

/// Latest movement/action request from a client.
///
/// Missing, `null` or mistyped fields decode as neutral, so a partial
/// intent is never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputIntent {
    #[serde(deserialize_with = "lenient")]
    pub move_x: f32,
    #[serde(deserialize_with = "lenient")]
    pub move_z: f32,
    #[serde(deserialize_with = "lenient")]
    pub jump: bool,
    #[serde(deserialize_with = "lenient")]
    pub crouch: bool,
    /// Pick up the projectile under the crosshair.
    #[serde(deserialize_with = "lenient")]
    pub interact: bool,
    /// Throw a ball.
    #[serde(deserialize_with = "lenient")]
    pub primary: bool,
    /// Set the hand to one ball.
    #[serde(deserialize_with = "lenient")]
    pub secondary: bool,
    #[serde(deserialize_with = "lenient")]
    pub aim_direction: Vec3,
}

impl InputIntent {
    /// No movement, no actions.
    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMsg {
    /// Must be the first frame on a connection.
    Hello { protocol: u32 },
    Subscribe,
    Unsubscribe,
    Join(JoinRequest),
    Leave,
    Input(InputIntent),
    Debug(DebugOptions),
}

impl ClientMsg {
    /// Event name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientMsg::Hello { .. } => "hello",
            ClientMsg::Subscribe => "subscribe",
            ClientMsg::Unsubscribe => "unsubscribe",
            ClientMsg::Join(_) => "join",
            ClientMsg::Leave => "leave",
            ClientMsg::Input(_) => "input",
            ClientMsg::Debug(_) => "debug",
        }
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMsg {
    Welcome { session_id: SessionId, protocol: u32 },
    /// Direct reply to `join`; carries the `Owner` table.
    Joined(Snapshot),
    /// Broadcast every tick to subscribed sessions.
    Update(Snapshot),
    Disconnect { reason: String },
}

/// Encodes a message as one length-prefixed frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    if payload.len() > MAX_FRAME_LEN {
        bail!("frame too large: {} bytes", payload.len());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes a frame payload (without the length prefix).
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(payload).context("deserialize msg")
}

async fn read_frame<R, T>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_payload(reader).await? {
        Some(payload) => decode_payload(&payload).map(Some),
        None => Ok(None),
    }
}

async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("tcp read len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame too large: {} bytes", len);
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    Ok(Some(payload))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> anyhow::Result<()> {
    writer.write_all(frame).await.context("tcp write")?;
    Ok(())
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        write_frame(&mut self.stream, &frame).await
    }

    /// Sends an already encoded frame.
    pub async fn send_frame(&mut self, frame: &Bytes) -> anyhow::Result<()> {
        write_frame(&mut self.stream, frame).await
    }

    /// Receives the next message; `None` when the peer closed the stream.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<T>> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned halves for a reader and a writer task.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_split();
        (FrameReader { half: read }, FrameWriter { half: write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
}

impl FrameReader {
    pub async fn recv<T: DeserializeOwned>(&mut self) -> anyhow::Result<Option<T>> {
        read_frame(&mut self.half).await
    }

    /// Next raw payload, undecoded. Lets a reader survive a frame it
    /// cannot parse; only transport errors are returned.
    pub async fn recv_payload(&mut self) -> anyhow::Result<Option<Vec<u8>>> {
        read_payload(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    pub async fn send<T: Serialize>(&mut self, msg: &T) -> anyhow::Result<()> {
        let frame = encode_frame(msg)?;
        write_frame(&mut self.half, &frame).await
    }

    pub async fn send_frame(&mut self, frame: &Bytes) -> anyhow::Result<()> {
        write_frame(&mut self.half, frame).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.half.shutdown().await.context("tcp shutdown")
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_tagged_by_event_name() {
        let json = serde_json::to_value(ClientMsg::Subscribe).unwrap();
        assert_eq!(json, serde_json::json!("subscribe"));

        let json = serde_json::to_value(ClientMsg::Join(JoinRequest {
            debug: DebugOptions {
                collider_wireframes: true,
            },
        }))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "join": { "debug": { "colliderWireframes": true } } })
        );
    }

    #[test]
    fn partial_and_null_intent_fields_are_neutral() {
        let msg: ClientMsg =
            decode_payload(br#"{"input": {"moveX": 1.0, "jump": null, "aimDirection": {"x": 1}}}"#)
                .unwrap();
        let ClientMsg::Input(intent) = msg else {
            panic!("expected input, got {msg:?}");
        };
        assert_eq!(intent.move_x, 1.0);
        assert_eq!(intent.move_z, 0.0);
        assert!(!intent.jump);
        assert!(!intent.primary);
        assert_eq!(intent.aim_direction, Vec3::new(1.0, 0.0, 0.0));

        let msg: ClientMsg = decode_payload(br#"{"input": {}}"#).unwrap();
        assert_eq!(msg, ClientMsg::Input(InputIntent::default()));
    }

    #[test]
    fn mistyped_intent_fields_are_neutral() {
        let msg: ClientMsg = decode_payload(
            br#"{"input": {"moveX": "a", "jump": 1, "moveZ": 0.5, "aimDirection": "up"}}"#,
        )
        .unwrap();
        let ClientMsg::Input(intent) = msg else {
            panic!("expected input, got {msg:?}");
        };
        assert_eq!(intent.move_x, 0.0);
        assert!(!intent.jump);
        assert_eq!(intent.move_z, 0.5);
        assert_eq!(intent.aim_direction, Vec3::default());
    }

    #[test]
    fn frame_carries_big_endian_length() {
        let frame = encode_frame(&ClientMsg::Leave).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let back: ClientMsg = decode_payload(&frame[4..]).unwrap();
        assert_eq!(back, ClientMsg::Leave);
    }

    #[tokio::test]
    async fn reliable_conn_reports_clean_close() -> anyhow::Result<()> {
        let listener = ReliableListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;
        let client = tokio::spawn(async move {
            let mut conn = ReliableConn::connect(addr).await?;
            conn.send(&ClientMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;
            anyhow::Ok(())
        });

        let (conn, _) = listener.accept().await?;
        let (mut reader, _writer) = conn.into_split();
        let first: Option<ClientMsg> = reader.recv().await?;
        assert_eq!(
            first,
            Some(ClientMsg::Hello {
                protocol: PROTOCOL_VERSION
            })
        );
        client.await??;
        let next: Option<ClientMsg> = reader.recv().await?;
        assert_eq!(next, None);
        Ok(())
    }
}
