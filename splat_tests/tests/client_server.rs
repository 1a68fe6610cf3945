//! Full socket-based integration tests for client ↔ server communication.

use std::time::Duration;

use splat_client::{input::InputState, GameClient};
use splat_shared::{
    components::{Player, Position},
    net::{decode_payload, encode_frame, ClientMsg, JoinRequest, ReliableConn, ServerMsg, PROTOCOL_VERSION},
};
use splat_tests::{init_tracing, TestServer};

const WAIT: Duration = Duration::from_secs(2);

/// Unit-style test: protocol messages survive the frame codec.
#[test]
fn protocol_frames_decode() -> anyhow::Result<()> {
    let hello = ClientMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    let frame = encode_frame(&hello)?;
    assert_eq!(decode_payload::<ClientMsg>(&frame[4..])?, hello);

    // Missing or mistyped intent fields fall back to neutral values.
    let msg: ClientMsg = decode_payload(br#"{"input":{"moveX":1,"jump":null,"crouch":"yes"}}"#)?;
    match msg {
        ClientMsg::Input(intent) => {
            assert_eq!(intent.move_x, 1.0);
            assert!(!intent.jump);
            assert!(!intent.crouch);
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spectator_mirrors_world_without_joining() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;

    let mut client = GameClient::connect(server.addr).await?;
    client.subscribe().await?;
    let first = client.wait_update(WAIT).await?;
    let second = client.wait_update(WAIT).await?;
    assert!(second > first);

    // Only the floor exists.
    assert_eq!(client.world().len(), 1);
    assert!(client.me().is_none());

    client.unsubscribe().await?;
    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_then_leave_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;

    let mut client = GameClient::connect(server.addr).await?;
    let me = client.join().await?;
    assert_eq!(client.me(), Some(me));
    assert_eq!(client.my_player(), Some(Player::default()));

    // Joining subscribes; the entity stays in every update.
    client.wait_update(WAIT).await?;
    assert!(client.world().is_alive(me));

    client.leave().await?;
    // Updates already in flight may still carry the entity.
    let mut gone = false;
    for _ in 0..10 {
        client.wait_update(WAIT).await?;
        if !client.world().is_alive(me) {
            gone = true;
            break;
        }
    }
    assert!(gone, "player entity should disappear after leave");
    assert!(client.me().is_none());

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn other_clients_see_the_player() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;

    let mut player = GameClient::connect(server.addr).await?;
    let mut viewer = GameClient::connect(server.addr).await?;
    assert_ne!(player.session_id, viewer.session_id);

    viewer.subscribe().await?;
    let entity = player.join().await?;

    let mut seen = false;
    for _ in 0..10 {
        viewer.wait_update(WAIT).await?;
        if viewer.world().has::<Player>(entity) {
            seen = true;
            break;
        }
    }
    assert!(seen);
    assert!(viewer.me().is_none());

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn move_intent_pushes_the_player() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;

    let mut client = GameClient::connect(server.addr).await?;
    client.join().await?;
    let start = client.my_position().map(|p: Position| p.x).unwrap_or_default();

    // Yaw -90° faces +x.
    let input = InputState {
        forward: 1.0,
        yaw: -std::f32::consts::FRAC_PI_2,
        ..InputState::default()
    };
    for _ in 0..15 {
        client.send_input(input.to_intent()).await?;
        client.wait_update(WAIT).await?;
    }

    let end = client.my_position().map(|p| p.x).unwrap_or_default();
    assert!(end > start + 0.2, "moved from {start} to {end}");

    server.stop().await
}

/// Raw connection helper: handshake and return the stream.
async fn raw_connect(server: &TestServer) -> anyhow::Result<ReliableConn> {
    let mut conn = ReliableConn::connect(server.addr).await?;
    conn.send(&ClientMsg::Hello {
        protocol: PROTOCOL_VERSION,
    })
    .await?;
    match conn.recv::<ServerMsg>().await? {
        Some(ServerMsg::Welcome { .. }) => Ok(conn),
        other => anyhow::bail!("expected welcome, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_join_is_ignored() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;
    let mut conn = raw_connect(&server).await?;

    let join = ClientMsg::Join(JoinRequest::default());
    conn.send(&join).await?;
    conn.send(&join).await?;

    let mut joined = 0;
    let mut updates = 0;
    while updates < 10 {
        match tokio::time::timeout(WAIT, conn.recv::<ServerMsg>()).await?? {
            Some(ServerMsg::Joined(snapshot)) => {
                assert!(snapshot.owner().is_some());
                joined += 1;
            }
            Some(ServerMsg::Update(snapshot)) => {
                assert!(snapshot.owner().is_none(), "broadcasts never carry Owner");
                assert_eq!(snapshot.table("Player").map(|t| t.len()), Some(1));
                updates += 1;
            }
            other => anyhow::bail!("unexpected {other:?}"),
        }
    }
    assert_eq!(joined, 1);

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_messages_keep_the_connection() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;
    let mut conn = raw_connect(&server).await?;

    // Unknown event name, then a payload that is not a message at all.
    conn.send(&"teleport").await?;
    conn.send(&42u32).await?;
    conn.send(&ClientMsg::Join(JoinRequest::default())).await?;

    loop {
        match tokio::time::timeout(WAIT, conn.recv::<ServerMsg>()).await?? {
            Some(ServerMsg::Joined(snapshot)) => {
                assert!(snapshot.owner().is_some());
                break;
            }
            Some(ServerMsg::Update(_)) => continue,
            other => anyhow::bail!("unexpected {other:?}"),
        }
    }

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn protocol_mismatch_is_refused() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;

    let mut conn = ReliableConn::connect(server.addr).await?;
    conn.send(&ClientMsg::Hello {
        protocol: PROTOCOL_VERSION + 1,
    })
    .await?;
    match tokio::time::timeout(WAIT, conn.recv::<ServerMsg>()).await?? {
        Some(ServerMsg::Disconnect { reason }) => assert!(reason.contains("unsupported")),
        other => anyhow::bail!("expected disconnect, got {other:?}"),
    }
    assert!(tokio::time::timeout(WAIT, conn.recv::<ServerMsg>())
        .await??
        .is_none());

    // Anything before hello is refused.
    let mut conn = ReliableConn::connect(server.addr).await?;
    conn.send(&ClientMsg::Subscribe).await?;
    match tokio::time::timeout(WAIT, conn.recv::<ServerMsg>()).await?? {
        Some(ServerMsg::Disconnect { reason }) => assert_eq!(reason, "expected hello"),
        other => anyhow::bail!("expected disconnect, got {other:?}"),
    }

    server.stop().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_releases_the_player() -> anyhow::Result<()> {
    init_tracing();
    let server = TestServer::start(30).await?;

    let mut viewer = GameClient::connect(server.addr).await?;
    viewer.subscribe().await?;

    let mut player = GameClient::connect(server.addr).await?;
    let entity = player.join().await?;

    let mut seen = false;
    for _ in 0..10 {
        viewer.wait_update(WAIT).await?;
        if viewer.world().is_alive(entity) {
            seen = true;
            break;
        }
    }
    assert!(seen);
    drop(player);

    let mut gone = false;
    for _ in 0..20 {
        viewer.wait_update(WAIT).await?;
        if !viewer.world().is_alive(entity) {
            gone = true;
            break;
        }
    }
    assert!(gone, "dropped connection should despawn its player");

    server.stop().await
}
