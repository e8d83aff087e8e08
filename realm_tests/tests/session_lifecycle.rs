//! Socket-level tests for session lifecycle over the framed cipher
//! protocol.

use std::sync::Arc;
use std::time::Duration;

use realm_server::object::MapObject;
use realm_server::server::bind_ephemeral;
use realm_server::world::DEFAULT_MAP;
use realm_server::RealmServer;
use realm_shared::config::RealmConfig;
use realm_shared::math::Point;
use realm_shared::packet::{Opcode, PacketWriter};
use realm_tests::TestClient;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Spawns a server whose accept loop runs in the background.
async fn spawn_server(cfg: RealmConfig) -> anyhow::Result<(Arc<RealmServer>, RealmConfig)> {
    let (server, cfg) = bind_ephemeral(cfg).await?;
    let accepting = server.clone();
    tokio::spawn(async move { accepting.run().await });
    Ok((server, cfg))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_then_ping_pong() -> anyhow::Result<()> {
    init_tracing();
    let (_server, cfg) = spawn_server(RealmConfig::default()).await?;

    let mut client = TestClient::connect(&cfg).await?;
    let character_id = client.login("Aria").await?;
    assert!(character_id > 0);

    for _ in 0..5 {
        client.send_frame(&PacketWriter::new(Opcode::Ping).into_vec()).await?;
    }
    let pongs = client.collect(Opcode::Pong, 5, Duration::from_secs(5)).await?;
    assert_eq!(pongs.len(), 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frames_dispatch_in_arrival_order() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = spawn_server(RealmConfig::default()).await?;

    let mut client = TestClient::connect(&cfg).await?;
    let character_id = client.login("Brin").await?;

    for i in 0..50i32 {
        let mut w = PacketWriter::new(Opcode::PlayerMove);
        w.write_f32(i as f32).write_f32(-i as f32);
        client.send_frame(&w.into_vec()).await?;
    }
    // The pong proves every move before the ping was already dispatched.
    client.send_frame(&PacketWriter::new(Opcode::Ping).into_vec()).await?;
    client.recv_expect(Opcode::Pong).await?;

    let map = server.world().map(DEFAULT_MAP);
    let player = map
        .players
        .lock()
        .unwrap()
        .get(character_id)
        .cloned()
        .expect("player registered");
    assert_eq!(player.position(), Point::new(49.0, -49.0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn garbage_header_disconnects() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = spawn_server(RealmConfig::default()).await?;

    let mut client = TestClient::connect(&cfg).await?;
    client.write_raw(&[0xDE, 0xAD, 0xBE, 0xEF]).await?;
    client.expect_disconnect().await?;

    // Nothing was dispatched: no player ever appeared.
    let map = server.world().map(DEFAULT_MAP);
    assert!(map.players.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_frame_disconnects_before_dispatch() -> anyhow::Result<()> {
    init_tracing();
    let mut cfg = RealmConfig::default();
    cfg.max_frame_len = 64;
    let (server, cfg) = spawn_server(cfg).await?;

    let mut client = TestClient::connect(&cfg).await?;
    // A login-shaped frame one byte over the cap: were it dispatched, a
    // player would appear.
    let mut w = PacketWriter::new(Opcode::LoginRequest);
    w.write_str(&"x".repeat(61));
    let frame = w.into_vec();
    assert_eq!(frame.len(), 65);
    client.send_frame(&frame).await?;

    client.expect_disconnect().await?;
    let map = server.world().map(DEFAULT_MAP);
    assert!(map.players.lock().unwrap().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_session_times_out() -> anyhow::Result<()> {
    init_tracing();
    let mut cfg = RealmConfig::default();
    cfg.idle_timeout_secs = 1;
    let (_server, cfg) = spawn_server(cfg).await?;

    let mut client = TestClient::connect(&cfg).await?;
    client.expect_disconnect().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_close_detaches_once_and_send_goes_quiet() -> anyhow::Result<()> {
    init_tracing();
    let (server, cfg) = bind_ephemeral(RealmConfig::default()).await?;

    let connect = {
        let cfg = cfg.clone();
        tokio::spawn(async move { TestClient::connect(&cfg).await })
    };
    let session = server.accept_one().await?;
    let mut client = connect.await??;
    let character_id = client.login("Caz").await?;

    let map = server.world().map(DEFAULT_MAP);
    assert!(map.players.lock().unwrap().get(character_id).is_some());

    let mut closers = Vec::new();
    for _ in 0..8 {
        let session = session.clone();
        closers.push(tokio::spawn(async move { session.close().await }));
    }
    for task in closers {
        task.await?;
    }

    assert!(!session.is_alive());
    assert!(map.players.lock().unwrap().is_empty());
    client.expect_disconnect().await?;

    // Send on a dead session stays a permanent silent no-op.
    session.send_frame(b"ignored").await;
    assert!(!session.is_alive());
    Ok(())
}
