//! Accept loop and server lifecycle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use realm_shared::config::RealmConfig;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::session::ClientSession;
use crate::world::World;

/// Realm server: listens for client connections and hands each one to a
/// session with its own receive task.
pub struct RealmServer {
    cfg: RealmConfig,
    listener: TcpListener,
    world: Arc<World>,
    sessions: Mutex<Vec<Arc<ClientSession>>>,
}

impl RealmServer {
    pub async fn bind(cfg: RealmConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self {
            cfg,
            listener,
            world: World::new(),
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Live session count. Prunes closed sessions as a side effect, which
    /// is what finally drops them.
    pub fn session_count(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        sessions.retain(|session| session.is_alive());
        sessions.len()
    }

    /// Accepts exactly one client.
    pub async fn accept_one(&self) -> anyhow::Result<Arc<ClientSession>> {
        let (stream, peer) = self.listener.accept().await.context("tcp accept")?;
        let session = ClientSession::open(stream, &self.cfg.session_config(), self.world.clone())?;
        let mut sessions = self.sessions.lock().expect("sessions lock");
        sessions.retain(|session| session.is_alive());
        sessions.push(session.clone());
        info!(%peer, sessions = sessions.len(), "client connected");
        Ok(session)
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "realm server listening");
        loop {
            if let Err(err) = self.accept_one().await {
                warn!(error = %err, "accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(mut cfg: RealmConfig) -> anyhow::Result<(Arc<RealmServer>, RealmConfig)> {
    cfg.server_addr = "127.0.0.1:0".to_string();
    let server = RealmServer::bind(cfg.clone()).await?;
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((Arc::new(server), cfg))
}
