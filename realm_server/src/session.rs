//! Client sessions: the embedder side of the session transport.
//!
//! A `ClientSession` supplies the transport's hook pair. Frame payloads are
//! interpreted here and nowhere below: a payload the handlers cannot parse
//! is dropped with a log line, not a transport failure. Teardown detaches
//! the player from the world, which releases and reassigns any delegated
//! mobs.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use realm_shared::math::Point;
use realm_shared::net::{SessionConfig, SessionHooks, SessionTransport};
use realm_shared::packet::{Opcode, PacketReader, PacketWriter};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::object::MapObject;
use crate::player::Player;
use crate::world::{World, DEFAULT_MAP};

/// One connected client: its transport plus the player it is logged in as.
pub struct ClientSession {
    transport: Arc<SessionTransport>,
    world: Arc<World>,
    player: Mutex<Option<Arc<Player>>>,
    self_ref: Weak<ClientSession>,
}

impl ClientSession {
    /// Wraps an accepted connection and starts its receive loop.
    pub fn open(
        stream: TcpStream,
        cfg: &SessionConfig,
        world: Arc<World>,
    ) -> anyhow::Result<Arc<Self>> {
        let transport = SessionTransport::new(stream, cfg)?;
        let session = Arc::new_cyclic(|weak: &Weak<ClientSession>| Self {
            transport: transport.clone(),
            world,
            player: Mutex::new(None),
            self_ref: weak.clone(),
        });
        transport.start(Arc::new(Hooks {
            session: Arc::downgrade(&session),
        }));
        info!(host = %transport.host(), "session opened");
        Ok(session)
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub fn player(&self) -> Option<Arc<Player>> {
        self.player.lock().expect("player lock").clone()
    }

    pub async fn send_frame(&self, frame: &[u8]) {
        self.transport.send_frame(frame).await;
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    async fn handle_frame(&self, payload: Vec<u8>) {
        if let Err(err) = self.dispatch(&payload).await {
            debug!(host = %self.host(), error = %err, "dropped frame");
        }
    }

    async fn dispatch(&self, payload: &[u8]) -> anyhow::Result<()> {
        let mut r = PacketReader::new(payload);
        let raw = r.read_u16()?;
        match Opcode::from_u16(raw) {
            Some(Opcode::LoginRequest) => self.on_login(&mut r).await,
            Some(Opcode::Ping) => {
                self.transport
                    .send_frame(&PacketWriter::new(Opcode::Pong).into_vec())
                    .await;
                Ok(())
            }
            Some(Opcode::PlayerMove) => self.on_player_move(&mut r),
            Some(Opcode::MobMove) => self.on_mob_move(&mut r),
            Some(other) => {
                debug!(host = %self.host(), opcode = ?other, "unhandled opcode");
                Ok(())
            }
            None => {
                debug!(host = %self.host(), opcode = raw, "unknown opcode");
                Ok(())
            }
        }
    }

    async fn on_login(&self, r: &mut PacketReader<'_>) -> anyhow::Result<()> {
        let name = r.read_str()?;
        if self.player.lock().expect("player lock").is_some() {
            debug!(host = %self.host(), "duplicate login ignored");
            return Ok(());
        }
        let map = self.world.map(DEFAULT_MAP);
        let character_id = self.world.allocate_character_id();
        let player = Player::new(character_id, name.clone(), map.spawn_point, self.self_ref.clone());
        *self.player.lock().expect("player lock") = Some(player.clone());
        map.enter(&player).await;

        let mut w = PacketWriter::new(Opcode::LoginResult);
        w.write_i32(character_id).write_u32(map.id.0);
        self.transport.send_frame(&w.into_vec()).await;
        info!(host = %self.host(), name = %name, character_id, "player logged in");
        Ok(())
    }

    fn on_player_move(&self, r: &mut PacketReader<'_>) -> anyhow::Result<()> {
        let x = r.read_f32()?;
        let y = r.read_f32()?;
        if let Some(player) = self.player() {
            player.set_position(Point::new(x, y));
        }
        Ok(())
    }

    /// Movement reports are accepted only from the mob's current
    /// controller; anything else is a stale or spoofed report.
    fn on_mob_move(&self, r: &mut PacketReader<'_>) -> anyhow::Result<()> {
        let object_id = r.read_i32()?;
        let x = r.read_f32()?;
        let y = r.read_f32()?;
        let Some(player) = self.player() else {
            return Ok(());
        };
        let Some(map) = player.map() else {
            return Ok(());
        };
        let mob = map.mobs.lock().expect("mobs lock").get(object_id).cloned();
        let Some(mob) = mob else {
            return Ok(());
        };
        if !mob.controller().is_some_and(|c| c.id() == player.id()) {
            debug!(mob = object_id, player = player.id(), "move from non-controller dropped");
            return Ok(());
        }
        mob.set_position(Point::new(x, y));
        Ok(())
    }

    async fn handle_close(&self) {
        let player = self.player.lock().expect("player lock").take();
        if let Some(player) = player {
            if let Some(map) = player.map() {
                map.leave(&player).await;
            }
        }
        info!(host = %self.host(), "session detached");
    }
}

struct Hooks {
    session: Weak<ClientSession>,
}

#[async_trait]
impl SessionHooks for Hooks {
    async fn on_frame(&self, payload: Vec<u8>) {
        if let Some(session) = self.session.upgrade() {
            session.handle_frame(payload).await;
        }
    }

    async fn on_close(&self) {
        if let Some(session) = self.session.upgrade() {
            session.handle_close().await;
        }
    }
}
