//! Framed session transport.
//!
//! Owns one TCP connection and a pair of independent packet ciphers, and
//! runs the per-session receive loop for the session's entire lifetime.
//! Inbound frames are dispatched strictly in arrival order; outbound sends
//! are serialized by the session send lock and leave as a single write per
//! batch. Malformed, oversized, or failed reads are fail-closed: the
//! session is torn down and nothing is retried or partially dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, warn};

use crate::crypto::{CipherDirection, PacketCipher};

/// Largest frame the 2-byte header length can express.
pub const MAX_FRAME_LEN: usize = 0xFFFF;

/// Default initialization vectors. Real deployments agree on IVs through a
/// handshake owned by the embedder; both peers of this workspace read them
/// from the same config.
pub const DEFAULT_SEND_IV: [u8; 4] = [0x1F, 0x5A, 0xC3, 0x07];
pub const DEFAULT_RECV_IV: [u8; 4] = [0x8E, 0x24, 0x71, 0xB9];

/// Per-session transport configuration. Peers must hold matching version
/// and IVs or no header will ever validate.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub version: u16,
    pub send_iv: [u8; 4],
    pub recv_iv: [u8; 4],
    pub max_frame_len: usize,
    /// A peer silent for this long is disconnected.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: 1,
            send_iv: DEFAULT_SEND_IV,
            recv_iv: DEFAULT_RECV_IV,
            max_frame_len: MAX_FRAME_LEN,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// Callbacks the embedding session supplies at start.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// One decrypted inbound frame, in arrival order. The receive loop does
    /// not read the next header until this returns.
    async fn on_frame(&self, payload: Vec<u8>);

    /// Runs exactly once, after the connection and send cipher are
    /// released. Detach the session from higher-level state here.
    async fn on_close(&self);
}

struct SendHalf {
    cipher: PacketCipher,
    writer: OwnedWriteHalf,
}

struct RecvHalf {
    cipher: PacketCipher,
    reader: OwnedReadHalf,
}

/// One framed, enciphered session over a TCP connection.
pub struct SessionTransport {
    host: String,
    alive: AtomicBool,
    max_frame_len: usize,
    idle_timeout: Duration,
    send: tokio::sync::Mutex<Option<SendHalf>>,
    recv: Mutex<Option<RecvHalf>>,
    hooks: OnceLock<Arc<dyn SessionHooks>>,
    self_ref: Weak<SessionTransport>,
}

impl SessionTransport {
    /// Wraps a connected stream and allocates the directional cipher pair.
    /// The receive loop does not run until [`SessionTransport::start`]
    /// supplies the hook pair.
    pub fn new(stream: TcpStream, cfg: &SessionConfig) -> anyhow::Result<Arc<Self>> {
        stream.set_nodelay(true).context("set nodelay")?;
        let host = stream
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let (reader, writer) = stream.into_split();

        Ok(Arc::new_cyclic(|weak: &Weak<SessionTransport>| Self {
            host,
            alive: AtomicBool::new(true),
            max_frame_len: cfg.max_frame_len,
            idle_timeout: cfg.idle_timeout,
            send: tokio::sync::Mutex::new(Some(SendHalf {
                cipher: PacketCipher::new(cfg.version, cfg.send_iv, CipherDirection::Encrypt),
                writer,
            })),
            recv: Mutex::new(Some(RecvHalf {
                cipher: PacketCipher::new(cfg.version, cfg.recv_iv, CipherDirection::Decrypt),
                reader,
            })),
            hooks: OnceLock::new(),
            self_ref: weak.clone(),
        }))
    }

    /// Hands the read half and receive cipher to the spawned receive task.
    /// A second call is ignored.
    pub fn start(&self, hooks: Arc<dyn SessionHooks>) {
        if self.hooks.set(hooks).is_err() {
            debug!(host = %self.host, "session already started");
            return;
        }
        let recv = self.recv.lock().expect("recv half lock").take();
        if let (Some(recv), Some(transport)) = (recv, self.self_ref.upgrade()) {
            tokio::spawn(receive_loop(transport, recv));
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Sends one frame. See [`SessionTransport::send`].
    pub async fn send_frame(&self, frame: &[u8]) {
        self.send(&[frame]).await;
    }

    /// Encrypts a batch of frames and issues one write for the lot.
    /// Serialized against other sends on this session by the send lock,
    /// independent of the receive loop. On a dead session this is a silent
    /// no-op; a failed write closes the session instead of surfacing an
    /// error. Fire-and-forget either way.
    pub async fn send(&self, frames: &[&[u8]]) {
        if !self.is_alive() {
            return;
        }
        let mut guard = self.send.lock().await;
        let Some(half) = guard.as_mut() else {
            return;
        };
        let total: usize = frames.iter().map(|frame| 4 + frame.len()).sum();
        let mut out = BytesMut::with_capacity(total);
        for frame in frames {
            debug_assert!(frame.len() <= self.max_frame_len);
            let header = half.cipher.header_for(frame.len() as u16);
            out.put_slice(&header);
            let mut body = frame.to_vec();
            half.cipher.transform(&mut body);
            out.put_slice(&body);
        }
        if let Err(err) = half.writer.write_all(&out).await {
            debug!(host = %self.host, error = %err, "write failed, closing session");
            drop(guard);
            // Teardown runs on its own task: callers are allowed to send
            // while holding higher-level locks that the close hook takes.
            if let Some(transport) = self.self_ref.upgrade() {
                tokio::spawn(async move { transport.close().await });
            }
        }
    }

    /// Tears the session down. Idempotent: concurrent and repeated calls
    /// produce exactly one teardown, decided by an atomic swap of the
    /// aliveness flag. The winner releases the connection and send cipher,
    /// then runs the embedder's close hook before returning.
    pub async fn close(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(mut half) = self.send.lock().await.take() {
            let _ = half.writer.shutdown().await;
        }
        // A session that was never started still owns its receive state.
        drop(self.recv.lock().expect("recv half lock").take());
        if let Some(hooks) = self.hooks.get() {
            hooks.on_close().await;
        }
        debug!(host = %self.host, "session closed");
    }
}

/// Per-session receive process: 4-byte header, validation, exact payload
/// read, in-place decrypt, ordered dispatch. Every violation or I/O failure
/// ends the session; a partially read frame is never dispatched. The loop
/// rechecks aliveness each iteration, so an external close takes effect
/// once the in-flight read returns.
async fn receive_loop(transport: Arc<SessionTransport>, mut recv: RecvHalf) {
    let hooks = transport.hooks.get().cloned();
    while transport.is_alive() {
        let mut header = [0u8; 4];
        match time::timeout(transport.idle_timeout, recv.reader.read_exact(&mut header)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                debug!(host = %transport.host, error = %err, "header read failed");
                break;
            }
            Err(_) => {
                debug!(host = %transport.host, "idle timeout");
                break;
            }
        }

        let Some(len) = recv.cipher.decode_header(&header) else {
            warn!(host = %transport.host, "unverifiable frame header");
            break;
        };
        let len = len as usize;
        if len > transport.max_frame_len {
            warn!(host = %transport.host, len, "oversized frame");
            break;
        }

        let mut payload = vec![0u8; len];
        match time::timeout(transport.idle_timeout, recv.reader.read_exact(&mut payload)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                debug!(host = %transport.host, error = %err, "payload read failed");
                break;
            }
            Err(_) => {
                debug!(host = %transport.host, "peer stalled mid-frame");
                break;
            }
        }

        recv.cipher.transform(&mut payload);
        if let Some(hooks) = &hooks {
            hooks.on_frame(payload).await;
        }
    }
    transport.close().await;
}
