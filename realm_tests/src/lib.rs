//! Client-side socket harness speaking the framed cipher protocol.
//!
//! Mirrors the server's cipher setup: our send direction is the server's
//! receive direction and vice versa, advanced in lockstep frame by frame.

use std::time::Duration;

use anyhow::{bail, Context};
use realm_shared::config::RealmConfig;
use realm_shared::crypto::{CipherDirection, PacketCipher};
use realm_shared::packet::{Opcode, PacketReader, PacketWriter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct TestClient {
    stream: TcpStream,
    send_cipher: PacketCipher,
    recv_cipher: PacketCipher,
}

impl TestClient {
    pub async fn connect(cfg: &RealmConfig) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(&cfg.server_addr).await.context("connect")?;
        stream.set_nodelay(true).context("set nodelay")?;
        Ok(Self {
            stream,
            send_cipher: PacketCipher::new(cfg.version, cfg.recv_iv, CipherDirection::Encrypt),
            recv_cipher: PacketCipher::new(cfg.version, cfg.send_iv, CipherDirection::Decrypt),
        })
    }

    pub async fn send_frame(&mut self, frame: &[u8]) -> anyhow::Result<()> {
        let header = self.send_cipher.header_for(frame.len() as u16);
        let mut body = frame.to_vec();
        self.send_cipher.transform(&mut body);
        self.stream.write_all(&header).await.context("write header")?;
        self.stream.write_all(&body).await.context("write body")?;
        Ok(())
    }

    /// Receives one frame; fails on EOF or a header our cipher state cannot
    /// validate.
    pub async fn recv_frame(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await.context("read header")?;
        let Some(len) = self.recv_cipher.decode_header(&header) else {
            bail!("server sent unverifiable header");
        };
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload).await.context("read payload")?;
        self.recv_cipher.transform(&mut payload);
        Ok(payload)
    }

    /// Receives frames, discarding others, until one with `opcode` arrives.
    pub async fn recv_expect(&mut self, opcode: Opcode) -> anyhow::Result<Vec<u8>> {
        loop {
            let frame = self.recv_frame().await?;
            let mut r = PacketReader::new(&frame);
            if Opcode::from_u16(r.read_u16()?) == Some(opcode) {
                return Ok(frame);
            }
        }
    }

    /// Collects `count` frames carrying `opcode`, discarding others, within
    /// `timeout`.
    pub async fn collect(
        &mut self,
        opcode: Opcode,
        count: usize,
        timeout: Duration,
    ) -> anyhow::Result<Vec<Vec<u8>>> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut out = Vec::new();
        while out.len() < count {
            let frame = tokio::time::timeout_at(deadline, self.recv_frame())
                .await
                .context("timed out collecting frames")??;
            let mut r = PacketReader::new(&frame);
            if Opcode::from_u16(r.read_u16()?) == Some(opcode) {
                out.push(frame);
            }
        }
        Ok(out)
    }

    /// Logs in and returns the assigned character id.
    pub async fn login(&mut self, name: &str) -> anyhow::Result<i32> {
        let mut w = PacketWriter::new(Opcode::LoginRequest);
        w.write_str(name);
        self.send_frame(&w.into_vec()).await?;
        let frame = self.recv_expect(Opcode::LoginResult).await?;
        let mut r = PacketReader::new(&frame);
        r.read_u16()?;
        r.read_i32()
    }

    /// Bypasses the framing layer entirely. For malformed-traffic tests.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.write_all(bytes).await.context("write raw")?;
        Ok(())
    }

    /// Reads until the connection dies; Ok means the server closed or reset
    /// it. An error here means the server kept talking for too long.
    pub async fn expect_disconnect(&mut self) -> anyhow::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            let read = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .context("timed out waiting for disconnect")?;
            match read {
                Ok(0) | Err(_) => return Ok(()),
                Ok(_) => {}
            }
        }
    }
}
