//! Explicit little-endian packet codec.
//!
//! Every frame carries a u16 opcode followed by fields owned by that
//! opcode's handler. Serialization stays explicit and versionable; the
//! transport below this layer treats the result as opaque bytes.

use anyhow::{bail, Context};

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    LoginRequest = 0x0001,
    LoginResult = 0x0002,
    Ping = 0x0011,
    Pong = 0x0012,
    PlayerMove = 0x0020,
    MobControlRequest = 0x0030,
    MobControlRelease = 0x0031,
    MobMove = 0x0032,
}

impl Opcode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0001 => Some(Self::LoginRequest),
            0x0002 => Some(Self::LoginResult),
            0x0011 => Some(Self::Ping),
            0x0012 => Some(Self::Pong),
            0x0020 => Some(Self::PlayerMove),
            0x0030 => Some(Self::MobControlRequest),
            0x0031 => Some(Self::MobControlRelease),
            0x0032 => Some(Self::MobMove),
            _ => None,
        }
    }
}

/// Builder for one outbound frame.
#[derive(Debug)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(opcode: Opcode) -> Self {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&(opcode as u16).to_le_bytes());
        Self { buf }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// u16-length-prefixed UTF-8.
    pub fn write_str(&mut self, v: &str) -> &mut Self {
        self.write_u16(v.len() as u16);
        self.buf.extend_from_slice(v.as_bytes());
        self
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked reader over one inbound frame.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            bail!(
                "packet underflow: wanted {} bytes at offset {}, frame is {}",
                n,
                self.pos,
                self.buf.len()
            );
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> anyhow::Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_f32(&mut self) -> anyhow::Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_str(&mut self) -> anyhow::Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)
            .context("invalid utf-8 in string field")?
            .to_string())
    }

    /// Whatever the handler has not consumed yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_roundtrip() {
        let mut w = PacketWriter::new(Opcode::LoginRequest);
        w.write_u8(7)
            .write_u16(513)
            .write_i32(-44)
            .write_f32(2.5)
            .write_str("Aria");
        let frame = w.into_vec();

        let mut r = PacketReader::new(&frame);
        assert_eq!(Opcode::from_u16(r.read_u16().unwrap()), Some(Opcode::LoginRequest));
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u16().unwrap(), 513);
        assert_eq!(r.read_i32().unwrap(), -44);
        assert_eq!(r.read_f32().unwrap(), 2.5);
        assert_eq!(r.read_str().unwrap(), "Aria");
        assert!(r.remaining().is_empty());
    }

    #[test]
    fn underflow_is_an_error() {
        let mut r = PacketReader::new(&[0x01]);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut w = PacketWriter::new(Opcode::Ping);
        w.write_u16(100);
        let frame = w.into_vec();
        let mut r = PacketReader::new(&frame);
        r.read_u16().unwrap();
        assert!(r.read_str().is_err());
    }

    #[test]
    fn unknown_opcode_maps_to_none() {
        assert_eq!(Opcode::from_u16(0xBEEF), None);
    }
}
