use std::io::Write;
use std::str;

use byteorder::NetworkEndian;
use byteorder::{ByteOrder, WriteBytesExt};

use crate::tftp::shared::{
    PacketError, Serializable, TFTPPacket, MAX_PACKET_SIZE, OP_LEN, OP_RRQ, OP_WRQ,
};

/// Total length of the two NUL separators in a request packet.
const REQUEST_SEP_LEN: usize = 2;

/// An RRQ or WRQ. The opcode is the only difference between the two
/// shapes, so one struct carries both.
#[derive(Debug, Eq, PartialEq)]
pub struct RequestPacket {
    op: u16,
    filename: String,
    mode: String,
}

impl RequestPacket {
    pub fn new_rrq(filename: &str, mode: &str) -> Result<Self, PacketError> {
        RequestPacket::new(OP_RRQ, filename, mode)
    }

    pub fn new_wrq(filename: &str, mode: &str) -> Result<Self, PacketError> {
        RequestPacket::new(OP_WRQ, filename, mode)
    }

    fn new(op: u16, filename: &str, mode: &str) -> Result<Self, PacketError> {
        if filename.is_empty() {
            return Err(PacketError::MissingField("filename"));
        }

        let wire_len = OP_LEN + filename.len() + mode.len() + REQUEST_SEP_LEN;
        if wire_len > MAX_PACKET_SIZE {
            return Err(PacketError::Oversized {
                max: MAX_PACKET_SIZE,
            });
        }

        Ok(RequestPacket {
            op,
            filename: String::from(filename),
            mode: String::from(mode),
        })
    }

    pub fn op(&self) -> u16 {
        self.op
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn is_read(&self) -> bool {
        self.op == OP_RRQ
    }

    /// Decodes the two NUL-terminated text fields following the opcode.
    pub fn from_bytes(buf: &[u8]) -> Result<TFTPPacket, PacketError> {
        let op: u16 = NetworkEndian::read_u16(&buf[0..OP_LEN]);
        if ![OP_RRQ, OP_WRQ].contains(&op) {
            return Err(PacketError::UnknownOpcode(op));
        }

        let body = &buf[OP_LEN..];
        let mut fields = body.split(|&byte| byte == 0).filter(|s| !s.is_empty());

        let filename = fields.next().ok_or(PacketError::MissingField("filename"))?;
        let mode = fields.next().ok_or(PacketError::MissingField("mode"))?;

        let filename = str::from_utf8(filename).map_err(|_| PacketError::BadText)?;
        let mode = str::from_utf8(mode).map_err(|_| PacketError::BadText)?;

        let req = RequestPacket::new(op, filename, mode)?;
        let packet = match op {
            OP_RRQ => TFTPPacket::RRQ(req),
            _ => TFTPPacket::WRQ(req),
        };

        Ok(packet)
    }
}

impl Serializable for RequestPacket {
    fn serialize(self) -> Vec<u8> {
        let length = OP_LEN + self.filename.len() + self.mode.len() + REQUEST_SEP_LEN;
        let mut buf = Vec::with_capacity(length);

        buf.write_u16::<NetworkEndian>(self.op).unwrap();
        buf.write_all(self.filename.as_bytes()).unwrap();
        buf.write_u8(0).unwrap();
        buf.write_all(self.mode.as_bytes()).unwrap();
        buf.write_u8(0).unwrap();
        buf
    }
}
