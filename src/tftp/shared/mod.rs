use std::fmt;
use std::fmt::{Display, Formatter};

use byteorder::{ByteOrder, NetworkEndian};
use thiserror::Error;

use crate::tftp::shared::ack_packet::AckPacket;
use crate::tftp::shared::data_packet::DataPacket;
use crate::tftp::shared::err_packet::ErrorPacket;
use crate::tftp::shared::request_packet::RequestPacket;

pub mod ack_packet;
pub mod block_file;
pub mod data_channel;
pub mod data_packet;
pub mod diag;
pub mod err_packet;
pub mod request_packet;
pub mod validate;

/// Length of the opcode field in bytes.
pub const OP_LEN: usize = 2;
/// Length of the block number field in bytes.
pub const BLK_NUM_LEN: usize = 2;
/// Stride size for reading / writing files.
pub const STRIDE_SIZE: usize = 512;
/// Largest datagram a transfer ever carries: opcode + block number + one stride.
pub const MAX_PACKET_SIZE: usize = OP_LEN + BLK_NUM_LEN + STRIDE_SIZE;

/// Op code for Read Request
pub const OP_RRQ: u16 = 0x001;
/// Op code for Write Request
pub const OP_WRQ: u16 = 0x002;
/// Op code for Data packet
pub const OP_DATA: u16 = 0x003;
/// Op code for ACK packet
pub const OP_ACK: u16 = 0x004;
/// Op code for Error packet
pub const OP_ERR: u16 = 0x005;

#[derive(Debug, Eq, PartialEq)]
pub enum TFTPPacket {
    RRQ(RequestPacket),
    WRQ(RequestPacket),
    ACK(AckPacket),
    ERR(ErrorPacket),
    DATA(DataPacket),
}

impl Display for TFTPPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let desc = match self {
            TFTPPacket::RRQ(p) => format!("RRQ [{}] [{}]", p.filename(), p.mode()),
            TFTPPacket::WRQ(p) => format!("WRQ [{}] [{}]", p.filename(), p.mode()),
            TFTPPacket::ACK(p) => format!("ACK [{}]", p.blk()),
            TFTPPacket::ERR(p) => format!("ERR [{}]: {}", p.code(), p.message()),
            TFTPPacket::DATA(p) => format!("DATA [{}]", p.blk()),
        };

        write!(f, "{}", desc)
    }
}

/// Errors raised by the codec alone. Whether a structurally decodable
/// packet is acceptable at the current point of a transfer is the
/// validators' call, not the codec's.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PacketError {
    #[error("packet too short [{0} bytes]")]
    Truncated(usize),
    #[error("unrecognized opcode [{0}]")]
    UnknownOpcode(u16),
    #[error("packet would exceed the {max} byte datagram ceiling")]
    Oversized { max: usize },
    #[error("text field is not valid UTF-8")]
    BadText,
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

pub trait Serializable {
    fn serialize(self) -> Vec<u8>;
}

/// Decodes a raw UDP payload into a typed packet, dispatching on the opcode.
pub fn parse_packet(buf: &[u8]) -> Result<TFTPPacket, PacketError> {
    if buf.len() < OP_LEN {
        return Err(PacketError::Truncated(buf.len()));
    }

    match NetworkEndian::read_u16(buf) {
        OP_RRQ | OP_WRQ => RequestPacket::from_bytes(buf),
        OP_ACK => AckPacket::from_bytes(buf),
        OP_ERR => ErrorPacket::from_bytes(buf),
        OP_DATA => DataPacket::from_bytes(buf),
        val => Err(PacketError::UnknownOpcode(val)),
    }
}

/// Reads the opcode of a raw buffer, if it has one.
pub fn peek_op(buf: &[u8]) -> Option<u16> {
    if buf.len() < OP_LEN {
        None
    } else {
        Some(NetworkEndian::read_u16(buf))
    }
}
