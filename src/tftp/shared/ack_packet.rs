/// ACK packets are acknowledged by DATA or ERROR packets.
/// The block number in an ACK echoes the block number of the
/// DATA packet being acknowledged; a WRQ is acknowledged with
/// an ACK carrying block number zero.
use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{PacketError, Serializable, TFTPPacket, OP_ACK, OP_LEN};

/// Exact wire size of an ACK.
pub const ACK_LEN: usize = 4;
const BLK_NUM_OFFSET: usize = 2;

#[derive(Debug, Eq, PartialEq)]
pub struct AckPacket {
    op: u16,
    blk: u16,
}

impl AckPacket {
    pub fn new(blk: u16) -> Self {
        AckPacket { op: OP_ACK, blk }
    }

    pub fn blk(&self) -> u16 {
        self.blk
    }

    pub fn from_bytes(buf: &[u8]) -> Result<TFTPPacket, PacketError> {
        if buf.len() < ACK_LEN {
            return Err(PacketError::Truncated(buf.len()));
        }

        let op = NetworkEndian::read_u16(&buf[0..OP_LEN]);
        if op != OP_ACK {
            return Err(PacketError::UnknownOpcode(op));
        }

        let blk = NetworkEndian::read_u16(&buf[BLK_NUM_OFFSET..]);
        Ok(TFTPPacket::ACK(AckPacket::new(blk)))
    }
}

impl Serializable for AckPacket {
    fn serialize(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ACK_LEN);
        buf.write_u16::<NetworkEndian>(self.op).unwrap();
        buf.write_u16::<NetworkEndian>(self.blk).unwrap();

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_ack_packet() {
        let blk = 42;
        let p = AckPacket::new(blk);

        let mut buf: Vec<u8> = Vec::new();
        buf.write_u16::<NetworkEndian>(OP_ACK).unwrap();
        buf.write_u16::<NetworkEndian>(blk).unwrap();

        assert_eq!(p.serialize(), buf);
    }

    #[test]
    fn deserialize_ack_packet() {
        let blk = 42;
        let mut buf: Vec<u8> = Vec::new();
        buf.write_u16::<NetworkEndian>(OP_ACK).unwrap();
        buf.write_u16::<NetworkEndian>(blk).unwrap();

        let p = AckPacket::new(blk);
        if let TFTPPacket::ACK(d) = AckPacket::from_bytes(&buf).unwrap() {
            assert_eq!(d, p);
        }
    }

    #[test]
    fn deserialize_error() {
        let blk = 42;
        let bad_op = OP_ACK + 1;
        let mut buf: Vec<u8> = Vec::new();
        buf.write_u16::<NetworkEndian>(bad_op).unwrap();
        buf.write_u16::<NetworkEndian>(blk).unwrap();

        let e = AckPacket::from_bytes(&buf).unwrap_err();
        assert_eq!(e, PacketError::UnknownOpcode(bad_op));
    }
}
