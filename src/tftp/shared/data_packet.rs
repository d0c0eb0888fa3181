use std::io::Write;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{
    PacketError, Serializable, TFTPPacket, BLK_NUM_LEN, OP_DATA, OP_LEN, STRIDE_SIZE,
};

#[derive(Debug, Eq, PartialEq)]
pub struct DataPacket {
    op: u16,
    blk: u16,
    data: Vec<u8>,
}

impl DataPacket {
    /// Builds a DATA packet, refusing payloads that would not fit a
    /// single datagram. A packet that failed to build is never
    /// partially encoded.
    pub fn new(blk: u16, data: Vec<u8>) -> Result<Self, PacketError> {
        if data.len() > STRIDE_SIZE {
            return Err(PacketError::Oversized {
                max: OP_LEN + BLK_NUM_LEN + STRIDE_SIZE,
            });
        }

        Ok(DataPacket {
            op: OP_DATA,
            blk,
            data,
        })
    }

    pub fn blk(&self) -> u16 {
        self.blk
    }

    /// A payload shorter than one stride marks the final block.
    pub fn is_final(&self) -> bool {
        self.data.len() < STRIDE_SIZE
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn from_bytes(buf: &[u8]) -> Result<TFTPPacket, PacketError> {
        if buf.len() < OP_LEN + BLK_NUM_LEN {
            return Err(PacketError::Truncated(buf.len()));
        }

        let op: u16 = NetworkEndian::read_u16(&buf[0..OP_LEN]);
        if OP_DATA != op {
            return Err(PacketError::UnknownOpcode(op));
        }

        let blk = NetworkEndian::read_u16(&buf[OP_LEN..OP_LEN + BLK_NUM_LEN]);
        let data = &buf[OP_LEN + BLK_NUM_LEN..];

        let p = DataPacket::new(blk, data.to_vec())?;
        Ok(TFTPPacket::DATA(p))
    }
}

impl Serializable for DataPacket {
    fn serialize(self) -> Vec<u8> {
        let buf_len = OP_LEN + BLK_NUM_LEN + self.data.len();
        let mut buf: Vec<u8> = Vec::with_capacity(buf_len);
        buf.write_u16::<NetworkEndian>(self.op).unwrap();
        buf.write_u16::<NetworkEndian>(self.blk).unwrap();
        buf.write_all(self.data.as_slice()).unwrap();

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_data_packet() {
        let p = DataPacket::new(3, vec![0xAA, 0xBB]).unwrap();
        assert_eq!(p.serialize(), vec![0x0, 0x3, 0x0, 0x3, 0xAA, 0xBB]);
    }

    #[test]
    fn deserialize_data_packet() {
        let buf = vec![0x0, 0x3, 0x0, 0x3, 0xAA, 0xBB];
        if let TFTPPacket::DATA(p) = DataPacket::from_bytes(&buf).unwrap() {
            assert_eq!(p.blk(), 3);
            assert_eq!(p.data(), &[0xAA, 0xBB]);
            assert!(p.is_final());
        } else {
            panic!("Wrong packet type")
        }
    }

    #[test]
    fn empty_payload_is_final() {
        let p = DataPacket::new(9, Vec::new()).unwrap();
        assert!(p.is_final());
        assert_eq!(p.serialize().len(), 4);
    }

    #[test]
    fn full_stride_is_not_final() {
        let p = DataPacket::new(1, vec![0u8; STRIDE_SIZE]).unwrap();
        assert!(!p.is_final());
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let e = DataPacket::new(1, vec![0u8; STRIDE_SIZE + 1]).unwrap_err();
        assert!(matches!(e, PacketError::Oversized { .. }));
    }
}
