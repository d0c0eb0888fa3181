/// An ERROR packet can be the acknowledgment of any other type of
/// packet. The error code is an integer indicating the nature of the
/// error; the message is intended for human consumption and, like all
/// other strings, is terminated with a zero byte.
use std::io::Write;

use byteorder::{ByteOrder, NetworkEndian, WriteBytesExt};

use crate::tftp::shared::{PacketError, Serializable, TFTPPacket, OP_ERR, OP_LEN};

/// ERROR header: opcode + error code.
pub const ERR_HEADER_LEN: usize = 4;
/// Largest error code assigned by RFC 1350.
pub const MAX_ERR_CODE: u16 = 6;

/// The error codes RFC 1350 assigns.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TFTPError {
    UndefinedError,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTID,
    FileExists,
}

impl TFTPError {
    pub fn code(self) -> u16 {
        match self {
            TFTPError::UndefinedError => 0,
            TFTPError::FileNotFound => 1,
            TFTPError::AccessViolation => 2,
            TFTPError::DiskFull => 3,
            TFTPError::IllegalOperation => 4,
            TFTPError::UnknownTID => 5,
            TFTPError::FileExists => 6,
        }
    }

    pub fn canonical_message(self) -> &'static str {
        match self {
            TFTPError::UndefinedError => "Not defined, see error message (if any).",
            TFTPError::FileNotFound => "File not found.",
            TFTPError::AccessViolation => "Access violation.",
            TFTPError::DiskFull => "Disk full or allocation exceeded.",
            TFTPError::IllegalOperation => "Illegal TFTP operation.",
            TFTPError::UnknownTID => "Unknown transfer ID.",
            TFTPError::FileExists => "File already exists.",
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct ErrorPacket {
    op: u16,
    code: u16,
    message: String,
}

impl ErrorPacket {
    /// An ERROR packet carrying the code's canonical message.
    pub fn new(err: TFTPError) -> Self {
        ErrorPacket::with_message(err, err.canonical_message())
    }

    /// An ERROR packet with a caller-supplied message.
    pub fn with_message(err: TFTPError, message: &str) -> Self {
        ErrorPacket {
            op: OP_ERR,
            code: err.code(),
            message: String::from(message),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Lenient structural decode; code-range and termination policy
    /// live in the error packet parser, not here.
    pub fn from_bytes(buf: &[u8]) -> Result<TFTPPacket, PacketError> {
        if buf.len() < ERR_HEADER_LEN {
            return Err(PacketError::Truncated(buf.len()));
        }

        let op = NetworkEndian::read_u16(&buf[0..OP_LEN]);
        if op != OP_ERR {
            return Err(PacketError::UnknownOpcode(op));
        }

        let code = NetworkEndian::read_u16(&buf[OP_LEN..ERR_HEADER_LEN]);
        let tail = &buf[ERR_HEADER_LEN..];
        let msg_bytes = match tail.iter().position(|&b| b == 0) {
            Some(end) => &tail[..end],
            None => tail,
        };
        let message = String::from_utf8(msg_bytes.to_vec()).map_err(|_| PacketError::BadText)?;

        Ok(TFTPPacket::ERR(ErrorPacket {
            op: OP_ERR,
            code,
            message,
        }))
    }
}

impl Serializable for ErrorPacket {
    fn serialize(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ERR_HEADER_LEN + self.message.len() + 1);
        buf.write_u16::<NetworkEndian>(self.op).unwrap();
        buf.write_u16::<NetworkEndian>(self.code).unwrap();
        buf.write_all(self.message.as_bytes()).unwrap();
        buf.write_u8(0).unwrap();
        buf
    }
}
