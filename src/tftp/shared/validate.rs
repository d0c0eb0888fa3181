//! Inbound packet validation.
//!
//! Every checker classifies a raw datagram against the state a session
//! expects and returns a three-way [`Verdict`]; none of them touches the
//! wire. Sending the ERROR packet a `Verdict::Error` carries is the
//! caller's job. All structural violations in an active transfer are
//! reported with error code 4 (illegal operation) and the exact message
//! listed on each rule.

use byteorder::{ByteOrder, NetworkEndian};

use crate::tftp::shared::ack_packet::ACK_LEN;
use crate::tftp::shared::diag::DiagSink;
use crate::tftp::shared::err_packet::{ErrorPacket, TFTPError, ERR_HEADER_LEN, MAX_ERR_CODE};
use crate::tftp::shared::{
    peek_op, BLK_NUM_LEN, MAX_PACKET_SIZE, OP_ACK, OP_DATA, OP_ERR, OP_LEN, OP_RRQ, OP_WRQ,
};

/// What a session should do with an inbound packet. Never collapsed
/// to a boolean: a stale duplicate is neither valid nor an error.
#[derive(Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The packet advances the transfer.
    Valid,
    /// Stale retransmission; drop it and leave the session untouched.
    Ignore,
    /// Protocol violation; reply with this packet and abort.
    Error(ErrorPacket),
}

impl Verdict {
    fn illegal(message: &str) -> Verdict {
        Verdict::Error(ErrorPacket::with_message(
            TFTPError::IllegalOperation,
            message,
        ))
    }
}

/// Checks an inbound RRQ/WRQ buffer. Rules run in order and the first
/// failure wins.
pub fn check_request(buf: &[u8]) -> Verdict {
    if buf.len() < 4 {
        return Verdict::illegal("Data packet not long enough");
    }

    let op = NetworkEndian::read_u16(buf);
    if ![OP_RRQ, OP_WRQ].contains(&op) {
        return Verdict::illegal("Invalid OP code for request");
    }

    if buf[OP_LEN] == 0 {
        return Verdict::illegal("Filename missing");
    }

    let name_region = &buf[OP_LEN..];
    let name_end = match name_region.iter().position(|&b| b == 0) {
        Some(i) => i,
        None => return Verdict::illegal("Missing Null terminator after filename"),
    };

    let mode_region = &name_region[name_end + 1..];
    if mode_region.is_empty() {
        return Verdict::illegal("Mode missing");
    }

    let mode_end = mode_region
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(mode_region.len());
    let mode = &mode_region[..mode_end];
    if !mode.eq_ignore_ascii_case(b"netascii") && !mode.eq_ignore_ascii_case(b"octet") {
        return Verdict::illegal("Mode not an acceptable form");
    }

    if *buf.last().unwrap() != 0 {
        return Verdict::illegal("Packet does not end with null");
    }

    Verdict::Valid
}

/// Checks an inbound DATA buffer against the block number the session
/// is waiting for. A block lower than expected is a stale duplicate.
pub fn check_data(buf: &[u8], expected_blk: u16) -> Verdict {
    if buf.len() < OP_LEN + BLK_NUM_LEN {
        return Verdict::illegal("Data packet too small");
    }

    if NetworkEndian::read_u16(buf) != OP_DATA {
        return Verdict::illegal("Invalid data op code");
    }

    let blk = NetworkEndian::read_u16(&buf[OP_LEN..]);
    if blk != expected_blk {
        return if blk < expected_blk {
            Verdict::Ignore
        } else {
            Verdict::illegal("Recv wrong block number")
        };
    }

    if buf.len() > MAX_PACKET_SIZE {
        return Verdict::illegal("Data packet is too large");
    }

    Verdict::Valid
}

/// Checks an inbound ACK buffer against the block number the session
/// last sent. A buffer too short to carry an opcode can only be
/// classified by size.
pub fn check_ack(buf: &[u8], expected_blk: u16) -> Verdict {
    if buf.len() < OP_LEN {
        return Verdict::illegal("Ack packet wrong size");
    }

    if NetworkEndian::read_u16(buf) != OP_ACK {
        return Verdict::illegal("Invalid ACK op code");
    }

    if buf.len() != ACK_LEN {
        return Verdict::illegal("Ack packet wrong size");
    }

    let blk = NetworkEndian::read_u16(&buf[OP_LEN..]);
    if blk < expected_blk {
        return Verdict::Ignore;
    }
    if blk != expected_blk {
        return Verdict::illegal("ACK wrong block number");
    }

    Verdict::Valid
}

/// Parses and logs an inbound ERROR packet. There is no reply for an
/// ERROR, well-formed or not, so malformed ones only produce a
/// diagnostic. Returns the code and optional message on success, `None`
/// when the packet itself is malformed.
pub fn unpack_error(buf: &[u8], sink: &dyn DiagSink) -> Option<(u16, Option<String>)> {
    if buf.len() < OP_LEN {
        sink.log("Invalid ERROR packet received, missing opCode");
        return None;
    }

    if peek_op(buf) != Some(OP_ERR) {
        sink.log(&format!(
            "Invalid ERROR packet received, incorrect opCode {}{}",
            buf[0], buf[1]
        ));
        return None;
    }

    if buf.len() < ERR_HEADER_LEN {
        sink.log("Invalid ERROR packet received, missing error code");
        return None;
    }

    let code = NetworkEndian::read_u16(&buf[OP_LEN..]);
    if code > MAX_ERR_CODE {
        sink.log(&format!(
            "Invalid ERROR packet received, incorrect error code {}",
            code
        ));
        return None;
    }

    let tail = &buf[ERR_HEADER_LEN..];
    if !tail.is_empty() && *tail.last().unwrap() != 0 {
        sink.log("Invalid ERROR packet received, missing end null character");
        return None;
    }

    // The message is a NUL-terminated string; anything past the first
    // NUL is not part of it.
    let msg_end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let message = &tail[..msg_end];
    if message.is_empty() {
        sink.log(&format!(
            "Error packet type {} received, no attached message.",
            code
        ));
        return Some((code, None));
    }

    let message = String::from_utf8_lossy(message).into_owned();
    sink.log(&format!("Error packet type {} received: {}", code, message));
    Some((code, Some(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tftp::shared::diag::MemorySink;
    use crate::tftp::shared::STRIDE_SIZE;
    use byteorder::WriteBytesExt;

    /// Concatenates byte segments the way request packets are laid out
    /// on the wire.
    fn packet(segments: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        for s in segments {
            buf.extend_from_slice(s);
        }
        buf
    }

    fn blk(value: u16) -> Vec<u8> {
        let mut b = Vec::new();
        b.write_u16::<NetworkEndian>(value).unwrap();
        b
    }

    fn expect_illegal(v: Verdict, message: &str) {
        match v {
            Verdict::Error(ep) => {
                assert_eq!(ep.code(), 4);
                assert_eq!(ep.message(), message);
            }
            other => panic!("expected protocol error [{}], got {:?}", message, other),
        }
    }

    const RRQ: &[u8] = &[0, 1];
    const WRQ: &[u8] = &[0, 2];
    const DATA: &[u8] = &[0, 3];
    const ACK: &[u8] = &[0, 4];
    const ERROR: &[u8] = &[0, 5];
    const ZERO: &[u8] = &[0];

    #[test]
    fn request_accepts_both_modes_case_insensitively() {
        for mode in ["octet", "OCTET", "netascii", "NetAscii", "NETASCII"] {
            let p = packet(&[RRQ, b"test", ZERO, mode.as_bytes(), ZERO]);
            assert_eq!(check_request(&p), Verdict::Valid, "mode {}", mode);
        }

        let p = packet(&[WRQ, b"a", ZERO, b"octet", ZERO]);
        assert_eq!(check_request(&p), Verdict::Valid);
    }

    #[test]
    fn request_too_short() {
        expect_illegal(check_request(&packet(&[ZERO])), "Data packet not long enough");
        expect_illegal(check_request(&packet(&[RRQ, ZERO])), "Data packet not long enough");
    }

    #[test]
    fn request_bad_opcode() {
        expect_illegal(
            check_request(&packet(&[&[0, 0], b"a", ZERO, b"octet", ZERO])),
            "Invalid OP code for request",
        );
        expect_illegal(
            check_request(&packet(&[&[0, 3], b"a", ZERO, b"octet", ZERO])),
            "Invalid OP code for request",
        );
        expect_illegal(
            check_request(&packet(&[&[2, 3], b"a", ZERO, b"octet", ZERO])),
            "Invalid OP code for request",
        );
    }

    #[test]
    fn request_empty_filename() {
        expect_illegal(
            check_request(&packet(&[RRQ, ZERO, b"a", ZERO])),
            "Filename missing",
        );
    }

    #[test]
    fn request_unterminated_filename() {
        expect_illegal(
            check_request(&packet(&[RRQ, b"test"])),
            "Missing Null terminator after filename",
        );
    }

    #[test]
    fn request_mode_missing() {
        expect_illegal(
            check_request(&packet(&[RRQ, b"testing", ZERO])),
            "Mode missing",
        );
    }

    #[test]
    fn request_mode_unacceptable() {
        expect_illegal(
            check_request(&packet(&[RRQ, b"a", ZERO, ZERO])),
            "Mode not an acceptable form",
        );
        expect_illegal(
            check_request(&packet(&[RRQ, b"a", ZERO, b"a", ZERO])),
            "Mode not an acceptable form",
        );
        expect_illegal(
            check_request(&packet(&[RRQ, b"a", ZERO, b"octete", ZERO])),
            "Mode not an acceptable form",
        );
    }

    #[test]
    fn request_missing_final_null() {
        expect_illegal(
            check_request(&packet(&[RRQ, b"test", ZERO, b"octet"])),
            "Packet does not end with null",
        );
    }

    #[test]
    fn data_valid() {
        assert_eq!(check_data(&packet(&[DATA, &blk(25)]), 25), Verdict::Valid);
        assert_eq!(
            check_data(&packet(&[DATA, &blk(25), b"data"]), 25),
            Verdict::Valid
        );
        assert_eq!(
            check_data(&packet(&[DATA, &blk(8034), b"data"]), 8034),
            Verdict::Valid
        );
        let full = vec![0x5Au8; STRIDE_SIZE];
        assert_eq!(
            check_data(&packet(&[DATA, &blk(25), &full]), 25),
            Verdict::Valid
        );
    }


    #[test]
    fn data_stale_duplicate_is_ignored() {
        assert_eq!(check_data(&packet(&[DATA, &blk(25)]), 50), Verdict::Ignore);

        // Even an oversize duplicate is still just a duplicate.
        let oversize = vec![0u8; STRIDE_SIZE + 40];
        assert_eq!(
            check_data(&packet(&[DATA, &blk(25), &oversize]), 50),
            Verdict::Ignore
        );
    }

    #[test]
    fn data_too_small() {
        expect_illegal(check_data(&packet(&[]), 25), "Data packet too small");
        expect_illegal(check_data(&packet(&[WRQ]), 25), "Data packet too small");
    }

    #[test]
    fn data_bad_opcode() {
        expect_illegal(
            check_data(&packet(&[WRQ, &blk(25), b"data"]), 25),
            "Invalid data op code",
        );
    }

    #[test]
    fn data_block_ahead_of_expected() {
        expect_illegal(
            check_data(&packet(&[DATA, &blk(50), b"data"]), 25),
            "Recv wrong block number",
        );
    }

    #[test]
    fn data_too_large() {
        let oversize = vec![0u8; STRIDE_SIZE + 1];
        expect_illegal(
            check_data(&packet(&[DATA, &blk(25), &oversize]), 25),
            "Data packet is too large",
        );
    }

    #[test]
    fn ack_valid() {
        assert_eq!(check_ack(&packet(&[ACK, &blk(25)]), 25), Verdict::Valid);
        assert_eq!(check_ack(&packet(&[ACK, &blk(8034)]), 8034), Verdict::Valid);
    }

    #[test]
    fn ack_stale_duplicate_is_ignored() {
        assert_eq!(check_ack(&packet(&[ACK, &blk(25)]), 50), Verdict::Ignore);
    }

    #[test]
    fn ack_bad_opcode() {
        expect_illegal(
            check_ack(&packet(&[WRQ, &blk(25)]), 25),
            "Invalid ACK op code",
        );
    }

    #[test]
    fn ack_wrong_size() {
        expect_illegal(check_ack(&packet(&[]), 25), "Ack packet wrong size");
        expect_illegal(check_ack(&packet(&[ACK]), 25), "Ack packet wrong size");
        expect_illegal(
            check_ack(&packet(&[ACK, &[1, 2, 3]]), 25),
            "Ack packet wrong size",
        );
    }

    #[test]
    fn ack_block_ahead_of_expected() {
        expect_illegal(
            check_ack(&packet(&[ACK, &blk(50)]), 25),
            "ACK wrong block number",
        );
    }

    #[test]
    fn error_with_message() {
        let sink = MemorySink::new();
        let p = packet(&[ERROR, &[0, 2], b"testing a message", ZERO]);
        let (code, msg) = unpack_error(&p, &sink).unwrap();

        assert_eq!(code, 2);
        assert_eq!(msg.as_deref(), Some("testing a message"));
        assert!(sink.contains("Error packet type 2 received: testing a message"));
    }

    #[test]
    fn error_message_stops_at_first_null() {
        let sink = MemorySink::new();
        let p = packet(&[ERROR, &[0, 1], b"ab\0cd", ZERO]);
        let (code, msg) = unpack_error(&p, &sink).unwrap();

        assert_eq!(code, 1);
        assert_eq!(msg.as_deref(), Some("ab"));
        assert!(sink
            .lines()
            .iter()
            .any(|l| l == "Error packet type 1 received: ab"));
    }

    #[test]
    fn error_without_message() {
        let sink = MemorySink::new();
        let (code, msg) = unpack_error(&packet(&[ERROR, &[0, 0]]), &sink).unwrap();

        assert_eq!(code, 0);
        assert_eq!(msg, None);
        assert!(sink.contains("Error packet type 0 received, no attached message."));
    }

    #[test]
    fn error_with_empty_terminated_message() {
        let sink = MemorySink::new();
        let (code, msg) = unpack_error(&packet(&[ERROR, &[0, 0], ZERO]), &sink).unwrap();

        assert_eq!(code, 0);
        assert_eq!(msg, None);
        assert!(sink.contains("Error packet type 0 received, no attached message."));
    }

    #[test]
    fn error_missing_opcode() {
        let sink = MemorySink::new();
        assert_eq!(unpack_error(&packet(&[]), &sink), None);
        assert!(sink.contains("Invalid ERROR packet received, missing opCode"));
    }

    #[test]
    fn error_incorrect_opcode() {
        let sink = MemorySink::new();
        assert_eq!(unpack_error(&packet(&[WRQ]), &sink), None);
        assert!(sink.contains("Invalid ERROR packet received, incorrect opCode 02"));
    }

    #[test]
    fn error_missing_code() {
        let sink = MemorySink::new();
        assert_eq!(unpack_error(&packet(&[ERROR]), &sink), None);
        assert_eq!(unpack_error(&packet(&[ERROR, ZERO]), &sink), None);
        assert!(sink.contains("Invalid ERROR packet received, missing error code"));
    }

    #[test]
    fn error_incorrect_code() {
        let sink = MemorySink::new();
        assert_eq!(unpack_error(&packet(&[ERROR, &[0, 7]]), &sink), None);
        assert!(sink.contains("Invalid ERROR packet received, incorrect error code 7"));

        assert_eq!(unpack_error(&packet(&[ERROR, &[0xFF, 0xFF]]), &sink), None);
        assert!(sink.contains("Invalid ERROR packet received, incorrect error code 65535"));
    }

    #[test]
    fn error_missing_end_null() {
        let sink = MemorySink::new();
        assert_eq!(unpack_error(&packet(&[ERROR, &[0, 3], b"test"]), &sink), None);
        assert!(sink.contains("Invalid ERROR packet received, missing end null character"));
    }
}
