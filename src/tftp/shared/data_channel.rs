//! The per-transfer state machine. A channel owns its own block
//! counter, file handle and buffered outbound packet, so concurrent
//! sessions share nothing mutable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::tftp::shared::ack_packet::AckPacket;
use crate::tftp::shared::block_file::{BlockReader, BlockWriter};
use crate::tftp::shared::data_packet::DataPacket;
use crate::tftp::shared::diag::DiagSink;
use crate::tftp::shared::err_packet::{ErrorPacket, TFTPError};
use crate::tftp::shared::validate::{check_ack, check_data, unpack_error, Verdict};
use crate::tftp::shared::{parse_packet, peek_op, Serializable, TFTPPacket, OP_ERR, STRIDE_SIZE};

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum DataChannelMode {
    Tx,
    Rx,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum DataChannelOwner {
    Server,
    Client,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
enum DataChannelState {
    WaitData,
    SendAck,
    SendLastAck,
    SendData,
    WaitAck,
    WaitLastAck,
    Error,
    Done,
}

pub struct DataChannel {
    reader: Option<BlockReader>,
    writer: Option<BlockWriter>,
    path: PathBuf,
    bytes: usize,
    blk: u16,
    error: Option<String>,
    state: DataChannelState,
    packet_at_hand: Option<Vec<u8>>,
    sink: Arc<dyn DiagSink>,
}

impl std::fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataChannel")
            .field("path", &self.path)
            .field("bytes", &self.bytes)
            .field("blk", &self.blk)
            .field("error", &self.error)
            .field("state", &self.state)
            .field("packet_at_hand", &self.packet_at_hand)
            .finish_non_exhaustive()
    }
}

impl DataChannel {
    /// Makes a new channel backed by the file at `path`, opened for
    /// reading (`Tx`) right away or created lazily on the first data
    /// block (`Rx`). A refused file turns into the ERROR packet the
    /// peer should see.
    pub fn new(
        path: &Path,
        mode: DataChannelMode,
        owner: DataChannelOwner,
        sink: Arc<dyn DiagSink>,
    ) -> Result<Self, ErrorPacket> {
        let reader = if mode == DataChannelMode::Tx {
            Some(DataChannel::open_source(path)?)
        } else {
            None
        };

        let (blk, state) = DataChannel::initial_state(mode, owner);

        let mut channel = DataChannel {
            reader,
            writer: None,
            path: path.to_path_buf(),
            bytes: 0,
            blk,
            error: None,
            state,
            packet_at_hand: None,
            sink,
        };

        if channel.state == DataChannelState::SendData {
            channel.send_data();
        } else if channel.state == DataChannelState::SendAck {
            channel.send_ack();
        }

        Ok(channel)
    }

    fn initial_state(
        mode: DataChannelMode,
        owner: DataChannelOwner,
    ) -> (u16, DataChannelState) {
        match mode {
            DataChannelMode::Tx => {
                if owner == DataChannelOwner::Client {
                    // An uploading client waits for ACK #0.
                    (0, DataChannelState::WaitAck)
                } else {
                    // A server answering an RRQ opens with DATA #1;
                    // send_data advances the counter itself.
                    (0, DataChannelState::SendData)
                }
            }
            DataChannelMode::Rx => {
                if owner == DataChannelOwner::Client {
                    // A downloading client waits for DATA #1.
                    (0, DataChannelState::WaitData)
                } else {
                    // A server answering a WRQ opens with ACK #0.
                    (0, DataChannelState::SendAck)
                }
            }
        }
    }

    fn open_source(path: &Path) -> Result<BlockReader, ErrorPacket> {
        BlockReader::open(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                ErrorPacket::new(TFTPError::FileNotFound)
            } else {
                ErrorPacket::with_message(TFTPError::AccessViolation, &e.to_string())
            }
        })
    }

    /// Seeds the request that opens the transfer as the first outbound
    /// packet so the retry budget covers a lost RRQ/WRQ too.
    pub fn seed_request(&mut self, request: Vec<u8>) {
        self.packet_at_hand = Some(request);
    }

    /// Feeds one raw inbound datagram through the matching validator
    /// and advances, ignores, or aborts accordingly.
    pub fn process_packet(&mut self, buf: &[u8]) {
        // An ERROR packet terminates the session from any state and is
        // never answered.
        if peek_op(buf) == Some(OP_ERR) {
            self.on_err(buf);
            return;
        }

        match self.state {
            DataChannelState::WaitData => self.on_data(buf),
            DataChannelState::WaitAck | DataChannelState::WaitLastAck => self.on_ack(buf),
            state => {
                self.sink
                    .log(&format!("Dropping packet received in state {:?}", state));
            }
        }
    }

    /// Receives a data block: append to the output file, acknowledge,
    /// and finish once a short block arrives.
    fn on_data(&mut self, buf: &[u8]) {
        let expected = self.blk.wrapping_add(1);

        match check_data(buf, expected) {
            Verdict::Valid => {}
            Verdict::Ignore => {
                self.sink
                    .log(&format!("Ignoring duplicate DATA, expecting #{}", expected));
                return;
            }
            Verdict::Error(ep) => {
                self.protocol_error(ep);
                return;
            }
        }

        let dp = match parse_packet(buf) {
            Ok(TFTPPacket::DATA(dp)) => dp,
            // check_data established the shape already.
            _ => return,
        };

        self.sink.log(&format!("ON_DATA #{}", dp.blk()));
        self.blk = expected;

        // Create the file only once data arrives, so a transfer that
        // dies on the request leaves nothing behind.
        if self.writer.is_none() {
            match BlockWriter::create(&self.path) {
                Ok(w) => self.writer = Some(w),
                Err(e) => {
                    self.protocol_error(ErrorPacket::with_message(
                        TFTPError::AccessViolation,
                        &e.to_string(),
                    ));
                    return;
                }
            }
        }

        let write_result = match self.writer.as_mut() {
            Some(w) => w.write_block(dp.data()),
            None => unreachable!("writer created above"),
        };
        if let Err(e) = write_result {
            self.protocol_error(ErrorPacket::with_message(TFTPError::DiskFull, &e.to_string()));
            return;
        }
        self.bytes += dp.data().len();

        if dp.is_final() {
            if let Some(w) = self.writer.as_mut() {
                if let Err(e) = w.close() {
                    self.protocol_error(ErrorPacket::with_message(
                        TFTPError::DiskFull,
                        &e.to_string(),
                    ));
                    return;
                }
            }
            self.set_state(DataChannelState::SendLastAck);
        } else {
            self.set_state(DataChannelState::SendAck);
        }

        self.send_ack();
    }

    fn send_ack(&mut self) {
        self.sink.log(&format!("DO_ACK #{}", self.blk));
        self.packet_at_hand = Some(AckPacket::new(self.blk).serialize());

        if self.state == DataChannelState::SendAck {
            self.set_state(DataChannelState::WaitData);
        }
    }

    /// Receives an acknowledgment: advance the counter and put the
    /// next data block at hand, or finish after the final block's ACK.
    fn on_ack(&mut self, buf: &[u8]) {
        match check_ack(buf, self.blk) {
            Verdict::Valid => {}
            Verdict::Ignore => {
                self.sink
                    .log(&format!("Ignoring duplicate ACK, expecting #{}", self.blk));
                return;
            }
            Verdict::Error(ep) => {
                self.protocol_error(ep);
                return;
            }
        }

        self.sink.log(&format!("ON_ACK #{}", self.blk));

        match self.state {
            DataChannelState::WaitAck => self.send_data(),
            DataChannelState::WaitLastAck => {
                self.packet_at_hand = None;
                self.set_state(DataChannelState::Done);
            }
            _ => unreachable!("on_ack is only reached from a waiting state"),
        }
    }

    /// Reads the next block and puts its DATA packet at hand. A short
    /// block (empty included, for files sized an exact multiple of the
    /// stride) is the final one and waits for its own ACK.
    fn send_data(&mut self) {
        let data = match self.reader.as_mut() {
            Some(r) => match r.read_block() {
                Ok(data) => data,
                Err(e) => {
                    self.protocol_error(ErrorPacket::with_message(
                        TFTPError::AccessViolation,
                        &e.to_string(),
                    ));
                    return;
                }
            },
            None => {
                self.protocol_error(ErrorPacket::new(TFTPError::UndefinedError));
                return;
            }
        };

        self.blk = self.blk.wrapping_add(1);
        self.bytes += data.len();
        self.sink.log(&format!("DO_DATA #{}", self.blk));

        if data.len() < STRIDE_SIZE {
            self.set_state(DataChannelState::WaitLastAck);
        } else {
            self.set_state(DataChannelState::WaitAck);
        }

        match DataPacket::new(self.blk, data) {
            Ok(dp) => self.packet_at_hand = Some(dp.serialize()),
            // read_block never yields more than a stride.
            Err(_) => unreachable!("block exceeds stride"),
        }
    }

    /// Handles an inbound ERROR packet: log it, drop any reply, abort.
    fn on_err(&mut self, buf: &[u8]) {
        let detail = match unpack_error(buf, self.sink.as_ref()) {
            Some((code, Some(msg))) => format!("Peer error [{}]: {}", code, msg),
            Some((code, None)) => format!("Peer error [{}]", code),
            None => String::from("Malformed ERROR packet from peer"),
        };

        self.error = Some(detail);
        self.packet_at_hand = None;
        self.release_files();
        self.set_state(DataChannelState::Error);
    }

    /// A validator rejected the peer's packet: buffer the ERROR reply
    /// and abort.
    fn protocol_error(&mut self, ep: ErrorPacket) {
        self.sink.log(ep.message());
        self.error = Some(ep.message().to_string());
        self.packet_at_hand = Some(ep.serialize());
        self.release_files();
        self.set_state(DataChannelState::Error);
    }

    /// Cooperative abort: release the file handle and delete a
    /// half-written download. Used on cancellation and on an exhausted
    /// retry budget.
    pub fn abort(&mut self, reason: &str) {
        self.sink.log(reason);
        if self.error.is_none() {
            self.error = Some(reason.to_string());
        }
        self.packet_at_hand = None;
        self.release_files();
        self.set_state(DataChannelState::Error);
    }

    fn release_files(&mut self) {
        self.reader = None;
        if let Some(mut w) = self.writer.take() {
            if let Err(e) = w.abort() {
                self.sink
                    .log(&format!("Failed to remove partial file: {}", e));
            }
        }
    }

    fn set_state(&mut self, state: DataChannelState) {
        self.state = state;
    }

    pub fn transfer_size(&self) -> usize {
        self.bytes
    }

    pub fn is_done(&self) -> bool {
        self.state == DataChannelState::Done
    }

    pub fn blk(&self) -> u16 {
        self.blk
    }

    pub fn is_err(&self) -> bool {
        self.state == DataChannelState::Error
    }

    pub fn err(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The packet the session currently wants on the wire. Fetching
    /// the final ACK moves the channel to Done; the packet stays at
    /// hand otherwise so timeouts and duplicates retransmit it
    /// unchanged.
    pub fn packet_at_hand(&mut self) -> Option<Vec<u8>> {
        if self.state == DataChannelState::SendLastAck {
            self.set_state(DataChannelState::Done);
        }

        self.packet_at_hand.clone()
    }
}
