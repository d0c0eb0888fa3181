//! Blocking send/receive loop shared by the client and the server's
//! per-session threads. TFTP keeps exactly one packet in flight, so
//! the loop strictly alternates a send with a bounded-timeout receive
//! and retransmits the packet at hand when the timer expires.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::tftp::shared::data_channel::DataChannel;
use crate::tftp::shared::MAX_PACKET_SIZE;

/// Receive buffer large enough for any legal datagram plus slack, so
/// oversize packets arrive whole and the data validator can reject
/// them by their true length.
const RECV_BUF_SIZE: usize = MAX_PACKET_SIZE + 512;

/// Retransmission bounds. RFC 1350 leaves these to the implementation;
/// a fixed three second timeout with five retries per packet is this
/// crate's documented choice.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);
pub const MAX_RETRIES: usize = 5;

#[derive(Clone)]
pub struct TransferConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    /// Which peer rebinding policy to use: a client must follow the
    /// server to its ephemeral session port, a server session must not
    /// wander off its established peer.
    pub follow_peer: bool,
    /// Cooperative cancellation, checked between receive attempts.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            timeout: RECV_TIMEOUT,
            max_retries: MAX_RETRIES,
            follow_peer: false,
            cancel: None,
        }
    }
}

impl TransferConfig {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Drives a channel over the socket until it completes or aborts.
/// Returns the number of payload bytes transferred.
pub fn run_transfer(
    sock: &UdpSocket,
    mut peer: SocketAddr,
    channel: &mut DataChannel,
    config: &TransferConfig,
) -> Result<usize> {
    sock.set_read_timeout(Some(config.timeout))
        .context("set socket timeout")?;

    let mut retries = 0;

    loop {
        if let Some(packet) = channel.packet_at_hand() {
            sock.send_to(&packet, peer).context("send packet")?;
        }

        if channel.is_err() {
            bail!(
                "transfer failed: {}",
                channel.err().unwrap_or("unknown error")
            );
        }

        if channel.is_done() {
            return Ok(channel.transfer_size());
        }

        if config.cancelled() {
            channel.abort("transfer cancelled");
            bail!("transfer cancelled");
        }

        let mut buf = [0; RECV_BUF_SIZE];
        match sock.recv_from(&mut buf) {
            Ok((count, addr)) => {
                if config.follow_peer {
                    // The server answers from a fresh socket per
                    // session; its first reply fixes the transfer ID.
                    peer = addr;
                } else if addr != peer {
                    log::warn!("Dropping packet from unexpected peer {}", addr);
                    continue;
                }

                retries = 0;
                channel.process_packet(&buf[..count]);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                retries += 1;
                if retries > config.max_retries {
                    channel.abort("retry budget exhausted");
                    bail!("transfer timed out after {} retries", config.max_retries);
                }
                log::debug!("Receive timeout, retransmitting (attempt {})", retries);
            }
            Err(e) => return Err(e).context("receive packet"),
        }
    }
}
