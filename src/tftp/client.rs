use std::net::UdpSocket;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use pretty_bytes::converter::convert;

use crate::tftp::shared::data_channel::{DataChannel, DataChannelMode, DataChannelOwner};
use crate::tftp::shared::diag::DiagSink;
use crate::tftp::shared::request_packet::RequestPacket;
use crate::tftp::shared::Serializable;
use crate::tftp::transfer::{run_transfer, TransferConfig};

/// Transfer mode sent with every request; both ends treat the payload
/// as raw bytes either way.
const MODE: &str = "octet";

/// Pulls `remote_name` from the server into `local_path`. Returns the
/// number of bytes received.
pub fn download_file(
    server_address: &str,
    remote_name: &str,
    local_path: &Path,
    sink: Arc<dyn DiagSink>,
    config: &TransferConfig,
) -> Result<usize> {
    let rrq = RequestPacket::new_rrq(remote_name, MODE)
        .map_err(|e| anyhow!("bad read request: {}", e))?;

    let mut channel = DataChannel::new(
        local_path,
        DataChannelMode::Rx,
        DataChannelOwner::Client,
        sink,
    )
    .map_err(|ep| anyhow!("cannot receive into {:?}: {}", local_path, ep.message()))?;
    channel.seed_request(rrq.serialize());

    run_session(server_address, &mut channel, config)
}

/// Pushes `local_path` to the server as `remote_name`. Returns the
/// number of bytes sent.
pub fn upload_file(
    server_address: &str,
    local_path: &Path,
    remote_name: &str,
    sink: Arc<dyn DiagSink>,
    config: &TransferConfig,
) -> Result<usize> {
    let wrq = RequestPacket::new_wrq(remote_name, MODE)
        .map_err(|e| anyhow!("bad write request: {}", e))?;

    let mut channel = DataChannel::new(
        local_path,
        DataChannelMode::Tx,
        DataChannelOwner::Client,
        sink,
    )
    .map_err(|ep| anyhow!("cannot read {:?}: {}", local_path, ep.message()))?;
    channel.seed_request(wrq.serialize());

    run_session(server_address, &mut channel, config)
}

fn run_session(
    server_address: &str,
    channel: &mut DataChannel,
    config: &TransferConfig,
) -> Result<usize> {
    // Any ephemeral local port works; the request fixes our transfer ID.
    let sock = UdpSocket::bind("0.0.0.0:0").context("bind client socket")?;
    let peer = server_address
        .parse()
        .with_context(|| format!("bad server address [{}]", server_address))?;

    // The server opens a fresh UDP socket per session, so replies come
    // from a different port than the request went to.
    let mut config = config.clone();
    config.follow_peer = true;

    run_transfer(&sock, peer, channel, &config)
}

/// Entry point for the `client` subcommand.
pub fn client_main(server_address: &str, filename: &str, upload: bool) -> Result<()> {
    let sink: Arc<dyn DiagSink> = Arc::new(crate::tftp::shared::diag::ConsoleSink);
    let config = TransferConfig::default();
    let local = Path::new(filename);

    let bytes = if upload {
        log::info!("Uploading...");
        upload_file(server_address, local, filename, sink, &config)?
    } else {
        log::info!("Downloading...");
        download_file(server_address, filename, local, sink, &config)?
    };

    println!("{} transferred successfully.", convert(bytes as f64));
    Ok(())
}
