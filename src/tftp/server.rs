use std::net::{SocketAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use pretty_bytes::converter::convert;

use crate::tftp::shared::data_channel::{DataChannel, DataChannelMode, DataChannelOwner};
use crate::tftp::shared::diag::{ConsoleSink, DiagSink};
use crate::tftp::shared::err_packet::{ErrorPacket, TFTPError};
use crate::tftp::shared::request_packet::RequestPacket;
use crate::tftp::shared::validate::{check_request, Verdict};
use crate::tftp::shared::{parse_packet, Serializable, TFTPPacket};
use crate::tftp::transfer::{run_transfer, TransferConfig};

/// Request datagrams are small; anything larger is already malformed
/// and the validator will say so.
const REQUEST_BUF_SIZE: usize = 1024;

/// A TFTP server. The request socket only ever sees RRQ/WRQ packets
/// (and replies to the broken ones); every accepted request gets its
/// own thread and its own ephemeral socket, so sessions share nothing.
pub struct TFTPServer {
    sock: UdpSocket,
    root: PathBuf,
    sink: Arc<dyn DiagSink>,
    config: TransferConfig,
}

impl TFTPServer {
    pub fn bind(address: &str, root: &Path) -> Result<Self> {
        let sock = UdpSocket::bind(address)
            .with_context(|| format!("bind server socket on [{}]", address))?;

        Ok(TFTPServer {
            sock,
            root: root.to_path_buf(),
            sink: Arc::new(ConsoleSink),
            config: TransferConfig::default(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.sock.local_addr().context("server local address")
    }

    pub fn serve_forever(&self) -> Result<()> {
        loop {
            if let Err(e) = self.serve_one() {
                log::error!("Session setup failed: {:#}", e);
            }
        }
    }

    /// Accepts a single request datagram and, if it opens a transfer,
    /// hands the session to its own thread.
    pub fn serve_one(&self) -> Result<Option<thread::JoinHandle<()>>> {
        let mut buf = [0; REQUEST_BUF_SIZE];
        let (count, client) = self.sock.recv_from(&mut buf).context("receive request")?;
        let raw = &buf[..count];

        match check_request(raw) {
            Verdict::Valid => {}
            Verdict::Error(ep) => {
                self.sink.log(ep.message());
                self.sock
                    .send_to(&ep.serialize(), client)
                    .context("send error reply")?;
                return Ok(None);
            }
            // The request validator never classifies a duplicate.
            Verdict::Ignore => return Ok(None),
        }

        let request = match parse_packet(raw) {
            Ok(TFTPPacket::RRQ(req)) | Ok(TFTPPacket::WRQ(req)) => req,
            // check_request established the shape already.
            _ => return Ok(None),
        };

        self.sink.log(&format!(
            "{} [{}] from {}",
            if request.is_read() { "RRQ" } else { "WRQ" },
            request.filename(),
            client
        ));

        let channel = match self.open_session(&request) {
            Ok(channel) => channel,
            Err(ep) => {
                self.sink.log(ep.message());
                self.sock
                    .send_to(&ep.serialize(), client)
                    .context("send error reply")?;
                return Ok(None);
            }
        };

        Ok(Some(self.spawn_session(channel, client)))
    }

    fn open_session(&self, request: &RequestPacket) -> Result<DataChannel, ErrorPacket> {
        let path = self.resolve_path(request.filename())?;

        if request.is_read() {
            DataChannel::new(
                &path,
                DataChannelMode::Tx,
                DataChannelOwner::Server,
                self.sink.clone(),
            )
        } else {
            if path.exists() {
                return Err(ErrorPacket::new(TFTPError::FileExists));
            }

            DataChannel::new(
                &path,
                DataChannelMode::Rx,
                DataChannelOwner::Server,
                self.sink.clone(),
            )
        }
    }

    /// Confines a requested filename to the served directory. Clients
    /// may not traverse upwards or name absolute paths.
    fn resolve_path(&self, filename: &str) -> Result<PathBuf, ErrorPacket> {
        let requested = Path::new(filename);

        if requested.is_absolute() {
            return Err(ErrorPacket::with_message(
                TFTPError::AccessViolation,
                "File path must not start with root.",
            ));
        }

        if filename.contains("..") {
            return Err(ErrorPacket::with_message(
                TFTPError::AccessViolation,
                "Only paths inside the served directory are allowed.",
            ));
        }

        if requested.file_name().is_none() {
            return Err(ErrorPacket::with_message(
                TFTPError::AccessViolation,
                "Can't transfer a directory",
            ));
        }

        Ok(self.root.join(requested))
    }

    fn spawn_session(
        &self,
        mut channel: DataChannel,
        client: SocketAddr,
    ) -> thread::JoinHandle<()> {
        let config = self.config.clone();

        thread::spawn(move || {
            let sock = match UdpSocket::bind("0.0.0.0:0") {
                Ok(sock) => sock,
                Err(e) => {
                    log::error!("Failed to open session socket: {}", e);
                    channel.abort("no session socket");
                    return;
                }
            };

            match run_transfer(&sock, client, &mut channel, &config) {
                Ok(bytes) => {
                    log::info!("Session with {} done, {}", client, convert(bytes as f64))
                }
                Err(e) => log::warn!("Session with {} failed: {:#}", client, e),
            }
        })
    }
}

/// Entry point for the `server` subcommand.
pub fn server_main(address: &str, port: u16, root: &Path) -> Result<()> {
    let server = TFTPServer::bind(&format!("{}:{}", address, port), root)?;
    log::info!("Serving {:?} on {}", root, server.local_addr()?);
    server.serve_forever()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_at(root: &Path) -> TFTPServer {
        TFTPServer::bind("127.0.0.1:0", root).unwrap()
    }

    #[test]
    fn rejects_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_at(dir.path());
        let ep = server.resolve_path("/etc/passwd").unwrap_err();
        assert_eq!(ep.code(), 2);
    }

    #[test]
    fn rejects_upward_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_at(dir.path());
        let ep = server.resolve_path("../secret").unwrap_err();
        assert_eq!(ep.code(), 2);
    }

    #[test]
    fn resolves_nested_names_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_at(dir.path());
        let path = server.resolve_path("sub/file.bin").unwrap();
        assert!(path.starts_with(dir.path()));
    }
}
