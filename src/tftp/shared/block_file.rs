//! Block-oriented file access for transfers: strides in, strides out,
//! and delete-on-abort for half-written downloads.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::tftp::shared::STRIDE_SIZE;

/// Reads a file one stride at a time for the sending side of a transfer.
pub struct BlockReader {
    fd: File,
}

impl BlockReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let fd = File::open(path)?;
        Ok(BlockReader { fd })
    }

    /// Reads up to one stride. A short (possibly empty) block is the
    /// last one in the file.
    pub fn read_block(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = [0; STRIDE_SIZE];
        let mut filled = 0;

        // A single read may return short of a full stride before EOF.
        while filled < STRIDE_SIZE {
            let n = self.fd.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Ok(Vec::from(&buf[..filled]))
    }
}

/// Writes a file one stride at a time for the receiving side of a
/// transfer. An aborted writer removes its half-written file.
pub struct BlockWriter {
    fd: Option<File>,
    path: PathBuf,
}

impl BlockWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fd = File::create(path)?;
        Ok(BlockWriter {
            fd: Some(fd),
            path: path.to_path_buf(),
        })
    }

    pub fn write_block(&mut self, data: &[u8]) -> io::Result<()> {
        match self.fd.as_mut() {
            Some(fd) => fd.write_all(data),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "file has already been closed",
            )),
        }
    }

    /// Flushes and releases the file handle.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut fd) = self.fd.take() {
            fd.flush()?;
        }
        Ok(())
    }

    /// Closes the writer and deletes the destination so an aborted
    /// transfer leaves no partial file behind.
    pub fn abort(&mut self) -> io::Result<()> {
        self.close()?;
        fs::remove_file(&self.path)
    }
}
