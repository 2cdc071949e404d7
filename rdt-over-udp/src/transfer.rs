//! File transfer on top of a [`Connection`].
//!
//! A small application protocol used to exercise the reliability layer end
//! to end:
//!
//! ```text
//!  client                                   server
//!    │ ── file size (decimal ASCII) ──────────▶ │
//!    │ ── file name ──────────────────────────▶ │  create <store>/<name>
//!    │ ◀───────────────────────── OKAY | ERROR ─ │
//!    │ ── chunk (≤ MAX_PAYLOAD) ──────────────▶ │
//!    │ ── ...                                    │
//! ```
//!
//! Both sides call `close` afterwards; that is the caller's job.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::connection::{ConnError, Connection};
use crate::packet::MAX_PAYLOAD;

/// Server reply when the target file was created.
pub const OKAY: &[u8] = b"OKAY";
/// Server reply when it could not create the target file.
pub const ERROR: &[u8] = b"ERROR";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Conn(#[from] ConnError),
    #[error("file I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("server could not create the target file")]
    Refused,
    #[error("malformed handshake: {0}")]
    Handshake(String),
    #[error("file ended after {sent} of {expected} bytes")]
    ShortFile { sent: u64, expected: u64 },
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReport {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    /// Throughput in KB/s (1 KB = 1000 bytes).
    pub fn throughput_kbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs / 1000.0
    }
}

/// Client side: announce `path`, wait for the server's go-ahead, stream it.
pub async fn send_file(conn: &mut Connection, path: &Path) -> Result<TransferReport, TransferError> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::Handshake(format!("{} has no file name", path.display())))?;
    log::info!("sending {name} ({size} bytes)");

    conn.send(size.to_string().as_bytes()).await?;
    conn.send(name.as_bytes()).await?;

    let reply = conn.recv(MAX_PAYLOAD).await?;
    if reply == ERROR {
        return Err(TransferError::Refused);
    }
    if reply != OKAY {
        return Err(TransferError::Handshake(format!(
            "unexpected server reply {:?}",
            String::from_utf8_lossy(&reply)
        )));
    }
    log::info!("received server positive response; starting transfer");

    let started = Instant::now();
    let mut sent = 0u64;
    let mut chunk = vec![0u8; MAX_PAYLOAD];
    while sent < size {
        log::debug!("client progress: {sent} / {size}");
        let n = read_chunk(&mut file, &mut chunk).await?;
        if n == 0 {
            return Err(TransferError::ShortFile {
                sent,
                expected: size,
            });
        }
        sent += conn.send(&chunk[..n]).await? as u64;
    }

    let report = TransferReport {
        bytes: sent,
        elapsed: started.elapsed(),
    };
    log::info!(
        "completed the file transfer in {:.3} s ({:.2} KB/s)",
        report.elapsed.as_secs_f64(),
        report.throughput_kbps()
    );
    Ok(report)
}

/// Server side: accept one announced file into `store`.
///
/// Only the final component of the announced name is used, so a client
/// cannot write outside `store`.
pub async fn receive_file(
    conn: &mut Connection,
    store: &Path,
) -> Result<(PathBuf, TransferReport), TransferError> {
    let size_msg = conn.recv(MAX_PAYLOAD).await?;
    let size: u64 = std::str::from_utf8(&size_msg)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| {
            TransferError::Handshake(format!(
                "bad file size {:?}",
                String::from_utf8_lossy(&size_msg)
            ))
        })?;
    log::info!("received client request: file size = {size}");

    let name_msg = conn.recv(MAX_PAYLOAD).await?;
    let name = String::from_utf8_lossy(&name_msg).into_owned();
    let Some(file_name) = Path::new(&name).file_name() else {
        conn.send(ERROR).await?;
        return Err(TransferError::Handshake(format!("bad file name {name:?}")));
    };
    let target = store.join(file_name);

    let mut file = match File::create(&target).await {
        Ok(file) => file,
        Err(e) => {
            log::warn!("cannot open {} for writing: {e}", target.display());
            conn.send(ERROR).await?;
            return Err(e.into());
        }
    };
    log::info!("opened {} for writing", target.display());
    conn.send(OKAY).await?;

    let started = Instant::now();
    let mut received = 0u64;
    while received < size {
        log::debug!("server progress: {received} / {size}");
        let chunk = conn.recv(MAX_PAYLOAD).await?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }
    file.flush().await?;

    let report = TransferReport {
        bytes: received,
        elapsed: started.elapsed(),
    };
    log::info!("received {} bytes into {}", received, target.display());
    Ok((target, report))
}

/// Fill `buf` from `file`, stopping early only at end of file.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
