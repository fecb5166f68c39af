//! Scoped TCP session to a single test instrument.
//!
//! Instruments speak a line-oriented ASCII protocol: commands are written
//! verbatim (callers append the `\n` terminator) and query responses are
//! read until the accumulated buffer ends with `\n`. One [`InstrumentLink`]
//! covers exactly one recipe record; the sequencer opens it, drives it, and
//! closes it on every exit path.
//!
//! There are no retries at this layer. Connect timeouts, read timeouts, and
//! I/O failures surface as distinct [`HtfError`] variants and the caller
//! decides what they mean for the run.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{AppResult, HtfError};

/// Line terminator for both commands and responses.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Connect/read deadlines applied to every instrument session.
#[derive(Clone, Copy, Debug)]
pub struct LinkTimeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(5),
        }
    }
}

/// An open TCP connection to one instrument.
pub struct InstrumentLink {
    stream: TcpStream,
    timeouts: LinkTimeouts,
    peer: String,
}

impl InstrumentLink {
    /// Establish a connection, bounded by the connect timeout.
    pub async fn open(hostname: &str, port: u16, timeouts: LinkTimeouts) -> AppResult<Self> {
        let peer = format!("{hostname}:{port}");
        let stream = tokio::time::timeout(timeouts.connect, TcpStream::connect(&peer))
            .await
            .map_err(|_| HtfError::ConnectTimeout {
                hostname: hostname.to_string(),
                port,
                timeout_ms: timeouts.connect.as_millis() as u64,
            })??;
        debug!(%peer, "instrument link open");
        Ok(Self {
            stream,
            timeouts,
            peer,
        })
    }

    /// Write a command verbatim, fire-and-forget. Bounded by the read
    /// timeout so a stalled peer can never hold a cancellation open.
    pub async fn send(&mut self, command: &[u8]) -> AppResult<()> {
        let write_timeout = self.timeouts.read;
        tokio::time::timeout(write_timeout, async {
            self.stream.write_all(command).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| HtfError::WriteTimeout {
            timeout_ms: write_timeout.as_millis() as u64,
        })??;
        debug!(peer = %self.peer, command = %String::from_utf8_lossy(command).trim(), "sent");
        Ok(())
    }

    /// Write a command, then read until the buffer ends with the line
    /// terminator. Returns the full buffer, terminator included.
    pub async fn query(&mut self, command: &[u8]) -> AppResult<Vec<u8>> {
        self.send(command).await?;

        let read_timeout = self.timeouts.read;
        let mut buffer = BytesMut::with_capacity(256);
        let response = tokio::time::timeout(read_timeout, async {
            loop {
                let n = self.stream.read_buf(&mut buffer).await?;
                if n == 0 {
                    return Err(HtfError::UnexpectedEof);
                }
                if buffer.last() == Some(&LINE_TERMINATOR) {
                    return Ok(buffer.split().freeze());
                }
            }
        })
        .await
        .map_err(|_| HtfError::ReadTimeout {
            timeout_ms: read_timeout.as_millis() as u64,
        })??;

        debug!(peer = %self.peer, response = %String::from_utf8_lossy(&response).trim(), "received");
        Ok(response.to_vec())
    }

    /// Orderly shutdown of both directions before the socket is released.
    pub async fn close(mut self) -> AppResult<()> {
        self.stream.shutdown().await?;
        debug!(peer = %self.peer, "instrument link closed");
        Ok(())
    }
}
