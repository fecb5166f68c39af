//! Common test utilities for rust_htf integration tests.
//!
//! Provides a mock instrument: a TCP listener speaking the line protocol,
//! recording every command it receives and optionally answering each line
//! with a canned response.

#![allow(dead_code)] // Utilities are shared across test binaries

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running mock instrument.
pub struct MockInstrument {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockInstrument {
    /// Spawn a mock instrument. When `reply` is set, every received line is
    /// answered with it (terminator included); otherwise the instrument
    /// never writes back.
    pub async fn spawn(reply: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let reply = reply.map(|r| r.to_string());

        let log = Arc::clone(&received);
        let handle = tokio::spawn(async move {
            // The engine opens one link per recipe record, strictly in
            // sequence, so connections are served one at a time to keep
            // the command log ordered.
            while let Ok((stream, _)) = listener.accept().await {
                let (read_half, mut write_half) = stream.into_split();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log.lock().unwrap().push(line);
                    if let Some(reply) = &reply {
                        if write_half.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            addr,
            received,
            handle,
        }
    }

    /// Spawn a mock that answers every line with `reply` followed by `\n`.
    pub async fn replying(reply: &str) -> Self {
        Self::spawn(Some(&format!("{reply}\n"))).await
    }

    /// Spawn a mock that accepts connections but never responds.
    pub async fn silent() -> Self {
        Self::spawn(None).await
    }

    /// A (host, port) pair with nothing listening on it.
    pub async fn dead_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    /// Every command line received so far, in order.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Wait until at least `n` commands have been received. Fire-and-forget
    /// sends can land in the kernel buffer before the mock reads them, so
    /// assertions on send-only traffic go through here.
    pub async fn wait_for_commands(&self, n: usize) -> Vec<String> {
        for _ in 0..200 {
            {
                let log = self.received.lock().unwrap();
                if log.len() >= n {
                    return log.clone();
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.received()
    }
}

impl Drop for MockInstrument {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
