//! # TCP Transport
//!
//! The default `Connector`: plain tokio TCP. Writes go through an unbounded
//! queue drained by a dedicated writer task so `send` never waits on the
//! socket. Reads hand back whatever chunk the socket delivers; framing is the
//! application's business.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::endpoints::Endpoint;
use crate::error::{ChannelError, Result};
use crate::transport::{Connector, Transport};

const READ_CHUNK: usize = 16 * 1024;

/// Opens `TcpTransport`s with `TCP_NODELAY` set.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn Transport>> {
        let stream = TcpStream::connect((endpoint.address.as_str(), endpoint.port))
            .await
            .map_err(|e| transport_error(endpoint, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| transport_error(endpoint, e))?;
        Ok(Arc::new(TcpTransport::new(endpoint.to_string(), stream)))
    }
}

/// A connected TCP stream split into a queued writer and a chunked reader.
#[derive(Debug)]
pub struct TcpTransport {
    label: String,
    peer: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: Mutex<OwnedReadHalf>,
    shutdown: CancellationToken,
}

impl TcpTransport {
    /// Takes ownership of `stream` and starts its writer task. Must be called
    /// inside a tokio runtime.
    pub fn new(label: String, stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(write_loop(
            label.clone(),
            write_half,
            queue,
            shutdown.clone(),
        ));

        Self {
            label,
            peer,
            outbound,
            reader: Mutex::new(read_half),
            shutdown,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn send(&self, payload: Bytes) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ChannelError::NotConnected);
        }
        self.outbound
            .send(payload)
            .map_err(|_| ChannelError::NotConnected)
    }

    async fn recv(&self) -> Result<Option<Bytes>> {
        let mut reader = self.reader.lock().await;
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);
        tokio::select! {
            _ = self.shutdown.cancelled() => Ok(None),
            read = reader.read_buf(&mut buffer) => match read {
                Ok(0) => Ok(None),
                Ok(_) => Ok(Some(buffer.freeze())),
                Err(e) => Err(ChannelError::Transport {
                    endpoint: self.label.clone(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn write_loop(
    label: String,
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(payload) => {
                    if let Err(e) = writer.write_all(&payload).await {
                        warn!(endpoint = %label, "Write failed: {}", e);
                        shutdown.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }
    let _ = writer.shutdown().await;
    debug!(endpoint = %label, "Writer task finished");
}

fn transport_error(endpoint: &Endpoint, e: std::io::Error) -> ChannelError {
    ChannelError::Transport {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    }
}
