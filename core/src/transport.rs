/// Event transport: dial the server, emit named events, receive named events
///
/// A [`Connection`] is split in two. The [`TransportHandle`] is the sending side
/// and can be cloned freely. `events` yields the lifecycle events
/// (`Connected`, `Disconnected`) and every named event from the server, in
/// arrival order. Dropping every handle or calling [`TransportHandle::close`]
/// tears the socket down.
use crate::error::{ChatError, Result};
use crate::protocol::{Envelope, Frame, Outbound};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// What the transport reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Event { name: String, payload: Value },
    /// Connection lost, with the cause when there was one
    Disconnected(Option<String>),
}

/// Work for the writer task
#[derive(Debug)]
pub enum Outgoing {
    Envelope(Envelope),
    Close,
}

/// Sending side of a connection
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl TransportHandle {
    /// Handle plus the queue it feeds. Transports drain the queue onto the wire.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget send; replies come back as separate events
    pub fn emit(&self, event: &Outbound) -> Result<()> {
        let envelope = event.to_envelope()?;
        self.send(Outgoing::Envelope(envelope))
    }

    pub fn emit_raw(&self, name: &str, payload: Value) -> Result<()> {
        self.send(Outgoing::Envelope(Envelope::new(name, payload)))
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    fn send(&self, out: Outgoing) -> Result<()> {
        self.tx
            .send(out)
            .map_err(|_| ChatError::Connectivity("Transport is closed".to_string()))
    }
}

/// An established connection
pub struct Connection {
    pub handle: TransportHandle,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Something that can open a connection to the chat server
pub trait Connector: Send + Sync + 'static {
    fn dial(&self, host: &str, port: u16) -> impl Future<Output = Result<Connection>> + Send;
}

/// Length-prefixed JSON envelopes over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn dial(&self, host: &str, port: u16) -> impl Future<Output = Result<Connection>> + Send {
        let addr = format!("{}:{}", host, port);
        let connect_timeout = self.connect_timeout;
        async move {
            let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(ChatError::Connectivity(e.to_string())),
                Err(_) => {
                    return Err(ChatError::Connectivity(format!(
                        "Timed out after {} sec",
                        connect_timeout.as_secs()
                    )))
                }
            };
            debug!("TCP connection established to {}", addr);
            Ok(spawn_tcp_connection(stream))
        }
    }
}

/// Start the reader and writer tasks for an open stream
pub fn spawn_tcp_connection(stream: TcpStream) -> Connection {
    let (read_half, write_half) = stream.into_split();
    let (handle, outgoing) = TransportHandle::channel();
    let (events_tx, events) = mpsc::unbounded_channel();
    let closed = Arc::new(Notify::new());

    tokio::spawn(run_writer(write_half, outgoing, closed.clone()));
    tokio::spawn(run_reader(read_half, events_tx, closed));

    Connection { handle, events }
}

async fn run_writer(
    mut stream: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    closed: Arc<Notify>,
) {
    while let Some(out) = outgoing.recv().await {
        let envelope = match out {
            Outgoing::Envelope(envelope) => envelope,
            Outgoing::Close => break,
        };
        let frame = match Frame::from_envelope(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to serialize {}: {}", envelope.event, e);
                continue;
            }
        };
        if let Err(e) = stream.write_all(&frame.to_bytes()).await {
            warn!("Write to server failed: {}", e);
            break;
        }
    }
    let _ = stream.shutdown().await;
    closed.notify_one();
}

async fn run_reader(
    mut stream: OwnedReadHalf,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<Notify>,
) {
    if events.send(TransportEvent::Connected).is_err() {
        return;
    }
    let reason = loop {
        tokio::select! {
            _ = closed.notified() => {
                debug!("Transport closed locally");
                return;
            }
            frame = read_frame(&mut stream) => match frame {
                Ok(Some(envelope)) => {
                    let event = TransportEvent::Event {
                        name: envelope.event,
                        payload: envelope.data,
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
                Ok(None) => break None,
                Err(e) => break Some(e.to_string()),
            }
        }
    };
    let _ = events.send(TransportEvent::Disconnected(reason));
}

/// Next envelope, `None` on a clean end of stream. Undecodable frames are skipped.
async fn read_frame(stream: &mut OwnedReadHalf) -> Result<Option<Envelope>> {
    loop {
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ChatError::Io(e)),
        }

        let length = Frame::payload_len(len_buf)?;
        let mut payload = vec![0u8; length];
        stream.read_exact(&mut payload).await?;

        match (Frame { payload }).envelope() {
            Ok(envelope) => return Ok(Some(envelope)),
            Err(e) => warn!("Skipping undecodable frame: {}", e),
        }
    }
}
