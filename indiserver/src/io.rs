//! Per-connection I/O tasks.
//!
//! Every client and driver gets a reader task and a writer task. Readers do
//! one bounded `read` at a time, frame the bytes into elements and forward
//! them to the broker task as [`ConnectionEvent`]s. Writers drain the
//! connection's [`MessageQueue`] one whole message at a time. Neither kind
//! touches routing state; the broker task owns all of it.

use std::fmt;

use indi_xml::{Element, XmlError, XmlFramer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::message::MessageQueue;
use crate::registry::{ClientId, DriverId};

/// Which connection an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Client(ClientId),
    /// A driver, tagged with the launch it belongs to
    Driver { id: DriverId, epoch: u64 },
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Client(id) => write!(f, "{id}"),
            Peer::Driver { id, epoch } => write!(f, "{id} (launch {epoch})"),
        }
    }
}

/// Why a connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed its end
    Eof,
    ReadFailed(String),
    WriteFailed(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Eof => f.write_str("EOF"),
            CloseReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            CloseReason::WriteFailed(e) => write!(f, "write failed: {e}"),
        }
    }
}

/// Events sent from I/O tasks to the broker task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete top-level element arrived
    Element { peer: Peer, element: Element },
    /// Bytes that could not be framed into an element
    ProtocolError { peer: Peer, error: XmlError },
    /// The connection is unusable
    Closed { peer: Peer, reason: CloseReason },
}

/// Sender half used by I/O tasks.
pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Task handles for one connection; dropping them stops the tasks.
#[derive(Debug, Default)]
pub struct IoTasks {
    handles: Vec<JoinHandle<()>>,
}

impl IoTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for IoTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// Spawn the reader for one connection.
pub fn spawn_reader<R>(
    peer: Peer,
    label: String,
    mut reader: R,
    buffer_size: usize,
    events: EventSender,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut framer = XmlFramer::new();
        let mut buf = vec![0u8; buffer_size];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    let _ = events.send(ConnectionEvent::Closed {
                        peer,
                        reason: CloseReason::Eof,
                    });
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    let _ = events.send(ConnectionEvent::Closed {
                        peer,
                        reason: CloseReason::ReadFailed(e.to_string()),
                    });
                    return;
                }
            };

            trace!("{label}: read {n} bytes:\n{}", String::from_utf8_lossy(&buf[..n]));

            for result in framer.feed(&buf[..n]) {
                let event = match result {
                    Ok(element) => ConnectionEvent::Element { peer, element },
                    Err(error) => ConnectionEvent::ProtocolError { peer, error },
                };
                if events.send(event).is_err() {
                    return;
                }
            }
        }
    })
}

/// Spawn the writer for one connection.
pub fn spawn_writer<W>(
    peer: Peer,
    label: String,
    mut writer: W,
    queue: MessageQueue,
    events: EventSender,
) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        loop {
            while let Some(message) = queue.pop() {
                let result = match writer.write_all(message.wire()).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };

                if let Err(e) = result {
                    let _ = events.send(ConnectionEvent::Closed {
                        peer,
                        reason: CloseReason::WriteFailed(e.to_string()),
                    });
                    return;
                }

                debug!(
                    "{label}: sent {} {}.{}",
                    message.tag(),
                    message.device().unwrap_or("*"),
                    message.name().unwrap_or("*")
                );
                trace!("{label}: sent:\n{}", String::from_utf8_lossy(message.wire()));
            }

            queue.ready().await;
        }
    })
}

/// Re-emit a driver's stderr through tracing, one line at a time.
pub fn spawn_stderr_logger<R>(driver: String, stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => info!(driver = %driver, "{line}"),
                Ok(None) => return,
                Err(e) => {
                    debug!(driver = %driver, "stderr closed: {e}");
                    return;
                }
            }
        }
    })
}
