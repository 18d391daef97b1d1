//! Shared messages and per-connection outbound queues.
//!
//! A [`Message`] is built once from a parsed element and handed out as an
//! `Arc<Message>` to every queue that wants it; the serialized bytes are
//! released when the last queue has written (or discarded) its handle.
//!
//! A [`MessageQueue`] is the FIFO between the broker task, which pushes,
//! and a connection's writer task, which pops. It never blocks and has no
//! capacity limit: a slow peer only costs memory, never stalls a fast one.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use indi_xml::Element;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One routed element plus its wire form.
#[derive(Debug)]
pub struct Message {
    element: Element,
    wire: Bytes,
}

impl Message {
    /// Serialize `element` once and wrap it for sharing.
    pub fn new(element: Element) -> Arc<Self> {
        let wire = Bytes::from(element.to_xml());
        Arc::new(Self { element, wire })
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn tag(&self) -> &str {
        self.element.tag()
    }

    pub fn device(&self) -> Option<&str> {
        self.element.attr("device")
    }

    pub fn name(&self) -> Option<&str> {
        self.element.attr("name")
    }

    /// Bytes written to peers.
    pub fn wire(&self) -> &Bytes {
        &self.wire
    }

    /// Number of live handles, including any the caller holds.
    pub fn refcount(this: &Arc<Self>) -> usize {
        Arc::strong_count(this)
    }
}

#[derive(Debug, Default)]
struct Shared {
    entries: Mutex<VecDeque<Arc<Message>>>,
    ready: Notify,
}

/// Unbounded FIFO of shared messages for one connection.
///
/// Clones refer to the same queue.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    shared: Arc<Shared>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and wake the writer.
    pub fn push(&self, message: Arc<Message>) {
        self.shared.entries.lock().push_back(message);
        self.shared.ready.notify_one();
    }

    /// Remove and return the oldest message.
    pub fn pop(&self) -> Option<Arc<Message>> {
        self.shared.entries.lock().pop_front()
    }

    /// Oldest message without removing it.
    pub fn peek(&self) -> Option<Arc<Message>> {
        self.shared.entries.lock().front().cloned()
    }

    /// Current depth.
    pub fn peek_count(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peek_count() == 0
    }

    /// Release every queued message, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let drained: Vec<_> = self.shared.entries.lock().drain(..).collect();
        drained.len()
    }

    /// Wait until a push has happened since the last wake-up.
    ///
    /// A push made while nobody waits is remembered, so a writer that checks
    /// `pop` and then waits cannot miss it.
    pub async fn ready(&self) {
        self.shared.ready.notified().await;
    }
}
