//! Client connection state.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::io::IoTasks;
use crate::message::MessageQueue;

/// Whether a client wants BLOB traffic, set by `enableBLOB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlobPolicy {
    /// No BLOB traffic (default)
    #[default]
    Never,
    /// BLOB traffic in addition to everything else
    Also,
    /// Only BLOB traffic
    Only,
}

impl BlobPolicy {
    /// Whether a message of this kind may be sent to a client with this policy.
    pub fn admits(self, is_blob: bool) -> bool {
        match self {
            BlobPolicy::Never => !is_blob,
            BlobPolicy::Also => true,
            BlobPolicy::Only => is_blob,
        }
    }
}

impl FromStr for BlobPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(BlobPolicy::Never),
            "also" => Ok(BlobPolicy::Also),
            "only" => Ok(BlobPolicy::Only),
            other => Err(format!("unknown enableBLOB value '{other}'")),
        }
    }
}

impl fmt::Display for BlobPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlobPolicy::Never => "Never",
            BlobPolicy::Also => "Also",
            BlobPolicy::Only => "Only",
        })
    }
}

/// Tags that carry BLOB payloads.
pub fn is_blob_tag(tag: &str) -> bool {
    tag == "setBLOBVector" || tag == "newBLOBVector"
}

/// One accepted client.
#[derive(Debug)]
pub struct ClientConnection {
    peer: Option<SocketAddr>,
    blob: BlobPolicy,
    interest: Vec<String>,
    announced: bool,
    queue: MessageQueue,
    io: Option<IoTasks>,
}

impl ClientConnection {
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            blob: BlobPolicy::default(),
            interest: Vec::new(),
            announced: false,
            queue: MessageQueue::new(),
            io: None,
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn blob_policy(&self) -> BlobPolicy {
        self.blob
    }

    pub fn set_blob_policy(&mut self, policy: BlobPolicy) {
        self.blob = policy;
    }

    /// Devices this client asked for, in the order asked. Empty means all.
    pub fn interest(&self) -> &[String] {
        &self.interest
    }

    pub fn add_interest(&mut self, device: &str) {
        if !self.interest.iter().any(|d| d == device) {
            self.interest.push(device.to_string());
        }
    }

    /// Whether traffic for `device` is wanted by this client.
    pub fn is_interested(&self, device: Option<&str>) -> bool {
        if self.interest.is_empty() {
            return true;
        }
        device.is_some_and(|device| self.interest.iter().any(|d| d == device))
    }

    /// Whether this client has sent `getProperties` yet.
    pub fn is_announced(&self) -> bool {
        self.announced
    }

    pub fn mark_announced(&mut self) {
        self.announced = true;
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    pub(crate) fn attach_io(&mut self, io: IoTasks) {
        self.io = Some(io);
    }

    /// Stop I/O and release everything still queued. Returns messages dropped.
    pub(crate) fn shutdown(&mut self) -> usize {
        self.io = None;
        self.interest.clear();
        self.queue.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_policy_parse() {
        assert_eq!("Never".parse::<BlobPolicy>(), Ok(BlobPolicy::Never));
        assert_eq!("also".parse::<BlobPolicy>(), Ok(BlobPolicy::Also));
        assert_eq!(" ONLY\n".parse::<BlobPolicy>(), Ok(BlobPolicy::Only));
        assert!("sometimes".parse::<BlobPolicy>().is_err());
        assert_eq!(BlobPolicy::default(), BlobPolicy::Never);
    }

    #[test]
    fn test_blob_policy_admits() {
        assert!(BlobPolicy::Never.admits(false));
        assert!(!BlobPolicy::Never.admits(true));
        assert!(BlobPolicy::Also.admits(false));
        assert!(BlobPolicy::Also.admits(true));
        assert!(!BlobPolicy::Only.admits(false));
        assert!(BlobPolicy::Only.admits(true));
    }

    #[test]
    fn test_blob_tags() {
        assert!(is_blob_tag("setBLOBVector"));
        assert!(is_blob_tag("newBLOBVector"));
        assert!(!is_blob_tag("defBLOBVector"));
        assert!(!is_blob_tag("setNumberVector"));
    }

    #[test]
    fn test_interest_set() {
        let mut client = ClientConnection::new(None);
        assert!(client.is_interested(Some("CCD")));
        assert!(client.is_interested(None));

        client.add_interest("Mount");
        client.add_interest("Focuser");
        client.add_interest("Mount");
        assert_eq!(client.interest(), ["Mount", "Focuser"]);

        assert!(client.is_interested(Some("Mount")));
        assert!(!client.is_interested(Some("CCD")));
        assert!(!client.is_interested(None));
    }

    #[test]
    fn test_shutdown_clears_state() {
        let mut client = ClientConnection::new(None);
        client.add_interest("Mount");
        client
            .queue()
            .push(crate::message::Message::new(indi_xml::Element::new("message")));

        assert_eq!(client.shutdown(), 1);
        assert!(client.interest().is_empty());
        assert!(client.queue().is_empty());
    }
}
