//! Driver connection state and restart bookkeeping.

use tokio::process::Child;

use crate::config::DriverSpec;
use crate::io::IoTasks;
use crate::message::MessageQueue;

/// Where a driver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Launch requested, transport not yet attached
    Starting,
    /// Transport attached and participating in routing
    Running,
    /// Old transport torn down, waiting for a relaunch
    Restarting,
    /// Restart ceiling exceeded
    Dead,
}

/// One driver named on the command line, across all of its launches.
#[derive(Debug)]
pub struct DriverConnection {
    spec: DriverSpec,
    device: Option<String>,
    state: DriverState,
    restarts: u32,
    epoch: u64,
    queue: MessageQueue,
    io: Option<IoTasks>,
    child: Option<Child>,
}

impl DriverConnection {
    pub fn new(spec: DriverSpec) -> Self {
        let device = spec.advertised_device().map(str::to_string);
        Self {
            spec,
            device,
            state: DriverState::Starting,
            restarts: 0,
            epoch: 0,
            queue: MessageQueue::new(),
            io: None,
            child: None,
        }
    }

    pub fn spec(&self) -> &DriverSpec {
        &self.spec
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> String {
        self.spec.to_string()
    }

    /// Device this driver owns, once known.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Record the device from traffic. The first device seen sticks for the
    /// life of the slot; returns true only when it was newly learned.
    pub fn learn_device(&mut self, device: &str) -> bool {
        if self.device.is_some() || device.is_empty() {
            return false;
        }
        self.device = Some(device.to_string());
        true
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == DriverState::Running
    }

    /// Restarts performed so far, never reset.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Current launch number; events tagged with an older epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// Attach a live transport for the current epoch.
    pub(crate) fn attach(&mut self, io: IoTasks, child: Option<Child>) {
        self.io = Some(io);
        self.child = child;
        self.state = DriverState::Running;
    }

    /// Drop the transport and everything still queued for it.
    ///
    /// Dropping the child kills a local driver; dropping the I/O tasks
    /// closes a remote driver's socket. Returns messages released.
    pub(crate) fn teardown(&mut self) -> usize {
        self.io = None;
        self.child = None;
        self.state = DriverState::Restarting;
        self.queue.drain()
    }

    /// Count one more restart and move to the next epoch.
    pub(crate) fn begin_restart(&mut self) -> u64 {
        self.restarts += 1;
        self.epoch += 1;
        self.state = DriverState::Starting;
        self.epoch
    }

    pub(crate) fn mark_dead(&mut self) {
        self.state = DriverState::Dead;
    }
}
