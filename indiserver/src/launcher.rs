//! Starting driver transports.
//!
//! The broker never cares whether a driver is a child process or a remote
//! INDI server; it asks a [`DriverLauncher`] for a [`DriverTransport`] and
//! wires the byte streams into its I/O tasks. Tests substitute their own
//! launcher backed by in-memory pipes.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::config::DriverSpec;
use crate::error::LaunchError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Live byte streams to one driver.
pub struct DriverTransport {
    /// Driver to broker
    pub reader: BoxedReader,
    /// Broker to driver
    pub writer: BoxedWriter,
    /// Diagnostic output, local drivers only
    pub stderr: Option<BoxedReader>,
    /// Process handle; dropping it kills the driver
    pub child: Option<Child>,
}

impl DriverTransport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            stderr: None,
            child: None,
        }
    }
}

impl std::fmt::Debug for DriverTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverTransport")
            .field("stderr", &self.stderr.is_some())
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish()
    }
}

/// Opens transports for drivers.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    /// Start `spec`, or reconnect to it after a failure.
    async fn launch(&self, spec: &DriverSpec) -> Result<DriverTransport, LaunchError>;
}

/// Spawns local programs and dials remote servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }

    fn spawn_local(program: &str) -> Result<DriverTransport, LaunchError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LaunchError::Spawn)?;

        let writer = child.stdin.take().ok_or(LaunchError::MissingPipe("stdin"))?;
        let reader = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;

        info!(driver = %program, pid = ?child.id(), "driver process started");

        Ok(DriverTransport {
            reader: Box::new(reader),
            writer: Box::new(writer),
            stderr: Some(Box::new(stderr)),
            child: Some(child),
        })
    }

    async fn connect_remote(host: &str, port: u16) -> Result<DriverTransport, LaunchError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| LaunchError::Connect {
                address: format!("{host}:{port}"),
                source,
            })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!("{host}:{port}: could not set TCP_NODELAY: {e}");
        }
        info!("connected to remote driver at {host}:{port}");

        let (reader, writer) = stream.into_split();
        Ok(DriverTransport::new(reader, writer))
    }
}

#[async_trait]
impl DriverLauncher for SystemLauncher {
    async fn launch(&self, spec: &DriverSpec) -> Result<DriverTransport, LaunchError> {
        match spec {
            DriverSpec::Local { program } => Self::spawn_local(program),
            DriverSpec::Remote { host, port, .. } => Self::connect_remote(host, *port).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let spec = DriverSpec::Local {
            program: "/nonexistent/indi_driver_that_is_not_there".to_string(),
        };
        let result = SystemLauncher::new().launch(&spec).await;
        assert!(matches!(result, Err(LaunchError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_unreachable_remote_fails_to_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let spec = DriverSpec::Remote {
            device: "Mount".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };
        match SystemLauncher::new().launch(&spec).await {
            Err(LaunchError::Connect { address, .. }) => {
                assert_eq!(address, format!("127.0.0.1:{port}"))
            }
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_transport_carries_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let spec = DriverSpec::Remote {
            device: "Mount".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        };

        let launcher = SystemLauncher::new();
        let (transport, accepted) = tokio::join!(launcher.launch(&spec), listener.accept());
        let mut transport = transport.unwrap();
        let (mut server_side, _) = accepted.unwrap();
        assert!(transport.child.is_none());
        assert!(transport.stderr.is_none());

        transport.writer.write_all(b"<getProperties/>").await.unwrap();
        let mut buf = [0u8; 16];
        server_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"<getProperties/>");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_transport_pipes_stdio() {
        let spec = DriverSpec::Local {
            program: "cat".to_string(),
        };
        let mut transport = SystemLauncher::new().launch(&spec).await.unwrap();
        assert!(transport.child.is_some());
        assert!(transport.stderr.is_some());

        transport.writer.write_all(b"<delProperty/>").await.unwrap();
        transport.writer.flush().await.unwrap();
        let mut buf = [0u8; 14];
        transport.reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"<delProperty/>");
    }
}
