//! Syslog collector channel emitting CEF lines over TCP or UDP.
//!
//! The collector connection is opened once per dispatch cycle and shared by
//! every incident in that cycle.

use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::{IncidentReport, RenderContext};
use crate::flatten::flatten_json;
use crate::transport::REQUEST_TIMEOUT;
use crate::NotifyChannel;

/// CEF header prefix: version, vendor, product, product version.
const CEF_PREFIX: &str = "CEF:0|PT|SIEM|8.0";

/// Transport used to reach the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyslogProtocol {
    #[default]
    Tcp,
    Udp,
}

impl FromStr for SyslogProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(format!("unsupported syslog protocol: {other}")),
        }
    }
}

impl fmt::Display for SyslogProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// Line format written to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFormat {
    /// Fixed subset: description, link and display time.
    Summary,
    /// Every field of the detail record, flattened.
    FullBody,
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    async fn open(protocol: SyslogProtocol, server: &str, port: u16) -> std::io::Result<Self> {
        match protocol {
            SyslogProtocol::Tcp => Ok(Self::Tcp(TcpStream::connect((server, port)).await?)),
            SyslogProtocol::Udp => {
                let target = tokio::net::lookup_host((server, port))
                    .await?
                    .next()
                    .ok_or_else(|| {
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("cannot resolve {server}:{port}"),
                        )
                    })?;
                let local: SocketAddr = if target.is_ipv4() {
                    (Ipv4Addr::UNSPECIFIED, 0).into()
                } else {
                    (Ipv6Addr::UNSPECIFIED, 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(target).await?;
                Ok(Self::Udp(socket))
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.write_all(line.as_bytes()).await,
            Self::Udp(socket) => socket.send(line.as_bytes()).await.map(|_| ()),
        }
    }

    async fn shutdown(self) {
        if let Self::Tcp(mut stream) = self {
            if let Err(e) = stream.shutdown().await {
                debug!(error = %e, "Syslog connection shutdown failed");
            }
        }
    }
}

/// Run a socket operation, failing with `TimedOut` once `limit` elapses.
async fn bounded<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = std::io::Result<T>>,
) -> std::io::Result<T> {
    tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
        Err(std::io::Error::new(
            ErrorKind::TimedOut,
            format!("syslog {operation} timed out after {limit:?}"),
        ))
    })
}

/// Syslog collector channel.
pub struct SyslogChannel {
    server: Option<String>,
    port: u16,
    protocol: SyslogProtocol,
    format: SyslogFormat,
    context: RenderContext,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
}

impl SyslogChannel {
    #[must_use]
    pub fn new(
        server: Option<String>,
        port: u16,
        protocol: SyslogProtocol,
        format: SyslogFormat,
        context: RenderContext,
    ) -> Self {
        Self {
            server: server.filter(|s| !s.is_empty()),
            port,
            protocol,
            format,
            context,
            timeout: REQUEST_TIMEOUT,
            connection: Mutex::new(None),
        }
    }

    /// Override the bound applied to connecting and to every write.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Render the CEF line (newline-terminated) for an incident.
    pub fn format_line(&self, report: &IncidentReport) -> Result<String, ChannelError> {
        let incident = &report.incident;

        let extension = match self.format {
            SyslogFormat::Summary => format!(
                "description={} link={} time={}",
                incident.description_text(),
                self.context.incident_url(incident),
                self.context.display_time(incident),
            ),
            SyslogFormat::FullBody => {
                let record = report.record.as_ref().ok_or_else(|| {
                    ChannelError::Other(format!(
                        "full record for incident {} was not fetched",
                        incident.key
                    ))
                })?;
                flatten_json(record)
            }
        };

        Ok(format!(
            "{CEF_PREFIX}|{}|{}|{}\n",
            escape_header(&incident.name),
            escape_header(&incident.severity),
            single_line(&extension),
        ))
    }
}

#[async_trait]
impl NotifyChannel for SyslogChannel {
    fn name(&self) -> &'static str {
        "syslog"
    }

    fn enabled(&self) -> bool {
        self.server.is_some()
    }

    async fn open(&self) -> Result<(), ChannelError> {
        let server = self
            .server
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("SYSLOG_SERVER".to_string()))?;

        let connection = bounded(
            self.timeout,
            "connect",
            Connection::open(self.protocol, server, self.port),
        )
        .await?;
        debug!(server, port = self.port, protocol = %self.protocol, "Syslog connection opened");
        *self.connection.lock().await = Some(connection);
        Ok(())
    }

    async fn send(&self, report: &IncidentReport) -> Result<(), ChannelError> {
        let line = self.format_line(report)?;

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(ChannelError::NotConnected("syslog"))?;
        if let Err(e) = bounded(self.timeout, "write", connection.send_line(&line)).await {
            // A partially written line would corrupt the rest of the stream.
            *guard = None;
            return Err(e.into());
        }

        debug!(channel = "syslog", incident = %report.incident.key, "Line sent");
        Ok(())
    }

    async fn close(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.shutdown().await;
            debug!("Syslog connection closed");
        } else {
            warn!("Syslog channel closed without an open connection");
        }
    }
}

/// Escape characters that would break the pipe-delimited CEF header.
fn escape_header(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\|")
}

/// Keep a record on one collector line.
fn single_line(value: &str) -> String {
    value.replace("\r\n", "\\n").replace(['\n', '\r'], "\\n")
}
