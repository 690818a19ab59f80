//! Incident notification fan-out.
//!
//! This crate renders enriched security incidents and delivers them to chat
//! and log collection channels.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use notify::{HttpTransport, MattermostChannel, Notifier, RenderContext};
//!
//! # async fn example(reports: Vec<notify::IncidentReport>) -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(false)?;
//! let context = RenderContext::new("siem.example.com", 3);
//! let mattermost = MattermostChannel::new(
//!     Some("https://chat.example.com/hooks/abc".to_string()),
//!     "siem-bot",
//!     context,
//!     transport,
//! );
//!
//! let notifier = Notifier::with_channels(vec![Arc::new(mattermost)]);
//! let summary = notifier.dispatch(&reports).await;
//! println!("{} deliveries failed", summary.failures.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`TelegramChannel`], [`MattermostChannel`], [`SyslogChannel`] and
//!   [`TeamsChannel`] implement it
//! - [`Notifier`] delivers each incident to every enabled channel in order
//! - [`HttpTransport`] applies timeouts and retries to every HTTP call

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;
pub mod flatten;
pub mod transport;

pub use channels::mattermost::MattermostChannel;
pub use channels::syslog::{SyslogChannel, SyslogFormat, SyslogProtocol};
pub use channels::teams::TeamsChannel;
pub use channels::telegram::TelegramChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{Incident, IncidentReport, RenderContext};
pub use transport::{HttpTransport, RetryPolicy, TransportError};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A delivery that failed for one incident on one channel.
#[derive(Debug)]
pub struct DeliveryFailure {
    pub channel: &'static str,
    pub incident_key: String,
    pub error: ChannelError,
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Successful (incident, channel) deliveries.
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl DispatchSummary {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Central notification dispatcher.
///
/// Channels are attempted in the order they were registered. A failure on one
/// channel is logged and recorded but never prevents delivery of the same
/// incident to the remaining channels.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    /// Create a notifier with specific channels. Disabled channels are dropped.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        let channels: Vec<_> = channels
            .into_iter()
            .filter(|channel| {
                if channel.enabled() {
                    info!(channel = channel.name(), "Notification channel enabled");
                    true
                } else {
                    debug!(channel = channel.name(), "Channel disabled, skipping");
                    false
                }
            })
            .collect();

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self { channels }
    }

    /// Names of the enabled channels, in delivery order.
    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Deliver every report to every channel, one incident at a time.
    ///
    /// Each channel is opened before the first incident and closed after the
    /// last one, whether or not its deliveries succeeded.
    pub async fn dispatch(&self, reports: &[IncidentReport]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        if self.channels.is_empty() || reports.is_empty() {
            debug!(
                channels = self.channels.len(),
                reports = reports.len(),
                "Nothing to dispatch"
            );
            return summary;
        }

        for channel in &self.channels {
            if let Err(e) = channel.open().await {
                error!(channel = channel.name(), error = %e, "Failed to open channel");
            }
        }

        for report in reports {
            let key = &report.incident.key;
            for channel in &self.channels {
                let channel_name = channel.name();
                match channel.send(report).await {
                    Ok(()) => {
                        info!(channel = channel_name, incident = %key, "Incident delivered");
                        summary.delivered += 1;
                    }
                    Err(e) => {
                        error!(
                            channel = channel_name,
                            incident = %key,
                            error = %e,
                            "Failed to deliver incident"
                        );
                        summary.failures.push(DeliveryFailure {
                            channel: channel_name,
                            incident_key: key.clone(),
                            error: e,
                        });
                    }
                }
            }
        }

        for channel in &self.channels {
            channel.close().await;
        }

        summary
    }
}
