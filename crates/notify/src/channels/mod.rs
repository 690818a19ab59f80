//! Notification channel implementations.

pub mod mattermost;
pub mod syslog;
pub mod teams;
pub mod telegram;

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::events::IncidentReport;

/// Trait for notification channels (Telegram, Mattermost, syslog, etc.).
///
/// A dispatch cycle calls [`open`](Self::open) once, [`send`](Self::send) for
/// every incident, and [`close`](Self::close) once, even when sends failed.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Prepare per-cycle resources such as collector connections.
    async fn open(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Deliver one incident to this channel.
    async fn send(&self, report: &IncidentReport) -> Result<(), ChannelError>;

    /// Release per-cycle resources.
    async fn close(&self) {}
}

/// Escape text for Telegram's HTML parse mode.
pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
