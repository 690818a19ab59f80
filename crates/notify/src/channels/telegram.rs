//! Telegram bot notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::escape_html;
use crate::error::ChannelError;
use crate::events::{IncidentReport, RenderContext};
use crate::transport::HttpTransport;
use crate::NotifyChannel;

/// Public Telegram Bot API endpoint.
const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram bot channel, addressed by bot token and chat id.
pub struct TelegramChannel {
    token: Option<String>,
    chat_id: Option<String>,
    api_url: String,
    context: RenderContext,
    transport: HttpTransport,
}

impl TelegramChannel {
    /// Create a Telegram channel. It is enabled only when both the bot token
    /// and the chat id are present.
    #[must_use]
    pub fn new(
        token: Option<String>,
        chat_id: Option<String>,
        context: RenderContext,
        transport: HttpTransport,
    ) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            chat_id: chat_id.filter(|c| !c.is_empty()),
            api_url: TELEGRAM_API_URL.to_string(),
            context,
            transport,
        }
    }

    /// Point the channel at a different Bot API host.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Render the HTML message body for an incident.
    #[must_use]
    pub fn format_message(&self, report: &IncidentReport) -> String {
        let incident = &report.incident;
        let ctx = &self.context;

        format!(
            "<b>ID</b>: <a href=\"{}\">{}</a>\n<b>{}</b>\n{}\n\n<b>Severity</b>: {}\n<b>Created</b>: {}\n<a href=\"{}\">Go to events</a>",
            escape_html(&ctx.incident_url(incident)),
            escape_html(&incident.key),
            escape_html(&incident.name),
            escape_html(incident.description_text()),
            escape_html(&incident.severity),
            ctx.display_time(incident),
            escape_html(&ctx.events_url(incident)),
        )
    }
}

#[async_trait]
impl NotifyChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn enabled(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    async fn send(&self, report: &IncidentReport) -> Result<(), ChannelError> {
        let (Some(token), Some(chat_id)) = (self.token.as_ref(), self.chat_id.as_ref()) else {
            return Err(ChannelError::NotConfigured("TG_TOKEN / CHAT_ID".to_string()));
        };

        let payload = SendMessage {
            chat_id,
            text: self.format_message(report),
            parse_mode: "HTML",
        };

        debug!(channel = "telegram", incident = %report.incident.key, "Sending notification");

        let request = self
            .transport
            .client()
            .post(format!("{}/bot{token}/sendMessage", self.api_url))
            .form(&payload);
        self.transport.execute(request).await?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}
