//! Mattermost incoming-webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::ChannelError;
use crate::events::{IncidentReport, RenderContext};
use crate::transport::HttpTransport;
use crate::NotifyChannel;

/// Mattermost incoming webhook channel.
pub struct MattermostChannel {
    webhook_url: Option<String>,
    username: String,
    context: RenderContext,
    transport: HttpTransport,
}

impl MattermostChannel {
    /// Create a Mattermost channel posting as `username`.
    #[must_use]
    pub fn new(
        webhook_url: Option<String>,
        username: impl Into<String>,
        context: RenderContext,
        transport: HttpTransport,
    ) -> Self {
        Self {
            webhook_url: webhook_url.filter(|u| !u.is_empty()),
            username: username.into(),
            context,
            transport,
        }
    }

    /// Render the markdown message for an incident.
    #[must_use]
    pub fn format_message(&self, report: &IncidentReport) -> String {
        let incident = &report.incident;
        let ctx = &self.context;

        format!(
            "*ID*: [{}]({})\n*Name*: {}\n*Severity*: {}\n*Created*: {}\n*Description*: {}\n[Go to events]({})",
            incident.key,
            ctx.incident_url(incident),
            incident.name,
            incident.severity,
            ctx.display_time(incident),
            incident.description_text(),
            ctx.events_url(incident),
        )
    }
}

#[async_trait]
impl NotifyChannel for MattermostChannel {
    fn name(&self) -> &'static str {
        "mattermost"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, report: &IncidentReport) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("MM_WEBHOOK_URL".to_string()))?;

        let payload = MattermostPayload {
            username: &self.username,
            text: self.format_message(report),
        };

        debug!(channel = "mattermost", incident = %report.incident.key, "Sending notification");

        let request = self.transport.client().post(webhook_url).json(&payload);
        self.transport.execute(request).await?;

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct MattermostPayload<'a> {
    username: &'a str,
    text: String,
}
