//! Microsoft Teams webhook channel using Adaptive Cards.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::ChannelError;
use crate::events::{IncidentReport, RenderContext};
use crate::transport::HttpTransport;
use crate::NotifyChannel;

const ADAPTIVE_CARD_SCHEMA: &str = "http://adaptivecards.io/schemas/adaptive-card.json";
const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

/// Teams incoming webhook channel.
pub struct TeamsChannel {
    webhook_url: Option<String>,
    context: RenderContext,
    transport: HttpTransport,
}

impl TeamsChannel {
    #[must_use]
    pub fn new(webhook_url: Option<String>, context: RenderContext, transport: HttpTransport) -> Self {
        Self {
            webhook_url: webhook_url.filter(|u| !u.is_empty()),
            context,
            transport,
        }
    }

    /// Build the webhook message wrapping an Adaptive Card.
    fn format_payload(&self, report: &IncidentReport) -> TeamsMessage {
        let incident = &report.incident;
        let ctx = &self.context;

        let card = AdaptiveCard {
            schema: ADAPTIVE_CARD_SCHEMA,
            card_type: "AdaptiveCard",
            version: "1.4",
            body: vec![
                CardElement::TextBlock {
                    text: incident.name.clone(),
                    weight: "Bolder",
                    size: "Large",
                    wrap: None,
                },
                CardElement::TextBlock {
                    text: incident.description_text().to_string(),
                    weight: "Bolder",
                    size: "Medium",
                    wrap: Some(true),
                },
                CardElement::FactSet {
                    facts: vec![
                        Fact {
                            title: "ID",
                            value: format!("[{}]({})", incident.key, ctx.incident_url(incident)),
                        },
                        Fact {
                            title: "Severity",
                            value: incident.severity.clone(),
                        },
                        Fact {
                            title: "Created",
                            value: ctx.display_time(incident),
                        },
                        Fact {
                            title: "Events",
                            value: format!("[Go to events]({})", ctx.events_url(incident)),
                        },
                    ],
                },
            ],
        };

        TeamsMessage {
            message_type: "message",
            attachments: vec![Attachment {
                content_type: ADAPTIVE_CARD_CONTENT_TYPE,
                content: card,
            }],
        }
    }
}

#[async_trait]
impl NotifyChannel for TeamsChannel {
    fn name(&self) -> &'static str {
        "teams"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, report: &IncidentReport) -> Result<(), ChannelError> {
        let webhook_url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("TEAMS_WEBHOOK_URL".to_string()))?;

        let payload = self.format_payload(report);

        debug!(channel = "teams", incident = %report.incident.key, "Sending notification");

        let request = self.transport.client().post(webhook_url).json(&payload);
        self.transport.execute(request).await?;

        Ok(())
    }
}

// =============================================================================
// Teams API types
// =============================================================================

#[derive(Debug, Serialize)]
struct TeamsMessage {
    #[serde(rename = "type")]
    message_type: &'static str,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Attachment {
    content_type: &'static str,
    content: AdaptiveCard,
}

#[derive(Debug, Serialize)]
struct AdaptiveCard {
    #[serde(rename = "$schema")]
    schema: &'static str,
    #[serde(rename = "type")]
    card_type: &'static str,
    version: &'static str,
    body: Vec<CardElement>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum CardElement {
    TextBlock {
        text: String,
        weight: &'static str,
        size: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        wrap: Option<bool>,
    },
    FactSet {
        facts: Vec<Fact>,
    },
}

#[derive(Debug, Serialize)]
struct Fact {
    title: &'static str,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::fixtures;
    use crate::transport::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(url: Option<String>) -> TeamsChannel {
        TeamsChannel::new(
            url,
            RenderContext::new("siem.local", 3),
            HttpTransport::new(false).unwrap().with_retry(RetryPolicy::none()),
        )
    }

    #[test]
    fn test_payload_shape() {
        let report = IncidentReport::new(fixtures::incident("a-1", "INC-7", "Brute force"));
        let payload = serde_json::to_value(channel(None).format_payload(&report)).unwrap();

        assert_eq!(payload["type"], "message");
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["contentType"], ADAPTIVE_CARD_CONTENT_TYPE);

        let card = &attachment["content"];
        assert_eq!(card["$schema"], ADAPTIVE_CARD_SCHEMA);
        assert_eq!(card["type"], "AdaptiveCard");
        assert_eq!(card["body"][0], json!({
            "type": "TextBlock", "text": "Brute force", "weight": "Bolder", "size": "Large"
        }));
        assert_eq!(card["body"][1]["wrap"], true);
        assert_eq!(card["body"][2]["type"], "FactSet");
        assert_eq!(
            card["body"][2]["facts"][0]["value"],
            "[INC-7](https://siem.local/#/incident/incidents/view/a-1)"
        );
        assert_eq!(card["body"][2]["facts"][2]["value"], "13:15:30 01.03.2024");
        assert_eq!(
            card["body"][2]["facts"][3]["value"],
            "[Go to events](https://siem.local/#/events/view?groupId=-1&incKey=INC-7&incidentId=a-1&incidentName=Brute%20force)"
        );
    }

    #[tokio::test]
    async fn test_send_posts_card() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"type": "message"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = channel(Some(server.uri()));
        let report = IncidentReport::new(fixtures::incident("a-1", "INC-7", "Brute force"));
        channel.send(&report).await.unwrap();
    }
}
