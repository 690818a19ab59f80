//! Incident data model and the presentation helpers shared by all channels.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Display format for creation timestamps in rendered messages.
pub const DISPLAY_TIME_FORMAT: &str = "%H:%M:%S %d.%m.%Y";

/// A single incident as returned by the incident list query.
///
/// `description` is not part of the list response; it is filled in by the
/// enrichment step before the incident reaches any channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(deserialize_with = "deserialize_created")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub assigned: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Incident {
    /// Description text, empty when the incident has not been enriched.
    #[must_use]
    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

/// An enriched incident ready for dispatch.
#[derive(Debug, Clone)]
pub struct IncidentReport {
    pub incident: Incident,
    /// Complete detail record, present only when a channel needs every field.
    pub record: Option<serde_json::Value>,
}

impl IncidentReport {
    #[must_use]
    pub fn new(incident: Incident) -> Self {
        Self {
            incident,
            record: None,
        }
    }

    #[must_use]
    pub fn with_record(mut self, record: serde_json::Value) -> Self {
        self.record = Some(record);
        self
    }
}

/// Settings every channel needs to render links and local times.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Host (or host:port) of the incident management UI.
    pub host: String,
    /// Hours added to UTC creation times before display.
    pub utc_offset_hours: i32,
}

impl RenderContext {
    #[must_use]
    pub fn new(host: impl Into<String>, utc_offset_hours: i32) -> Self {
        Self {
            host: host.into(),
            utc_offset_hours,
        }
    }

    /// Deep link to the incident card.
    #[must_use]
    pub fn incident_url(&self, incident: &Incident) -> String {
        format!(
            "https://{}/#/incident/incidents/view/{}",
            self.host, incident.id
        )
    }

    /// Deep link to the event stream correlated with the incident.
    #[must_use]
    pub fn events_url(&self, incident: &Incident) -> String {
        format!(
            "https://{}/#/events/view?groupId=-1&incKey={}&incidentId={}&incidentName={}",
            self.host,
            urlencoding::encode(&incident.key),
            urlencoding::encode(&incident.id),
            urlencoding::encode(&incident.name),
        )
    }

    /// Creation time shifted by the configured offset, in display format.
    #[must_use]
    pub fn display_time(&self, incident: &Incident) -> String {
        (incident.created + Duration::hours(i64::from(self.utc_offset_hours)))
            .format(DISPLAY_TIME_FORMAT)
            .to_string()
    }
}

/// Parse an incident creation timestamp.
///
/// The platform emits RFC 3339 with seven fractional digits; timestamps without
/// an offset are taken as UTC.
pub fn parse_created(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let trimmed = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_created<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_created(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid creation timestamp: {raw}")))
}
