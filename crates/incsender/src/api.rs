//! Client for the incident platform REST API.
//!
//! Covers the three calls a cycle needs: the incident list query, the
//! per-incident detail record and the reference-list registry used for
//! filtering.

use chrono::{DateTime, Utc};
use notify::{HttpTransport, Incident};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::error::{Error, Result};
use crate::filter::ReferenceList;

/// Incidents requested per query. Only the first page is ever fetched.
pub const PAGE_SIZE: u32 = 50;

/// Entries requested from a reference list.
pub const REFERENCE_LIST_LIMIT: u32 = 100;

/// Lower bound format accepted by the incident query.
const TIME_FROM_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";

/// Columns requested from the incident query.
const INCIDENT_COLUMNS: [&str; 7] = [
    "key", "name", "category", "type", "status", "created", "assigned",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IncidentQuery {
    offset: u32,
    limit: u32,
    groups: Groups,
    time_from: String,
    time_to: Option<String>,
    filter_time_type: &'static str,
    filter: IncidentFilter,
    query_ids: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Groups {
    filter_type: &'static str,
}

#[derive(Debug, Serialize)]
struct IncidentFilter {
    select: Vec<&'static str>,
    #[serde(rename = "where")]
    condition: &'static str,
    orderby: Vec<SortField>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SortField {
    field: &'static str,
    sort_order: &'static str,
}

#[derive(Debug, Deserialize)]
struct IncidentPage {
    #[serde(default)]
    incidents: Vec<Incident>,
}

#[derive(Debug, Deserialize)]
struct TableListEntry {
    name: String,
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentSearch {
    offset: u32,
    limit: u32,
    filter: ContentFilter,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentFilter {
    select: Vec<&'static str>,
    #[serde(rename = "where")]
    condition: &'static str,
    order_by: Vec<SortField>,
    time_zone: i32,
}

#[derive(Debug, Deserialize)]
struct ContentPage {
    #[serde(default)]
    items: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
}

/// Incident platform API client.
#[derive(Debug, Clone)]
pub struct IncidentApi {
    base_url: String,
    transport: HttpTransport,
}

impl IncidentApi {
    /// Create a client rooted at `base_url` (scheme and authority, no trailing slash).
    #[must_use]
    pub fn new(base_url: impl Into<String>, transport: HttpTransport) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
        }
    }

    /// Client for the platform UI host.
    #[must_use]
    pub fn for_host(host: &str, transport: HttpTransport) -> Self {
        Self::new(format!("https://{host}"), transport)
    }

    fn authorized(&self, builder: RequestBuilder, token: &Credential) -> RequestBuilder {
        builder.header(AUTHORIZATION, format!("Bearer {}", token.access_token))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = self.transport.execute(builder).await?;
        let body = response.text().await.map_err(notify::TransportError::from)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Open incidents created at or after `cursor`, oldest first.
    pub async fn fetch_since(
        &self,
        token: &Credential,
        cursor: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let query = IncidentQuery {
            offset: 0,
            limit: PAGE_SIZE,
            groups: Groups {
                filter_type: "no_filter",
            },
            time_from: cursor.format(TIME_FROM_FORMAT).to_string(),
            time_to: None,
            filter_time_type: "creation",
            filter: IncidentFilter {
                select: INCIDENT_COLUMNS.to_vec(),
                condition: r#"(status != "Closed")"#,
                orderby: vec![SortField {
                    field: "created",
                    sort_order: "ascending",
                }],
            },
            query_ids: vec!["all_incidents"],
        };

        let url = format!("{}/api/v2/incidents", self.base_url);
        debug!(url = %url, time_from = %query.time_from, "Querying incidents");

        let request = self.authorized(self.transport.client().post(&url), token).json(&query);
        let page: IncidentPage = self.fetch_json(request).await?;

        let mut incidents = page.incidents;
        if incidents.len() >= PAGE_SIZE as usize {
            warn!(
                page_size = PAGE_SIZE,
                "Incident query returned a full page; later incidents are not fetched this cycle"
            );
        }
        incidents.sort_by_key(|incident| incident.created);

        debug!(count = incidents.len(), "Incidents fetched");
        Ok(incidents)
    }

    /// Complete detail record of one incident.
    pub async fn fetch_record(&self, token: &Credential, id: &str) -> Result<Value> {
        let url = format!("{}/api/incidentsReadModel/incidents/{id}", self.base_url);
        debug!(url = %url, "Fetching incident record");

        let request = self.authorized(self.transport.client().get(&url), token);
        self.fetch_json(request).await
    }

    /// Description of one incident. A `null` description is returned as empty.
    pub async fn fetch_description(&self, token: &Credential, id: &str) -> Result<String> {
        let record = self.fetch_record(token, id).await?;
        description_of(&record)
    }

    /// Fetch a reference list by exact name.
    pub async fn fetch_reference_list(
        &self,
        token: &Credential,
        name: &str,
    ) -> Result<ReferenceList> {
        let registry_url = format!("{}/api/events/v2/table_lists?kind=registry", self.base_url);
        let request = self.authorized(self.transport.client().get(&registry_url), token);
        let registry: Vec<TableListEntry> = self.fetch_json(request).await?;

        let list_token = registry
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.token)
            .ok_or_else(|| Error::Data(format!("reference list {name:?} not found")))?;

        let search = ContentSearch {
            offset: 0,
            limit: REFERENCE_LIST_LIMIT,
            filter: ContentFilter {
                select: vec!["_last_changed", "name"],
                condition: "",
                order_by: vec![SortField {
                    field: "_last_changed",
                    sort_order: "descending",
                }],
                time_zone: 180,
            },
        };

        let search_url = format!(
            "{}/api/events/v2/table_lists/{list_token}/content/search",
            self.base_url
        );
        let request = self
            .authorized(self.transport.client().post(&search_url), token)
            .json(&search);
        let page: ContentPage = self.fetch_json(request).await?;

        debug!(list = name, entries = page.items.len(), "Reference list fetched");
        Ok(ReferenceList::new(
            name,
            page.items.into_iter().map(|item| item.name),
        ))
    }
}

pub(crate) fn description_of(record: &Value) -> Result<String> {
    match record.get("description") {
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Null) => Ok(String::new()),
        Some(other) => Ok(other.to_string()),
        None => Err(Error::Data(
            "incident record has no description field".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::RetryPolicy;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> Credential {
        Credential {
            access_token: "tkn".to_string(),
            refresh_token: None,
            token_type: Some("Bearer".to_string()),
            expires_in: None,
            obtained_at: Utc::now(),
        }
    }

    fn api(server: &MockServer) -> IncidentApi {
        IncidentApi::new(
            server.uri(),
            HttpTransport::new(false).unwrap().with_retry(RetryPolicy::none()),
        )
    }

    fn summary(id: &str, key: &str, created: &str) -> Value {
        json!({
            "id": id,
            "key": key,
            "name": "Brute force",
            "category": "Attack",
            "type": "Incident",
            "status": "New",
            "created": created,
            "severity": "High",
            "assigned": null
        })
    }

    #[tokio::test]
    async fn test_fetch_since_sends_query_and_sorts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/incidents"))
            .and(header("authorization", "Bearer tkn"))
            .and(body_partial_json(json!({
                "offset": 0,
                "limit": 50,
                "timeFrom": "2024-03-01T10:00:00.000Z",
                "timeTo": null,
                "filterTimeType": "creation",
                "filter": {"where": "(status != \"Closed\")"},
                "queryIds": ["all_incidents"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "incidents": [
                    summary("b", "INC-2", "2024-03-01T10:02:00.0000000Z"),
                    summary("a", "INC-1", "2024-03-01T10:01:00.0000000Z")
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cursor = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.654321Z")
            .unwrap()
            .with_timezone(&Utc);
        let incidents = api(&server).fetch_since(&token(), cursor).await.unwrap();

        let keys: Vec<_> = incidents.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["INC-1", "INC-2"]);
        assert_eq!(incidents[0].kind.as_deref(), Some("Incident"));
        assert_eq!(incidents[0].severity, "High");
    }

    #[tokio::test]
    async fn test_fetch_since_unauthorized_is_detected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = api(&server)
            .fetch_since(&token(), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_fetch_since_rejects_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = api(&server)
            .fetch_since(&token(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }

    #[tokio::test]
    async fn test_fetch_description_variants() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/incidentsReadModel/incidents/a"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "a", "description": "Password spraying"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/incidentsReadModel/incidents/b"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "b", "description": null})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/incidentsReadModel/incidents/c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c"})))
            .mount(&server)
            .await;

        let api = api(&server);
        let token = token();
        assert_eq!(
            api.fetch_description(&token, "a").await.unwrap(),
            "Password spraying"
        );
        assert_eq!(api.fetch_description(&token, "b").await.unwrap(), "");
        assert!(matches!(
            api.fetch_description(&token, "c").await.unwrap_err(),
            Error::Data(_)
        ));
    }

    #[tokio::test]
    async fn test_fetch_reference_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events/v2/table_lists"))
            .and(query_param("kind", "registry"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "other", "token": "t-0"},
                {"name": "noise", "token": "t-1"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/events/v2/table_lists/t-1/content/search"))
            .and(body_partial_json(json!({"limit": 100})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"_last_changed": "2024-03-01", "name": "Brute force"},
                    {"_last_changed": "2024-02-01", "name": "Port scan"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let list = api(&server)
            .fetch_reference_list(&token(), "noise")
            .await
            .unwrap();
        assert_eq!(list.name, "noise");
        assert!(list.contains("Brute force"));
        assert!(list.contains("Port scan"));
        assert!(!list.contains("brute force"));
    }

    #[tokio::test]
    async fn test_missing_reference_list_is_data_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events/v2/table_lists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let err = api(&server)
            .fetch_reference_list(&token(), "noise")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Data(_)));
    }
}
