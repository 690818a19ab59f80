//! One collection cycle: token, fetch, filter, enrich, dispatch, savepoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use notify::{
    HttpTransport, Incident, IncidentReport, MattermostChannel, NotifyChannel, Notifier,
    RenderContext, SyslogChannel, SyslogFormat, TeamsChannel, TelegramChannel,
};
use tracing::{debug, error, info, warn};

use crate::api::{self, IncidentApi};
use crate::auth::{Credential, TokenManager};
use crate::config::{Config, SinkConfig};
use crate::error::{Error, Result};
use crate::filter::{self, FilterConfig};
use crate::savepoint::{self, Savepoint, SavepointStore};

/// Per-cycle behaviour that does not change between cycles.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub filter: FilterConfig,
    /// Window used when there is no usable savepoint.
    pub lookback: chrono::Duration,
    /// Attach the complete detail record to every report.
    pub full_record: bool,
}

/// What a successful cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub cursor: DateTime<Utc>,
    /// Incidents returned by the query.
    pub fetched: usize,
    /// Incidents left after filtering, all of them enriched.
    pub selected: usize,
    /// Successful (incident, channel) deliveries.
    pub delivered: usize,
    /// Failed (incident, channel) deliveries.
    pub failed: usize,
    pub savepoint: Savepoint,
}

/// Drives collection cycles. Owns the token cache and the savepoint store.
pub struct Collector {
    tokens: TokenManager,
    api: IncidentApi,
    notifier: Notifier,
    store: SavepointStore,
    settings: CycleSettings,
}

impl Collector {
    #[must_use]
    pub fn new(
        tokens: TokenManager,
        api: IncidentApi,
        notifier: Notifier,
        store: SavepointStore,
        settings: CycleSettings,
    ) -> Self {
        Self {
            tokens,
            api,
            notifier,
            store,
            settings,
        }
    }

    /// Wire every collaborator from validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config.accept_invalid_certs)?;
        let context = RenderContext::new(config.host.clone(), config.utc_offset_hours);

        let tokens = TokenManager::new(
            TokenManager::token_url_for_host(&config.host),
            config.credentials.clone(),
            transport.clone(),
        );
        let api = IncidentApi::for_host(&config.host, transport.clone());
        let notifier = Notifier::with_channels(build_channels(&config.sinks, &context, &transport));
        info!(channels = ?notifier.channel_names(), "Delivery order");

        Ok(Self::new(
            tokens,
            api,
            notifier,
            SavepointStore::new(config.savepoint_path.clone()),
            CycleSettings {
                filter: config.filter.clone(),
                lookback: config.lookback,
                full_record: config.sinks.needs_full_record(),
            },
        ))
    }

    /// Run one cycle.
    ///
    /// The savepoint is written only after dispatch. Any error before that
    /// point leaves it untouched so the same window is retried next cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let started_at = Utc::now();
        let cursor = savepoint::resolve_cursor(self.store.load(), started_at, self.settings.lookback);
        info!(started_at = %started_at, cursor = %cursor, "Cycle started");

        let (fetched, reports) = match self.collect(cursor).await {
            Ok(collected) => collected,
            Err(e) => {
                if e.is_unauthorized() {
                    self.tokens.invalidate();
                }
                return Err(e);
            }
        };

        let summary = self.notifier.dispatch(&reports).await;
        if !summary.is_clean() {
            warn!(
                failed = summary.failures.len(),
                delivered = summary.delivered,
                "Some deliveries failed"
            );
        }

        let savepoint = Savepoint::new(Utc::now());
        self.store.save(savepoint)?;

        let report = CycleReport {
            started_at,
            cursor,
            fetched,
            selected: reports.len(),
            delivered: summary.delivered,
            failed: summary.failures.len(),
            savepoint,
        };
        info!(
            fetched = report.fetched,
            selected = report.selected,
            delivered = report.delivered,
            failed = report.failed,
            savepoint = %report.savepoint,
            "Cycle finished"
        );
        Ok(report)
    }

    /// Fetch, filter and enrich. Returns the fetched count and the reports.
    async fn collect(&mut self, cursor: DateTime<Utc>) -> Result<(usize, Vec<IncidentReport>)> {
        let token = self.tokens.obtain_or_refresh().await?.clone();

        let incidents = self.api.fetch_since(&token, cursor).await?;
        let fetched = incidents.len();
        info!(count = fetched, "Incidents fetched");

        if incidents.is_empty() {
            return Ok((0, Vec::new()));
        }

        let incidents = match (&self.settings.filter.list_name, self.settings.filter.is_active()) {
            (Some(list_name), true) => {
                let list = self.api.fetch_reference_list(&token, list_name).await?;
                let kept = filter::apply(incidents, self.settings.filter.mode, &list);
                info!(
                    mode = %self.settings.filter.mode,
                    list = %list.name,
                    before = fetched,
                    after = kept.len(),
                    "Incidents filtered"
                );
                kept
            }
            _ => incidents,
        };

        let mut reports = Vec::with_capacity(incidents.len());
        for incident in incidents {
            let key = incident.key.clone();
            let report = self
                .enrich(&token, incident)
                .await
                .map_err(|source| {
                    error!(incident = %key, error = %source, "Enrichment failed, aborting cycle");
                    Error::Enrichment {
                        key,
                        source: Box::new(source),
                    }
                })?;
            reports.push(report);
        }

        Ok((fetched, reports))
    }

    async fn enrich(&self, token: &Credential, mut incident: Incident) -> Result<IncidentReport> {
        if self.settings.full_record {
            let record = self.api.fetch_record(token, &incident.id).await?;
            incident.description = Some(api::description_of(&record)?);
            debug!(incident = %incident.key, "Incident record fetched");
            Ok(IncidentReport::new(incident).with_record(record))
        } else {
            let description = self.api.fetch_description(token, &incident.id).await?;
            incident.description = Some(description);
            debug!(incident = %incident.key, "Incident description fetched");
            Ok(IncidentReport::new(incident))
        }
    }
}

/// Channels for the configured sinks, in delivery order.
#[must_use]
pub fn build_channels(
    sinks: &SinkConfig,
    context: &RenderContext,
    transport: &HttpTransport,
) -> Vec<Arc<dyn NotifyChannel>> {
    let mut channels: Vec<Arc<dyn NotifyChannel>> = Vec::new();

    if let Some(telegram) = &sinks.telegram {
        channels.push(Arc::new(TelegramChannel::new(
            Some(telegram.token.clone()),
            Some(telegram.chat_id.clone()),
            context.clone(),
            transport.clone(),
        )));
    }
    if let Some(mattermost) = &sinks.mattermost {
        channels.push(Arc::new(MattermostChannel::new(
            Some(mattermost.webhook_url.clone()),
            mattermost.username.clone(),
            context.clone(),
            transport.clone(),
        )));
    }
    if let Some(syslog) = &sinks.syslog {
        let format = if syslog.full_body {
            SyslogFormat::FullBody
        } else {
            SyslogFormat::Summary
        };
        channels.push(Arc::new(SyslogChannel::new(
            Some(syslog.server.clone()),
            syslog.port,
            syslog.protocol,
            format,
            context.clone(),
        )));
    }
    if let Some(teams) = &sinks.teams {
        channels.push(Arc::new(TeamsChannel::new(
            Some(teams.webhook_url.clone()),
            context.clone(),
            transport.clone(),
        )));
    }

    channels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MattermostSettings, SyslogSettings, TeamsSettings, TelegramSettings};
    use notify::SyslogProtocol;

    #[test]
    fn test_channels_follow_fixed_order() {
        let sinks = SinkConfig {
            telegram: Some(TelegramSettings {
                token: "bot".to_string(),
                chat_id: "42".to_string(),
            }),
            mattermost: Some(MattermostSettings {
                webhook_url: "https://chat.local/hooks/x".to_string(),
                username: "siem-bot".to_string(),
            }),
            syslog: Some(SyslogSettings {
                server: "collector.local".to_string(),
                port: 1468,
                protocol: SyslogProtocol::Tcp,
                full_body: false,
            }),
            teams: Some(TeamsSettings {
                webhook_url: "https://teams.local/hook".to_string(),
            }),
        };
        let context = RenderContext::new("siem.local", 3);
        let transport = HttpTransport::new(false).unwrap();

        let notifier = Notifier::with_channels(build_channels(&sinks, &context, &transport));
        assert_eq!(
            notifier.channel_names(),
            vec!["telegram", "mattermost", "syslog", "teams"]
        );
    }

    #[test]
    fn test_no_sinks_no_channels() {
        let context = RenderContext::new("siem.local", 3);
        let transport = HttpTransport::new(false).unwrap();
        assert!(build_channels(&SinkConfig::default(), &context, &transport).is_empty());
    }
}
