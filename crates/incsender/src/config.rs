//! Command line and environment configuration.
//!
//! Every option can be given as a flag or through the environment variable
//! used by the container deployment. [`Config::from_cli`] validates the raw
//! values once at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use notify::SyslogProtocol;
use tracing::warn;

use crate::auth::ClientCredentials;
use crate::error::{Error, Result};
use crate::filter::FilterConfig;

/// Longest accepted lookback window: one year.
pub const MAX_LOOKBACK_MINUTES: i64 = 60 * 24 * 365;

/// Incident sender - forwards platform incidents to chat and syslog sinks.
#[derive(Parser, Debug, Clone)]
#[command(name = "incsender")]
#[command(about = "Poll security incidents and forward them to notification channels")]
#[command(version)]
pub struct Cli {
    /// Platform host (or host:port) serving the UI and API
    #[arg(long, env = "MP10_ADDRESS", default_value = "")]
    pub address: String,

    /// Minutes between cycles
    #[arg(long, env = "SCHEDULE", default_value_t = 5)]
    pub schedule: u64,

    /// Lookback window in minutes used when there is no usable savepoint
    #[arg(long, env = "MINUTES", default_value_t = 10)]
    pub minutes: i64,

    /// Hours added to UTC creation times in rendered messages
    #[arg(long, env = "GMT", default_value_t = 3, allow_hyphen_values = true)]
    pub gmt: i32,

    /// Reference list filter mode: bl/deny or wl/allow
    #[arg(long, env = "FILTER_TYPE", default_value = "")]
    pub filter_type: String,

    /// Name of the reference list used for filtering
    #[arg(long, env = "TABLE_LIST_NAME", default_value = "")]
    pub table_list_name: String,

    /// Enable Telegram delivery
    #[arg(long, env = "TG_ENABLED", default_value = "false", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
    pub tg_enabled: bool,

    /// Telegram bot token
    #[arg(long, env = "TG_TOKEN", hide_env_values = true)]
    pub tg_token: Option<String>,

    /// Telegram chat id
    #[arg(long, env = "CHAT_ID")]
    pub chat_id: Option<String>,

    /// Enable Mattermost delivery
    #[arg(long, env = "MM_ENABLED", default_value = "false", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
    pub mm_enabled: bool,

    /// Username shown on Mattermost posts
    #[arg(long, env = "MM_USERNAME", default_value = "")]
    pub mm_username: String,

    /// Mattermost incoming webhook URL
    #[arg(long, env = "MM_WEBHOOK_URL", hide_env_values = true)]
    pub mm_webhook_url: Option<String>,

    /// Enable Microsoft Teams delivery
    #[arg(long, env = "TEAMS_ENABLED", default_value = "false", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
    pub teams_enabled: bool,

    /// Teams incoming webhook URL
    #[arg(long, env = "TEAMS_WEBHOOK_URL", hide_env_values = true)]
    pub teams_webhook_url: Option<String>,

    /// Enable syslog CEF delivery
    #[arg(long, env = "SYSLOG_ENABLED", default_value = "true", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
    pub syslog_enabled: bool,

    /// Send every field of the incident record instead of the summary
    #[arg(long, env = "SYSLOG_FULL_BODY", default_value = "true", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
    pub syslog_full_body: bool,

    /// Syslog collector host
    #[arg(long, env = "SYSLOG_SERVER")]
    pub syslog_server: Option<String>,

    /// Syslog transport: tcp or udp
    #[arg(long, env = "SYSLOG_PROTO", default_value = "tcp")]
    pub syslog_proto: SyslogProtocol,

    /// Syslog collector port
    #[arg(long, env = "SYSLOG_PORT", default_value_t = 1468)]
    pub syslog_port: u16,

    /// API login
    #[arg(long, env = "FIRST_CREDENTIAL_LOGIN", default_value = "")]
    pub login: String,

    /// API password
    #[arg(long, env = "FIRST_CREDENTIAL_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// OAuth client secret
    #[arg(long, env = "SECOND_CREDENTIAL_PASSWORD", default_value = "", hide_env_values = true)]
    pub client_secret: String,

    /// File holding the savepoint between cycles
    #[arg(long, env = "SAVEPOINT_PATH", default_value = "./savepoint")]
    pub savepoint_path: PathBuf,

    /// Directory for rolling log files (stdout only when unset)
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Accept self-signed TLS certificates from the platform
    #[arg(long, env = "ACCEPT_INVALID_CERTS", default_value = "false", value_parser = BoolishValueParser::new(), action = ArgAction::Set)]
    pub accept_invalid_certs: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Telegram bot settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramSettings {
    pub token: String,
    pub chat_id: String,
}

/// Mattermost webhook settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MattermostSettings {
    pub webhook_url: String,
    pub username: String,
}

/// Syslog collector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyslogSettings {
    pub server: String,
    pub port: u16,
    pub protocol: SyslogProtocol,
    pub full_body: bool,
}

/// Teams webhook settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamsSettings {
    pub webhook_url: String,
}

/// Enabled and complete sinks. A `None` entry is never dispatched to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkConfig {
    pub telegram: Option<TelegramSettings>,
    pub mattermost: Option<MattermostSettings>,
    pub syslog: Option<SyslogSettings>,
    pub teams: Option<TeamsSettings>,
}

impl SinkConfig {
    /// Whether the syslog sink needs full detail records.
    #[must_use]
    pub fn needs_full_record(&self) -> bool {
        self.syslog.as_ref().is_some_and(|s| s.full_body)
    }

    #[must_use]
    pub fn enabled_count(&self) -> usize {
        [
            self.telegram.is_some(),
            self.mattermost.is_some(),
            self.syslog.is_some(),
            self.teams.is_some(),
        ]
        .into_iter()
        .filter(|enabled| *enabled)
        .count()
    }
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub schedule: Duration,
    pub lookback: chrono::Duration,
    pub utc_offset_hours: i32,
    pub filter: FilterConfig,
    pub sinks: SinkConfig,
    pub credentials: ClientCredentials,
    pub savepoint_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub accept_invalid_certs: bool,
    pub once: bool,
    pub verbose: bool,
}

impl Config {
    /// Validate raw options.
    ///
    /// Missing platform settings are errors. A sink that is enabled but
    /// incomplete is disabled with a warning.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let host = cli.address.trim().to_string();
        if host.is_empty() {
            return Err(Error::Config("MP10_ADDRESS is required".to_string()));
        }
        if cli.schedule == 0 {
            return Err(Error::Config("SCHEDULE must be at least 1 minute".to_string()));
        }
        if cli.minutes <= 0 || cli.minutes > MAX_LOOKBACK_MINUTES {
            return Err(Error::Config(format!(
                "MINUTES must be between 1 and {MAX_LOOKBACK_MINUTES}"
            )));
        }
        if cli.login.is_empty() || cli.password.is_empty() {
            return Err(Error::Config(
                "FIRST_CREDENTIAL_LOGIN and FIRST_CREDENTIAL_PASSWORD are required".to_string(),
            ));
        }

        let sinks = SinkConfig {
            telegram: telegram_settings(&cli),
            mattermost: mattermost_settings(&cli),
            syslog: syslog_settings(&cli),
            teams: teams_settings(&cli),
        };

        Ok(Self {
            host,
            schedule: Duration::from_secs(cli.schedule.saturating_mul(60)),
            lookback: chrono::Duration::minutes(cli.minutes),
            utc_offset_hours: cli.gmt,
            filter: FilterConfig::from_settings(&cli.filter_type, &cli.table_list_name),
            sinks,
            credentials: ClientCredentials {
                login: cli.login,
                password: cli.password,
                client_secret: cli.client_secret,
            },
            savepoint_path: cli.savepoint_path,
            log_dir: cli.log_dir,
            accept_invalid_certs: cli.accept_invalid_certs,
            once: cli.once,
            verbose: cli.verbose,
        })
    }
}

fn present(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn telegram_settings(cli: &Cli) -> Option<TelegramSettings> {
    if !cli.tg_enabled {
        return None;
    }
    match (present(cli.tg_token.as_ref()), present(cli.chat_id.as_ref())) {
        (Some(token), Some(chat_id)) => Some(TelegramSettings { token, chat_id }),
        _ => {
            warn!("Telegram enabled but TG_TOKEN or CHAT_ID is missing, channel disabled");
            None
        }
    }
}

fn mattermost_settings(cli: &Cli) -> Option<MattermostSettings> {
    if !cli.mm_enabled {
        return None;
    }
    if let Some(webhook_url) = present(cli.mm_webhook_url.as_ref()) {
        Some(MattermostSettings {
            webhook_url,
            username: cli.mm_username.clone(),
        })
    } else {
        warn!("Mattermost enabled but MM_WEBHOOK_URL is missing, channel disabled");
        None
    }
}

fn syslog_settings(cli: &Cli) -> Option<SyslogSettings> {
    if !cli.syslog_enabled {
        return None;
    }
    if let Some(server) = present(cli.syslog_server.as_ref()) {
        Some(SyslogSettings {
            server,
            port: cli.syslog_port,
            protocol: cli.syslog_proto,
            full_body: cli.syslog_full_body,
        })
    } else {
        warn!("Syslog enabled but SYSLOG_SERVER is missing, channel disabled");
        None
    }
}

fn teams_settings(cli: &Cli) -> Option<TeamsSettings> {
    if !cli.teams_enabled {
        return None;
    }
    if let Some(webhook_url) = present(cli.teams_webhook_url.as_ref()) {
        Some(TeamsSettings { webhook_url })
    } else {
        warn!("Teams enabled but TEAMS_WEBHOOK_URL is missing, channel disabled");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMode;
    use chrono::Utc;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec![
            "incsender",
            "--address",
            "siem.local",
            "--login",
            "api-user",
            "--password",
            "p@ss",
        ];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_cli(parse(&[])).unwrap();
        assert_eq!(config.host, "siem.local");
        assert_eq!(config.schedule, Duration::from_secs(300));
        assert_eq!(config.lookback, chrono::Duration::minutes(10));
        assert_eq!(config.utc_offset_hours, 3);
        assert_eq!(config.savepoint_path, PathBuf::from("./savepoint"));
        assert!(!config.filter.is_active());
        // Syslog is on by default but has no server configured.
        assert_eq!(config.sinks, SinkConfig::default());
        assert!(!config.once);
    }

    #[test]
    fn test_boolish_flags() {
        let cli = parse(&["--tg-enabled", "yes", "--syslog-enabled", "0", "--mm-enabled", "FALSE"]);
        assert!(cli.tg_enabled);
        assert!(!cli.syslog_enabled);
        assert!(!cli.mm_enabled);
        assert!(Cli::try_parse_from(["incsender", "--tg-enabled", "maybe"]).is_err());
    }

    #[test]
    fn test_incomplete_sinks_are_disabled() {
        let config = Config::from_cli(parse(&[
            "--tg-enabled",
            "true",
            "--tg-token",
            "bot-token",
            "--mm-enabled",
            "true",
            "--teams-enabled",
            "true",
            "--teams-webhook-url",
            "  ",
        ]))
        .unwrap();
        assert_eq!(config.sinks, SinkConfig::default());
        assert_eq!(config.sinks.enabled_count(), 0);
    }

    #[test]
    fn test_complete_sinks() {
        let config = Config::from_cli(parse(&[
            "--mm-enabled",
            "1",
            "--mm-webhook-url",
            "https://chat.local/hooks/x",
            "--mm-username",
            "siem-bot",
            "--syslog-server",
            "collector.local",
            "--syslog-proto",
            "UDP",
            "--syslog-full-body",
            "false",
            "--gmt",
            "-5",
        ]))
        .unwrap();

        assert_eq!(
            config.sinks.mattermost,
            Some(MattermostSettings {
                webhook_url: "https://chat.local/hooks/x".to_string(),
                username: "siem-bot".to_string(),
            })
        );
        assert_eq!(
            config.sinks.syslog,
            Some(SyslogSettings {
                server: "collector.local".to_string(),
                port: 1468,
                protocol: SyslogProtocol::Udp,
                full_body: false,
            })
        );
        assert!(!config.sinks.needs_full_record());
        assert_eq!(config.sinks.enabled_count(), 2);
        assert_eq!(config.utc_offset_hours, -5);
    }

    #[test]
    fn test_filter_settings() {
        let config =
            Config::from_cli(parse(&["--filter-type", "WL", "--table-list-name", "vip"])).unwrap();
        assert_eq!(config.filter.mode, FilterMode::Allow);
        assert_eq!(config.filter.list_name.as_deref(), Some("vip"));
    }

    #[test]
    fn test_missing_platform_settings_are_errors() {
        let cli = Cli::try_parse_from(["incsender", "--login", "u", "--password", "p"]).unwrap();
        assert!(matches!(Config::from_cli(cli), Err(Error::Config(_))));

        let cli = parse(&["--schedule", "0"]);
        assert!(matches!(Config::from_cli(cli), Err(Error::Config(_))));
    }

    #[test]
    fn test_lookback_is_bounded() {
        for minutes in ["0", "525601", "1000000000000"] {
            let cli = parse(&["--minutes", minutes]);
            assert!(
                matches!(Config::from_cli(cli), Err(Error::Config(_))),
                "minutes = {minutes}"
            );
        }

        let config = Config::from_cli(parse(&["--minutes", "525600"])).unwrap();
        let cursor = crate::savepoint::resolve_cursor(None, Utc::now(), config.lookback);
        assert!(cursor < Utc::now());
    }
}
