//! Allow/deny filtering of incidents against a named reference list.

use std::collections::HashSet;
use std::fmt;

use notify::Incident;
use tracing::warn;

/// How the reference list restricts the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Pass everything through.
    #[default]
    None,
    /// Drop incidents whose name is on the list.
    Deny,
    /// Keep only incidents whose name is on the list.
    Allow,
}

impl FilterMode {
    /// Parse a configured mode. Unknown values yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bl" | "deny" | "blacklist" | "denylist" => Some(Self::Deny),
            "wl" | "allow" | "whitelist" | "allowlist" => Some(Self::Allow),
            "" | "none" => Some(Self::None),
            _ => None,
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Deny => f.write_str("deny"),
            Self::Allow => f.write_str("allow"),
        }
    }
}

/// Filter settings validated at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    pub mode: FilterMode,
    /// Name of the reference list; always set when `mode` is not `None`.
    pub list_name: Option<String>,
}

impl FilterConfig {
    /// Build from raw settings, degrading to passthrough on bad input.
    #[must_use]
    pub fn from_settings(filter_type: &str, list_name: &str) -> Self {
        let Some(mode) = FilterMode::parse(filter_type) else {
            warn!(filter_type, "Skip filtering due to invalid filter type");
            return Self::default();
        };

        if mode == FilterMode::None {
            return Self::default();
        }

        let list_name = list_name.trim();
        if list_name.is_empty() {
            warn!(%mode, "Skip filtering due to empty table list name");
            return Self::default();
        }

        Self {
            mode,
            list_name: Some(list_name.to_string()),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.mode != FilterMode::None && self.list_name.is_some()
    }
}

/// A named set of incident names fetched from the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceList {
    pub name: String,
    pub entries: HashSet<String>,
}

impl ReferenceList {
    #[must_use]
    pub fn new(name: impl Into<String>, entries: impl IntoIterator<Item = String>) -> Self {
        Self {
            name: name.into(),
            entries: entries.into_iter().collect(),
        }
    }

    /// Exact, case-sensitive membership test.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }
}

/// Restrict incidents to or from the reference list, preserving order.
#[must_use]
pub fn apply(incidents: Vec<Incident>, mode: FilterMode, list: &ReferenceList) -> Vec<Incident> {
    match mode {
        FilterMode::None => incidents,
        FilterMode::Deny => incidents
            .into_iter()
            .filter(|incident| !list.contains(&incident.name))
            .collect(),
        FilterMode::Allow => incidents
            .into_iter()
            .filter(|incident| list.contains(&incident.name))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn incident(key: &str, name: &str) -> Incident {
        Incident {
            id: key.to_lowercase(),
            key: key.to_string(),
            name: name.to_string(),
            category: None,
            kind: None,
            status: Some("New".to_string()),
            created: DateTime::from_timestamp(1_709_287_200, 0).unwrap(),
            severity: "Low".to_string(),
            assigned: None,
            description: None,
        }
    }

    fn sample() -> Vec<Incident> {
        vec![
            incident("INC-1", "Brute force"),
            incident("INC-2", "Port scan"),
            incident("INC-3", "brute force"),
        ]
    }

    fn keys(incidents: &[Incident]) -> Vec<&str> {
        incidents.iter().map(|i| i.key.as_str()).collect()
    }

    #[test]
    fn test_empty_list_allow_drops_all_deny_keeps_all() {
        let empty = ReferenceList::default();
        assert!(apply(sample(), FilterMode::Allow, &empty).is_empty());
        assert_eq!(apply(sample(), FilterMode::Deny, &empty), sample());
    }

    #[test]
    fn test_exact_case_sensitive_match() {
        let list = ReferenceList::new("noise", ["Brute force".to_string()]);
        assert_eq!(keys(&apply(sample(), FilterMode::Deny, &list)), vec!["INC-2", "INC-3"]);
        assert_eq!(keys(&apply(sample(), FilterMode::Allow, &list)), vec!["INC-1"]);
    }

    #[test]
    fn test_none_is_passthrough() {
        let list = ReferenceList::new("noise", ["Brute force".to_string()]);
        assert_eq!(apply(sample(), FilterMode::None, &list), sample());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(FilterMode::parse("BL"), Some(FilterMode::Deny));
        assert_eq!(FilterMode::parse("wl"), Some(FilterMode::Allow));
        assert_eq!(FilterMode::parse("allow"), Some(FilterMode::Allow));
        assert_eq!(FilterMode::parse(""), Some(FilterMode::None));
        assert_eq!(FilterMode::parse("grey"), None);
    }

    #[test]
    fn test_config_degrades_to_passthrough() {
        assert!(!FilterConfig::from_settings("grey", "noise").is_active());
        assert!(!FilterConfig::from_settings("bl", "  ").is_active());
        assert!(!FilterConfig::from_settings("", "noise").is_active());

        let config = FilterConfig::from_settings("wl", "vip names");
        assert!(config.is_active());
        assert_eq!(config.mode, FilterMode::Allow);
        assert_eq!(config.list_name.as_deref(), Some("vip names"));
    }
}
