//! Shared types for watchlog
//!
//! This crate contains data structures used across the watchlog crates.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

// ============================================================================
// Field Types
// ============================================================================

/// Canonical source address
pub const SRC_IP: &str = "src_ip";
/// Canonical destination address
pub const DST_IP: &str = "dst_ip";
/// Canonical source port
pub const SPORT: &str = "sport";
/// Canonical destination port
pub const DPORT: &str = "dport";
/// Canonical action (Allow, Deny, ...)
pub const ACTION: &str = "action";
/// Canonical timestamp
pub const TS: &str = "ts";
/// Alias of `src_ip`
pub const IP: &str = "ip";

/// Key/value pairs extracted from a single log line.
///
/// Holds every `key=value` token found on the line with the canonical
/// fields overlaid on top. A canonical field that no source key supplied is
/// absent rather than empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldSet {
    fields: HashMap<String, String>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Set a field when `value` is present, remove it otherwise
    pub fn set(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(v) => {
                self.fields.insert(key.to_string(), v);
            }
            None => {
                self.fields.remove(key);
            }
        }
    }

    /// Look up any field, raw or canonical
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn src_ip(&self) -> Option<&str> {
        self.get(SRC_IP)
    }

    pub fn dst_ip(&self) -> Option<&str> {
        self.get(DST_IP)
    }

    pub fn sport(&self) -> Option<&str> {
        self.get(SPORT)
    }

    pub fn dport(&self) -> Option<&str> {
        self.get(DPORT)
    }

    pub fn action(&self) -> Option<&str> {
        self.get(ACTION)
    }

    pub fn ts(&self) -> Option<&str> {
        self.get(TS)
    }

    pub fn ip(&self) -> Option<&str> {
        self.get(IP)
    }

    /// Destination port as a number, if it is one
    pub fn dport_number(&self) -> Option<u16> {
        self.dport().and_then(|p| p.parse().ok())
    }

    /// Whether any of the flow fields (addresses, port, action) were found
    pub fn has_flow(&self) -> bool {
        self.src_ip().is_some()
            || self.dst_ip().is_some()
            || self.dport().is_some()
            || self.action().is_some()
    }

    /// Parsed `ts` field
    pub fn timestamp(&self) -> Option<DateTime<Local>> {
        self.ts().and_then(parse_timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Connection verdict recorded in the `action` field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Deny,
    #[default]
    Other,
}

impl Action {
    /// Classify the `action` field of a parsed line
    pub fn classify(fields: &FieldSet) -> Self {
        match fields.action() {
            Some(a) => Self::from_value(a),
            None => Self::Other,
        }
    }

    /// Classify a raw action value by prefix (case-insensitive)
    pub fn from_value(value: &str) -> Self {
        let lower = value.to_lowercase();
        if lower.starts_with("allow") {
            Self::Allow
        } else if lower.starts_with("deny") {
            Self::Deny
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Other => "info",
        }
    }
}

// ============================================================================
// Time Helpers
// ============================================================================

/// Parse a log timestamp.
///
/// Accepts RFC 3339 (`2024-05-01T10:00:00Z`, `...+02:00`) and the firewall's
/// `date time` form (`2024-05-01 10:00:00`, interpreted as local time).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    let s = raw.trim();
    if s.contains('T') || s.contains('Z') {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Local));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()?;
    Local.from_local_datetime(&naive).earliest()
}

/// Short age of `ts` relative to `now` ("42s ago", "3h ago").
///
/// Timestamps that cannot be parsed are returned unchanged; timestamps in the
/// future count as zero seconds old.
pub fn relative_age(ts: &str, now: DateTime<Local>) -> String {
    let Some(then) = parse_timestamp(ts) else {
        return ts.to_string();
    };
    let secs = (now - then).num_seconds().max(0);
    if secs < 60 {
        return format!("{}s ago", secs);
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{}m ago", mins);
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{}h ago", hours);
    }
    format!("{}d ago", hours / 24)
}

// ============================================================================
// Summary Types
// ============================================================================

/// Default number of rows kept in summary tables
pub const TOP_N: usize = 10;

/// Most frequent values and their counts, highest count first
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FrequencyTable {
    entries: Vec<(String, usize)>,
}

impl FrequencyTable {
    /// Build a table from counts listed in first-seen order.
    ///
    /// Sorting is stable, so equal counts keep their first-seen order.
    pub fn from_counts(mut counts: Vec<(String, usize)>, limit: usize) -> Self {
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(limit);
        Self { entries: counts }
    }

    pub fn entries(&self) -> &[(String, usize)] {
        &self.entries
    }

    /// Count for a value, if it made the table
    pub fn get(&self, value: &str) -> Option<usize> {
        self.entries
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, count)| *count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.entries.iter().map(|(v, c)| (v.as_str(), *c))
    }
}

/// Top internal sources and destination ports for a set of lines
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub top_ips: FrequencyTable,
    pub top_ports: FrequencyTable,
}

/// Indicators of unwanted traffic found in a set of lines
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SuspicionReport {
    /// Lines matching a BitTorrent signature
    pub bt_count: usize,

    /// Internal hosts seen on BitTorrent lines
    pub bt_ips: BTreeSet<String>,

    /// Internal hosts probing many distinct ports, with the distinct port count
    pub scan_suspects: Vec<(String, usize)>,

    /// Allowed connections to risky service ports
    pub risky_ports: Vec<(u16, usize)>,
}

impl SuspicionReport {
    pub fn is_clean(&self) -> bool {
        self.bt_count == 0 && self.scan_suspects.is_empty() && self.risky_ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_frequency_table_orders_by_count() {
        let table = FrequencyTable::from_counts(
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 3),
                ("c".to_string(), 1),
                ("d".to_string(), 2),
            ],
            10,
        );
        let values: Vec<_> = table.iter().map(|(v, _)| v).collect();
        assert_eq!(values, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_frequency_table_truncates() {
        let counts = (0..15).map(|i| (format!("v{}", i), 1)).collect();
        let table = FrequencyTable::from_counts(counts, TOP_N);
        assert_eq!(table.len(), 10);
        assert_eq!(table.entries()[0].0, "v0");
        assert_eq!(table.entries()[9].0, "v9");
    }

    #[test]
    fn test_action_classify() {
        let mut fields = FieldSet::new();
        assert_eq!(Action::classify(&fields), Action::Other);

        fields.insert(ACTION, "Allow");
        assert_eq!(Action::classify(&fields), Action::Allow);

        fields.insert(ACTION, "DENY_in");
        assert_eq!(Action::classify(&fields), Action::Deny);
    }

    #[test]
    fn test_field_set_set_removes_on_none() {
        let mut fields = FieldSet::new();
        fields.insert(SRC_IP, "10.0.0.1");
        fields.set(SRC_IP, None);
        assert_eq!(fields.src_ip(), None);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2024-05-01T10:00:00Z").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01 10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_relative_age() {
        let now = Local::now();
        let ts = (now - Duration::minutes(5)).to_rfc3339();
        assert_eq!(relative_age(&ts, now), "5m ago");

        let ts = (now - Duration::days(3)).to_rfc3339();
        assert_eq!(relative_age(&ts, now), "3d ago");

        let future = (now + Duration::hours(1)).to_rfc3339();
        assert_eq!(relative_age(&future, now), "0s ago");

        assert_eq!(relative_age("garbage", now), "garbage");
    }
}
