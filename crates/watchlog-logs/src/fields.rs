use regex::Regex;
use std::sync::LazyLock;

use watchlog_types::{ACTION, DPORT, DST_IP, FieldSet, IP, SPORT, SRC_IP, TS};

/// `key=value` token; the value runs to the next whitespace
static KV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w+)=(\S+)").unwrap());

/// Vendor spellings for each canonical field, in priority order
const ALIASES: &[(&str, &[&str])] = &[
    (SRC_IP, &["src", "src_ip", "saddr"]),
    (DST_IP, &["dst", "dst_ip", "daddr"]),
    (DPORT, &["dport", "dst_port", "dpt"]),
    (SPORT, &["sport", "src_port", "spt"]),
    (ACTION, &["action", "msg", "log"]),
];

/// Extracts normalized fields from firewall log lines
pub struct FieldExtractor;

impl FieldExtractor {
    /// Parse a log line into its fields.
    ///
    /// Every `key=value` token is kept (a repeated key keeps its last value),
    /// then the canonical fields are filled from the first alias present.
    /// Never fails; a line without tokens gives an empty set.
    pub fn extract(line: &str) -> FieldSet {
        let mut fields = FieldSet::new();
        for caps in KV.captures_iter(line) {
            fields.insert(&caps[1], &caps[2]);
        }

        for (canonical, aliases) in ALIASES {
            let value = Self::first_of(&fields, aliases);
            fields.set(canonical, value);
        }

        let ip = fields.src_ip().map(str::to_string);
        fields.set(IP, ip);

        let ts = Self::timestamp(&fields);
        fields.set(TS, ts);

        fields
    }

    fn first_of(fields: &FieldSet, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|k| fields.get(k))
            .map(str::to_string)
    }

    /// `ts` as given, else `date` and `time` joined by a space
    fn timestamp(fields: &FieldSet) -> Option<String> {
        if let Some(ts) = fields.ts() {
            return Some(ts.to_string());
        }
        match (fields.get("date"), fields.get("time")) {
            (Some(date), Some(time)) => Some(format!("{} {}", date, time)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_canonical_fields() {
        let line = "Allow 1-Trusted 0-External tcp src=192.168.1.23 dst=8.8.8.8 \
                    sport=51000 dport=443 action=Allow";
        let fields = FieldExtractor::extract(line);
        assert_eq!(fields.src_ip(), Some("192.168.1.23"));
        assert_eq!(fields.ip(), Some("192.168.1.23"));
        assert_eq!(fields.dst_ip(), Some("8.8.8.8"));
        assert_eq!(fields.sport(), Some("51000"));
        assert_eq!(fields.dport(), Some("443"));
        assert_eq!(fields.action(), Some("Allow"));
        assert_eq!(fields.ts(), None);
    }

    #[test]
    fn test_alias_precedence() {
        let fields = FieldExtractor::extract("saddr=2.2.2.2 src=1.1.1.1");
        assert_eq!(fields.src_ip(), Some("1.1.1.1"));

        let fields = FieldExtractor::extract("dpt=22 dst_port=8080");
        assert_eq!(fields.dport(), Some("8080"));

        let fields = FieldExtractor::extract("log=blocked msg=Deny");
        assert_eq!(fields.action(), Some("Deny"));
    }

    #[test]
    fn test_vendor_spellings() {
        let fields = FieldExtractor::extract("saddr=10.0.0.5 daddr=1.2.3.4 spt=1234 dpt=53");
        assert_eq!(fields.src_ip(), Some("10.0.0.5"));
        assert_eq!(fields.dst_ip(), Some("1.2.3.4"));
        assert_eq!(fields.sport(), Some("1234"));
        assert_eq!(fields.dport(), Some("53"));
        // Raw keys stay visible
        assert_eq!(fields.get("saddr"), Some("10.0.0.5"));
    }

    #[test]
    fn test_duplicate_key_last_wins() {
        let fields = FieldExtractor::extract("dport=80 dport=443");
        assert_eq!(fields.dport(), Some("443"));
    }

    #[test]
    fn test_timestamp_from_date_and_time() {
        let fields = FieldExtractor::extract("date=2024-05-01 time=10:00:00 src=1.1.1.1");
        assert_eq!(fields.ts(), Some("2024-05-01 10:00:00"));
        assert!(fields.timestamp().is_some());

        let fields = FieldExtractor::extract("ts=2024-05-01T10:00:00Z date=2024-01-01 time=00:00:00");
        assert_eq!(fields.ts(), Some("2024-05-01T10:00:00Z"));

        let fields = FieldExtractor::extract("date=2024-05-01");
        assert_eq!(fields.ts(), None);
    }

    #[test]
    fn test_extract_is_total() {
        for line in ["", "   ", "no tokens here", "=", "==", "a=", "=b", "\u{fffd}\u{fffd}=x"] {
            let fields = FieldExtractor::extract(line);
            assert_eq!(fields.src_ip(), None, "{:?}", line);
            assert_eq!(fields.action(), None, "{:?}", line);
            assert_eq!(fields.ts(), None, "{:?}", line);
        }
    }

    #[test]
    fn test_value_keeps_inner_equals() {
        let fields = FieldExtractor::extract("url=http://x/?a=b src=1.1.1.1");
        assert_eq!(fields.get("url"), Some("http://x/?a=b"));
        assert_eq!(fields.src_ip(), Some("1.1.1.1"));
    }
}
