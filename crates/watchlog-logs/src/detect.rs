//! Heuristics for unwanted traffic in a filtered set of lines.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use watchlog_types::{FieldSet, FrequencyTable, SuspicionReport, TOP_N};

use crate::fields::FieldExtractor;
use crate::summary::Tally;

/// BitTorrent keywords and well-known client ports
static BITTORRENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(bittorrent|dht|announce|magnet:|d(?:st_)?port=(?:38315|51413|68[8-9]\d|69\d\d))")
        .unwrap()
});

/// Any dotted IPv4 address not embedded in a longer run of digits
static INLINE_IP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:\d{1,3}\.){3}\d{1,3})(?:\D|$)").unwrap());

/// Service ports that should rarely be reachable
pub const RISKY_PORTS: &[u16] = &[21, 23, 25, 445, 1433, 2323, 3306, 3389, 5900, 5901];

/// Distinct destination ports that mark a source as a scanner
const SCAN_THRESHOLD: usize = 10;

/// Whether a line looks like BitTorrent traffic
pub fn is_bittorrent(line: &str, fields: &FieldSet) -> bool {
    if BITTORRENT.is_match(line) {
        return true;
    }
    matches!(fields.dport_number(), Some(6881..=6999 | 38315 | 51413))
}

/// 10/8, 172.16/12, 192.168/16 and loopback
pub fn is_private(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>()
        .is_ok_and(|addr| addr.is_private() || addr.is_loopback())
}

/// Source of a line: the `src_ip` field, else the first address on the line
fn source_of(line: &str, fields: &FieldSet) -> Option<String> {
    if let Some(ip) = fields.src_ip() {
        return Some(ip.to_string());
    }
    INLINE_IP
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Most frequent sources of BitTorrent-signature lines
pub fn bittorrent_sources<S: AsRef<str>>(lines: &[S]) -> FrequencyTable {
    let mut sources = Tally::new();
    for line in lines {
        let line = line.as_ref();
        if !BITTORRENT.is_match(line) {
            continue;
        }
        let fields = FieldExtractor::extract(line);
        if let Some(ip) = source_of(line, &fields) {
            sources.add(&ip);
        }
    }
    sources.top(TOP_N)
}

/// Collect BitTorrent, port-scan and risky-service indicators
pub fn analyze<S: AsRef<str>>(lines: &[S]) -> SuspicionReport {
    let mut report = SuspicionReport::default();

    // Insertion order is kept so ties rank by first appearance
    let mut scan_order: Vec<(String, HashSet<u64>)> = Vec::new();
    let mut scan_index: HashMap<String, usize> = HashMap::new();
    let mut risky: Vec<(u16, usize)> = Vec::new();

    for line in lines {
        let line = line.as_ref();
        let fields = FieldExtractor::extract(line);

        if BITTORRENT.is_match(line) {
            report.bt_count += 1;
            if let Some(ip) = source_of(line, &fields).filter(|ip| is_private(ip)) {
                report.bt_ips.insert(ip);
            }
        }

        let port = fields
            .dport()
            .filter(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|p| p.parse::<u64>().ok());
        let Some(port) = port else {
            continue;
        };

        if let Some(src) = fields.src_ip().filter(|ip| is_private(ip)) {
            let slot = *scan_index.entry(src.to_string()).or_insert_with(|| {
                scan_order.push((src.to_string(), HashSet::new()));
                scan_order.len() - 1
            });
            scan_order[slot].1.insert(port);
        }

        let allowed = fields.action().is_some_and(|a| a.eq_ignore_ascii_case("allow"));
        if let Some(port) = u16::try_from(port).ok().filter(|p| RISKY_PORTS.contains(p)) {
            if allowed {
                match risky.iter_mut().find(|(p, _)| *p == port) {
                    Some((_, count)) => *count += 1,
                    None => risky.push((port, 1)),
                }
            }
        }
    }

    let mut suspects: Vec<(String, usize)> = scan_order
        .into_iter()
        .map(|(ip, ports)| (ip, ports.len()))
        .collect();
    suspects.sort_by(|a, b| b.1.cmp(&a.1));
    suspects.retain(|(_, distinct)| *distinct >= SCAN_THRESHOLD);
    suspects.truncate(TOP_N);
    report.scan_suspects = suspects;

    risky.sort_by(|a, b| b.1.cmp(&a.1));
    risky.truncate(TOP_N);
    report.risky_ports = risky;

    report
}
