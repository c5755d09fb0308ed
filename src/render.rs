//! Plain-text output

use chrono::{DateTime, Local};
use std::fmt::Write;

use watchlog_logs::detect::{self, is_private};
use watchlog_logs::{FieldExtractor, HostMap};
use watchlog_types::{Action, FrequencyTable, SuspicionReport, relative_age};

/// One-line description of a log line's flow.
///
/// `[Allow] 192.168.1.2:51000 → 8.8.8.8:53 (5m ago)`, followed by a whois
/// hint for public destinations and a BitTorrent tag when the line looks like
/// one. Lines without flow fields come back unchanged.
pub fn header(line: &str, host_map: Option<&HostMap>, now: DateTime<Local>) -> String {
    let fields = FieldExtractor::extract(line);
    if !fields.has_flow() {
        return line.to_string();
    }

    let mut out = String::new();
    let action = Action::classify(&fields);
    let _ = write!(out, "[{}]", fields.action().unwrap_or(action.as_str()));

    let src = endpoint(fields.src_ip(), fields.sport(), host_map);
    let dst = endpoint(fields.dst_ip(), fields.dport(), host_map);
    if !src.is_empty() || !dst.is_empty() {
        let _ = write!(out, " {} → {}", src, dst);
    }

    if let Some(ts) = fields.ts() {
        let _ = write!(out, " ({})", relative_age(ts, now));
    }

    if let Some(dst_ip) = fields.dst_ip().filter(|ip| !is_private(ip)) {
        let _ = write!(out, " whois: https://rdap.org/ip/{}", dst_ip);
    }

    if detect::is_bittorrent(line, &fields) {
        out.push_str(" [BitTorrent?]");
    }

    out
}

/// `"name (ip)"` when the address is mapped
fn label(ip: &str, host_map: Option<&HostMap>) -> String {
    match host_map {
        Some(map) => map.label(ip),
        None => ip.to_string(),
    }
}

/// `label[:port]`, empty when the address is unknown
fn endpoint(ip: Option<&str>, port: Option<&str>, host_map: Option<&HostMap>) -> String {
    let mut out = ip.map(|ip| label(ip, host_map)).unwrap_or_default();
    if let Some(port) = port {
        out.push(':');
        out.push_str(port);
    }
    out
}

/// Collapse runs of identical consecutive lines into `(line, count)`
pub fn fold_duplicates<S: AsRef<str>>(lines: &[S]) -> Vec<(&str, usize)> {
    let mut out: Vec<(&str, usize)> = Vec::new();
    for line in lines {
        let line = line.as_ref();
        if let Some((last, count)) = out.last_mut() {
            if *last == line {
                *count += 1;
                continue;
            }
        }
        out.push((line, 1));
    }
    out
}

/// Render a line with its ×N suffix when folded
pub fn folded(line: &str, count: usize) -> String {
    if count > 1 {
        format!("{} ×{}", line, count)
    } else {
        line.to_string()
    }
}

/// Two-column table with a title
pub fn table(title: &str, table: &FrequencyTable, host_map: Option<&HostMap>) -> String {
    let mut out = format!("{}\n", title);
    if table.is_empty() {
        out.push_str("  (none)\n");
        return out;
    }
    for (value, count) in table.iter() {
        let _ = writeln!(out, "  {:>7}  {}", count, label(value, host_map));
    }
    out
}

/// Suspicious-activity section of a report
pub fn suspicion(report: &SuspicionReport, host_map: Option<&HostMap>) -> String {
    if report.is_clean() {
        return "No suspicious activity\n".to_string();
    }

    let mut out = String::new();
    if report.bt_count > 0 {
        let _ = writeln!(out, "BitTorrent signatures: {} line(s)", report.bt_count);
        for ip in &report.bt_ips {
            let _ = writeln!(out, "  {}", label(ip, host_map));
        }
    }
    if !report.scan_suspects.is_empty() {
        out.push_str("Possible port scans (distinct ports)\n");
        for (ip, ports) in &report.scan_suspects {
            let _ = writeln!(out, "  {:>7}  {}", ports, label(ip, host_map));
        }
    }
    if !report.risky_ports.is_empty() {
        out.push_str("Allowed risky ports\n");
        for (port, count) in &report.risky_ports {
            let _ = writeln!(out, "  {:>7}  {}", count, port);
        }
    }
    out
}
