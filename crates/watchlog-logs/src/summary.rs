use ipnet::Ipv4Net;
use regex::Regex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use watchlog_types::{FrequencyTable, Summary, TOP_N};

/// Source address following `src=`, `src_ip=` or `saddr=`
static SRC_IP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:src(?:_ip)?=|saddr=)(\d+\.\d+\.\d+\.\d+)").unwrap());

/// Destination port following `dport=`, `dst_port=` or `dpt=`
static DPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:d(?:st_)?port=|dpt=)(\d{1,5})").unwrap());

/// Only internal sources are ranked
static INTERNAL: LazyLock<Ipv4Net> =
    LazyLock::new(|| Ipv4Net::new(Ipv4Addr::new(192, 168, 0, 0), 16).unwrap());

/// Occurrence counter that remembers first-seen order
#[derive(Debug, Default)]
pub struct Tally {
    counts: Vec<(String, usize)>,
    index: HashMap<String, usize>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: &str) {
        match self.index.get(value) {
            Some(&i) => self.counts[i].1 += 1,
            None => {
                self.index.insert(value.to_string(), self.counts.len());
                self.counts.push((value.to_string(), 1));
            }
        }
    }

    /// Highest counts first, ties in first-seen order
    pub fn top(self, limit: usize) -> FrequencyTable {
        FrequencyTable::from_counts(self.counts, limit)
    }
}

/// Top internal source addresses and destination ports.
///
/// Each line is scanned with two inline patterns rather than the full field
/// extractor; only the first match of each pattern on a line counts.
pub fn summarize<S: AsRef<str>>(lines: &[S]) -> Summary {
    let mut ips = Tally::new();
    let mut ports = Tally::new();

    for line in lines {
        let line = line.as_ref();
        if let Some(ip) = SRC_IP.captures(line).and_then(|c| c.get(1)) {
            if is_internal(ip.as_str()) {
                ips.add(ip.as_str());
            }
        }
        if let Some(port) = DPORT.captures(line).and_then(|c| c.get(1)) {
            ports.add(port.as_str());
        }
    }

    Summary {
        top_ips: ips.top(TOP_N),
        top_ports: ports.top(TOP_N),
    }
}

/// Inside 192.168.0.0/16. Text that does not parse as an address is skipped.
fn is_internal(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>()
        .is_ok_and(|addr| INTERNAL.contains(&addr))
}
