//! Filter expressions for firewall log lines.
//!
//! A filter is a list of whitespace- or `|`-separated tokens:
//!
//! | token              | meaning                                  |
//! |--------------------|------------------------------------------|
//! | `deny`             | line matches the regex (case-insensitive)|
//! | `-dns`             | line must not match the regex            |
//! | `action=Deny`      | field equals value                       |
//! | `action!=Allow`    | field must not equal value               |
//! | `dport=6881-6999`  | numeric field within an inclusive range  |
//!
//! Regex tokens of each polarity are OR-joined into one pattern. Equality
//! terms must all hold. A positive regex and the positive structured terms
//! combine with OR, so `bittorrent ip=192.168.1.23` keeps lines that mention
//! bittorrent as well as every line from that host.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use watchlog_types::{DPORT, FieldSet, SPORT};

use crate::error::QueryError;
use crate::fields::FieldExtractor;

/// Fields that accept `low-high` ranges
const RANGE_KEYS: &[&str] = &[DPORT, SPORT];

/// Compiled program size limit for user-supplied patterns
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// Maximum group nesting for user-supplied patterns
const PATTERN_NEST_LIMIT: u32 = 64;

/// A single token of a filter expression
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryTerm {
    PositiveRegex(String),
    NegativeRegex(String),
    KeyEquals { key: String, value: String },
    KeyNotEquals { key: String, value: String },
    KeyRange { key: String, low: i64, high: i64 },
}

impl QueryTerm {
    /// Classify one token.
    ///
    /// Fails only for a range whose bounds do not fit in an `i64`.
    pub fn parse(token: &str) -> Result<Self, QueryError> {
        if !token.contains('=') {
            return Ok(match token.strip_prefix('-') {
                Some(body) => Self::NegativeRegex(body.to_string()),
                None => Self::PositiveRegex(token.to_string()),
            });
        }

        if let Some((key, value)) = token.split_once("!=") {
            return Ok(Self::KeyNotEquals {
                key: key.to_string(),
                value: value.to_string(),
            });
        }

        let (key, value) = token.split_once('=').unwrap_or((token, ""));
        if RANGE_KEYS.contains(&key) {
            if let Some((low, high)) = split_range(value) {
                let (Ok(low), Ok(high)) = (low.parse::<i64>(), high.parse::<i64>()) else {
                    return Err(QueryError::RangeParse {
                        term: token.to_string(),
                    });
                };
                return Ok(Self::KeyRange {
                    key: key.to_string(),
                    low,
                    high,
                });
            }
        }

        Ok(Self::KeyEquals {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Whether this term needs the line's fields
    pub fn is_structured(&self) -> bool {
        !matches!(self, Self::PositiveRegex(_) | Self::NegativeRegex(_))
    }
}

/// `digits-digits`, split at the dash
fn split_range(value: &str) -> Option<(&str, &str)> {
    let (low, high) = value.split_once('-')?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    (all_digits(low) && all_digits(high)).then_some((low, high))
}

/// Compile a user-supplied pattern, case-insensitive and size-bounded
pub fn compile_pattern(pattern: &str) -> Result<Regex, QueryError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(PATTERN_SIZE_LIMIT)
        .nest_limit(PATTERN_NEST_LIMIT)
        .build()
        .map_err(|e| QueryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// A parsed filter expression
#[derive(Clone, Debug, Default)]
pub struct Query {
    terms: Vec<QueryTerm>,

    /// OR of every positive regex token (None if absent or invalid)
    positive: Option<Regex>,

    /// OR of every negative regex token (None if absent or invalid)
    negative: Option<Regex>,

    /// Clauses and terms that were dropped while parsing
    warnings: Vec<QueryError>,
}

impl Query {
    /// Parse a raw filter string. Never fails; problems end up in
    /// [`Query::warnings`].
    pub fn parse(raw: &str) -> Self {
        let mut terms = Vec::new();
        let mut warnings = Vec::new();

        for token in raw
            .trim()
            .split(|c: char| c == ' ' || c == '|')
            .filter(|t| !t.is_empty())
        {
            match QueryTerm::parse(token) {
                Ok(term) => terms.push(term),
                Err(e) => {
                    debug!(error = %e, "dropping query term");
                    warnings.push(e);
                }
            }
        }

        let positive: Vec<&str> = terms
            .iter()
            .filter_map(|t| match t {
                QueryTerm::PositiveRegex(p) => Some(p.as_str()),
                _ => None,
            })
            .collect();
        let negative: Vec<&str> = terms
            .iter()
            .filter_map(|t| match t {
                QueryTerm::NegativeRegex(p) => Some(p.as_str()),
                _ => None,
            })
            .collect();

        let positive = Self::combine(&positive, &mut warnings);
        let negative = Self::combine(&negative, &mut warnings);

        Self {
            terms,
            positive,
            negative,
            warnings,
        }
    }

    /// OR-join pattern bodies into one regex
    fn combine(bodies: &[&str], warnings: &mut Vec<QueryError>) -> Option<Regex> {
        if bodies.is_empty() {
            return None;
        }
        match compile_pattern(&bodies.join("|")) {
            Ok(re) => Some(re),
            Err(e) => {
                debug!(error = %e, "ignoring regex clause");
                warnings.push(e);
                None
            }
        }
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    pub fn warnings(&self) -> &[QueryError] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Check a line using the standard field extractor
    pub fn matches(&self, line: &str, base: Option<&Regex>) -> bool {
        self.matches_with(line, base, FieldExtractor::extract)
    }

    /// Check a line.
    ///
    /// `base` is an extra positive regex supplied by the caller. `extract` is
    /// called at most once, and only when a structured term is present.
    pub fn matches_with<F>(&self, line: &str, base: Option<&Regex>, extract: F) -> bool
    where
        F: FnOnce(&str) -> FieldSet,
    {
        if self.negative.as_ref().is_some_and(|re| re.is_match(line)) {
            return false;
        }

        let fields = self
            .terms
            .iter()
            .any(QueryTerm::is_structured)
            .then(|| extract(line));
        let get = |key: &str| fields.as_ref().and_then(|f| f.get(key));

        let mut has_equals = false;
        let mut equals_ok = true;
        let mut has_ranges = false;

        for term in &self.terms {
            match term {
                QueryTerm::KeyNotEquals { key, value } => {
                    if get(key) == Some(value.as_str()) {
                        return false;
                    }
                }
                // A range is a hard requirement: absent or non-numeric fails
                QueryTerm::KeyRange { key, low, high } => {
                    has_ranges = true;
                    match get(key).and_then(|v| v.parse::<i64>().ok()) {
                        Some(v) if (*low..=*high).contains(&v) => {}
                        _ => return false,
                    }
                }
                QueryTerm::KeyEquals { key, value } => {
                    has_equals = true;
                    equals_ok &= get(key) == Some(value.as_str());
                }
                QueryTerm::PositiveRegex(_) | QueryTerm::NegativeRegex(_) => {}
            }
        }

        // Ranges that got this far all held
        let structured = has_equals || has_ranges;
        let structured_ok = !has_equals || equals_ok;

        if base.is_some() || self.positive.is_some() {
            let rx_ok = base.is_some_and(|re| re.is_match(line))
                || self.positive.as_ref().is_some_and(|re| re.is_match(line));
            return rx_ok || (structured && structured_ok);
        }

        if structured {
            return structured_ok;
        }

        true
    }

    /// Keep the lines that match, in order
    pub fn apply(&self, mut lines: Vec<String>, base: Option<&Regex>) -> Vec<String> {
        lines.retain(|line| self.matches(line, base));
        lines
    }
}
