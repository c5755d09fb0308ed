//! One retrieval: tail a month's log, filter it and summarize the result

use serde::Serialize;
use std::path::PathBuf;

use watchlog_logs::{LogError, LogSource, Query, Summary, compile_pattern, summarize};

/// What to fetch and how to filter it
#[derive(Clone, Debug)]
pub struct Request {
    pub host: String,
    pub month: String,
    /// Already clamped by the caller
    pub lines: usize,
    /// Filter expression
    pub query: String,
    /// Extra regex that ORs with the filter's own positive terms
    pub regex: Option<String>,
}

/// Filtered lines plus their summary
#[derive(Clone, Debug, Serialize)]
pub struct Outcome {
    pub host: String,
    pub month: String,
    pub path: PathBuf,
    pub fetched: usize,
    pub lines: Vec<String>,
    pub summary: Summary,
    /// Parts of the filter that were ignored
    pub warnings: Vec<String>,
}

impl Request {
    /// Run the request against a log source.
    ///
    /// Only a missing or unreadable log is an error; bad filter input is
    /// reported through [`Outcome::warnings`].
    pub fn run(&self, source: &LogSource) -> Result<Outcome, LogError> {
        let path = source.resolve(&self.host, &self.month)?;
        let raw = watchlog_logs::tail_file(&path, self.lines)?;
        let fetched = raw.len();

        let query = Query::parse(&self.query);
        let mut warnings: Vec<String> = query.warnings().iter().map(|w| w.to_string()).collect();

        let base = match self.regex.as_deref().filter(|r| !r.is_empty()) {
            Some(pattern) => match compile_pattern(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warnings.push(e.to_string());
                    None
                }
            },
            None => None,
        };

        let lines = query.apply(raw, base.as_ref());
        let summary = summarize(&lines);
        tracing::debug!(
            host = %self.host,
            month = %self.month,
            fetched,
            kept = lines.len(),
            "request complete"
        );

        Ok(Outcome {
            host: self.host.clone(),
            month: self.month.clone(),
            path,
            fetched,
            lines,
            summary,
            warnings,
        })
    }
}
