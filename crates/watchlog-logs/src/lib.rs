//! Log processing for watchlog
//!
//! This crate provides tail reading of per-host monthly firewall logs, field
//! extraction, the filter language, and summaries over filtered lines.

pub mod detect;
mod error;
mod fields;
mod hostmap;
mod query;
mod source;
mod summary;

pub use error::{LogError, QueryError};
pub use fields::FieldExtractor;
pub use hostmap::{HostMap, parse_host_map};
pub use query::{Query, QueryTerm, compile_pattern};
pub use source::{
    DEFAULT_BLOCK_SIZE, GZ_LOG_FILE_NAME, LOG_FILE_NAME, LogSource, tail_file,
    tail_file_with_block_size, tail_reader,
};
pub use summary::{Tally, summarize};

// Re-export types used in our public API
pub use watchlog_types::{Action, FieldSet, FrequencyTable, Summary, SuspicionReport};
