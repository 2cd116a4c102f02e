//! Ingestion parsers producing tuples for the Store API.

pub mod json;
pub mod line_protocol;

#[cfg(test)]
mod tests;

pub use json::JsonParser;
pub use line_protocol::LineProtocolParser;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed line: {0}")]
    MalformedLine(String),
    #[error("line has no item tag: {0}")]
    MissingItem(String),
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("entry has no time: {0}")]
    MissingTime(String),
    #[error("unsupported value: {0}")]
    InvalidValue(String),
}
