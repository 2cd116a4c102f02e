use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("value encoding error: {0}")]
    ValueEncoding(String),
    #[error("value decoding error: {0}")]
    ValueDecoding(String),
    #[error("unsupported aggregation: {0}")]
    UnsupportedAggregation(String),
    #[error("invalid aggregation request: {0}")]
    InvalidAggregation(String),
}
