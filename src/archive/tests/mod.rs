pub mod basic;

use super::*;
use crate::model::{Tuple, Uri, Value};
use tempfile::tempdir;

pub const BASE_TIME: i64 = 1_600_000_000;

pub fn uri(s: &str) -> Uri {
    Uri::new(s)
}

pub fn tuple(item: &str, property: &str, time: i64, value: Value) -> Tuple {
    Tuple::new(
        uri(item),
        uri(property),
        Uri::default_context(),
        time,
        0,
        value,
    )
}

pub fn collect(iter: impl Iterator<Item = Result<Tuple, Error>>) -> Vec<Tuple> {
    iter.map(|t| t.unwrap()).collect()
}
