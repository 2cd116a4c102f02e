//! Interval-bucketed aggregation over a fetch stream.
//!
//! Tuples are partitioned by (item, property, context) and by
//! `(end - time) / interval`; one tuple is emitted per key and bucket,
//! stamped with the bucket's end timestamp. The wrapper composes over the
//! base iterator and drains it on first use.

use std::collections::{BTreeMap, HashMap};

use super::errors::Error;
use super::fetch::FetchIter;
use crate::model::{Tuple, Uri, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Avg,
    Sum,
    Count,
    First,
    Last,
}

impl AggregateOp {
    /// Parses an operator name, trimmed and case-insensitive.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "min" => Some(AggregateOp::Min),
            "max" => Some(AggregateOp::Max),
            "avg" => Some(AggregateOp::Avg),
            "sum" => Some(AggregateOp::Sum),
            "count" => Some(AggregateOp::Count),
            "first" => Some(AggregateOp::First),
            "last" => Some(AggregateOp::Last),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Avg => "avg",
            AggregateOp::Sum => "sum",
            AggregateOp::Count => "count",
            AggregateOp::First => "first",
            AggregateOp::Last => "last",
        }
    }
}

type GroupKey = (Uri, Uri, Uri);

#[derive(Debug)]
pub struct AggregateIter {
    inner: Option<FetchIter>,
    end: i64,
    interval: i64,
    op: AggregateOp,
    limit: u64,
    ready: Option<std::vec::IntoIter<Result<Tuple, Error>>>,
}

impl AggregateIter {
    pub(crate) fn new(inner: FetchIter, end: i64, interval: i64, op: AggregateOp, limit: u64) -> Self {
        AggregateIter {
            inner: Some(inner),
            end,
            interval,
            op,
            limit,
            ready: None,
        }
    }

    fn drain(&mut self) -> std::vec::IntoIter<Result<Tuple, Error>> {
        let Some(inner) = self.inner.take() else {
            return Vec::new().into_iter();
        };

        let mut order: Vec<GroupKey> = Vec::new();
        let mut groups: HashMap<GroupKey, BTreeMap<i64, Vec<(i64, i32, Value)>>> = HashMap::new();
        for item in inner {
            let tuple = match item {
                Ok(tuple) => tuple,
                Err(e) => return vec![Err(e)].into_iter(),
            };
            let bucket = if self.interval > 0 {
                (self.end - tuple.time) / self.interval
            } else {
                0
            };
            let key = (tuple.item, tuple.property, tuple.context);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups
                .entry(key)
                .or_default()
                .entry(bucket)
                .or_default()
                .push((tuple.time, tuple.seq_nr, tuple.value));
        }

        let mut out = Vec::new();
        let mut emitted_per_property: HashMap<Uri, u64> = HashMap::new();
        for key in order {
            let Some(buckets) = groups.remove(&key) else {
                continue;
            };
            // ascending bucket index, so strictly decreasing bucket time
            for (bucket, entries) in buckets {
                if self.limit > 0 {
                    let count = emitted_per_property.get(&key.1).copied().unwrap_or(0);
                    if count >= self.limit {
                        break;
                    }
                }
                let value = match aggregate(self.op, &entries) {
                    Ok(value) => value,
                    Err(e) => {
                        out.push(Err(e));
                        return out.into_iter();
                    }
                };
                *emitted_per_property.entry(key.1.clone()).or_insert(0) += 1;
                out.push(Ok(Tuple {
                    item: key.0.clone(),
                    property: key.1.clone(),
                    context: key.2.clone(),
                    time: self.end - bucket * self.interval,
                    seq_nr: 0,
                    value,
                }));
            }
        }
        out.into_iter()
    }
}

impl Iterator for AggregateIter {
    type Item = Result<Tuple, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.ready.is_none() {
            let drained = self.drain();
            self.ready = Some(drained);
        }
        self.ready.as_mut()?.next()
    }
}

fn aggregate(op: AggregateOp, entries: &[(i64, i32, Value)]) -> Result<Value, Error> {
    match op {
        AggregateOp::Count => Ok(Value::Long(entries.len() as i64)),
        AggregateOp::First => Ok(entries
            .iter()
            .min_by_key(|(time, seq_nr, _)| (*time, *seq_nr))
            .map(|(_, _, value)| value.clone())
            .unwrap_or(Value::Long(0))),
        AggregateOp::Last => Ok(entries
            .iter()
            .max_by_key(|(time, seq_nr, _)| (*time, *seq_nr))
            .map(|(_, _, value)| value.clone())
            .unwrap_or(Value::Long(0))),
        AggregateOp::Min | AggregateOp::Max | AggregateOp::Sum | AggregateOp::Avg => {
            let mut numbers = Vec::with_capacity(entries.len());
            for (_, _, value) in entries {
                match value.as_f64() {
                    Some(number) => numbers.push(number),
                    None => {
                        return Err(Error::UnsupportedAggregation(format!(
                            "{} over non-numeric value",
                            op.name()
                        )))
                    }
                }
            }
            let result = match op {
                AggregateOp::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                AggregateOp::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AggregateOp::Sum => numbers.iter().sum(),
                AggregateOp::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
                _ => unreachable!(),
            };
            Ok(Value::Double(result))
        }
    }
}
