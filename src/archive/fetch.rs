//! Fetch planning and the merging partition iterator.
//!
//! A fetch resolves its URI triple to ids, prunes the partition tree by
//! item-id range and walks the surviving data files in partition order,
//! pushing the row predicate into each parquet reader. The iterator
//! enforces the per-property result limit and tracks property boundaries
//! through the reverse id lookup.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, BinaryArray, FixedSizeBinaryArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::error::ArrowError;
use arrow_array::BooleanArray;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{
    ArrowPredicateFn, ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder, RowFilter,
};
use parquet::arrow::ProjectionMask;

use super::codec;
use super::errors::Error;
use super::mapping::{MappingCache, Role};
use super::partition::{matching_week_files, matching_year_dirs};
use super::writer::{
    COL_ID, COL_SEQ_NR, COL_TIME, COL_VALUE_BOOL, COL_VALUE_DOUBLE, COL_VALUE_FLOAT,
    COL_VALUE_INT, COL_VALUE_LONG, COL_VALUE_OBJECT, COL_VALUE_STRING,
};
use crate::model::{Tuple, Uri, Value};

/// Row predicate pushed into every partition reader. The id segments are
/// compared as big-endian prefixes; the window is inclusive on both ends.
#[derive(Debug, Clone)]
pub(crate) struct RowPredicate {
    item_id: u64,
    property_id: Option<u64>,
    context_id: Option<u64>,
    window: Option<(i64, i64)>,
}

impl RowPredicate {
    fn matches(&self, id: &[u8], time: i64) -> bool {
        if id.len() != 24 {
            return false;
        }
        if id_segment(id, 0) != self.item_id {
            return false;
        }
        if let Some(property_id) = self.property_id {
            if id_segment(id, 8) != property_id {
                return false;
            }
        }
        if let Some(context_id) = self.context_id {
            if id_segment(id, 16) != context_id {
                return false;
            }
        }
        if let Some((begin, end)) = self.window {
            if time < begin || time > end {
                return false;
            }
        }
        true
    }
}

fn id_segment(id: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&id[offset..offset + 8]);
    u64::from_be_bytes(buf)
}

pub(crate) struct FetchPlan {
    files: Vec<PathBuf>,
    predicate: RowPredicate,
    item_uri: String,
    context_uri: Option<String>,
}

impl FetchPlan {
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Resolves the triple and prunes the partition tree. `None` means some
/// requested URI has no mapping and the result is empty.
pub(crate) fn plan(
    root: &Path,
    cache: &MappingCache,
    item: &Uri,
    property: Option<&Uri>,
    context: Option<&Uri>,
    window: Option<(i64, i64)>,
) -> Result<Option<FetchPlan>, Error> {
    let resolved = cache.resolve(
        Some(item.as_str()),
        property.map(Uri::as_str),
        context.map(Uri::as_str),
    )?;
    let Some(item_mapping) = resolved.item else {
        return Ok(None);
    };
    let property_id = match (property, &resolved.property) {
        (Some(_), Some(mapping)) => Some(mapping.id),
        (Some(_), None) => return Ok(None),
        (None, _) => None,
    };
    let context_id = match (context, &resolved.context) {
        (Some(_), Some(mapping)) => Some(mapping.id),
        (Some(_), None) => return Ok(None),
        (None, _) => None,
    };

    let mut files = Vec::new();
    for year_dir in matching_year_dirs(root, item_mapping.id)? {
        files.extend(matching_week_files(&year_dir, item_mapping.id)?);
    }
    Ok(Some(FetchPlan {
        files,
        predicate: RowPredicate {
            item_id: item_mapping.id,
            property_id,
            context_id,
            window,
        },
        item_uri: item_mapping.value,
        context_uri: resolved.context.map(|mapping| mapping.value),
    }))
}

fn open_reader(path: &Path, predicate: &RowPredicate) -> Result<ParquetRecordBatchReader, Error> {
    let file = std::fs::File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let mask = ProjectionMask::leaves(builder.parquet_schema(), [COL_ID, COL_TIME]);
    let pred = predicate.clone();
    let filter = RowFilter::new(vec![Box::new(ArrowPredicateFn::new(
        mask,
        move |batch: RecordBatch| {
            let ids = batch
                .column(0)
                .as_any()
                .downcast_ref::<FixedSizeBinaryArray>()
                .ok_or_else(|| ArrowError::SchemaError("id column".to_string()))?;
            let times = batch
                .column(1)
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| ArrowError::SchemaError("time column".to_string()))?;
            Ok(BooleanArray::from_iter(
                (0..batch.num_rows()).map(|row| Some(pred.matches(ids.value(row), times.value(row)))),
            ))
        },
    ))]);
    Ok(builder.with_row_filter(filter).build()?)
}

/// Lazy stream of tuples merged from the pruned partition readers, in
/// partition order. Readers open one at a time and close on drop.
pub struct FetchIter {
    files: std::vec::IntoIter<PathBuf>,
    predicate: RowPredicate,
    reader: Option<ParquetRecordBatchReader>,
    batch: Option<RecordBatch>,
    row: usize,
    limit: u64,
    counts: HashMap<u64, u64>,
    last_property: Option<(u64, String)>,
    last_context: Option<(u64, String)>,
    item_uri: String,
    context_uri: Option<String>,
    mappings: Arc<MappingCache>,
    done: bool,
}

impl std::fmt::Debug for FetchIter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchIter")
            .field("predicate", &self.predicate)
            .field("row", &self.row)
            .field("limit", &self.limit)
            .field("item_uri", &self.item_uri)
            .field("context_uri", &self.context_uri)
            .field("done", &self.done)
            .finish()
    }
}

impl FetchIter {
    pub(crate) fn new(plan: FetchPlan, limit: u64, mappings: Arc<MappingCache>) -> Self {
        FetchIter {
            files: plan.files.into_iter(),
            predicate: plan.predicate,
            reader: None,
            batch: None,
            row: 0,
            limit,
            counts: HashMap::new(),
            last_property: None,
            last_context: None,
            item_uri: plan.item_uri,
            context_uri: plan.context_uri,
            mappings,
            done: false,
        }
    }

    fn fail(&mut self, error: Error) -> Option<Result<Tuple, Error>> {
        self.done = true;
        self.reader = None;
        self.batch = None;
        Some(Err(error))
    }

    /// Property URI for the given id, memoized for runs of equal ids.
    fn property_uri(&mut self, property_id: u64) -> Result<Option<String>, Error> {
        if let Some((id, uri)) = &self.last_property {
            if *id == property_id {
                return Ok(Some(uri.clone()));
            }
        }
        let Some(uri) = self.mappings.reverse_lookup(Role::Property, property_id)? else {
            return Ok(None);
        };
        self.last_property = Some((property_id, uri.clone()));
        Ok(Some(uri))
    }

    fn context_uri(&mut self, context_id: u64) -> Result<Option<String>, Error> {
        if let Some(fixed) = &self.context_uri {
            return Ok(Some(fixed.clone()));
        }
        if let Some((id, uri)) = &self.last_context {
            if *id == context_id {
                return Ok(Some(uri.clone()));
            }
        }
        let Some(uri) = self.mappings.reverse_lookup(Role::Context, context_id)? else {
            return Ok(None);
        };
        self.last_context = Some((context_id, uri.clone()));
        Ok(Some(uri))
    }
}

impl Iterator for FetchIter {
    type Item = Result<Tuple, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let has_row = self
                .batch
                .as_ref()
                .map(|batch| self.row < batch.num_rows())
                .unwrap_or(false);
            if !has_row {
                if let Some(reader) = self.reader.as_mut() {
                    match reader.next() {
                        Some(Ok(batch)) => {
                            self.batch = Some(batch);
                            self.row = 0;
                        }
                        Some(Err(e)) => return self.fail(e.into()),
                        None => {
                            self.reader = None;
                            self.batch = None;
                        }
                    }
                    continue;
                }
                let Some(path) = self.files.next() else {
                    self.done = true;
                    return None;
                };
                match open_reader(&path, &self.predicate) {
                    Ok(reader) => self.reader = Some(reader),
                    Err(e) => return self.fail(e),
                }
                continue;
            }

            let row = self.row;
            self.row += 1;
            let (id, time, seq_nr, value) = {
                let Some(batch) = self.batch.as_ref() else {
                    continue;
                };
                match read_row(batch, row) {
                    Ok(parts) => parts,
                    Err(e) => return self.fail(e),
                }
            };

            let property_id = id_segment(&id, 8);
            if self.limit > 0 {
                if self.counts.get(&property_id).copied().unwrap_or(0) >= self.limit {
                    continue;
                }
            }

            let value = match value {
                Ok(value) => value,
                Err(Error::ValueDecoding(message)) => {
                    log::warn!("skipping row with undecodable value: {}", message);
                    continue;
                }
                Err(e) => return self.fail(e),
            };

            let property = match self.property_uri(property_id) {
                Ok(Some(uri)) => uri,
                Ok(None) => {
                    log::warn!("skipping row with unmapped property id {}", property_id);
                    continue;
                }
                Err(e) => return self.fail(e),
            };
            let context_id = id_segment(&id, 16);
            let context = match self.context_uri(context_id) {
                Ok(Some(uri)) => uri,
                Ok(None) => {
                    log::warn!("skipping row with unmapped context id {}", context_id);
                    continue;
                }
                Err(e) => return self.fail(e),
            };

            *self.counts.entry(property_id).or_insert(0) += 1;
            return Some(Ok(Tuple {
                item: Uri::new(self.item_uri.clone()),
                property: Uri::new(property),
                context: Uri::new(context),
                time,
                seq_nr,
                value,
            }));
        }
    }
}

type RowParts = (Vec<u8>, i64, i32, Result<Value, Error>);

fn read_row(batch: &RecordBatch, row: usize) -> Result<RowParts, Error> {
    let ids = column::<FixedSizeBinaryArray>(batch, COL_ID, "id")?;
    let times = column::<Int64Array>(batch, COL_TIME, "time")?;
    let seq_nrs = column::<Int32Array>(batch, COL_SEQ_NR, "seqNr")?;
    Ok((
        ids.value(row).to_vec(),
        times.value(row),
        seq_nrs.value(row),
        row_value(batch, row),
    ))
}

/// Extracts the single populated value slot of a row.
fn row_value(batch: &RecordBatch, row: usize) -> Result<Value, Error> {
    let ints = column::<Int32Array>(batch, COL_VALUE_INT, "valueInt")?;
    if ints.is_valid(row) {
        return Ok(Value::Int(ints.value(row)));
    }
    let longs = column::<Int64Array>(batch, COL_VALUE_LONG, "valueLong")?;
    if longs.is_valid(row) {
        return Ok(Value::Long(longs.value(row)));
    }
    let floats = column::<Float32Array>(batch, COL_VALUE_FLOAT, "valueFloat")?;
    if floats.is_valid(row) {
        return Ok(Value::Float(floats.value(row)));
    }
    let doubles = column::<Float64Array>(batch, COL_VALUE_DOUBLE, "valueDouble")?;
    if doubles.is_valid(row) {
        return Ok(Value::Double(doubles.value(row)));
    }
    let strings = column::<StringArray>(batch, COL_VALUE_STRING, "valueString")?;
    if strings.is_valid(row) {
        return Ok(Value::String(strings.value(row).to_string()));
    }
    let bools = column::<Int32Array>(batch, COL_VALUE_BOOL, "valueBool")?;
    if bools.is_valid(row) {
        return Ok(Value::Bool(bools.value(row) != 0));
    }
    let objects = column::<BinaryArray>(batch, COL_VALUE_OBJECT, "valueObject")?;
    if objects.is_valid(row) {
        return codec::decode_value(objects.value(row));
    }
    Err(Error::ValueDecoding("row has no value slot".to_string()))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a T, Error> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Arrow(ArrowError::SchemaError(format!("unexpected type for {}", name))))
}

/// Distinct property URIs seen for one item, in first-seen order.
pub struct PropertiesIter {
    inner: Option<FetchIter>,
    seen: HashSet<String>,
}

impl PropertiesIter {
    pub(crate) fn new(inner: Option<FetchIter>) -> Self {
        PropertiesIter {
            inner,
            seen: HashSet::new(),
        }
    }
}

impl Iterator for PropertiesIter {
    type Item = Result<Uri, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;
        loop {
            match inner.next() {
                Some(Ok(tuple)) => {
                    if self.seen.insert(tuple.property.as_str().to_string()) {
                        return Some(Ok(tuple.property));
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }
}

/// Child item URIs of one item, resolved from the item mapping.
pub struct DescendantsIter {
    inner: std::vec::IntoIter<Uri>,
}

impl DescendantsIter {
    pub(crate) fn new(uris: Vec<Uri>) -> Self {
        DescendantsIter {
            inner: uris.into_iter(),
        }
    }
}

impl Iterator for DescendantsIter {
    type Item = Uri;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
