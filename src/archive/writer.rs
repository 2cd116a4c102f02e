//! Single-stream columnar writer.
//!
//! One `put` call owns a `PutSession`: the current data file, the pending
//! week and year partition keys, the next week boundary and the previous
//! tuple's calendar year. Week and year rolls close the active file and
//! rename the enclosing `temp` directory to its final partition-keyed
//! name; the final rename happens again at end of stream.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    BinaryBuilder, FixedSizeBinaryBuilder, Float32Builder, Float64Builder, Int32Builder,
    Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::Datelike;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use super::codec;
use super::errors::Error;
use super::mapping::WriteMappings;
use super::partition::{
    find_year_dir, week_dir_name, year_dir_name, PartitionKey, DATA_FILE, TEMP_DIR,
};
use super::ArchiveConfig;
use crate::model::{Tuple, Value};

/// One week, in the seconds resolution of tuple time.
pub(crate) const WEEK_SECONDS: i64 = 604_800;

const PAGE_SIZE: usize = 8 * 1024;
const DICT_PAGE_SIZE: usize = 1024 * 1024;

pub(crate) const COL_ID: usize = 0;
pub(crate) const COL_TIME: usize = 1;
pub(crate) const COL_SEQ_NR: usize = 2;
pub(crate) const COL_VALUE_INT: usize = 3;
pub(crate) const COL_VALUE_LONG: usize = 4;
pub(crate) const COL_VALUE_FLOAT: usize = 5;
pub(crate) const COL_VALUE_DOUBLE: usize = 6;
pub(crate) const COL_VALUE_STRING: usize = 7;
pub(crate) const COL_VALUE_BOOL: usize = 8;
pub(crate) const COL_VALUE_OBJECT: usize = 9;

pub(crate) fn data_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::FixedSizeBinary(24), false),
        Field::new("time", DataType::Int64, false),
        Field::new("seqNr", DataType::Int32, false),
        Field::new("valueInt", DataType::Int32, true),
        Field::new("valueLong", DataType::Int64, true),
        Field::new("valueFloat", DataType::Float32, true),
        Field::new("valueDouble", DataType::Float64, true),
        Field::new("valueString", DataType::Utf8, true),
        Field::new("valueBool", DataType::Int32, true),
        Field::new("valueObject", DataType::Binary, true),
    ]))
}

pub(crate) fn writer_properties(config: &ArchiveConfig) -> Result<WriterProperties, Error> {
    Ok(WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::try_new(config.zstd_level)?))
        .set_dictionary_enabled(true)
        .set_data_page_size_limit(PAGE_SIZE)
        .set_dictionary_page_size_limit(DICT_PAGE_SIZE)
        .build())
}

pub(crate) fn year_of(time: i64) -> Result<i32, Error> {
    chrono::DateTime::from_timestamp(time, 0)
        .map(|date| date.year())
        .ok_or(Error::InvalidTimestamp(time))
}

/// Persists a finite stream of tuples, rolling partitions on week and
/// year boundaries. Mapping rows for newly seen URIs are collected in
/// `mappings`; the caller persists them once the stream has been written.
pub(crate) fn put_tuples<I>(
    root: &Path,
    config: &ArchiveConfig,
    mappings: &mut WriteMappings,
    tuples: I,
) -> Result<(), Error>
where
    I: IntoIterator<Item = Tuple>,
{
    let mut iter = tuples.into_iter();
    let Some(first) = iter.next() else {
        return Ok(());
    };
    if first.time < 0 {
        return Err(Error::InvalidTimestamp(first.time));
    }
    let mut session = PutSession::start(root, config, &first)?;
    session.write_row(mappings, &first)?;
    for tuple in iter {
        if tuple.time >= session.next_chunk_timestamp {
            session.roll_week(mappings, &tuple)?;
        }
        session.write_row(mappings, &tuple)?;
    }
    session.finish(mappings)
}

struct PutSession<'a> {
    root: &'a Path,
    config: &'a ArchiveConfig,
    batch: RowBatchBuilder,
    writer: Option<ArrowWriter<File>>,
    week_dir: PathBuf,
    year_dir: PathBuf,
    existing_year: bool,
    next_chunk_timestamp: i64,
    week_key: PartitionKey,
    year_key: PartitionKey,
    prev_year: i32,
}

impl<'a> PutSession<'a> {
    fn start(root: &'a Path, config: &'a ArchiveConfig, first: &Tuple) -> Result<Self, Error> {
        let year = year_of(first.time)?;
        let (year_dir, year_key, existing_year) = match find_year_dir(root, year)? {
            Some((path, min)) => (path, min, true),
            None => (root.join(year.to_string()), PartitionKey::INITIAL, false),
        };
        let week_dir = year_dir.join(TEMP_DIR);
        std::fs::create_dir_all(&week_dir)?;
        let writer = open_data_writer(&week_dir.join(DATA_FILE), config)?;
        Ok(PutSession {
            root,
            config,
            batch: RowBatchBuilder::new(),
            writer: Some(writer),
            week_dir,
            year_dir,
            existing_year,
            next_chunk_timestamp: first.time + WEEK_SECONDS,
            week_key: PartitionKey::INITIAL,
            year_key,
            prev_year: year,
        })
    }

    fn write_row(&mut self, mappings: &mut WriteMappings, tuple: &Tuple) -> Result<(), Error> {
        if tuple.time < 0 {
            return Err(Error::InvalidTimestamp(tuple.time));
        }
        let id = mappings.assign_id(tuple);
        self.batch.push(&id, tuple)?;
        if self.batch.rows >= self.config.write_batch_rows {
            self.flush()?;
        }
        self.prev_year = year_of(tuple.time)?;
        Ok(())
    }

    /// Finalizes the current week directory and opens a fresh `temp` one,
    /// handling a simultaneous year change.
    fn roll_week(&mut self, mappings: &mut WriteMappings, next: &Tuple) -> Result<(), Error> {
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        let max_key = mappings.current_key();
        log::debug!(
            "rolling week partition {:?} at {}",
            self.week_dir,
            next.time
        );
        finalize_week_dir(&self.week_dir, &self.year_dir, self.week_key, max_key)?;
        if self.existing_year {
            let renamed = self
                .root
                .join(year_dir_name(self.year_key, max_key, self.prev_year));
            rename_dir(&self.year_dir, &renamed)?;
            self.year_dir = renamed;
        }

        self.week_key = mappings.next_week_key(next);
        self.next_chunk_timestamp = next.time + WEEK_SECONDS;

        let year = year_of(next.time)?;
        if year != self.prev_year {
            if !self.existing_year {
                let renamed = self
                    .root
                    .join(year_dir_name(self.year_key, max_key, self.prev_year));
                rename_dir(&self.year_dir, &renamed)?;
            }
            match find_year_dir(self.root, year)? {
                Some((path, min)) => {
                    self.year_dir = path;
                    self.year_key = min;
                    self.existing_year = true;
                }
                None => {
                    self.year_dir = self.root.join(year.to_string());
                    self.year_key = max_key;
                    self.existing_year = false;
                }
            }
        }

        self.week_dir = self.year_dir.join(TEMP_DIR);
        std::fs::create_dir_all(&self.week_dir)?;
        self.writer = Some(open_data_writer(&self.week_dir.join(DATA_FILE), self.config)?);
        Ok(())
    }

    fn finish(mut self, mappings: &mut WriteMappings) -> Result<(), Error> {
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        let max_key = mappings.current_key();
        finalize_week_dir(&self.week_dir, &self.year_dir, self.week_key, max_key)?;
        rename_dir(
            &self.year_dir,
            &self
                .root
                .join(year_dir_name(self.year_key, max_key, self.prev_year)),
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.batch.rows == 0 {
            return Ok(());
        }
        let batch = self.batch.finish()?;
        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }
        Ok(())
    }
}

fn open_data_writer(path: &Path, config: &ArchiveConfig) -> Result<ArrowWriter<File>, Error> {
    let file = File::create(path)?;
    Ok(ArrowWriter::try_new(
        file,
        data_schema(),
        Some(writer_properties(config)?),
    )?)
}

fn rename_dir(from: &Path, to: &Path) -> Result<(), Error> {
    if from == to {
        return Ok(());
    }
    std::fs::rename(from, to)?;
    Ok(())
}

/// Renames a finished `temp` week directory to its key-range name. A
/// repeat of the same key range within one year gets a numeric suffix so
/// the earlier partition is never clobbered.
fn finalize_week_dir(
    temp: &Path,
    year_dir: &Path,
    min: PartitionKey,
    max: PartitionKey,
) -> Result<(), Error> {
    let base = week_dir_name(min, max);
    let mut target = year_dir.join(&base);
    let mut suffix = 1u32;
    while target.exists() {
        target = year_dir.join(format!("{}_{}", base, suffix));
        suffix += 1;
    }
    std::fs::rename(temp, &target)?;
    Ok(())
}

/// Accumulates rows for the typed-column format. Exactly one value slot
/// is populated per row.
struct RowBatchBuilder {
    rows: usize,
    id: FixedSizeBinaryBuilder,
    time: Int64Builder,
    seq_nr: Int32Builder,
    value_int: Int32Builder,
    value_long: Int64Builder,
    value_float: Float32Builder,
    value_double: Float64Builder,
    value_string: StringBuilder,
    value_bool: Int32Builder,
    value_object: BinaryBuilder,
}

impl RowBatchBuilder {
    fn new() -> Self {
        RowBatchBuilder {
            rows: 0,
            id: FixedSizeBinaryBuilder::new(24),
            time: Int64Builder::new(),
            seq_nr: Int32Builder::new(),
            value_int: Int32Builder::new(),
            value_long: Int64Builder::new(),
            value_float: Float32Builder::new(),
            value_double: Float64Builder::new(),
            value_string: StringBuilder::new(),
            value_bool: Int32Builder::new(),
            value_object: BinaryBuilder::new(),
        }
    }

    fn push(&mut self, id: &[u8; 24], tuple: &Tuple) -> Result<(), Error> {
        let mut v_int = None;
        let mut v_long = None;
        let mut v_float = None;
        let mut v_double = None;
        let mut v_string = None;
        let mut v_bool = None;
        let mut v_object = None;
        match &tuple.value {
            Value::Int(v) => v_int = Some(*v),
            Value::Long(v) => v_long = Some(*v),
            Value::Float(v) => v_float = Some(*v),
            Value::Double(v) => v_double = Some(*v),
            Value::String(v) => v_string = Some(v.clone()),
            Value::Bool(v) => v_bool = Some(i32::from(*v)),
            value => v_object = Some(codec::encode_value(value)?),
        }

        self.id.append_value(id)?;
        self.time.append_value(tuple.time);
        self.seq_nr.append_value(tuple.seq_nr);
        self.value_int.append_option(v_int);
        self.value_long.append_option(v_long);
        self.value_float.append_option(v_float);
        self.value_double.append_option(v_double);
        self.value_string.append_option(v_string);
        self.value_bool.append_option(v_bool);
        self.value_object.append_option(v_object);
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<RecordBatch, Error> {
        let batch = RecordBatch::try_new(
            data_schema(),
            vec![
                Arc::new(self.id.finish()),
                Arc::new(self.time.finish()),
                Arc::new(self.seq_nr.finish()),
                Arc::new(self.value_int.finish()),
                Arc::new(self.value_long.finish()),
                Arc::new(self.value_float.finish()),
                Arc::new(self.value_double.finish()),
                Arc::new(self.value_string.finish()),
                Arc::new(self.value_bool.finish()),
                Arc::new(self.value_object.finish()),
            ],
        )?;
        self.rows = 0;
        Ok(batch)
    }
}
