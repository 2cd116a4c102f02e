//! Bidirectional mapping between URI strings and dense 64-bit ids.
//!
//! Each of the three roles (item, property, context) has its own mapping
//! file under `metadata/`. The write side keeps the full URI-to-id map in
//! memory and continues its counter from the persisted maximum; the read
//! side resolves URIs and ids through bounded LRU caches backed by
//! predicate-filtered reads of the mapping files.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{Array, BooleanArray, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use parquet::arrow::arrow_reader::{ArrowPredicateFn, ParquetRecordBatchReaderBuilder, RowFilter};
use parquet::arrow::{ArrowWriter, ProjectionMask};

use super::errors::Error;
use super::partition::{PartitionKey, METADATA_DIR};
use super::writer::writer_properties;
use super::ArchiveConfig;
use crate::model::Tuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Role {
    Item,
    Property,
    Context,
}

impl Role {
    pub fn file_name(self) -> &'static str {
        match self {
            Role::Item => "itemMapping.parquet",
            Role::Property => "propertyMapping.parquet",
            Role::Context => "contextMapping.parquet",
        }
    }

    fn id_column(self) -> &'static str {
        match self {
            Role::Item => "itemId",
            Role::Property => "propertyId",
            Role::Context => "contextId",
        }
    }

    fn value_column(self) -> &'static str {
        match self {
            Role::Item => "item",
            Role::Property => "property",
            Role::Context => "context",
        }
    }
}

fn mapping_schema(role: Role) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(role.id_column(), DataType::Int64, false),
        Field::new(role.value_column(), DataType::Utf8, false),
    ]))
}

/// Write-side map for one role: URI to id plus the allocation counter.
pub(crate) struct MappingTable {
    role: Role,
    map: HashMap<String, u64>,
    counter: u64,
    dirty: bool,
}

impl MappingTable {
    fn load(root: &PathBuf, role: Role) -> Result<Self, Error> {
        let mut map = HashMap::new();
        let mut counter = 0u64;
        let path = root.join(METADATA_DIR).join(role.file_name());
        if path.is_file() {
            let file = std::fs::File::open(&path)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
            for batch in reader {
                let batch = batch?;
                let ids = downcast::<Int64Array>(&batch, 0, "mapping id column")?;
                let values = downcast::<StringArray>(&batch, 1, "mapping value column")?;
                for row in 0..batch.num_rows() {
                    let id = ids.value(row) as u64;
                    map.insert(values.value(row).to_string(), id);
                    counter = counter.max(id);
                }
            }
        }
        Ok(MappingTable {
            role,
            map,
            counter,
            dirty: false,
        })
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.map.contains_key(uri)
    }

    /// Returns the id for `uri`, allocating the next counter value on
    /// first sight.
    pub fn assign(&mut self, uri: &str) -> u64 {
        if let Some(id) = self.map.get(uri) {
            return *id;
        }
        self.counter += 1;
        self.map.insert(uri.to_string(), self.counter);
        self.dirty = true;
        self.counter
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    fn persist(&mut self, root: &PathBuf, config: &ArchiveConfig) -> Result<(), Error> {
        if !self.dirty {
            return Ok(());
        }
        let metadata = root.join(METADATA_DIR);
        std::fs::create_dir_all(&metadata)?;

        let mut rows: Vec<(&String, &u64)> = self.map.iter().collect();
        rows.sort_by_key(|(_, id)| **id);
        let ids = Int64Array::from(rows.iter().map(|(_, id)| **id as i64).collect::<Vec<_>>());
        let values = StringArray::from(rows.iter().map(|(uri, _)| uri.as_str()).collect::<Vec<_>>());
        let schema = mapping_schema(self.role);
        let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(ids), Arc::new(values)])?;

        let tmp = metadata.join(format!("{}.tmp", self.role.file_name()));
        let file = std::fs::File::create(&tmp)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(writer_properties(config)?))?;
        writer.write(&batch)?;
        writer.close()?;
        std::fs::rename(&tmp, metadata.join(self.role.file_name()))?;
        self.dirty = false;
        Ok(())
    }
}

/// The writer's three in-memory maps. Loaded once at archive open so ids
/// survive process restarts without collisions.
pub(crate) struct WriteMappings {
    pub item: MappingTable,
    pub property: MappingTable,
    pub context: MappingTable,
}

impl WriteMappings {
    pub fn load(root: &PathBuf) -> Result<Self, Error> {
        Ok(WriteMappings {
            item: MappingTable::load(root, Role::Item)?,
            property: MappingTable::load(root, Role::Property)?,
            context: MappingTable::load(root, Role::Context)?,
        })
    }

    /// Resolves the tuple's three URIs, allocating ids for first sights,
    /// and returns the 24-byte composite row id.
    pub fn assign_id(&mut self, tuple: &Tuple) -> [u8; 24] {
        let key = PartitionKey::new(
            self.item.assign(tuple.item.as_str()),
            self.property.assign(tuple.property.as_str()),
            self.context.assign(tuple.context.as_str()),
        );
        key.to_bytes()
    }

    /// Key formed from the current counters: the maximum id observed so
    /// far in each role.
    pub fn current_key(&self) -> PartitionKey {
        PartitionKey::new(
            self.item.counter(),
            self.property.counter(),
            self.context.counter(),
        )
    }

    /// Minimum key of the next partition: one beyond the current counter
    /// in every role the given tuple is about to introduce.
    pub fn next_week_key(&self, tuple: &Tuple) -> PartitionKey {
        let bump = |counter: u64, fresh: bool| if fresh { counter + 1 } else { counter };
        PartitionKey::new(
            bump(self.item.counter(), !self.item.contains(tuple.item.as_str())),
            bump(self.property.counter(), !self.property.contains(tuple.property.as_str())),
            bump(self.context.counter(), !self.context.contains(tuple.context.as_str())),
        )
    }

    pub fn persist(&mut self, root: &PathBuf, config: &ArchiveConfig) -> Result<(), Error> {
        self.item.persist(root, config)?;
        self.property.persist(root, config)?;
        self.context.persist(root, config)?;
        Ok(())
    }
}

/// One resolved mapping row.
#[derive(Debug, Clone)]
pub(crate) struct MappingEntry {
    pub id: u64,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedMappings {
    pub item: Option<MappingEntry>,
    pub property: Option<MappingEntry>,
    pub context: Option<MappingEntry>,
}

type TripleKey = (Option<String>, Option<String>, Option<String>);

/// Read-side resolver with bounded memoization, shared by all concurrent
/// readers of one archive.
#[derive(Debug)]
pub(crate) struct MappingCache {
    root: PathBuf,
    triple: Mutex<LruCache<TripleKey, ResolvedMappings>>,
    reverse: Mutex<LruCache<(Role, u64), String>>,
    file_bytes: Mutex<HashMap<PathBuf, Bytes>>,
}

impl MappingCache {
    pub fn new(root: PathBuf, config: &ArchiveConfig) -> Self {
        let cap = |n: usize| NonZeroUsize::new(n.max(1)).unwrap();
        MappingCache {
            root,
            triple: Mutex::new(LruCache::new(cap(config.mapping_cache_size))),
            reverse: Mutex::new(LruCache::new(cap(config.reverse_cache_size))),
            file_bytes: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a (item?, property?, context?) triple. A `None` input
    /// yields a `None` entry; a missing mapping row does too, and the
    /// caller decides whether that is a miss.
    pub fn resolve(
        &self,
        item: Option<&str>,
        property: Option<&str>,
        context: Option<&str>,
    ) -> Result<ResolvedMappings, Error> {
        let key: TripleKey = (
            item.map(str::to_string),
            property.map(str::to_string),
            context.map(str::to_string),
        );
        if let Some(hit) = self.triple.lock().get(&key) {
            return Ok(hit.clone());
        }
        let resolved = ResolvedMappings {
            item: match item {
                Some(uri) => self.lookup_by_value(Role::Item, uri)?,
                None => None,
            },
            property: match property {
                Some(uri) => self.lookup_by_value(Role::Property, uri)?,
                None => None,
            },
            context: match context {
                Some(uri) => self.lookup_by_value(Role::Context, uri)?,
                None => None,
            },
        };
        self.triple.lock().put(key, resolved.clone());
        Ok(resolved)
    }

    /// id-to-URI lookup used while iterating rows.
    pub fn reverse_lookup(&self, role: Role, id: u64) -> Result<Option<String>, Error> {
        if let Some(hit) = self.reverse.lock().get(&(role, id)) {
            return Ok(Some(hit.clone()));
        }
        let Some(bytes) = self.mapping_bytes(role)? else {
            return Ok(None);
        };
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let mask = ProjectionMask::leaves(builder.parquet_schema(), [0]);
        let target = id as i64;
        let filter = RowFilter::new(vec![Box::new(ArrowPredicateFn::new(
            mask,
            move |batch: RecordBatch| {
                let ids = batch
                    .column(0)
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| ArrowError::SchemaError("mapping id column".to_string()))?;
                Ok(BooleanArray::from_iter(
                    (0..ids.len()).map(|row| Some(ids.value(row) == target)),
                ))
            },
        ))]);
        let reader = builder.with_row_filter(filter).build()?;
        for batch in reader {
            let batch = batch?;
            if batch.num_rows() == 0 {
                continue;
            }
            let values = downcast::<StringArray>(&batch, 1, "mapping value column")?;
            let value = values.value(0).to_string();
            self.reverse.lock().put((role, id), value.clone());
            return Ok(Some(value));
        }
        Ok(None)
    }

    /// Full scan of one mapping file, in id order.
    pub fn all_values(&self, role: Role) -> Result<Vec<(u64, String)>, Error> {
        let Some(bytes) = self.mapping_bytes(role)? else {
            return Ok(Vec::new());
        };
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch?;
            let ids = downcast::<Int64Array>(&batch, 0, "mapping id column")?;
            let values = downcast::<StringArray>(&batch, 1, "mapping value column")?;
            for row in 0..batch.num_rows() {
                rows.push((ids.value(row) as u64, values.value(row).to_string()));
            }
        }
        Ok(rows)
    }

    fn lookup_by_value(&self, role: Role, uri: &str) -> Result<Option<MappingEntry>, Error> {
        let Some(bytes) = self.mapping_bytes(role)? else {
            return Ok(None);
        };
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
        let mask = ProjectionMask::leaves(builder.parquet_schema(), [1]);
        let target = uri.to_string();
        let filter = RowFilter::new(vec![Box::new(ArrowPredicateFn::new(
            mask,
            move |batch: RecordBatch| {
                let values = batch
                    .column(0)
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| ArrowError::SchemaError("mapping value column".to_string()))?;
                Ok(BooleanArray::from_iter(
                    (0..values.len()).map(|row| Some(values.value(row) == target)),
                ))
            },
        ))]);
        let reader = builder.with_row_filter(filter).build()?;
        for batch in reader {
            let batch = batch?;
            if batch.num_rows() == 0 {
                continue;
            }
            let ids = downcast::<Int64Array>(&batch, 0, "mapping id column")?;
            let values = downcast::<StringArray>(&batch, 1, "mapping value column")?;
            return Ok(Some(MappingEntry {
                id: ids.value(0) as u64,
                value: values.value(0).to_string(),
            }));
        }
        Ok(None)
    }

    fn mapping_bytes(&self, role: Role) -> Result<Option<Bytes>, Error> {
        let path = self.root.join(METADATA_DIR).join(role.file_name());
        let mut cache = self.file_bytes.lock();
        if let Some(bytes) = cache.get(&path) {
            return Ok(Some(bytes.clone()));
        }
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = Bytes::from(std::fs::read(&path)?);
        cache.insert(path, bytes.clone());
        Ok(Some(bytes))
    }

    /// Drops all memoized state. Called after every `put` and on `close`.
    pub fn invalidate(&self) {
        self.triple.lock().clear();
        self.reverse.lock().clear();
        self.file_bytes.lock().clear();
    }
}

fn downcast<'a, T: 'static>(
    batch: &'a RecordBatch,
    column: usize,
    what: &str,
) -> Result<&'a T, Error> {
    batch
        .column(column)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Arrow(ArrowError::SchemaError(format!("unexpected type for {}", what))))
}
