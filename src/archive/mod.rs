//! The archive engine: a partitioned parquet store for URI-keyed tuples.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

mod aggregate;
mod codec;
mod errors;
mod fetch;
mod mapping;
mod partition;
mod writer;

#[cfg(test)]
mod tests;

pub use aggregate::{AggregateIter, AggregateOp};
pub use errors::Error;
pub use fetch::{DescendantsIter, FetchIter, PropertiesIter};

use mapping::{MappingCache, Role, WriteMappings};
use crate::model::{Tuple, Uri};

/// Tuning knobs for one archive. The defaults match the write and cache
/// sizing the archive format was designed around.
#[derive(Clone, Debug)]
pub struct ArchiveConfig {
    /// Capacity of the (item, property, context) resolution cache.
    pub mapping_cache_size: usize,
    /// Capacity of the id-to-URI reverse lookup cache.
    pub reverse_cache_size: usize,
    /// Zstd compression level for data and mapping files.
    pub zstd_level: i32,
    /// Rows buffered before handing a batch to the parquet writer.
    pub write_batch_rows: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        ArchiveConfig {
            mapping_cache_size: 20_000,
            reverse_cache_size: 10_000,
            zstd_level: 12,
            write_batch_rows: 8192,
        }
    }
}

/// An archive rooted at one directory. Reads may run concurrently;
/// `put` calls serialize on the writer state.
pub struct Archive {
    root: PathBuf,
    config: ArchiveConfig,
    write_state: Mutex<WriteMappings>,
    read_cache: Arc<MappingCache>,
}

impl Archive {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        Archive::with_config(root, ArchiveConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: ArchiveConfig) -> Result<Self, Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let write_state = WriteMappings::load(&root)?;
        let read_cache = Arc::new(MappingCache::new(root.clone(), &config));
        Ok(Archive {
            root,
            config,
            write_state: Mutex::new(write_state),
            read_cache,
        })
    }

    /// Persists a finite stream of tuples. Durable once this returns;
    /// partitions renamed before a failure stay durable.
    pub fn put<I>(&self, tuples: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = Tuple>,
    {
        let mut state = self.write_state.lock();
        writer::put_tuples(&self.root, &self.config, &mut state, tuples)?;
        state.persist(&self.root, &self.config)?;
        self.read_cache.invalidate();
        Ok(())
    }

    /// Tuples for the given key, at most `limit` per distinct property
    /// (`0` = unlimited). A missing mapping yields an empty stream.
    pub fn fetch(
        &self,
        item: &Uri,
        property: Option<&Uri>,
        context: Option<&Uri>,
        limit: u64,
    ) -> Result<TupleIter, Error> {
        Ok(match self.fetch_plain(item, property, context, limit, None)? {
            Some(iter) => TupleIter::Plain(iter),
            None => TupleIter::Empty,
        })
    }

    /// Windowed fetch over `[begin, end]`, optionally aggregated when an
    /// operator name is given.
    #[allow(clippy::too_many_arguments)]
    pub fn fetch_range(
        &self,
        item: &Uri,
        property: Option<&Uri>,
        context: Option<&Uri>,
        end: i64,
        begin: i64,
        limit: u64,
        interval: i64,
        op: Option<&str>,
    ) -> Result<TupleIter, Error> {
        let Some(name) = op else {
            return Ok(
                match self.fetch_plain(item, property, context, limit, Some((begin, end)))? {
                    Some(iter) => TupleIter::Plain(iter),
                    None => TupleIter::Empty,
                },
            );
        };
        let op = AggregateOp::parse(name)
            .ok_or_else(|| Error::UnsupportedAggregation(name.to_string()))?;
        if end <= 0 || end < begin {
            return Err(Error::InvalidAggregation(format!(
                "window [{}, {}] must satisfy 0 < end and begin <= end",
                begin, end
            )));
        }
        if interval < 0 {
            return Err(Error::InvalidAggregation(format!(
                "interval {} must be non-negative",
                interval
            )));
        }
        Ok(
            match self.fetch_plain(item, property, context, 0, Some((begin, end)))? {
                Some(iter) => TupleIter::Aggregated(AggregateIter::new(iter, end, interval, op, limit)),
                None => TupleIter::Empty,
            },
        )
    }

    /// Distinct property URIs seen for the item, lazily.
    pub fn properties(&self, item: &Uri) -> Result<PropertiesIter, Error> {
        Ok(PropertiesIter::new(self.fetch_plain(item, None, None, 0, None)?))
    }

    /// Child item URIs below `item`, resolved from the item mapping.
    /// `limit == 0` means unlimited.
    pub fn descendants(&self, item: &Uri, limit: u64) -> Result<DescendantsIter, Error> {
        let prefix = format!("{}/", item.as_str().trim_end_matches('/'));
        let mut children: Vec<Uri> = self
            .read_cache
            .all_values(Role::Item)?
            .into_iter()
            .filter(|(_, uri)| uri.starts_with(&prefix))
            .map(|(_, uri)| Uri::new(uri))
            .collect();
        if limit > 0 {
            children.truncate(limit as usize);
        }
        Ok(DescendantsIter::new(children))
    }

    /// Upper-bound row count over the pruned partition set, from parquet
    /// footer metadata.
    pub fn approximate_size(
        &self,
        item: &Uri,
        property: Option<&Uri>,
        context: Option<&Uri>,
        end: i64,
        begin: i64,
    ) -> Result<u64, Error> {
        let plan = fetch::plan(
            &self.root,
            &self.read_cache,
            item,
            property,
            context,
            Some((begin, end)),
        )?;
        let Some(plan) = plan else {
            return Ok(0);
        };
        let mut total = 0u64;
        for path in plan.files() {
            let file = std::fs::File::open(path)?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
            total += builder.metadata().file_metadata().num_rows().max(0) as u64;
        }
        Ok(total)
    }

    /// Deletion is not supported by the archive format.
    pub fn delete(
        &self,
        _item: &Uri,
        _property: Option<&Uri>,
        _context: Option<&Uri>,
        _end: i64,
        _begin: i64,
    ) -> u64 {
        0
    }

    /// Deletion is not supported by the archive format.
    pub fn delete_item(&self, _item: &Uri) -> bool {
        false
    }

    /// Drops all cached read state. Open iterators keep their readers
    /// until dropped.
    pub fn close(&self) {
        self.read_cache.invalidate();
    }

    fn fetch_plain(
        &self,
        item: &Uri,
        property: Option<&Uri>,
        context: Option<&Uri>,
        limit: u64,
        window: Option<(i64, i64)>,
    ) -> Result<Option<FetchIter>, Error> {
        let plan = fetch::plan(&self.root, &self.read_cache, item, property, context, window)?;
        Ok(plan.map(|plan| FetchIter::new(plan, limit, self.read_cache.clone())))
    }
}

/// A lazy tuple stream: empty, plain, or interval-aggregated.
#[derive(Debug)]
pub enum TupleIter {
    Empty,
    Plain(FetchIter),
    Aggregated(AggregateIter),
}

impl Iterator for TupleIter {
    type Item = Result<Tuple, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            TupleIter::Empty => None,
            TupleIter::Plain(iter) => iter.next(),
            TupleIter::Aggregated(iter) => iter.next(),
        }
    }
}
