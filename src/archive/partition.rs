//! Partition keys and the directory naming scheme of the archive tree.
//!
//! The tree is `<archive>/<yearMin>_<yearMax>_<year>/<weekMin>_<weekMax>/data.parquet`
//! where min/max are 24-byte composite keys rendered as decimal strings.

use std::path::{Path, PathBuf};

use num_bigint::BigUint;

pub(crate) const METADATA_DIR: &str = "metadata";
pub(crate) const TEMP_DIR: &str = "temp";
pub(crate) const DATA_FILE: &str = "data.parquet";

/// Composite (itemId, propertyId, contextId) key. Serialized big-endian as
/// 24 bytes; the derived ordering matches the lexicographic byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct PartitionKey {
    pub item_id: u64,
    pub property_id: u64,
    pub context_id: u64,
}

impl PartitionKey {
    /// Key assigned to a partition before any ids have been observed.
    pub const INITIAL: PartitionKey = PartitionKey {
        item_id: 1,
        property_id: 1,
        context_id: 1,
    };

    pub fn new(item_id: u64, property_id: u64, context_id: u64) -> Self {
        PartitionKey {
            item_id,
            property_id,
            context_id,
        }
    }

    pub fn to_bytes(self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..8].copy_from_slice(&self.item_id.to_be_bytes());
        out[8..16].copy_from_slice(&self.property_id.to_be_bytes());
        out[16..].copy_from_slice(&self.context_id.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; 24]) -> Self {
        let part = |range: std::ops::Range<usize>| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[range]);
            u64::from_be_bytes(buf)
        };
        PartitionKey {
            item_id: part(0..8),
            property_id: part(8..16),
            context_id: part(16..24),
        }
    }

    /// Renders the 24 bytes as one unsigned 192-bit decimal number.
    pub fn encode(self) -> String {
        BigUint::from_bytes_be(&self.to_bytes()).to_str_radix(10)
    }

    /// Inverse of [`PartitionKey::encode`]; `None` for non-decimal input
    /// or numbers wider than 192 bits.
    pub fn decode(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number = BigUint::parse_bytes(name.as_bytes(), 10)?;
        let raw = number.to_bytes_be();
        if raw.len() > 24 {
            return None;
        }
        let mut bytes = [0u8; 24];
        bytes[24 - raw.len()..].copy_from_slice(&raw);
        Some(PartitionKey::from_bytes(&bytes))
    }
}

pub(crate) fn week_dir_name(min: PartitionKey, max: PartitionKey) -> String {
    format!("{}_{}", min.encode(), max.encode())
}

pub(crate) fn year_dir_name(min: PartitionKey, max: PartitionKey, year: i32) -> String {
    format!("{}_{}_{}", min.encode(), max.encode(), year)
}

/// Week names are `<min>_<max>`, with an optional numeric suffix that
/// disambiguates repeats of the same key range within one year.
pub(crate) fn parse_week_dir(name: &str) -> Option<(PartitionKey, PartitionKey)> {
    let mut parts = name.split('_');
    let min = PartitionKey::decode(parts.next()?)?;
    let max = PartitionKey::decode(parts.next()?)?;
    if let Some(suffix) = parts.next() {
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    if parts.next().is_some() {
        return None;
    }
    Some((min, max))
}

pub(crate) fn parse_year_dir(name: &str) -> Option<(PartitionKey, PartitionKey, i32)> {
    let mut parts = name.split('_');
    let min = PartitionKey::decode(parts.next()?)?;
    let max = PartitionKey::decode(parts.next()?)?;
    let year = parts.next()?.parse::<i32>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((min, max, year))
}

/// Week directories under `year_dir` whose item-id range covers `item_id`,
/// ordered by their minimum key. Malformed names and ranges with
/// `min > max` are skipped.
pub(crate) fn matching_week_files(year_dir: &Path, item_id: u64) -> std::io::Result<Vec<PathBuf>> {
    let mut matched: Vec<(PartitionKey, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(year_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((min, max)) = parse_week_dir(name) else {
            log::debug!("skipping non-partition directory {:?}", entry.path());
            continue;
        };
        if min > max {
            log::warn!("skipping partition {:?} with inverted key range", entry.path());
            continue;
        }
        if item_id < min.item_id || item_id > max.item_id {
            continue;
        }
        let data = entry.path().join(DATA_FILE);
        if data.is_file() {
            matched.push((min, data));
        }
    }
    matched.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(matched.into_iter().map(|(_, path)| path).collect())
}

/// Year directories under `root` whose item-id range covers `item_id`,
/// ordered by year. The metadata directory, in-flight temp directories and
/// malformed names are skipped.
pub(crate) fn matching_year_dirs(root: &Path, item_id: u64) -> std::io::Result<Vec<PathBuf>> {
    let mut matched: Vec<(i32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == METADATA_DIR {
            continue;
        }
        let Some((min, max, year)) = parse_year_dir(name) else {
            log::debug!("skipping non-partition directory {:?}", entry.path());
            continue;
        };
        if min > max {
            log::warn!("skipping partition {:?} with inverted key range", entry.path());
            continue;
        }
        if item_id >= min.item_id && item_id <= max.item_id {
            matched.push((year, entry.path()));
        }
    }
    matched.sort_by_key(|(year, _)| *year);
    Ok(matched.into_iter().map(|(_, path)| path).collect())
}

/// Finds the finalized year directory for `year`, returning its path and
/// parsed minimum key.
pub(crate) fn find_year_dir(root: &Path, year: i32) -> std::io::Result<Option<(PathBuf, PartitionKey)>> {
    if !root.is_dir() {
        return Ok(None);
    }
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((min, _, dir_year)) = parse_year_dir(name) {
            if dir_year == year {
                return Ok(Some((entry.path(), min)));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bytes_round_trip() {
        let key = PartitionKey::new(3, 7, 2);
        assert_eq!(PartitionKey::from_bytes(&key.to_bytes()), key);
    }

    #[test]
    fn key_decimal_round_trip() {
        for key in [
            PartitionKey::INITIAL,
            PartitionKey::new(1, 1, 2),
            PartitionKey::new(u64::MAX, u64::MAX, u64::MAX),
        ] {
            assert_eq!(PartitionKey::decode(&key.encode()), Some(key));
        }
    }

    #[test]
    fn key_ordering_matches_byte_order() {
        let a = PartitionKey::new(1, 9, 9);
        let b = PartitionKey::new(2, 1, 1);
        assert!(a < b);
        assert!(a.to_bytes() < b.to_bytes());
    }

    #[test]
    fn non_decimal_names_rejected() {
        assert_eq!(PartitionKey::decode("temp"), None);
        assert_eq!(PartitionKey::decode(""), None);
        assert_eq!(PartitionKey::decode("12a4"), None);
        assert_eq!(PartitionKey::decode("-12"), None);
    }

    #[test]
    fn week_dir_name_round_trip() {
        let min = PartitionKey::new(1, 1, 1);
        let max = PartitionKey::new(4, 9, 2);
        let name = week_dir_name(min, max);
        assert_eq!(parse_week_dir(&name), Some((min, max)));
        assert_eq!(
            parse_week_dir(&format!("{}_1", name)),
            Some((min, max)),
            "numeric disambiguation suffix is accepted"
        );
        assert_eq!(parse_week_dir("temp"), None);
        assert_eq!(parse_week_dir("1_2_x"), None);
        assert_eq!(parse_week_dir("1_2_3_4"), None);
    }

    #[test]
    fn year_dir_name_round_trip() {
        let min = PartitionKey::new(1, 1, 1);
        let max = PartitionKey::new(4, 9, 2);
        let name = year_dir_name(min, max, 2023);
        assert_eq!(parse_year_dir(&name), Some((min, max, 2023)));
        assert_eq!(parse_year_dir(&week_dir_name(min, max)), None);
        assert_eq!(parse_year_dir("metadata"), None);
    }
}
