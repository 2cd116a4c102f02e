use super::*;
use crate::archive::mapping::{MappingCache, Role};

use std::str::FromStr;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use crate::model::Record;

const ITEM: &str = "http://example.org/machine/1";
const PROP_A: &str = "http://example.org/temperature";
const PROP_B: &str = "http://example.org/pressure";

#[test]
fn put_then_fetch_returns_written_tuples() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();

    archive
        .put(vec![
            tuple(ITEM, PROP_A, BASE_TIME + 2, Value::Double(21.5)),
            tuple(ITEM, PROP_A, BASE_TIME + 1, Value::Double(20.0)),
            tuple(ITEM, PROP_B, BASE_TIME + 2, Value::Bool(true)),
        ])
        .unwrap();

    let all = collect(archive.fetch(&uri(ITEM), None, None, 0).unwrap());
    assert_eq!(all.len(), 3);

    let only_a = collect(
        archive
            .fetch(&uri(ITEM), Some(&uri(PROP_A)), None, 0)
            .unwrap(),
    );
    assert_eq!(only_a.len(), 2);
    assert!(only_a.iter().all(|t| t.property == uri(PROP_A)));
    assert_eq!(only_a[0].time, BASE_TIME + 2);
    assert_eq!(only_a[0].value, Value::Double(21.5));
    assert_eq!(only_a[0].item, uri(ITEM));
    assert_eq!(only_a[0].context, Uri::default_context());
}

#[test]
fn every_value_kind_survives_the_archive() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();

    let mut record = Record::new();
    record.append(uri("http://example.org/unit"), Value::Uri(uri("http://example.org/celsius")));
    record.append(uri("http://example.org/reading"), Value::Double(21.5));

    let values = vec![
        Value::Int(-7),
        Value::Long(1 << 40),
        Value::Float(1.25),
        Value::Double(-0.5),
        Value::String("hello".to_string()),
        Value::Bool(false),
        Value::Short(300),
        Value::BigInt(BigInt::from_str("98765432109876543210").unwrap()),
        Value::BigDecimal(BigDecimal::from_str("3.14159").unwrap()),
        Value::Uri(uri("http://example.org/other")),
        Value::Record(record),
    ];
    let tuples: Vec<Tuple> = values
        .iter()
        .enumerate()
        .map(|(k, value)| {
            tuple(
                ITEM,
                PROP_A,
                BASE_TIME + values.len() as i64 - k as i64,
                value.clone(),
            )
        })
        .collect();
    archive.put(tuples).unwrap();

    let fetched = collect(
        archive
            .fetch(&uri(ITEM), Some(&uri(PROP_A)), None, 0)
            .unwrap(),
    );
    let fetched_values: Vec<Value> = fetched.into_iter().map(|t| t.value).collect();
    assert_eq!(fetched_values, values);
}

#[test]
fn unknown_item_yields_empty_stream() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    archive
        .put(vec![tuple(ITEM, PROP_A, BASE_TIME, Value::Int(1))])
        .unwrap();

    let none = collect(
        archive
            .fetch(&uri("http://example.org/unknown"), None, None, 0)
            .unwrap(),
    );
    assert!(none.is_empty());

    let missing_property = collect(
        archive
            .fetch(&uri(ITEM), Some(&uri("http://example.org/unknown")), None, 0)
            .unwrap(),
    );
    assert!(missing_property.is_empty());
}

#[test]
fn properties_lists_distinct_property_uris() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    archive
        .put(vec![
            tuple(ITEM, PROP_A, BASE_TIME + 3, Value::Int(1)),
            tuple(ITEM, PROP_A, BASE_TIME + 2, Value::Int(2)),
            tuple(ITEM, PROP_B, BASE_TIME + 3, Value::Int(3)),
        ])
        .unwrap();

    let properties: Vec<Uri> = archive
        .properties(&uri(ITEM))
        .unwrap()
        .map(|p| p.unwrap())
        .collect();
    assert_eq!(properties, vec![uri(PROP_A), uri(PROP_B)]);
}

#[test]
fn descendants_come_from_the_item_mapping() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    archive
        .put(vec![
            tuple("http://example.org/plant/m1", PROP_A, BASE_TIME, Value::Int(1)),
            tuple("http://example.org/plant/m2", PROP_A, BASE_TIME, Value::Int(2)),
            tuple("http://example.org/factory", PROP_A, BASE_TIME, Value::Int(3)),
        ])
        .unwrap();

    let children: Vec<Uri> = archive
        .descendants(&uri("http://example.org/plant"), 0)
        .unwrap()
        .collect();
    assert_eq!(
        children,
        vec![
            uri("http://example.org/plant/m1"),
            uri("http://example.org/plant/m2"),
        ]
    );

    let limited: Vec<Uri> = archive
        .descendants(&uri("http://example.org/plant"), 1)
        .unwrap()
        .collect();
    assert_eq!(limited.len(), 1);
}

#[test]
fn approximate_size_counts_matching_rows() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    archive
        .put(vec![
            tuple(ITEM, PROP_A, BASE_TIME + 2, Value::Int(1)),
            tuple(ITEM, PROP_A, BASE_TIME + 1, Value::Int(2)),
            tuple(ITEM, PROP_B, BASE_TIME, Value::Int(3)),
        ])
        .unwrap();

    let size = archive
        .approximate_size(&uri(ITEM), None, None, BASE_TIME + 10, 0)
        .unwrap();
    assert!(size >= 3);

    let unknown = archive
        .approximate_size(&uri("http://example.org/unknown"), None, None, BASE_TIME, 0)
        .unwrap();
    assert_eq!(unknown, 0);
}

#[test]
fn delete_is_a_noop() {
    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();
    archive
        .put(vec![tuple(ITEM, PROP_A, BASE_TIME, Value::Int(1))])
        .unwrap();

    assert_eq!(archive.delete(&uri(ITEM), None, None, BASE_TIME + 1, 0), 0);
    assert!(!archive.delete_item(&uri(ITEM)));
    assert_eq!(collect(archive.fetch(&uri(ITEM), None, None, 0).unwrap()).len(), 1);
}

#[test]
fn json_ingested_records_round_trip() {
    use crate::ingest::JsonParser;

    let dir = tempdir().unwrap();
    let archive = Archive::open(dir.path()).unwrap();

    let parser = JsonParser::with_default_time(
        uri("http://example.root"),
        Uri::default_context(),
        BASE_TIME,
    );
    let input = r#"{
        "item": {
            "p1": "v1",
            "nested": {"inner": {"@id": "http://example.org/value"}, "reading": 1.5}
        }
    }"#;
    archive.put(parser.parse(input).unwrap()).unwrap();

    let fetched = collect(
        archive
            .fetch(
                &uri("http://example.root/item"),
                Some(&uri("http://example.root/nested")),
                None,
                0,
            )
            .unwrap(),
    );
    assert_eq!(fetched.len(), 1);

    let mut expected = Record::new();
    expected.append(
        uri("http://example.root/inner"),
        Value::Uri(uri("http://example.org/value")),
    );
    expected.append(uri("http://example.root/reading"), Value::Double(1.5));
    assert_eq!(fetched[0].value, Value::Record(expected));
    assert_eq!(fetched[0].time, BASE_TIME);
}

#[test]
fn reopened_archive_reuses_and_extends_mappings() {
    let dir = tempdir().unwrap();
    let second_item = "http://example.org/machine/2";

    {
        let archive = Archive::open(dir.path()).unwrap();
        archive
            .put(vec![tuple(ITEM, PROP_A, BASE_TIME + 1, Value::Int(1))])
            .unwrap();
        archive.close();
    }
    {
        let archive = Archive::open(dir.path()).unwrap();
        archive
            .put(vec![
                tuple(ITEM, PROP_A, BASE_TIME + 2, Value::Int(2)),
                tuple(second_item, PROP_A, BASE_TIME + 2, Value::Int(3)),
            ])
            .unwrap();

        assert_eq!(collect(archive.fetch(&uri(ITEM), None, None, 0).unwrap()).len(), 2);
        assert_eq!(
            collect(archive.fetch(&uri(second_item), None, None, 0).unwrap()).len(),
            1
        );
    }

    // ids stay unique and dense across sessions
    let cache = MappingCache::new(dir.path().to_path_buf(), &ArchiveConfig::default());
    let items = cache.all_values(Role::Item).unwrap();
    let mut ids: Vec<u64> = items.iter().map(|(id, _)| *id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
    let mut values: Vec<&String> = items.iter().map(|(_, value)| value).collect();
    values.sort();
    values.dedup();
    assert_eq!(values.len(), 2);

    let properties = cache.all_values(Role::Property).unwrap();
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].0, 1);
}
