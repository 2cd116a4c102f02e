use super::ctx;
use crate::ingest::{JsonParser, ParseError};
use crate::model::{Uri, Value};

fn parser() -> JsonParser {
    JsonParser::with_default_time(Uri::new("http://example.root"), ctx(), 555)
}

#[test]
fn timed_entries() {
    let input = r#"{
        "http://example.org/i": {
            "http://example.org/p": [
                {"value": 1, "time": 100},
                {"value": 2.5, "time": 200, "seqNr": 3}
            ]
        }
    }"#;
    let tuples = parser().parse(input).unwrap();

    assert_eq!(tuples.len(), 2);
    assert_eq!(tuples[0].value, Value::Int(1));
    assert_eq!(tuples[0].time, 100);
    assert_eq!(tuples[0].seq_nr, 0);
    assert_eq!(tuples[1].value, Value::Double(2.5));
    assert_eq!(tuples[1].seq_nr, 3);
}

#[test]
fn relative_names_resolve_below_root() {
    let input = r#"{"item": {"p1": "v1"}}"#;
    let tuples = parser().parse(input).unwrap();

    assert_eq!(tuples.len(), 1);
    assert_eq!(tuples[0].item, Uri::new("http://example.root/item"));
    assert_eq!(tuples[0].property, Uri::new("http://example.root/p1"));
    assert_eq!(tuples[0].value, Value::String("v1".to_string()));
    assert_eq!(tuples[0].time, 555);
}

#[test]
fn context_remaps_prefixes() {
    let input = r#"{
        "@context": {"ex": "http://example.org/"},
        "ex:i": {"ex:p": [{"value": true, "time": 9}]}
    }"#;
    let tuples = parser().parse(input).unwrap();

    assert_eq!(tuples[0].item, Uri::new("http://example.org/i"));
    assert_eq!(tuples[0].property, Uri::new("http://example.org/p"));
    assert_eq!(tuples[0].value, Value::Bool(true));
}

#[test]
fn nested_object_becomes_record_with_id_uris() {
    let input = r#"{
        "item": {
            "nested": [{"value": {"unit": {"@id": "http://example.org/celsius"}, "reading": 21.5}, "time": 10}]
        }
    }"#;
    let tuples = parser().parse(input).unwrap();

    let Value::Record(record) = &tuples[0].value else {
        panic!("expected a record value");
    };
    assert_eq!(record.len(), 2);
    let entries = record.entries();
    assert_eq!(entries[0].0, Uri::new("http://example.root/unit"));
    assert_eq!(
        entries[0].1,
        Value::Uri(Uri::new("http://example.org/celsius"))
    );
    assert_eq!(entries[1].0, Uri::new("http://example.root/reading"));
    assert_eq!(entries[1].1, Value::Double(21.5));
}

#[test]
fn large_integers_widen() {
    let input = r#"{"item": {"p": [{"value": 3000000000, "time": 1}]}}"#;
    let tuples = parser().parse(input).unwrap();
    assert_eq!(tuples[0].value, Value::Long(3_000_000_000));
}

#[test]
fn entry_without_time_is_an_error() {
    let input = r#"{"item": {"p": [{"value": 1}]}}"#;
    let err = parser().parse(input).unwrap_err();
    assert!(matches!(err, ParseError::MissingTime(_)));
}

#[test]
fn non_object_document_is_an_error() {
    let err = parser().parse("[1, 2]").unwrap_err();
    assert!(matches!(err, ParseError::InvalidJson(_)));
}
