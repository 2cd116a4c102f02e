//! JSON tuple-format parser.
//!
//! The document is an object whose top-level field names are item URIs,
//! each mapping to an object of property URIs, each mapping to an array
//! of `{value, time, seqNr?}` entries or directly to a value. An
//! `@context` object remaps `prefix:rest` names; objects become records
//! and `{"@id": ...}` objects become URI values.

use std::collections::HashMap;

use num_bigint::BigInt;
use serde_json::Value as Json;

use super::ParseError;
use crate::model::{Record, Tuple, Uri, Value};

pub struct JsonParser {
    root: Uri,
    context: Uri,
    default_time: i64,
}

impl JsonParser {
    pub fn new(root: Uri, context: Uri) -> Self {
        JsonParser {
            root,
            context,
            default_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Parser with an injected wall-clock time for entries without one.
    pub fn with_default_time(root: Uri, context: Uri, default_time: i64) -> Self {
        JsonParser {
            root,
            context,
            default_time,
        }
    }

    pub fn parse(&self, input: &str) -> Result<Vec<Tuple>, ParseError> {
        let doc: Json =
            serde_json::from_str(input).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        let Json::Object(items) = doc else {
            return Err(ParseError::InvalidJson("document is not an object".to_string()));
        };

        let mut prefixes: HashMap<String, String> = HashMap::new();
        if let Some(Json::Object(context)) = items.get("@context") {
            for (prefix, expansion) in context {
                if let Json::String(expansion) = expansion {
                    prefixes.insert(prefix.clone(), expansion.clone());
                }
            }
        }

        let mut tuples = Vec::new();
        for (name, properties) in &items {
            if name == "@context" {
                continue;
            }
            let item = Uri::new(self.expand(&prefixes, name));
            let Json::Object(properties) = properties else {
                return Err(ParseError::InvalidJson(format!(
                    "item {} is not an object",
                    name
                )));
            };
            for (property_name, entries) in properties {
                let property = Uri::new(self.expand(&prefixes, property_name));
                match entries {
                    Json::Array(entries) => {
                        for entry in entries {
                            tuples.push(self.entry_tuple(&prefixes, &item, &property, entry)?);
                        }
                    }
                    direct => tuples.push(Tuple {
                        item: item.clone(),
                        property: property.clone(),
                        context: self.context.clone(),
                        time: self.default_time,
                        seq_nr: 0,
                        value: self.node_value(&prefixes, direct)?,
                    }),
                }
            }
        }
        Ok(tuples)
    }

    fn entry_tuple(
        &self,
        prefixes: &HashMap<String, String>,
        item: &Uri,
        property: &Uri,
        entry: &Json,
    ) -> Result<Tuple, ParseError> {
        let Json::Object(fields) = entry else {
            return Err(ParseError::InvalidJson(format!(
                "entry for {} is not an object",
                property
            )));
        };
        let value = fields
            .get("value")
            .ok_or_else(|| ParseError::InvalidValue(format!("entry for {} has no value", property)))?;
        let time = fields
            .get("time")
            .and_then(Json::as_i64)
            .ok_or_else(|| ParseError::MissingTime(property.to_string()))?;
        let seq_nr = fields.get("seqNr").and_then(Json::as_i64).unwrap_or(0) as i32;
        Ok(Tuple {
            item: item.clone(),
            property: property.clone(),
            context: self.context.clone(),
            time,
            seq_nr,
            value: self.node_value(prefixes, value)?,
        })
    }

    fn node_value(
        &self,
        prefixes: &HashMap<String, String>,
        node: &Json,
    ) -> Result<Value, ParseError> {
        match node {
            Json::Object(fields) => {
                if let Some(Json::String(id)) = fields.get("@id") {
                    return Ok(Value::Uri(Uri::new(self.expand(prefixes, id))));
                }
                let mut record = Record::new();
                for (name, child) in fields {
                    record.append(
                        Uri::new(self.expand(prefixes, name)),
                        self.node_value(prefixes, child)?,
                    );
                }
                Ok(Value::Record(record))
            }
            Json::Bool(v) => Ok(Value::Bool(*v)),
            Json::String(v) => Ok(Value::String(v.clone())),
            Json::Number(number) => {
                if let Some(v) = number.as_i64() {
                    if let Ok(v) = i32::try_from(v) {
                        Ok(Value::Int(v))
                    } else {
                        Ok(Value::Long(v))
                    }
                } else if let Some(v) = number.as_u64() {
                    Ok(Value::BigInt(BigInt::from(v)))
                } else {
                    Ok(Value::Double(number.as_f64().unwrap_or(f64::NAN)))
                }
            }
            other => Err(ParseError::InvalidValue(format!(
                "unsupported JSON value {}",
                other
            ))),
        }
    }

    /// Expands `prefix:rest` through the `@context` map; names without a
    /// scheme resolve below the parser's root item.
    fn expand(&self, prefixes: &HashMap<String, String>, name: &str) -> String {
        if let Some((prefix, rest)) = name.split_once(':') {
            if let Some(expansion) = prefixes.get(prefix) {
                return format!("{}{}", expansion, rest);
            }
            return name.to_string();
        }
        format!("{}/{}", self.root.as_str().trim_end_matches('/'), name)
    }
}
