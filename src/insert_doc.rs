//! Purpose: Turn a JSON insert document into a typed row or column batch.
//! Exports: `InsertDoc`, `parse_insert_doc`, `value_json`.
//! Role: Input adapter for `iginx insert`; runs entirely before any connection.
//! Invariants: JSON values must match their declared column type; `null` means absent.
//! Invariants: Syntax errors are `Usage`; shape and type errors are `MalformedRequest`.
use iginx_client::api::{ColumnBatch, DataType, Error, ErrorKind, RowBatch, Tags, Value};
use serde::Deserialize;
use serde_json::{Value as Json, json};

/// `{"paths":[..],"keys":[..],"types":[..],"values":[[..]],"tags":[{..}]}`.
/// `values` is row-major unless the caller asks for columns.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InsertDoc {
    pub paths: Vec<String>,
    pub keys: Vec<i64>,
    pub types: Vec<String>,
    pub values: Vec<Vec<Json>>,
    #[serde(default)]
    pub tags: Option<Vec<Tags>>,
}

pub fn parse_insert_doc(text: &str) -> Result<InsertDoc, Error> {
    serde_json::from_str(text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid insert document")
            .with_hint(r#"Expected {"paths":[..],"keys":[..],"types":[..],"values":[[..]]}."#)
            .with_source(err)
    })
}

impl InsertDoc {
    pub fn into_rows(self) -> Result<RowBatch, Error> {
        let types = parse_types(&self.types)?;
        let rows = self
            .values
            .iter()
            .enumerate()
            .map(|(row, values)| {
                values
                    .iter()
                    .enumerate()
                    .map(|(column, value)| {
                        let data_type = types.get(column).copied().ok_or_else(|| {
                            malformed(format!("row {row} has more values than types"))
                        })?;
                        typed_value(value, data_type)
                            .map_err(|err| err.with_row(row as u64))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RowBatch {
            paths: self.paths,
            keys: self.keys,
            rows,
            types,
            tags: self.tags,
        })
    }

    pub fn into_columns(self) -> Result<ColumnBatch, Error> {
        let types = parse_types(&self.types)?;
        if self.values.len() > types.len() {
            return Err(malformed(format!(
                "{} value columns for {} types",
                self.values.len(),
                types.len()
            )));
        }
        let columns = self
            .values
            .iter()
            .zip(&types)
            .map(|(values, data_type)| {
                values
                    .iter()
                    .enumerate()
                    .map(|(row, value)| {
                        typed_value(value, *data_type).map_err(|err| err.with_row(row as u64))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ColumnBatch {
            paths: self.paths,
            keys: self.keys,
            columns,
            types,
            tags: self.tags,
        })
    }
}

fn parse_types(names: &[String]) -> Result<Vec<DataType>, Error> {
    names
        .iter()
        .map(|name| {
            DataType::parse(name).ok_or_else(|| {
                malformed(format!("unknown data type {name:?}"))
                    .with_hint("Use BOOLEAN, INTEGER, LONG, FLOAT, DOUBLE or BINARY.")
            })
        })
        .collect()
}

fn typed_value(value: &Json, data_type: DataType) -> Result<Option<Value>, Error> {
    if value.is_null() {
        return Ok(None);
    }
    let converted = match data_type {
        DataType::Boolean => value.as_bool().map(Value::Boolean),
        DataType::Integer => value
            .as_i64()
            .and_then(|number| i32::try_from(number).ok())
            .map(Value::Integer),
        DataType::Long => value.as_i64().map(Value::Long),
        DataType::Float => value.as_f64().map(|number| Value::Float(number as f32)),
        DataType::Double => value.as_f64().map(Value::Double),
        DataType::Binary => binary_value(value),
    };
    converted.map(Some).ok_or_else(|| {
        malformed(format!("value {value} does not fit type {}", data_type.name()))
    })
}

fn binary_value(value: &Json) -> Option<Value> {
    match value {
        Json::String(text) => Some(Value::Binary(text.as_bytes().to_vec())),
        Json::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|byte| u8::try_from(byte).ok()))
            .collect::<Option<Vec<u8>>>()
            .map(Value::Binary),
        _ => None,
    }
}

/// JSON rendering for CLI output: BINARY as lossy UTF-8, non-finite floats as null.
pub fn value_json(value: Option<&Value>) -> Json {
    match value {
        None => Json::Null,
        Some(Value::Boolean(flag)) => json!(flag),
        Some(Value::Integer(number)) => json!(number),
        Some(Value::Long(number)) => json!(number),
        Some(Value::Float(number)) => json!(number),
        Some(Value::Double(number)) => json!(number),
        Some(Value::Binary(bytes)) => json!(String::from_utf8_lossy(bytes)),
    }
}

fn malformed(message: String) -> Error {
    Error::new(ErrorKind::MalformedRequest).with_message(message)
}
