//! Purpose: Rebuild typed, nullable tables from the raw buffers a query returns.
//! Exports: `DataSet`, `Row`, `AggregateSet`, `decode_rows`, `decode_row`, `decode_columns`, `decode_aggregate`.
//! Role: Read-path counterpart of `normalize`; pure, no I/O.
//! Invariants: Bitmap width always equals the length of the explicit type list (row) or key list (column).
//! Invariants: Absent values consume zero bytes; every value buffer must be consumed exactly.
//! Invariants: Any disagreement between buffers, bitmaps and type lists is `ProtocolDecode`.
use crate::core::bitmap::NullBitmap;
use crate::core::codec::{self, ValueReader};
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{DataType, Value};

/// Decoded result in one of three shapes; read it through the shared accessors.
#[derive(Clone, Debug, PartialEq)]
pub enum DataSet {
    /// One decoded vector per key, values in path order.
    RowKeyed {
        paths: Vec<String>,
        types: Vec<DataType>,
        keys: Vec<i64>,
        rows: Vec<Vec<Option<Value>>>,
    },
    /// One decoded vector per path, values in key order.
    ColumnKeyed {
        paths: Vec<String>,
        types: Vec<DataType>,
        keys: Vec<i64>,
        columns: Vec<Vec<Option<Value>>>,
    },
    /// Rows without a key column.
    Keyless {
        paths: Vec<String>,
        types: Vec<DataType>,
        rows: Vec<Vec<Option<Value>>>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Row<'a> {
    pub key: Option<i64>,
    pub values: Vec<Option<&'a Value>>,
}

impl DataSet {
    pub fn paths(&self) -> &[String] {
        match self {
            DataSet::RowKeyed { paths, .. }
            | DataSet::ColumnKeyed { paths, .. }
            | DataSet::Keyless { paths, .. } => paths,
        }
    }

    pub fn types(&self) -> &[DataType] {
        match self {
            DataSet::RowKeyed { types, .. }
            | DataSet::ColumnKeyed { types, .. }
            | DataSet::Keyless { types, .. } => types,
        }
    }

    pub fn keys(&self) -> Option<&[i64]> {
        match self {
            DataSet::RowKeyed { keys, .. } | DataSet::ColumnKeyed { keys, .. } => Some(keys),
            DataSet::Keyless { .. } => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            DataSet::RowKeyed { rows, .. } | DataSet::Keyless { rows, .. } => rows.len(),
            DataSet::ColumnKeyed { keys, .. } => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn value(&self, row: usize, column: usize) -> Option<&Value> {
        match self {
            DataSet::RowKeyed { rows, .. } | DataSet::Keyless { rows, .. } => {
                rows.get(row)?.get(column)?.as_ref()
            }
            DataSet::ColumnKeyed { columns, .. } => columns.get(column)?.get(row)?.as_ref(),
        }
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        if index >= self.row_count() {
            return None;
        }
        let key = self.keys().map(|keys| keys[index]);
        let values = (0..self.paths().len())
            .map(|column| self.value(index, column))
            .collect();
        Some(Row { key, values })
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> + '_ {
        (0..self.row_count()).filter_map(move |index| self.row(index))
    }
}

/// Aggregate answer: one dense value per path, optionally paired with a key per path.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateSet {
    pub paths: Vec<String>,
    pub keys: Option<Vec<i64>>,
    pub values: Vec<Value>,
}

/// Decodes row-major buffers; `keys == None` yields `DataSet::Keyless`.
pub fn decode_rows(
    paths: Vec<String>,
    types: Vec<DataType>,
    keys: Option<&[u8]>,
    values_list: &[Vec<u8>],
    bitmap_list: &[Vec<u8>],
) -> Result<DataSet, Error> {
    check_shape(&paths, &types, values_list, bitmap_list)?;
    let keys = keys.map(codec::decode_keys).transpose()?;
    if let Some(keys) = &keys {
        if keys.len() != values_list.len() {
            return Err(mismatch(format!(
                "{} keys for {} value rows",
                keys.len(),
                values_list.len()
            )));
        }
    }

    let rows = values_list
        .iter()
        .zip(bitmap_list)
        .enumerate()
        .map(|(index, (values, bitmap))| {
            decode_row(&types, values, bitmap).map_err(|err| err.with_row(index as u64))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match keys {
        Some(keys) => DataSet::RowKeyed {
            paths,
            types,
            keys,
            rows,
        },
        None => DataSet::Keyless { paths, types, rows },
    })
}

/// Decodes one row: walks `types` in order, reading a value only where the bit is set.
pub fn decode_row(
    types: &[DataType],
    values: &[u8],
    bitmap: &[u8],
) -> Result<Vec<Option<Value>>, Error> {
    let bitmap = NullBitmap::from_bytes(types.len(), bitmap)?;
    let mut reader = ValueReader::new(values);
    let mut row = Vec::with_capacity(types.len());
    for (index, data_type) in types.iter().enumerate() {
        if bitmap.get(index) {
            row.push(Some(reader.next_value(*data_type)?));
        } else {
            row.push(None);
        }
    }
    reader.finish()?;
    Ok(row)
}

/// Raw payload bytes per field (empty for nulls), in type order.
pub fn decode_row_payloads(
    types: &[DataType],
    values: &[u8],
    bitmap: &[u8],
) -> Result<Vec<Vec<u8>>, Error> {
    let bitmap = NullBitmap::from_bytes(types.len(), bitmap)?;
    let mut reader = ValueReader::new(values);
    let mut fields = Vec::with_capacity(types.len());
    for (index, data_type) in types.iter().enumerate() {
        if bitmap.get(index) {
            fields.push(reader.next_payload(*data_type)?.to_vec());
        } else {
            fields.push(Vec::new());
        }
    }
    reader.finish()?;
    Ok(fields)
}

/// Decodes column-major buffers; each bitmap spans the key list.
pub fn decode_columns(
    paths: Vec<String>,
    types: Vec<DataType>,
    keys: &[u8],
    values_list: &[Vec<u8>],
    bitmap_list: &[Vec<u8>],
) -> Result<DataSet, Error> {
    check_shape(&paths, &types, values_list, bitmap_list)?;
    if values_list.len() != paths.len() {
        return Err(mismatch(format!(
            "{} value columns for {} paths",
            values_list.len(),
            paths.len()
        )));
    }
    let keys = codec::decode_keys(keys)?;

    let mut columns = Vec::with_capacity(paths.len());
    for ((values, bitmap), data_type) in values_list.iter().zip(bitmap_list).zip(&types) {
        let bitmap = NullBitmap::from_bytes(keys.len(), bitmap)?;
        let mut reader = ValueReader::new(values);
        let mut column = Vec::with_capacity(keys.len());
        for index in 0..keys.len() {
            if bitmap.get(index) {
                column.push(Some(reader.next_value(*data_type)?));
            } else {
                column.push(None);
            }
        }
        reader.finish()?;
        columns.push(column);
    }

    Ok(DataSet::ColumnKeyed {
        paths,
        types,
        keys,
        columns,
    })
}

pub fn decode_aggregate(
    paths: Vec<String>,
    types: &[DataType],
    keys: Option<&[u8]>,
    values: &[u8],
) -> Result<AggregateSet, Error> {
    if paths.len() != types.len() {
        return Err(mismatch(format!(
            "{} paths for {} types",
            paths.len(),
            types.len()
        )));
    }
    let keys = keys.map(codec::decode_keys).transpose()?;
    if let Some(keys) = &keys {
        if keys.len() != paths.len() {
            return Err(mismatch(format!(
                "{} keys for {} aggregated paths",
                keys.len(),
                paths.len()
            )));
        }
    }
    let values = codec::decode_values(values, types)?;
    Ok(AggregateSet {
        paths,
        keys,
        values,
    })
}

fn check_shape(
    paths: &[String],
    types: &[DataType],
    values_list: &[Vec<u8>],
    bitmap_list: &[Vec<u8>],
) -> Result<(), Error> {
    if paths.len() != types.len() {
        return Err(mismatch(format!(
            "{} paths for {} types",
            paths.len(),
            types.len()
        )));
    }
    if values_list.len() != bitmap_list.len() {
        return Err(mismatch(format!(
            "{} value buffers for {} bitmaps",
            values_list.len(),
            bitmap_list.len()
        )));
    }
    Ok(())
}

fn mismatch(message: String) -> Error {
    Error::new(ErrorKind::ProtocolDecode).with_message(message)
}
