//! Purpose: Put write batches into the server's canonical order and encode them.
//! Exports: `RowBatch`, `ColumnBatch`, `EncodedBatch`, `Orientation`, `normalize_rows`, `normalize_columns`.
//! Role: Write-path gate between caller data and the wire; pure, no I/O.
//! Invariants: Output keys are non-decreasing; duplicate keys are kept, never merged.
//! Invariants: Output paths are strictly increasing; values, types and tags follow the same permutation.
//! Invariants: Every structural check runs before the first byte is encoded.
use crate::core::codec;
use crate::core::error::{Error, malformed};
use crate::core::types::{DataType, Tags, Value};
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Orientation {
    Row,
    Column,
}

/// Row-major batch: `rows[i][j]` is the value of `paths[j]` at `keys[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowBatch {
    pub paths: Vec<String>,
    pub keys: Vec<i64>,
    pub rows: Vec<Vec<Option<Value>>>,
    pub types: Vec<DataType>,
    pub tags: Option<Vec<Tags>>,
}

/// Column-major batch: `columns[j][i]` is the value of `paths[j]` at `keys[i]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnBatch {
    pub paths: Vec<String>,
    pub keys: Vec<i64>,
    pub columns: Vec<Vec<Option<Value>>>,
    pub types: Vec<DataType>,
    pub tags: Option<Vec<Tags>>,
}

/// Wire-ready batch. `values_list`/`bitmap_list` hold one entry per row
/// (row orientation) or per path (column orientation).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedBatch {
    pub orientation: Orientation,
    pub paths: Vec<String>,
    pub keys: Vec<u8>,
    pub values_list: Vec<Vec<u8>>,
    pub bitmap_list: Vec<Vec<u8>>,
    pub types: Vec<DataType>,
    pub tags: Option<Vec<Tags>>,
}

impl EncodedBatch {
    pub fn key_count(&self) -> usize {
        self.keys.len() / codec::KEY_WIDTH
    }
}

pub fn normalize_rows(batch: RowBatch) -> Result<EncodedBatch, Error> {
    validate_common(&batch.paths, &batch.keys, batch.rows.len(), &batch.types, &batch.tags)?;
    if batch.keys.len() != batch.rows.len() {
        return Err(malformed("the sizes of keys and values should be equal"));
    }
    for (row_index, row) in batch.rows.iter().enumerate() {
        if row.len() != batch.paths.len() {
            return Err(malformed(format!(
                "row {row_index} has {} values for {} paths",
                row.len(),
                batch.paths.len()
            ))
            .with_row(row_index as u64));
        }
        for (value, data_type) in row.iter().zip(&batch.types) {
            check_value_type(value.as_ref(), *data_type, row_index)?;
        }
    }

    let RowBatch {
        paths,
        keys,
        rows,
        types,
        tags,
    } = batch;

    let key_order = stable_order(&keys);
    let path_order = stable_order(&paths);

    let mut sorted_keys = Vec::with_capacity(keys.len());
    let mut values_list = Vec::with_capacity(keys.len());
    let mut bitmap_list = Vec::with_capacity(keys.len());
    let sorted_types = permute(&types, &path_order);

    for &row_index in &key_order {
        sorted_keys.push(keys[row_index]);
        let row = &rows[row_index];
        let entries = path_order
            .iter()
            .map(|&path_index| row[path_index].as_ref())
            .zip(sorted_types.iter().copied());
        let (buf, bitmap) = codec::encode_present(entries, path_order.len())?;
        values_list.push(buf);
        bitmap_list.push(bitmap.into_bytes());
    }

    Ok(EncodedBatch {
        orientation: Orientation::Row,
        paths: permute(&paths, &path_order),
        keys: codec::encode_keys(&sorted_keys),
        values_list,
        bitmap_list,
        types: sorted_types,
        tags: tags.map(|tags| permute(&tags, &path_order)),
    })
}

pub fn normalize_columns(batch: ColumnBatch) -> Result<EncodedBatch, Error> {
    validate_common(&batch.paths, &batch.keys, batch.columns.len(), &batch.types, &batch.tags)?;
    if batch.paths.len() != batch.columns.len() {
        return Err(malformed("the sizes of paths and values should be equal"));
    }
    for (column_index, (column, data_type)) in batch.columns.iter().zip(&batch.types).enumerate() {
        if column.len() != batch.keys.len() {
            return Err(malformed(format!(
                "column {} has {} values for {} keys",
                batch.paths[column_index],
                column.len(),
                batch.keys.len()
            )));
        }
        for (row_index, value) in column.iter().enumerate() {
            check_value_type(value.as_ref(), *data_type, row_index)?;
        }
    }

    let ColumnBatch {
        paths,
        keys,
        columns,
        types,
        tags,
    } = batch;

    let key_order = stable_order(&keys);
    let path_order = stable_order(&paths);
    let sorted_keys = permute(&keys, &key_order);

    let mut values_list = Vec::with_capacity(paths.len());
    let mut bitmap_list = Vec::with_capacity(paths.len());
    for &path_index in &path_order {
        let column = &columns[path_index];
        let data_type = types[path_index];
        let entries = key_order
            .iter()
            .map(|&row_index| (column[row_index].as_ref(), data_type));
        let (buf, bitmap) = codec::encode_present(entries, key_order.len())?;
        values_list.push(buf);
        bitmap_list.push(bitmap.into_bytes());
    }

    Ok(EncodedBatch {
        orientation: Orientation::Column,
        paths: permute(&paths, &path_order),
        keys: codec::encode_keys(&sorted_keys),
        values_list,
        bitmap_list,
        types: permute(&types, &path_order),
        tags: tags.map(|tags| permute(&tags, &path_order)),
    })
}

fn validate_common(
    paths: &[String],
    keys: &[i64],
    value_count: usize,
    types: &[DataType],
    tags: &Option<Vec<Tags>>,
) -> Result<(), Error> {
    if paths.is_empty() || keys.is_empty() || value_count == 0 || types.is_empty() {
        return Err(malformed("invalid insert request: paths, keys, values and types must be non-empty"));
    }
    if paths.len() != types.len() {
        return Err(malformed("the sizes of paths and types should be equal"));
    }
    if let Some(tags) = tags {
        if tags.len() != paths.len() {
            return Err(malformed("the sizes of paths and tags should be equal"));
        }
    }
    let mut seen = HashSet::with_capacity(paths.len());
    for path in paths {
        if !seen.insert(path.as_str()) {
            return Err(malformed(format!("duplicate path {path}")));
        }
    }
    Ok(())
}

fn check_value_type(value: Option<&Value>, data_type: DataType, row: usize) -> Result<(), Error> {
    match value {
        Some(value) if value.data_type() != data_type => Err(malformed(format!(
            "{} value declared as {data_type}",
            value.data_type()
        ))
        .with_row(row as u64)),
        _ => Ok(()),
    }
}

/// Indices of `items` in ascending order; ties keep their input order.
fn stable_order<T: Ord>(items: &[T]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|a, b| items[*a].cmp(&items[*b]));
    order
}

fn permute<T: Clone>(items: &[T], order: &[usize]) -> Vec<T> {
    order.iter().map(|&index| items[index].clone()).collect()
}
