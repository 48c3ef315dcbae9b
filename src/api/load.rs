// Bulk file loading: each file becomes one BINARY path, one chunk per key.
#![allow(clippy::result_large_err)]

use super::session::Session;
use super::transport::Transport;
use crate::core::error::{Error, ErrorKind, malformed};
use crate::core::normalize::RowBatch;
use crate::core::types::{DataType, Value};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;

const MIB: u64 = 1024 * 1024;

/// Inserts `path` as consecutive chunks keyed 0, 1, 2, ... Returns the chunk count.
pub fn load_file_by_chunks<T: Transport>(
    session: &Session<T>,
    path: &Path,
    chunk_size: usize,
) -> ApiResult<u64> {
    if chunk_size == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("chunk size must be positive"));
    }
    let data_path = data_path_for(path)?;
    let metadata = fs::metadata(path).map_err(|err| io_error(err, path))?;
    let step = log_step(metadata.len());
    let file = File::open(path).map_err(|err| io_error(err, path))?;
    let mut reader = BufReader::new(file);

    let mut index = 0u64;
    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        (&mut reader)
            .take(chunk_size as u64)
            .read_to_end(&mut chunk)
            .map_err(|err| io_error(err, path))?;
        if chunk.is_empty() {
            break;
        }
        if index % step == 0 {
            tracing::info!(chunk = index, path = %data_path, "loading file chunk");
        }
        let key = i64::try_from(index)
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("chunk index overflow"))?;
        session.insert_row_records(
            RowBatch {
                paths: vec![data_path.clone()],
                keys: vec![key],
                rows: vec![vec![Some(Value::Binary(chunk))]],
                types: vec![DataType::Binary],
                tags: None,
            },
            None,
        )?;
        index += 1;
    }
    Ok(index)
}

/// Loads every regular file directly under `dir`, in name order.
pub fn load_directory<T: Transport>(
    session: &Session<T>,
    dir: &Path,
    chunk_size: usize,
) -> ApiResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| io_error(err, dir))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error(err, dir))?;
        let file_type = entry.file_type().map_err(|err| io_error(err, &entry.path()))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    for file in &files {
        let chunks = load_file_by_chunks(session, file, chunk_size)?;
        tracing::info!(path = %file.display(), chunks, "file loaded");
    }
    Ok(files)
}

/// `<parent dir>.<file name>` with `.` in the file name turned into `_` and `-` into `_` everywhere.
pub fn data_path_for(path: &Path) -> ApiResult<String> {
    let absolute = std::path::absolute(path).map_err(|err| io_error(err, path))?;
    let file_name = absolute
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| malformed("load path has no file name").with_path(path))?;
    let dir_name = absolute
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| malformed("load path has no parent directory name").with_path(path))?;
    if file_name.contains('-') || dir_name.contains('-') {
        tracing::warn!(path = %path.display(), "'-' in file or directory name is replaced with '_'");
    }
    Ok(format!(
        "{}.{}",
        dir_name.replace('-', "_"),
        file_name.replace('-', "_").replace('.', "_")
    ))
}

/// Chunks between progress lines: 10 below 100 MiB, 100 below 1 GiB, 1000 above.
fn log_step(file_size: u64) -> u64 {
    if file_size < 100 * MIB {
        10
    } else if file_size < 1024 * MIB {
        100
    } else {
        1000
    }
}

fn io_error(err: std::io::Error, path: &Path) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to read load input")
        .with_path(path)
        .with_source(err)
}

#[cfg(test)]
mod tests {
    use super::{MIB, data_path_for, log_step};
    use std::path::Path;

    #[test]
    fn data_path_uses_parent_and_file_name() {
        let path = data_path_for(Path::new("/data/raw-images/cat.v1.png")).expect("path");
        assert_eq!(path, "raw_images.cat_v1_png");
    }

    #[test]
    fn data_path_without_parent_name_is_malformed() {
        let err = data_path_for(Path::new("/file.bin")).expect_err("no parent");
        assert_eq!(err.kind(), crate::core::error::ErrorKind::MalformedRequest);
    }

    #[test]
    fn log_step_grows_with_file_size() {
        assert_eq!(log_step(0), 10);
        assert_eq!(log_step(100 * MIB - 1), 10);
        assert_eq!(log_step(100 * MIB), 100);
        assert_eq!(log_step(1024 * MIB), 1000);
    }
}
