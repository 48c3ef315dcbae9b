//! Purpose: Write statement results to local files as CSV or per-column byte streams.
//! Exports: `ExportCsvOptions`, `ExportReport`, `export_csv`, `export_csv_file`, `export_stream`.
//! Role: Drains a `StreamCursor`; `Session::export_to_file` follows server export directives.
//! Invariants: Rows are consumed in cursor order, at most one batch buffered at a time.
//! Invariants: Existing target files are replaced, never appended to across runs.
#![allow(clippy::result_large_err)]

use super::session::Session;
use super::transport::Transport;
use crate::core::cursor::{ResultSource, StreamCursor};
use crate::core::error::{Error, ErrorKind};
use crate::core::types::Value;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

type ApiResult<T> = Result<T, Error>;

pub const EXPORT_BATCH_ROWS: usize = 1000;
pub const KEY_COLUMN: &str = "key";
const NULL_TEXT: &str = "null";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExportCsvOptions {
    pub header: bool,
    /// Render the key column as RFC 3339, reading keys as seconds since the epoch.
    pub key_as_time: bool,
}

impl Default for ExportCsvOptions {
    fn default() -> Self {
        Self {
            header: true,
            key_as_time: false,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExportReport {
    pub rows: u64,
    pub csv_file: Option<PathBuf>,
    pub stream_files: Vec<PathBuf>,
}

/// Writes every remaining row as CSV. Returns the number of data rows written.
pub fn export_csv<S, W>(
    cursor: &mut StreamCursor<'_, S>,
    writer: W,
    options: ExportCsvOptions,
) -> ApiResult<u64>
where
    S: ResultSource,
    W: Write,
{
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    let columns = cursor.columns().to_vec();
    let has_key = columns.first().is_some_and(|name| name == KEY_COLUMN);
    if options.header {
        csv_writer.write_record(&columns).map_err(csv_error)?;
    }

    let mut rows = 0u64;
    let mut batch_index = 0usize;
    loop {
        let mut batch = Vec::with_capacity(EXPORT_BATCH_ROWS.min(1024));
        while batch.len() < EXPORT_BATCH_ROWS {
            match cursor.next()? {
                Some(row) => batch.push(row),
                None => break,
            }
        }
        if batch.is_empty() {
            break;
        }
        batch_index += 1;
        let full = batch.len() == EXPORT_BATCH_ROWS;
        for row in &batch {
            let record: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(index, value)| {
                    render_field(value.as_ref(), has_key && index == 0 && options.key_as_time)
                })
                .collect();
            csv_writer.write_record(&record).map_err(csv_error)?;
        }
        rows += batch.len() as u64;
        csv_writer.flush().map_err(io_error)?;
        tracing::debug!(batch = batch_index, rows, "wrote csv batch");
        if !full {
            break;
        }
    }
    csv_writer.flush().map_err(io_error)?;
    Ok(rows)
}

/// Replaces `path` with a CSV export. The file name must end in `.csv`.
pub fn export_csv_file<S: ResultSource>(
    cursor: &mut StreamCursor<'_, S>,
    path: &Path,
    options: ExportCsvOptions,
) -> ApiResult<u64> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("export file name must end with .csv")
            .with_path(path));
    }
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| io_error(err).with_path(parent))?;
    }
    let file = File::create(path).map_err(|err| io_error(err).with_path(path))?;
    let rows = export_csv(cursor, BufWriter::new(file), options)
        .map_err(|err| if err.path().is_none() { err.with_path(path) } else { err })?;
    tracing::info!(rows, path = %path.display(), "csv export finished");
    Ok(rows)
}

/// Writes each non-key column's raw payloads to its own file under `dir`.
/// Repeated column names get `(1)`, `(2)`, ... suffixes.
pub fn export_stream<S: ResultSource>(
    cursor: &mut StreamCursor<'_, S>,
    dir: &Path,
) -> ApiResult<Vec<PathBuf>> {
    if dir.exists() && !dir.is_dir() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("export stream target is not a directory")
            .with_path(dir));
    }
    fs::create_dir_all(dir).map_err(|err| io_error(err).with_path(dir))?;

    let columns = cursor.columns().to_vec();
    let has_key = columns.first().is_some_and(|name| name == KEY_COLUMN);
    let names = if has_key { &columns[1..] } else { &columns[..] };
    let targets = stream_targets(dir, names);

    let mut writers = Vec::with_capacity(targets.len());
    for target in &targets {
        let file = File::create(target).map_err(|err| io_error(err).with_path(target))?;
        writers.push(BufWriter::new(file));
    }

    let mut rows = 0u64;
    while let Some(fields) = cursor.next_row_bytes(has_key)? {
        for (index, field) in fields.iter().enumerate() {
            let Some(writer) = writers.get_mut(index) else {
                return Err(Error::new(ErrorKind::ProtocolDecode)
                    .with_message(format!("row has {} fields for {} columns", fields.len(), targets.len()))
                    .with_row(rows));
            };
            writer
                .write_all(field)
                .map_err(|err| io_error(err).with_path(&targets[index]))?;
        }
        rows += 1;
    }
    for (writer, target) in writers.iter_mut().zip(&targets) {
        writer.flush().map_err(|err| io_error(err).with_path(target))?;
    }
    tracing::info!(files = targets.len(), rows, dir = %dir.display(), "stream export finished");
    Ok(targets)
}

impl<T: Transport> Session<T> {
    /// Runs `statement` and writes its rows wherever the server's export directive points.
    /// A stream directory takes precedence over a CSV target.
    pub fn export_to_file(&self, statement: &str) -> ApiResult<ExportReport> {
        let mut run = self.run_statement(statement, None)?;
        let mut report = ExportReport::default();

        let result = if let Some(dir) = run.export_stream_dir.take() {
            export_stream(&mut run.cursor, Path::new(&dir)).map(|files| {
                report.stream_files = files;
            })
        } else if let Some(directive) = run.export_csv.take() {
            let path = PathBuf::from(directive.export_csv_path);
            let options = ExportCsvOptions {
                header: directive.is_export_header,
                key_as_time: false,
            };
            export_csv_file(&mut run.cursor, &path, options).map(|rows| {
                report.rows = rows;
                report.csv_file = Some(path);
            })
        } else {
            Err(Error::new(ErrorKind::Usage)
                .with_message("statement carries no export directive")
                .with_hint("use an `INTO OUTFILE` statement"))
        };

        let closed = run.cursor.close();
        result?;
        closed?;
        Ok(report)
    }
}

/// One file per column. Repeated names get `(n)` suffixes that never collide
/// with another column's name.
fn stream_targets(dir: &Path, names: &[String]) -> Vec<PathBuf> {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut first_seen: HashSet<&str> = HashSet::new();
    let mut next_suffix: HashMap<&str, usize> = HashMap::new();
    names
        .iter()
        .map(|name| {
            if first_seen.insert(name.as_str()) {
                return dir.join(name);
            }
            let suffix = next_suffix.entry(name.as_str()).or_insert(1);
            let mut candidate = format!("{name}({suffix})");
            while taken.contains(&candidate) {
                *suffix += 1;
                candidate = format!("{name}({suffix})");
            }
            *suffix += 1;
            taken.insert(candidate.clone());
            dir.join(candidate)
        })
        .collect()
}

fn render_field(value: Option<&Value>, key_as_time: bool) -> String {
    match value {
        None => NULL_TEXT.to_string(),
        Some(Value::Long(key)) if key_as_time => render_key_time(*key),
        Some(value) => value.to_text(),
    }
}

fn render_key_time(key: i64) -> String {
    OffsetDateTime::from_unix_timestamp(key)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| key.to_string())
}

fn csv_error(err: csv::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write csv record")
        .with_source(err)
}

fn io_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write export file")
        .with_source(err)
}
