//! Purpose: Hold top-level CLI command dispatch for `iginx`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: One session per command; it is closed before the command returns.
//! Invariants: Helpers in `main.rs` remain the source of formatting logic.

use super::*;
use iginx_client::api::{
    ExportCsvOptions, Orientation, export_csv_file, export_stream, load_directory, normalize_columns,
    normalize_rows,
};
use std::io::{BufWriter, Write};

pub(super) fn dispatch_command(
    command: Command,
    connect_args: &ConnectArgs,
    color_mode: ColorMode,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "iginx", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Insert {
            data,
            file,
            columns,
            non_aligned,
            time_precision,
            dry_run,
        } => {
            let text = read_insert_input(data, file.as_deref())?;
            let doc = insert_doc::parse_insert_doc(&text)?;
            let batch = if columns {
                normalize_columns(doc.into_columns()?)?
            } else {
                normalize_rows(doc.into_rows()?)?
            };
            let summary = json!({
                "orientation": match batch.orientation {
                    Orientation::Row => "row",
                    Orientation::Column => "column",
                },
                "aligned": !non_aligned,
                "paths": batch.paths,
                "types": batch.types.iter().map(|data_type| data_type.name()).collect::<Vec<_>>(),
                "keys": batch.key_count(),
            });
            if dry_run {
                emit_json(json!({ "dry_run": summary }), color_mode);
                return Ok(RunOutcome::ok());
            }

            let session = connect(connect_args)?;
            let result = session.insert_encoded(batch, !non_aligned, time_precision.as_deref());
            session.close();
            result?;
            emit_json(json!({ "inserted": summary }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Query { paths, start, end } => {
            let session = connect(connect_args)?;
            let result = session.query(&paths, start, end);
            session.close();
            emit_json(data_set_json(&result?), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Last { paths, start } => {
            let session = connect(connect_args)?;
            let result = session.last_query(&paths, start);
            session.close();
            match result? {
                Some(data) => emit_json(data_set_json(&data), color_mode),
                None => emit_json(json!({ "paths": [], "types": [], "rows": [] }), color_mode),
            }
            Ok(RunOutcome::ok())
        }
        Command::Exec { sql, fetch_size } => {
            let session = connect(connect_args)?;
            let result = stream_statement_rows(&session, &sql, fetch_size);
            session.close();
            result?;
            Ok(RunOutcome::ok())
        }
        Command::ExportCsv {
            sql,
            out,
            no_header,
            key_as_time,
            fetch_size,
        } => {
            let session = connect(connect_args)?;
            let options = ExportCsvOptions {
                header: !no_header,
                key_as_time,
            };
            let result = session.execute_statement(&sql, fetch_size).and_then(|mut cursor| {
                let rows = export_csv_file(&mut cursor, &out, options);
                let closed = cursor.close();
                let rows = rows?;
                closed?;
                Ok(rows)
            });
            session.close();
            let rows = result?;
            emit_json(
                json!({ "exported": { "rows": rows, "path": out.display().to_string() } }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::ExportStream {
            sql,
            dir,
            fetch_size,
        } => {
            let session = connect(connect_args)?;
            let result = session.execute_statement(&sql, fetch_size).and_then(|mut cursor| {
                let files = export_stream(&mut cursor, &dir);
                let closed = cursor.close();
                let files = files?;
                closed?;
                Ok(files)
            });
            session.close();
            let files = result?;
            let files = files
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>();
            emit_json(json!({ "exported": { "files": files } }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Export { sql } => {
            let session = connect(connect_args)?;
            let result = session.export_to_file(&sql);
            session.close();
            let report = result?;
            emit_json(
                json!({
                    "exported": {
                        "rows": report.rows,
                        "csv": report.csv_file.map(|path| path.display().to_string()),
                        "files": report
                            .stream_files
                            .iter()
                            .map(|path| path.display().to_string())
                            .collect::<Vec<_>>(),
                    }
                }),
                color_mode,
            );
            Ok(RunOutcome::ok())
        }
        Command::LoadDir { dir, chunk_size } => {
            if !dir.is_dir() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("load-dir target is not a directory")
                    .with_path(&dir));
            }
            let session = connect(connect_args)?;
            let result = load_directory(&session, &dir, chunk_size);
            session.close();
            let files = result?;
            let files = files
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>();
            emit_json(json!({ "loaded": files }), color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Delete { paths, start, end } => {
            let session = connect(connect_args)?;
            let result = session.batch_delete_data(&paths, start, end);
            session.close();
            result?;
            emit_json(json!({ "deleted": { "paths": paths, "start": start, "end": end } }), color_mode);
            Ok(RunOutcome::ok())
        }
    }
}

fn stream_statement_rows(
    session: &Session<HttpTransport>,
    sql: &str,
    fetch_size: Option<i32>,
) -> Result<(), Error> {
    let mut cursor = session.execute_statement(sql, fetch_size)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let result = (|| {
        if cursor.columns().is_empty() {
            return Ok(());
        }
        while let Some(row) = cursor.next()? {
            let values = row.iter().map(|value| value_json(value.as_ref())).collect::<Vec<_>>();
            let line = serde_json::to_string(&values).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode row json")
                    .with_source(err)
            })?;
            writeln!(out, "{line}").map_err(stdout_error)?;
        }
        out.flush().map_err(stdout_error)
    })();
    let closed = cursor.close();
    result?;
    closed
}

fn stdout_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write to stdout")
        .with_source(err)
}
