//! Purpose: Client session over a `Transport`: inserts, reads, deletes and statements.
//! Exports: `Session`, `SessionOptions`, `merge_and_sort_paths`.
//! Role: Glue between the pure codec/normalizer/decoder and the RPC surface.
//! Invariants: Batches are validated and normalized before any request is sent.
//! Invariants: Every non-success status surfaces as `ServerStatus` with the server message.
#![allow(clippy::result_large_err)]

use super::rpc::{
    AggregateQueryReq, AggregateType, CloseSessionReq, CloseStatementReq, DeleteDataReq,
    DownsampleQueryReq, ExecuteStatementReq, ExecuteStatementResp, FetchResultsReq,
    InsertRecordsReq, LastQueryReq, OpenSessionReq, QueryDataReq, QueryDataResp, RawDataSet,
};
use super::transport::Transport;
use crate::core::cursor::{CursorColumns, FetchedPage, ResultPage, ResultSource, StreamCursor};
use crate::core::decode::{AggregateSet, DataSet, decode_aggregate, decode_rows};
use crate::core::error::{Error, ErrorKind, malformed};
use crate::core::normalize::{
    ColumnBatch, EncodedBatch, Orientation, RowBatch, normalize_columns, normalize_rows,
};

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PASSWORD: &str = "root";
pub const DEFAULT_FETCH_SIZE: i32 = i32::MAX;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    pub user: String,
    pub password: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

impl SessionOptions {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

pub struct Session<T: Transport> {
    transport: T,
    session_id: i64,
}

/// A statement cursor plus any export directive the server attached to it.
pub(crate) struct Statement<'a, T: Transport> {
    pub(crate) cursor: StreamCursor<'a, Session<T>>,
    pub(crate) export_stream_dir: Option<String>,
    pub(crate) export_csv: Option<super::rpc::ExportCsv>,
}

impl<T: Transport> Session<T> {
    pub fn open(transport: T, options: SessionOptions) -> ApiResult<Self> {
        let resp = transport.open_session(&OpenSessionReq {
            username: options.user,
            password: options.password,
        })?;
        resp.status.verify()?;
        tracing::debug!(session_id = resp.session_id, "session opened");
        Ok(Self {
            transport,
            session_id: resp.session_id,
        })
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Closes the server session. Failures are logged, never returned.
    pub fn close(self) {
        let result = self
            .transport
            .close_session(&CloseSessionReq {
                session_id: self.session_id,
            })
            .and_then(|status| status.verify());
        match result {
            Ok(()) => tracing::debug!(session_id = self.session_id, "session closed"),
            Err(err) => {
                tracing::warn!(session_id = self.session_id, error = %err, "failed to close session")
            }
        }
    }

    pub fn insert_row_records(&self, batch: RowBatch, time_precision: Option<&str>) -> ApiResult<()> {
        self.insert(normalize_rows(batch)?, true, time_precision)
    }

    pub fn insert_non_aligned_row_records(
        &self,
        batch: RowBatch,
        time_precision: Option<&str>,
    ) -> ApiResult<()> {
        self.insert(normalize_rows(batch)?, false, time_precision)
    }

    pub fn insert_column_records(
        &self,
        batch: ColumnBatch,
        time_precision: Option<&str>,
    ) -> ApiResult<()> {
        self.insert(normalize_columns(batch)?, true, time_precision)
    }

    pub fn insert_non_aligned_column_records(
        &self,
        batch: ColumnBatch,
        time_precision: Option<&str>,
    ) -> ApiResult<()> {
        self.insert(normalize_columns(batch)?, false, time_precision)
    }

    /// Sends an already normalized batch.
    pub fn insert_encoded(
        &self,
        batch: EncodedBatch,
        aligned: bool,
        time_precision: Option<&str>,
    ) -> ApiResult<()> {
        self.insert(batch, aligned, time_precision)
    }

    fn insert(
        &self,
        batch: EncodedBatch,
        aligned: bool,
        time_precision: Option<&str>,
    ) -> ApiResult<()> {
        let time_precision = check_time_precision(time_precision)?;
        let orientation = batch.orientation;
        let key_count = batch.key_count();
        let req = InsertRecordsReq {
            session_id: self.session_id,
            paths: batch.paths,
            keys: batch.keys,
            values_list: batch.values_list,
            bitmap_list: batch.bitmap_list,
            data_type_list: batch.types,
            tags_list: batch.tags,
            time_precision,
            aligned,
        };
        tracing::debug!(
            ?orientation,
            aligned,
            paths = req.paths.len(),
            keys = key_count,
            "inserting records"
        );
        let status = match orientation {
            Orientation::Row => self.transport.insert_row_records(&req)?,
            Orientation::Column => self.transport.insert_column_records(&req)?,
        };
        status.verify()
    }

    pub fn query(&self, paths: &[String], start_key: i64, end_key: i64) -> ApiResult<DataSet> {
        let resp = self.transport.query_data(&QueryDataReq {
            session_id: self.session_id,
            paths: merge_and_sort_paths(paths),
            start_key,
            end_key,
            time_precision: None,
        })?;
        data_set_from_response(resp)
    }

    /// Latest value per path at or after `start_key`; `None` when no paths are given.
    pub fn last_query(&self, paths: &[String], start_key: i64) -> ApiResult<Option<DataSet>> {
        if paths.is_empty() {
            tracing::warn!("last query without paths");
            return Ok(None);
        }
        let resp = self.transport.last_query(&LastQueryReq {
            session_id: self.session_id,
            paths: merge_and_sort_paths(paths),
            start_key,
            time_precision: None,
        })?;
        data_set_from_response(resp).map(Some)
    }

    pub fn downsample_query(
        &self,
        paths: &[String],
        start_key: i64,
        end_key: i64,
        aggregate: AggregateType,
        precision: i64,
    ) -> ApiResult<DataSet> {
        if precision <= 0 {
            return Err(malformed(format!("downsample precision must be positive, got {precision}")));
        }
        let resp = self.transport.downsample_query(&DownsampleQueryReq {
            session_id: self.session_id,
            paths: merge_and_sort_paths(paths),
            start_key,
            end_key,
            aggregate_type: aggregate,
            precision,
            time_precision: None,
        })?;
        data_set_from_response(resp)
    }

    pub fn aggregate_query(
        &self,
        paths: &[String],
        start_key: i64,
        end_key: i64,
        aggregate: AggregateType,
    ) -> ApiResult<AggregateSet> {
        let resp = self.transport.aggregate_query(&AggregateQueryReq {
            session_id: self.session_id,
            paths: merge_and_sort_paths(paths),
            start_key,
            end_key,
            aggregate_type: aggregate,
            time_precision: None,
        })?;
        resp.status.verify()?;
        decode_aggregate(
            resp.paths,
            &resp.data_type_list,
            resp.keys.as_deref(),
            &resp.values_list,
        )
    }

    pub fn delete_data(&self, path: &str, start_key: i64, end_key: i64) -> ApiResult<()> {
        self.batch_delete_data(&[path.to_string()], start_key, end_key)
    }

    pub fn batch_delete_data(&self, paths: &[String], start_key: i64, end_key: i64) -> ApiResult<()> {
        if paths.is_empty() {
            return Err(malformed("delete requires at least one path"));
        }
        let status = self.transport.delete_data(&DeleteDataReq {
            session_id: self.session_id,
            paths: paths.to_vec(),
            start_key,
            end_key,
            time_precision: None,
        })?;
        status.verify()
    }

    /// Runs a statement and returns a cursor over its rows. `None` uses `DEFAULT_FETCH_SIZE`.
    pub fn execute_statement(
        &self,
        statement: &str,
        fetch_size: Option<i32>,
    ) -> ApiResult<StreamCursor<'_, Self>> {
        Ok(self.run_statement(statement, fetch_size)?.cursor)
    }

    pub(crate) fn run_statement(
        &self,
        statement: &str,
        fetch_size: Option<i32>,
    ) -> ApiResult<Statement<'_, T>> {
        let fetch_size = fetch_size.unwrap_or(DEFAULT_FETCH_SIZE);
        if fetch_size <= 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("fetch size must be positive, got {fetch_size}")));
        }
        let resp: ExecuteStatementResp = self.transport.execute_statement(&ExecuteStatementReq {
            session_id: self.session_id,
            statement: statement.to_string(),
            fetch_size,
        })?;
        resp.status.verify()?;
        tracing::debug!(
            query_id = resp.query_id,
            columns = resp.columns.len(),
            "statement executed"
        );

        let first_page = resp.query_data_set.map(page_from_raw);
        let cursor = StreamCursor::new(
            self,
            resp.query_id,
            CursorColumns {
                names: resp.columns,
                types: resp.data_type_list,
            },
            fetch_size,
            first_page,
        )?;
        Ok(Statement {
            cursor,
            export_stream_dir: resp.export_stream_dir.filter(|dir| !dir.is_empty()),
            export_csv: resp.export_csv,
        })
    }
}

impl<T: Transport> ResultSource for Session<T> {
    fn fetch(&self, query_id: i64, fetch_size: i32) -> ApiResult<FetchedPage> {
        let resp = self.transport.fetch_results(&FetchResultsReq {
            session_id: self.session_id,
            query_id,
            fetch_size,
        })?;
        resp.status.verify()?;
        Ok(FetchedPage {
            has_more: resp.has_more_results,
            page: resp.query_data_set.map(page_from_raw),
        })
    }

    fn close(&self, query_id: i64) -> ApiResult<()> {
        self.transport
            .close_statement(&CloseStatementReq {
                session_id: self.session_id,
                query_id,
            })?
            .verify()
    }
}

/// Collapses query paths: `*` alone wins, wildcard prefixes absorb the concrete
/// paths they cover, and the result is sorted.
pub fn merge_and_sort_paths(paths: &[String]) -> Vec<String> {
    if paths.iter().any(|path| path == "*") {
        return vec!["*".to_string()];
    }
    let prefixes: Vec<&str> = paths
        .iter()
        .filter_map(|path| path.find('*').map(|index| &path[..index]))
        .collect();

    let mut merged: Vec<String> = paths
        .iter()
        .filter(|path| {
            path.contains('*') || !prefixes.iter().any(|prefix| path.starts_with(prefix))
        })
        .cloned()
        .collect();
    merged.sort();
    merged
}

fn check_time_precision(time_precision: Option<&str>) -> ApiResult<Option<String>> {
    match time_precision {
        None => Ok(None),
        Some(precision) if precision.trim().is_empty() => {
            Err(malformed("time precision must not be empty"))
        }
        Some(precision) => Ok(Some(precision.to_string())),
    }
}

fn page_from_raw(raw: RawDataSet) -> ResultPage {
    ResultPage {
        values_list: raw.values_list,
        bitmap_list: raw.bitmap_list,
    }
}

fn data_set_from_response(resp: QueryDataResp) -> ApiResult<DataSet> {
    resp.status.verify()?;
    let raw = resp.query_data_set.unwrap_or_else(|| RawDataSet {
        keys: Some(Vec::new()),
        ..RawDataSet::default()
    });
    decode_rows(
        resp.paths,
        resp.data_type_list,
        raw.keys.as_deref(),
        &raw.values_list,
        &raw.bitmap_list,
    )
}
