//! Purpose: Public client API for talking to an IGinX server.
//! Exports: `Session`, `HttpTransport`, the `Transport` seam, RPC envelopes, export/load helpers.
//! Role: Stable surface used by the `iginx` CLI and by embedding applications.
//! Invariants: Wire encoding stays in `core`; this layer only moves encoded buffers.

mod export;
mod load;
mod remote;
pub mod rpc;
mod session;
mod transport;

pub use crate::core::cursor::{
    CursorColumns, CursorState, FetchedPage, ResultPage, ResultSource, StreamCursor,
};
pub use crate::core::decode::{AggregateSet, DataSet, Row};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::normalize::{
    ColumnBatch, EncodedBatch, Orientation, RowBatch, normalize_columns, normalize_rows,
};
pub use crate::core::types::{DataType, MAX_KEY, MIN_KEY, Tags, Value};
pub use export::{
    EXPORT_BATCH_ROWS, ExportCsvOptions, ExportReport, KEY_COLUMN, export_csv, export_csv_file,
    export_stream,
};
pub use load::{DEFAULT_CHUNK_SIZE, data_path_for, load_directory, load_file_by_chunks};
pub use remote::{DEFAULT_URL, HttpTransport};
pub use rpc::{AggregateType, Status};
pub use session::{
    DEFAULT_FETCH_SIZE, DEFAULT_PASSWORD, DEFAULT_USER, Session, SessionOptions,
    merge_and_sort_paths,
};
pub use transport::Transport;
