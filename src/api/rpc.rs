//! Purpose: Request/response envelopes exchanged with an IGinX server.
//! Exports: One `*Req`/`*Resp` pair per RPC plus `Status`, `RawDataSet`, `AggregateType`.
//! Role: Plain data carried by a `Transport`; no behaviour beyond status checks.
//! Invariants: Byte buffers travel as produced by the codec (keys big-endian i64s).
//! Invariants: Field names are camelCase on the wire.
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{DataType, Tags};
use serde::{Deserialize, Serialize};

pub const SUCCESS_CODE: i32 = 200;

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: SUCCESS_CODE,
            message: None,
        }
    }

    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Maps any non-success code to `ServerStatus`, keeping the server message verbatim.
    pub fn verify(&self) -> Result<(), Error> {
        if self.is_success() {
            return Ok(());
        }
        let message = self.message.clone().unwrap_or_default();
        Err(Error::new(ErrorKind::ServerStatus)
            .with_message(message)
            .with_status_code(self.code))
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateType {
    Max,
    Min,
    Sum,
    Count,
    Avg,
    FirstValue,
    LastValue,
    First,
    Last,
}

impl AggregateType {
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_ascii_uppercase();
        Some(match upper.as_str() {
            "MAX" => AggregateType::Max,
            "MIN" => AggregateType::Min,
            "SUM" => AggregateType::Sum,
            "COUNT" => AggregateType::Count,
            "AVG" => AggregateType::Avg,
            "FIRST_VALUE" => AggregateType::FirstValue,
            "LAST_VALUE" => AggregateType::LastValue,
            "FIRST" => AggregateType::First,
            "LAST" => AggregateType::Last,
            _ => return None,
        })
    }
}

/// Row-major result buffers; `keys` is absent for keyless results.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDataSet {
    #[serde(default)]
    pub keys: Option<Vec<u8>>,
    #[serde(default)]
    pub values_list: Vec<Vec<u8>>,
    #[serde(default)]
    pub bitmap_list: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResp {
    pub status: Status,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionReq {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionResp {
    pub status: Status,
    #[serde(default)]
    pub session_id: i64,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseSessionReq {
    pub session_id: i64,
}

/// Shared by the four insert RPCs; `aligned == false` selects the non-aligned variant.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertRecordsReq {
    pub session_id: i64,
    pub paths: Vec<String>,
    pub keys: Vec<u8>,
    pub values_list: Vec<Vec<u8>>,
    pub bitmap_list: Vec<Vec<u8>>,
    pub data_type_list: Vec<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags_list: Option<Vec<Tags>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_precision: Option<String>,
    pub aligned: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataReq {
    pub session_id: i64,
    pub paths: Vec<String>,
    pub start_key: i64,
    pub end_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_precision: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastQueryReq {
    pub session_id: i64,
    pub paths: Vec<String>,
    pub start_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_precision: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownsampleQueryReq {
    pub session_id: i64,
    pub paths: Vec<String>,
    pub start_key: i64,
    pub end_key: i64,
    pub aggregate_type: AggregateType,
    pub precision: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_precision: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateQueryReq {
    pub session_id: i64,
    pub paths: Vec<String>,
    pub start_key: i64,
    pub end_key: i64,
    pub aggregate_type: AggregateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_precision: Option<String>,
}

/// Answer to query, last and downsample requests.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDataResp {
    pub status: Status,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub data_type_list: Vec<DataType>,
    #[serde(default)]
    pub query_data_set: Option<RawDataSet>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateQueryResp {
    pub status: Status,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub data_type_list: Vec<DataType>,
    #[serde(default)]
    pub keys: Option<Vec<u8>>,
    #[serde(default)]
    pub values_list: Vec<u8>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteDataReq {
    pub session_id: i64,
    pub paths: Vec<String>,
    pub start_key: i64,
    pub end_key: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_precision: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStatementReq {
    pub session_id: i64,
    pub statement: String,
    pub fetch_size: i32,
}

/// Server-side instruction to write a statement's rows to a CSV file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCsv {
    pub export_csv_path: String,
    #[serde(default)]
    pub is_export_header: bool,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStatementResp {
    pub status: Status,
    #[serde(default)]
    pub query_id: i64,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data_type_list: Vec<DataType>,
    #[serde(default)]
    pub query_data_set: Option<RawDataSet>,
    #[serde(default)]
    pub export_stream_dir: Option<String>,
    #[serde(default)]
    pub export_csv: Option<ExportCsv>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResultsReq {
    pub session_id: i64,
    pub query_id: i64,
    pub fetch_size: i32,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResultsResp {
    pub status: Status,
    #[serde(default)]
    pub has_more_results: bool,
    #[serde(default)]
    pub query_data_set: Option<RawDataSet>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseStatementReq {
    pub session_id: i64,
    pub query_id: i64,
}
