// RPC seam between a `Session` and whatever carries requests to the server.
use super::rpc::{
    AggregateQueryReq, AggregateQueryResp, CloseSessionReq, CloseStatementReq, DeleteDataReq,
    DownsampleQueryReq, ExecuteStatementReq, ExecuteStatementResp, FetchResultsReq,
    FetchResultsResp, InsertRecordsReq, LastQueryReq, OpenSessionReq, OpenSessionResp,
    QueryDataReq, QueryDataResp, Status,
};
use crate::core::error::Error;

/// Blocking request/response calls. Implementations report connection-level
/// failures as `Transport` errors and hand back server statuses untouched.
pub trait Transport {
    fn open_session(&self, req: &OpenSessionReq) -> Result<OpenSessionResp, Error>;
    fn close_session(&self, req: &CloseSessionReq) -> Result<Status, Error>;
    fn insert_row_records(&self, req: &InsertRecordsReq) -> Result<Status, Error>;
    fn insert_column_records(&self, req: &InsertRecordsReq) -> Result<Status, Error>;
    fn query_data(&self, req: &QueryDataReq) -> Result<QueryDataResp, Error>;
    fn last_query(&self, req: &LastQueryReq) -> Result<QueryDataResp, Error>;
    fn downsample_query(&self, req: &DownsampleQueryReq) -> Result<QueryDataResp, Error>;
    fn aggregate_query(&self, req: &AggregateQueryReq) -> Result<AggregateQueryResp, Error>;
    fn delete_data(&self, req: &DeleteDataReq) -> Result<Status, Error>;
    fn execute_statement(&self, req: &ExecuteStatementReq) -> Result<ExecuteStatementResp, Error>;
    fn fetch_results(&self, req: &FetchResultsReq) -> Result<FetchResultsResp, Error>;
    fn close_statement(&self, req: &CloseStatementReq) -> Result<Status, Error>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn open_session(&self, req: &OpenSessionReq) -> Result<OpenSessionResp, Error> {
        (**self).open_session(req)
    }

    fn close_session(&self, req: &CloseSessionReq) -> Result<Status, Error> {
        (**self).close_session(req)
    }

    fn insert_row_records(&self, req: &InsertRecordsReq) -> Result<Status, Error> {
        (**self).insert_row_records(req)
    }

    fn insert_column_records(&self, req: &InsertRecordsReq) -> Result<Status, Error> {
        (**self).insert_column_records(req)
    }

    fn query_data(&self, req: &QueryDataReq) -> Result<QueryDataResp, Error> {
        (**self).query_data(req)
    }

    fn last_query(&self, req: &LastQueryReq) -> Result<QueryDataResp, Error> {
        (**self).last_query(req)
    }

    fn downsample_query(&self, req: &DownsampleQueryReq) -> Result<QueryDataResp, Error> {
        (**self).downsample_query(req)
    }

    fn aggregate_query(&self, req: &AggregateQueryReq) -> Result<AggregateQueryResp, Error> {
        (**self).aggregate_query(req)
    }

    fn delete_data(&self, req: &DeleteDataReq) -> Result<Status, Error> {
        (**self).delete_data(req)
    }

    fn execute_statement(&self, req: &ExecuteStatementReq) -> Result<ExecuteStatementResp, Error> {
        (**self).execute_statement(req)
    }

    fn fetch_results(&self, req: &FetchResultsReq) -> Result<FetchResultsResp, Error> {
        (**self).fetch_results(req)
    }

    fn close_statement(&self, req: &CloseStatementReq) -> Result<Status, Error> {
        (**self).close_statement(req)
    }
}
