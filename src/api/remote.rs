//! Purpose: Carry IGinX RPCs over HTTP as JSON envelopes.
//! Exports: `HttpTransport`.
//! Role: Default `Transport` used by the CLI; one `POST <base>/v1/<rpc>` per call.
//! Invariants: Connection failures map to `Transport`; error envelopes map to `ServerStatus`.
//! Invariants: Base URLs carry no path; RPC names are appended as path segments.
#![allow(clippy::result_large_err)]

use super::rpc::{
    AggregateQueryReq, AggregateQueryResp, CloseSessionReq, CloseStatementReq, DeleteDataReq,
    DownsampleQueryReq, ExecuteStatementReq, ExecuteStatementResp, FetchResultsReq,
    FetchResultsResp, InsertRecordsReq, LastQueryReq, OpenSessionReq, OpenSessionResp,
    QueryDataReq, QueryDataResp, Status, StatusResp,
};
use super::transport::Transport;
use crate::core::error::{Error, ErrorKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

type ApiResult<T> = Result<T, Error>;

pub const DEFAULT_URL: &str = "http://127.0.0.1:6888";

#[derive(Clone)]
pub struct HttpTransport {
    base_url: Url,
    token: Option<String>,
    timeout: Option<Duration>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    code: Option<i32>,
    message: Option<String>,
    hint: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> ApiResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            token: None,
            timeout: None,
            tls_config: None,
            agent: ureq::AgentBuilder::new().build(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self.rebuild_agent();
        self
    }

    pub fn with_tls_ca_file(mut self, path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let cert_bytes = std::fs::read(path).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("failed to read TLS CA/certificate file")
                .with_path(path)
                .with_source(err)
        })?;
        let mut cert_reader = Cursor::new(cert_bytes);
        let certs = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("failed to parse TLS CA/certificate file")
                    .with_path(path)
                    .with_source(err)
            })?;
        if certs.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no certificates")
                .with_path(path));
        }

        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let mut root_store = rustls::RootCertStore::empty();
        let (added, _) = root_store.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("TLS CA/certificate file contains no parsable certificates")
                .with_path(path));
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        self.tls_config = Some(Arc::new(tls_config));
        self.rebuild_agent();
        Ok(self)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn rebuild_agent(&mut self) {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(tls_config) = &self.tls_config {
            builder = builder.tls_config(tls_config.clone());
        }
        self.agent = builder.build();
    }

    fn call<T, R>(&self, rpc: &str, body: &T) -> ApiResult<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let url = build_url(&self.base_url, &["v1", rpc])?;
        let payload = serde_json::to_string(body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;
        tracing::debug!(rpc, bytes = payload.len(), "sending request");

        let mut request = self
            .agent
            .post(url.as_str())
            .set("Accept", "application/json")
            .set("Content-Type", "application/json");
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }

        match request.send_string(&payload) {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(code, resp)) => Err(parse_error_response(code, resp)),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Transport)
                .with_message(format!("{rpc} request failed"))
                .with_source(err)),
        }
    }

    fn call_status<T: Serialize>(&self, rpc: &str, body: &T) -> ApiResult<Status> {
        let envelope: StatusResp = self.call(rpc, body)?;
        Ok(envelope.status)
    }
}

impl Transport for HttpTransport {
    fn open_session(&self, req: &OpenSessionReq) -> ApiResult<OpenSessionResp> {
        self.call("openSession", req)
    }

    fn close_session(&self, req: &CloseSessionReq) -> ApiResult<Status> {
        self.call_status("closeSession", req)
    }

    fn insert_row_records(&self, req: &InsertRecordsReq) -> ApiResult<Status> {
        let rpc = if req.aligned {
            "insertRowRecords"
        } else {
            "insertNonAlignedRowRecords"
        };
        self.call_status(rpc, req)
    }

    fn insert_column_records(&self, req: &InsertRecordsReq) -> ApiResult<Status> {
        let rpc = if req.aligned {
            "insertColumnRecords"
        } else {
            "insertNonAlignedColumnRecords"
        };
        self.call_status(rpc, req)
    }

    fn query_data(&self, req: &QueryDataReq) -> ApiResult<QueryDataResp> {
        self.call("queryData", req)
    }

    fn last_query(&self, req: &LastQueryReq) -> ApiResult<QueryDataResp> {
        self.call("lastQuery", req)
    }

    fn downsample_query(&self, req: &DownsampleQueryReq) -> ApiResult<QueryDataResp> {
        self.call("downsampleQuery", req)
    }

    fn aggregate_query(&self, req: &AggregateQueryReq) -> ApiResult<AggregateQueryResp> {
        self.call("aggregateQuery", req)
    }

    fn delete_data(&self, req: &DeleteDataReq) -> ApiResult<Status> {
        self.call_status("deleteDataInColumns", req)
    }

    fn execute_statement(&self, req: &ExecuteStatementReq) -> ApiResult<ExecuteStatementResp> {
        self.call("executeStatement", req)
    }

    fn fetch_results(&self, req: &FetchResultsReq) -> ApiResult<FetchResultsResp> {
        self.call("fetchResults", req)
    }

    fn close_statement(&self, req: &CloseStatementReq) -> ApiResult<Status> {
        self.call_status("closeStatement", req)
    }
}

fn normalize_base_url(raw: String) -> ApiResult<Url> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid server url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(
            Error::new(ErrorKind::Usage).with_message("server url must use http or https scheme")
        );
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(Error::new(ErrorKind::Usage).with_message("server url must not include a path"));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> ApiResult<Url> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("server url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> ApiResult<R>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Transport)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::ProtocolDecode)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(status, envelope.error);
    }
    Error::new(ErrorKind::ServerStatus)
        .with_message(format!("server returned HTTP {status}"))
        .with_status_code(i32::from(status))
}

fn error_from_remote(status: u16, remote: RemoteError) -> Error {
    let mut err = Error::new(ErrorKind::ServerStatus)
        .with_status_code(remote.code.unwrap_or(i32::from(status)));
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(hint) = remote.hint {
        err = err.with_hint(hint);
    }
    err
}

#[cfg(test)]
mod tests {
    use super::{HttpTransport, RemoteError, build_url, error_from_remote, normalize_base_url};
    use crate::core::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn normalize_base_url_keeps_host_and_port() {
        let url = normalize_base_url("http://localhost:6888".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://localhost:6888/");
    }

    #[test]
    fn normalize_base_url_rejects_paths_and_schemes() {
        let err = normalize_base_url("http://localhost:6888/api".to_string()).expect_err("path");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = normalize_base_url("ftp://localhost".to_string()).expect_err("scheme");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = normalize_base_url("not a url".to_string()).expect_err("parse");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn rpc_urls_live_under_v1() {
        let base = normalize_base_url("https://db.example:6888".to_string()).expect("url");
        let url = build_url(&base, &["v1", "fetchResults"]).expect("build");
        assert_eq!(url.as_str(), "https://db.example:6888/v1/fetchResults");
    }

    #[test]
    fn error_envelope_maps_to_server_status() {
        let err = error_from_remote(
            500,
            RemoteError {
                code: Some(301),
                message: Some("unknown path".into()),
                hint: None,
            },
        );
        assert_eq!(err.kind(), ErrorKind::ServerStatus);
        assert_eq!(err.status_code(), Some(301));
        assert_eq!(err.message(), Some("unknown path"));

        let err = error_from_remote(503, RemoteError {
            code: None,
            message: None,
            hint: Some("retry later".into()),
        });
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.hint(), Some("retry later"));
    }

    #[test]
    fn missing_ca_file_is_usage_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = HttpTransport::new("https://localhost:6888")
            .expect("transport")
            .with_timeout(Duration::from_millis(50))
            .with_tls_ca_file(dir.path().join("missing.pem"))
            .err()
            .expect("missing file");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn ca_file_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, "not a certificate\n").expect("write");
        let err = HttpTransport::new("https://localhost:6888")
            .expect("transport")
            .with_tls_ca_file(&path)
            .err()
            .expect("no certs");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
