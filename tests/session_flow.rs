// Session flows against an in-memory server that decodes what it receives.
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};

use iginx_client::api::rpc::{
    AggregateQueryReq, AggregateQueryResp, CloseSessionReq, CloseStatementReq, DeleteDataReq,
    DownsampleQueryReq, ExecuteStatementReq, ExecuteStatementResp, ExportCsv, FetchResultsReq,
    FetchResultsResp, InsertRecordsReq, LastQueryReq, OpenSessionReq, OpenSessionResp,
    QueryDataReq, QueryDataResp, RawDataSet,
};
use iginx_client::api::{
    AggregateType, ColumnBatch, DataSet, DataType, Error, ErrorKind, ExportCsvOptions, MAX_KEY,
    MIN_KEY, RowBatch, Session, SessionOptions, Status, Transport, Value, export_csv_file,
    export_stream, load_directory,
};
use iginx_client::core::codec::{encode_into, encode_keys, encode_present};
use iginx_client::core::decode::{decode_columns, decode_rows};

type Series = BTreeMap<String, (DataType, BTreeMap<i64, Value>)>;

#[derive(Default)]
struct MemoryServer {
    series: RefCell<Series>,
    inserts: RefCell<Vec<InsertRecordsReq>>,
    query_paths: RefCell<Vec<Vec<String>>>,
    fetches: RefCell<Vec<usize>>,
    pending: RefCell<HashMap<i64, VecDeque<(Vec<u8>, Vec<u8>)>>>,
    closed_statements: RefCell<Vec<i64>>,
    closed_sessions: RefCell<Vec<i64>>,
    next_query_id: RefCell<i64>,
    reject_next: RefCell<Option<Status>>,
}

impl MemoryServer {
    fn rejection(&self) -> Option<Status> {
        self.reject_next.borrow_mut().take()
    }

    fn store(&self, data: &DataSet) {
        let mut series = self.series.borrow_mut();
        let keys = data.keys().expect("keyed insert").to_vec();
        for (row, key) in keys.iter().enumerate() {
            for (column, path) in data.paths().iter().enumerate() {
                if let Some(value) = data.value(row, column) {
                    series
                        .entry(path.clone())
                        .or_insert_with(|| (data.types()[column], BTreeMap::new()))
                        .1
                        .insert(*key, value.clone());
                }
            }
        }
    }

    fn matching_paths(&self, patterns: &[String]) -> Vec<String> {
        self.series
            .borrow()
            .keys()
            .filter(|path| {
                patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
                    Some(prefix) => path.starts_with(prefix),
                    None => *path == pattern,
                })
            })
            .cloned()
            .collect()
    }

    fn rows_for(&self, paths: &[String], start: i64, end: i64) -> (Vec<i64>, Vec<Vec<Option<Value>>>) {
        let series = self.series.borrow();
        let mut keys: Vec<i64> = paths
            .iter()
            .flat_map(|path| series[path].1.range(start..end).map(|(key, _)| *key))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        let rows = keys
            .iter()
            .map(|key| {
                paths
                    .iter()
                    .map(|path| series[path].1.get(key).cloned())
                    .collect()
            })
            .collect();
        (keys, rows)
    }

    fn types_for(&self, paths: &[String]) -> Vec<DataType> {
        let series = self.series.borrow();
        paths.iter().map(|path| series[path].0).collect()
    }

    fn encode_rows(types: &[DataType], rows: &[Vec<Option<Value>>]) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        rows.iter()
            .map(|row| {
                let (values, bitmap) = encode_present(
                    row.iter().zip(types).map(|(value, data_type)| (value.as_ref(), *data_type)),
                    types.len(),
                )
                .expect("encode row");
                (values, bitmap.into_bytes())
            })
            .unzip()
    }
}

impl Transport for MemoryServer {
    fn open_session(&self, req: &OpenSessionReq) -> Result<OpenSessionResp, Error> {
        if req.password != "root" {
            return Ok(OpenSessionResp {
                status: Status::failed(401, "wrong password"),
                session_id: 0,
            });
        }
        Ok(OpenSessionResp {
            status: Status::ok(),
            session_id: 42,
        })
    }

    fn close_session(&self, req: &CloseSessionReq) -> Result<Status, Error> {
        self.closed_sessions.borrow_mut().push(req.session_id);
        Ok(Status::ok())
    }

    fn insert_row_records(&self, req: &InsertRecordsReq) -> Result<Status, Error> {
        if let Some(status) = self.rejection() {
            return Ok(status);
        }
        let data = decode_rows(
            req.paths.clone(),
            req.data_type_list.clone(),
            Some(req.keys.as_slice()),
            &req.values_list,
            &req.bitmap_list,
        )?;
        self.store(&data);
        self.inserts.borrow_mut().push(req.clone());
        Ok(Status::ok())
    }

    fn insert_column_records(&self, req: &InsertRecordsReq) -> Result<Status, Error> {
        if let Some(status) = self.rejection() {
            return Ok(status);
        }
        let data = decode_columns(
            req.paths.clone(),
            req.data_type_list.clone(),
            &req.keys,
            &req.values_list,
            &req.bitmap_list,
        )?;
        self.store(&data);
        self.inserts.borrow_mut().push(req.clone());
        Ok(Status::ok())
    }

    fn query_data(&self, req: &QueryDataReq) -> Result<QueryDataResp, Error> {
        self.query_paths.borrow_mut().push(req.paths.clone());
        let paths = self.matching_paths(&req.paths);
        let types = self.types_for(&paths);
        let (keys, rows) = self.rows_for(&paths, req.start_key, req.end_key);
        let (values_list, bitmap_list) = Self::encode_rows(&types, &rows);
        Ok(QueryDataResp {
            status: Status::ok(),
            paths,
            data_type_list: types,
            query_data_set: Some(RawDataSet {
                keys: Some(encode_keys(&keys)),
                values_list,
                bitmap_list,
            }),
        })
    }

    fn last_query(&self, req: &LastQueryReq) -> Result<QueryDataResp, Error> {
        let paths = self.matching_paths(&req.paths);
        let types = self.types_for(&paths);
        let series = self.series.borrow();
        let mut by_key: BTreeMap<i64, Vec<Option<Value>>> = BTreeMap::new();
        for (column, path) in paths.iter().enumerate() {
            if let Some((key, value)) = series[path].1.range(req.start_key..).next_back() {
                by_key.entry(*key).or_insert_with(|| vec![None; paths.len()])[column] =
                    Some(value.clone());
            }
        }
        let keys: Vec<i64> = by_key.keys().copied().collect();
        let rows: Vec<_> = by_key.into_values().collect();
        let (values_list, bitmap_list) = Self::encode_rows(&types, &rows);
        Ok(QueryDataResp {
            status: Status::ok(),
            paths,
            data_type_list: types,
            query_data_set: Some(RawDataSet {
                keys: Some(encode_keys(&keys)),
                values_list,
                bitmap_list,
            }),
        })
    }

    fn downsample_query(&self, _req: &DownsampleQueryReq) -> Result<QueryDataResp, Error> {
        Ok(QueryDataResp {
            status: Status::failed(501, "downsample is not supported by this engine"),
            paths: Vec::new(),
            data_type_list: Vec::new(),
            query_data_set: None,
        })
    }

    fn aggregate_query(&self, req: &AggregateQueryReq) -> Result<AggregateQueryResp, Error> {
        assert_eq!(req.aggregate_type, AggregateType::Count);
        let paths = self.matching_paths(&req.paths);
        let series = self.series.borrow();
        let mut values = Vec::new();
        for path in &paths {
            let count = series[path].1.range(req.start_key..req.end_key).count() as i64;
            encode_into(&Value::Long(count), DataType::Long, &mut values).expect("encode count");
        }
        Ok(AggregateQueryResp {
            status: Status::ok(),
            data_type_list: vec![DataType::Long; paths.len()],
            paths,
            keys: None,
            values_list: values,
        })
    }

    fn delete_data(&self, req: &DeleteDataReq) -> Result<Status, Error> {
        let mut series = self.series.borrow_mut();
        for path in &req.paths {
            if let Some((_, values)) = series.get_mut(path) {
                values.retain(|key, _| *key < req.start_key || *key >= req.end_key);
            }
        }
        Ok(Status::ok())
    }

    fn execute_statement(&self, req: &ExecuteStatementReq) -> Result<ExecuteStatementResp, Error> {
        let mut words = req.statement.split_whitespace();
        let (export_csv, export_stream_dir) = match (words.next(), words.next(), words.next()) {
            (Some("EXPORT"), Some("CSV"), Some(path)) => (
                Some(ExportCsv {
                    export_csv_path: path.to_string(),
                    is_export_header: true,
                }),
                None,
            ),
            (Some("EXPORT"), Some("STREAM"), Some(dir)) => (None, Some(dir.to_string())),
            (Some("SELECT"), ..) => (None, None),
            _ => {
                return Ok(ExecuteStatementResp {
                    status: Status::failed(400, format!("cannot parse: {}", req.statement)),
                    query_id: 0,
                    columns: Vec::new(),
                    data_type_list: Vec::new(),
                    query_data_set: None,
                    export_stream_dir: None,
                    export_csv: None,
                });
            }
        };

        let paths = self.matching_paths(&["*".to_string()]);
        let mut types = vec![DataType::Long];
        types.extend(self.types_for(&paths));
        let (keys, rows) = self.rows_for(&paths, MIN_KEY, MAX_KEY);
        let rows: Vec<Vec<Option<Value>>> = keys
            .iter()
            .zip(rows)
            .map(|(key, row)| {
                let mut full = vec![Some(Value::Long(*key))];
                full.extend(row);
                full
            })
            .collect();
        let (values_list, bitmap_list) = Self::encode_rows(&types, &rows);

        let query_id = {
            let mut next = self.next_query_id.borrow_mut();
            *next += 1;
            *next
        };
        self.pending
            .borrow_mut()
            .insert(query_id, values_list.into_iter().zip(bitmap_list).collect());

        let mut columns = vec!["key".to_string()];
        columns.extend(paths);
        Ok(ExecuteStatementResp {
            status: Status::ok(),
            query_id,
            columns,
            data_type_list: types,
            query_data_set: None,
            export_stream_dir,
            export_csv,
        })
    }

    fn fetch_results(&self, req: &FetchResultsReq) -> Result<FetchResultsResp, Error> {
        let mut pending = self.pending.borrow_mut();
        let rows = pending.get_mut(&req.query_id).expect("known query");
        let take = rows.len().min(req.fetch_size as usize);
        let page: Vec<_> = rows.drain(..take).collect();
        self.fetches.borrow_mut().push(page.len());
        let (values_list, bitmap_list) = page.into_iter().unzip();
        Ok(FetchResultsResp {
            status: Status::ok(),
            has_more_results: !rows.is_empty(),
            query_data_set: Some(RawDataSet {
                keys: None,
                values_list,
                bitmap_list,
            }),
        })
    }

    fn close_statement(&self, req: &CloseStatementReq) -> Result<Status, Error> {
        self.closed_statements.borrow_mut().push(req.query_id);
        self.pending.borrow_mut().remove(&req.query_id);
        Ok(Status::ok())
    }
}

fn open() -> Session<MemoryServer> {
    Session::open(MemoryServer::default(), SessionOptions::default()).expect("open")
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn scenario_b_batch() -> RowBatch {
    RowBatch {
        paths: strings(&["b.b", "a.a"]),
        keys: vec![2, 1],
        rows: vec![
            vec![Some(Value::Long(20)), Some(Value::from("y"))],
            vec![Some(Value::Long(10)), None],
        ],
        types: vec![DataType::Long, DataType::Binary],
        tags: None,
    }
}

fn insert_series(session: &Session<MemoryServer>, path: &str, count: i64) {
    session
        .insert_row_records(
            RowBatch {
                paths: vec![path.to_string()],
                keys: (0..count).collect(),
                rows: (0..count).map(|key| vec![Some(Value::Long(key * 10))]).collect(),
                types: vec![DataType::Long],
                tags: None,
            },
            None,
        )
        .expect("insert");
}

#[test]
fn row_insert_reaches_server_in_canonical_order() {
    let session = open();
    session.insert_row_records(scenario_b_batch(), None).expect("insert");

    let inserts = session.transport().inserts.borrow();
    let sent = &inserts[0];
    assert_eq!(sent.paths, strings(&["a.a", "b.b"]));
    assert_eq!(sent.data_type_list, vec![DataType::Binary, DataType::Long]);
    assert_eq!(sent.keys, encode_keys(&[1, 2]));
    assert!(sent.aligned);
    drop(inserts);

    let data = session
        .query(&strings(&["a.a", "b.b"]), MIN_KEY, MAX_KEY)
        .expect("query");
    assert_eq!(data.keys(), Some(&[1i64, 2][..]));
    assert_eq!(data.value(0, 0), None);
    assert_eq!(data.value(0, 1), Some(&Value::Long(10)));
    assert_eq!(data.value(1, 0), Some(&Value::from("y")));
    assert_eq!(data.value(1, 1), Some(&Value::Long(20)));
}

#[test]
fn non_aligned_column_insert_uses_column_rpc() {
    let session = open();
    session
        .insert_non_aligned_column_records(
            ColumnBatch {
                paths: strings(&["s.z", "s.a"]),
                keys: vec![5, 3],
                columns: vec![
                    vec![Some(Value::Double(0.5)), None],
                    vec![None, Some(Value::Boolean(true))],
                ],
                types: vec![DataType::Double, DataType::Boolean],
                tags: None,
            },
            Some("ms"),
        )
        .expect("insert");

    let inserts = session.transport().inserts.borrow();
    assert!(!inserts[0].aligned);
    assert_eq!(inserts[0].time_precision.as_deref(), Some("ms"));
    assert_eq!(inserts[0].paths, strings(&["s.a", "s.z"]));
    drop(inserts);

    let data = session.query(&strings(&["s.*"]), MIN_KEY, MAX_KEY).expect("query");
    assert_eq!(data.keys(), Some(&[3i64, 5][..]));
    assert_eq!(data.value(0, 0), Some(&Value::Boolean(true)));
    assert_eq!(data.value(1, 1), Some(&Value::Double(0.5)));
}

#[test]
fn malformed_batches_never_reach_the_server() {
    let session = open();
    let mut batch = scenario_b_batch();
    batch.paths = strings(&["a.a", "a.a"]);
    let err = session.insert_row_records(batch, None).expect_err("duplicate paths");
    assert_eq!(err.kind(), ErrorKind::MalformedRequest);

    let err = session
        .insert_row_records(scenario_b_batch(), Some(""))
        .expect_err("empty precision");
    assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    assert!(session.transport().inserts.borrow().is_empty());
}

#[test]
fn server_status_message_is_kept_verbatim() {
    let session = open();
    *session.transport().reject_next.borrow_mut() =
        Some(Status::failed(500, "write quota exceeded for a.a"));
    let err = session
        .insert_row_records(scenario_b_batch(), None)
        .expect_err("rejected");
    assert_eq!(err.kind(), ErrorKind::ServerStatus);
    assert_eq!(err.status_code(), Some(500));
    assert_eq!(err.message(), Some("write quota exceeded for a.a"));

    let err = session
        .downsample_query(&strings(&["a.a"]), 0, 10, AggregateType::Avg, 5)
        .expect_err("unsupported");
    assert_eq!(err.status_code(), Some(501));
}

#[test]
fn wrong_password_fails_open() {
    let err = Session::open(MemoryServer::default(), SessionOptions::new("root", "nope"))
        .err()
        .expect("rejected");
    assert_eq!(err.kind(), ErrorKind::ServerStatus);
    assert_eq!(err.message(), Some("wrong password"));
}

#[test]
fn query_paths_are_merged_before_sending() {
    let session = open();
    insert_series(&session, "a.b", 1);
    session
        .query(&strings(&["c.d", "a.b", "a.*"]), MIN_KEY, MAX_KEY)
        .expect("query");
    assert_eq!(session.transport().query_paths.borrow()[0], strings(&["a.*", "c.d"]));
}

#[test]
fn last_query_without_paths_sends_nothing() {
    let session = open();
    assert!(session.last_query(&[], 0).expect("last").is_none());
    insert_series(&session, "a.b", 3);
    let data = session
        .last_query(&strings(&["a.b"]), 0)
        .expect("last")
        .expect("data");
    assert_eq!(data.keys(), Some(&[2i64][..]));
    assert_eq!(data.value(0, 0), Some(&Value::Long(20)));
}

#[test]
fn aggregate_and_delete_round_trip() {
    let session = open();
    insert_series(&session, "m.x", 4);
    insert_series(&session, "m.y", 2);

    let counts = session
        .aggregate_query(&strings(&["m.*"]), 0, 100, AggregateType::Count)
        .expect("aggregate");
    assert_eq!(counts.paths, strings(&["m.x", "m.y"]));
    assert_eq!(counts.values, vec![Value::Long(4), Value::Long(2)]);
    assert!(counts.keys.is_none());

    session.delete_data("m.x", 1, 3).expect("delete");
    let data = session.query(&strings(&["m.x"]), MIN_KEY, MAX_KEY).expect("query");
    assert_eq!(data.keys(), Some(&[0i64, 3][..]));
}

#[test]
fn statement_cursor_pages_through_results() {
    let session = open();
    insert_series(&session, "t.v", 5);

    let mut cursor = session.execute_statement("SELECT v FROM t", Some(2)).expect("execute");
    assert_eq!(cursor.columns(), &strings(&["key", "t.v"])[..]);
    let mut keys = Vec::new();
    let mut more = Vec::new();
    while let Some(row) = cursor.next().expect("next") {
        keys.push(row[0].clone());
        more.push(cursor.has_more().expect("has_more"));
    }
    assert_eq!(keys, (0..5).map(|key| Some(Value::Long(key))).collect::<Vec<_>>());
    assert_eq!(more, vec![true, true, true, true, false]);
    assert_eq!(*session.transport().fetches.borrow(), vec![2, 2, 1]);

    let query_id = cursor.query_id();
    cursor.close().expect("close");
    cursor.close().expect("close twice");
    assert_eq!(*session.transport().closed_statements.borrow(), vec![query_id]);
}

#[test]
fn statement_errors_surface_as_server_status() {
    let session = open();
    let err = session
        .execute_statement("DROP EVERYTHING", None)
        .err()
        .expect("rejected");
    assert_eq!(err.kind(), ErrorKind::ServerStatus);
    assert_eq!(err.message(), Some("cannot parse: DROP EVERYTHING"));
}

#[test]
fn csv_export_writes_nulls_and_text() {
    let session = open();
    session.insert_row_records(scenario_b_batch(), None).expect("insert");
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("nested").join("rows.csv");

    let mut cursor = session.execute_statement("SELECT *", Some(1)).expect("execute");
    let rows = export_csv_file(&mut cursor, &out, ExportCsvOptions::default()).expect("export");
    cursor.close().expect("close");
    assert_eq!(rows, 2);

    let text = std::fs::read_to_string(&out).expect("read csv");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["key,a.a,b.b", "1,null,10", "2,y,20"]);
}

#[test]
fn csv_export_requires_csv_extension() {
    let session = open();
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cursor = session.execute_statement("SELECT *", None).expect("execute");
    let err = export_csv_file(&mut cursor, &dir.path().join("rows.txt"), ExportCsvOptions::default())
        .expect_err("extension");
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[test]
fn stream_export_writes_one_file_per_column() {
    let session = open();
    session.insert_row_records(scenario_b_batch(), None).expect("insert");
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("streams");
    std::fs::create_dir_all(&target).expect("mkdir");
    std::fs::write(target.join("a.a"), b"stale").expect("stale file");

    let mut cursor = session.execute_statement("SELECT *", Some(1)).expect("execute");
    let files = export_stream(&mut cursor, &target).expect("export");
    cursor.close().expect("close");

    assert_eq!(files, vec![target.join("a.a"), target.join("b.b")]);
    assert_eq!(std::fs::read(target.join("a.a")).expect("a.a"), b"y".to_vec());
    let mut expected = 10i64.to_be_bytes().to_vec();
    expected.extend_from_slice(&20i64.to_be_bytes());
    assert_eq!(std::fs::read(target.join("b.b")).expect("b.b"), expected);
}

#[test]
fn export_to_file_follows_the_directive() {
    let session = open();
    session.insert_row_records(scenario_b_batch(), None).expect("insert");
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("out.csv");

    let report = session
        .export_to_file(&format!("EXPORT CSV {}", out.display()))
        .expect("export");
    assert_eq!(report.rows, 2);
    assert_eq!(report.csv_file.as_deref(), Some(out.as_path()));
    assert_eq!(session.transport().closed_statements.borrow().len(), 1);

    let streams = dir.path().join("streams");
    let report = session
        .export_to_file(&format!("EXPORT STREAM {}", streams.display()))
        .expect("export");
    assert_eq!(report.stream_files.len(), 2);

    let err = session.export_to_file("SELECT *").expect_err("no directive");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert_eq!(session.transport().closed_statements.borrow().len(), 3);
}

#[test]
fn directory_load_stores_chunks_by_index() {
    let session = open();
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("my-files");
    std::fs::create_dir_all(source.join("skipped")).expect("mkdir");
    let content: Vec<u8> = (0u8..25).collect();
    std::fs::write(source.join("a-b.txt"), &content).expect("write");
    std::fs::write(source.join("empty.bin"), b"").expect("write");

    let files = load_directory(&session, &source, 10).expect("load");
    assert_eq!(files, vec![source.join("a-b.txt"), source.join("empty.bin")]);

    let data = session
        .query(&strings(&["my_files.a_b_txt"]), MIN_KEY, MAX_KEY)
        .expect("query");
    assert_eq!(data.types(), &[DataType::Binary]);
    assert_eq!(data.keys(), Some(&[0i64, 1, 2][..]));
    let mut joined = Vec::new();
    for row in data.rows() {
        joined.extend_from_slice(row.values[0].and_then(Value::as_bytes).expect("bytes"));
    }
    assert_eq!(joined, content);
}

#[test]
fn close_reports_the_session_id() {
    let server = MemoryServer::default();
    let session = Session::open(&server, SessionOptions::default()).expect("open");
    assert_eq!(session.session_id(), 42);
    session.close();
    assert_eq!(*server.closed_sessions.borrow(), vec![42]);
}
