// Pull-based cursor over server-paginated statement results.
use crate::core::decode::{decode_row, decode_row_payloads};
use crate::core::error::{Error, ErrorKind};
use crate::core::types::{DataType, Value};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CursorState {
    Unknown,
    HasMore,
    NoMore,
}

/// One page of row-major buffers as delivered by a fetch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResultPage {
    pub values_list: Vec<Vec<u8>>,
    pub bitmap_list: Vec<Vec<u8>>,
}

impl ResultPage {
    pub fn len(&self) -> usize {
        self.values_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values_list.is_empty()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FetchedPage {
    pub has_more: bool,
    pub page: Option<ResultPage>,
}

/// Server side of a cursor: pages by query id and releases the query.
pub trait ResultSource {
    fn fetch(&self, query_id: i64, fetch_size: i32) -> Result<FetchedPage, Error>;
    fn close(&self, query_id: i64) -> Result<(), Error>;
}

/// Column metadata describing every row a cursor yields.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CursorColumns {
    pub names: Vec<String>,
    pub types: Vec<DataType>,
}

#[derive(Debug)]
pub struct StreamCursor<'a, S: ResultSource> {
    source: &'a S,
    query_id: i64,
    columns: CursorColumns,
    fetch_size: i32,
    page: Option<ResultPage>,
    index: usize,
    state: CursorState,
    closed: bool,
}

impl<'a, S: ResultSource> StreamCursor<'a, S> {
    /// `first_page` holds rows the server attached to the statement response.
    pub fn new(
        source: &'a S,
        query_id: i64,
        columns: CursorColumns,
        fetch_size: i32,
        first_page: Option<ResultPage>,
    ) -> Result<Self, Error> {
        if columns.names.len() != columns.types.len() {
            return Err(Error::new(ErrorKind::ProtocolDecode).with_message(format!(
                "{} columns for {} types",
                columns.names.len(),
                columns.types.len()
            )));
        }
        if fetch_size <= 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("fetch size must be positive"));
        }
        if let Some(page) = &first_page {
            check_page(page)?;
        }
        Ok(Self {
            source,
            query_id,
            columns,
            fetch_size,
            page: first_page.filter(|page| !page.is_empty()),
            index: 0,
            state: CursorState::Unknown,
            closed: false,
        })
    }

    pub fn query_id(&self) -> i64 {
        self.query_id
    }

    pub fn columns(&self) -> &[String] {
        &self.columns.names
    }

    pub fn types(&self) -> &[DataType] {
        &self.columns.types
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn fetch_size(&self) -> i32 {
        self.fetch_size
    }

    pub fn has_more(&mut self) -> Result<bool, Error> {
        if self.buffered() > 0 {
            return Ok(true);
        }
        self.page = None;
        self.index = 0;
        if matches!(self.state, CursorState::HasMore | CursorState::Unknown) {
            self.fetch()?;
        }
        Ok(self.buffered() > 0)
    }

    /// Pulls the next page unless unread rows remain in the current one.
    pub fn fetch(&mut self) -> Result<(), Error> {
        if self.buffered() > 0 {
            return Ok(());
        }
        if self.closed {
            return Err(Error::new(ErrorKind::Usage).with_message("cursor is closed"));
        }
        self.page = None;
        self.index = 0;

        let fetched = self.source.fetch(self.query_id, self.fetch_size)?;
        self.state = if fetched.has_more {
            CursorState::HasMore
        } else {
            CursorState::NoMore
        };
        if let Some(page) = fetched.page {
            check_page(&page)?;
            tracing::debug!(
                query_id = self.query_id,
                rows = page.len(),
                has_more = fetched.has_more,
                "fetched result page"
            );
            self.page = Some(page);
        }
        Ok(())
    }

    /// Next decoded row, or `None` once the result is exhausted.
    pub fn next(&mut self) -> Result<Option<Vec<Option<Value>>>, Error> {
        let Some((values, bitmap)) = self.advance()? else {
            return Ok(None);
        };
        decode_row(&self.columns.types, &values, &bitmap).map(Some)
    }

    /// Next row as raw field payloads (empty for nulls); `skip_key` drops the leading key column.
    pub fn next_row_bytes(&mut self, skip_key: bool) -> Result<Option<Vec<Vec<u8>>>, Error> {
        let Some((values, bitmap)) = self.advance()? else {
            return Ok(None);
        };
        let mut fields = decode_row_payloads(&self.columns.types, &values, &bitmap)?;
        if skip_key && !fields.is_empty() {
            fields.remove(0);
        }
        Ok(Some(fields))
    }

    /// Releases the server-side query; later calls are no-ops.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.page = None;
        self.index = 0;
        self.source.close(self.query_id)
    }

    fn buffered(&self) -> usize {
        self.page
            .as_ref()
            .map(|page| page.len().saturating_sub(self.index))
            .unwrap_or(0)
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, Error> {
        if !self.has_more()? {
            return Ok(None);
        }
        let Some(page) = self.page.as_mut() else {
            return Ok(None);
        };
        let values = std::mem::take(&mut page.values_list[self.index]);
        let bitmap = std::mem::take(&mut page.bitmap_list[self.index]);
        self.index += 1;
        Ok(Some((values, bitmap)))
    }
}

fn check_page(page: &ResultPage) -> Result<(), Error> {
    if page.values_list.len() != page.bitmap_list.len() {
        return Err(Error::new(ErrorKind::ProtocolDecode).with_message(format!(
            "page has {} value buffers for {} bitmaps",
            page.values_list.len(),
            page.bitmap_list.len()
        )));
    }
    Ok(())
}

impl<S: ResultSource> Drop for StreamCursor<'_, S> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!(query_id = self.query_id, "cursor dropped without close");
        }
    }
}
