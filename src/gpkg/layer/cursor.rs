use crate::conversions::sql_value_type_name;
use crate::error::{GpkgError, Result};
use crate::sql::{sql_prepare, statement_error};
use rusqlite::types::Value as SqlValue;
use std::collections::VecDeque;
use tracing::debug;

/// A keyset-paginated scan over a feature table.
///
/// Rows are fetched `page_size` at a time with `fid > last_fid`, so rows
/// inserted behind the cursor are never visited and the statement is never
/// left open between pages.
pub(super) struct Cursor<'a> {
    stmt: rusqlite::Statement<'a>,
    sql: String,
    column_count: usize,
    page: VecDeque<Vec<SqlValue>>,
    last_fid: Option<i64>,
    page_size: usize,
    exhausted: bool,
}

impl<'a> Cursor<'a> {
    /// `sql` must select the identifier first, take the last seen identifier
    /// as `?1` and be limited to `page_size` rows (see `sql_select_features`).
    /// `page_size` must be at least 1.
    pub(super) fn new(conn: &'a rusqlite::Connection, sql: String, page_size: usize) -> Result<Self> {
        let stmt = sql_prepare(conn, &sql)?;
        let column_count = stmt.column_count();
        Ok(Self {
            stmt,
            sql,
            column_count,
            page: VecDeque::new(),
            last_fid: None,
            page_size,
            exhausted: false,
        })
    }

    /// The next raw row, or `None` once the table is exhausted.
    pub(super) fn next_row(&mut self) -> Result<Option<Vec<SqlValue>>> {
        if self.page.is_empty() && !self.exhausted {
            self.fill_page()?;
        }
        Ok(self.page.pop_front())
    }

    fn fill_page(&mut self) -> Result<()> {
        let mut rows = self
            .stmt
            .query([self.last_fid])
            .map_err(statement_error(&self.sql))?;
        while let Some(row) = rows.next().map_err(statement_error(&self.sql))? {
            let values = (0..self.column_count)
                .map(|idx| row.get::<_, SqlValue>(idx))
                .collect::<rusqlite::Result<Vec<SqlValue>>>()
                .map_err(statement_error(&self.sql))?;
            self.page.push_back(values);
        }
        drop(rows);

        if self.page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = self.page.back() {
            self.last_fid = match last.first() {
                Some(SqlValue::Integer(fid)) => Some(*fid),
                Some(other) => {
                    return Err(GpkgError::ValueTypeMismatch {
                        expected: "integer",
                        actual: sql_value_type_name(other),
                    });
                }
                None => return Err(GpkgError::MissingFeatureId),
            };
        }
        debug!(rows = self.page.len(), last_fid = ?self.last_fid, "fetched page");
        Ok(())
    }
}
