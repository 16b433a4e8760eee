//! Thin wrappers for running SQL against the container connection.
//!
//! Every failure is reported as [`GpkgError::Statement`] so the offending
//! statement text travels with the error.

use crate::error::{GpkgError, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Params, Statement};
use tracing::debug;

pub(crate) fn statement_error(sql: &str) -> impl FnOnce(rusqlite::Error) -> GpkgError + '_ {
    move |source| GpkgError::Statement {
        sql: sql.to_string(),
        source,
    }
}

/// The integer an `f64` holds exactly, if any. Fractional, non-finite and
/// out-of-range values have none.
pub(crate) fn real_to_integer(value: f64) -> Option<i64> {
    // 2^63 is exact in f64; i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (value.is_finite() && value.fract() == 0.0 && (-LIMIT..LIMIT).contains(&value))
        .then_some(value as i64)
}

/// Run one or more statements and ignore any result rows (CREATE, PRAGMA, ...).
pub(crate) fn sql_command(conn: &Connection, sql: &str) -> Result<()> {
    debug!(sql, "sql command");
    conn.execute_batch(sql).map_err(statement_error(sql))
}

/// Run a single statement with parameters and return the number of changed rows.
pub(crate) fn sql_execute<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<usize> {
    debug!(sql, "sql execute");
    let mut stmt = conn.prepare_cached(sql).map_err(statement_error(sql))?;
    stmt.execute(params).map_err(statement_error(sql))
}

pub(crate) fn sql_prepare<'c>(conn: &'c Connection, sql: &str) -> Result<Statement<'c>> {
    debug!(sql, "sql prepare");
    conn.prepare(sql).map_err(statement_error(sql))
}

/// Return the first column of the first row as an integer.
pub(crate) fn sql_get_integer<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<i64> {
    debug!(sql, "sql scalar");
    conn.query_row(sql, params, |row| row.get(0))
        .map_err(statement_error(sql))
}

/// A fully materialized query result.
#[derive(Debug, Default)]
pub(crate) struct SqlResult {
    rows: Vec<Vec<SqlValue>>,
}

impl SqlResult {
    pub(crate) fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn value(&self, col: usize, row: usize) -> Option<&SqlValue> {
        self.rows.get(row).and_then(|values| values.get(col))
    }

    /// Text value; `None` for `NULL`, out-of-range, or non-text cells.
    pub(crate) fn text(&self, col: usize, row: usize) -> Option<&str> {
        match self.value(col, row)? {
            SqlValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub(crate) fn integer(&self, col: usize, row: usize) -> Option<i64> {
        match self.value(col, row)? {
            SqlValue::Integer(value) => Some(*value),
            SqlValue::Real(value) => real_to_integer(*value),
            SqlValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub(crate) fn into_rows(self) -> Vec<Vec<SqlValue>> {
        self.rows
    }

    pub(crate) fn double(&self, col: usize, row: usize) -> Option<f64> {
        match self.value(col, row)? {
            SqlValue::Real(value) => Some(*value),
            SqlValue::Integer(value) => Some(*value as f64),
            SqlValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Run a query and collect every row.
pub(crate) fn sql_query<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<SqlResult> {
    debug!(sql, "sql query");
    let mut stmt = conn.prepare(sql).map_err(statement_error(sql))?;
    let column_count = stmt.column_count();

    let rows = stmt
        .query_map(params, |row| {
            (0..column_count)
                .map(|idx| row.get::<_, SqlValue>(idx))
                .collect::<rusqlite::Result<Vec<SqlValue>>>()
        })
        .map_err(statement_error(sql))?
        .collect::<rusqlite::Result<Vec<Vec<SqlValue>>>>()
        .map_err(statement_error(sql))?;

    Ok(SqlResult { rows })
}

/// Quote an identifier for use in generated SQL.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!(r#""{}""#, name.replace('"', r#""""#))
}
