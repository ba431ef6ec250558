//! Database connection trait.
//!
//! [`Connection`] is the synchronous capability every caller in the workspace
//! is written against. The MySQL driver implements it over TCP; tests
//! implement it in memory.

use std::io::Read;

use crate::error::{Error, Result, TypeError};
use crate::row::Row;
use crate::value::Value;

/// Everything a statement produced: rows for queries, counters for writes.
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    /// Result rows; empty for statements without a result set
    pub rows: Vec<Row>,
    /// Rows changed by INSERT/UPDATE/DELETE
    pub affected_rows: u64,
    /// Auto-increment id generated by the statement, 0 if none
    pub last_insert_id: u64,
}

/// Counters reported after a streamed execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    /// Bytes read from the long-data source and sent to the server
    pub bytes_sent: u64,
}

/// A parameter whose value is streamed from a reader instead of bound inline.
///
/// `index` is the zero-based placeholder position in the statement. The
/// remaining placeholders take their values from the accompanying `params`
/// slice in order, skipping `index`.
pub struct LongData<'a> {
    pub index: usize,
    pub reader: &'a mut dyn Read,
    /// Scratch space; each fill of it becomes one chunk on the wire
    pub buffer: &'a mut [u8],
}

impl std::fmt::Debug for LongData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongData")
            .field("index", &self.index)
            .field("chunk_size", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// A synchronous database connection.
///
/// Methods take `&mut self`: a connection runs one statement at a time and
/// the borrow checker keeps it that way.
pub trait Connection {
    /// Run a statement with positional `?` parameters.
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Run a statement where one parameter is streamed from `long_data`.
    ///
    /// The reader is drained in `long_data.buffer`-sized chunks before the
    /// statement executes. Read failures surface as [`crate::Error::Io`].
    fn execute_streamed(
        &mut self,
        sql: &str,
        params: &[Value],
        long_data: LongData<'_>,
    ) -> Result<ExecOutcome>;

    /// Check that the server is still reachable.
    fn ping(&mut self) -> Result<()>;

    /// Close the connection gracefully.
    fn close(&mut self) -> Result<()>;

    /// Execute a query and return all rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.run(sql, params).map(|result| result.rows)
    }

    /// Execute a query and return the first row, if any.
    fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    /// Execute a statement and return the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run(sql, params).map(|result| result.affected_rows)
    }

    /// Execute an INSERT and return the generated auto-increment id.
    fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        row_id(self.run(sql, params)?.last_insert_id)
    }
}

/// Convert a server-reported insert id to a signed row id.
///
/// Ids past `i64::MAX` (possible with BIGINT UNSIGNED keys) are a type error
/// rather than a wrapped or clamped value.
pub fn row_id(last_insert_id: u64) -> Result<i64> {
    i64::try_from(last_insert_id).map_err(|_| {
        Error::Type(TypeError {
            expected: "insert id <= i64::MAX",
            actual: last_insert_id.to_string(),
            column: None,
        })
    })
}

impl<C: Connection + ?Sized> Connection for &mut C {
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        (**self).run(sql, params)
    }

    fn execute_streamed(
        &mut self,
        sql: &str,
        params: &[Value],
        long_data: LongData<'_>,
    ) -> Result<ExecOutcome> {
        (**self).execute_streamed(sql, params, long_data)
    }

    fn ping(&mut self) -> Result<()> {
        (**self).ping()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
