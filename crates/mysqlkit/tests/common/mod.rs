//! In-memory stand-in for a MySQL server.
//!
//! Understands just the statements `BlobTransfer` and the client tests issue:
//! `INSERT INTO t (c) VALUES (?)`, `UPDATE t SET c = ? WHERE r = ?` and
//! `SELECT c FROM t WHERE r = ?`, with backtick-quoted names. Every table has
//! an implicit auto-increment `id` column.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Read;

use mysqlkit::{Connection, Error, ExecOutcome, LongData, Result, Row, StatementResult, Value};

#[derive(Debug, Default)]
pub struct MemoryDb {
    tables: HashMap<String, Vec<StoredRow>>,
    next_id: i64,
    /// Every statement text received, in order
    pub statements: Vec<String>,
    /// Sizes of the long-data chunks of the last streamed statement
    pub chunks: Vec<usize>,
    /// Canned results for statements the fake does not understand
    pub scripted: VecDeque<StatementResult>,
    /// Reported as `last_insert_id` for streamed inserts instead of the row id
    pub forced_insert_id: Option<u64>,
    pub closed: bool,
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    columns: BTreeMap<String, Value>,
}

impl StoredRow {
    fn get(&self, column: &str) -> Value {
        if column == "id" {
            return Value::BigInt(self.id);
        }
        self.columns.get(column).cloned().unwrap_or(Value::Null)
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Insert a row directly, bypassing SQL. Returns its id.
    pub fn seed(&mut self, table: &str, columns: &[(&str, Value)]) -> i64 {
        let id = self.allocate_id();
        self.tables.entry(table.to_string()).or_default().push(StoredRow {
            id,
            columns: columns
                .iter()
                .map(|(name, value)| ((*name).to_string(), value.clone()))
                .collect(),
        });
        id
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, Vec::len)
    }

    pub fn cell(&self, table: &str, id: i64, column: &str) -> Option<Value> {
        self.tables
            .get(table)?
            .iter()
            .find(|row| row.id == id)
            .map(|row| row.get(column))
    }

    fn allocate_id(&mut self) -> i64 {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn write_blob(&mut self, sql: &str, params: &[Value], data: Vec<u8>) -> Result<ExecOutcome> {
        let names = quoted_names(sql);
        if sql.starts_with("INSERT INTO") {
            let [table, column] = names.as_slice() else {
                return Err(unsupported(sql));
            };
            let id = self.seed(table, &[(column.as_str(), Value::Bytes(data))]);
            return Ok(ExecOutcome {
                affected_rows: 1,
                last_insert_id: self
                    .forced_insert_id
                    .unwrap_or_else(|| u64::try_from(id).unwrap_or(0)),
                bytes_sent: 0,
            });
        }
        if sql.starts_with("UPDATE") {
            let [table, column, ref_column] = names.as_slice() else {
                return Err(unsupported(sql));
            };
            let ref_value = params.first().ok_or_else(|| unsupported(sql))?;
            let mut affected = 0;
            for row in self.tables.entry(table.clone()).or_default() {
                if values_match(&row.get(ref_column), ref_value) {
                    row.columns.insert(column.clone(), Value::Bytes(data.clone()));
                    affected += 1;
                }
            }
            return Ok(ExecOutcome {
                affected_rows: affected,
                last_insert_id: 0,
                bytes_sent: 0,
            });
        }
        Err(unsupported(sql))
    }

    fn select(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let [column, table, ref_column] = quoted_names(sql).try_into().map_err(|_| unsupported(sql))?;
        let ref_value = params.first().ok_or_else(|| unsupported(sql))?;
        let rows = self
            .tables
            .get(&table)
            .into_iter()
            .flatten()
            .filter(|row| values_match(&row.get(&ref_column), ref_value))
            .map(|row| Row::new(vec![column.clone()], vec![row.get(&column)]))
            .collect();
        Ok(StatementResult {
            rows,
            ..StatementResult::default()
        })
    }
}

impl Connection for MemoryDb {
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.statements.push(sql.to_string());
        if let Some(result) = self.scripted.pop_front() {
            return Ok(result);
        }
        if sql.starts_with("SELECT") {
            return self.select(sql, params);
        }
        Err(unsupported(sql))
    }

    fn execute_streamed(
        &mut self,
        sql: &str,
        params: &[Value],
        long_data: LongData<'_>,
    ) -> Result<ExecOutcome> {
        self.statements.push(sql.to_string());
        self.chunks.clear();

        let LongData { reader, buffer, .. } = long_data;
        let mut data = Vec::new();
        loop {
            let n = reader.read(buffer).map_err(Error::Io)?;
            if n == 0 {
                break;
            }
            self.chunks.push(n);
            data.extend_from_slice(&buffer[..n]);
        }

        let sent = data.len() as u64;
        let outcome = self.write_blob(sql, params, data)?;
        Ok(ExecOutcome {
            bytes_sent: sent,
            ..outcome
        })
    }

    fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

fn quoted_names(sql: &str) -> Vec<String> {
    sql.split('`')
        .skip(1)
        .step_by(2)
        .map(ToString::to_string)
        .collect()
}

fn values_match(stored: &Value, wanted: &Value) -> bool {
    match (stored.as_i64(), wanted.as_i64()) {
        (Some(a), Some(b)) => a == b,
        _ => match (stored.as_bytes(), wanted.as_bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn unsupported(sql: &str) -> Error {
    Error::Custom(format!("memory db cannot run: {sql}"))
}
