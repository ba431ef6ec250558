//! Value-typed client with a statement cursor.
//!
//! `Client` keeps one prepared statement text, its positional bindings, and
//! the rows of the last result set. Bindings travel as binary parameters;
//! they are never spliced into the SQL.

use std::collections::VecDeque;
use std::path::Path;

use chrono::{NaiveDateTime, NaiveTime};
use mysqlkit_core::error::{ConnectionError, ConnectionErrorKind};
use mysqlkit_core::{Connection, Error, Result, Row, Value};
use mysqlkit_driver::types::{datetime_to_micros, days_to_date, micros_to_datetime, parse_datetime_text};
use mysqlkit_driver::{MySqlConfig, MySqlConnection};
use tracing::{debug, warn};

use crate::blob::BlobTransfer;

/// A connection plus one statement and its cursor.
pub struct Client<C: Connection = MySqlConnection> {
    config: MySqlConfig,
    conn: Option<C>,
    prepared: String,
    params: Vec<Value>,
    pending: VecDeque<Row>,
    current: Option<Row>,
    affected_rows: u64,
    last_insert_id: u64,
}

impl<C: Connection> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("open", &self.conn.is_some())
            .field("prepared", &self.prepared)
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

impl Client<MySqlConnection> {
    /// A closed client for `config`; call [`Client::open`] to connect.
    pub fn new(config: MySqlConfig) -> Self {
        Self::with_parts(config, None)
    }

    /// A closed client for 127.0.0.1:3306.
    pub fn localhost() -> Self {
        Self::new(MySqlConfig::new().host("127.0.0.1"))
    }

    /// Connect, replacing any open connection.
    pub fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            self.close()?;
        }
        let conn = MySqlConnection::connect(self.config.clone())?;
        debug!(
            server_version = conn.server_version().unwrap_or("unknown"),
            "client opened"
        );
        self.conn = Some(conn);
        Ok(())
    }
}

impl<C: Connection> Client<C> {
    /// Adopt an already-open connection.
    pub fn from_connection(conn: C) -> Self {
        Self::with_parts(MySqlConfig::default(), Some(conn))
    }

    fn with_parts(config: MySqlConfig, conn: Option<C>) -> Self {
        Self {
            config,
            conn,
            prepared: String::new(),
            params: Vec::new(),
            pending: VecDeque::new(),
            current: None,
            affected_rows: 0,
            last_insert_id: 0,
        }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Replace the connection settings; takes effect on the next `open`.
    pub fn set_config(&mut self, config: MySqlConfig) {
        self.config = config;
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Close the connection. A closed client stays closed without error.
    pub fn close(&mut self) -> Result<()> {
        self.end_next();
        match self.conn.take() {
            Some(mut conn) => conn.close(),
            None => Ok(()),
        }
    }

    pub fn connection_mut(&mut self) -> Option<&mut C> {
        self.conn.as_mut()
    }

    fn conn_mut(&mut self) -> Result<&mut C> {
        self.conn.as_mut().ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::NotOpen,
                message: "client is not open".to_string(),
                source: None,
            })
        })
    }

    /// Set the statement text and clear bindings and any open cursor.
    pub fn prepare(&mut self, sql: impl Into<String>) {
        self.prepared = sql.into();
        self.params.clear();
        self.end_next();
    }

    /// The statement text last passed to [`Client::prepare`].
    pub fn prepared_query(&self) -> &str {
        &self.prepared
    }

    /// Append a positional parameter.
    pub fn bind(&mut self, value: impl Into<Value>) {
        self.params.push(value.into());
    }

    pub fn bind_integer(&mut self, value: i32) {
        self.bind(value);
    }

    pub fn bind_double(&mut self, value: f64) {
        self.bind(value);
    }

    pub fn bind_boolean(&mut self, value: bool) {
        self.bind(value);
    }

    pub fn bind_string(&mut self, value: impl Into<String>) {
        self.bind(value.into());
    }

    pub fn bind_date_time(&mut self, value: NaiveDateTime) {
        self.bind(Value::Timestamp(datetime_to_micros(value)));
    }

    pub fn bound_params(&self) -> &[Value] {
        &self.params
    }

    /// Run the prepared statement with its bindings.
    ///
    /// A result set becomes the cursor; position it with [`Client::next`].
    pub fn exec(&mut self) -> Result<()> {
        self.end_next();
        let sql = self.prepared.clone();
        let params = self.params.clone();
        let result = self.conn_mut()?.run(&sql, &params)?;

        self.affected_rows = result.affected_rows;
        self.last_insert_id = result.last_insert_id;
        debug!(
            rows = result.rows.len(),
            affected_rows = result.affected_rows,
            "statement executed"
        );
        self.pending = result.rows.into();
        Ok(())
    }

    /// Advance to the next row; `false` once the rows are exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        self.current = self.pending.pop_front();
        self.current.is_some()
    }

    /// Drop the remaining rows of the current result set.
    pub fn end_next(&mut self) {
        self.pending.clear();
        self.current = None;
    }

    /// The row the cursor is on.
    pub fn current_row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    fn value(&self, column: usize) -> Option<&Value> {
        self.current
            .as_ref()?
            .get(column)
            .filter(|v| !v.is_null())
    }

    pub fn get_integer(&self, column: usize) -> Option<i32> {
        self.value(column)?.as_i32()
    }

    pub fn get_double(&self, column: usize) -> Option<f64> {
        self.value(column)?.as_f64()
    }

    pub fn get_boolean(&self, column: usize) -> Option<bool> {
        self.value(column)?.as_bool()
    }

    /// Text form of any non-NULL value; binary data must be UTF-8.
    pub fn get_string(&self, column: usize) -> Option<String> {
        value_to_string(self.value(column)?)
    }

    /// DATETIME, TIMESTAMP and DATE columns, or text in
    /// `YYYY-MM-DD hh:mm:ss[.ffffff]` form.
    pub fn get_date_time(&self, column: usize) -> Option<NaiveDateTime> {
        match self.value(column)? {
            Value::Timestamp(micros) => micros_to_datetime(*micros),
            Value::Date(days) => days_to_date(*days).map(|d| d.and_time(NaiveTime::MIN)),
            Value::Text(text) => parse_datetime_text(text),
            _ => None,
        }
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    /// Version of this client library.
    #[allow(clippy::unused_self)]
    pub fn api_version(&self) -> &'static str {
        concat!("mysqlkit ", env!("CARGO_PKG_VERSION"))
    }

    /// Borrow the open connection for BLOB transfers.
    pub fn blob(&mut self) -> Result<BlobTransfer<'_, C>> {
        Ok(BlobTransfer::new(self.conn_mut()?))
    }

    /// [`BlobTransfer::insert_blob`], reporting success as a flag.
    pub fn insert_blob(&mut self, file_path: impl AsRef<Path>, table: &str, column: &str) -> bool {
        let result = self
            .blob()
            .and_then(|mut blobs| blobs.insert_blob(file_path, table, column));
        match result {
            Ok(id) => {
                self.last_insert_id = u64::try_from(id).unwrap_or(0);
                true
            }
            Err(e) => {
                warn!(error = %e, table, column, "insert_blob failed");
                false
            }
        }
    }

    /// [`BlobTransfer::set_blob`], reporting success as a flag.
    pub fn set_blob(
        &mut self,
        file_path: impl AsRef<Path>,
        table: &str,
        column: &str,
        ref_column: &str,
        ref_value: impl Into<Value>,
    ) -> bool {
        let result = self
            .blob()
            .and_then(|mut blobs| blobs.set_blob(file_path, table, column, ref_column, ref_value));
        match result {
            Ok(affected) => {
                self.affected_rows = affected;
                true
            }
            Err(e) => {
                warn!(error = %e, table, column, "set_blob failed");
                false
            }
        }
    }

    /// [`BlobTransfer::get_blob`], reporting success as a flag.
    pub fn get_blob(
        &mut self,
        table: &str,
        column: &str,
        ref_column: &str,
        ref_value: impl Into<Value>,
        output_path: impl AsRef<Path>,
    ) -> bool {
        let result = self
            .blob()
            .and_then(|mut blobs| blobs.get_blob(table, column, ref_column, ref_value, output_path));
        if let Err(e) = &result {
            warn!(error = %e, table, column, "get_blob failed");
        }
        result.is_ok()
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::Text(s) | Value::Decimal(s) => s.clone(),
        Value::Bytes(b) => return String::from_utf8(b.clone()).ok(),
        Value::Bool(v) => String::from(if *v { "1" } else { "0" }),
        Value::TinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Date(days) => days_to_date(*days)?.format("%Y-%m-%d").to_string(),
        Value::Timestamp(micros) => micros_to_datetime(*micros)?
            .format("%Y-%m-%d %H:%M:%S%.f")
            .to_string(),
        Value::Time(micros) => format_time(*micros),
        Value::Json(json) => json.to_string(),
    };
    Some(text)
}

/// `[-]hh:mm:ss[.ffffff]`, hours unbounded as MySQL TIME allows.
fn format_time(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let total = micros.unsigned_abs();
    let (secs, frac) = (total / 1_000_000, total % 1_000_000);
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if frac == 0 {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{frac:06}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&Value::Null), None);
        assert_eq!(value_to_string(&Value::Int(11)).as_deref(), Some("11"));
        assert_eq!(value_to_string(&Value::Double(1.15)).as_deref(), Some("1.15"));
        assert_eq!(value_to_string(&Value::Bool(true)).as_deref(), Some("1"));
        assert_eq!(
            value_to_string(&Value::Bytes(b"hello".to_vec())).as_deref(),
            Some("hello")
        );
        assert_eq!(value_to_string(&Value::Bytes(vec![0xFF, 0xD8])), None);

        let dt = NaiveDate::from_ymd_opt(2020, 2, 1)
            .unwrap()
            .and_hms_opt(5, 33, 1)
            .unwrap();
        assert_eq!(
            value_to_string(&Value::Timestamp(datetime_to_micros(dt))).as_deref(),
            Some("2020-02-01 05:33:01")
        );
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "00:00:00");
        assert_eq!(format_time(-((838 * 3600 + 59 * 60 + 59) * 1_000_000)), "-838:59:59");
        assert_eq!(format_time(61_500_000), "00:01:01.500000");
    }

    #[test]
    fn test_localhost_defaults() {
        let client = Client::localhost();
        assert_eq!(client.config().host, "127.0.0.1");
        assert_eq!(client.config().port, 3306);
        assert!(!client.is_open());
        assert!(client.api_version().starts_with("mysqlkit "));
    }

    #[test]
    fn test_closed_client_reports_not_open() {
        let mut client = Client::localhost();
        client.prepare("SELECT 1");
        let err = client.exec().unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::NotOpen,
                ..
            })
        ));
        assert!(!client.insert_blob("photo.jpg", "t", "img"));
        assert!(client.close().is_ok());
    }
}
