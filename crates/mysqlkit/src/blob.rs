//! BLOB import and export between local files and table columns.
//!
//! Three operations, all keyed by table and column name:
//!
//! - **insert**: a new row whose BLOB column holds the file contents
//! - **store**: overwrite the BLOB column of rows where `ref_column = ref_value`
//! - **extract**: write the BLOB column of the first matching row to a file
//!
//! Uploads never load the whole file: it is read into a fixed-size chunk
//! buffer and each chunk goes to the server as long data for the
//! statement's BLOB placeholder. The payload is bound, never spliced into
//! SQL text, so NUL, quote and backslash bytes arrive unchanged.
//!
//! ```rust,ignore
//! use mysqlkit::BlobTransfer;
//!
//! let mut blobs = BlobTransfer::new(&mut conn);
//! let id = blobs.insert_blob("photo.jpg", "t", "img")?;
//! blobs.get_blob("t", "img", "id", id, "out.jpg")?;
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use mysqlkit_core::connection::row_id;
use mysqlkit_core::error::{BlobError, BlobErrorKind, TypeError};
use mysqlkit_core::{Connection, Error, LongData, Result, Value, try_quote_ident, try_quote_qualified};
use mysqlkit_driver::protocol::MAX_PACKET_SIZE;
use tracing::{debug, warn};

/// Chunk size used unless [`BlobTransfer::with_chunk_size`] says otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk that still fits one `COM_STMT_SEND_LONG_DATA` packet
/// (command byte, statement id and parameter id take 7 bytes).
pub const MAX_CHUNK_SIZE: usize = MAX_PACKET_SIZE - 7;

/// Which way a transfer moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// File into a new row
    Insert,
    /// File into existing rows
    Store,
    /// Column of an existing row into a file
    Extract,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Insert => "insert",
            Direction::Store => "store",
            Direction::Extract => "extract",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one transfer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobRequest {
    pub table: String,
    pub column: String,
    /// Row selector column; required for store and extract
    pub ref_column: Option<String>,
    /// Row selector value; required for store and extract
    pub ref_value: Option<Value>,
    /// Source file for insert/store, destination for extract
    pub path: PathBuf,
    pub direction: Direction,
}

impl BlobRequest {
    pub fn insert(path: impl Into<PathBuf>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            ref_column: None,
            ref_value: None,
            path: path.into(),
            direction: Direction::Insert,
        }
    }

    pub fn store(
        path: impl Into<PathBuf>,
        table: impl Into<String>,
        column: impl Into<String>,
        ref_column: impl Into<String>,
        ref_value: impl Into<Value>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            ref_column: Some(ref_column.into()),
            ref_value: Some(ref_value.into()),
            path: path.into(),
            direction: Direction::Store,
        }
    }

    pub fn extract(
        table: impl Into<String>,
        column: impl Into<String>,
        ref_column: impl Into<String>,
        ref_value: impl Into<Value>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            ref_column: Some(ref_column.into()),
            ref_value: Some(ref_value.into()),
            path: path.into(),
            direction: Direction::Extract,
        }
    }

    /// Reject requests with missing parts before any file or network I/O.
    pub fn validate(&self) -> Result<()> {
        let missing = |what: &str| {
            Err(Error::Blob(BlobError::new(
                BlobErrorKind::InvalidRequest,
                format!("{} request has no {what}", self.direction),
            )))
        };

        if self.table.is_empty() {
            return missing("table name");
        }
        if self.column.is_empty() {
            return missing("column name");
        }
        if self.path.as_os_str().is_empty() {
            return missing("file path");
        }

        match self.direction {
            Direction::Insert => Ok(()),
            Direction::Store | Direction::Extract => {
                if self.ref_column.as_deref().is_none_or(str::is_empty) {
                    return missing("reference column");
                }
                match &self.ref_value {
                    None | Some(Value::Null) => missing("reference value"),
                    Some(Value::Text(s)) if s.is_empty() => missing("reference value"),
                    Some(_) => Ok(()),
                }
            }
        }
    }
}

/// What a finished transfer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub direction: Direction,
    /// Bytes read from the file (insert/store) or written to it (extract)
    pub bytes: u64,
    /// Rows the statement changed; 0 for extract
    pub affected_rows: u64,
    /// Generated id for insert, 0 otherwise
    pub last_insert_id: u64,
}

/// Moves file contents in and out of BLOB columns over a borrowed connection.
///
/// The connection stays with the caller; each call prepares, streams and
/// closes its own statement and opens and closes its own file.
#[derive(Debug)]
pub struct BlobTransfer<'c, C: Connection + ?Sized> {
    conn: &'c mut C,
    chunk_size: usize,
}

impl<'c, C: Connection + ?Sized> BlobTransfer<'c, C> {
    pub fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the chunk size, clamped to `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Insert a new row holding the file's bytes in `column`.
    ///
    /// Returns the new row's auto-increment id. A missing or unreadable file
    /// fails before any statement runs, so no row is created. An id past
    /// `i64::MAX` is a type error; [`BlobTransfer::transfer`] reports it as `u64`.
    pub fn insert_blob(&mut self, file_path: impl AsRef<Path>, table: &str, column: &str) -> Result<i64> {
        let outcome = self.transfer(&BlobRequest::insert(file_path.as_ref(), table, column))?;
        row_id(outcome.last_insert_id)
    }

    /// Overwrite `column` with the file's bytes where `ref_column = ref_value`.
    ///
    /// Returns the affected-row count, which may be zero or more than one.
    pub fn set_blob(
        &mut self,
        file_path: impl AsRef<Path>,
        table: &str,
        column: &str,
        ref_column: &str,
        ref_value: impl Into<Value>,
    ) -> Result<u64> {
        let request = BlobRequest::store(file_path.as_ref(), table, column, ref_column, ref_value);
        Ok(self.transfer(&request)?.affected_rows)
    }

    /// Write `column` of the first row where `ref_column = ref_value` to
    /// `output_path`, returning the number of bytes written.
    ///
    /// When no row matches the output file is neither created nor touched.
    pub fn get_blob(
        &mut self,
        table: &str,
        column: &str,
        ref_column: &str,
        ref_value: impl Into<Value>,
        output_path: impl AsRef<Path>,
    ) -> Result<u64> {
        let request = BlobRequest::extract(table, column, ref_column, ref_value, output_path.as_ref());
        Ok(self.transfer(&request)?.bytes)
    }

    /// Run any transfer request.
    #[tracing::instrument(
        level = "debug",
        skip(self, request),
        fields(direction = %request.direction, table = %request.table, column = %request.column)
    )]
    pub fn transfer(&mut self, request: &BlobRequest) -> Result<TransferOutcome> {
        request.validate()?;
        match request.direction {
            Direction::Insert | Direction::Store => self.upload(request),
            Direction::Extract => self.extract(request),
        }
    }

    fn upload(&mut self, request: &BlobRequest) -> Result<TransferOutcome> {
        let table = try_quote_qualified(&request.table)?;
        let column = try_quote_ident(&request.column)?;
        let (sql, params) = match (&request.ref_column, &request.ref_value) {
            (Some(ref_column), Some(ref_value)) if request.direction == Direction::Store => {
                let ref_column = try_quote_ident(ref_column)?;
                (
                    format!("UPDATE {table} SET {column} = ? WHERE {ref_column} = ?"),
                    vec![ref_value.clone()],
                )
            }
            _ => (format!("INSERT INTO {table} ({column}) VALUES (?)"), Vec::new()),
        };

        let path = request.path.as_path();
        let mut file = File::open(path).map_err(|e| BlobError::file_access(path, "open", e))?;
        let size = file
            .metadata()
            .map_err(|e| BlobError::file_access(path, "stat", e))?
            .len();
        debug!(path = %path.display(), size, chunk_size = self.chunk_size, "streaming file");

        let buffer_len = usize::try_from(size).map_or(self.chunk_size, |len| len.clamp(1, self.chunk_size));
        let mut buffer = vec![0u8; buffer_len];
        let outcome = self
            .conn
            .execute_streamed(
                &sql,
                &params,
                LongData {
                    index: 0,
                    reader: &mut file,
                    buffer: &mut buffer,
                },
            )
            .map_err(|e| match e {
                Error::Io(io) => Error::Blob(BlobError::file_access(path, "read", io)),
                other => other,
            })?;

        if outcome.bytes_sent != size {
            warn!(
                path = %path.display(),
                expected = size,
                sent = outcome.bytes_sent,
                "file size changed during transfer"
            );
        }

        Ok(TransferOutcome {
            direction: request.direction,
            bytes: outcome.bytes_sent,
            affected_rows: outcome.affected_rows,
            last_insert_id: outcome.last_insert_id,
        })
    }

    fn extract(&mut self, request: &BlobRequest) -> Result<TransferOutcome> {
        let table = try_quote_qualified(&request.table)?;
        let column = try_quote_ident(&request.column)?;
        let ref_column = try_quote_ident(request.ref_column.as_deref().unwrap_or_default())?;
        let ref_value = request.ref_value.clone().unwrap_or(Value::Null);

        let sql = format!("SELECT {column} FROM {table} WHERE {ref_column} = ?");
        let row = self.conn.query_one(&sql, &[ref_value])?.ok_or_else(|| {
            BlobError::new(
                BlobErrorKind::RowNotFound,
                format!(
                    "no row in {} where {} matches",
                    request.table,
                    request.ref_column.as_deref().unwrap_or_default()
                ),
            )
        })?;

        let data = match row.into_values().into_iter().next() {
            Some(Value::Bytes(bytes)) => bytes,
            Some(Value::Text(text)) => text.into_bytes(),
            Some(Value::Null) | None => {
                return Err(Error::Blob(BlobError::new(
                    BlobErrorKind::NullValue,
                    format!("{}.{} is NULL", request.table, request.column),
                )));
            }
            Some(other) => {
                return Err(Error::Type(TypeError {
                    expected: "BLOB or TEXT",
                    actual: other.type_name().to_string(),
                    column: Some(request.column.clone()),
                }));
            }
        };

        let path = request.path.as_path();
        let removable = removable_on_failure(path);
        let mut file = File::create(path).map_err(|e| BlobError::file_access(path, "create", e))?;
        let written = write_chunks(&mut file, &data, self.chunk_size).and_then(|()| sync_regular(&file));
        drop(file);
        finish_output(path, removable, written)?;
        debug!(path = %path.display(), bytes = data.len(), "blob written");

        Ok(TransferOutcome {
            direction: Direction::Extract,
            bytes: data.len() as u64,
            affected_rows: 0,
            last_insert_id: 0,
        })
    }
}

fn write_chunks<W: Write>(out: &mut W, data: &[u8], chunk_size: usize) -> io::Result<()> {
    for chunk in data.chunks(chunk_size) {
        out.write_all(chunk)?;
    }
    out.flush()
}

/// Pipes, terminals and devices reject fsync; only regular files are synced.
fn sync_regular(file: &File) -> io::Result<()> {
    if file.metadata()?.is_file() {
        file.sync_all()?;
    }
    Ok(())
}

/// Whether a failed extract may delete `path`: only when it is absent now
/// (so this call creates it) or is a plain file. Symlinks, devices and
/// pipes are never removed.
fn removable_on_failure(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => meta.file_type().is_file(),
        Err(e) => e.kind() == io::ErrorKind::NotFound,
    }
}

/// Turn the outcome of writing `path` into the transfer result, removing
/// the partial output on failure when `removable`.
fn finish_output(path: &Path, removable: bool, written: io::Result<()>) -> Result<()> {
    let Err(e) = written else {
        return Ok(());
    };
    if let Some(remove_err) = removable.then(|| fs::remove_file(path)).and_then(std::result::Result::err) {
        warn!(path = %path.display(), error = %remove_err, "failed to remove partial output");
    }
    Err(Error::Blob(BlobError::file_access(path, "write", e)))
}
