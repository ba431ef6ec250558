//! mysqlkit: a small synchronous MySQL client with BLOB file transfer.
//!
//! - [`BlobTransfer`] streams files into BLOB columns and writes them back
//!   out, over any [`Connection`]
//! - [`Client`] wraps a connection with a prepare/bind/exec/next cursor and
//!   typed getters
//!
//! # Example
//!
//! ```rust,ignore
//! use mysqlkit::{BlobTransfer, MySqlConfig, MySqlConnection};
//!
//! let mut conn = MySqlConnection::connect(
//!     MySqlConfig::new().host("127.0.0.1").user("root").database("test"),
//! )?;
//!
//! let mut blobs = BlobTransfer::new(&mut conn);
//! let id = blobs.insert_blob("photo.jpg", "t", "img")?;
//! blobs.get_blob("t", "img", "id", id, "out.jpg")?;
//! ```

pub mod blob;
pub mod client;

pub use blob::{
    BlobRequest, BlobTransfer, DEFAULT_CHUNK_SIZE, Direction, MAX_CHUNK_SIZE, TransferOutcome,
};
pub use client::Client;
pub use mysqlkit_core::{
    BlobError, BlobErrorKind, Connection, Error, ExecOutcome, LongData, Result, Row,
    StatementResult, Value,
};
pub use mysqlkit_driver::{MySqlConfig, MySqlConnection};
