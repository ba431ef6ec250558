//! Synchronous MySQL driver for mysqlkit.
//!
//! This crate implements the MySQL wire protocol over a blocking
//! `std::net::TcpStream`. It provides:
//!
//! - Packet framing with sequence numbers
//! - Authentication (mysql_native_password, caching_sha2_password, sha256_password)
//! - Text protocol for parameterless statements
//! - Server-side prepared statements, including parameters streamed with
//!   `COM_STMT_SEND_LONG_DATA`
//! - Type conversion between MySQL column types and [`mysqlkit_core::Value`]
//!
//! # Example
//!
//! ```rust,ignore
//! use mysqlkit_core::Connection;
//! use mysqlkit_driver::{MySqlConfig, MySqlConnection};
//!
//! let config = MySqlConfig::new()
//!     .host("127.0.0.1")
//!     .user("root")
//!     .password("secret")
//!     .database("test");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let rows = conn.query("SELECT id, name FROM mytable1", &[])?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod types;

pub use config::{DEFAULT_PORT, MySqlConfig};
pub use connection::{ConnectionState, MySqlConnection, PreparedStatement, ServerHandshake};
