//! Synchronous MySQL connection.
//!
//! Implements connection establishment, authentication, the text protocol
//! for parameterless statements, and server-side prepared statements for
//! everything else, including parameters streamed with
//! `COM_STMT_SEND_LONG_DATA`.

// MySQL protocol uses well-defined packet sizes that fit in u32 (max 16MB)
#![allow(clippy::cast_possible_truncation)]

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use mysqlkit_core::error::{
    ConnectionError, ConnectionErrorKind, ProtocolError, QueryError, QueryErrorKind,
};
use mysqlkit_core::{
    ColumnInfo, Connection, Error, ExecOutcome, LongData, Result, Row, StatementResult, Value,
};
use tracing::{debug, trace, warn};

use crate::auth;
use crate::config::MySqlConfig;
use crate::protocol::writer::frame_payload;
use crate::protocol::{
    BoundParam, Command, ErrPacket, MAX_PACKET_SIZE, PacketHeader, PacketReader, PacketType,
    PacketWriter, StmtPrepareOk, build_send_long_data_packet, build_stmt_close_packet,
    build_stmt_execute_packet, build_stmt_prepare_packet, capabilities, charset,
    parse_stmt_prepare_ok, server_status,
};
use crate::types::{ColumnDef, decode_binary_value, decode_text_value};

/// Upper bound on auth round trips (switch, key request, encrypted password).
const MAX_AUTH_ROUNDS: usize = 6;

/// Connection state in the MySQL protocol state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection established, awaiting handshake
    Connecting,
    Authenticating,
    /// Ready for commands
    Ready,
    /// A read or write failed mid-command; the stream is unusable
    Broken,
    Closed,
}

/// What the server announced in its initial handshake.
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub capabilities: u32,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin: String,
    /// Scramble, without the trailing NUL
    pub auth_data: Vec<u8>,
    pub charset: u8,
    pub status_flags: u16,
}

/// A statement prepared on the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub statement_id: u32,
    pub num_params: usize,
    /// Result columns; empty for statements that return no rows
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowFormat {
    Text,
    Binary,
}

/// MySQL connection.
///
/// Manages a TCP connection to a MySQL server, handling the wire protocol,
/// authentication, and state tracking.
pub struct MySqlConnection {
    stream: TcpStream,
    state: ConnectionState,
    server: Option<ServerHandshake>,
    /// Capabilities both sides agreed on
    capabilities: u32,
    status_flags: u16,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    config: MySqlConfig,
    /// Sequence id of the next packet to write
    sequence_id: u8,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("state", &self.state)
            .field("connection_id", &self.connection_id())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Establish a new connection to the MySQL server.
    ///
    /// This performs the complete connection handshake:
    /// 1. TCP connection
    /// 2. Receive server handshake
    /// 3. Send handshake response with authentication
    /// 4. Follow auth switches and `caching_sha2_password` full auth
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        let stream = open_stream(&config)?;

        stream.set_nodelay(true).ok();
        stream.set_read_timeout(Some(config.connect_timeout)).ok();
        stream.set_write_timeout(Some(config.connect_timeout)).ok();

        let mut conn = Self {
            stream,
            state: ConnectionState::Connecting,
            server: None,
            capabilities: 0,
            status_flags: 0,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            config,
            sequence_id: 0,
        };

        let (payload, _) = conn.read_packet()?;
        let handshake = parse_handshake(&payload)?;
        debug!(
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            plugin = %handshake.auth_plugin,
            "received server handshake"
        );
        conn.capabilities = conn.config.capability_flags() & handshake.capabilities;
        let plugin = handshake.auth_plugin.clone();
        let seed = handshake.auth_data.clone();
        conn.server = Some(handshake);
        conn.state = ConnectionState::Authenticating;

        conn.send_handshake_response(&plugin, &seed)?;
        conn.authenticate(plugin, seed)?;

        conn.stream.set_read_timeout(conn.config.read_timeout).ok();
        conn.stream.set_write_timeout(conn.config.write_timeout).ok();
        conn.state = ConnectionState::Ready;
        debug!(addr = %conn.config.socket_addr(), "connected");
        Ok(conn)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn connection_id(&self) -> u32 {
        self.server.as_ref().map_or(0, |s| s.connection_id)
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server.as_ref().map(|s| s.server_version.as_str())
    }

    /// Rows affected by the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    fn send_handshake_response(&mut self, plugin: &str, seed: &[u8]) -> Result<()> {
        let client_caps = self.capabilities;
        let auth_response = self.auth_response(plugin, seed);

        let mut writer = PacketWriter::new();
        writer.write_u32_le(client_caps);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.charset);
        writer.write_zeros(23);
        writer.write_null_string(&self.config.user);

        if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(&auth_response);
        } else if client_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            writer.write_u8(auth_response.len() as u8);
            writer.write_bytes(&auth_response);
        } else {
            writer.write_bytes(&auth_response);
            writer.write_u8(0);
        }

        if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
            writer.write_null_string(self.config.database.as_deref().unwrap_or(""));
        }
        if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_string(plugin);
        }
        if client_caps & capabilities::CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketWriter::new();
            for (key, value) in &self.config.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(attrs.as_bytes());
        }

        self.write_payload(writer.as_bytes())
    }

    /// First response for `plugin` given the current scramble.
    fn auth_response(&self, plugin: &str, seed: &[u8]) -> Vec<u8> {
        let password = self.config.password.as_deref().unwrap_or("");

        match plugin {
            auth::plugins::MYSQL_NATIVE_PASSWORD => auth::mysql_native_password(password, seed),
            auth::plugins::CACHING_SHA2_PASSWORD => auth::caching_sha2_password(password, seed),
            // ask for the server's public key
            auth::plugins::SHA256_PASSWORD if !password.is_empty() => vec![0x01],
            auth::plugins::SHA256_PASSWORD => vec![0x00],
            other => {
                warn!(plugin = other, "unknown auth plugin, trying mysql_native_password");
                auth::mysql_native_password(password, seed)
            }
        }
    }

    fn authenticate(&mut self, mut plugin: String, mut seed: Vec<u8>) -> Result<()> {
        for _ in 0..MAX_AUTH_ROUNDS {
            let (payload, _) = self.read_packet()?;
            match payload.first().copied() {
                Some(0x00) => {
                    let mut reader = PacketReader::new(&payload);
                    if let Some(ok) = reader.parse_ok_packet() {
                        self.status_flags = ok.status_flags;
                    }
                    return Ok(());
                }
                Some(0xFF) => {
                    let err = PacketReader::new(&payload)
                        .parse_err_packet()
                        .ok_or_else(|| protocol_error("Invalid error packet"))?;
                    return Err(auth_error(format!(
                        "Authentication failed: {} ({})",
                        err.error_message, err.error_code
                    )));
                }
                Some(0xFE) => {
                    let mut reader = PacketReader::new(&payload[1..]);
                    plugin = reader
                        .read_null_string()
                        .ok_or_else(|| protocol_error("Missing plugin name in auth switch"))?;
                    seed = reader.read_rest().to_vec();
                    if seed.last() == Some(&0) {
                        seed.pop();
                    }
                    debug!(plugin = %plugin, "server requested auth switch");
                    let response = self.auth_response(&plugin, &seed);
                    self.write_payload(&response)?;
                }
                Some(0x01) => self.auth_more_data(&plugin, &seed, &payload[1..])?,
                _ => {
                    return Err(protocol_error(format!(
                        "Unexpected packet during authentication: {:02X?}",
                        payload.first()
                    )));
                }
            }
        }
        Err(auth_error("Too many authentication round trips"))
    }

    /// Handle an auth-more-data packet (`0x01` already stripped).
    fn auth_more_data(&mut self, plugin: &str, seed: &[u8], data: &[u8]) -> Result<()> {
        match data {
            [auth::caching_sha2::FAST_AUTH_SUCCESS] => {
                trace!("fast auth succeeded");
                Ok(())
            }
            [auth::caching_sha2::PERFORM_FULL_AUTH] => {
                debug!(plugin, "full authentication requested, fetching public key");
                self.write_payload(&[auth::caching_sha2::REQUEST_PUBLIC_KEY])
            }
            pem if pem.starts_with(b"-----BEGIN") => {
                let password = self.config.password.as_deref().unwrap_or("");
                let encrypted =
                    auth::sha256_password_rsa(password, seed, pem, self.server_uses_oaep())?;
                self.write_payload(&encrypted)
            }
            _ => Err(protocol_error(format!(
                "Unknown auth-more-data for {plugin}: {:02X?}",
                data.first()
            ))),
        }
    }

    /// OAEP padding arrived in MySQL 8.0.5.
    fn server_uses_oaep(&self) -> bool {
        self.server_version()
            .and_then(parse_version)
            .is_none_or(|v| v >= (8, 0, 5))
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Broken => Err(not_open("Connection is broken")),
            _ => Err(not_open("Connection is not open")),
        }
    }

    /// Run a statement over the text protocol (`COM_QUERY`).
    pub fn query_text(&mut self, sql: &str) -> Result<StatementResult> {
        self.ensure_ready()?;
        trace!(sql, "COM_QUERY");

        self.begin_command();
        let mut writer = PacketWriter::with_capacity(1 + sql.len());
        writer.write_u8(Command::Query as u8);
        writer.write_bytes(sql.as_bytes());
        self.write_payload(writer.as_bytes())?;

        self.read_response(RowFormat::Text, None)
            .map_err(|e| e.with_sql(sql))
    }

    /// Change the default schema (`COM_INIT_DB`).
    pub fn select_database(&mut self, database: &str) -> Result<()> {
        self.ensure_ready()?;
        self.begin_command();
        let mut writer = PacketWriter::command(Command::InitDb as u8);
        writer.write_bytes(database.as_bytes());
        self.write_payload(writer.as_bytes())?;
        self.read_response(RowFormat::Text, None)?;
        self.config.database = Some(database.to_string());
        Ok(())
    }

    /// Prepare a statement on the server.
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.ensure_ready()?;
        trace!(sql, "COM_STMT_PREPARE");

        self.begin_command();
        self.write_payload(&build_stmt_prepare_packet(sql))?;

        let (payload, _) = self.read_packet()?;
        if payload.first() == Some(&0xFF) {
            return Err(server_error(&payload)?.with_sql(sql));
        }
        let StmtPrepareOk {
            statement_id,
            num_columns,
            num_params,
            warnings,
        } = parse_stmt_prepare_ok(&payload)
            .ok_or_else(|| protocol_error("Invalid COM_STMT_PREPARE response"))?;
        self.warnings = warnings;

        // parameter definitions carry no useful type information
        if num_params > 0 {
            for _ in 0..num_params {
                self.read_packet()?;
            }
            self.skip_eof()?;
        }

        let mut columns = Vec::with_capacity(usize::from(num_columns));
        for _ in 0..num_columns {
            columns.push(self.read_column_def()?);
        }
        if num_columns > 0 {
            self.skip_eof()?;
        }

        Ok(PreparedStatement {
            statement_id,
            num_params: usize::from(num_params),
            columns,
        })
    }

    /// Send one chunk of a streamed parameter. The server does not reply.
    pub fn send_long_data(&mut self, stmt: &PreparedStatement, param: u16, chunk: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        self.begin_command();
        self.write_payload(&build_send_long_data_packet(
            stmt.statement_id,
            param,
            chunk,
        ))
    }

    /// Execute a prepared statement with its bindings.
    pub fn execute_prepared(
        &mut self,
        stmt: &PreparedStatement,
        params: &[BoundParam<'_>],
    ) -> Result<StatementResult> {
        self.ensure_ready()?;
        if params.len() != stmt.num_params {
            return Err(parameter_mismatch(stmt.num_params, params.len()));
        }

        self.begin_command();
        self.write_payload(&build_stmt_execute_packet(stmt.statement_id, params))?;
        self.read_response(RowFormat::Binary, Some(&stmt.columns))
    }

    /// Deallocate a prepared statement. The server does not reply.
    pub fn close_statement(&mut self, stmt: &PreparedStatement) -> Result<()> {
        self.ensure_ready()?;
        self.begin_command();
        self.write_payload(&build_stmt_close_packet(stmt.statement_id))
    }

    /// Prepare, execute, and close `sql` with inline parameters.
    fn run_prepared(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let stmt = self.prepare(sql)?;
        let bound: Vec<BoundParam<'_>> = params.iter().map(BoundParam::Value).collect();
        let result = self.execute_prepared(&stmt, &bound);
        self.finish_statement(&stmt);
        result.map_err(|e| e.with_sql(sql))
    }

    fn stream_prepared(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
        long_data: LongData<'_>,
    ) -> Result<ExecOutcome> {
        let LongData {
            index,
            reader,
            buffer,
        } = long_data;

        if stmt.num_params != params.len() + 1 || index >= stmt.num_params {
            return Err(parameter_mismatch(stmt.num_params, params.len() + 1));
        }
        let param_id = u16::try_from(index).map_err(|_| parameter_mismatch(stmt.num_params, index))?;
        if buffer.is_empty() {
            return Err(Error::Custom("long data buffer must not be empty".to_string()));
        }

        let mut bytes_sent = 0u64;
        let mut chunks = 0usize;
        loop {
            let n = match reader.read(buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            };
            self.send_long_data(stmt, param_id, &buffer[..n])?;
            bytes_sent += n as u64;
            chunks += 1;
        }
        if chunks == 0 {
            // mark the parameter as long data so the execute packet omits it
            self.send_long_data(stmt, param_id, &[])?;
        }
        trace!(param = index, chunks, bytes_sent, "long data sent");

        let mut inline = params.iter();
        let bound: Vec<BoundParam<'_>> = (0..stmt.num_params)
            .map(|i| {
                if i == index {
                    BoundParam::LongData
                } else {
                    inline.next().map_or(BoundParam::LongData, BoundParam::Value)
                }
            })
            .collect();

        let result = self.execute_prepared(stmt, &bound)?;
        Ok(ExecOutcome {
            affected_rows: result.affected_rows,
            last_insert_id: result.last_insert_id,
            bytes_sent,
        })
    }

    /// Close `stmt`, logging rather than failing: the command's own result
    /// is what the caller needs.
    fn finish_statement(&mut self, stmt: &PreparedStatement) {
        if self.state != ConnectionState::Ready {
            return;
        }
        if let Err(e) = self.close_statement(stmt) {
            warn!(statement_id = stmt.statement_id, error = %e, "failed to close statement");
        }
    }

    /// Read the reply to a command: OK, ERR, or a result set.
    ///
    /// Further result sets flagged by `SERVER_MORE_RESULTS_EXISTS` are read
    /// and discarded; only the first is returned.
    fn read_response(
        &mut self,
        format: RowFormat,
        columns: Option<&[ColumnDef]>,
    ) -> Result<StatementResult> {
        let first = self.read_one_response(format, columns)?;
        while self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0 {
            let extra = self.read_one_response(format, None)?;
            debug!(rows = extra.rows.len(), "discarded additional result set");
        }
        Ok(first)
    }

    fn read_one_response(
        &mut self,
        format: RowFormat,
        columns: Option<&[ColumnDef]>,
    ) -> Result<StatementResult> {
        let (payload, _) = self.read_packet()?;
        let Some(&first) = payload.first() else {
            return Err(protocol_error("Empty response"));
        };

        match PacketType::from_first_byte(first, payload.len() as u32) {
            PacketType::Ok => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("Invalid OK packet"))?;
                self.affected_rows = ok.affected_rows;
                self.last_insert_id = ok.last_insert_id;
                self.status_flags = ok.status_flags;
                self.warnings = ok.warnings;
                Ok(StatementResult {
                    rows: Vec::new(),
                    affected_rows: ok.affected_rows,
                    last_insert_id: ok.last_insert_id,
                })
            }
            PacketType::Error => Err(server_error(&payload)?),
            PacketType::LocalInfile => {
                // the server waits for file contents; an empty packet declines
                self.write_payload(&[])?;
                let _ = self.read_packet()?;
                Err(Error::Query(QueryError {
                    kind: QueryErrorKind::Permission,
                    sql: None,
                    sqlstate: None,
                    code: None,
                    message: "LOAD DATA LOCAL INFILE is not supported".to_string(),
                    source: None,
                }))
            }
            PacketType::Eof | PacketType::Data => self.read_result_set(&payload, format, columns),
        }
    }

    fn read_result_set(
        &mut self,
        first_packet: &[u8],
        format: RowFormat,
        prepared_columns: Option<&[ColumnDef]>,
    ) -> Result<StatementResult> {
        let column_count = PacketReader::new(first_packet)
            .read_lenenc_int()
            .ok_or_else(|| protocol_error("Invalid column count"))? as usize;

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(self.read_column_def()?);
        }
        self.skip_eof()?;

        // metadata sent at prepare time may be stale for `SELECT *`
        if let Some(prepared) = prepared_columns {
            if prepared.len() != columns.len() {
                debug!(
                    prepared = prepared.len(),
                    actual = columns.len(),
                    "result columns differ from prepare metadata"
                );
            }
        }

        let info = Arc::new(ColumnInfo::new(
            columns.iter().map(|c| c.name.clone()).collect(),
        ));

        let mut rows = Vec::new();
        loop {
            let (payload, _) = self.read_packet()?;
            match payload.first() {
                Some(0xFE) if payload.len() < MAX_PACKET_SIZE => {
                    let (status, warnings) =
                        parse_terminator(&payload, self.deprecate_eof())
                            .ok_or_else(|| protocol_error("Invalid result set terminator"))?;
                    self.status_flags = status;
                    self.warnings = warnings;
                    break;
                }
                Some(0xFF) => return Err(server_error(&payload)?),
                _ => {
                    let row = match format {
                        RowFormat::Text => parse_text_row(&payload, &columns, Arc::clone(&info))?,
                        RowFormat::Binary => {
                            parse_binary_row(&payload, &columns, Arc::clone(&info))?
                        }
                    };
                    rows.push(row);
                }
            }
        }

        self.affected_rows = 0;
        self.last_insert_id = 0;
        trace!(columns = column_count, rows = rows.len(), "result set read");
        Ok(StatementResult {
            rows,
            affected_rows: 0,
            last_insert_id: 0,
        })
    }

    fn read_column_def(&mut self) -> Result<ColumnDef> {
        let (payload, _) = self.read_packet()?;
        ColumnDef::parse(&payload).ok_or_else(|| Error::Protocol(ProtocolError {
            message: "Invalid column definition".to_string(),
            raw_data: Some(payload),
            source: None,
        }))
    }

    fn deprecate_eof(&self) -> bool {
        self.capabilities & capabilities::CLIENT_DEPRECATE_EOF != 0
    }

    /// Consume the EOF that follows column definitions on older servers.
    fn skip_eof(&mut self) -> Result<()> {
        if self.deprecate_eof() {
            return Ok(());
        }
        let (payload, _) = self.read_packet()?;
        if payload.first() != Some(&0xFE) {
            return Err(protocol_error("Expected EOF after column definitions"));
        }
        Ok(())
    }

    /// Ping the server to check connection.
    pub fn ping(&mut self) -> Result<()> {
        self.ensure_ready()?;
        self.begin_command();
        self.write_payload(&[Command::Ping as u8])?;

        let (payload, _) = self.read_packet()?;
        match payload.first() {
            Some(0x00) => Ok(()),
            Some(0xFF) => Err(server_error(&payload)?),
            _ => Err(protocol_error("Unexpected ping response")),
        }
    }

    /// Close the connection gracefully. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if matches!(self.state, ConnectionState::Closed) {
            return Ok(());
        }
        if self.state == ConnectionState::Ready {
            self.begin_command();
            // best effort; the server may already be gone
            let _ = self.write_payload(&[Command::Quit as u8]);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.state = ConnectionState::Closed;
        debug!(connection_id = self.connection_id(), "connection closed");
        Ok(())
    }

    fn begin_command(&mut self) {
        self.sequence_id = 0;
    }

    /// Read a complete packet, joining continuation packets.
    fn read_packet(&mut self) -> Result<(Vec<u8>, u8)> {
        let mut payload = Vec::new();
        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            self.read_exact_or_break(&mut header_buf, "packet header")?;
            let header = PacketHeader::from_bytes(&header_buf);
            let len = header.payload_length as usize;
            self.sequence_id = header.sequence_id.wrapping_add(1);

            if payload.len() + len > self.config.max_packet_size as usize {
                self.state = ConnectionState::Broken;
                return Err(protocol_error(format!(
                    "Packet exceeds max_packet_size ({} bytes)",
                    self.config.max_packet_size
                )));
            }

            let start = payload.len();
            payload.resize(start + len, 0);
            self.read_exact_or_break(&mut payload[start..], "packet payload")?;

            if len < MAX_PACKET_SIZE {
                return Ok((payload, header.sequence_id));
            }
        }
    }

    fn read_exact_or_break(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.stream.read_exact(buf).map_err(|e| {
            self.state = ConnectionState::Broken;
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("Failed to read {what}: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Frame and write one logical payload.
    fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let (packet, next) = frame_payload(payload, self.sequence_id);
        self.sequence_id = next;

        let written = self
            .stream
            .write_all(&packet)
            .and_then(|()| self.stream.flush());
        written.map_err(|e| {
            self.state = ConnectionState::Broken;
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("Failed to write packet: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }
}

impl Connection for MySqlConnection {
    fn run(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        if params.is_empty() {
            self.query_text(sql)
        } else {
            self.run_prepared(sql, params)
        }
    }

    fn execute_streamed(
        &mut self,
        sql: &str,
        params: &[Value],
        long_data: LongData<'_>,
    ) -> Result<ExecOutcome> {
        let stmt = self.prepare(sql)?;
        let outcome = self.stream_prepared(&stmt, params, long_data);
        self.finish_statement(&stmt);
        outcome.map_err(|e| e.with_sql(sql))
    }

    fn ping(&mut self) -> Result<()> {
        MySqlConnection::ping(self)
    }

    fn close(&mut self) -> Result<()> {
        MySqlConnection::close(self)
    }
}

fn open_stream(config: &MySqlConfig) -> Result<TcpStream> {
    let addr = config.socket_addr();
    let addrs = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to resolve {addr}: {e}"),
                source: Some(Box::new(e)),
            })
        })?;

    let mut last_err = None;
    for candidate in addrs {
        match TcpStream::connect_timeout(&candidate, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(addr = %candidate, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    let Some(e) = last_err else {
        return Err(connection_error(format!("{addr} resolved to no addresses")));
    };
    let kind = if e.kind() == ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Err(Error::Connection(ConnectionError {
        kind,
        message: format!("Failed to connect to {addr}: {e}"),
        source: Some(Box::new(e)),
    }))
}

/// Parse the protocol-10 initial handshake.
pub fn parse_handshake(payload: &[u8]) -> Result<ServerHandshake> {
    let mut reader = PacketReader::new(payload);

    if reader.peek() == Some(0xFF) {
        let err = reader
            .parse_err_packet()
            .ok_or_else(|| protocol_error("Invalid error packet"))?;
        return Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Refused,
            message: format!("Server refused connection: {}", err.error_message),
            source: None,
        }));
    }

    let protocol_version = reader
        .read_u8()
        .ok_or_else(|| protocol_error("Missing protocol version"))?;
    if protocol_version != 10 {
        return Err(protocol_error(format!(
            "Unsupported protocol version: {protocol_version}"
        )));
    }

    let server_version = reader
        .read_null_string()
        .ok_or_else(|| protocol_error("Missing server version"))?;
    let connection_id = reader
        .read_u32_le()
        .ok_or_else(|| protocol_error("Missing connection ID"))?;
    let auth_data_1 = reader
        .read_bytes(8)
        .ok_or_else(|| protocol_error("Missing auth data"))?;
    reader.skip(1);

    let caps_lower = reader
        .read_u16_le()
        .ok_or_else(|| protocol_error("Missing capability flags"))?;
    let charset = reader.read_u8().unwrap_or(charset::UTF8MB4_0900_AI_CI);
    let status_flags = reader.read_u16_le().unwrap_or(0);
    let caps_upper = reader.read_u16_le().unwrap_or(0);
    let server_caps = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

    let auth_data_len = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        usize::from(reader.read_u8().unwrap_or(0))
    } else {
        0
    };
    reader.skip(10);

    let mut auth_data = auth_data_1.to_vec();
    if server_caps & capabilities::CLIENT_SECURE_CONNECTION != 0 {
        let len2 = auth_data_len.saturating_sub(8).max(13);
        if let Some(part2) = reader.read_bytes(len2.min(reader.remaining())) {
            auth_data.extend_from_slice(part2.strip_suffix(&[0]).unwrap_or(part2));
        }
    }

    let auth_plugin = if server_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        reader.read_null_string().unwrap_or_default()
    } else {
        auth::plugins::MYSQL_NATIVE_PASSWORD.to_string()
    };

    Ok(ServerHandshake {
        capabilities: server_caps,
        server_version,
        connection_id,
        auth_plugin,
        auth_data,
        charset,
        status_flags,
    })
}

/// `(status_flags, warnings)` from a result-set terminator.
///
/// With `CLIENT_DEPRECATE_EOF` the terminator is an OK packet with a 0xFE
/// header; otherwise it is a classic EOF packet.
fn parse_terminator(payload: &[u8], deprecate_eof: bool) -> Option<(u16, u16)> {
    if deprecate_eof {
        let mut reader = PacketReader::new(payload.get(1..)?);
        reader.read_lenenc_int()?;
        reader.read_lenenc_int()?;
        let status = reader.read_u16_le()?;
        let warnings = reader.read_u16_le().unwrap_or(0);
        Some((status, warnings))
    } else {
        let eof = PacketReader::new(payload).parse_eof_packet()?;
        Some((eof.status_flags, eof.warnings))
    }
}

/// Parse a text protocol row: one length-encoded string per column, 0xFB for NULL.
fn parse_text_row(data: &[u8], columns: &[ColumnDef], info: Arc<ColumnInfo>) -> Result<Row> {
    let mut reader = PacketReader::new(data);
    let mut values = Vec::with_capacity(columns.len());

    for col in columns {
        if reader.peek() == Some(0xFB) {
            reader.skip(1);
            values.push(Value::Null);
            continue;
        }
        let bytes = reader
            .read_lenenc_bytes()
            .ok_or_else(|| row_error(format!("Truncated text row at column {}", col.name), data))?;
        values.push(decode_text_value(col, bytes));
    }

    Ok(Row::with_columns(info, values))
}

/// Parse a binary protocol row: 0x00 header, NULL bitmap offset by two
/// bits, then the non-NULL values.
fn parse_binary_row(data: &[u8], columns: &[ColumnDef], info: Arc<ColumnInfo>) -> Result<Row> {
    let mut reader = PacketReader::new(data);
    if reader.read_u8() != Some(0x00) {
        return Err(row_error("Binary row missing 0x00 header", data));
    }
    let bitmap = reader
        .read_bytes((columns.len() + 7 + 2) / 8)
        .ok_or_else(|| row_error("Binary row missing NULL bitmap", data))?;

    let mut values = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = decode_binary_value(col, &mut reader).ok_or_else(|| {
            row_error(format!("Truncated binary row at column {}", col.name), data)
        })?;
        values.push(value);
    }

    Ok(Row::with_columns(info, values))
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let core = version.split(|c: char| !(c.is_ascii_digit() || c == '.')).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u32>().ok());
    Some((parts.next()??, parts.next()??, parts.next().flatten().unwrap_or(0)))
}

// Helper functions for creating errors

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: None,
        source: None,
    })
}

fn row_error(msg: impl Into<String>, data: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        message: msg.into(),
        raw_data: Some(data.to_vec()),
        source: None,
    })
}

fn auth_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Authentication,
        message: msg.into(),
        source: None,
    })
}

fn connection_error(msg: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message: msg.into(),
        source: None,
    })
}

fn not_open(msg: &str) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::NotOpen,
        message: msg.to_string(),
        source: None,
    })
}

fn parameter_mismatch(expected: usize, actual: usize) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::ParameterMismatch,
        sql: None,
        sqlstate: None,
        code: None,
        message: format!("Statement expects {expected} parameters, got {actual}"),
        source: None,
    })
}

/// Turn an ERR payload into a query error.
fn server_error(payload: &[u8]) -> Result<Error> {
    let err = PacketReader::new(payload)
        .parse_err_packet()
        .ok_or_else(|| protocol_error("Invalid error packet"))?;
    debug!(code = err.error_code, sqlstate = %err.sql_state, "server error");
    Ok(query_error(&err))
}

fn query_error(err: &ErrPacket) -> Error {
    let kind = match err.error_code {
        1022 | 1048 | 1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1557 | 3819 => {
            QueryErrorKind::Constraint
        }
        1049 | 1051 | 1054 | 1091 | 1146 | 1305 => QueryErrorKind::NotFound,
        1064 | 1149 => QueryErrorKind::Syntax,
        1044 | 1045 | 1142 | 1143 | 1227 => QueryErrorKind::Permission,
        1264 | 1265 | 1366 | 1406 => QueryErrorKind::DataTruncation,
        1213 => QueryErrorKind::Deadlock,
        1205 | 3024 => QueryErrorKind::Timeout,
        1210 => QueryErrorKind::ParameterMismatch,
        _ => QueryErrorKind::Database,
    };

    Error::Query(QueryError {
        kind,
        sql: None,
        sqlstate: (!err.sql_state.is_empty()).then(|| err.sql_state.clone()),
        code: Some(err.error_code),
        message: err.error_message.clone(),
        source: None,
    })
}
