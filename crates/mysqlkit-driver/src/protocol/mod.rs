//! MySQL wire protocol.
//!
//! Every packet carries a 4-byte header: a 3-byte little-endian payload
//! length followed by a 1-byte sequence number. Payloads of 2^24 - 1 bytes
//! or more continue in follow-up packets.

pub mod prepared;
pub mod reader;
pub mod writer;

pub use prepared::{
    BoundParam, StmtPrepareOk, build_send_long_data_packet, build_stmt_close_packet,
    build_stmt_execute_packet, build_stmt_prepare_packet, parse_stmt_prepare_ok,
};
pub use reader::PacketReader;
pub use writer::PacketWriter;

/// Largest payload one packet can carry (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Capability flags negotiated during the handshake.
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Flags this client asks for. Multi-statements stay off: every call
    /// runs exactly one statement.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PS_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_DEPRECATE_EOF;
}

/// Command bytes (`COM_*`) used by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    Ping = 0x0e,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
}

/// Server status bits carried in OK and EOF packets.
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Collation ids sent in the handshake and reported per column.
pub mod charset {
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    /// Reported for BINARY/VARBINARY/BLOB columns
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_UNICODE_CI: u8 = 224;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    pub const DEFAULT_CHARSET: u8 = UTF8MB4_0900_AI_CI;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_length: u32,
    /// Wraps at 255
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Classification of a server response by its first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Ok,
    Error,
    /// 0xFE with a short payload; longer 0xFE payloads are row data
    Eof,
    LocalInfile,
    Data,
}

impl PacketType {
    pub fn from_first_byte(byte: u8, payload_len: u32) -> Self {
        match byte {
            0x00 => PacketType::Ok,
            0xFF => PacketType::Error,
            0xFE if payload_len < 9 => PacketType::Eof,
            0xFB => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn more_results(&self) -> bool {
        self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0
    }
}

#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    /// Five-character SQLSTATE, empty if the server sent none
    pub sql_state: String,
    pub error_message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let header = PacketHeader {
            payload_length: 0x0003_0201,
            sequence_id: 9,
        };
        assert_eq!(header.to_bytes(), [0x01, 0x02, 0x03, 9]);
        assert_eq!(PacketHeader::from_bytes(&[0x01, 0x02, 0x03, 9]), header);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn test_header_largest_payload() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 0,
        };
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0xFF, 0]);
    }

    #[test]
    fn test_packet_classification() {
        assert_eq!(PacketType::from_first_byte(0x00, 7), PacketType::Ok);
        assert_eq!(PacketType::from_first_byte(0xFF, 20), PacketType::Error);
        assert_eq!(PacketType::from_first_byte(0xFE, 5), PacketType::Eof);
        // a long 0xFE payload is a row whose first column is large
        assert_eq!(PacketType::from_first_byte(0xFE, 64), PacketType::Data);
        assert_eq!(PacketType::from_first_byte(0x03, 4), PacketType::Data);
    }

    #[test]
    fn test_more_results_flag() {
        let ok = OkPacket {
            status_flags: server_status::SERVER_MORE_RESULTS_EXISTS
                | server_status::SERVER_STATUS_AUTOCOMMIT,
            ..OkPacket::default()
        };
        assert!(ok.more_results());
        assert!(!OkPacket::default().more_results());
    }

    #[test]
    fn test_default_flags_exclude_ssl() {
        use capabilities::*;
        assert_eq!(DEFAULT_CLIENT_FLAGS & CLIENT_SSL, 0);
        assert_ne!(DEFAULT_CLIENT_FLAGS & CLIENT_DEPRECATE_EOF, 0);
    }
}
