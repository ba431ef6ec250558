//! Binary protocol (server-side prepared statements).
//!
//! A statement's life on the wire:
//!
//! 1. `COM_STMT_PREPARE` with the SQL text; the server answers with a
//!    statement id, the parameter and column counts, then their definitions.
//! 2. Zero or more `COM_STMT_SEND_LONG_DATA` packets per streamed parameter.
//!    The server appends each chunk and sends no reply.
//! 3. `COM_STMT_EXECUTE` with the remaining parameters in binary form.
//!    Long-data parameters are declared in the type list but carry no value.
//! 4. `COM_STMT_CLOSE`, also without a reply.
//!
//! Builders here return payloads; the connection frames them.

#![allow(clippy::cast_possible_truncation)]

use chrono::Timelike;
use mysqlkit_core::Value;

use super::{Command, PacketReader, PacketWriter};
use crate::types::{FieldType, days_to_date, micros_to_datetime};

/// Fixed-size header of a `COM_STMT_PREPARE` OK response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

/// One placeholder's binding in an execute packet.
#[derive(Debug, Clone, Copy)]
pub enum BoundParam<'a> {
    /// Sent inline
    Value(&'a Value),
    /// Already delivered through `COM_STMT_SEND_LONG_DATA`
    LongData,
}

pub fn build_stmt_prepare_packet(sql: &str) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(1 + sql.len());
    writer.write_u8(Command::StmtPrepare as u8);
    writer.write_bytes(sql.as_bytes());
    writer.into_bytes()
}

/// `COM_STMT_SEND_LONG_DATA`: one chunk for parameter `param_id`.
pub fn build_send_long_data_packet(statement_id: u32, param_id: u16, chunk: &[u8]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(7 + chunk.len());
    writer.write_u8(Command::StmtSendLongData as u8);
    writer.write_u32_le(statement_id);
    writer.write_u16_le(param_id);
    writer.write_bytes(chunk);
    writer.into_bytes()
}

/// `COM_STMT_EXECUTE` without a cursor, one iteration, types always sent.
pub fn build_stmt_execute_packet(statement_id: u32, params: &[BoundParam<'_>]) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(16 + params.len() * 12);
    writer.write_u8(Command::StmtExecute as u8);
    writer.write_u32_le(statement_id);
    writer.write_u8(0x00);
    writer.write_u32_le(1);

    if params.is_empty() {
        return writer.into_bytes();
    }

    let mut null_bitmap = vec![0u8; params.len().div_ceil(8)];
    for (i, param) in params.iter().enumerate() {
        if matches!(param, BoundParam::Value(Value::Null)) {
            null_bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    writer.write_bytes(&null_bitmap);
    writer.write_u8(1);

    for param in params {
        let field_type = match param {
            BoundParam::Value(value) => value_to_field_type(value),
            BoundParam::LongData => FieldType::LongBlob,
        };
        writer.write_u8(field_type as u8);
        writer.write_u8(0x00);
    }

    for param in params {
        if let BoundParam::Value(value) = param {
            encode_binary_param(&mut writer, value);
        }
    }

    writer.into_bytes()
}

pub fn build_stmt_close_packet(statement_id: u32) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(5);
    writer.write_u8(Command::StmtClose as u8);
    writer.write_u32_le(statement_id);
    writer.into_bytes()
}

/// Parse the OK header of a prepare response.
pub fn parse_stmt_prepare_ok(data: &[u8]) -> Option<StmtPrepareOk> {
    let mut reader = PacketReader::new(data);
    if reader.read_u8()? != 0x00 {
        return None;
    }
    let statement_id = reader.read_u32_le()?;
    let num_columns = reader.read_u16_le()?;
    let num_params = reader.read_u16_le()?;
    reader.skip(1);
    Some(StmtPrepareOk {
        statement_id,
        num_columns,
        num_params,
        warnings: reader.read_u16_le().unwrap_or(0),
    })
}

fn value_to_field_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) | Value::TinyInt(_) => FieldType::Tiny,
        Value::SmallInt(_) => FieldType::Short,
        Value::Int(_) => FieldType::Long,
        Value::BigInt(_) => FieldType::LongLong,
        Value::Float(_) => FieldType::Float,
        Value::Double(_) => FieldType::Double,
        Value::Decimal(_) => FieldType::NewDecimal,
        Value::Text(_) => FieldType::VarString,
        Value::Bytes(_) => FieldType::Blob,
        Value::Json(_) => FieldType::Json,
        Value::Date(_) => FieldType::Date,
        Value::Time(_) => FieldType::Time,
        Value::Timestamp(_) => FieldType::DateTime,
    }
}

fn encode_binary_param(writer: &mut PacketWriter, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(b) => writer.write_u8(u8::from(*b)),
        Value::TinyInt(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::SmallInt(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::Int(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::BigInt(i) => writer.write_bytes(&i.to_le_bytes()),
        Value::Float(f) => writer.write_bytes(&f.to_le_bytes()),
        Value::Double(f) => writer.write_bytes(&f.to_le_bytes()),
        Value::Decimal(s) | Value::Text(s) => writer.write_lenenc_string(s),
        Value::Bytes(b) => writer.write_lenenc_bytes(b),
        Value::Json(j) => writer.write_lenenc_string(&j.to_string()),
        Value::Date(days) => encode_binary_date(writer, *days),
        Value::Time(micros) => encode_binary_time(writer, *micros),
        Value::Timestamp(micros) => encode_binary_datetime(writer, *micros),
    }
}

fn encode_binary_date(writer: &mut PacketWriter, days: i32) {
    use chrono::Datelike;

    match days_to_date(days) {
        Some(date) => {
            writer.write_u8(4);
            writer.write_u16_le(date.year() as u16);
            writer.write_u8(date.month() as u8);
            writer.write_u8(date.day() as u8);
        }
        None => writer.write_u8(0),
    }
}

fn encode_binary_time(writer: &mut PacketWriter, micros: i64) {
    let negative = micros < 0;
    let micros = micros.unsigned_abs();
    let fraction = (micros % 1_000_000) as u32;
    let seconds = micros / 1_000_000;

    if seconds == 0 && fraction == 0 {
        writer.write_u8(0);
        return;
    }

    writer.write_u8(if fraction == 0 { 8 } else { 12 });
    writer.write_u8(u8::from(negative));
    writer.write_u32_le((seconds / 86_400) as u32);
    writer.write_u8(((seconds % 86_400) / 3600) as u8);
    writer.write_u8(((seconds % 3600) / 60) as u8);
    writer.write_u8((seconds % 60) as u8);
    if fraction != 0 {
        writer.write_u32_le(fraction);
    }
}

fn encode_binary_datetime(writer: &mut PacketWriter, micros: i64) {
    use chrono::Datelike;

    let Some(dt) = micros_to_datetime(micros) else {
        writer.write_u8(0);
        return;
    };
    let fraction = dt.nanosecond() / 1_000;

    writer.write_u8(if fraction == 0 { 7 } else { 11 });
    writer.write_u16_le(dt.year() as u16);
    writer.write_u8(dt.month() as u8);
    writer.write_u8(dt.day() as u8);
    writer.write_u8(dt.hour() as u8);
    writer.write_u8(dt.minute() as u8);
    writer.write_u8(dt.second() as u8);
    if fraction != 0 {
        writer.write_u32_le(fraction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::datetime_to_micros;
    use chrono::NaiveDate;

    /// Offset of the first type byte for `n` parameters.
    fn types_offset(n: usize) -> usize {
        10 + n.div_ceil(8) + 1
    }

    #[test]
    fn test_prepare_payload() {
        let payload = build_stmt_prepare_packet("SELECT `img` FROM `t` WHERE `id` = ?");
        assert_eq!(payload[0], Command::StmtPrepare as u8);
        assert_eq!(&payload[1..], b"SELECT `img` FROM `t` WHERE `id` = ?");
    }

    #[test]
    fn test_send_long_data_payload() {
        let payload = build_send_long_data_packet(7, 1, &[0xFF, 0xD8, 0xFF]);
        assert_eq!(
            payload,
            [Command::StmtSendLongData as u8, 7, 0, 0, 0, 1, 0, 0xFF, 0xD8, 0xFF]
        );
    }

    #[test]
    fn test_close_payload() {
        assert_eq!(build_stmt_close_packet(0x0102_0304), [0x19, 4, 3, 2, 1]);
    }

    #[test]
    fn test_parse_prepare_ok() {
        let data = [0x00, 9, 0, 0, 0, 1, 0, 2, 0, 0x00, 0, 0];
        let ok = parse_stmt_prepare_ok(&data).unwrap();
        assert_eq!(
            ok,
            StmtPrepareOk {
                statement_id: 9,
                num_columns: 1,
                num_params: 2,
                warnings: 0
            }
        );
        assert!(parse_stmt_prepare_ok(&[0xFF, 0x15, 0x04]).is_none());
        assert!(parse_stmt_prepare_ok(&[0x00, 1]).is_none());
    }

    #[test]
    fn test_execute_without_params() {
        let payload = build_stmt_execute_packet(3, &[]);
        assert_eq!(payload, [0x17, 3, 0, 0, 0, 0x00, 1, 0, 0, 0]);
    }

    #[test]
    fn test_execute_long_data_has_type_but_no_value() {
        let reference = Value::BigInt(5);
        let params = [BoundParam::LongData, BoundParam::Value(&reference)];
        let payload = build_stmt_execute_packet(1, &params);

        let types = types_offset(2);
        assert_eq!(payload[types - 2], 0x00, "null bitmap");
        assert_eq!(payload[types - 1], 1, "new params bound");
        assert_eq!(payload[types], FieldType::LongBlob as u8);
        assert_eq!(payload[types + 2], FieldType::LongLong as u8);
        assert_eq!(&payload[types + 4..], &5i64.to_le_bytes());
    }

    #[test]
    fn test_execute_null_bitmap() {
        let values = [Value::Int(1), Value::Null, Value::Text("x".into())];
        let params: Vec<_> = values.iter().map(BoundParam::Value).collect();
        let payload = build_stmt_execute_packet(1, &params);
        assert_eq!(payload[10], 0b0000_0010);
        let types = types_offset(3);
        assert_eq!(payload[types + 2], FieldType::Null as u8);
        // Int(1) then lenenc "x"; the NULL contributes no bytes
        assert_eq!(&payload[types + 6..], &[1, 0, 0, 0, 1, b'x']);
    }

    #[test]
    fn test_execute_bytes_param_is_verbatim() {
        let blob = Value::Bytes(vec![0x00, b'\'', b'"', b'\\']);
        let payload = build_stmt_execute_packet(1, &[BoundParam::Value(&blob)]);
        let types = types_offset(1);
        assert_eq!(payload[types], FieldType::Blob as u8);
        assert_eq!(&payload[types + 2..], &[4, 0x00, b'\'', b'"', b'\\']);
    }

    #[test]
    fn test_datetime_param_encoding() {
        let dt = NaiveDate::from_ymd_opt(2021, 2, 1)
            .unwrap()
            .and_hms_opt(6, 33, 1)
            .unwrap();
        let mut writer = PacketWriter::new();
        encode_binary_datetime(&mut writer, datetime_to_micros(dt));
        assert_eq!(writer.as_bytes(), &[7, 0xE5, 0x07, 2, 1, 6, 33, 1]);
    }

    #[test]
    fn test_time_param_encoding() {
        let mut writer = PacketWriter::new();
        encode_binary_time(&mut writer, -(26 * 3600 + 61) * 1_000_000);
        assert_eq!(writer.as_bytes(), &[8, 1, 1, 0, 0, 0, 2, 1, 1]);

        let mut zero = PacketWriter::new();
        encode_binary_time(&mut zero, 0);
        assert_eq!(zero.as_bytes(), &[0]);
    }

    #[test]
    fn test_date_param_encoding() {
        let mut writer = PacketWriter::new();
        encode_binary_date(&mut writer, 19782);
        assert_eq!(writer.as_bytes(), &[4, 0xE8, 0x07, 2, 29]);
    }
}
