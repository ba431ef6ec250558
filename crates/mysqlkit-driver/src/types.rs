//! MySQL column types and value codecs.
//!
//! The text protocol sends every value as a length-encoded string; the
//! binary protocol (prepared statements) sends numbers and temporal values
//! in fixed binary layouts and everything else length-encoded. Both paths
//! end in a [`Value`].
//!
//! BLOB and TEXT share field type codes on the wire; only the column's
//! collation tells them apart, binary columns report collation 63.

#![allow(clippy::cast_possible_truncation)]

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use mysqlkit_core::Value;

use crate::protocol::{PacketReader, charset};

/// MySQL field type codes (`MYSQL_TYPE_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0A,
    Time = 0x0B,
    DateTime = 0x0C,
    Year = 0x0D,
    VarChar = 0x0F,
    Bit = 0x10,
    Json = 0xF5,
    NewDecimal = 0xF6,
    Enum = 0xF7,
    Set = 0xF8,
    TinyBlob = 0xF9,
    MediumBlob = 0xFA,
    LongBlob = 0xFB,
    Blob = 0xFC,
    VarString = 0xFD,
    String = 0xFE,
    Geometry = 0xFF,
}

impl FieldType {
    /// Map a wire byte to a field type; unknown codes read as strings.
    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => FieldType::Decimal,
            0x01 => FieldType::Tiny,
            0x02 => FieldType::Short,
            0x03 => FieldType::Long,
            0x04 => FieldType::Float,
            0x05 => FieldType::Double,
            0x06 => FieldType::Null,
            0x07 | 0x11 => FieldType::Timestamp,
            0x08 => FieldType::LongLong,
            0x09 => FieldType::Int24,
            0x0A | 0x0E => FieldType::Date,
            0x0B | 0x13 => FieldType::Time,
            0x0C | 0x12 => FieldType::DateTime,
            0x0D => FieldType::Year,
            0x0F => FieldType::VarChar,
            0x10 => FieldType::Bit,
            0xF5 => FieldType::Json,
            0xF6 => FieldType::NewDecimal,
            0xF7 => FieldType::Enum,
            0xF8 => FieldType::Set,
            0xF9 => FieldType::TinyBlob,
            0xFA => FieldType::MediumBlob,
            0xFB => FieldType::LongBlob,
            0xFC => FieldType::Blob,
            0xFD => FieldType::VarString,
            0xFF => FieldType::Geometry,
            _ => FieldType::String,
        }
    }

    #[must_use]
    pub const fn is_blob(self) -> bool {
        matches!(
            self,
            FieldType::TinyBlob
                | FieldType::MediumBlob
                | FieldType::LongBlob
                | FieldType::Blob
                | FieldType::Geometry
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Decimal | FieldType::NewDecimal => "DECIMAL",
            FieldType::Tiny => "TINYINT",
            FieldType::Short => "SMALLINT",
            FieldType::Long => "INT",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Null => "NULL",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::LongLong => "BIGINT",
            FieldType::Int24 => "MEDIUMINT",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Year => "YEAR",
            FieldType::VarChar | FieldType::VarString => "VARCHAR",
            FieldType::Bit => "BIT",
            FieldType::Json => "JSON",
            FieldType::Enum => "ENUM",
            FieldType::Set => "SET",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Blob => "BLOB",
            FieldType::String => "CHAR",
            FieldType::Geometry => "GEOMETRY",
        }
    }
}

/// Column flag bits from column definitions.
pub mod column_flags {
    pub const NOT_NULL: u16 = 1;
    pub const PRIMARY_KEY: u16 = 2;
    pub const BLOB: u16 = 16;
    pub const UNSIGNED: u16 = 32;
    pub const BINARY: u16 = 128;
    pub const AUTO_INCREMENT: u16 = 512;
}

/// Column definition from a result set or statement prepare response.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub schema: String,
    /// Table name or alias
    pub table: String,
    /// Column name or alias
    pub name: String,
    pub org_name: String,
    /// Collation id
    pub charset: u16,
    pub column_length: u32,
    pub column_type: FieldType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// Parse a `ColumnDefinition41` payload.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut reader = PacketReader::new(data);
        let _catalog = reader.read_lenenc_bytes()?;
        let schema = reader.read_lenenc_string()?;
        let table = reader.read_lenenc_string()?;
        let _org_table = reader.read_lenenc_bytes()?;
        let name = reader.read_lenenc_string()?;
        let org_name = reader.read_lenenc_string()?;
        let _fixed_len = reader.read_lenenc_int()?;
        Some(Self {
            schema,
            table,
            name,
            org_name,
            charset: reader.read_u16_le()?,
            column_length: reader.read_u32_le()?,
            column_type: FieldType::from_u8(reader.read_u8()?),
            flags: reader.read_u16_le()?,
            decimals: reader.read_u8()?,
        })
    }

    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.flags & column_flags::UNSIGNED != 0
    }

    #[must_use]
    pub const fn is_not_null(&self) -> bool {
        self.flags & column_flags::NOT_NULL != 0
    }

    /// Whether string-typed content should surface as raw bytes.
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        self.charset == charset::BINARY as u16
    }
}

fn epoch() -> NaiveDateTime {
    NaiveDateTime::default()
}

/// Days since 1970-01-01 for a calendar date.
pub fn date_to_days(date: NaiveDate) -> i32 {
    date.signed_duration_since(epoch().date()).num_days() as i32
}

/// Calendar date for a day offset from 1970-01-01.
pub fn days_to_date(days: i32) -> Option<NaiveDate> {
    epoch()
        .date()
        .checked_add_signed(Duration::days(i64::from(days)))
}

/// Microseconds since the Unix epoch for a naive (server-local) datetime.
pub fn datetime_to_micros(dt: NaiveDateTime) -> i64 {
    dt.and_utc().timestamp_micros()
}

/// Naive datetime for a microsecond offset from the Unix epoch.
pub fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

/// Parse MySQL's `YYYY-MM-DD hh:mm:ss[.ffffff]` text form.
pub fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

/// Parse `[-]hhh:mm:ss[.ffffff]` into signed microseconds.
fn parse_time_text(text: &str) -> Option<i64> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, fraction) = body.split_once('.').unwrap_or((body, ""));
    let mut parts = clock.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: i64 = parts.next()?.parse().ok()?;
    let micros: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<6}", &fraction[..fraction.len().min(6)])
            .parse()
            .ok()?
    };
    let total = ((hours * 60 + minutes) * 60 + seconds) * 1_000_000 + micros;
    Some(if negative { -total } else { total })
}

fn text_or_bytes(col: &ColumnDef, data: &[u8]) -> Value {
    if col.is_binary() {
        Value::Bytes(data.to_vec())
    } else {
        Value::Text(String::from_utf8_lossy(data).into_owned())
    }
}

/// BIGINT UNSIGNED values past `i64::MAX` keep their exact digits as decimal text.
fn unsigned_bigint(v: u64) -> Value {
    i64::try_from(v).map_or_else(|_| Value::Decimal(v.to_string()), Value::BigInt)
}

/// Decode one text-protocol column value.
pub fn decode_text_value(col: &ColumnDef, data: &[u8]) -> Value {
    let text = String::from_utf8_lossy(data);
    let fallback = || Value::Text(text.clone().into_owned());

    match col.column_type {
        FieldType::Tiny if col.is_unsigned() => text
            .parse::<u8>()
            .map_or_else(|_| fallback(), |v| Value::SmallInt(i16::from(v))),
        FieldType::Tiny => text.parse().map_or_else(|_| fallback(), Value::TinyInt),
        FieldType::Short | FieldType::Year if col.is_unsigned() => text
            .parse::<u16>()
            .map_or_else(|_| fallback(), |v| Value::Int(i32::from(v))),
        FieldType::Short | FieldType::Year => {
            text.parse().map_or_else(|_| fallback(), Value::SmallInt)
        }
        FieldType::Long | FieldType::Int24 if col.is_unsigned() => text
            .parse::<u32>()
            .map_or_else(|_| fallback(), |v| Value::BigInt(i64::from(v))),
        FieldType::Long | FieldType::Int24 => text.parse().map_or_else(|_| fallback(), Value::Int),
        FieldType::LongLong if col.is_unsigned() => text
            .parse::<u64>()
            .map_or_else(|_| fallback(), unsigned_bigint),
        FieldType::LongLong => text.parse().map_or_else(|_| fallback(), Value::BigInt),
        FieldType::Float => text.parse().map_or_else(|_| fallback(), Value::Float),
        FieldType::Double => text.parse().map_or_else(|_| fallback(), Value::Double),
        FieldType::Decimal | FieldType::NewDecimal => Value::Decimal(text.to_string()),
        FieldType::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map_or_else(|_| fallback(), |d| Value::Date(date_to_days(d))),
        FieldType::DateTime | FieldType::Timestamp => parse_datetime_text(&text)
            .map_or_else(fallback, |dt| Value::Timestamp(datetime_to_micros(dt))),
        FieldType::Time => parse_time_text(&text).map_or_else(fallback, Value::Time),
        FieldType::Json => {
            serde_json::from_str(&text).map_or_else(|_| fallback(), Value::Json)
        }
        FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),
        FieldType::Null => Value::Null,
        _ => text_or_bytes(col, data),
    }
}

/// Decode one binary-protocol column value, advancing `reader` past it.
///
/// Returns `None` when the payload ends before the value does.
pub fn decode_binary_value(col: &ColumnDef, reader: &mut PacketReader<'_>) -> Option<Value> {
    let unsigned = col.is_unsigned();
    let value = match col.column_type {
        FieldType::Tiny if unsigned => Value::SmallInt(i16::from(reader.read_u8()?)),
        FieldType::Tiny => Value::TinyInt(reader.read_i8()?),
        FieldType::Short | FieldType::Year if unsigned => {
            Value::Int(i32::from(reader.read_u16_le()?))
        }
        FieldType::Short | FieldType::Year => Value::SmallInt(reader.read_i16_le()?),
        FieldType::Long | FieldType::Int24 if unsigned => {
            Value::BigInt(i64::from(reader.read_u32_le()?))
        }
        FieldType::Long | FieldType::Int24 => Value::Int(reader.read_i32_le()?),
        FieldType::LongLong if unsigned => unsigned_bigint(reader.read_u64_le()?),
        FieldType::LongLong => Value::BigInt(reader.read_i64_le()?),
        FieldType::Float => Value::Float(reader.read_f32_le()?),
        FieldType::Double => Value::Double(reader.read_f64_le()?),
        FieldType::Date | FieldType::DateTime | FieldType::Timestamp => {
            let len = usize::from(reader.read_u8()?);
            decode_binary_datetime(col.column_type, reader.read_bytes(len)?)
        }
        FieldType::Time => {
            let len = usize::from(reader.read_u8()?);
            decode_binary_time(reader.read_bytes(len)?)
        }
        FieldType::Null => Value::Null,
        _ => {
            let data = reader.read_lenenc_bytes()?;
            match col.column_type {
                FieldType::Decimal | FieldType::NewDecimal => {
                    Value::Decimal(String::from_utf8_lossy(data).into_owned())
                }
                FieldType::Json => serde_json::from_slice(data)
                    .map_or_else(|_| text_or_bytes(col, data), Value::Json),
                FieldType::Bit | FieldType::Geometry => Value::Bytes(data.to_vec()),
                _ => text_or_bytes(col, data),
            }
        }
    };
    Some(value)
}

/// Binary DATE/DATETIME layout: year(2) month day [hour min sec [micros(4)]].
fn binary_datetime(data: &[u8]) -> Option<NaiveDateTime> {
    let mut reader = PacketReader::new(data);
    let year = i32::from(reader.read_u16_le()?);
    let month = u32::from(reader.read_u8()?);
    let day = u32::from(reader.read_u8()?);
    let hour = u32::from(reader.read_u8().unwrap_or(0));
    let minute = u32::from(reader.read_u8().unwrap_or(0));
    let second = u32::from(reader.read_u8().unwrap_or(0));
    let micro = reader.read_u32_le().unwrap_or(0);
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_micro_opt(hour, minute, second, micro)?;
    Some(date.and_time(time))
}

fn decode_binary_datetime(field_type: FieldType, data: &[u8]) -> Value {
    match (binary_datetime(data), field_type) {
        (Some(dt), FieldType::Date) => Value::Date(date_to_days(dt.date())),
        (Some(dt), _) => Value::Timestamp(datetime_to_micros(dt)),
        // zero dates have no calendar representation
        (None, FieldType::Date) => Value::Text("0000-00-00".to_string()),
        (None, _) => Value::Text("0000-00-00 00:00:00".to_string()),
    }
}

/// Binary TIME layout: negative(1) days(4) hour min sec [micros(4)].
fn decode_binary_time(data: &[u8]) -> Value {
    let mut reader = PacketReader::new(data);
    let negative = reader.read_u8().unwrap_or(0) != 0;
    let days = i64::from(reader.read_u32_le().unwrap_or(0));
    let hours = i64::from(reader.read_u8().unwrap_or(0));
    let minutes = i64::from(reader.read_u8().unwrap_or(0));
    let seconds = i64::from(reader.read_u8().unwrap_or(0));
    let micros = i64::from(reader.read_u32_le().unwrap_or(0));
    let total = (((days * 24 + hours) * 60 + minutes) * 60 + seconds) * 1_000_000 + micros;
    Value::Time(if negative { -total } else { total })
}
