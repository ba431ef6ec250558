//! Cursor over a packet payload.
//!
//! Fixed-width integers are little-endian. Length-encoded integers use a
//! prefix byte: below 0xFB the byte is the value, 0xFC/0xFD/0xFE announce
//! 2/3/8 following bytes and 0xFB marks SQL NULL.

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes: [u8; N] = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take().map(u16::from_le_bytes)
    }

    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.take::<3>().map(|[a, b, c]| u32::from_le_bytes([a, b, c, 0]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    pub fn read_i8(&mut self) -> Option<i8> {
        self.take().map(i8::from_le_bytes)
    }

    pub fn read_i16_le(&mut self) -> Option<i16> {
        self.take().map(i16::from_le_bytes)
    }

    pub fn read_i32_le(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    pub fn read_i64_le(&mut self) -> Option<i64> {
        self.take().map(i64::from_le_bytes)
    }

    pub fn read_f32_le(&mut self) -> Option<f32> {
        self.take().map(f32::from_le_bytes)
    }

    pub fn read_f64_le(&mut self) -> Option<f64> {
        self.take().map(f64::from_le_bytes)
    }

    /// Read a length-encoded integer; `None` on the NULL marker or truncation.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        match self.read_u8()? {
            small @ 0x00..=0xFA => Some(u64::from(small)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            _ => None,
        }
    }

    /// Read a length-encoded byte string.
    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len)
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        self.read_lenenc_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read up to the next NUL, consuming the terminator if present.
    pub fn read_null_string(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += (end + 1).min(rest.len());
        Some(s)
    }

    pub fn read_string(&mut self, len: usize) -> Option<String> {
        self.read_bytes(len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(bytes)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        rest
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn skip(&mut self, n: usize) -> bool {
        self.read_bytes(n).is_some()
    }

    fn skip_marker(&mut self, marker: u8) {
        if self.peek() == Some(marker) {
            self.pos += 1;
        }
    }

    /// Parse an OK packet (marker byte optional).
    pub fn parse_ok_packet(&mut self) -> Option<OkPacket> {
        self.skip_marker(0x00);
        Some(OkPacket {
            affected_rows: self.read_lenenc_int()?,
            last_insert_id: self.read_lenenc_int()?,
            status_flags: self.read_u16_le()?,
            warnings: self.read_u16_le()?,
            info: self.read_rest_string(),
        })
    }

    /// Parse an ERR packet (marker byte optional).
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        self.skip_marker(0xFF);
        let error_code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.pos += 1;
            self.read_string(5)?
        } else {
            String::new()
        };
        Some(ErrPacket {
            error_code,
            sql_state,
            error_message: self.read_rest_string(),
        })
    }

    /// Parse an EOF packet (marker byte optional).
    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        self.skip_marker(0xFE);
        Some(EofPacket {
            warnings: self.read_u16_le()?,
            status_flags: self.read_u16_le()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_integers() {
        let data = [
            0x2A, // u8
            0x01, 0x02, // u16
            0x01, 0x02, 0x03, // u24
            0x01, 0x00, 0x00, 0x80, // u32
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // i64 -1
        ];
        let mut reader = PacketReader::new(&data);
        assert_eq!(reader.read_u8(), Some(0x2A));
        assert_eq!(reader.read_u16_le(), Some(0x0201));
        assert_eq!(reader.read_u24_le(), Some(0x03_0201));
        assert_eq!(reader.read_u32_le(), Some(0x8000_0001));
        assert_eq!(reader.read_i64_le(), Some(-1));
        assert!(reader.is_empty());
        assert_eq!(reader.read_u8(), None);
    }

    #[test]
    fn test_truncated_read_does_not_advance() {
        let mut reader = PacketReader::new(&[0x01, 0x02, 0x03]);
        assert_eq!(reader.read_u32_le(), None);
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn test_lenenc_int_forms() {
        let cases: [(&[u8], Option<u64>); 5] = [
            (&[0xFA], Some(250)),
            (&[0xFC, 0xFB, 0x00], Some(251)),
            (&[0xFD, 0x00, 0x00, 0x01], Some(0x01_0000)),
            (&[0xFE, 0, 0, 0, 0, 1, 0, 0, 0], Some(1 << 32)),
            (&[0xFB], None),
        ];
        for (bytes, expected) in cases {
            assert_eq!(PacketReader::new(bytes).read_lenenc_int(), expected);
        }
    }

    #[test]
    fn test_lenenc_bytes_keep_binary_content() {
        let mut reader = PacketReader::new(&[0x04, 0x00, b'\'', b'\\', 0xFF]);
        assert_eq!(reader.read_lenenc_bytes(), Some(&[0x00, b'\'', b'\\', 0xFF][..]));
    }

    #[test]
    fn test_null_string_without_terminator() {
        let mut reader = PacketReader::new(b"mysql_native_password\0tail");
        assert_eq!(
            reader.read_null_string().as_deref(),
            Some("mysql_native_password")
        );
        assert_eq!(reader.read_null_string().as_deref(), Some("tail"));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_parse_ok_packet() {
        let mut reader = PacketReader::new(&[0x00, 0x01, 0x05, 0x02, 0x00, 0x00, 0x00]);
        let ok = reader.parse_ok_packet().unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 5);
        assert_eq!(ok.status_flags, 2);
        assert!(ok.info.is_empty());
    }

    #[test]
    fn test_parse_err_packet() {
        let mut data = vec![0xFF, 0x7A, 0x04, b'#'];
        data.extend_from_slice(b"42S02Table 'db.t' doesn't exist");
        let err = PacketReader::new(&data).parse_err_packet().unwrap();
        assert_eq!(err.error_code, 1146);
        assert_eq!(err.sql_state, "42S02");
        assert_eq!(err.error_message, "Table 'db.t' doesn't exist");
    }

    #[test]
    fn test_parse_eof_packet() {
        let eof = PacketReader::new(&[0xFE, 0x01, 0x00, 0x22, 0x00])
            .parse_eof_packet()
            .unwrap();
        assert_eq!(eof.warnings, 1);
        assert_eq!(eof.status_flags, 0x22);
    }
}
