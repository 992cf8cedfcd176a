use bytes::Buf;
use chrono::NaiveDateTime;

use super::bcd::{decode_bcd, decode_bcd_time};
use super::ParseError;

/// Bounds checked big-endian reader over a message body.
///
/// Every accessor fails with [`ParseError::TooShort`] instead of panicking, since short bodies
/// from real terminals are routine.
#[derive(Debug, Clone)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BodyReader { buf, consumed: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn position(&self) -> usize {
        self.consumed
    }

    fn ensure(&self, needed: usize) -> Result<(), ParseError> {
        if self.buf.remaining() < needed {
            return Err(ParseError::TooShort {
                needed: self.consumed + needed,
                available: self.consumed + self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, ParseError> {
        self.ensure(1)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, ParseError> {
        self.ensure(2)?;
        self.consumed += 2;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self) -> Result<u32, ParseError> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64, ParseError> {
        self.ensure(8)?;
        self.consumed += 8;
        Ok(self.buf.get_u64())
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        self.consumed += len;
        Ok(head)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.consumed += rest.len();
        self.buf = &[];
        rest
    }

    pub fn bcd(&mut self, len: usize) -> Result<String, ParseError> {
        Ok(decode_bcd(self.bytes(len)?))
    }

    /// Reads a 6 byte BCD timestamp; an invalid calendar value yields `None`.
    pub fn bcd_time(&mut self) -> Result<Option<NaiveDateTime>, ParseError> {
        Ok(decode_bcd_time(self.bytes(6)?))
    }

    /// Fixed width text field, NUL and space padded.
    pub fn fixed_str(&mut self, len: usize) -> Result<String, ParseError> {
        let raw = self.bytes(len)?;
        Ok(String::from_utf8_lossy(raw)
            .trim_matches(|c: char| c == '\0' || c.is_whitespace())
            .to_string())
    }

    /// One byte length prefix followed by that many bytes of text.
    pub fn short_str(&mut self) -> Result<String, ParseError> {
        let len = self.u8()? as usize;
        self.fixed_str(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_big_endian_fields() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut reader = BodyReader::new(&data);
        assert_eq!(reader.u8().unwrap(), 0x01);
        assert_eq!(reader.u16().unwrap(), 0x0203);
        assert_eq!(reader.u32().unwrap(), 0x04050607);
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.position(), 7);
    }

    #[test]
    fn test_short_read_reports_offsets() {
        let data = [0x01, 0x02];
        let mut reader = BodyReader::new(&data);
        reader.u8().unwrap();
        assert_eq!(
            reader.u32(),
            Err(ParseError::TooShort {
                needed: 5,
                available: 2
            })
        );
    }

    #[test]
    fn test_text_fields_are_trimmed() {
        let data = [3, b'a', b'b', 0, b'x', b' ', 0];
        let mut reader = BodyReader::new(&data);
        assert_eq!(reader.short_str().unwrap(), "ab");
        assert_eq!(reader.fixed_str(3).unwrap(), "x");
    }
}
