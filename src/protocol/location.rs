use bytes::Bytes;
use chrono::NaiveDateTime;

use super::reader::BodyReader;
use super::ParseError;

pub const LOCATION_BASIC_LEN: usize = 28;

/// Basic location block shared by location reports, query replies and multimedia uploads.
///
/// Coordinates are kept in the wire unit (1e-6 degree); the gateway does not interpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationBasic {
    pub alarm_flags: u32,
    pub status: u32,
    pub latitude: u32,
    pub longitude: u32,
    pub altitude: u16,
    /// 1/10 km/h
    pub speed: u16,
    pub direction: u16,
    pub time: Option<NaiveDateTime>,
}

impl LocationBasic {
    pub fn read(reader: &mut BodyReader<'_>) -> Result<Self, ParseError> {
        Ok(LocationBasic {
            alarm_flags: reader.u32()?,
            status: reader.u32()?,
            latitude: reader.u32()?,
            longitude: reader.u32()?,
            altitude: reader.u16()?,
            speed: reader.u16()?,
            direction: reader.u16()?,
            time: reader.bcd_time()?,
        })
    }
}

/// A location report (`0x0200`) or the location part of a query reply (`0x0201`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReport {
    /// Present only on query replies.
    pub reply_serial: Option<u16>,
    pub basic: LocationBasic,
    /// Additional information items, left raw.
    pub extra: Bytes,
}

impl LocationReport {
    pub fn parse_report(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let basic = LocationBasic::read(&mut reader)?;
        Ok(LocationReport {
            reply_serial: None,
            basic,
            extra: Bytes::copy_from_slice(reader.rest()),
        })
    }

    pub fn parse_query_reply(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let reply_serial = reader.u16()?;
        let basic = LocationBasic::read(&mut reader)?;
        Ok(LocationReport {
            reply_serial: Some(reply_serial),
            basic,
            extra: Bytes::copy_from_slice(reader.rest()),
        })
    }
}

/// Bulk upload (`0x0704`): count, type (0 normal, 1 blind spot backfill), length prefixed reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLocationUpload {
    pub backfill: bool,
    pub reports: Vec<LocationReport>,
}

impl BulkLocationUpload {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let count = reader.u16()? as usize;
        let backfill = reader.u8()? == 1;
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            let len = reader.u16()? as usize;
            reports.push(LocationReport::parse_report(reader.bytes(len)?)?);
        }
        Ok(BulkLocationUpload { backfill, reports })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    pub(crate) fn location_block() -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(0b10);
        buf.put_u32(22_543_210);
        buf.put_u32(114_057_865);
        buf.put_u16(35);
        buf.put_u16(605);
        buf.put_u16(90);
        buf.put_slice(&[0x24, 0x03, 0x15, 0x08, 0x30, 0x59]);
        buf
    }

    #[test]
    fn test_location_report() {
        let mut body = location_block();
        body.put_slice(&[0x01, 0x04, 0, 0, 0, 100]);
        let report = LocationReport::parse_report(&body).unwrap();
        assert_eq!(report.basic.latitude, 22_543_210);
        assert_eq!(report.basic.speed, 605);
        assert_eq!(
            report.basic.time.unwrap().to_string(),
            "2024-03-15 08:30:59"
        );
        assert_eq!(report.extra.len(), 6);
    }

    #[test]
    fn test_query_reply_and_bulk() {
        let mut reply = BytesMut::new();
        reply.put_u16(42);
        reply.put_slice(&location_block());
        let report = LocationReport::parse_query_reply(&reply).unwrap();
        assert_eq!(report.reply_serial, Some(42));

        let mut bulk = BytesMut::new();
        bulk.put_u16(2);
        bulk.put_u8(1);
        for _ in 0..2 {
            bulk.put_u16(LOCATION_BASIC_LEN as u16);
            bulk.put_slice(&location_block());
        }
        let upload = BulkLocationUpload::parse(&bulk).unwrap();
        assert!(upload.backfill);
        assert_eq!(upload.reports.len(), 2);
    }

    #[test]
    fn test_truncated_location() {
        let body = location_block();
        assert!(LocationReport::parse_report(&body[..20]).is_err());
    }
}
