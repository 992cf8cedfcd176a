use bytes::Bytes;
use chrono::NaiveDateTime;

use super::reader::BodyReader;
use super::ParseError;

/// One recorded audio/video resource listed by the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceItem {
    pub channel: u8,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
    pub alarm_flags: u64,
    pub resource_type: u8,
    pub stream_type: u8,
    pub storage_type: u8,
    pub file_size: u32,
}

/// Resource list (`0x1205`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceListResponse {
    pub reply_serial: u16,
    pub items: Vec<ResourceItem>,
}

impl ResourceListResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let reply_serial = reader.u16()?;
        let count = reader.u32()? as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(ResourceItem {
                channel: reader.u8()?,
                start_time: reader.bcd_time()?,
                end_time: reader.bcd_time()?,
                alarm_flags: reader.u64()?,
                resource_type: reader.u8()?,
                stream_type: reader.u8()?,
                storage_type: reader.u8()?,
                file_size: reader.u32()?,
            });
        }
        Ok(ResourceListResponse {
            reply_serial,
            items,
        })
    }
}

/// File upload completion notice (`0x1206`); result 0 is success.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileUploadCompleted {
    pub reply_serial: u16,
    pub result: u8,
}

impl FileUploadCompleted {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        Ok(FileUploadCompleted {
            reply_serial: reader.u16()?,
            result: reader.u8()?,
        })
    }
}

/// Reply to one of the vendor queries (`0xB051`, `0xB061`, `0xB063`, `0xB065`).
///
/// Only the leading reply serial is interpreted; the rest is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorReply {
    pub reply_serial: u16,
    pub payload: Bytes,
}

impl VendorReply {
    pub fn parse(body: &Bytes) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let reply_serial = reader.u16()?;
        Ok(VendorReply {
            reply_serial,
            payload: body.slice(2..),
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    #[test]
    fn test_resource_list() {
        let mut body = BytesMut::new();
        body.put_u16(12);
        body.put_u32(1);
        body.put_u8(3);
        body.put_slice(&[0x24, 0x01, 0x02, 0x10, 0x00, 0x00]);
        body.put_slice(&[0x24, 0x01, 0x02, 0x10, 0x05, 0x00]);
        body.put_u64(0);
        body.put_u8(2);
        body.put_u8(1);
        body.put_u8(1);
        body.put_u32(1_048_576);
        let list = ResourceListResponse::parse(&body).unwrap();
        assert_eq!(list.reply_serial, 12);
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.items[0].channel, 3);
        assert_eq!(list.items[0].file_size, 1_048_576);
        assert_eq!(
            list.items[0].end_time.unwrap().to_string(),
            "2024-01-02 10:05:00"
        );
    }

    #[test]
    fn test_resource_list_count_exceeds_body() {
        let mut body = BytesMut::new();
        body.put_u16(12);
        body.put_u32(2);
        assert!(ResourceListResponse::parse(&body).is_err());
    }

    #[test]
    fn test_vendor_reply() {
        let reply = VendorReply::parse(&Bytes::from_static(&[0, 7, 0xAA, 0xBB])).unwrap();
        assert_eq!(reply.reply_serial, 7);
        assert_eq!(reply.payload.as_ref(), &[0xAA, 0xBB]);
    }
}
