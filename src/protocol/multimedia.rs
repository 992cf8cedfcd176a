use bytes::Bytes;

use super::location::{LocationBasic, LOCATION_BASIC_LEN};
use super::reader::BodyReader;
use super::ParseError;

/// Multimedia id, type, format, event and channel.
pub const MULTIMEDIA_HEADER_LEN: usize = 8;
/// File bytes start right after the header and the location block.
pub const MULTIMEDIA_PAYLOAD_OFFSET: usize = MULTIMEDIA_HEADER_LEN + LOCATION_BASIC_LEN;

/// Event upload (`0x0800`) body, also the first 8 bytes of a data upload.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MultimediaEventBody {
    pub data_id: u32,
    /// 0 image, 1 audio, 2 video
    pub media_type: u8,
    /// 0 JPEG, 1 TIF, 2 MP3, 3 WAV, 4 WMV
    pub format: u8,
    pub event: u8,
    pub channel_id: u8,
}

impl MultimediaEventBody {
    pub fn read(reader: &mut BodyReader<'_>) -> Result<Self, ParseError> {
        Ok(MultimediaEventBody {
            data_id: reader.u32()?,
            media_type: reader.u8()?,
            format: reader.u8()?,
            event: reader.u8()?,
            channel_id: reader.u8()?,
        })
    }

    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        Self::read(&mut BodyReader::new(body))
    }
}

/// Data upload (`0x0801`) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultimediaDataBody {
    pub header: MultimediaEventBody,
    pub location: LocationBasic,
    pub payload: Bytes,
}

impl MultimediaDataBody {
    pub fn parse(body: &Bytes) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let header = MultimediaEventBody::read(&mut reader)?;
        let location = LocationBasic::read(&mut reader)?;
        debug_assert_eq!(reader.position(), MULTIMEDIA_PAYLOAD_OFFSET);
        Ok(MultimediaDataBody {
            header,
            location,
            payload: body.slice(MULTIMEDIA_PAYLOAD_OFFSET..),
        })
    }
}
