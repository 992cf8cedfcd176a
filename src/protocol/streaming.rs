//! Streaming data packets carried inside `0x9103` frames and the `0x1101` stream response.

use bytes::Bytes;

use super::reader::BodyReader;
use super::ParseError;

pub const STREAM_FRAME_MARKER: u32 = 0x3031_6364;

/// Kind of payload carried by a streaming packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PacketDataType {
    VideoI,
    VideoP,
    VideoB,
    Audio,
    Passthrough,
}

impl PacketDataType {
    pub fn from_nibble(value: u8) -> Result<Self, ParseError> {
        match value {
            0 => Ok(PacketDataType::VideoI),
            1 => Ok(PacketDataType::VideoP),
            2 => Ok(PacketDataType::VideoB),
            3 => Ok(PacketDataType::Audio),
            4 => Ok(PacketDataType::Passthrough),
            other => Err(ParseError::Malformed(format!(
                "unknown stream data type {}",
                other
            ))),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self,
            PacketDataType::VideoI | PacketDataType::VideoP | PacketDataType::VideoB
        )
    }
}

/// Position of a packet within a fragmented frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fragment {
    Atomic,
    First,
    Last,
    Middle,
}

impl Fragment {
    fn from_nibble(value: u8) -> Self {
        match value {
            1 => Fragment::First,
            2 => Fragment::Last,
            3 => Fragment::Middle,
            _ => Fragment::Atomic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub sim: String,
    pub channel: u8,
    pub data_type: PacketDataType,
    pub fragment: Fragment,
    /// Absent for passthrough data.
    pub timestamp: Option<u64>,
    /// Present for video data only.
    pub last_i_frame_interval: Option<u16>,
    pub last_frame_interval: Option<u16>,
    pub payload: Bytes,
}

impl StreamPacket {
    pub fn parse(body: &Bytes) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        let marker_word = reader.u32()?;
        if marker_word != STREAM_FRAME_MARKER {
            return Err(ParseError::Malformed(format!(
                "stream frame marker 0x{:08X}",
                marker_word
            )));
        }
        let vpxcc = reader.u8()?;
        let mpt = reader.u8()?;
        let sequence = reader.u16()?;
        let sim = reader.bcd(6)?;
        let channel = reader.u8()?;
        let type_and_fragment = reader.u8()?;
        let data_type = PacketDataType::from_nibble(type_and_fragment >> 4)?;
        let fragment = Fragment::from_nibble(type_and_fragment & 0x0F);
        let timestamp = if data_type == PacketDataType::Passthrough {
            None
        } else {
            Some(reader.u64()?)
        };
        let (last_i_frame_interval, last_frame_interval) = if data_type.is_video() {
            (Some(reader.u16()?), Some(reader.u16()?))
        } else {
            (None, None)
        };
        let payload_len = reader.u16()? as usize;
        let start = reader.position();
        reader.bytes(payload_len)?;
        Ok(StreamPacket {
            version: vpxcc >> 6,
            padding: vpxcc & 0x20 != 0,
            extension: vpxcc & 0x10 != 0,
            csrc_count: vpxcc & 0x0F,
            marker: mpt & 0x80 != 0,
            payload_type: mpt & 0x7F,
            sequence,
            sim,
            channel,
            data_type,
            fragment,
            timestamp,
            last_i_frame_interval,
            last_frame_interval,
            payload: body.slice(start..start + payload_len),
        })
    }
}

/// Stream response (`0x1101`): channel and result, 0 meaning accepted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamingResponse {
    pub channel: u8,
    pub result: u8,
}

impl StreamingResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ParseError> {
        let mut reader = BodyReader::new(body);
        Ok(StreamingResponse {
            channel: reader.u8()?,
            result: reader.u8()?,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    pub(crate) fn packet_body(channel: u8, data_type: u8, sequence: u16, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32(STREAM_FRAME_MARKER);
        buf.put_u8(0x81);
        buf.put_u8(0x80 | 98);
        buf.put_u16(sequence);
        buf.put_slice(&[0x01, 0x38, 0x00, 0x13, 0x80, 0x00]);
        buf.put_u8(channel);
        buf.put_u8(data_type << 4);
        if data_type != 4 {
            buf.put_u64(1_700_000_000_000);
        }
        if data_type <= 2 {
            buf.put_u16(40);
            buf.put_u16(40);
        }
        buf.put_u16(payload.len() as u16);
        buf.put_slice(payload);
        buf.freeze()
    }

    #[test]
    fn test_video_packet() {
        let packet = StreamPacket::parse(&packet_body(1, 0, 5, b"h264")).unwrap();
        assert_eq!(packet.version, 2);
        assert!(packet.marker);
        assert_eq!(packet.payload_type, 98);
        assert_eq!(packet.sequence, 5);
        assert_eq!(packet.sim, "013800138000");
        assert_eq!(packet.channel, 1);
        assert_eq!(packet.data_type, PacketDataType::VideoI);
        assert_eq!(packet.timestamp, Some(1_700_000_000_000));
        assert_eq!(packet.last_frame_interval, Some(40));
        assert_eq!(packet.payload.as_ref(), b"h264");
    }

    #[test]
    fn test_audio_and_passthrough_packets() {
        let audio = StreamPacket::parse(&packet_body(2, 3, 1, b"pcm")).unwrap();
        assert_eq!(audio.data_type, PacketDataType::Audio);
        assert!(audio.timestamp.is_some());
        assert_eq!(audio.last_i_frame_interval, None);

        let raw = StreamPacket::parse(&packet_body(2, 4, 1, b"raw")).unwrap();
        assert_eq!(raw.timestamp, None);
        assert_eq!(raw.payload.as_ref(), b"raw");
    }

    #[test]
    fn test_bad_marker_and_truncation() {
        let mut body = BytesMut::from(&packet_body(1, 0, 5, b"h264")[..]);
        body[0] = 0;
        assert!(StreamPacket::parse(&body.clone().freeze()).is_err());

        let full = packet_body(1, 0, 5, b"h264");
        assert!(StreamPacket::parse(&full.slice(..full.len() - 1)).is_err());
    }
}
