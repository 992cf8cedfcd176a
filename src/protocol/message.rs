use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use super::bcd::{decode_bcd, encode_bcd};
use super::message_id::MessageId;
use super::reader::BodyReader;

/// Legacy header: id, body length, serial, numeric terminal id.
pub const LEGACY_HEADER_LEN: usize = 10;
/// 2019 header: id, properties, version, 10 byte BCD phone, serial.
pub const EXTENDED_HEADER_LEN: usize = 17;
/// Extra header bytes carried when the sub-package bit is set.
pub const PACKET_INFO_LEN: usize = 4;
pub const EXTENDED_PHONE_LEN: usize = 10;

pub const BODY_LENGTH_MASK: u16 = 0x03FF;
pub const SUBPACKAGE_FLAG: u16 = 1 << 13;
pub const VERSION_FLAG: u16 = 1 << 14;

/// Multimedia data frames above this body size are accepted despite a checksum mismatch.
pub const LENIENT_CHECKSUM_BODY_LEN: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("need {needed} bytes, only {available} available")]
    TooShort { needed: usize, available: usize },

    #[error("checksum mismatch: frame carries 0x{expected:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("declared body length {declared} does not match actual {actual}")]
    BodyLengthMismatch { declared: usize, actual: usize },

    #[error("frame matches neither header layout")]
    UnknownFraming,

    #[error("malformed body: {0}")]
    Malformed(String),
}

/// XOR of every byte.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// 10 byte header with a `u32` terminal id
    Legacy,
    /// 17 byte header with protocol version and 10 byte BCD phone
    Extended,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    pub total: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_id: u16,
    /// Raw properties word. In the legacy layout this is the body length word.
    pub properties: u16,
    pub kind: HeaderKind,
    /// Always zero for the legacy layout.
    pub protocol_version: u8,
    /// Decimal digits: the BCD phone for extended headers, the numeric id for legacy ones.
    pub terminal_phone: String,
    pub serial_number: u16,
    pub packet: Option<PacketInfo>,
}

impl MessageHeader {
    pub fn body_length(&self) -> usize {
        (self.properties & BODY_LENGTH_MASK) as usize
    }

    pub fn len(&self) -> usize {
        match self.kind {
            HeaderKind::Legacy => LEGACY_HEADER_LEN,
            HeaderKind::Extended if self.packet.is_some() => EXTENDED_HEADER_LEN + PACKET_INFO_LEN,
            HeaderKind::Extended => EXTENDED_HEADER_LEN,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.message_id);
        buf.put_u16(self.properties);
        match self.kind {
            HeaderKind::Legacy => {
                buf.put_u16(self.serial_number);
                buf.put_u32(self.terminal_phone.parse::<u32>().unwrap_or_default());
            }
            HeaderKind::Extended => {
                buf.put_u8(self.protocol_version);
                buf.put_slice(&encode_bcd(&self.terminal_phone, EXTENDED_PHONE_LEN));
                buf.put_u16(self.serial_number);
                if let Some(packet) = self.packet {
                    buf.put_u16(packet.total);
                    buf.put_u16(packet.index);
                }
            }
        }
    }
}

/// A decoded, unescaped frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub body: Bytes,
    pub checksum: u8,
    /// Set when a checksum mismatch was tolerated (large multimedia data frames only).
    pub checksum_tolerated: bool,
}

impl Message {
    pub fn id(&self) -> Option<MessageId> {
        MessageId::from_u16(self.header.message_id)
    }

    pub fn raw_id(&self) -> u16 {
        self.header.message_id
    }

    pub fn serial(&self) -> u16 {
        self.header.serial_number
    }

    pub fn phone(&self) -> &str {
        &self.header.terminal_phone
    }

    pub fn reader(&self) -> BodyReader<'_> {
        BodyReader::new(&self.body)
    }

    /// Decodes the unescaped bytes between two frame delimiters (header, body, checksum).
    ///
    /// The legacy layout is tried first; the extended layout is used when the legacy body
    /// length does not account for the frame size.
    pub fn decode(content: &[u8]) -> Result<Message, ParseError> {
        if content.len() < LEGACY_HEADER_LEN + 1 {
            return Err(ParseError::TooShort {
                needed: LEGACY_HEADER_LEN + 1,
                available: content.len(),
            });
        }
        let (data, trailer) = content.split_at(content.len() - 1);
        let expected = trailer[0];

        let header = Self::decode_legacy_header(data).or_else(|legacy_err| {
            Self::decode_extended_header(data).map_err(|extended_err| {
                match (legacy_err, extended_err) {
                    (_, err @ ParseError::BodyLengthMismatch { .. }) => err,
                    (err @ ParseError::BodyLengthMismatch { .. }, ParseError::TooShort { .. }) => {
                        err
                    }
                    _ => ParseError::UnknownFraming,
                }
            })
        })?;

        let computed = checksum(data);
        let mut checksum_tolerated = false;
        if computed != expected {
            if header.message_id == MessageId::MultimediaDataUpload.as_u16()
                && header.body_length() > LENIENT_CHECKSUM_BODY_LEN
            {
                warn!(
                    monotonic_counter.tolerated_checksum_mismatch = 1_u64,
                    serial = header.serial_number,
                    body_len = header.body_length(),
                    "checksum mismatch on large multimedia data frame tolerated: frame 0x{:02X}, computed 0x{:02X}",
                    expected,
                    computed
                );
                checksum_tolerated = true;
            } else {
                return Err(ParseError::ChecksumMismatch { expected, computed });
            }
        }

        let body = Bytes::copy_from_slice(&data[header.len()..]);
        Ok(Message {
            header,
            body,
            checksum: expected,
            checksum_tolerated,
        })
    }

    fn decode_legacy_header(data: &[u8]) -> Result<MessageHeader, ParseError> {
        let mut reader = BodyReader::new(data);
        let message_id = reader.u16()?;
        let properties = reader.u16()?;
        let serial_number = reader.u16()?;
        let terminal_id = reader.u32()?;
        let header = MessageHeader {
            message_id,
            properties,
            kind: HeaderKind::Legacy,
            protocol_version: 0,
            terminal_phone: terminal_id.to_string(),
            serial_number,
            packet: None,
        };
        Self::check_body_length(&header, data.len())?;
        Ok(header)
    }

    fn decode_extended_header(data: &[u8]) -> Result<MessageHeader, ParseError> {
        let mut reader = BodyReader::new(data);
        let message_id = reader.u16()?;
        let properties = reader.u16()?;
        let protocol_version = reader.u8()?;
        let terminal_phone = decode_bcd(reader.bytes(EXTENDED_PHONE_LEN)?);
        let serial_number = reader.u16()?;
        let packet = if properties & SUBPACKAGE_FLAG != 0 {
            Some(PacketInfo {
                total: reader.u16()?,
                index: reader.u16()?,
            })
        } else {
            None
        };
        let header = MessageHeader {
            message_id,
            properties,
            kind: HeaderKind::Extended,
            protocol_version,
            terminal_phone,
            serial_number,
            packet,
        };
        Self::check_body_length(&header, data.len())?;
        Ok(header)
    }

    fn check_body_length(header: &MessageHeader, data_len: usize) -> Result<(), ParseError> {
        let actual = data_len
            .checked_sub(header.len())
            .ok_or(ParseError::TooShort {
                needed: header.len(),
                available: data_len,
            })?;
        if header.body_length() != actual {
            return Err(ParseError::BodyLengthMismatch {
                declared: header.body_length(),
                actual,
            });
        }
        Ok(())
    }

    /// Encodes header, body and checksum, unescaped and without delimiters.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.header.len() + self.body.len() + 1);
        self.header.encode(&mut buf);
        buf.put_slice(&self.body);
        buf.put_u8(self.checksum);
        buf
    }

    /// Builds a message with a freshly computed checksum and the body length taken from `body`.
    pub fn new(mut header: MessageHeader, body: Bytes) -> Message {
        header.properties = (header.properties & !BODY_LENGTH_MASK)
            | (body.len() as u16 & BODY_LENGTH_MASK);
        let mut buf = BytesMut::with_capacity(header.len() + body.len());
        header.encode(&mut buf);
        buf.put_slice(&body);
        let checksum = checksum(&buf);
        Message {
            header,
            body,
            checksum,
            checksum_tolerated: false,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &format_args!("0x{:04X}", self.header.message_id))
            .field("kind", &self.header.kind)
            .field("phone", &self.header.terminal_phone)
            .field("serial", &self.header.serial_number)
            .field("body_len", &self.body.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    fn extended_header(message_id: u16) -> MessageHeader {
        MessageHeader {
            message_id,
            properties: VERSION_FLAG,
            kind: HeaderKind::Extended,
            protocol_version: 1,
            terminal_phone: "00000000628076842334".to_string(),
            serial_number: 7,
            packet: None,
        }
    }

    fn legacy_header(message_id: u16) -> MessageHeader {
        MessageHeader {
            message_id,
            properties: 0,
            kind: HeaderKind::Legacy,
            protocol_version: 0,
            terminal_phone: "12345678".to_string(),
            serial_number: 9,
            packet: None,
        }
    }

    #[test]
    fn test_legacy_layout_decodes() {
        let msg = Message::new(legacy_header(0x0002), Bytes::new());
        let encoded = msg.encode();
        assert_eq!(encoded.len(), LEGACY_HEADER_LEN + 1);
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.header.kind, HeaderKind::Legacy);
        assert_eq!(decoded.phone(), "12345678");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_extended_layout_decodes() {
        let msg = Message::new(extended_header(0x0200), Bytes::from_static(&[1, 2, 3]));
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.header.kind, HeaderKind::Extended);
        assert_eq!(decoded.header.protocol_version, 1);
        assert_eq!(decoded.header.body_length(), 3);
        assert_eq!(decoded.body.as_ref(), &[1, 2, 3]);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn test_subpackage_header() {
        let mut header = extended_header(0x0801);
        header.properties |= SUBPACKAGE_FLAG;
        header.packet = Some(PacketInfo { total: 3, index: 2 });
        let msg = Message::new(header, Bytes::from_static(b"chunk"));
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.header.packet, Some(PacketInfo { total: 3, index: 2 }));
        assert_eq!(decoded.body.as_ref(), b"chunk");
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            Message::decode(&[0x00, 0x02, 0x00]),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn test_declared_length_must_match() {
        let msg = Message::new(extended_header(0x0200), Bytes::from_static(&[1, 2, 3]));
        let mut encoded = msg.encode();
        // drop one body byte but keep the declared length
        let checksum = encoded[encoded.len() - 1];
        encoded.truncate(encoded.len() - 2);
        encoded.put_u8(checksum);
        assert!(matches!(
            Message::decode(&encoded),
            Err(ParseError::BodyLengthMismatch { declared: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_every_flipped_bit_is_caught() {
        let msg = Message::new(extended_header(0x0200), Bytes::from_static(&[0x10, 0x20, 0x30]));
        let encoded = msg.encode();
        let checked_len = encoded.len() - 1;
        for byte in 0..checked_len {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    Message::decode(&corrupted).is_err(),
                    "flip of byte {} bit {} went unnoticed",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_large_multimedia_data_tolerates_bad_checksum() {
        let body = Bytes::from(vec![0xAB; 600]);
        let msg = Message::new(extended_header(0x0801), body);
        let mut encoded = msg.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let decoded = Message::decode(&encoded).unwrap();
        assert!(decoded.checksum_tolerated);
        assert_eq!(decoded.body.len(), 600);
    }

    /// Records the level and field names of every event.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<(Level, Vec<String>)>>>);

    struct FieldNames(Vec<String>);

    impl Visit for FieldNames {
        fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
            self.0.push(field.name().to_string());
        }
    }

    impl<S: Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = FieldNames(Vec::new());
            event.record(&mut fields);
            self.0.lock().push((*event.metadata().level(), fields.0));
        }
    }

    #[test]
    fn test_tolerated_checksum_mismatch_is_counted() {
        let captured = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(captured.clone());

        let msg = Message::new(extended_header(0x0801), Bytes::from(vec![0xAB; 600]));
        let mut encoded = msg.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        let decoded =
            tracing::subscriber::with_default(subscriber, || Message::decode(&encoded)).unwrap();
        assert!(decoded.checksum_tolerated);

        let events = captured.0.lock();
        let counted: Vec<_> = events
            .iter()
            .filter(|(_, fields)| {
                fields
                    .iter()
                    .any(|name| name == "monotonic_counter.tolerated_checksum_mismatch")
            })
            .collect();
        assert_eq!(counted.len(), 1);
        assert_eq!(counted[0].0, Level::WARN);
    }

    #[test]
    fn test_small_multimedia_data_rejects_bad_checksum() {
        let msg = Message::new(extended_header(0x0801), Bytes::from(vec![0xAB; 100]));
        let mut encoded = msg.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(matches!(
            Message::decode(&encoded),
            Err(ParseError::ChecksumMismatch { .. })
        ));
    }
}
