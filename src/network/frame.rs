use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::protocol::{Message, ParseError};

pub const FRAME_DELIMITER: u8 = 0x7E;
pub const ESCAPE_BYTE: u8 = 0x7D;
/// Accumulated bytes without a resolvable frame are discarded past this size.
pub const DEFAULT_MAX_BUFFER: usize = 8 * 1024;

/// Replaces `0x7D 0x01` with `0x7D` and `0x7D 0x02` with `0x7E`.
///
/// An escape byte followed by anything else is kept literally.
pub fn unescape(escaped: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(escaped.len());
    let mut i = 0;
    while i < escaped.len() {
        let byte = escaped[i];
        if byte == ESCAPE_BYTE && i + 1 < escaped.len() {
            match escaped[i + 1] {
                0x01 => {
                    out.put_u8(ESCAPE_BYTE);
                    i += 2;
                    continue;
                }
                0x02 => {
                    out.put_u8(FRAME_DELIMITER);
                    i += 2;
                    continue;
                }
                _ => {}
            }
        }
        out.put_u8(byte);
        i += 1;
    }
    out
}

pub fn escape(raw: &[u8], out: &mut BytesMut) {
    for &byte in raw {
        match byte {
            FRAME_DELIMITER => out.put_slice(&[ESCAPE_BYTE, 0x02]),
            ESCAPE_BYTE => out.put_slice(&[ESCAPE_BYTE, 0x01]),
            other => out.put_u8(other),
        }
    }
}

/// Wraps unescaped `header ‖ body ‖ checksum` bytes into a wire frame.
pub fn encode_frame(content: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(content.len() + content.len() / 8 + 2);
    out.put_u8(FRAME_DELIMITER);
    escape(content, &mut out);
    out.put_u8(FRAME_DELIMITER);
    out.freeze()
}

pub fn encode_message(message: &Message) -> Bytes {
    encode_frame(&message.encode())
}

/// Outcome of a candidate span that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFrame {
    pub error: ParseError,
    /// Unescaped content of the rejected span, kept for diagnostics.
    pub raw: Bytes,
}

/// Splits a TCP byte stream into delimited frames and decodes them.
///
/// Bytes are appended with [`FrameCodec::feed`] and frames are pulled with
/// [`FrameCodec::next_frame`] until it returns `None`, meaning more bytes are needed.
///
/// The first delimiter after a start delimiter always closes the frame. When a span fails to
/// decode only the bytes before its closing delimiter are dropped, so that delimiter is retried
/// as the start of the next frame. This resynchronises on garbage between two frames.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: BytesMut,
    max_buffer: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new(DEFAULT_MAX_BUFFER)
    }
}

impl FrameCodec {
    pub fn new(max_buffer: usize) -> Self {
        FrameCodec {
            buffer: BytesMut::with_capacity(4 * 1024),
            max_buffer,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next decoded message, a rejected span, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<Message, RejectedFrame>> {
        loop {
            let Some(start) = self.buffer.iter().position(|b| *b == FRAME_DELIMITER) else {
                if !self.buffer.is_empty() {
                    trace!("dropping {} bytes outside any frame", self.buffer.len());
                    self.buffer.clear();
                }
                return None;
            };
            if start > 0 {
                trace!("dropping {} bytes before frame start", start);
                self.buffer.advance(start);
            }

            let Some(end) = self.buffer[1..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER)
                .map(|offset| offset + 1)
            else {
                self.enforce_ceiling();
                return None;
            };

            if end == 1 {
                // two adjacent delimiters: the second one may open the next frame
                self.buffer.advance(1);
                continue;
            }

            let content = unescape(&self.buffer[1..end]);
            return match Message::decode(&content) {
                Ok(message) => {
                    self.buffer.advance(end + 1);
                    Some(Ok(message))
                }
                Err(error) => {
                    self.buffer.advance(end);
                    Some(Err(RejectedFrame {
                        error,
                        raw: content.freeze(),
                    }))
                }
            };
        }
    }

    /// Drains every complete frame currently buffered.
    pub fn frames(&mut self) -> impl Iterator<Item = Result<Message, RejectedFrame>> + '_ {
        std::iter::from_fn(move || self.next_frame())
    }

    fn enforce_ceiling(&mut self) {
        if self.buffer.len() > self.max_buffer {
            warn!(
                "discarding {} buffered bytes without a closing delimiter",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::{HeaderKind, MessageHeader, VERSION_FLAG};

    fn message(message_id: u16, body: &'static [u8]) -> Message {
        let header = MessageHeader {
            message_id,
            properties: VERSION_FLAG,
            kind: HeaderKind::Extended,
            protocol_version: 1,
            terminal_phone: "00000000628076842334".into(),
            serial_number: 0x7E7D,
            packet: None,
        };
        Message::new(header, Bytes::from_static(body))
    }

    #[test]
    fn test_escape_and_unescape_are_inverse() {
        let raw = [0x30, 0x7E, 0x08, 0x7D, 0x55, 0x7D, 0x01, 0x7E, 0x7E];
        let mut escaped = BytesMut::new();
        escape(&raw, &mut escaped);
        assert!(!escaped.contains(&FRAME_DELIMITER));
        assert_eq!(unescape(&escaped).as_ref(), &raw);
    }

    #[test]
    fn test_known_escape_sequences() {
        let mut escaped = BytesMut::new();
        escape(&[0x7E, 0x7D], &mut escaped);
        assert_eq!(escaped.as_ref(), &[0x7D, 0x02, 0x7D, 0x01]);
    }

    #[test]
    fn test_encode_of_decode_is_identity() {
        let wire = encode_message(&message(0x0200, &[0x7E, 0x01, 0x7D]));
        let mut codec = FrameCodec::default();
        codec.feed(&wire);
        let decoded = codec.next_frame().unwrap().unwrap();
        assert_eq!(encode_message(&decoded), wire);
        assert!(codec.next_frame().is_none());
        assert_eq!(codec.buffered(), 0);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(7)]
    #[case(64)]
    fn test_frame_split_across_reads(#[case] chunk: usize) {
        let expected = message(0x0200, &[1, 2, 3, 0x7E, 4, 5, 0x7D, 6]);
        let wire = encode_message(&expected);
        let mut codec = FrameCodec::default();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            codec.feed(piece);
            decoded.extend(codec.frames());
        }
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref().unwrap(), &expected);
    }

    #[test]
    fn test_back_to_back_frames() {
        let first = message(0x0002, &[]);
        let second = message(0x0200, &[9, 9]);
        let mut codec = FrameCodec::default();
        codec.feed(&encode_message(&first));
        codec.feed(&encode_message(&second));
        let frames: Vec<_> = codec.frames().collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].as_ref().unwrap(), &first);
        assert_eq!(frames[1].as_ref().unwrap(), &second);
    }

    #[test]
    fn test_resynchronises_after_garbage_between_frames() {
        let good = message(0x0002, &[]);
        let mut codec = FrameCodec::default();
        // a stray delimiter followed by noise, then a valid frame
        codec.feed(&[0x7E, 0x11, 0x22, 0x33]);
        codec.feed(&encode_message(&good));
        let frames: Vec<_> = codec.frames().collect();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert_eq!(frames[1].as_ref().unwrap(), &good);
    }

    #[test]
    fn test_corrupted_frame_is_rejected_with_raw_bytes() {
        let wire = encode_message(&message(0x0200, &[1, 2, 3]));
        let mut corrupted = BytesMut::from(&wire[..]);
        corrupted[6] ^= 0x01;
        let mut codec = FrameCodec::default();
        codec.feed(&corrupted);
        let rejected = codec.next_frame().unwrap().unwrap_err();
        assert!(matches!(rejected.error, ParseError::ChecksumMismatch { .. }));
        assert!(!rejected.raw.is_empty());
        // the closing delimiter is retried as a start and then waits for more bytes
        assert!(codec.next_frame().is_none());
        assert_eq!(codec.buffered(), 1);
    }

    #[test]
    fn test_unterminated_frame_is_bounded() {
        let mut codec = FrameCodec::new(64);
        codec.feed(&[FRAME_DELIMITER]);
        codec.feed(&[0x55; 100]);
        assert!(codec.next_frame().is_none());
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_noise_without_delimiter_is_dropped() {
        let mut codec = FrameCodec::default();
        codec.feed(&[1, 2, 3]);
        assert!(codec.next_frame().is_none());
        assert_eq!(codec.buffered(), 0);
    }
}
