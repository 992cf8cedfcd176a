//! Outbound platform commands.
//!
//! Every message the gateway writes to a terminal goes through [`encode_command`]: the body is
//! written once into a buffer, the header length field is taken from that buffer, and the
//! result is framed by the codec's write path.

mod platform_command;

use bytes::{Bytes, BytesMut};
use tracing::trace;

pub use platform_command::{
    FileUploadInstruction, PlatformCommand, ResourceQuery, StreamControl, UploadControl,
    HEARTBEAT_PARAMETER_ID, RESTART_COMMAND,
};

use crate::network::encode_message;
use crate::protocol::message::BODY_LENGTH_MASK;
use crate::protocol::{Message, MessageId};
use crate::session::TerminalSession;
use crate::{AppError, AppResult};

/// Largest body the 10 bit length field can describe.
pub const MAX_BODY_LEN: usize = BODY_LENGTH_MASK as usize;

/// A framed command ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub message_id: MessageId,
    /// Serial number the command was sent with; terminals echo it in their replies.
    pub serial: u16,
    pub bytes: Bytes,
}

/// Encodes `command` for the terminal behind `session`, using the header layout and phone the
/// terminal itself uses and the session's next outbound serial.
pub fn encode_command(
    session: &mut TerminalSession,
    command: &PlatformCommand,
) -> AppResult<OutboundFrame> {
    let mut body = BytesMut::new();
    command.write_body(&mut body)?;
    if body.len() > MAX_BODY_LEN {
        return Err(AppError::InvalidValue(format!(
            "{} body of {} bytes exceeds {}",
            command.message_id(),
            body.len(),
            MAX_BODY_LEN
        )));
    }
    let message_id = command.message_id();
    let header = session.reply_header(message_id);
    let serial = header.serial_number;
    let message = Message::new(header, body.freeze());
    trace!(
        terminal = %session.display_id(),
        msg_id = %message_id,
        serial,
        "encoded command"
    );
    Ok(OutboundFrame {
        message_id,
        serial,
        bytes: encode_message(&message),
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::network::FrameCodec;
    use crate::protocol::terminal::{GenericResult, Parameter};
    use crate::protocol::{HeaderKind, MessageHeader, VERSION_FLAG};
    use crate::session::TerminalCapabilities;

    fn session_speaking(kind: HeaderKind, phone: &str) -> TerminalSession {
        let mut session =
            TerminalSession::new("127.0.0.1:9000".parse().unwrap(), TerminalCapabilities::default());
        let properties = match kind {
            HeaderKind::Extended => VERSION_FLAG,
            HeaderKind::Legacy => 0,
        };
        let header = MessageHeader {
            message_id: MessageId::Heartbeat.as_u16(),
            properties,
            kind,
            protocol_version: if kind == HeaderKind::Extended { 1 } else { 0 },
            terminal_phone: phone.into(),
            serial_number: 1,
            packet: None,
        };
        session.touch(&Message::new(header, Bytes::new()));
        session
    }

    fn decode(bytes: &Bytes) -> Message {
        let mut codec = FrameCodec::default();
        codec.feed(bytes);
        codec.next_frame().unwrap().unwrap()
    }

    #[test]
    fn test_reply_mirrors_extended_header() {
        let mut session = session_speaking(HeaderKind::Extended, "00000000628076842334");
        let frame =
            encode_command(&mut session, &PlatformCommand::ack(1, 0x0002, GenericResult::Success))
                .unwrap();
        let message = decode(&frame.bytes);
        assert_eq!(message.header.kind, HeaderKind::Extended);
        assert_eq!(message.phone(), "00000000628076842334");
        assert_eq!(message.id(), Some(MessageId::PlatformGenericResponse));
        assert_eq!(message.header.body_length(), 5);
        assert_eq!(message.body.as_ref(), &[0, 1, 0, 2, 0]);
    }

    #[test]
    fn test_reply_mirrors_legacy_header() {
        let mut session = session_speaking(HeaderKind::Legacy, "123456");
        let frame = encode_command(&mut session, &PlatformCommand::restart()).unwrap();
        let message = decode(&frame.bytes);
        assert_eq!(message.header.kind, HeaderKind::Legacy);
        assert_eq!(message.phone(), "123456");
        assert_eq!(message.body.as_ref(), &[RESTART_COMMAND]);
    }

    #[test]
    fn test_serials_increase() {
        let mut session = session_speaking(HeaderKind::Extended, "1");
        let first = encode_command(&mut session, &PlatformCommand::LocationQuery).unwrap();
        let second = encode_command(&mut session, &PlatformCommand::QueryParameters).unwrap();
        assert_eq!(second.serial, first.serial.wrapping_add(1));
        assert_eq!(decode(&second.bytes).serial(), second.serial);
    }

    #[test]
    fn test_body_over_length_field_is_rejected() {
        let mut session = session_speaking(HeaderKind::Extended, "1");
        let parameters = (0..200)
            .map(|id| Parameter::text(id, "abcdefgh"))
            .collect::<Vec<_>>();
        let result = encode_command(&mut session, &PlatformCommand::SetParameters(parameters));
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
    }
}
