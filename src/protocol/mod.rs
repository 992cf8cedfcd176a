//! Message model of the JT808 / ULV wire protocol.
//!
//! A frame delivered by [`crate::network::FrameCodec`] is decoded into a [`Message`]: header
//! (legacy 10 byte or extended 17 byte layout), opaque body bytes and checksum. Typed views of
//! the bodies the gateway understands live in the submodules and are parsed on demand by the
//! request handlers.

pub mod bcd;
pub mod location;
pub mod message;
pub mod message_id;
pub mod multimedia;
pub mod reader;
pub mod resource;
pub mod streaming;
pub mod terminal;

pub use message::{
    checksum, HeaderKind, Message, MessageHeader, PacketInfo, ParseError, EXTENDED_HEADER_LEN,
    LEGACY_HEADER_LEN, VERSION_FLAG,
};
pub use message_id::MessageId;
pub use reader::BodyReader;
