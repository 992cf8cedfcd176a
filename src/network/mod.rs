//! Network Module Implementation
//!
//! Byte level handling of terminal sockets.
//!
//! # Components
//!
//! - `FrameCodec`: reassembles `0x7E` delimited frames across reads, removes byte stuffing and
//!   decodes each frame into a [`crate::protocol::Message`]; also provides the write direction
//!   (`encode_frame`/`encode_message`)
//! - `Connection`: read half of a terminal socket driving the codec
//!
//! # Features
//!
//! - Tolerates frames split across any number of reads
//! - Resynchronises on corrupt spans instead of dropping the whole buffer
//! - Bounds the reassembly buffer against never-terminated frames

pub use connection::Connection;
pub use frame::{
    encode_frame, encode_message, escape, unescape, FrameCodec, RejectedFrame, DEFAULT_MAX_BUFFER,
    ESCAPE_BYTE, FRAME_DELIMITER,
};
mod connection;
mod frame;
