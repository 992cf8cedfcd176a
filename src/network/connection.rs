use std::io::{self, ErrorKind};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::trace;

use crate::network::frame::{FrameCodec, RejectedFrame};
use crate::protocol::Message;
use crate::AppResult;

/// Read side of a terminal socket.
///
/// Wraps the read half of the TCP stream together with the [`FrameCodec`] that reassembles
/// frames across reads.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    codec: FrameCodec,
    chunk: Vec<u8>,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, read_buffer_size: usize, max_frame_buffer: usize) -> Self {
        Connection {
            reader,
            codec: FrameCodec::new(max_frame_buffer),
            chunk: vec![0u8; read_buffer_size],
        }
    }

    /// Reads until one frame resolves.
    ///
    /// A rejected span is returned as `Some(Err(..))` so the caller can log it and keep reading.
    /// `None` means the terminal closed the socket between frames; closing in the middle of a
    /// frame is reported as a connection reset.
    ///
    /// Cancel safe: bytes already read stay in the codec.
    pub async fn read_frame(&mut self) -> AppResult<Option<Result<Message, RejectedFrame>>> {
        loop {
            if let Some(frame) = self.codec.next_frame() {
                return Ok(Some(frame));
            }
            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                return if self.codec.buffered() == 0 {
                    // terminal has closed the connection gracefully
                    Ok(None)
                } else {
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
            trace!("read {} bytes", n);
            self.codec.feed(&self.chunk[..n]);
        }
    }
}
