use tracing::{info, trace};

use crate::protocol::streaming::{StreamPacket, StreamingResponse};
use crate::protocol::terminal::GenericResult;
use crate::protocol::Message;
use crate::request::{DispatchOutcome, RequestContext};
use crate::session::TerminalSession;
use crate::AppResult;

/// Stream data (`0x9103`). Not acknowledged.
pub fn handle_streaming_data(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    _out: &mut DispatchOutcome,
) -> AppResult<()> {
    let packet = StreamPacket::parse(&message.body)?;
    if session.streaming.record_packet(&packet).is_none() {
        trace!(
            terminal = %session.display_id(),
            channel = packet.channel,
            seq = packet.sequence,
            "stream packet without a live session"
        );
    }
    Ok(())
}

/// Stream response (`0x1101`): the terminal's answer to a stream request, keyed by channel.
pub fn handle_streaming_response(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let response = StreamingResponse::parse(&message.body)?;
    if let Some((session_id, status)) = session
        .streaming
        .apply_response(response.channel, response.result)
    {
        info!(
            terminal = %session.display_id(),
            session = %session_id,
            channel = response.channel,
            "stream response: {:?}",
            status
        );
    }
    out.ack(session, message, GenericResult::Success)
}
