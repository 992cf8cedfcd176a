use tracing::{debug, info};

use crate::protocol::terminal::GenericResponse;
use crate::protocol::{Message, MessageId};
use crate::request::{DispatchOutcome, RequestContext};
use crate::session::TerminalSession;
use crate::AppResult;

/// Generic responses from the terminal: `0x0001`, or `0x8001` from terminals that answer with
/// the platform's id.
///
/// Only answers to stream requests change state. A `0x0001` with `scan_generic_ack` is searched
/// for the stream request id, because some terminals do not put it at the standard offset. When
/// the body already parses as an answer to another known command, the reply serial is left out
/// of the search so it cannot be mistaken for the id.
pub fn handle_generic_response(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    _out: &mut DispatchOutcome,
) -> AppResult<()> {
    let stream_request = MessageId::StreamingRequest.as_u16();
    let standard = GenericResponse::parse(&message.body).ok();
    let scan = session.capabilities.scan_generic_ack
        && message.raw_id() == MessageId::TerminalGenericResponse.as_u16();

    let stream_ack = if scan {
        let scan_from = match standard {
            Some(response) if MessageId::from_u16(response.reply_id).is_some() => 2,
            _ => 0,
        };
        GenericResponse::scan_result_for(&message.body[scan_from..], stream_request).map(
            |result| {
                let reply_serial = standard
                    .filter(|response| response.reply_id == stream_request)
                    .map(|response| response.reply_serial);
                (reply_serial, result)
            },
        )
    } else {
        standard
            .filter(|response| response.reply_id == stream_request)
            .map(|response| (Some(response.reply_serial), response.result))
    };

    if let Some((reply_serial, result)) = stream_ack {
        match session.streaming.apply_ack(reply_serial, result) {
            Some((session_id, status)) => info!(
                terminal = %session.display_id(),
                session = %session_id,
                result,
                "stream request answered: {:?}",
                status
            ),
            None => debug!(
                terminal = %session.display_id(),
                "stream request acknowledgment without a pending session"
            ),
        }
        return Ok(());
    }

    match standard {
        Some(response) => debug!(
            terminal = %session.display_id(),
            reply_serial = response.reply_serial,
            result = response.result,
            "terminal acknowledged 0x{:04X}",
            response.reply_id
        ),
        None => debug!(
            terminal = %session.display_id(),
            body = %hex::encode(&message.body),
            "unparseable generic response"
        ),
    }
    Ok(())
}
