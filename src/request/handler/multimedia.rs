use tracing::{debug, info, warn};

use crate::command::PlatformCommand;
use crate::protocol::multimedia::MultimediaEventBody;
use crate::protocol::terminal::GenericResult;
use crate::protocol::Message;
use crate::request::{DispatchOutcome, RequestContext};
use crate::session::{DataAcceptance, TerminalSession};
use crate::{AppError, AppResult};

/// Multimedia event upload (`0x0800`).
pub fn handle_multimedia_event(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let body = MultimediaEventBody::parse(&message.body)?;
    let event = session.multimedia.record_event(&body);
    debug!(
        data_id = event.data_id,
        media_type = event.media_type,
        format = event.format,
        channel = event.channel_id,
        "multimedia event recorded"
    );
    out.ack(session, message, GenericResult::Success)
}

/// Multimedia data upload (`0x0801`). Always answered with `0x8800`; a data id of zero tells the
/// terminal the upload was not accepted.
pub fn handle_multimedia_data(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let terminal_id = session.display_id().to_string();
    if message.checksum_tolerated {
        debug!(terminal = %terminal_id, "accepting data upload with tolerated checksum mismatch");
    }
    let response = match session
        .multimedia
        .accept_data(&terminal_id, message.header.packet, &message.body)
    {
        Ok(DataAcceptance::Complete(upload)) => {
            info!(
                terminal = %terminal_id,
                data_id = upload.data_id,
                size = upload.payload.len(),
                "multimedia upload complete"
            );
            let response = PlatformCommand::MultimediaDataResponse {
                data_id: upload.data_id,
                missing: Vec::new(),
            };
            out.uploads.push(upload);
            response
        }
        Ok(DataAcceptance::Pending { data_id }) => {
            debug!(terminal = %terminal_id, data_id, packet = ?message.header.packet, "multimedia sub-package stored");
            return out.ack(session, message, GenericResult::Success);
        }
        Ok(DataAcceptance::Retransmit { data_id, missing }) => {
            info!(
                terminal = %terminal_id,
                data_id,
                "requesting retransmission of {} packages",
                missing.len()
            );
            PlatformCommand::MultimediaDataResponse { data_id, missing }
        }
        Err(AppError::ProtocolSequenceViolation(reason)) => {
            warn!(terminal = %terminal_id, "multimedia sequence violation: {}", reason);
            PlatformCommand::MultimediaDataResponse {
                data_id: 0,
                missing: Vec::new(),
            }
        }
        Err(err) => return Err(err),
    };
    out.reply(session, &response)
}
