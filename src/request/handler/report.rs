//! Terminal answers to platform queries. They are published on the registry's report channel.

use tracing::debug;

use crate::protocol::resource::{FileUploadCompleted, ResourceListResponse, VendorReply};
use crate::protocol::terminal::{GenericResult, ParameterQueryResponse};
use crate::protocol::Message;
use crate::registry::{ReportKind, TerminalReport};
use crate::request::{DispatchOutcome, RequestContext};
use crate::session::TerminalSession;
use crate::AppResult;

fn publish(session: &TerminalSession, ctx: &RequestContext<'_>, kind: ReportKind) {
    debug!(terminal = %session.display_id(), "terminal report {:?}", kind);
    ctx.registry
        .publish_report(TerminalReport::new(session.display_id(), kind));
}

/// `0x0104`
pub fn handle_parameter_response(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let response = ParameterQueryResponse::parse(&message.body)?;
    publish(session, ctx, ReportKind::Parameters(response));
    out.ack(session, message, GenericResult::Success)
}

/// `0x1205`
pub fn handle_resource_list(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let response = ResourceListResponse::parse(&message.body)?;
    publish(session, ctx, ReportKind::ResourceList(response));
    out.ack(session, message, GenericResult::Success)
}

/// `0x1206`
pub fn handle_file_upload_completed(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let completed = FileUploadCompleted::parse(&message.body)?;
    publish(session, ctx, ReportKind::FileUploadCompleted(completed));
    out.ack(session, message, GenericResult::Success)
}

/// `0xB051`, `0xB061`, `0xB063`, `0xB065`. Vendor replies are not acknowledged.
pub fn handle_vendor_reply(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    _out: &mut DispatchOutcome,
) -> AppResult<()> {
    let Some(message_id) = message.id() else {
        return Ok(());
    };
    let reply = VendorReply::parse(&message.body)?;
    publish(session, ctx, ReportKind::Vendor { message_id, reply });
    Ok(())
}
