use tokio::time::Instant;
use tracing::{debug, trace};

use crate::protocol::location::{BulkLocationUpload, LocationReport};
use crate::protocol::terminal::GenericResult;
use crate::protocol::Message;
use crate::request::{DispatchOutcome, RequestContext};
use crate::session::TerminalSession;
use crate::AppResult;

/// Hands `report` to a waiting location query, if any. The pending query is cleared either way.
fn resolve_pending_query(
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    report: &LocationReport,
) {
    let Some(pending) = session.take_pending_location_query() else {
        return;
    };
    let timeout = ctx.config.session.location_query_timeout();
    if pending.is_expired(Instant::now(), timeout) {
        debug!(
            terminal = %session.display_id(),
            serial = pending.request_serial,
            "location arrived after the query expired"
        );
        return;
    }
    if pending.reply.send(report.clone()).is_err() {
        debug!(terminal = %session.display_id(), "location query requester went away");
    } else {
        debug!(
            terminal = %session.display_id(),
            serial = pending.request_serial,
            "location query answered"
        );
    }
}

/// Location report (`0x0200`).
pub fn handle_location_report(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let report = LocationReport::parse_report(&message.body)?;
    trace!(
        terminal = %session.display_id(),
        lat = report.basic.latitude,
        lon = report.basic.longitude,
        speed = report.basic.speed,
        "location report"
    );
    resolve_pending_query(session, ctx, &report);
    out.ack(session, message, GenericResult::Success)
}

/// Location query response (`0x0201`).
pub fn handle_location_query_response(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let report = LocationReport::parse_query_reply(&message.body)?;
    resolve_pending_query(session, ctx, &report);
    out.ack(session, message, GenericResult::Success)
}

/// Bulk location upload (`0x0704`).
pub fn handle_bulk_location(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let upload = BulkLocationUpload::parse(&message.body)?;
    debug!(
        terminal = %session.display_id(),
        backfill = upload.backfill,
        "bulk upload of {} locations",
        upload.reports.len()
    );
    out.ack(session, message, GenericResult::Success)
}
