//! Registration, authentication, heartbeat and logout.

use tracing::{debug, info, warn};

use crate::command::PlatformCommand;
use crate::protocol::terminal::{
    AuthenticationRequest, GenericResult, RegistrationRequest, RegistrationResult,
};
use crate::protocol::Message;
use crate::request::{DispatchOutcome, RequestContext};
use crate::session::TerminalSession;
use crate::AppResult;

/// Terminal id from a registration body, or the header phone when the body leaves it blank.
fn terminal_id_of(message: &Message, registration: &RegistrationRequest) -> String {
    if registration.terminal_id.is_empty() {
        message.phone().to_string()
    } else {
        registration.terminal_id.clone()
    }
}

fn registration_response(
    message: &Message,
    result: RegistrationResult,
    auth_code: Option<String>,
) -> PlatformCommand {
    PlatformCommand::RegistrationResponse {
        reply_serial: message.serial(),
        result,
        auth_code,
    }
}

pub fn handle_registration(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let registration = match RegistrationRequest::parse(&message.body) {
        Ok(registration) => registration,
        Err(err) => {
            warn!(
                peer = %session.peer,
                body_len = message.body.len(),
                "rejecting malformed registration: {}",
                err
            );
            return out.reply(
                session,
                &registration_response(message, RegistrationResult::MessageError, None),
            );
        }
    };

    let terminal_id = terminal_id_of(message, &registration);
    if !ctx.config.registration.is_allowed(&terminal_id) {
        warn!(peer = %session.peer, terminal = %terminal_id, "terminal not allowed to register");
        out.reply(
            session,
            &registration_response(message, RegistrationResult::TerminalNotAllowed, None),
        )?;
        out.close = true;
        return Ok(());
    }

    if session.is_registered() {
        debug!(peer = %session.peer, terminal = %terminal_id, "repeated registration");
    }
    session.register(terminal_id.clone(), Some(registration))?;
    out.reply(
        session,
        &registration_response(message, RegistrationResult::Success, Some(terminal_id)),
    )
}

pub fn handle_authentication(
    message: &Message,
    session: &mut TerminalSession,
    ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    let heartbeat = PlatformCommand::heartbeat_interval(ctx.config.session.heartbeat_interval_secs);

    if session.is_authenticated() {
        info!(
            terminal = %session.display_id(),
            "terminal authenticated again, instructing it to send heartbeats instead"
        );
        return out.reply(session, &heartbeat);
    }

    if session.terminal_id.is_none() {
        // a terminal may skip registration and carry the registration fields in this message,
        // or reconnect with the auth code it was issued earlier
        let terminal_id = match RegistrationRequest::parse(&message.body) {
            Ok(registration) => {
                let terminal_id = terminal_id_of(message, &registration);
                if ctx.config.registration.is_allowed(&terminal_id) {
                    session.register(terminal_id.clone(), Some(registration))?;
                }
                terminal_id
            }
            Err(_) => {
                let auth = AuthenticationRequest::parse(&message.body)?;
                if ctx.config.registration.is_allowed(&auth.auth_code) {
                    session.register(auth.auth_code.clone(), None)?;
                }
                auth.auth_code
            }
        };
        if !session.is_registered() {
            warn!(peer = %session.peer, terminal = %terminal_id, "terminal not allowed to authenticate");
            out.ack(session, message, GenericResult::Failure)?;
            out.close = true;
            return Ok(());
        }
    } else {
        let auth = AuthenticationRequest::parse(&message.body)?;
        if session.auth_code.as_deref() != Some(auth.auth_code.as_str()) {
            warn!(
                terminal = %session.display_id(),
                "authentication with unknown auth code {:?}",
                auth.auth_code
            );
            return out.ack(session, message, GenericResult::Failure);
        }
        if let Some(imei) = auth.imei.as_deref() {
            debug!(terminal = %session.display_id(), imei, software = ?auth.software_version, "terminal identity");
        }
    }

    session.authenticate()?;
    info!(peer = %session.peer, terminal = %session.display_id(), "terminal authenticated");
    out.ack(session, message, GenericResult::Success)?;
    out.reply(session, &heartbeat)
}

pub fn handle_heartbeat(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    session.heartbeat();
    out.ack(session, message, GenericResult::Success)
}

pub fn handle_logout(
    message: &Message,
    session: &mut TerminalSession,
    _ctx: &RequestContext<'_>,
    out: &mut DispatchOutcome,
) -> AppResult<()> {
    session.logout()?;
    info!(terminal = %session.display_id(), "terminal logged out");
    out.ack(session, message, GenericResult::Success)
}
