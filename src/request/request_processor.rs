// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tracing::{debug, trace, warn};

use crate::protocol::terminal::GenericResult;
use crate::protocol::{Message, MessageId};
use crate::session::TerminalSession;
use crate::{AppError, AppResult};

use super::handler::{resolve, route};
use super::{DispatchOutcome, RequestContext};

pub struct RequestProcessor;

impl RequestProcessor {
    /// Handles one decoded message on behalf of its connection.
    ///
    /// Never fails: handler errors are logged and, where the terminal is entitled to an
    /// answer, turned into a generic response.
    pub fn process_request(
        message: &Message,
        session: &mut TerminalSession,
        ctx: &RequestContext<'_>,
    ) -> DispatchOutcome {
        trace!(
            peer = %session.peer,
            "Processing message: {:?}",
            message
        );
        session.touch(message);
        let mut out = DispatchOutcome::default();
        if let Err(err) = Self::dispatch(message, session, ctx, &mut out) {
            Self::handle_error(err, message, session, &mut out);
        }
        out
    }

    fn dispatch(
        message: &Message,
        session: &mut TerminalSession,
        ctx: &RequestContext<'_>,
        out: &mut DispatchOutcome,
    ) -> AppResult<()> {
        let raw_id = message.raw_id();
        let Some(route) = resolve(message, session).and_then(route) else {
            if MessageId::is_platform_originated(raw_id) {
                debug!(
                    peer = %session.peer,
                    "ignoring platform message id 0x{:04X} sent by terminal",
                    raw_id
                );
                return Ok(());
            }
            if !session.is_authenticated() {
                return Err(AppError::UnauthorizedMessage(raw_id));
            }
            debug!(
                terminal = %session.display_id(),
                "acknowledging unsupported message 0x{:04X}",
                raw_id
            );
            return out.ack(session, message, GenericResult::Success);
        };

        if route.requires_authentication && !session.is_authenticated() {
            return Err(AppError::UnauthorizedMessage(raw_id));
        }
        (route.handler)(message, session, ctx, out)
    }

    fn handle_error(
        err: AppError,
        message: &Message,
        session: &mut TerminalSession,
        out: &mut DispatchOutcome,
    ) {
        match err {
            AppError::UnauthorizedMessage(id) => {
                debug!(
                    peer = %session.peer,
                    state = ?session.state,
                    "dropping 0x{:04X} from unauthenticated terminal",
                    id
                );
            }
            AppError::Parse(parse_err) => {
                warn!(
                    terminal = %session.display_id(),
                    body = %hex::encode(&message.body),
                    "malformed 0x{:04X} body: {}",
                    message.raw_id(),
                    parse_err
                );
                if !MessageId::is_platform_originated(message.raw_id()) {
                    if let Err(err) = out.ack(session, message, GenericResult::MessageError) {
                        warn!("failed to encode error response: {}", err);
                    }
                }
            }
            err => {
                warn!(
                    terminal = %session.display_id(),
                    "failed to handle 0x{:04X}: {}",
                    message.raw_id(),
                    err
                );
            }
        }
    }
}
