use crate::command::{encode_command, OutboundFrame, PlatformCommand};
use crate::protocol::terminal::GenericResult;
use crate::protocol::{Message, MessageId};
use crate::registry::ConnectionRegistry;
use crate::service::GatewayConfig;
use crate::session::{CompletedUpload, TerminalSession};
use crate::AppResult;

/// Shared collaborators visible to every handler.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    pub config: &'a GatewayConfig,
    pub registry: &'a ConnectionRegistry,
}

impl<'a> RequestContext<'a> {
    pub fn new(config: &'a GatewayConfig, registry: &'a ConnectionRegistry) -> Self {
        RequestContext { config, registry }
    }
}

/// What the connection worker has to do after a message was handled.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Frames to write, in order.
    pub replies: Vec<OutboundFrame>,
    /// Completed multimedia files for the media store.
    pub uploads: Vec<CompletedUpload>,
    /// Close the connection once the replies are written.
    pub close: bool,
}

impl DispatchOutcome {
    pub fn reply(&mut self, session: &mut TerminalSession, command: &PlatformCommand) -> AppResult<()> {
        self.replies.push(encode_command(session, command)?);
        Ok(())
    }

    /// Platform generic response to `message`.
    pub fn ack(
        &mut self,
        session: &mut TerminalSession,
        message: &Message,
        result: GenericResult,
    ) -> AppResult<()> {
        self.reply(
            session,
            &PlatformCommand::ack(message.serial(), message.raw_id(), result),
        )
    }

    pub fn reply_ids(&self) -> Vec<MessageId> {
        self.replies.iter().map(|frame| frame.message_id).collect()
    }
}
