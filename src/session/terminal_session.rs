use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::protocol::location::LocationReport;
use crate::protocol::terminal::RegistrationRequest;
use crate::protocol::{HeaderKind, Message, MessageHeader, MessageId, VERSION_FLAG};
use crate::registry::ConnectionActivity;
use crate::{AppError, AppResult};

use super::multimedia::MultimediaLedger;
use super::state::ConnectionState;
use super::streaming::StreamingSessions;

/// Behaviour switches for terminals that deviate from the standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalCapabilities {
    /// Locate the acknowledged message id by scanning the generic response body instead of
    /// reading it at its fixed offset.
    pub scan_generic_ack: bool,
}

impl Default for TerminalCapabilities {
    fn default() -> Self {
        TerminalCapabilities {
            scan_generic_ack: true,
        }
    }
}

/// A platform originated location query waiting for the terminal's answer.
#[derive(Debug)]
pub struct PendingLocationQuery {
    pub request_serial: u16,
    pub requested_at: Instant,
    pub reply: oneshot::Sender<LocationReport>,
}

impl PendingLocationQuery {
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.requested_at) > timeout || self.reply.is_closed()
    }
}

/// Mutable state of one terminal connection.
///
/// Owned by the connection's worker task; nothing else touches it.
#[derive(Debug)]
pub struct TerminalSession {
    pub peer: SocketAddr,
    pub terminal_id: Option<String>,
    pub state: ConnectionState,
    pub auth_code: Option<String>,
    pub registration: Option<RegistrationRequest>,
    pub capabilities: TerminalCapabilities,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
    pub last_message_time: Instant,
    pub message_count: u64,
    pub pending_location_query: Option<PendingLocationQuery>,
    pub multimedia: MultimediaLedger,
    pub streaming: StreamingSessions,
    /// Header layout, phone and version of the last frame, reused for replies.
    header_kind: HeaderKind,
    terminal_phone: String,
    protocol_version: u8,
    next_serial: u16,
}

impl TerminalSession {
    pub fn new(peer: SocketAddr, capabilities: TerminalCapabilities) -> Self {
        let now = Instant::now();
        TerminalSession {
            peer,
            terminal_id: None,
            state: ConnectionState::New,
            auth_code: None,
            registration: None,
            capabilities,
            connected_at: now,
            last_heartbeat: now,
            last_message_time: now,
            message_count: 0,
            pending_location_query: None,
            multimedia: MultimediaLedger::new(),
            streaming: StreamingSessions::new(),
            header_kind: HeaderKind::Extended,
            terminal_phone: String::new(),
            protocol_version: 1,
            next_serial: 0,
        }
    }

    /// Bookkeeping done for every decoded message before dispatch.
    pub fn touch(&mut self, message: &Message) {
        self.last_message_time = Instant::now();
        self.message_count += 1;
        self.header_kind = message.header.kind;
        self.terminal_phone = message.header.terminal_phone.clone();
        self.protocol_version = message.header.protocol_version;
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_registered(&self) -> bool {
        self.state.is_registered()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Terminal id when known, otherwise the phone from the frame header.
    pub fn display_id(&self) -> &str {
        self.terminal_id
            .as_deref()
            .unwrap_or(self.terminal_phone.as_str())
    }

    pub fn terminal_phone(&self) -> &str {
        &self.terminal_phone
    }

    fn transition(&mut self, target: ConnectionState) -> AppResult<()> {
        if !ConnectionState::can_transition_to(self.state, target) {
            return Err(AppError::IllegalStateError(format!(
                "connection {} cannot go from {:?} to {:?}",
                self.peer, self.state, target
            )));
        }
        debug!(peer = %self.peer, "connection {:?} -> {:?}", self.state, target);
        self.state = target;
        Ok(())
    }

    pub fn register(
        &mut self,
        terminal_id: String,
        registration: Option<RegistrationRequest>,
    ) -> AppResult<()> {
        if self.state != ConnectionState::Authenticated {
            self.transition(ConnectionState::Registered)?;
        }
        info!(peer = %self.peer, terminal = %terminal_id, "terminal registered");
        self.auth_code = Some(terminal_id.clone());
        self.terminal_id = Some(terminal_id);
        self.registration = registration;
        Ok(())
    }

    pub fn authenticate(&mut self) -> AppResult<()> {
        self.transition(ConnectionState::Authenticated)?;
        self.heartbeat();
        Ok(())
    }

    pub fn logout(&mut self) -> AppResult<()> {
        self.transition(ConnectionState::Registered)
    }

    /// Marks the connection closed and stops its streaming sessions. Returns the number of
    /// sessions stopped.
    pub fn close(&mut self) -> usize {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
        }
        self.pending_location_query = None;
        self.streaming.stop_all()
    }

    pub fn next_serial(&mut self) -> u16 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        serial
    }

    /// Header for an outbound message, mirroring the layout the terminal speaks.
    pub fn reply_header(&mut self, message_id: MessageId) -> MessageHeader {
        let serial_number = self.next_serial();
        let properties = match self.header_kind {
            HeaderKind::Extended => VERSION_FLAG,
            HeaderKind::Legacy => 0,
        };
        MessageHeader {
            message_id: message_id.as_u16(),
            properties,
            kind: self.header_kind,
            protocol_version: self.protocol_version,
            terminal_phone: self.terminal_phone.clone(),
            serial_number,
            packet: None,
        }
    }

    /// Stores a location query, returning the one it replaces.
    pub fn set_pending_location_query(
        &mut self,
        query: PendingLocationQuery,
    ) -> Option<PendingLocationQuery> {
        self.pending_location_query.replace(query)
    }

    pub fn take_pending_location_query(&mut self) -> Option<PendingLocationQuery> {
        self.pending_location_query.take()
    }

    pub fn activity(&self) -> ConnectionActivity {
        ConnectionActivity {
            terminal_id: self.terminal_id.clone(),
            state: self.state,
            connected_at: self.connected_at,
            last_heartbeat: self.last_heartbeat,
            last_message_time: self.last_message_time,
            message_count: self.message_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> TerminalSession {
        TerminalSession::new("127.0.0.1:7000".parse().unwrap(), TerminalCapabilities::default())
    }

    #[test]
    fn test_lifecycle() {
        let mut session = session();
        assert!(session.authenticate().is_err());
        session.register("T1".into(), None).unwrap();
        assert!(session.is_registered());
        assert_eq!(session.auth_code.as_deref(), Some("T1"));
        session.authenticate().unwrap();
        assert!(session.is_authenticated());
        session.logout().unwrap();
        assert!(!session.is_authenticated());
        assert!(session.is_registered());
        session.close();
        assert!(session.register("T1".into(), None).is_err());
    }

    #[test]
    fn test_serials_wrap() {
        let mut session = session();
        session.next_serial = u16::MAX;
        assert_eq!(session.next_serial(), u16::MAX);
        assert_eq!(session.next_serial(), 0);
    }

    #[tokio::test]
    async fn test_second_location_query_replaces_first() {
        let mut session = session();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        session.set_pending_location_query(PendingLocationQuery {
            request_serial: 1,
            requested_at: Instant::now(),
            reply: tx1,
        });
        let replaced = session.set_pending_location_query(PendingLocationQuery {
            request_serial: 2,
            requested_at: Instant::now(),
            reply: tx2,
        });
        assert_eq!(replaced.map(|q| q.request_serial), Some(1));
        assert!(rx1.try_recv().is_err());
        assert_eq!(
            session.take_pending_location_query().map(|q| q.request_serial),
            Some(2)
        );
    }
}
