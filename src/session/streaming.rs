//! Streaming session bookkeeping for one terminal connection.
//!
//! Sessions are created by the platform when it sends a `0x9101` stream request and are keyed by
//! a platform generated id. The terminal never sees that id; its acknowledgment is correlated to
//! the newest session still waiting for one.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::protocol::streaming::{PacketDataType, StreamPacket};
use crate::{AppError, AppResult};

/// Packets kept per session for statistics.
pub const PACKET_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamingStatus {
    /// request sent, waiting for the terminal
    Requested,
    /// terminal acknowledged, no data yet
    Accepted,
    /// terminal answered with a non zero result; final
    Rejected,
    /// data flowing
    Active,
    Paused,
    /// final
    Stopped,
}

impl StreamingStatus {
    pub const fn can_transition_to(current: StreamingStatus, target: StreamingStatus) -> bool {
        use StreamingStatus::*;
        match (current, target) {
            (Requested, Accepted) | (Requested, Rejected) => true,
            (Accepted, Active) => true,
            (Accepted, Paused) | (Active, Paused) => true,
            (Paused, Active) => true,
            (Requested, Stopped) | (Accepted, Stopped) | (Active, Stopped) | (Paused, Stopped) => {
                true
            }
            _ => false,
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, StreamingStatus::Rejected | StreamingStatus::Stopped)
    }
}

/// Parameters of a stream request, as supplied by the administrative caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingOptions {
    pub server_ip: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub channel: u8,
    /// 0 audio+video, 1 video, 2 two-way talk, 3 listen, 4 broadcast, 5 passthrough
    pub data_type: u8,
    /// 0 main stream, 1 sub stream
    pub stream_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketRecord {
    pub sequence: u16,
    #[serde(skip)]
    pub data_type: Option<PacketDataType>,
    pub size: usize,
    pub received_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamingSession {
    pub session_id: String,
    pub terminal_id: String,
    pub channel_number: u8,
    pub data_type: u8,
    pub stream_type: u8,
    pub server_ip: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub status: StreamingStatus,
    /// serial of the `0x9101` that created the session
    pub request_serial: u16,
    pub result_code: Option<u8>,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub packets: VecDeque<PacketRecord>,
    pub packet_count: u64,
    pub total_bytes: u64,
}

impl StreamingSession {
    fn transition(&mut self, target: StreamingStatus) -> AppResult<()> {
        if !StreamingStatus::can_transition_to(self.status, target) {
            return Err(AppError::IllegalStateError(format!(
                "streaming session {} cannot go from {:?} to {:?}",
                self.session_id, self.status, target
            )));
        }
        debug!(
            session = %self.session_id,
            "streaming session {:?} -> {:?}",
            self.status,
            target
        );
        self.status = target;
        if matches!(target, StreamingStatus::Stopped | StreamingStatus::Rejected) {
            self.end_time = Some(Local::now());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct StreamingSessions {
    sessions: HashMap<String, StreamingSession>,
}

impl StreamingSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        terminal_id: &str,
        options: &StreamingOptions,
        request_serial: u16,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = StreamingSession {
            session_id: session_id.clone(),
            terminal_id: terminal_id.to_string(),
            channel_number: options.channel,
            data_type: options.data_type,
            stream_type: options.stream_type,
            server_ip: options.server_ip.clone(),
            tcp_port: options.tcp_port,
            udp_port: options.udp_port,
            status: StreamingStatus::Requested,
            request_serial,
            result_code: None,
            start_time: Local::now(),
            end_time: None,
            packets: VecDeque::with_capacity(PACKET_HISTORY),
            packet_count: 0,
            total_bytes: 0,
        };
        self.sessions.insert(session_id.clone(), session);
        session_id
    }

    pub fn get(&self, session_id: &str) -> Option<&StreamingSession> {
        self.sessions.get(session_id)
    }

    pub fn list(&self) -> Vec<StreamingSession> {
        let mut sessions: Vec<_> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.start_time);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Newest session still waiting for an answer, optionally on a given channel.
    fn newest_requested(&mut self, channel: Option<u8>) -> Option<&mut StreamingSession> {
        self.sessions
            .values_mut()
            .filter(|s| s.status == StreamingStatus::Requested)
            .filter(|s| channel.map_or(true, |c| s.channel_number == c))
            .max_by_key(|s| (s.start_time, s.request_serial))
    }

    /// Applies the terminal's answer to a stream request.
    ///
    /// When `reply_serial` is known the session created by that request is used, otherwise the
    /// newest `Requested` session.
    pub fn apply_ack(&mut self, reply_serial: Option<u16>, result: u8) -> Option<(String, StreamingStatus)> {
        let by_serial = reply_serial.and_then(|serial| {
            self.sessions
                .values()
                .find(|s| s.status == StreamingStatus::Requested && s.request_serial == serial)
                .map(|s| s.session_id.clone())
        });
        let session = match by_serial {
            Some(id) => self.sessions.get_mut(&id),
            None => self.newest_requested(None),
        }?;
        Self::resolve(session, result)
    }

    /// Applies a `0x1101` stream response for `channel`.
    pub fn apply_response(&mut self, channel: u8, result: u8) -> Option<(String, StreamingStatus)> {
        let session = self.newest_requested(Some(channel))?;
        Self::resolve(session, result)
    }

    fn resolve(session: &mut StreamingSession, result: u8) -> Option<(String, StreamingStatus)> {
        let target = if result == 0 {
            StreamingStatus::Accepted
        } else {
            StreamingStatus::Rejected
        };
        session.result_code = Some(result);
        session.transition(target).ok()?;
        Some((session.session_id.clone(), target))
    }

    /// Accounts a data packet to the live session on the packet's channel.
    ///
    /// The first packet of an accepted session makes it active. Packets for paused, stopped or
    /// unknown channels are not accounted.
    pub fn record_packet(&mut self, packet: &StreamPacket) -> Option<&StreamingSession> {
        let session = self
            .sessions
            .values_mut()
            .filter(|s| s.channel_number == packet.channel)
            .filter(|s| matches!(s.status, StreamingStatus::Accepted | StreamingStatus::Active))
            .max_by_key(|s| s.start_time)?;
        if session.status == StreamingStatus::Accepted {
            session.transition(StreamingStatus::Active).ok()?;
        }
        if session.packets.len() == PACKET_HISTORY {
            session.packets.pop_front();
        }
        session.packets.push_back(PacketRecord {
            sequence: packet.sequence,
            data_type: Some(packet.data_type),
            size: packet.payload.len(),
            received_at: Local::now(),
        });
        session.packet_count += 1;
        session.total_bytes += packet.payload.len() as u64;
        trace!(
            session = %session.session_id,
            seq = packet.sequence,
            "accounted {} stream bytes",
            packet.payload.len()
        );
        Some(session)
    }

    fn get_mut(&mut self, session_id: &str) -> AppResult<&mut StreamingSession> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))
    }

    pub fn pause(&mut self, session_id: &str) -> AppResult<&StreamingSession> {
        let session = self.get_mut(session_id)?;
        session.transition(StreamingStatus::Paused)?;
        Ok(session)
    }

    pub fn resume(&mut self, session_id: &str) -> AppResult<&StreamingSession> {
        let session = self.get_mut(session_id)?;
        session.transition(StreamingStatus::Active)?;
        Ok(session)
    }

    pub fn stop(&mut self, session_id: &str) -> AppResult<&StreamingSession> {
        let session = self.get_mut(session_id)?;
        session.transition(StreamingStatus::Stopped)?;
        Ok(session)
    }

    /// Channel of a session that may move to `target`, or of any live session when `target` is
    /// `None`. Checked before a control command goes out so a refused change sends nothing.
    pub fn channel_for(&self, session_id: &str, target: Option<StreamingStatus>) -> AppResult<u8> {
        let session = self
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        let allowed = match target {
            Some(target) => StreamingStatus::can_transition_to(session.status, target),
            None => session.status.is_live(),
        };
        if !allowed {
            return Err(AppError::IllegalStateError(format!(
                "streaming session {} is {:?}",
                session_id, session.status
            )));
        }
        Ok(session.channel_number)
    }

    /// Records a main/sub stream switch on a live session.
    pub fn switch_stream(&mut self, session_id: &str, stream_type: u8) -> AppResult<&StreamingSession> {
        let session = self.get_mut(session_id)?;
        if !session.status.is_live() {
            return Err(AppError::IllegalStateError(format!(
                "streaming session {} is {:?}",
                session_id, session.status
            )));
        }
        session.stream_type = stream_type;
        Ok(session)
    }

    /// Stops every live session; used when the connection goes away.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for session in self.sessions.values_mut() {
            if session.status.is_live() && session.transition(StreamingStatus::Stopped).is_ok() {
                stopped += 1;
            }
        }
        stopped
    }
}
