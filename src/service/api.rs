use std::sync::Arc;

use tokio::sync::{broadcast, oneshot};
use tokio::time;
use tracing::debug;

use crate::command::{PlatformCommand, ResourceQuery};
use crate::protocol::location::LocationReport;
use crate::protocol::terminal::Parameter;
use crate::registry::{
    ConnectionActivity, ConnectionCommand, ConnectionHandle, ConnectionRegistry, TerminalReport,
};
use crate::session::{StreamingOptions, StreamingSession};
use crate::{AppError, AppResult};

use super::GatewayConfig;

/// Administrative entry point for the platform side.
///
/// Every operation resolves the terminal in the registry and hands the work to that
/// connection's worker; nothing here touches a socket or a session directly.
#[derive(Debug, Clone)]
pub struct PlatformApi {
    registry: Arc<ConnectionRegistry>,
    config: Arc<GatewayConfig>,
}

impl PlatformApi {
    pub fn new(registry: Arc<ConnectionRegistry>, config: Arc<GatewayConfig>) -> Self {
        PlatformApi { registry, config }
    }

    pub fn find_connection_by_terminal_id(
        &self,
        terminal_id: &str,
    ) -> Option<Arc<ConnectionHandle>> {
        self.registry.find_by_terminal_id(terminal_id)
    }

    /// Liveness of every open connection.
    pub fn connections(&self) -> Vec<ConnectionActivity> {
        self.registry
            .snapshot()
            .iter()
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.activity())
            .collect()
    }

    /// Answers to parameter, resource and vendor queries as terminals send them.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<TerminalReport> {
        self.registry.subscribe_reports()
    }

    fn connection(&self, terminal_id: &str) -> AppResult<Arc<ConnectionHandle>> {
        self.find_connection_by_terminal_id(terminal_id)
            .ok_or_else(|| AppError::TerminalNotConnected(terminal_id.to_string()))
    }

    /// Sends `command` to the terminal; returns the serial it went out with.
    pub async fn send_platform_instruction(
        &self,
        terminal_id: &str,
        command: PlatformCommand,
    ) -> AppResult<u16> {
        debug!(terminal = terminal_id, "platform instruction {}", command.message_id());
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::Send { command, reply })
            .await
    }

    pub async fn restart_terminal(&self, terminal_id: &str) -> AppResult<u16> {
        self.send_platform_instruction(terminal_id, PlatformCommand::restart())
            .await
    }

    pub async fn set_parameters(
        &self,
        terminal_id: &str,
        parameters: Vec<Parameter>,
    ) -> AppResult<u16> {
        self.send_platform_instruction(terminal_id, PlatformCommand::SetParameters(parameters))
            .await
    }

    pub async fn query_parameters(&self, terminal_id: &str) -> AppResult<u16> {
        self.send_platform_instruction(terminal_id, PlatformCommand::QueryParameters)
            .await
    }

    pub async fn query_resources(&self, terminal_id: &str, query: ResourceQuery) -> AppResult<u16> {
        self.send_platform_instruction(terminal_id, PlatformCommand::ResourceQuery(query))
            .await
    }

    /// Requests a stream; returns the id of the new session.
    pub async fn start_streaming(
        &self,
        terminal_id: &str,
        options: StreamingOptions,
    ) -> AppResult<String> {
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::StartStreaming { options, reply })
            .await
    }

    pub async fn stop_streaming(
        &self,
        terminal_id: &str,
        session_id: &str,
    ) -> AppResult<StreamingSession> {
        let session_id = session_id.to_string();
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::StopStreaming { session_id, reply })
            .await
    }

    pub async fn pause_streaming(
        &self,
        terminal_id: &str,
        session_id: &str,
    ) -> AppResult<StreamingSession> {
        let session_id = session_id.to_string();
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::PauseStreaming { session_id, reply })
            .await
    }

    pub async fn resume_streaming(
        &self,
        terminal_id: &str,
        session_id: &str,
    ) -> AppResult<StreamingSession> {
        let session_id = session_id.to_string();
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::ResumeStreaming { session_id, reply })
            .await
    }

    pub async fn switch_stream(
        &self,
        terminal_id: &str,
        session_id: &str,
        stream_type: u8,
    ) -> AppResult<StreamingSession> {
        let session_id = session_id.to_string();
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::SwitchStream {
                session_id,
                stream_type,
                reply,
            })
            .await
    }

    /// One session by id, or all of the terminal's sessions.
    pub async fn get_streaming_status(
        &self,
        terminal_id: &str,
        session_id: Option<&str>,
    ) -> AppResult<Vec<StreamingSession>> {
        let session_id = session_id.map(str::to_string);
        self.connection(terminal_id)?
            .request(|reply| ConnectionCommand::StreamingStatus { session_id, reply })
            .await
    }

    /// Sends a `0x8201` and waits for the matching `0x0201`.
    ///
    /// Fails with [`AppError::Timeout`] when the terminal does not answer within
    /// `session.location_query_timeout_secs`, or when a newer query replaced this one.
    pub async fn query_location(&self, terminal_id: &str) -> AppResult<LocationReport> {
        let (location_tx, location_rx) = oneshot::channel();
        let serial = self
            .connection(terminal_id)?
            .request(|reply| ConnectionCommand::QueryLocation {
                location: location_tx,
                reply,
            })
            .await?;
        match time::timeout(self.config.session.location_query_timeout(), location_rx).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(_)) => Err(AppError::Timeout(format!(
                "location query {} to {} was dropped",
                serial, terminal_id
            ))),
            Err(_) => Err(AppError::Timeout(format!(
                "location query {} to {}",
                serial, terminal_id
            ))),
        }
    }
}
