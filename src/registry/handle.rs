use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::PlatformCommand;
use crate::protocol::location::LocationReport;
use crate::session::{ConnectionState, StreamingOptions, StreamingSession};
use crate::{AppError, AppResult};

/// Snapshot of a connection's liveness, published by its worker after every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionActivity {
    pub terminal_id: Option<String>,
    pub state: ConnectionState,
    pub connected_at: Instant,
    pub last_heartbeat: Instant,
    pub last_message_time: Instant,
    pub message_count: u64,
}

impl ConnectionActivity {
    pub fn new(now: Instant) -> Self {
        ConnectionActivity {
            terminal_id: None,
            state: ConnectionState::New,
            connected_at: now,
            last_heartbeat: now,
            last_message_time: now,
            message_count: 0,
        }
    }
}

/// Requests executed by a connection's worker on behalf of other tasks.
///
/// The worker owns the session state and the socket's write half, so everything that touches
/// either is funnelled through here and answered on the embedded oneshot.
#[derive(Debug)]
pub enum ConnectionCommand {
    /// Encode and write a command; answers with the serial it was sent under.
    Send {
        command: PlatformCommand,
        reply: oneshot::Sender<AppResult<u16>>,
    },
    /// Send a `0x9101` and open a streaming session for it.
    StartStreaming {
        options: StreamingOptions,
        reply: oneshot::Sender<AppResult<String>>,
    },
    StopStreaming {
        session_id: String,
        reply: oneshot::Sender<AppResult<StreamingSession>>,
    },
    PauseStreaming {
        session_id: String,
        reply: oneshot::Sender<AppResult<StreamingSession>>,
    },
    ResumeStreaming {
        session_id: String,
        reply: oneshot::Sender<AppResult<StreamingSession>>,
    },
    SwitchStream {
        session_id: String,
        stream_type: u8,
        reply: oneshot::Sender<AppResult<StreamingSession>>,
    },
    /// One session, or every session of the connection when `session_id` is `None`.
    StreamingStatus {
        session_id: Option<String>,
        reply: oneshot::Sender<AppResult<Vec<StreamingSession>>>,
    },
    /// Send a `0x8201`; the terminal's answer is delivered on `location`.
    QueryLocation {
        location: oneshot::Sender<LocationReport>,
        reply: oneshot::Sender<AppResult<u16>>,
    },
}

/// Registry entry for one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    peer: SocketAddr,
    commands: mpsc::Sender<ConnectionCommand>,
    cancel: CancellationToken,
    activity: Mutex<ConnectionActivity>,
}

impl ConnectionHandle {
    pub fn new(
        peer: SocketAddr,
        commands: mpsc::Sender<ConnectionCommand>,
        cancel: CancellationToken,
    ) -> Self {
        ConnectionHandle {
            peer,
            commands,
            cancel,
            activity: Mutex::new(ConnectionActivity::new(Instant::now())),
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn terminal_id(&self) -> Option<String> {
        self.activity.lock().terminal_id.clone()
    }

    pub fn activity(&self) -> ConnectionActivity {
        self.activity.lock().clone()
    }

    pub fn update_activity(&self, activity: ConnectionActivity) {
        *self.activity.lock() = activity;
    }

    /// Cancels the connection's worker; the worker closes the socket and deregisters itself.
    pub fn close(&self, reason: &str) {
        if !self.cancel.is_cancelled() {
            debug!(peer = %self.peer, reason, "closing connection");
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sends a command built around a fresh reply channel and waits for the worker's answer.
    pub async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<AppResult<T>>) -> ConnectionCommand,
    ) -> AppResult<T> {
        if self.is_closed() {
            return Err(AppError::TerminalNotConnected(self.peer.to_string()));
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| AppError::TerminalNotConnected(self.peer.to_string()))?;
        // worker exited with the command still queued
        reply_rx
            .await
            .map_err(|_| AppError::TerminalNotConnected(self.peer.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_round_trip() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new("127.0.0.1:1".parse().unwrap(), tx, CancellationToken::new());
        let worker = tokio::spawn(async move {
            if let Some(ConnectionCommand::Send { reply, .. }) = rx.recv().await {
                reply.send(Ok(42)).unwrap();
            }
        });
        let serial = handle
            .request(|reply| ConnectionCommand::Send {
                command: PlatformCommand::restart(),
                reply,
            })
            .await
            .unwrap();
        assert_eq!(serial, 42);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_to_closed_connection() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new("127.0.0.1:1".parse().unwrap(), tx, CancellationToken::new());
        handle.close("test");
        let result = handle
            .request(|reply| ConnectionCommand::Send {
                command: PlatformCommand::restart(),
                reply,
            })
            .await;
        assert!(matches!(result, Err(AppError::TerminalNotConnected(_))));
    }
}
