use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{encode_command, OutboundFrame, PlatformCommand, StreamControl};
use crate::network::Connection;
use crate::protocol::location::LocationReport;
use crate::protocol::Message;
use crate::registry::{ConnectionCommand, ConnectionHandle, ConnectionRegistry};
use crate::request::{RequestContext, RequestProcessor};
use crate::session::{
    PendingLocationQuery, StreamingOptions, StreamingSession, StreamingStatus,
    TerminalCapabilities, TerminalSession,
};
use crate::storage::MediaStore;
use crate::{AppError, AppResult};

use super::{GatewayConfig, Shutdown};

/// Serves one terminal socket.
///
/// The worker is the only owner of the session and the write half, so inbound dispatch and
/// platform commands arriving through the registry never race on either.
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    peer: SocketAddr,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    session: TerminalSession,
    handle: Arc<ConnectionHandle>,
    commands: mpsc::Receiver<ConnectionCommand>,
    cancel: CancellationToken,
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    media_store: Arc<dyn MediaStore>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        loop {
            tokio::select! {
                res = self.connection.read_frame() => {
                    match res? {
                        Some(Ok(message)) => {
                            if self.on_message(message).await {
                                debug!(peer = %self.peer, "closing connection after reply");
                                break;
                            }
                        }
                        Some(Err(rejected)) => {
                            warn!(
                                peer = %self.peer,
                                raw = %hex::encode(&rejected.raw),
                                "discarding frame: {}",
                                rejected.error
                            );
                        }
                        // terminal closed the connection gracefully
                        None => break,
                    }
                }
                Some(command) = self.commands.recv() => {
                    self.on_command(command).await;
                }
                _ = self.cancel.cancelled() => {
                    debug!(peer = %self.peer, "connection cancelled");
                    break;
                }
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Runs one inbound message through the dispatcher. Returns whether the connection should
    /// close.
    async fn on_message(&mut self, message: Message) -> bool {
        let outcome = {
            let ctx = RequestContext::new(&self.config, &self.registry);
            RequestProcessor::process_request(&message, &mut self.session, &ctx)
        };
        self.publish_activity();

        for frame in &outcome.replies {
            if let Err(err) = self.write_frame(frame).await {
                // the next read observes the broken socket
                warn!(
                    terminal = %self.session.display_id(),
                    "failed to write {}: {}",
                    frame.message_id,
                    err
                );
                break;
            }
        }

        for upload in outcome.uploads {
            let data_id = upload.data_id;
            info!(
                terminal = %upload.terminal_id,
                histogram.multimedia_upload_kib = upload.payload.len() as f64 / 1024.0,
                "multimedia {} complete, {} bytes",
                data_id,
                upload.payload.len()
            );
            if let Err(err) = self.media_store.store(upload) {
                error!(
                    terminal = %self.session.display_id(),
                    "failed to store multimedia {}: {}",
                    data_id,
                    err
                );
            }
        }
        outcome.close
    }

    async fn on_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Send { command, reply } => {
                let result = self.send_command(&command).await;
                let _ = reply.send(result);
            }
            ConnectionCommand::StartStreaming { options, reply } => {
                let result = self.start_streaming(options).await;
                let _ = reply.send(result);
            }
            ConnectionCommand::StopStreaming { session_id, reply } => {
                let result = self
                    .control_stream(&session_id, StreamControl::Close, None)
                    .await;
                let _ = reply.send(result);
            }
            ConnectionCommand::PauseStreaming { session_id, reply } => {
                let result = self
                    .control_stream(&session_id, StreamControl::Pause, None)
                    .await;
                let _ = reply.send(result);
            }
            ConnectionCommand::ResumeStreaming { session_id, reply } => {
                let result = self
                    .control_stream(&session_id, StreamControl::Resume, None)
                    .await;
                let _ = reply.send(result);
            }
            ConnectionCommand::SwitchStream {
                session_id,
                stream_type,
                reply,
            } => {
                let result = self
                    .control_stream(&session_id, StreamControl::SwitchStream, Some(stream_type))
                    .await;
                let _ = reply.send(result);
            }
            ConnectionCommand::StreamingStatus { session_id, reply } => {
                let result = match session_id {
                    Some(session_id) => self
                        .session
                        .streaming
                        .get(&session_id)
                        .map(|session| vec![session.clone()])
                        .ok_or(AppError::SessionNotFound(session_id)),
                    None => Ok(self.session.streaming.list()),
                };
                let _ = reply.send(result);
            }
            ConnectionCommand::QueryLocation { location, reply } => {
                let result = self.query_location(location).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn send_command(&mut self, command: &PlatformCommand) -> AppResult<u16> {
        let frame = encode_command(&mut self.session, command)?;
        self.write_frame(&frame).await?;
        debug!(
            terminal = %self.session.display_id(),
            serial = frame.serial,
            "sent {}",
            frame.message_id
        );
        Ok(frame.serial)
    }

    async fn start_streaming(&mut self, options: StreamingOptions) -> AppResult<String> {
        let serial = self
            .send_command(&PlatformCommand::StreamingRequest(options.clone()))
            .await?;
        let terminal_id = self.session.display_id().to_string();
        let session_id = self
            .session
            .streaming
            .create(&terminal_id, &options, serial);
        info!(
            terminal = %terminal_id,
            session = %session_id,
            channel = options.channel,
            "streaming requested"
        );
        Ok(session_id)
    }

    /// Sends a `0x9102` for a session and applies the matching state change once it is written.
    async fn control_stream(
        &mut self,
        session_id: &str,
        control: StreamControl,
        stream_type: Option<u8>,
    ) -> AppResult<StreamingSession> {
        let target = match control {
            StreamControl::Close => Some(StreamingStatus::Stopped),
            StreamControl::Pause => Some(StreamingStatus::Paused),
            StreamControl::Resume => Some(StreamingStatus::Active),
            StreamControl::SwitchStream | StreamControl::CloseTalk => None,
        };
        let channel = self.session.streaming.channel_for(session_id, target)?;
        self.send_command(&PlatformCommand::StreamingControl {
            channel,
            control,
            close_type: 0,
            switch_stream: stream_type.unwrap_or(0),
        })
        .await?;

        let streaming = &mut self.session.streaming;
        let session = match control {
            StreamControl::Close => streaming.stop(session_id)?,
            StreamControl::Pause => streaming.pause(session_id)?,
            StreamControl::Resume => streaming.resume(session_id)?,
            StreamControl::SwitchStream => {
                streaming.switch_stream(session_id, stream_type.unwrap_or(0))?
            }
            StreamControl::CloseTalk => streaming.get(session_id).ok_or_else(|| {
                AppError::SessionNotFound(session_id.to_string())
            })?,
        };
        Ok(session.clone())
    }

    async fn query_location(
        &mut self,
        location: oneshot::Sender<LocationReport>,
    ) -> AppResult<u16> {
        let serial = self.send_command(&PlatformCommand::LocationQuery).await?;
        let previous = self.session.set_pending_location_query(PendingLocationQuery {
            request_serial: serial,
            requested_at: Instant::now(),
            reply: location,
        });
        if let Some(previous) = previous {
            debug!(
                terminal = %self.session.display_id(),
                "location query {} superseded by {}",
                previous.request_serial,
                serial
            );
        }
        Ok(serial)
    }

    async fn write_frame(&mut self, frame: &OutboundFrame) -> AppResult<()> {
        self.writer
            .write_all(&frame.bytes)
            .await
            .map_err(|e| AppError::DetailedIoError(format!("write {} error: {}", frame.message_id, e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| AppError::DetailedIoError(format!("flush {} error: {}", frame.message_id, e)))?;
        Ok(())
    }

    fn publish_activity(&self) {
        self.handle.update_activity(self.session.activity());
    }

    /// Tears the session down and removes the connection from the registry.
    async fn finish(&mut self) {
        let stopped = self.session.close();
        self.publish_activity();
        self.handle.close("worker exit");
        self.registry.remove(&self.handle);
        if let Err(err) = self.writer.shutdown().await {
            debug!(peer = %self.peer, "socket shutdown: {}", err);
        }
        info!(
            peer = %self.peer,
            terminal = %self.session.display_id(),
            messages = self.session.message_count,
            stopped_streams = stopped,
            "connection closed"
        );
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!(peer = %self.peer, "connection handler dropped");
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    media_store: Arc<dyn MediaStore>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        config: Arc<GatewayConfig>,
        registry: Arc<ConnectionRegistry>,
        media_store: Arc<dyn MediaStore>,
    ) -> Self {
        Server {
            listener,
            limit_connections: Arc::new(Semaphore::new(config.network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            config,
            registry,
            media_store,
        }
    }

    /// Accepts terminal connections until accepting fails for good.
    ///
    /// Each connection gets a permit, a registry entry and its own worker task. The permit is
    /// released and the entry removed when the worker ends, however it ends.
    ///
    // Graceful shutdown:
    // 1. The caller drops this future on its shutdown signal and broadcasts on `notify_shutdown`.
    // 2. Every worker leaves its loop, stops its streaming sessions and deregisters.
    // 3. Once the last worker is dropped, its `shutdown_complete_tx` clone goes with it and the
    //    caller's `shutdown_complete_rx` resolves.
    pub async fn run(&self) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(format!("connection limit: {}", e)))?;

            let (socket, peer) = self.accept().await?;
            if let Err(err) = socket.set_nodelay(true) {
                debug!(%peer, "set_nodelay failed: {}", err);
            }
            info!(%peer, "terminal connected");

            let mut handler = self.connection_handler(socket, peer);
            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    warn!(peer = %handler.peer, "connection error: {}", err);
                }
                handler.finish().await;
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    fn connection_handler(&self, socket: TcpStream, peer: SocketAddr) -> ConnectionHandler {
        let network = &self.config.network;
        let (reader, writer) = socket.into_split();
        let (commands_tx, commands_rx) = mpsc::channel(network.command_channel_capacity);
        let cancel = CancellationToken::new();
        let handle = Arc::new(ConnectionHandle::new(peer, commands_tx, cancel.clone()));
        self.registry.insert(handle.clone());

        let capabilities = TerminalCapabilities {
            scan_generic_ack: self.config.streaming.alternative_ack_scan,
        };
        ConnectionHandler {
            notify_shutdown: self.notify_shutdown.clone(),
            _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
            peer,
            connection: Connection::new(
                reader,
                network.conn_read_buffer_size,
                network.max_frame_buffer,
            ),
            writer: BufWriter::new(writer),
            session: TerminalSession::new(peer, capabilities),
            handle,
            commands: commands_rx,
            cancel,
            config: self.config.clone(),
            registry: self.registry.clone(),
            media_store: self.media_store.clone(),
        }
    }

    async fn accept(&self) -> AppResult<(TcpStream, SocketAddr)> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => return Ok((socket, peer)),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::DetailedIoError(format!(
                            "accept tcp server error: {}",
                            err
                        )));
                    }
                    warn!("accept failed, retrying in {}s: {}", backoff, err);
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
