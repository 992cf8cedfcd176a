use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::signal;
use tracing::{error, info, trace};

use crate::registry::{ConnectionRegistry, Reaper};
use crate::storage::{DirectoryMediaStore, MediaStore};
use crate::{AppError, AppResult};

use super::{GatewayConfig, PlatformApi, Server, Shutdown};

/// The process-level runner: binds the listener, starts the reaper and the media writer, and
/// drives the accept loop until a shutdown signal arrives.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    registry: Arc<ConnectionRegistry>,
    media_store: Option<Arc<dyn MediaStore>>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            config.network.report_channel_capacity,
        ));
        Gateway {
            config: Arc::new(config),
            registry,
            media_store: None,
        }
    }

    /// Replaces the directory store configured under `[storage]`.
    pub fn with_media_store(mut self, media_store: Arc<dyn MediaStore>) -> Self {
        self.media_store = Some(media_store);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Administrative façade over this gateway's connections.
    pub fn api(&self) -> PlatformApi {
        PlatformApi::new(self.registry.clone(), self.config.clone())
    }

    /// Serves on the configured address until ctrl-c.
    pub fn start(&self, rt: &Runtime) -> AppResult<()> {
        rt.block_on(async {
            let listener = self.bind().await?;
            self.serve(listener, async {
                if let Err(err) = signal::ctrl_c().await {
                    error!("failed to listen for ctrl-c: {}", err);
                }
            })
            .await
        })
    }

    pub async fn bind(&self) -> AppResult<TcpListener> {
        let listen_address = self.config.listen_address();
        match TcpListener::bind(&listen_address).await {
            Ok(listener) => {
                info!("tcp server binding to {} for listening", &listen_address);
                Ok(listener)
            }
            Err(err) => {
                let error_msg = format!(
                    "Failed to bind server to address: {} - Error: {}",
                    listen_address, err
                );
                error!(error_msg);
                Err(AppError::IllegalStateError(error_msg))
            }
        }
    }

    /// Runs the gateway on `listener` until `shutdown_signal` resolves, then waits for every
    /// connection worker to finish and the media queue to drain.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown_signal: impl Future<Output = ()>,
    ) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

        let (media_store, media_writer) = self.media_store();
        let reaper = Reaper::new(self.registry.clone(), &self.config.session);
        let reaper_task = tokio::spawn(reaper.run(Shutdown::new(notify_shutdown.subscribe())));

        let server = Server::new(
            listener,
            notify_shutdown.clone(),
            shutdown_complete_tx,
            self.config.clone(),
            self.registry.clone(),
            media_store,
        );
        tokio::select! {
            res = server.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "failed to accept");
                }
            }
            _ = shutdown_signal => {
                info!("get shutdown signal");
            }
        }
        drop(server);

        // no receivers left is fine here
        let _ = notify_shutdown.send(());
        trace!("waiting for connection workers...");
        shutdown_complete_rx.recv().await;
        if let Err(err) = reaper_task.await {
            error!("reaper task failed: {}", err);
        }
        // every store clone was held by the server or a worker; the writer drains and exits
        if let Some(writer) = media_writer {
            if let Err(err) = writer.await {
                error!("media writer failed: {}", err);
            }
        }
        info!("gateway shutdown complete");
        Ok(())
    }

    fn media_store(&self) -> (Arc<dyn MediaStore>, Option<JoinHandle<()>>) {
        match &self.media_store {
            Some(store) => (store.clone(), None),
            None => {
                let (store, writer) = DirectoryMediaStore::start(&self.config.storage);
                (Arc::new(store), Some(writer))
            }
        }
    }
}
