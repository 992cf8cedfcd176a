//! Process-level plumbing: errors, configuration, tracing, the TCP server and the gateway
//! runner, plus the platform façade.

pub use api::PlatformApi;
pub use app_error::{AppError, AppResult};
pub use config::{
    GatewayConfig, NetworkConfig, RegistrationConfig, SessionConfig, StorageConfig,
    StreamingConfig,
};
pub use gateway::Gateway;
pub use server::Server;
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing, OtelGuard};

mod api;
mod app_error;
mod config;
mod gateway;
mod server;
mod shutdown;
mod tracing_config;
