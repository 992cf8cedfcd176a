//! Server core of a JT808 vehicle-telematics gateway.
//!
//! Terminals connect over TCP and speak JT/T 808 (2011, 2013 and 2019 header layouts) with
//! the JT/T 1078 streaming and vendor extensions. Each connection is served by its own worker
//! that owns the terminal's [`session::TerminalSession`]; the platform side reaches workers
//! through the [`registry::ConnectionRegistry`] via [`PlatformApi`].

pub mod command;
pub mod network;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod service;
pub mod session;
pub mod storage;

pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Gateway, GatewayConfig, PlatformApi,
    Shutdown,
};
