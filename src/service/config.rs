use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub conn_read_buffer_size: usize,
    /// Ceiling of the per-connection reassembly buffer; exceeded without a complete frame the
    /// buffer is discarded.
    pub max_frame_buffer: usize,
    /// Pending platform commands per connection.
    pub command_channel_capacity: usize,
    pub report_channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 6808,
            max_connection: 10_000,
            conn_read_buffer_size: 4096,
            max_frame_buffer: 8 * 1024,
            command_channel_capacity: 64,
            report_channel_capacity: 256,
        }
    }
}

/// Connection lifecycle timing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Value sent to terminals as heartbeat parameter `0x0001`.
    pub heartbeat_interval_secs: u32,
    /// Heartbeat silence allowed once authenticated.
    pub authenticated_timeout_secs: u64,
    /// Time allowed before authentication.
    pub unauthenticated_timeout_secs: u64,
    /// Time without any message before the connection is closed regardless of state.
    pub idle_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub location_query_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            heartbeat_interval_secs: 30,
            authenticated_timeout_secs: 300,
            unauthenticated_timeout_secs: 60,
            idle_timeout_secs: 600,
            reaper_interval_secs: 30,
            location_query_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    pub fn authenticated_timeout(&self) -> Duration {
        Duration::from_secs(self.authenticated_timeout_secs)
    }
    pub fn unauthenticated_timeout(&self) -> Duration {
        Duration::from_secs(self.unauthenticated_timeout_secs)
    }
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
    pub fn location_query_timeout(&self) -> Duration {
        Duration::from_secs(self.location_query_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Accept every terminal; `allowed_terminals` is ignored.
    pub open_registration: bool,
    pub allowed_terminals: Vec<String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        RegistrationConfig {
            open_registration: true,
            allowed_terminals: Vec::new(),
        }
    }
}

impl RegistrationConfig {
    pub fn is_allowed(&self, terminal_id: &str) -> bool {
        self.open_registration || self.allowed_terminals.iter().any(|t| t == terminal_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Correlate generic responses by scanning the body for the request id instead of reading it
    /// at the standard offset. Needed for terminals that answer with a non-conformant layout.
    pub alternative_ack_scan: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            alternative_ack_scan: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub media_dir: String,
    /// Completed uploads waiting for the writer task.
    pub queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            media_dir: "media".to_string(),
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub registration: RegistrationConfig,
    pub streaming: StreamingConfig,
    pub storage: StorageConfig,
}

impl GatewayConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<GatewayConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("JT808").separator("__"))
            .build()?;

        let gateway_config: GatewayConfig = config.try_deserialize()?;

        Ok(gateway_config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.port)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.session.heartbeat_interval_secs, 30);
        assert_eq!(config.session.authenticated_timeout(), Duration::from_secs(300));
        assert_eq!(config.session.unauthenticated_timeout(), Duration::from_secs(60));
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.network.max_frame_buffer, 8192);
        assert!(config.streaming.alternative_ack_scan);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[network]\nport = 7000\n\n[registration]\nopen_registration = false\nallowed_terminals = [\"T1\"]"
        )
        .unwrap();
        let config = GatewayConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.network.port, 7000);
        assert_eq!(config.network.max_connection, 10_000);
        assert_eq!(config.session.reaper_interval_secs, 30);
        assert!(config.registration.is_allowed("T1"));
        assert!(!config.registration.is_allowed("T2"));
    }
}
