use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "canvas-server", version, about = "Session authority for shared canvas rooms")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// How often coalesced presence updates are fanned out. 0 sends every update immediately.
    #[arg(long, env = "PRESENCE_FLUSH_MS", default_value_t = 50)]
    pub presence_flush_ms: u64,

    /// Outbound messages a connection may have queued before it is dropped
    #[arg(long, env = "CONNECTION_BUFFER", default_value_t = 256)]
    pub connection_buffer: usize,
}

impl Config {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            presence_flush_interval: if self.presence_flush_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(self.presence_flush_ms))
            },
            connection_buffer: self.connection_buffer.max(1),
        }
    }
}

/// Settings the authority and connections need at runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub presence_flush_interval: Option<Duration>,
    pub connection_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            presence_flush_interval: Some(Duration::from_millis(50)),
            connection_buffer: 256,
        }
    }
}
