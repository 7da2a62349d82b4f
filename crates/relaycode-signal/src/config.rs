//! Server configuration loaded from environment variables.
//!
//! Just one knob: the listen port. Sensible defaults mean the server
//! starts with zero configuration locally.

use std::net::SocketAddr;

use relaycode_shared::constants::DEFAULT_SIGNAL_PORT;

#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `PORT` (decimal integer, binds `0.0.0.0:<PORT>`).
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_SIGNAL_PORT).into(),
        }
    }
}

impl SignalConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.http_addr = ([0, 0, 0, 0], p).into(),
                Err(_) => {
                    tracing::warn!(value = %port, "invalid PORT, using default");
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_binds_to_8080() {
        let config = SignalConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
    }
}
