use std::net::SocketAddr;

use crate::service_config::DEFAULT_MAX_BODY_BYTES;

#[derive(Debug, Clone)]
pub struct Config {
    // Listen address
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
    // request bodies above this size are rejected with 413
    pub max_body_bytes: usize,
}

impl Config {
    pub fn new(listen_addr: SocketAddr, max_body_bytes: usize) -> Self {
        tracing::info!(
            "Creating HTTP server Config: listen_addr={}, max_body_bytes={}",
            listen_addr,
            max_body_bytes
        );
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
            max_body_bytes,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: tracing::Level::INFO,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}
