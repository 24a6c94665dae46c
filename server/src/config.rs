//! Configuration for the relay server.

use std::net::SocketAddr;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self { host, port }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port).parse()?;
        Ok(addr)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}
