//! Configuration for the client
//!
//! Centralized configuration with defaults matching the classic reconnect and
//! keepalive timings (seconds): reconnect after 10 plus up to 5 of jitter,
//! probe after 5 idle, give up after 15 idle, check every 1.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Network
    // -------------------------------------------------------------------------
    /// Server address, e.g. "127.0.0.1:11211".
    pub addr: String,

    /// TCP connect timeout (milliseconds), none means wait for the OS.
    pub connect_timeout_ms: Option<u64>,

    /// Disable Nagle on the socket.
    pub nodelay: bool,

    /// Initial capacity of the receive buffer (bytes).
    pub read_buffer_size: usize,

    // -------------------------------------------------------------------------
    // Reconnect
    // -------------------------------------------------------------------------
    /// Fixed part of the delay before a reconnect attempt (milliseconds).
    pub reconnect_delay_ms: u64,

    /// Upper bound (exclusive) of the random extra delay (milliseconds).
    pub reconnect_jitter_ms: u64,

    // -------------------------------------------------------------------------
    // Liveness
    // -------------------------------------------------------------------------
    /// Idle time after which a NOOP probe is sent (milliseconds).
    pub keepalive_interval_ms: u64,

    /// Idle time after which the connection is closed (milliseconds).
    pub receive_timeout_ms: u64,

    /// Period of the liveness check (milliseconds).
    pub liveness_check_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:11211".to_string(),
            connect_timeout_ms: None,
            nodelay: true,
            read_buffer_size: 8 * 1024,
            reconnect_delay_ms: 10_000,
            reconnect_jitter_ms: 5_000,
            keepalive_interval_ms: 5_000,
            receive_timeout_ms: 15_000,
            liveness_check_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> ClientResult<Self> {
        let config: ClientConfig = serde_json::from_str(raw)
            .map_err(|err| ClientError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks timer relationships and resolves the address.
    pub fn validate(&self) -> ClientResult<()> {
        if self.liveness_check_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "liveness_check_ms must be positive".to_string(),
            ));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "keepalive_interval_ms must be positive".to_string(),
            ));
        }
        if self.receive_timeout_ms <= self.keepalive_interval_ms {
            return Err(ClientError::InvalidConfig(format!(
                "receive_timeout_ms ({}) must exceed keepalive_interval_ms ({})",
                self.receive_timeout_ms, self.keepalive_interval_ms
            )));
        }
        self.socket_addr()?;
        Ok(())
    }

    /// Resolves `addr` to the first socket address.
    pub fn socket_addr(&self) -> ClientResult<SocketAddr> {
        self.addr
            .to_socket_addrs()
            .map_err(|_| ClientError::InvalidAddress(self.addr.clone()))?
            .next()
            .ok_or_else(|| ClientError::InvalidAddress(self.addr.clone()))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_jitter(&self) -> Duration {
        Duration::from_millis(self.reconnect_jitter_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn liveness_check(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the server address
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.config.addr = addr.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.config.nodelay = nodelay;
        self
    }

    /// Set the receive buffer capacity (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the reconnect delay and jitter bound
    pub fn reconnect(mut self, delay: Duration, jitter: Duration) -> Self {
        self.config.reconnect_delay_ms = delay.as_millis() as u64;
        self.config.reconnect_jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Set the keepalive probe threshold and the receive timeout
    pub fn keepalive(mut self, interval: Duration, timeout: Duration) -> Self {
        self.config.keepalive_interval_ms = interval.as_millis() as u64;
        self.config.receive_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the liveness check period
    pub fn liveness_check(mut self, period: Duration) -> Self {
        self.config.liveness_check_ms = period.as_millis() as u64;
        self
    }

    pub fn build(self) -> ClientResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(10));
        assert_eq!(config.reconnect_jitter(), Duration::from_secs(5));
        assert_eq!(config.keepalive_interval(), Duration::from_secs(5));
        assert_eq!(config.receive_timeout(), Duration::from_secs(15));
        assert_eq!(config.liveness_check(), Duration::from_secs(1));
    }

    #[test]
    fn json_fills_missing_fields() {
        let config =
            ClientConfig::from_json(r#"{"addr":"127.0.0.1:11311","reconnect_jitter_ms":0}"#)
                .unwrap();
        assert_eq!(config.addr, "127.0.0.1:11311");
        assert_eq!(config.reconnect_jitter_ms, 0);
        assert_eq!(config.receive_timeout_ms, 15_000);
    }

    #[test]
    fn timeout_must_exceed_keepalive() {
        let err = ClientConfig::builder()
            .keepalive(Duration::from_secs(5), Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn bad_address_is_rejected() {
        let err = ClientConfig::builder().addr("not an address").build().unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress(_)));
    }

    #[test]
    fn bad_json_is_rejected() {
        assert!(matches!(
            ClientConfig::from_json("{"),
            Err(ClientError::InvalidConfig(_))
        ));
    }
}
