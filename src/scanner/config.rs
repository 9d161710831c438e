//! Immutable configuration of a scan session.
use std::time::Duration;

use crate::error::ConfigError;
use crate::port_strategy::DEFAULT_UDP_PORTS;

pub const DEFAULT_HOST_CONCURRENCY: usize = 10;
pub const DEFAULT_PORT_CONCURRENCY: usize = 50;
pub const DEFAULT_RETRANSMISSIONS: u32 = 2;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_millis(3000);

/// SOCKS5 proxy settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy address as HOST:PORT.
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

/// Everything a [`Scanner`](super::Scanner) needs, fixed for the lifetime of
/// the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Scan every resolved address of a hostname instead of only the first.
    pub scan_all_addresses: bool,
    /// How many hosts are probed at the same time.
    pub host_concurrency: usize,
    /// How many ports of one host are probed at the same time.
    pub port_concurrency: usize,
    /// Extra datagrams sent after the first one goes unanswered.
    pub retransmissions: u32,
    /// How long each attempt waits for an answer.
    pub timeout: Duration,
    /// Ports probed on targets that do not name their own port.
    pub ports: Vec<u16>,
    /// Comma separated nameservers, or a file listing them.
    pub resolver: Option<String>,
    pub proxy: Option<ProxyConfig>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_all_addresses: true,
            host_concurrency: DEFAULT_HOST_CONCURRENCY,
            port_concurrency: DEFAULT_PORT_CONCURRENCY,
            retransmissions: DEFAULT_RETRANSMISSIONS,
            timeout: DEFAULT_TIMEOUT,
            ports: DEFAULT_UDP_PORTS.to_vec(),
            resolver: None,
            proxy: None,
        }
    }
}

impl ScanConfig {
    /// Rejects configurations no scan could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host_concurrency < 1 || self.port_concurrency < 1 {
            return Err(ConfigError::Concurrency);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Timeout);
        }
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if let Some(port) = self.ports.iter().find(|&&port| port == 0) {
            return Err(ConfigError::InvalidPort(*port));
        }
        if let Some(proxy) = &self.proxy {
            if proxy.address.trim().is_empty() {
                return Err(ConfigError::Proxy("proxy address is empty".to_owned()));
            }
            if proxy.timeout.is_zero() {
                return Err(ConfigError::Proxy("proxy timeout must be > 0".to_owned()));
            }
        }
        Ok(())
    }

    /// Upper bound on datagrams in flight, and so on open sockets.
    pub fn max_in_flight(&self) -> usize {
        self.host_concurrency.saturating_mul(self.port_concurrency)
    }
}
