//! Core functionality for actual scanning behaviour.
//!
//! A [`Scanner`] is one scan session: it resolves targets, hands every
//! resolved address to a bounded pool of port probers, and collects the terminal
//! state of every port probe in a [`ResultStore`].
mod config;
mod probe;
mod prober;
mod scheduler;
mod store;
mod transport;

pub use config::{
    ProxyConfig, ScanConfig, DEFAULT_HOST_CONCURRENCY, DEFAULT_PORT_CONCURRENCY,
    DEFAULT_PROXY_TIMEOUT, DEFAULT_RETRANSMISSIONS, DEFAULT_TIMEOUT,
};
pub use probe::{ProbeState, SequenceId};
pub use prober::HostOutcome;
pub use store::{PortState, ProbeResult, ResultStore};
pub use transport::{DatagramChannel, DirectTransport, Transport};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::address::{Resolver, Target};
use crate::error::{ConfigError, ResolutionError};
use prober::PortProber;
use scheduler::HostScheduler;

/// Start and end of a session.
#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// A UDP scan session.
///
/// ```rust,no_run
/// # use udpz::scanner::{ScanConfig, Scanner};
/// # async fn run() -> Result<(), udpz::error::ConfigError> {
/// let scanner = Scanner::new(ScanConfig {
///     ports: vec![53, 123, 161],
///     ..ScanConfig::default()
/// })?;
///
/// scanner.scan(&["192.0.2.10".to_owned(), "ntp.example.com".to_owned()]).await;
///
/// for result in scanner.results() {
///     println!("{}:{} {}", result.address, result.port, result.state);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Scanner {
    config: ScanConfig,
    transport: Arc<dyn Transport>,
    store: Arc<ResultStore>,
    cancel: CancellationToken,
    resolution_errors: Mutex<Vec<ResolutionError>>,
    timing: Mutex<Timing>,
}

impl Scanner {
    /// Builds a session that sends datagrams directly.
    ///
    /// A configured proxy is rejected: relaying datagrams through SOCKS5 is
    /// only available by injecting a [`Transport`] with
    /// [`Scanner::with_transport`].
    pub fn new(config: ScanConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if let Some(proxy) = &config.proxy {
            return Err(ConfigError::Proxy(format!(
                "SOCKS5 transport not available in this build (proxy {})",
                proxy.address
            )));
        }
        Self::with_transport(config, Arc::new(DirectTransport))
    }

    /// Builds a session delivering datagrams through `transport`.
    pub fn with_transport(
        config: ScanConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            transport,
            store: Arc::new(ResultStore::new()),
            cancel: CancellationToken::new(),
            resolution_errors: Mutex::new(Vec::new()),
            timing: Mutex::new(Timing::default()),
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolves and probes every target. Returns once every probe is
    /// terminal, or once the session was cancelled and the remaining probes
    /// were finalized as errors.
    pub async fn scan(&self, targets: &[String]) {
        self.timing.lock().started_at = Some(Utc::now());

        let targets = targets.iter().map(|t| Target::parse(t)).collect::<Vec<_>>();
        let resolver = Resolver::new(self.config.resolver.as_deref(), self.config.scan_all_addresses).await;
        let (hosts, errors) = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                info!("Scan cancelled while resolving targets");
                self.timing.lock().finished_at = Some(Utc::now());
                return;
            }
            resolved = resolver.resolve_all(&targets) => resolved,
        };
        self.resolution_errors.lock().extend(errors);

        let prober = PortProber::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            self.cancel.clone(),
            self.config.port_concurrency,
            self.config.retransmissions,
            self.config.timeout,
        );
        let scheduler = HostScheduler::new(Arc::new(prober), self.config.host_concurrency);

        info!(
            "Scanning {} hosts ({} unresolved) on {} ports",
            hosts.len(),
            self.resolution_errors.lock().len(),
            self.config.ports.len()
        );
        let outcomes = scheduler.run(&hosts, &self.config.ports).await;
        debug!("{} addresses finished", outcomes.len());

        if self.cancel.is_cancelled() {
            info!("Scan cancelled with {} results", self.store.len());
        }
        self.timing.lock().finished_at = Some(Utc::now());
    }

    /// Number of terminal probe results so far.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Every result, sorted by host then port.
    pub fn results(&self) -> Vec<ProbeResult> {
        self.store.snapshot()
    }

    pub fn resolution_errors(&self) -> Vec<ResolutionError> {
        self.resolution_errors.lock().clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.timing.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.timing.lock().finished_at
    }

    /// Token that cancels this session when triggered, e.g. from a Ctrl-C
    /// handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::transport::mock::{Behaviour, MockTransport};
    use super::{PortState, ProxyConfig, ScanConfig, Scanner};
    use crate::error::ConfigError;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio::net::UdpSocket;

    fn config(ports: Vec<u16>, retransmissions: u32, timeout_ms: u64) -> ScanConfig {
        ScanConfig {
            ports,
            retransmissions,
            timeout: Duration::from_millis(timeout_ms),
            host_concurrency: 4,
            port_concurrency: 8,
            ..ScanConfig::default()
        }
    }

    /// Answers every datagram with its own payload.
    async fn echo_listener() -> u16 {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..len], peer).await;
            }
        });
        port
    }

    /// Swallows every datagram.
    async fn silent_listener() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    #[test]
    fn invalid_config_fails_before_scanning() {
        let result = Scanner::new(ScanConfig {
            port_concurrency: 0,
            ..ScanConfig::default()
        });
        assert_eq!(result.unwrap_err(), ConfigError::Concurrency);
    }

    #[test]
    fn proxy_needs_an_injected_transport() {
        let proxy = ProxyConfig {
            address: "127.0.0.1:1080".to_owned(),
            username: None,
            password: None,
            timeout: Duration::from_secs(3),
        };
        let config = ScanConfig {
            proxy: Some(proxy),
            ..ScanConfig::default()
        };

        assert!(matches!(
            Scanner::new(config.clone()),
            Err(ConfigError::Proxy(reason)) if reason.contains("not available")
        ));
        assert!(Scanner::with_transport(config, Arc::new(MockTransport::new(Behaviour::Echo))).is_ok());
    }

    #[tokio::test]
    async fn echo_and_silent_listeners() {
        let open_port = echo_listener().await;
        let (_silent, silent_port) = silent_listener().await;
        let scanner = Scanner::new(config(vec![open_port, silent_port], 1, 50)).unwrap();

        let started = Instant::now();
        scanner.scan(&["127.0.0.1".to_owned()]).await;
        let elapsed = started.elapsed();

        let results = scanner.results();
        assert_eq!(results.len(), 2);
        let state_of = |port| results.iter().find(|r| r.port == port).unwrap();

        assert_eq!(state_of(open_port).state, PortState::Open);
        assert_eq!(state_of(silent_port).state, PortState::OpenOrFiltered);
        assert_eq!(state_of(silent_port).attempts, 2);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(2));
        assert!(scanner.started_at().unwrap() <= scanner.finished_at().unwrap());
    }

    #[tokio::test]
    async fn closed_port_is_closed_on_first_attempt() {
        let port = {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.local_addr().unwrap().port()
        };
        let scanner = Scanner::new(config(vec![port], 4, 200)).unwrap();

        scanner.scan(&["127.0.0.1".to_owned()]).await;

        let result = &scanner.results()[0];
        assert_eq!(result.state, PortState::Closed);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn invalid_hostname_does_not_reduce_other_results() {
        let scanner = Scanner::with_transport(
            config(vec![53, 123, 161], 0, 10),
            Arc::new(MockTransport::new(Behaviour::Echo)),
        )
        .unwrap();

        scanner
            .scan(&[
                "127.0.0.1".to_owned(),
                "no-such-host.invalid".to_owned(),
                "10.0.0.1:5353".to_owned(),
            ])
            .await;

        let errors = scanner.resolution_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].target, "no-such-host.invalid");
        assert_eq!(scanner.len(), 3 + 1);
    }

    #[tokio::test]
    async fn zero_port_targets_are_never_probed() {
        let transport = Arc::new(MockTransport::new(Behaviour::Echo));
        let scanner = Scanner::with_transport(config(vec![53], 0, 10), transport.clone()).unwrap();

        scanner
            .scan(&["127.0.0.1:0".to_owned(), "[::1]:0".to_owned()])
            .await;

        assert!(scanner.is_empty());
        assert_eq!(transport.sends(), 0);
        assert_eq!(scanner.resolution_errors().len(), 2);
    }

    #[tokio::test]
    async fn length_is_addresses_times_ports() {
        let transport = Arc::new(MockTransport::new(Behaviour::Silent));
        let scanner = Scanner::with_transport(
            config((1..=6).collect(), 0, 5),
            transport.clone(),
        )
        .unwrap();
        let targets = (1..=5).map(|i| format!("10.9.0.{i}")).collect::<Vec<_>>();

        scanner.scan(&targets).await;

        assert_eq!(scanner.len(), 30);
        assert!(transport.max_active() <= 4 * 8);
        assert!(scanner.results().iter().all(|r| r.state == PortState::OpenOrFiltered));
    }

    #[tokio::test]
    async fn cancellation_interrupts_target_resolution() {
        let transport = Arc::new(MockTransport::new(Behaviour::Echo));
        let scanner = Scanner::with_transport(config(vec![53], 0, 10), transport.clone()).unwrap();
        scanner.cancel();

        let started = Instant::now();
        scanner
            .scan(&["no-such-host.invalid".to_owned(), "127.0.0.1".to_owned()])
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(scanner.is_empty());
        assert_eq!(transport.sends(), 0);
        assert!(scanner.finished_at().is_some());
    }

    #[tokio::test]
    async fn cancelled_session_returns_partial_results() {
        let scanner = Arc::new(
            Scanner::with_transport(
                config((1..=50).collect(), 100, 10_000),
                Arc::new(MockTransport::new(Behaviour::Silent)),
            )
            .unwrap(),
        );
        let token = scanner.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = Instant::now();
        scanner.scan(&["10.0.0.1".to_owned(), "10.0.0.2".to_owned()]).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(scanner.len(), 100);
        assert!(scanner.results().iter().all(|r| r.state == PortState::Error));
        assert!(scanner.finished_at().is_some());
    }
}
