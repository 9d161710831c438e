//! Thread-safe collection of terminal probe results.
use std::fmt;
use std::net::IpAddr;

use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};

/// Final classification of a probed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PortState {
    /// A datagram came back from the port.
    #[serde(rename = "open")]
    Open,
    /// The port was rejected with an ICMP port unreachable.
    #[serde(rename = "closed")]
    Closed,
    /// Every attempt went unanswered. UDP cannot tell an idle listener from
    /// a firewall dropping the datagram.
    #[serde(rename = "open|filtered")]
    OpenOrFiltered,
    /// The probe failed locally or the session was cancelled.
    #[serde(rename = "error")]
    Error,
}

impl PortState {
    pub fn as_str(self) -> &'static str {
        match self {
            PortState::Open => "open",
            PortState::Closed => "closed",
            PortState::OpenOrFiltered => "open|filtered",
            PortState::Error => "error",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PortState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PortState::Open),
            "closed" => Ok(PortState::Closed),
            "open|filtered" => Ok(PortState::OpenOrFiltered),
            "error" => Ok(PortState::Error),
            other => Err(format!("unknown port state '{other}'")),
        }
    }
}

/// Outcome of one port probe against one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Host identifier as typed by the user.
    pub host: String,
    pub address: IpAddr,
    pub port: u16,
    pub state: PortState,
    /// Datagrams sent for this probe.
    pub attempts: u32,
    /// Round trip time of the answered attempt, in milliseconds.
    #[serde(default)]
    pub rtt_ms: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProbeResult {
    /// Sort key used by [`ResultStore::snapshot`].
    fn sort_key(&self) -> (&str, IpAddr, u16) {
        (&self.host, self.address, self.port)
    }
}

/// Append-only store shared by every prober of a session.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: Mutex<Vec<ProbeResult>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, result: ProbeResult) {
        self.results.lock().push(result);
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Returns every result sorted by host, then address, then port,
    /// independent of the order probes completed in.
    pub fn snapshot(&self) -> Vec<ProbeResult> {
        let mut results = self.results.lock().clone();
        results.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::{PortState, ProbeResult, ResultStore};
    use std::net::IpAddr;
    use std::sync::Arc;

    fn result(host: &str, address: &str, port: u16, state: PortState) -> ProbeResult {
        ProbeResult {
            host: host.to_owned(),
            address: address.parse::<IpAddr>().unwrap(),
            port,
            state,
            attempts: 1,
            rtt_ms: None,
            error: None,
        }
    }

    #[test]
    fn snapshot_is_sorted_by_host_then_port() {
        let store = ResultStore::new();
        store.add(result("b.example", "10.0.0.2", 53, PortState::Open));
        store.add(result("a.example", "10.0.0.1", 161, PortState::Closed));
        store.add(result("a.example", "10.0.0.1", 53, PortState::OpenOrFiltered));
        store.add(result("b.example", "10.0.0.2", 7, PortState::Error));

        let ordered = store
            .snapshot()
            .into_iter()
            .map(|r| (r.host, r.port))
            .collect::<Vec<_>>();

        assert_eq!(
            ordered,
            [
                ("a.example".to_owned(), 53),
                ("a.example".to_owned(), 161),
                ("b.example".to_owned(), 7),
                ("b.example".to_owned(), 53),
            ]
        );
    }

    #[test]
    fn snapshot_orders_addresses_of_one_host() {
        let store = ResultStore::new();
        store.add(result("dual", "::1", 53, PortState::Open));
        store.add(result("dual", "127.0.0.1", 53, PortState::Open));

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].address, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(snapshot[1].address, "::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn snapshot_does_not_drain_the_store() {
        let store = ResultStore::new();
        assert!(store.is_empty());
        store.add(result("h", "10.0.0.1", 1, PortState::Open));

        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_adds_are_all_kept() {
        let store = Arc::new(ResultStore::new());
        let handles = (0..8u16)
            .map(|worker| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for port in 1..=100u16 {
                        store.add(result("h", "10.0.0.1", worker * 100 + port, PortState::Open));
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 800);
        let ports = store.snapshot().into_iter().map(|r| r.port).collect::<Vec<_>>();
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn port_state_text_round_trips() {
        for state in [
            PortState::Open,
            PortState::Closed,
            PortState::OpenOrFiltered,
            PortState::Error,
        ] {
            assert_eq!(state.to_string().parse::<PortState>(), Ok(state));
        }
        assert!("filtered".parse::<PortState>().is_err());
    }
}
