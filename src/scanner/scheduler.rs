//! Bounds how many hosts are probed at once.
use std::net::IpAddr;
use std::sync::Arc;

use futures::{stream, StreamExt};
use log::{debug, info};

use super::prober::{HostOutcome, PortProber};
use crate::address::ResolvedHost;

/// Dispatches every scanned address of every host to the prober, at most
/// `host_concurrency` at a time.
#[derive(Debug)]
pub struct HostScheduler {
    prober: Arc<PortProber>,
    host_concurrency: usize,
}

impl HostScheduler {
    pub fn new(prober: Arc<PortProber>, host_concurrency: usize) -> Self {
        Self {
            prober,
            host_concurrency: host_concurrency.max(1),
        }
    }

    /// Runs until every address has finished. `default_ports` applies to
    /// hosts whose target did not name a port.
    pub async fn run(
        &self,
        hosts: &[ResolvedHost],
        default_ports: &[u16],
    ) -> Vec<(IpAddr, HostOutcome)> {
        let jobs = hosts
            .iter()
            .flat_map(|host| {
                let ports = host.port.as_ref().map_or(default_ports, std::slice::from_ref);
                host.scanned().iter().map(move |&address| (host, address, ports))
            })
            .collect::<Vec<_>>();

        debug!(
            "Scheduling {} addresses across {} hosts with {} host tasks",
            jobs.len(),
            hosts.len(),
            self.host_concurrency
        );

        stream::iter(jobs)
            .map(|(host, address, ports)| async move {
                let outcome = self.prober.run(&host.name, address, ports).await;
                info!(
                    "Finished {} ({}): {} open, {} closed, {} open|filtered, {} errors",
                    host.name,
                    address,
                    outcome.open,
                    outcome.closed,
                    outcome.open_or_filtered,
                    outcome.errors
                );
                (address, outcome)
            })
            .buffer_unordered(self.host_concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::HostScheduler;
    use crate::address::ResolvedHost;
    use crate::scanner::prober::PortProber;
    use crate::scanner::store::ResultStore;
    use crate::scanner::transport::mock::{Behaviour, MockTransport};
    use std::net::IpAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn host(name: &str, addresses: &[&str], port: Option<u16>) -> ResolvedHost {
        let addresses = addresses
            .iter()
            .map(|a| a.parse::<IpAddr>().unwrap())
            .collect::<Vec<_>>();
        ResolvedHost::new(name.to_owned(), addresses, port, true)
    }

    fn scheduler(
        transport: Arc<MockTransport>,
        host_concurrency: usize,
        port_concurrency: usize,
    ) -> (HostScheduler, Arc<ResultStore>) {
        let store = Arc::new(ResultStore::new());
        let prober = PortProber::new(
            transport,
            Arc::clone(&store),
            CancellationToken::new(),
            port_concurrency,
            0,
            Duration::from_millis(10),
        );
        (HostScheduler::new(Arc::new(prober), host_concurrency), store)
    }

    #[tokio::test]
    async fn every_address_and_port_is_probed() {
        let transport = Arc::new(MockTransport::new(Behaviour::Echo));
        let (scheduler, store) = scheduler(transport, 2, 2);
        let hosts = [
            host("a", &["10.0.0.1", "10.0.0.2"], None),
            host("b", &["10.0.0.3"], None),
        ];

        let outcomes = scheduler.run(&hosts, &[53, 123, 161]).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, outcome)| outcome.open == 3));
        assert_eq!(store.len(), 9);
    }

    #[tokio::test]
    async fn target_port_overrides_default_ports() {
        let transport = Arc::new(MockTransport::new(Behaviour::Echo));
        let (scheduler, store) = scheduler(transport, 1, 1);
        let hosts = [host("a", &["10.0.0.1"], Some(5353))];

        scheduler.run(&hosts, &[53, 123]).await;

        let ports = store.snapshot().into_iter().map(|r| r.port).collect::<Vec<_>>();
        assert_eq!(ports, [5353]);
    }

    #[tokio::test]
    async fn failing_host_does_not_stop_others() {
        let broken: IpAddr = "10.0.0.66".parse().unwrap();
        let transport = Arc::new(MockTransport::with(move |target| {
            if target.ip() == broken {
                Behaviour::BrokenOpen
            } else {
                Behaviour::Echo
            }
        }));
        let (scheduler, store) = scheduler(transport, 2, 2);
        let hosts = [
            host("broken", &["10.0.0.66"], None),
            host("fine", &["10.0.0.1"], None),
        ];

        let outcomes = scheduler.run(&hosts, &[1, 2]).await;

        let broken_outcome = outcomes.iter().find(|(a, _)| *a == broken).unwrap().1;
        assert_eq!(broken_outcome.errors, 2);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn in_flight_probes_never_exceed_both_bounds() {
        let transport = Arc::new(MockTransport::new(Behaviour::Silent));
        let (scheduler, store) = scheduler(Arc::clone(&transport), 3, 4);
        let hosts = (1..=8)
            .map(|i| host(&format!("h{i}"), &[format!("10.0.1.{i}").as_str()], None))
            .collect::<Vec<_>>();
        let ports = (1..=10).collect::<Vec<u16>>();

        scheduler.run(&hosts, &ports).await;

        assert_eq!(store.len(), 80);
        assert!(transport.max_active() <= 12);
        assert!(transport.max_active() > 4);
    }
}
