//! Probes the ports of one resolved address.
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use log::{debug, trace};
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::probe::{probe_payload, PortProbe, SequenceCounter};
use super::store::{PortState, ProbeResult, ResultStore};
use super::transport::{is_rejection, DatagramChannel, Transport};

/// Largest reply we bother reading; only its arrival matters.
const RECV_BUFFER_SIZE: usize = 1024;

/// Tally of one address's results.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HostOutcome {
    pub open: usize,
    pub closed: usize,
    pub open_or_filtered: usize,
    pub errors: usize,
}

impl HostOutcome {
    fn record(&mut self, state: PortState) {
        match state {
            PortState::Open => self.open += 1,
            PortState::Closed => self.closed += 1,
            PortState::OpenOrFiltered => self.open_or_filtered += 1,
            PortState::Error => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.open + self.closed + self.open_or_filtered + self.errors
    }
}

/// Runs bounded batches of probe state machines against one address at a
/// time. Shared by every host of a session.
#[derive(Debug)]
pub struct PortProber {
    transport: Arc<dyn Transport>,
    store: Arc<ResultStore>,
    sequence: Arc<SequenceCounter>,
    cancel: CancellationToken,
    port_concurrency: usize,
    retransmissions: u32,
    timeout: Duration,
}

impl PortProber {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ResultStore>,
        cancel: CancellationToken,
        port_concurrency: usize,
        retransmissions: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            sequence: Arc::new(SequenceCounter::new()),
            cancel,
            port_concurrency: port_concurrency.max(1),
            retransmissions,
            timeout,
        }
    }

    /// Probes every port of `address`, adding each result to the store as
    /// soon as it is terminal.
    pub async fn run(&self, host: &str, address: IpAddr, ports: &[u16]) -> HostOutcome {
        debug!(
            "Probing {} ports on {} ({}) with {} tasks",
            ports.len(),
            host,
            address,
            self.port_concurrency
        );

        stream::iter(ports.iter().copied())
            .map(|port| self.probe(host, address, port))
            .buffer_unordered(self.port_concurrency)
            .fold(HostOutcome::default(), |mut outcome, result| async move {
                outcome.record(result.state);
                self.store.add(result);
                outcome
            })
            .await
    }

    /// Drives one probe to a terminal state.
    pub async fn probe(&self, host: &str, address: IpAddr, port: u16) -> ProbeResult {
        let mut probe = PortProbe::new(host, address, port, self.retransmissions);

        if self.cancel.is_cancelled() {
            probe.cancelled();
            return probe.finish();
        }

        let target = SocketAddr::new(address, port);
        match self.transport.open(target).await {
            Ok(channel) => self.exchange(&mut probe, channel.as_ref(), target).await,
            Err(e) if is_rejection(&e) => probe.refused(),
            Err(e) => {
                debug!("Could not open channel to {target}: {e}");
                probe.failed(e);
            }
        }

        let result = probe.finish();
        debug!(
            "{} is {} after {} attempt(s)",
            target, result.state, result.attempts
        );
        result
    }

    /// Send / wait / retransmit until the probe is terminal.
    async fn exchange(
        &self,
        probe: &mut PortProbe,
        channel: &dyn DatagramChannel,
        target: SocketAddr,
    ) {
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        while probe.can_send() {
            if self.cancel.is_cancelled() {
                probe.cancelled();
                return;
            }

            let seq = self.sequence.next();
            probe.sent(seq);
            trace!("Sending probe {:?} to {} (attempt {})", seq, target, probe.attempts());

            if let Err(e) = channel.send(&probe_payload(seq)).await {
                if is_rejection(&e) {
                    probe.refused();
                } else {
                    probe.failed(e);
                }
                return;
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => probe.cancelled(),
                received = time::timeout(self.timeout, channel.recv(&mut buf)) => match received {
                    Ok(Ok(size)) => {
                        trace!("Received {size} bytes from {target}");
                        probe.replied(&buf[..size]);
                    }
                    Ok(Err(e)) if is_rejection(&e) => probe.refused(),
                    Ok(Err(e)) => probe.failed(e),
                    Err(_) => probe.timed_out(),
                },
            }
        }
    }
}
