//! The per-port probe state machine.
//!
//! A [`PortProbe`] starts in [`ProbeState::Pending`], moves through
//! `AwaitingResponse` and `Retrying` while datagrams are in flight, and ends
//! in exactly one terminal state. Signals that arrive after the probe is
//! terminal are ignored, so the first terminal signal always wins.
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::trace;

use super::store::{PortState, ProbeResult};

/// Marker at the start of every probe datagram.
const PROBE_MAGIC: &[u8; 4] = b"udpz";

/// Lifecycle of a single port probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Pending,
    AwaitingResponse,
    Retrying,
    Open,
    Closed,
    OpenOrFiltered,
    Error,
}

impl ProbeState {
    pub fn is_terminal(self) -> bool {
        self.terminal().is_some()
    }

    /// The exported state, if this one is terminal.
    pub fn terminal(self) -> Option<PortState> {
        match self {
            ProbeState::Open => Some(PortState::Open),
            ProbeState::Closed => Some(PortState::Closed),
            ProbeState::OpenOrFiltered => Some(PortState::OpenOrFiltered),
            ProbeState::Error => Some(PortState::Error),
            ProbeState::Pending | ProbeState::AwaitingResponse | ProbeState::Retrying => None,
        }
    }
}

/// Identifies one attempt of one probe within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceId(pub u32);

/// Hands out session-unique sequence ids.
///
/// Starts at a random offset so two sessions hitting the same host do not
/// tag their datagrams identically.
#[derive(Debug)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(rand::random::<u32>()))
    }

    pub fn next(&self) -> SequenceId {
        SequenceId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the generic probe datagram for an attempt.
pub fn probe_payload(seq: SequenceId) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PROBE_MAGIC.len() + 4);
    payload.extend_from_slice(PROBE_MAGIC);
    payload.extend_from_slice(&seq.0.to_be_bytes());
    payload
}

/// Extracts the sequence id from a reply that echoes a probe datagram.
pub fn echoed_sequence(reply: &[u8]) -> Option<SequenceId> {
    let start = reply
        .windows(PROBE_MAGIC.len())
        .position(|window| window == PROBE_MAGIC)?;
    let id = reply.get(start + PROBE_MAGIC.len()..start + PROBE_MAGIC.len() + 4)?;
    Some(SequenceId(u32::from_be_bytes(id.try_into().ok()?)))
}

#[derive(Debug)]
struct Attempt {
    seq: SequenceId,
    sent_at: Instant,
}

/// State machine of one probe against (address, port).
#[derive(Debug)]
pub struct PortProbe {
    host: String,
    address: IpAddr,
    port: u16,
    max_attempts: u32,
    state: ProbeState,
    attempts: Vec<Attempt>,
    rtt: Option<Duration>,
    error: Option<String>,
}

impl PortProbe {
    pub fn new(host: &str, address: IpAddr, port: u16, retransmissions: u32) -> Self {
        Self {
            host: host.to_owned(),
            address,
            port,
            max_attempts: retransmissions.saturating_add(1),
            state: ProbeState::Pending,
            attempts: Vec::new(),
            rtt: None,
            error: None,
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Whether another datagram may still be sent.
    pub fn can_send(&self) -> bool {
        !self.state.is_terminal() && self.attempts() < self.max_attempts
    }

    fn transition(&mut self, next: ProbeState) -> bool {
        if self.state.is_terminal() {
            trace!(
                "Discarding {:?} for {}:{}, already {:?}",
                next,
                self.address,
                self.port,
                self.state
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Records a datagram about to be sent with the given sequence id.
    pub fn sent(&mut self, seq: SequenceId) {
        if !self.can_send() {
            return;
        }
        let next = if self.attempts.is_empty() {
            ProbeState::AwaitingResponse
        } else {
            ProbeState::Retrying
        };
        if self.transition(next) {
            self.attempts.push(Attempt {
                seq,
                sent_at: Instant::now(),
            });
        }
    }

    /// A datagram came back. The round trip is measured from the attempt the
    /// reply echoes, falling back to the most recent attempt.
    pub fn replied(&mut self, reply: &[u8]) {
        let attempt = echoed_sequence(reply)
            .and_then(|seq| self.attempts.iter().find(|a| a.seq == seq))
            .or_else(|| self.attempts.last());
        let rtt = attempt.map(|a| a.sent_at.elapsed());
        if self.transition(ProbeState::Open) {
            self.rtt = rtt;
        }
    }

    pub fn refused(&mut self) {
        self.transition(ProbeState::Closed);
    }

    /// The wait for the current attempt elapsed.
    pub fn timed_out(&mut self) {
        let next = if self.attempts() < self.max_attempts {
            ProbeState::Retrying
        } else {
            ProbeState::OpenOrFiltered
        };
        self.transition(next);
    }

    pub fn failed(&mut self, error: impl ToString) {
        if self.transition(ProbeState::Error) {
            self.error = Some(error.to_string());
        }
    }

    pub fn cancelled(&mut self) {
        self.failed("cancelled");
    }

    /// Converts a terminal probe into its result. A probe that never reached
    /// a terminal state is reported as an error.
    pub fn finish(mut self) -> ProbeResult {
        if !self.state.is_terminal() {
            self.failed("probe did not complete");
        }
        let attempts = self.attempts();
        ProbeResult {
            host: self.host,
            address: self.address,
            port: self.port,
            state: self.state.terminal().unwrap_or(PortState::Error),
            attempts,
            rtt_ms: self.rtt.map(|rtt| rtt.as_secs_f64() * 1000.0),
            error: self.error,
        }
    }
}
