//! Provides a means to pick which ports are probed and in which order.
use crate::input::ScanOrder;
use rand::rng;
use rand::seq::SliceRandom;

/// Well-known UDP services probed when no ports are given.
///
/// Probing every port of every host is rarely useful over UDP: each silent
/// port costs `retransmissions + 1` full timeouts.
pub const DEFAULT_UDP_PORTS: [u16; 48] = [
    7, 9, 13, 17, 19, 37, 53, 67, 68, 69, 88, 111, 123, 137, 138, 161, 162, 177, 389, 427, 443,
    500, 514, 520, 523, 623, 1194, 1434, 1604, 1701, 1812, 1813, 1900, 2049, 3283, 3389, 3478,
    3702, 4500, 5060, 5351, 5353, 5683, 6481, 10001, 11211, 17185, 47808,
];

/// Represents the order ports are handed to the probers in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStrategy {
    Serial(Vec<u16>),
    Random(Vec<u16>),
}

impl PortStrategy {
    /// Uses `ports` when given, the curated defaults otherwise. Duplicates
    /// are dropped so every port is probed once per address.
    pub fn pick(ports: Option<Vec<u16>>, order: ScanOrder) -> Self {
        let mut ports = ports.unwrap_or_else(|| DEFAULT_UDP_PORTS.to_vec());
        ports.sort_unstable();
        ports.dedup();

        match order {
            ScanOrder::Serial => PortStrategy::Serial(ports),
            ScanOrder::Random => PortStrategy::Random(ports),
        }
    }

    pub fn order(&self) -> Vec<u16> {
        match self {
            PortStrategy::Serial(ports) => ports.clone(),
            PortStrategy::Random(ports) => {
                let mut ports = ports.clone();
                ports.shuffle(&mut rng());
                ports
            }
        }
    }
}
