//! This crate exposes the internal functionality of the
//! [udpz](https://github.com/FalconOps-Cybersecurity/udpz) UDP port scanner.
//!
//! udpz sends small probe datagrams to every requested port of every target
//! and classifies each port from what comes back: a reply means `open`, an
//! ICMP port unreachable means `closed`, and silence through every
//! retransmission means `open|filtered`.
//!
//! ## Architecture Overview
//!
//! A [`Scanner`](crate::scanner::Scanner) is one scan session built from an
//! immutable [`ScanConfig`](crate::scanner::ScanConfig):
//!
//! 1. **Target resolution**: targets are parsed and resolved by
//!    [`address`], failures are recorded without stopping the scan.
//! 2. **Host scheduling**: at most `host_concurrency` addresses are probed at once.
//! 3. **Port probing**: each address probes at most `port_concurrency` ports at
//!    once, retransmitting unanswered probes.
//! 4. **Results**: every probe ends in exactly one terminal state stored in the
//!    session's [`ResultStore`](crate::scanner::ResultStore), exported by [`output`].
//!
//! At most `host_concurrency × port_concurrency` datagrams are ever in flight.
//!
//! ## Basic Usage Example
//!
//! ```rust,no_run
//! use udpz::scanner::{ScanConfig, Scanner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scanner = Scanner::new(ScanConfig {
//!         ports: vec![53, 123, 161],
//!         retransmissions: 1,
//!         ..ScanConfig::default()
//!     })?;
//!
//!     scanner.scan(&["127.0.0.1".to_owned()]).await;
//!
//!     for result in scanner.results() {
//!         println!("{}:{} {}", result.address, result.port, result.state);
//!     }
//!     Ok(())
//! }
//! ```
#![allow(clippy::needless_doctest_main)]
#![warn(missing_docs)]

pub mod tui;

pub mod input;

pub mod scanner;

pub mod port_strategy;

pub mod address;

pub mod error;

pub mod logging;

pub mod output;
