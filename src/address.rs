//! Provides functions to parse target strings and resolve them to addresses.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use futures::{stream, StreamExt};
use hickory_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::Itertools;
use log::{debug, warn};
use tokio::{fs, io};

use crate::error::ResolutionError;

/// How many targets are resolved at the same time.
const RESOLVE_CONCURRENCY: usize = 10;

/// A user supplied target: a hostname or literal address, optionally
/// followed by a port.
///
/// ```rust
/// # use udpz::address::Target;
/// let target = Target::parse("[::1]:53");
/// assert_eq!(target.host, "::1");
/// assert_eq!(target.port, Some(53));
///
/// let target = Target::parse("example.com");
/// assert_eq!(target.port, None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// The target exactly as supplied.
    pub raw: String,
    /// Hostname or address part.
    pub host: String,
    pub port: Option<u16>,
}

impl Target {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (host, port) = if let Ok(ip) = IpAddr::from_str(trimmed) {
            (ip.to_string(), None)
        } else if let Ok(socket) = SocketAddr::from_str(trimmed) {
            (socket.ip().to_string(), Some(socket.port()))
        } else {
            match trimmed.rsplit_once(':') {
                Some((name, port)) if !name.contains(':') => match port.parse::<u16>() {
                    Ok(port) => (name.to_owned(), Some(port)),
                    Err(_) => (trimmed.to_owned(), None),
                },
                _ => (trimmed.to_owned(), None),
            }
        };

        Self {
            raw: raw.to_owned(),
            host,
            port,
        }
    }
}

/// A target that resolved to at least one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    /// Host identifier reported with every result.
    pub name: String,
    /// Every address found, in a stable order.
    pub addresses: Vec<IpAddr>,
    /// Port named by the target, if any.
    pub port: Option<u16>,
    scan_all: bool,
}

impl ResolvedHost {
    /// Addresses are de-duplicated and sorted (IPv4 first, then numerically)
    /// so the first-only pick does not depend on resolver ordering.
    pub fn new(name: String, addresses: Vec<IpAddr>, port: Option<u16>, scan_all: bool) -> Self {
        let addresses = addresses.into_iter().sorted().dedup().collect();
        Self {
            name,
            addresses,
            port,
            scan_all,
        }
    }

    /// The addresses that will actually be probed.
    pub fn scanned(&self) -> &[IpAddr] {
        if self.scan_all {
            &self.addresses
        } else {
            &self.addresses[..self.addresses.len().min(1)]
        }
    }
}

/// Turns targets into addresses, through the system resolver first and a
/// hickory resolver second.
pub struct Resolver {
    backup: TokioAsyncResolver,
    scan_all: bool,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("scan_all", &self.scan_all)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub async fn new(resolver: Option<&str>, scan_all: bool) -> Self {
        Self {
            backup: get_resolver(resolver).await,
            scan_all,
        }
    }

    /// Resolves one target.
    pub async fn resolve(&self, target: &Target) -> Result<ResolvedHost, ResolutionError> {
        if target.host.is_empty() {
            return Err(ResolutionError::new(&target.raw, "empty host"));
        }
        if target.port == Some(0) {
            return Err(ResolutionError::new(&target.raw, "port 0 cannot be scanned"));
        }

        let addresses = match IpAddr::from_str(&target.host) {
            Ok(ip) => vec![ip],
            Err(_) => self
                .resolve_ips_from_host(&target.host)
                .await
                .map_err(|reason| ResolutionError::new(&target.raw, reason))?,
        };

        if addresses.is_empty() {
            return Err(ResolutionError::new(&target.raw, "no addresses found"));
        }

        let host = ResolvedHost::new(target.host.clone(), addresses, target.port, self.scan_all);
        debug!(
            "Resolved {} to {:?}, scanning {:?}",
            target.raw,
            host.addresses,
            host.scanned()
        );
        Ok(host)
    }

    /// Resolves every target, keeping the input order. Failures are
    /// returned alongside the hosts instead of aborting the batch.
    pub async fn resolve_all(&self, targets: &[Target]) -> (Vec<ResolvedHost>, Vec<ResolutionError>) {
        let results = stream::iter(targets)
            .map(|target| self.resolve(target))
            .buffered(RESOLVE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;

        let (hosts, errors): (Vec<_>, Vec<_>) = results.into_iter().partition_result();
        for error in &errors {
            warn!("{error}");
        }
        (hosts, errors)
    }

    /// Uses DNS to get the IPs associated with host
    async fn resolve_ips_from_host(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => {
                let ips = addrs.map(|x| x.ip()).collect_vec();
                if !ips.is_empty() {
                    return Ok(ips);
                }
            }
            Err(e) => debug!("System resolver failed for {host}: {e}"),
        }

        self.backup
            .lookup_ip(host)
            .await
            .map(|lookup| lookup.iter().collect_vec())
            .map_err(|e| e.to_string())
    }
}

/// Derive a DNS resolver.
///
/// 1. if the `resolver` parameter has been set:
///     1. assume the parameter is a path and attempt to read IPs.
///     2. parse the input as a comma-separated list of IPs.
/// 2. if `resolver` is not set:
///    1. attempt to derive a resolver from the system config. (e.g.
///       `/etc/resolv.conf` on *nix).
///    2. finally, build a CloudFlare-based resolver.
async fn get_resolver(resolver: Option<&str>) -> TokioAsyncResolver {
    match resolver {
        Some(r) => {
            let mut config = ResolverConfig::new();
            let resolver_ips = match read_resolver_from_file(r).await {
                Ok(ips) => ips,
                Err(_) => parse_resolver_list(r),
            };
            for ip in resolver_ips {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(ip, 53),
                    Protocol::Udp,
                ));
            }
            TokioAsyncResolver::tokio(config, ResolverOpts::default())
        }
        None => TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
        }),
    }
}

fn parse_resolver_list(list: &str) -> Vec<IpAddr> {
    list.split(',')
        .filter_map(|r| IpAddr::from_str(r.trim()).ok())
        .collect()
}

/// Parses an input file of nameserver IPs, one per line.
async fn read_resolver_from_file(path: &str) -> io::Result<Vec<IpAddr>> {
    let ips = fs::read_to_string(path)
        .await?
        .lines()
        .filter_map(|line| IpAddr::from_str(line.trim()).ok())
        .collect();

    Ok(ips)
}

#[cfg(test)]
mod tests {
    use super::{parse_resolver_list, ResolvedHost, Resolver, Target};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn parse_plain_targets() {
        assert_eq!(Target::parse("127.0.0.1").host, "127.0.0.1");
        assert_eq!(Target::parse("::1").host, "::1");
        assert_eq!(Target::parse("::1").port, None);
        assert_eq!(Target::parse(" example.com ").host, "example.com");
        assert_eq!(Target::parse("example.com").raw, "example.com");
    }

    #[test]
    fn parse_targets_with_ports() {
        let target = Target::parse("10.0.0.1:161");
        assert_eq!((target.host.as_str(), target.port), ("10.0.0.1", Some(161)));

        let target = Target::parse("[fe80::1]:500");
        assert_eq!((target.host.as_str(), target.port), ("fe80::1", Some(500)));

        let target = Target::parse("ntp.example.com:123");
        assert_eq!((target.host.as_str(), target.port), ("ntp.example.com", Some(123)));
    }

    #[test]
    fn parse_target_with_invalid_port_keeps_whole_string() {
        let target = Target::parse("host:notaport");
        assert_eq!(target.host, "host:notaport");
        assert_eq!(target.port, None);
    }

    #[test]
    fn parse_targets_with_zero_port_keep_it() {
        for raw in ["1.2.3.4:0", "[::1]:0", "host:0"] {
            assert_eq!(Target::parse(raw).port, Some(0), "{raw}");
        }
    }

    #[tokio::test]
    async fn zero_port_targets_are_rejected() {
        let resolver = Resolver::new(None, true).await;
        let targets = [
            Target::parse("1.2.3.4:0"),
            Target::parse("[::1]:0"),
            Target::parse("127.0.0.1:53"),
        ];

        let (hosts, errors) = resolver.resolve_all(&targets).await;

        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].port, Some(53));
        assert_eq!(
            errors.iter().map(|e| e.target.as_str()).collect::<Vec<_>>(),
            ["1.2.3.4:0", "[::1]:0"]
        );
    }

    #[test]
    fn resolved_host_picks_first_address_deterministically() {
        let addresses = vec![
            IpAddr::V6(Ipv6Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        ];

        let first_only = ResolvedHost::new("h".to_owned(), addresses.clone(), None, false);
        assert_eq!(first_only.scanned(), [IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))]);
        assert_eq!(first_only.addresses.len(), 3);

        let all = ResolvedHost::new("h".to_owned(), addresses, None, true);
        assert_eq!(all.scanned().len(), 3);
    }

    #[test]
    fn resolver_list_skips_garbage() {
        assert_eq!(
            parse_resolver_list("8.8.8.8, nope,1.1.1.1"),
            [
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))
            ]
        );
    }

    #[tokio::test]
    async fn resolve_literal_address() {
        let resolver = Resolver::new(None, false).await;
        let host = resolver.resolve(&Target::parse("127.0.0.1")).await.unwrap();

        assert_eq!(host.name, "127.0.0.1");
        assert_eq!(host.scanned(), [IpAddr::V4(Ipv4Addr::LOCALHOST)]);
    }

    #[tokio::test]
    async fn resolve_localhost_first_only() {
        let resolver = Resolver::new(None, false).await;
        let host = resolver.resolve(&Target::parse("localhost")).await.unwrap();

        assert_eq!(host.scanned().len(), 1);
        assert!(host.scanned()[0].is_loopback());
    }

    #[tokio::test]
    async fn resolve_correct_and_incorrect_targets() {
        let resolver = Resolver::new(None, false).await;
        let targets = [
            Target::parse("127.0.0.1"),
            Target::parse("im_wrong.invalid"),
            Target::parse("::1"),
        ];

        let (hosts, errors) = resolver.resolve_all(&targets).await;

        assert_eq!(
            hosts.iter().map(|h| h.name.as_str()).collect::<Vec<_>>(),
            ["127.0.0.1", "::1"]
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].target, "im_wrong.invalid");
    }

    #[tokio::test]
    async fn resolve_empty_target_fails() {
        let resolver = Resolver::new(None, true).await;
        assert!(resolver.resolve(&Target::parse("  ")).await.is_err());
    }
}
