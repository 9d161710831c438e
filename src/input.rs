//! Provides a means to read, parse and hold configuration options for scans.
use clap::{ArgAction, Parser, ValueEnum};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::logging::LogFormat;
use crate::output::OutputFormat;
use crate::port_strategy::PortStrategy;
use crate::scanner::{
    ProxyConfig, ScanConfig, DEFAULT_HOST_CONCURRENCY, DEFAULT_PORT_CONCURRENCY,
    DEFAULT_RETRANSMISSIONS,
};

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Represents the order ports are probed in.
///   - Serial probes ports in ascending order.
///   - Random shuffles them for every host.
#[derive(Deserialize, Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Serial,
    Random,
}

pub type Ports = Vec<u16>;

/// Parses `53,123,1000-1010` style port lists.
pub fn parse_ports_and_ranges(input: &str) -> Result<Ports, String> {
    let mut ports = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if part.contains('-') {
            let range_ports = parse_port_range(part)?;
            ports.extend(range_ports);
        } else {
            let port = parse_single_port(part)?;
            ports.push(port);
        }
    }

    if ports.is_empty() {
        return Err(String::from("No valid ports or ranges provided"));
    }

    ports.sort_unstable();
    ports.dedup();

    Ok(ports)
}

fn parse_port_range(range_str: &str) -> Result<Vec<u16>, String> {
    let (start, end) = range_str.split_once('-').ok_or_else(|| {
        format!("Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.")
    })?;
    if end.contains('-') {
        return Err(format!(
            "Invalid range format '{range_str}'. Expected 'start-end'. Example: 1-1000.",
        ));
    }

    let start: u16 = start
        .trim()
        .parse()
        .map_err(|_| format!("Invalid start port '{start}' in range '{range_str}'"))?;
    let end: u16 = end
        .trim()
        .parse()
        .map_err(|_| format!("Invalid end port '{end}' in range '{range_str}'"))?;

    if start > end {
        return Err(format!(
            "Start port {start} is greater than end port {end} in range '{range_str}'",
        ));
    }

    if start < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Ports in range '{range_str}' must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok((start..=end).collect())
}

fn parse_single_port(port_str: &str) -> Result<u16, String> {
    let port: u16 = port_str
        .parse()
        .map_err(|_| format!("Invalid port number '{port_str}'"))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(format!(
            "Port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}",
        ));
    }

    Ok(port)
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "udpz",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    help_template = "{bin} {version}\n{about}\n\nUSAGE:\n    {usage}\n\nOPTIONS:\n{options}",
)]
#[allow(clippy::struct_excessive_bools)]
/// Speedy probe-oriented UDP port scanner.
/// Source: <https://github.com/FalconOps-Cybersecurity/udpz>
pub struct Opts {
    /// Hostnames or IP addresses to scan, optionally as HOST:PORT.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Save results to file.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output log messages to file.
    #[arg(short = 'O', long = "log")]
    pub log_path: Option<PathBuf>,

    /// Append results to the output file. `--append=false` truncates it.
    #[arg(
        short,
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub append: bool,

    /// Output format.
    #[arg(short, long, value_enum, ignore_case = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Output log format.
    #[arg(short = 'L', long, value_enum, ignore_case = true, default_value = "auto")]
    pub log_format: LogFormat,

    /// Maximum number of hosts to scan concurrently.
    #[arg(short = 'c', long = "host-tasks", default_value_t = DEFAULT_HOST_CONCURRENCY)]
    pub host_tasks: usize,

    /// Number of concurrent scan tasks per host.
    #[arg(short = 'p', long = "port-tasks", default_value_t = DEFAULT_PORT_CONCURRENCY)]
    pub port_tasks: usize,

    /// Number of probe retransmissions per probe.
    #[arg(short, long, default_value_t = DEFAULT_RETRANSMISSIONS)]
    pub retries: u32,

    /// UDP probe timeout in milliseconds.
    #[arg(short, long, default_value = "3000")]
    pub timeout: u64,

    /// Scan all resolved addresses instead of just the first. `--all=false`
    /// scans only the first.
    #[arg(
        short = 'A',
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub all: bool,

    /// A list of ports and/or port ranges to be scanned. Examples: 53,161 or 1-1024.
    /// Defaults to a curated list of well-known UDP services.
    #[arg(short = 'P', long, value_parser = parse_ports_and_ranges)]
    pub ports: Option<Ports>,

    /// The order ports are probed in.
    #[arg(long, value_enum, ignore_case = true, default_value = "serial")]
    pub scan_order: ScanOrder,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// SOCKS5 proxy address as HOST:PORT.
    #[arg(short = 'S', long = "socks", hide = true)]
    pub socks_address: Option<String>,

    /// SOCKS5 proxy username.
    #[arg(long, hide = true)]
    pub socks_user: Option<String>,

    /// SOCKS5 proxy password.
    #[arg(long, hide = true)]
    pub socks_pass: Option<String>,

    /// SOCKS5 proxy timeout in milliseconds.
    #[arg(long, default_value = "3000", hide = true)]
    pub socks_timeout: u64,

    /// Enable debug logging (Very noisy!)
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Enable trace logging (Very noisy!)
    #[arg(short = 'T', long)]
    pub trace: bool,

    /// Disable info logging.
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable ALL logging.
    #[arg(short, long)]
    pub silent: bool,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Hide the banner
    #[arg(long)]
    pub no_banner: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(long, value_parser)]
    pub config_path: Option<PathBuf>,
}

impl Opts {
    pub fn read() -> Self {
        Opts::parse()
    }

    /// Merges values found within the user configuration file.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_required(config);
            self.merge_optional(config);
        }
    }

    fn merge_required(&mut self, config: &Config) {
        macro_rules! merge_required {
            ($($field: ident),+) => {
                $(
                    if let Some(e) = &config.$field {
                        self.$field = e.clone();
                    }
                )+
            }
        }

        merge_required!(
            host_tasks, port_tasks, retries, timeout, all, append, scan_order, format,
            log_format
        );
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if config.$field.is_some() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        // Ports given on the command line win over the config file
        if self.ports.is_none() {
            self.ports = config.ports.clone();
        }

        merge_optional!(resolver, ulimit, socks_address, socks_user, socks_pass);
    }

    /// Builds the immutable scan configuration from the parsed options.
    pub fn scan_config(&self) -> ScanConfig {
        let strategy = PortStrategy::pick(self.ports.clone(), self.scan_order);
        let proxy = self.socks_address.as_ref().map(|address| ProxyConfig {
            address: address.clone(),
            username: self.socks_user.clone(),
            password: self.socks_pass.clone(),
            timeout: Duration::from_millis(self.socks_timeout),
        });

        ScanConfig {
            scan_all_addresses: self.all,
            host_concurrency: self.host_tasks,
            port_concurrency: self.port_tasks,
            retransmissions: self.retries,
            timeout: Duration::from_millis(self.timeout),
            ports: strategy.order(),
            resolver: self.resolver.clone(),
            proxy,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    ports: Option<Vec<u16>>,
    host_tasks: Option<usize>,
    port_tasks: Option<usize>,
    retries: Option<u32>,
    timeout: Option<u64>,
    all: Option<bool>,
    append: Option<bool>,
    scan_order: Option<ScanOrder>,
    format: Option<OutputFormat>,
    log_format: Option<LogFormat>,
    resolver: Option<String>,
    ulimit: Option<u64>,
    socks_address: Option<String>,
    socks_user: Option<String>,
    socks_pass: Option<String>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file is an empty config.
    ///
    /// # Format
    ///
    /// ports = [53, 123, 161]
    /// host_tasks = 10
    /// port_tasks = 50
    /// retries = 2
    /// timeout = 3000
    /// scan_order = "Serial"
    /// format = "json"
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let Some(config_path) = custom_config_path.or_else(default_config_path) else {
            return Ok(Config::default());
        };
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Found {e} in configuration file {}", config_path.display()))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".udpz.toml");
    Some(config_path)
}
