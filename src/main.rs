#![allow(clippy::needless_return)]

use std::fs::OpenOptions;
use std::io::{self, BufWriter};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use log::{debug, error, info};

use udpz::input::{Config, Opts};
use udpz::logging;
use udpz::output::write_results;
use udpz::scanner::{PortState, ProbeResult, Scanner};
use udpz::tui::print_opening;
use udpz::{detail, output, warning};

/// Reads the command line arguments, merges the config file, scans and
/// writes the results.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut opts = Opts::read();
    if !opts.no_config {
        let config = Config::read(opts.config_path.clone())?;
        opts.merge(&config);
    }

    let level = logging::level_filter(opts.silent, opts.quiet, opts.debug, opts.trace);
    logging::init(level, opts.log_format, opts.log_path.as_deref())
        .context("Failed to install the logger")?;
    debug!("Main() `opts` arguments are {opts:?}");

    let quiet = opts.quiet || opts.silent;
    if !opts.no_banner {
        print_opening(quiet);
    }

    let config = opts.scan_config();
    check_ulimit(&opts, config.max_in_flight(), quiet);

    let scanner = Arc::new(Scanner::new(config).context("Invalid scan configuration")?);

    let token = scanner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warning!("Interrupted, finishing with partial results.");
            token.cancel();
        }
    });

    info!("Starting scan of {} targets", opts.targets.len());
    scanner.scan(&opts.targets).await;

    let started = scanner.started_at().unwrap_or_else(Utc::now);
    let finished = scanner.finished_at().unwrap_or_else(Utc::now);
    let results = scanner.results();
    let open = results
        .iter()
        .filter(|result| result.state == PortState::Open)
        .count();
    info!(
        "Scan finished in {:.3}s: {} results, {} open, {} unresolved targets",
        (finished - started).num_milliseconds() as f64 / 1000.0,
        results.len(),
        open,
        scanner.resolution_errors().len()
    );

    write_output(&opts, &results, quiet)
}

fn write_output(opts: &Opts, results: &[ProbeResult], quiet: bool) -> anyhow::Result<()> {
    if results.is_empty() {
        warning!("No results to write.", quiet);
        return Ok(());
    }

    if let Some(path) = &opts.output {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .append(opts.append)
            .truncate(!opts.append)
            .open(path)
        {
            Ok(file) => {
                write_results(opts.format.resolve(true), results, BufWriter::new(file))
                    .with_context(|| format!("Could not write results to {}", path.display()))?;
                output!(
                    format!("Wrote {} results to {}", results.len(), path.display()),
                    quiet
                );
                return Ok(());
            }
            Err(e) => error!(
                "Could not open output file {} for writing: {e}. Writing results to stdout.",
                path.display()
            ),
        }
    }

    write_results(opts.format.resolve(false), results, io::stdout().lock())
        .context("Could not write results to stdout")?;
    Ok(())
}

#[cfg(unix)]
fn check_ulimit(opts: &Opts, needed: usize, quiet: bool) {
    use rlimit::Resource;

    if let Some(limit) = opts.ulimit {
        if Resource::NOFILE.set(limit, limit).is_ok() {
            detail!(
                format!("Automatically increasing ulimit value to {limit}."),
                quiet
            );
        } else {
            warning!("ERROR. Failed to set ulimit value.", quiet);
        }
    }

    match Resource::NOFILE.get() {
        Ok((soft, _)) if usize::try_from(soft).is_ok_and(|soft| soft < needed) => {
            warning!(
                format!(
                    "File limit {soft} is lower than the {needed} sockets this scan may hold open. \
                     Lower --host-tasks or --port-tasks, or raise it with --ulimit."
                ),
                quiet
            );
        }
        Ok(_) => {}
        Err(e) => debug!("Could not read the file limit: {e}"),
    }
}

#[cfg(not(unix))]
fn check_ulimit(_opts: &Opts, _needed: usize, _quiet: bool) {}
