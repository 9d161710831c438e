//! Utilities for terminal output during scanning.
//!
//! Everything here writes to stderr so stdout only ever carries results.

/// Prints the opening banner.
pub fn print_opening(quiet: bool) {
    use colored::Colorize;

    if quiet {
        return;
    }
    let banner = format!(
        "{}\n{}",
        r#"
             __
 __  ______/ /___  ____
/ / / / __  / __ \/_  /
/ /_/ / /_/ / /_/ / / /_
\__,_/\__,_/ .___/ /___/
          /_/"#
            .cyan()
            .bold(),
        format!("udpz {}: probe-oriented UDP scanning", env!("CARGO_PKG_VERSION")).dimmed()
    );
    eprintln!("{banner}\n");
}

/// Something the user should know about but that does not stop the scan.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        eprintln!("{} {}", colored::Colorize::bold(colored::Colorize::red("[!]")), $name);
    };
    ($name:expr, $quiet:expr) => {
        if !$quiet {
            $crate::warning!($name);
        }
    };
}

/// Extra detail that is only interesting when not running quietly.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        eprintln!("{} {}", colored::Colorize::bold(colored::Colorize::blue("[~]")), $name);
    };
    ($name:expr, $quiet:expr) => {
        if !$quiet {
            $crate::detail!($name);
        }
    };
}

/// A notable result of the run.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        eprintln!("{} {}", colored::Colorize::bold(colored::Colorize::green("[>]")), $name);
    };
    ($name:expr, $quiet:expr) => {
        if !$quiet {
            $crate::output!($name);
        }
    };
}
