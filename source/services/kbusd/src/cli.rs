// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command line surface: `kbusd check <config>` and `kbusd up <config> [--once]`.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use log::info;

use crate::{Config, Error, Result, Topology};

#[derive(Debug, Parser)]
#[command(name = "kbusd", about = "Brings up a message-bus domain from a TOML topology")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse and validate a config file.
    Check {
        /// Topology config.
        config: PathBuf,
    },
    /// Create the configured domain, then serve until stdin closes.
    Up {
        /// Topology config.
        config: PathBuf,
        /// Tear the domain down again right after bring-up.
        #[arg(long)]
        once: bool,
    },
}

/// Usage text.
pub fn help() -> String {
    Cli::command().render_help().to_string()
}

/// Runs a command line (without the program name) and returns its output.
pub fn execute(args: &[&str]) -> Result<String> {
    let argv = std::iter::once("kbusd").chain(args.iter().copied());
    let cli = match Cli::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(err) if err.kind() == clap::error::ErrorKind::DisplayHelp => return Ok(err.to_string()),
        Err(err) => return Err(Error::Usage(err.to_string())),
    };
    dispatch(cli, false)
}

/// Binary entry: parses `std::env::args`, installs the logger and prints the result.
pub fn run() -> Result<()> {
    let out = dispatch(Cli::parse(), true)?;
    print!("{out}");
    Ok(())
}

fn dispatch(cli: Cli, install_logger: bool) -> Result<String> {
    match cli.command {
        Command::Check { config } => {
            let parsed = load(&config, install_logger)?;
            Ok(format!(
                "config ok: domain {}, {} buses, {} endpoints\n",
                parsed.domain,
                parsed.buses.len(),
                parsed.endpoint_count()
            ))
        }
        Command::Up { config, once } => {
            let parsed = load(&config, install_logger)?;
            let topology = Topology::bring_up(&parsed)?;
            let snapshot = topology.snapshot()?;
            let mut out = String::from_utf8_lossy(&snapshot.to_vec()).into_owned();
            drop(snapshot);
            if !once {
                print!("{out}");
                out.clear();
                wait_for_stdin_close()?;
            }
            topology.teardown();
            info!("kbusd: domain {} down", parsed.domain);
            out.push_str(&format!("domain {} down\n", parsed.domain));
            Ok(out)
        }
    }
}

fn load(path: &Path, install_logger: bool) -> Result<Config> {
    let config = Config::load(path)?;
    if install_logger {
        let filter = config.level_filter().to_string();
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).try_init();
    }
    Ok(config)
}

fn wait_for_stdin_close() -> Result<()> {
    let mut sink = Vec::new();
    io::stdin()
        .read_to_end(&mut sink)
        .map_err(|source| Error::Read { path: PathBuf::from("<stdin>"), source })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_names_subcommands() {
        let text = help();
        assert!(text.contains("kbusd"));
        assert!(text.contains("check"));
        assert!(text.contains("up"));
    }

    #[test]
    fn unknown_subcommand_is_usage_error() {
        assert!(matches!(execute(&["frobnicate"]), Err(Error::Usage(_))));
    }

    #[test]
    fn help_flag_is_not_an_error() {
        assert!(execute(&["--help"]).unwrap().contains("Usage"));
    }
}
