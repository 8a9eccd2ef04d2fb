// SPDX-License-Identifier: Apache-2.0

mod config;
pub(crate) mod ocall;
mod params;

use crate::ta::{OcallApp, OCALL_TA_UUID};

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context as _};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use postern_config::Config;
use wicket::{Context, TrustedPeer};

/// Tool to call into trusted applications and serve their call-backs
///
/// Postern starts an in-process trusted peer with a demo trusted
/// application installed, opens a session to it and invokes its commands.
/// While a command runs, the trusted application may call back into
/// postern, which answers from the thread that issued the command.
#[derive(Parser, Debug)]
#[clap(version)]
pub struct Options {
    /// Logging options
    #[clap(flatten)]
    logger: LogOptions,

    /// Subcommands (with their own options)
    #[clap(subcommand)]
    cmd: Subcommands,
}

impl Options {
    pub fn execute(self) -> anyhow::Result<()> {
        self.logger.init();

        info!("logging initialized!");
        info!("CLI opts: {:?}", self);

        self.cmd.dispatch()
    }
}

/// `postern` subcommands and their options/arguments.
#[derive(Subcommand, Debug)]
enum Subcommands {
    Ocall(ocall::Options),
    Params(params::Options),
    #[clap(subcommand)]
    Config(config::Subcommands),
}

impl Subcommands {
    fn dispatch(self) -> anyhow::Result<()> {
        match self {
            Self::Ocall(cmd) => cmd.execute(),
            Self::Params(cmd) => cmd.execute(),
            Self::Config(subcmd) => subcmd.dispatch(),
        }
    }
}

/// Common host options
#[derive(Args, Debug)]
pub struct HostOptions {
    /// Path of the configuration file
    #[clap(long, env = "POSTERN_CONFIG", parse(from_os_str))]
    config: Option<PathBuf>,
}

impl HostOptions {
    pub fn config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load configuration from {path:?}")),
            None => Ok(Config::default()),
        }
    }

    /// Starts a trusted peer with the demo application and connects to it.
    pub fn connect(&self) -> anyhow::Result<Context> {
        let config = self.config()?;
        debug!("configuration: {config:?}");

        let peer = TrustedPeer::new();
        peer.install(OCALL_TA_UUID, OcallApp)
            .map_err(|code| anyhow!("failed to install the demo application: {code}"))?;

        Ok(Context::with_settings(&peer, config.settings()))
    }
}

/// Common logging / output options
#[derive(Args, Debug)]
pub struct LogOptions {
    /// Increase log verbosity. Pass multiple times for more log output.
    ///
    /// By default we only show error messages. Passing `-v` will show warnings,
    /// `-vv` adds info, `-vvv` for debug, and `-vvvv` for trace.
    #[clap(long = "verbose", short = 'v', parse(from_occurrences))]
    verbosity: u8,

    /// Set fancier logging filters.
    ///
    /// This is equivalent to the `RUST_LOG` environment variable.
    /// For more info, see the `env_logger` crate documentation.
    #[clap(long = "log-filter", env = "POSTERN_LOG")]
    log_filter: Option<String>,

    /// Set log output target ("stderr", "stdout")
    #[clap(long, default_value = "stderr")]
    log_target: LogTarget,
}

impl LogOptions {
    /// Build & initialize a global logger using env_logger::Builder.
    pub fn init(&self) {
        let mut builder = env_logger::Builder::new();
        builder
            .filter_level(self.verbosity_level())
            .parse_filters(self.log_filter.as_deref().unwrap_or_default())
            .target(self.log_target.into())
            .init();
    }

    /// Convert the -vvv.. count into a log level.
    fn verbosity_level(&self) -> log::LevelFilter {
        match self.verbosity {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Warn,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Represents targets for debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
enum LogTarget {
    Stdout,
    Stderr,
}

/// Convert a str to a LogTarget. This is how Clap parses CLI args.
impl FromStr for LogTarget {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            _ => Err(anyhow!("unknown log target {:?}", s)),
        }
    }
}

/// Convert our LogTarget to env_logger's Target
impl From<LogTarget> for env_logger::Target {
    fn from(t: LogTarget) -> Self {
        match t {
            LogTarget::Stdout => Self::Stdout,
            LogTarget::Stderr => Self::Stderr,
        }
    }
}
