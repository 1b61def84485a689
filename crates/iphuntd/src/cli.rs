//! Command line options.
//!
//! Every flag has an `IPHUNT_*` environment fallback so the daemon can run
//! from a unit file without arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use iphunt_core::OfflinePolicy;
use tracing::Level;

/// iphunt daemon
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Opts {
    /// Top-level subcommand
    #[command(subcommand)]
    pub command: Commands,

    /// Control socket options
    #[command(flatten)]
    pub control: ControlOptions,

    /// Logging options
    #[command(flatten)]
    pub logging: LoggingOptions,
}

/// Control socket options.
#[derive(Debug, Args)]
pub struct ControlOptions {
    /// Unix socket the running daemon listens on for stop and status.
    #[arg(
        long,
        global = true,
        env = "IPHUNT_SOCKET",
        default_value = "/tmp/iphuntd.sock"
    )]
    pub socket: PathBuf,
}

/// Logging options.
#[derive(Debug, Args)]
pub struct LoggingOptions {
    /// Maximum log level.
    #[arg(
        long,
        global = true,
        env = "IPHUNT_LOG_LEVEL",
        default_value = "info",
        value_enum
    )]
    pub log_level: LogLevel,
}

/// Ledger options, shared by `start` and `status`.
#[derive(Debug, Args)]
pub struct LedgerOptions {
    /// JSON-lines capture ledger.
    #[arg(long, env = "IPHUNT_LEDGER", default_value = "iphunt-captures.jsonl")]
    pub ledger: PathBuf,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load the hunt configuration and run until every account is done or
    /// a stop arrives.
    Start {
        /// Hunt configuration (accounts, ranges, provider, backoff).
        #[arg(long, env = "IPHUNT_CONFIG", default_value = "iphunt.json")]
        config: PathBuf,

        /// Last-known-good configuration copy used when the config source
        /// is unreachable.
        #[arg(long, env = "IPHUNT_CONFIG_CACHE")]
        cache: Option<PathBuf>,

        /// What to do when the config source is unreachable.
        #[arg(long, env = "IPHUNT_OFFLINE", default_value = "allow", value_enum)]
        offline: OfflineMode,

        #[command(flatten)]
        ledger: LedgerOptions,
    },

    /// Ask the running daemon to stop every worker.
    Stop,

    /// Print hunt progress and capture statistics as JSON.
    Status {
        #[command(flatten)]
        ledger: LedgerOptions,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OfflineMode {
    /// Continue with the cached configuration
    Allow,
    /// Refuse to start
    Deny,
}

impl From<OfflineMode> for OfflinePolicy {
    fn from(mode: OfflineMode) -> Self {
        match mode {
            OfflineMode::Allow => OfflinePolicy::AllowCached,
            OfflineMode::Deny => OfflinePolicy::Deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Opts::command().debug_assert();
    }

    #[test]
    fn start_defaults() {
        let opts = Opts::try_parse_from(["iphuntd", "start"]).unwrap();
        match opts.command {
            Commands::Start {
                config,
                cache,
                offline,
                ledger,
            } => {
                assert_eq!(config, PathBuf::from("iphunt.json"));
                assert!(cache.is_none());
                assert_eq!(offline, OfflineMode::Allow);
                assert_eq!(ledger.ledger, PathBuf::from("iphunt-captures.jsonl"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let opts = Opts::try_parse_from([
            "iphuntd",
            "stop",
            "--socket",
            "/run/iphunt.sock",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(opts.command, Commands::Stop));
        assert_eq!(opts.control.socket, PathBuf::from("/run/iphunt.sock"));
        assert_eq!(Level::from(opts.logging.log_level), Level::DEBUG);
    }

    #[test]
    fn offline_deny_maps_to_policy() {
        let opts =
            Opts::try_parse_from(["iphuntd", "start", "--offline", "deny"]).unwrap();
        let Commands::Start { offline, .. } = opts.command else {
            panic!("expected start");
        };
        assert_eq!(OfflinePolicy::from(offline), OfflinePolicy::Deny);
    }
}
