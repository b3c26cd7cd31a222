//! Command-line arguments for the `sweep` binary.
//!
//! Uses clap derive with environment fallbacks for the credentials.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sweep_core::Task;

use crate::config::{ConfigError, PacingConfig, SweepConfig};

/// Batch maintenance for Open Cloud datastores.
#[derive(Debug, Parser)]
#[command(name = "sweep")]
#[command(version)]
#[command(about = "Batch maintenance for Open Cloud datastores")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalOptions {
    /// Universe whose datastores are scanned.
    #[arg(long, env = "ROBLOX_UNIVERSE_ID", global = true)]
    pub universe_id: Option<String>,

    /// Open Cloud API key.
    #[arg(long, env = "ROBLOX_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Open Cloud host.
    #[arg(long, default_value = "https://apis.roblox.com", global = true)]
    pub api_base: String,

    /// Users API host, used by `lookup-user`.
    #[arg(long, default_value = "https://users.roblox.com", global = true)]
    pub users_base: String,

    /// Keys per page. Values above 100 are clamped.
    #[arg(long, default_value_t = 100, global = true)]
    pub page_limit: u32,

    /// Minimum pause after each per-key call, in milliseconds.
    #[arg(long, default_value_t = 250, global = true)]
    pub key_pace_min_ms: u64,

    /// Maximum pause after each per-key call, in milliseconds.
    #[arg(long, default_value_t = 500, global = true)]
    pub key_pace_max_ms: u64,

    /// Pause after each page, in milliseconds.
    #[arg(long, default_value_t = 1000, global = true)]
    pub page_pace_ms: u64,

    /// Pause after a rate-limit response, in seconds.
    #[arg(long, default_value_t = 30, global = true)]
    pub backoff_secs: u64,

    /// Consecutive rate-limit restarts of one page before the scan fails.
    #[arg(long, default_value_t = 10, global = true)]
    pub max_backoffs: u32,

    /// Timeout for every remote call, in seconds.
    #[arg(long = "timeout", default_value_t = 10, global = true)]
    pub timeout_secs: u64,

    /// Skip the confirmation prompt.
    #[arg(short = 'y', long = "yes", global = true)]
    pub is_confirmed: bool,

    /// Enable debug logging.
    #[arg(short = 'v', long = "verbose", global = true, conflicts_with = "is_quiet")]
    pub is_verbose: bool,

    /// Only log warnings and errors.
    #[arg(short = 'q', long = "quiet", global = true)]
    pub is_quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long = "log-json", global = true)]
    pub is_log_json: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Delete every entry of the given stores.
    Wipe {
        #[arg(long = "store", default_values = ["PlayerBestDrawings", "Players", "TopPlays"])]
        stores: Vec<String>,
    },

    /// Recompute points, sort, and truncate every top-plays list.
    RecomputeLeaderboard {
        #[arg(long = "store", default_values = ["TopPlays"])]
        stores: Vec<String>,
    },

    /// Rebuild the theme summary aggregate.
    SummarizeThemes {
        #[arg(long = "store", default_values = ["Themes"])]
        stores: Vec<String>,

        /// Store receiving the aggregate. Defaults to the scanned store.
        #[arg(long)]
        target_store: Option<String>,
    },

    /// Copy player points into a ranking sorted map.
    MirrorRanking {
        #[arg(long = "store", default_values = ["Players"])]
        stores: Vec<String>,

        /// Sorted map receiving the ranked players.
        #[arg(long, default_value = "TopPointsV2")]
        map: String,
    },

    /// Print every entry of a store as JSON lines.
    Dump {
        #[arg(long, default_value = "Themes")]
        store: String,
    },

    /// Resolve a username to its user id.
    LookupUser { username: String },
}

impl Command {
    /// Task run by this command, or `None` for read-only commands.
    #[must_use]
    pub fn task(&self) -> Option<Task> {
        match self {
            Self::Wipe { .. } => Some(Task::Wipe),
            Self::RecomputeLeaderboard { .. } => Some(Task::RecomputeLeaderboard),
            Self::SummarizeThemes { .. } => Some(Task::SummarizeThemes),
            Self::MirrorRanking { .. } => Some(Task::MirrorRanking),
            Self::Dump { .. } | Self::LookupUser { .. } => None,
        }
    }

    /// Stores scanned by this command.
    #[must_use]
    pub fn stores(&self) -> &[String] {
        match self {
            Self::Wipe { stores }
            | Self::RecomputeLeaderboard { stores }
            | Self::SummarizeThemes { stores, .. }
            | Self::MirrorRanking { stores, .. } => stores,
            Self::Dump { store } => std::slice::from_ref(store),
            Self::LookupUser { .. } => &[],
        }
    }

    /// Whether the command talks to the datastore API.
    #[must_use]
    pub fn needs_credentials(&self) -> bool {
        !matches!(self, Self::LookupUser { .. })
    }
}

impl Cli {
    /// Builds and validates the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when credentials are missing (for commands
    /// that need them) or values are inconsistent.
    pub fn config(&self) -> Result<SweepConfig, ConfigError> {
        let g = &self.global;
        let config = SweepConfig {
            universe_id: g.universe_id.clone().unwrap_or_default(),
            api_key: g.api_key.clone().unwrap_or_default(),
            api_base: g.api_base.clone(),
            users_base: g.users_base.clone(),
            request_timeout: Duration::from_secs(g.timeout_secs),
            page_limit: g.page_limit,
            pacing: PacingConfig {
                key_pace_min: Duration::from_millis(g.key_pace_min_ms),
                key_pace_max: Duration::from_millis(g.key_pace_max_ms),
                page_pace: Duration::from_millis(g.page_pace_ms),
                rate_limit_backoff: Duration::from_secs(g.backoff_secs),
            },
            max_consecutive_backoffs: g.max_backoffs,
        };
        if self.command.needs_credentials() {
            config.validate()?;
        }
        Ok(config)
    }

    /// Default log filter chosen by `-v` / `-q`, if either was given.
    #[must_use]
    pub fn log_level(&self) -> Option<&'static str> {
        if self.global.is_verbose {
            Some("debug")
        } else if self.global.is_quiet {
            Some("warn")
        } else {
            None
        }
    }
}
