use std::sync::OnceLock;

use clap::{Parser, Subcommand, ValueEnum};

/// Automatically updates running Docker containers whenever a new image is
/// released.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Container names to watch. Empty means all containers.
    pub containers: Vec<String>,

    /// Cron expression in six fields (with seconds) for periodic runs.
    /// Empty means no periodic runs.
    #[arg(long, env = "VIGIL_SCHEDULE", default_value = "")]
    pub schedule: String,

    /// Run one update session and exit.
    #[arg(long, env = "VIGIL_RUN_ONCE")]
    pub run_once: bool,

    /// Remove images no longer referenced by any container after an update.
    #[arg(long, env = "VIGIL_CLEANUP")]
    pub cleanup: bool,

    /// Do not start the replacement container after removing the old one.
    #[arg(long, env = "VIGIL_NO_RESTART")]
    pub no_restart: bool,

    /// Skip registry pulls and compare against the local image store.
    #[arg(long, env = "VIGIL_NO_PULL")]
    pub no_pull: bool,

    /// Report staleness but take no action.
    #[arg(long, env = "VIGIL_MONITOR_ONLY")]
    pub monitor_only: bool,

    /// Only watch containers carrying the enable label set to true.
    #[arg(long, env = "VIGIL_LABEL_ENABLE")]
    pub label_enable: bool,

    /// Comma-separated list of container names to never update.
    #[arg(long, env = "VIGIL_DISABLE_CONTAINERS", value_delimiter = ',')]
    pub disable_containers: Vec<String>,

    /// Honor lifecycle hook labels on containers.
    #[arg(long, env = "VIGIL_LIFECYCLE_HOOKS")]
    pub enable_lifecycle_hooks: bool,

    /// Replace stale containers one at a time instead of in one batch.
    #[arg(long, env = "VIGIL_ROLLING_RESTART")]
    pub rolling_restart: bool,

    /// Only watch containers whose scope label matches this value.
    #[arg(long, env = "VIGIL_SCOPE", default_value = "")]
    pub scope: String,

    /// Let the depends-on label override runtime links instead of merging.
    #[arg(long, env = "VIGIL_LABEL_TAKE_PRECEDENCE")]
    pub label_take_precedence: bool,

    /// Include stopped and created containers in the candidate set.
    #[arg(long, env = "VIGIL_INCLUDE_STOPPED")]
    pub include_stopped: bool,

    /// Include restarting containers in the candidate set.
    #[arg(long, env = "VIGIL_INCLUDE_RESTARTING")]
    pub include_restarting: bool,

    /// Start replacement containers even when the original was stopped.
    #[arg(long, env = "VIGIL_REVIVE_STOPPED")]
    pub revive_stopped: bool,

    /// Purge anonymous volumes when removing a replaced container.
    #[arg(long, env = "VIGIL_REMOVE_VOLUMES")]
    pub remove_volumes: bool,

    /// Do not carry the memory-swappiness setting over to the replacement
    /// container. Required on runtimes that reject it, such as Podman.
    #[arg(long, env = "VIGIL_DISABLE_MEMORY_SWAPPINESS")]
    pub disable_memory_swappiness: bool,

    /// Enable the HTTP update trigger endpoint.
    #[arg(long, env = "VIGIL_HTTP_API_UPDATE")]
    pub http_api_update: bool,

    /// Enable the HTTP metrics endpoint.
    #[arg(long, env = "VIGIL_HTTP_API_METRICS")]
    pub http_api_metrics: bool,

    /// Bearer token required by the HTTP endpoints.
    #[arg(long, env = "VIGIL_HTTP_API_TOKEN", default_value = "")]
    pub http_api_token: String,

    /// Keep running periodic updates while the HTTP update API is enabled.
    #[arg(long, env = "VIGIL_HTTP_API_PERIODIC_POLLS")]
    pub http_api_periodic_polls: bool,

    /// When to warn about registries failing manifest HEAD requests.
    #[arg(long, env = "VIGIL_WARN_ON_HEAD_FAILURE", value_enum, default_value = "auto")]
    pub warn_on_head_failure: WarnStrategy,

    /// Per-container stop grace period in seconds.
    #[arg(long, env = "VIGIL_TIMEOUT", default_value_t = 10, allow_negative_numbers = true)]
    pub timeout: i64,

    /// Probe whether the process is healthy and exit. Must not be PID 1.
    #[arg(long)]
    pub health_check: bool,

    /// Do not send a startup notification batch.
    #[arg(long, env = "VIGIL_NO_STARTUP_MESSAGE")]
    pub no_startup_message: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the currently set VIGIL_* environment variables to a file so
    /// they can be carried over to a new deployment.
    NotifyUpgrade,
}

/// Warning behavior when a registry fails a manifest HEAD request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum WarnStrategy {
    /// Always log a warning before falling back to a full pull.
    Always,
    /// Warn only for registries known to support HEAD requests.
    Auto,
    /// Silently fall back to a full pull.
    Never,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}
