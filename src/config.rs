//! Tick-time configuration.
//!
//! All flags that influence an update session are collected once at startup
//! into an immutable `SessionParams` value that is passed into every session
//! call. Nothing here changes after boot.

use std::time::Duration;

use crate::cli::{Args, WarnStrategy};
use crate::runtime::ListParams;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("please specify a positive value for the timeout")]
    NegativeTimeout,
    #[error("rolling restarts are not compatible with the global monitor-only flag")]
    RollingMonitorOnly,
}

#[derive(Debug, Clone)]
pub struct SessionParams {
    pub cleanup: bool,
    pub no_restart: bool,
    pub monitor_only: bool,
    pub lifecycle_hooks: bool,
    pub rolling_restart: bool,
    pub label_precedence: bool,
    pub no_pull: bool,
    pub include_stopped: bool,
    pub include_restarting: bool,
    pub revive_stopped: bool,
    pub remove_volumes: bool,
    pub disable_memory_swappiness: bool,
    pub warn_on_head_failure: WarnStrategy,
    /// Grace period given to a container between SIGTERM and SIGKILL.
    pub timeout: Duration,
}

impl SessionParams {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.timeout < 0 {
            return Err(ConfigError::NegativeTimeout);
        }
        if args.rolling_restart && args.monitor_only {
            return Err(ConfigError::RollingMonitorOnly);
        }
        if args.monitor_only && args.no_pull {
            log::warn!(
                "Using no-pull and monitor-only simultaneously might lead to no action being taken at all. \
                 If this is intentional, you may safely ignore this message."
            );
        }

        Ok(Self {
            cleanup: args.cleanup,
            no_restart: args.no_restart,
            monitor_only: args.monitor_only,
            lifecycle_hooks: args.enable_lifecycle_hooks,
            rolling_restart: args.rolling_restart,
            label_precedence: args.label_take_precedence,
            no_pull: args.no_pull,
            include_stopped: args.include_stopped,
            include_restarting: args.include_restarting,
            revive_stopped: args.revive_stopped,
            remove_volumes: args.remove_volumes,
            disable_memory_swappiness: args.disable_memory_swappiness,
            warn_on_head_failure: args.warn_on_head_failure,
            timeout: Duration::from_secs(args.timeout as u64),
        })
    }

    pub fn list_params(&self) -> ListParams {
        ListParams {
            include_stopped: self.include_stopped,
            include_restarting: self.include_restarting,
        }
    }
}

#[cfg(test)]
impl Default for SessionParams {
    fn default() -> Self {
        Self {
            cleanup: false,
            no_restart: false,
            monitor_only: false,
            lifecycle_hooks: false,
            rolling_restart: false,
            label_precedence: false,
            no_pull: false,
            include_stopped: false,
            include_restarting: false,
            revive_stopped: false,
            remove_volumes: false,
            disable_memory_swappiness: false,
            warn_on_head_failure: WarnStrategy::Auto,
            timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn rolling_restart_rejects_monitor_only() {
        let args = Args::parse_from(["vigil", "--rolling-restart", "--monitor-only"]);
        assert!(matches!(
            SessionParams::from_args(&args),
            Err(ConfigError::RollingMonitorOnly)
        ));
    }

    #[test]
    fn negative_timeout_is_fatal() {
        let args = Args::parse_from(["vigil", "--timeout", "-1"]);
        assert!(matches!(
            SessionParams::from_args(&args),
            Err(ConfigError::NegativeTimeout)
        ));
    }

    #[test]
    fn defaults_pass_validation() {
        let args = Args::parse_from(["vigil"]);
        let params = SessionParams::from_args(&args).unwrap();
        assert!(!params.cleanup);
        assert_eq!(params.timeout, Duration::from_secs(10));
        assert_eq!(params.warn_on_head_failure, WarnStrategy::Auto);
    }
}
