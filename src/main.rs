use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

mod api;
mod cli;
mod config;
mod container;
mod filter;
mod lifecycle;
mod metrics;
mod notify;
mod planner;
mod registry;
mod resolver;
mod runtime;
mod sanity;
mod scheduler;
mod session;
mod signals;

use cli::{Args, Command};
use config::SessionParams;
use notify::Notifier;
use scheduler::Updater;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli::get_cli_args();

    if let Some(Command::NotifyUpgrade) = &args.command {
        return notify_upgrade();
    }

    if args.health_check {
        // The health check is a transient probe process, never the
        // supervisor itself.
        if std::process::id() == 1 {
            log::error!("The health check flag should never be passed to the main supervisor process");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let params = match SessionParams::from_args(args) {
        Ok(params) => params,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if !args.scope.is_empty() {
        log::debug!("Using scope {:?}", args.scope);
    }

    let schedule = if args.schedule.is_empty() {
        None
    } else {
        match cron::Schedule::from_str(&args.schedule) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                log::error!("Invalid schedule {:?}: {e}", args.schedule);
                return ExitCode::FAILURE;
            }
        }
    };

    let client = match runtime::docker::DockerClient::connect() {
        Ok(client) => client,
        Err(e) => {
            log::error!("Could not connect to the container runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let filter = filter::Filter::build(
        args.containers.clone(),
        args.disable_containers.clone(),
        args.label_enable,
        args.scope.clone(),
    );
    let filter_desc = filter.describe();

    let metrics = Arc::new(metrics::MetricsRegistry::new());
    let updater = Arc::new(Updater {
        client: Box::new(client),
        registry: registry::RegistryClient::new(),
        filter,
        params: params.clone(),
        lock: scheduler::UpdateLock::new(),
        metrics: Arc::clone(&metrics),
        notifier: Notifier::new(),
    });

    if args.run_once {
        write_startup_message(&updater.notifier, &filter_desc, None, args);
        updater.try_run(None).await;
        return ExitCode::SUCCESS;
    }

    if let Err(e) =
        sanity::check_single_instance(updater.client.as_ref(), params.cleanup, &args.scope).await
    {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    let shutdown = Arc::new(tokio::sync::Notify::new());
    signals::handle_termination(Arc::clone(&shutdown));

    let state = Arc::new(api::ApiState {
        token: args.http_api_token.clone(),
        updater: args.http_api_update.then(|| Arc::clone(&updater)),
        metrics: args.http_api_metrics.then(|| Arc::clone(&metrics)),
    });

    // With the update API enabled and periodic polls off, the HTTP trigger
    // is the only session source and the server runs in the foreground.
    if args.http_api_update && !args.http_api_periodic_polls {
        write_startup_message(&updater.notifier, &filter_desc, None, args);
        tokio::select! {
            result = api::serve(state) => {
                if let Err(e) = result {
                    log::error!("Failed to start API: {e}");
                }
            }
            _ = shutdown.notified() => {
                log::info!("Waiting for running update to be finished...");
                updater.lock.drain().await;
            }
        }
        return ExitCode::FAILURE;
    }

    if args.http_api_update || args.http_api_metrics {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = api::serve(state).await {
                log::error!("Failed to start API: {e}");
            }
        });
    }

    match schedule {
        Some(schedule) => {
            let first_run = schedule.upcoming(Utc).next();
            write_startup_message(&updater.notifier, &filter_desc, first_run, args);
            scheduler::run_on_schedule(Arc::clone(&updater), schedule, shutdown).await;
        }
        None => {
            write_startup_message(&updater.notifier, &filter_desc, None, args);
            shutdown.notified().await;
            log::info!("Waiting for running update to be finished...");
            updater.lock.drain().await;
        }
    }
    ExitCode::FAILURE
}

/// Batch up the startup messages so they arrive as a single notification.
fn write_startup_message(
    notifier: &Notifier,
    filtering: &str,
    first_run: Option<DateTime<Utc>>,
    args: &Args,
) {
    let batch = (!args.no_startup_message).then(|| notifier.begin());

    notifier.record(format!("vigil {}", env!("CARGO_PKG_VERSION")));
    notifier.record(filtering);

    match first_run {
        Some(at) => {
            notifier.record(format!("Scheduling first run: {at}"));
            let until = format_duration(at - Utc::now());
            notifier.record(format!("Note that the first check will be performed in {until}"));
        }
        None if args.run_once => notifier.record("Running a one time update."),
        None => notifier.record("Periodic runs are not enabled."),
    }

    if args.http_api_update {
        notifier.record(format!("The HTTP API is enabled at :{}.", api::LISTEN_PORT));
    }

    drop(batch);
}

/// Humanize a delay for the startup message, e.g. "1 hour, 10 seconds".
fn format_duration(duration: chrono::Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut parts = Vec::new();
    match hours {
        0 => {}
        1 => parts.push("1 hour".to_string()),
        n => parts.push(format!("{n} hours")),
    }
    match minutes {
        0 => {}
        1 => parts.push("1 minute".to_string()),
        n => parts.push(format!("{n} minutes")),
    }
    match seconds {
        1 => parts.push("1 second".to_string()),
        n if n > 0 || parts.is_empty() => parts.push(format!("{n} seconds")),
        _ => {}
    }
    parts.join(", ")
}

/// Dump the recognized environment variables to a file so an operator can
/// carry them over to a new deployment.
fn notify_upgrade() -> ExitCode {
    let vars: Vec<String> = std::env::vars()
        .filter(|(key, _)| key.starts_with("VIGIL_"))
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    let body = vars.join("\n") + "\n";

    for path in ["/vigil-upgrade.env", "vigil-upgrade.env"] {
        match std::fs::write(path, &body) {
            Ok(()) => {
                log::info!("Wrote {} environment variables to {path}", vars.len());
                return ExitCode::SUCCESS;
            }
            Err(e) => log::debug!("Could not write {path}: {e}"),
        }
    }
    log::error!("Could not write the upgrade environment file");
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::format_duration;

    #[test]
    fn durations_are_humanized() {
        assert_eq!(format_duration(chrono::Duration::seconds(0)), "0 seconds");
        assert_eq!(format_duration(chrono::Duration::seconds(1)), "1 second");
        assert_eq!(
            format_duration(chrono::Duration::seconds(3661)),
            "1 hour, 1 minute, 1 second"
        );
        assert_eq!(
            format_duration(chrono::Duration::seconds(3610)),
            "1 hour, 10 seconds"
        );
    }
}
