//! The update session: one end-to-end pass over the watched containers.
//!
//! A session snapshots the container set, resolves staleness, plans a safe
//! stop/start order and performs the replacements. Container-scoped errors
//! become verdicts and never abort the session; only failing to take the
//! snapshot does.

use std::collections::HashSet;

use log::{debug, error, info, warn};

use crate::config::SessionParams;
use crate::container::{Container, Hook};
use crate::filter::Filter;
use crate::lifecycle::{run_hook, run_hook_in, HookOutcome};
use crate::metrics::Metric;
use crate::notify::Notifier;
use crate::planner;
use crate::registry::RegistryClient;
use crate::resolver::{self, Freshness};
use crate::runtime::{Client, RuntimeError};

/// Final state of one container after a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Running the newest image, nothing to do.
    Fresh,
    /// A newer image exists but no action was taken (monitor only).
    Stale,
    /// Replaced with a container running the newest image.
    Updated,
    /// Not acted on this session, with the reason.
    Skipped(String),
    /// Action was attempted and went wrong.
    Failed(String),
}

#[derive(Debug)]
pub struct ContainerReport {
    pub name: String,
    pub image: String,
    pub verdict: Verdict,
}

#[derive(Debug, Default)]
pub struct Report {
    pub entries: Vec<ContainerReport>,
}

impl Report {
    pub fn metric(&self) -> Metric {
        let mut metric = Metric::default();
        for entry in &self.entries {
            match &entry.verdict {
                Verdict::Skipped(_) => continue,
                Verdict::Updated => {
                    metric.scanned += 1;
                    metric.updated += 1;
                }
                Verdict::Failed(_) => {
                    metric.scanned += 1;
                    metric.failed += 1;
                }
                Verdict::Fresh | Verdict::Stale => metric.scanned += 1,
            }
        }
        metric
    }

    pub fn stale_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.verdict == Verdict::Stale)
            .count()
    }
}

/// Run one update session over the containers matching `filter`.
pub async fn run(
    client: &dyn Client,
    registry: &RegistryClient,
    filter: &Filter,
    params: &SessionParams,
    notifier: &Notifier,
) -> Result<Report, RuntimeError> {
    // Snapshot. Containers appearing after this point are next session's
    // business.
    let containers: Vec<Container> = client
        .list_containers(&params.list_params())
        .await?
        .into_iter()
        .filter(|c| filter.matches(c))
        .collect();

    debug!("Checking {} containers for updated images", containers.len());

    // Resolve staleness for every container, monitor-only included.
    let mut verdicts = Vec::with_capacity(containers.len());
    let mut stale = vec![false; containers.len()];
    for (i, container) in containers.iter().enumerate() {
        let verdict = match resolver::resolve(client, registry, container, params).await {
            Freshness::UpToDate => Verdict::Fresh,
            Freshness::Stale => {
                info!("Found new image for {container}");
                if container.is_monitor_only(params.monitor_only) {
                    notifier.record(format!("Monitor only: {container} has a new image"));
                } else if !container.verify_configuration() {
                    warn!("Cannot recreate {container}: incomplete configuration snapshot");
                    verdicts.push(entry(
                        container,
                        Verdict::Skipped("incomplete configuration snapshot".to_string()),
                    ));
                    continue;
                } else {
                    stale[i] = true;
                }
                Verdict::Stale
            }
            Freshness::PullFailed(reason) => {
                warn!("Could not check {container} for updates: {reason}");
                Verdict::Skipped(reason)
            }
        };
        verdicts.push(entry(container, verdict));
    }

    // Report-only short-circuit.
    if params.monitor_only {
        return Ok(Report { entries: verdicts });
    }

    if !stale.iter().any(|&s| s) {
        debug!("No stale containers found");
        return Ok(Report { entries: verdicts });
    }

    // Hooks only ever run on containers flagged for replacement.
    if params.lifecycle_hooks {
        for (i, container) in containers.iter().enumerate() {
            if stale[i] {
                run_hook(client, container, Hook::PreCheck).await;
            }
        }
    }

    let full_plan = planner::plan(&containers, params.label_precedence);
    for &i in &full_plan.cycle {
        if stale[i] {
            warn!("{} is part of a dependency cycle, not updating", containers[i].name());
            verdicts[i].verdict = Verdict::Failed("dependency cycle".to_string());
            stale[i] = false;
        }
    }

    // Every stale container may have sat on a cycle; nothing left to do then.
    if !stale.iter().any(|&s| s) {
        return Ok(Report { entries: verdicts });
    }

    if params.rolling_restart {
        let groups = planner::rolling_groups(&containers, &stale, params.label_precedence);
        let mut replaced = vec![false; containers.len()];
        for group in groups {
            // A stale container may already have been replaced as a
            // dependent in an earlier group.
            let seed_pending = group.iter().any(|&i| stale[i] && !replaced[i]);
            if !seed_pending {
                continue;
            }
            update_batch(client, &containers, &group, &stale, &mut verdicts, params, notifier)
                .await;
            for &i in &group {
                if stale[i] {
                    replaced[i] = true;
                }
            }
        }
    } else {
        update_batch(
            client,
            &containers,
            &full_plan.stop_order,
            &stale,
            &mut verdicts,
            params,
            notifier,
        )
        .await;
    }

    if params.cleanup {
        cleanup_images(client, &containers, &verdicts).await;
    }

    Ok(Report { entries: verdicts })
}

fn entry(container: &Container, verdict: Verdict) -> ContainerReport {
    ContainerReport {
        name: container.name().to_string(),
        image: container.image_ref().unwrap_or_default().to_string(),
        verdict,
    }
}

/// Stop the given containers in order, then bring them back up in reverse:
/// stale members are recreated from their new image, fresh members restart
/// from their unchanged configuration.
async fn update_batch(
    client: &dyn Client,
    containers: &[Container],
    stop_order: &[usize],
    stale: &[bool],
    verdicts: &mut [ContainerReport],
    params: &SessionParams,
    notifier: &Notifier,
) {
    let mut stopped = Vec::with_capacity(stop_order.len());

    for &i in stop_order {
        let container = &containers[i];

        // A failing pre-update hook vetoes the replacement before the
        // container is touched.
        if stale[i] && params.lifecycle_hooks {
            if let HookOutcome::Failed(reason) =
                run_hook(client, container, Hook::PreUpdate).await
            {
                warn!("Skipping update of {}: {reason}", container.name());
                notifier.record(format!("Skipped {}: {reason}", container.name()));
                verdicts[i].verdict = Verdict::Skipped(reason);
                continue;
            }
        }

        if container.is_running() || container.is_restarting() {
            info!("Stopping {container}");
            if let Err(e) = client.stop_container(container, params.timeout).await {
                error!("Could not stop {}: {e}", container.name());
                verdicts[i].verdict = Verdict::Failed(e.to_string());
                continue;
            }
        }
        stopped.push(i);
    }

    for &i in stopped.iter().rev() {
        let container = &containers[i];
        if stale[i] {
            replace_container(client, container, &mut verdicts[i], params, notifier).await;
        } else if container.is_running() || params.revive_stopped {
            debug!("Starting {container}");
            if let Err(e) = client.start_container(container.id()).await {
                error!("Could not restart {}: {e}", container.name());
                verdicts[i].verdict = Verdict::Failed(e.to_string());
            }
        }
    }
}

/// Remove one stopped stale container and bring up its replacement from the
/// latest image. Any failure after removal attempts a best-effort restore
/// of the original configuration.
async fn replace_container(
    client: &dyn Client,
    container: &Container,
    report: &mut ContainerReport,
    params: &SessionParams,
    notifier: &Notifier,
) {
    let Some(image) = container.image_ref() else {
        report.verdict = Verdict::Failed("container has no image reference".to_string());
        return;
    };
    let was_running = container.is_running();

    if let Err(e) = client.remove_container(container, params.remove_volumes).await {
        error!("Could not remove {}: {e}", container.name());
        report.verdict = Verdict::Failed(e.to_string());
        return;
    }

    if params.no_restart {
        info!("Removed {container}, not restarting");
        notifier.record(format!("Removed {} (no restart)", container.name()));
        report.verdict = Verdict::Updated;
        return;
    }

    let new_id = match client
        .create_container(container, image, params.disable_memory_swappiness)
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!("Could not create replacement for {}: {e}", container.name());
            restore_original(client, container, was_running, params).await;
            report.verdict = Verdict::Failed(e.to_string());
            return;
        }
    };

    if was_running || params.revive_stopped {
        if let Err(e) = client.start_container(&new_id).await {
            error!("Could not start replacement for {}: {e}", container.name());
            report.verdict = Verdict::Failed(e.to_string());
            return;
        }
    }

    if params.lifecycle_hooks {
        // Reported but never rolled back; the new container is already up.
        if let HookOutcome::Failed(reason) =
            run_hook_in(client, container, &new_id, Hook::PostUpdate).await
        {
            notifier.record(format!("{}: {reason}", container.name()));
        }
        run_hook_in(client, container, &new_id, Hook::PostCheck).await;
    }

    info!("Updated {container}");
    notifier.record(format!("Updated {} ({image})", container.name()));
    report.verdict = Verdict::Updated;
}

/// The old container is already gone; put its original configuration back
/// so a failed update does not leave a hole. Errors are logged only.
async fn restore_original(
    client: &dyn Client,
    container: &Container,
    was_running: bool,
    params: &SessionParams,
) {
    let Some(original_image) = container.image_id() else {
        return;
    };
    match client
        .create_container(container, original_image, params.disable_memory_swappiness)
        .await
    {
        Ok(id) => {
            if was_running || params.revive_stopped {
                if let Err(e) = client.start_container(&id).await {
                    error!("Could not restart original {}: {e}", container.name());
                }
            }
        }
        Err(e) => error!("Could not restore original {}: {e}", container.name()),
    }
}

/// Remove the images updated containers no longer reference.
async fn cleanup_images(client: &dyn Client, containers: &[Container], verdicts: &[ContainerReport]) {
    let mut image_ids = HashSet::new();
    for (container, report) in containers.iter().zip(verdicts) {
        if report.verdict == Verdict::Updated {
            if let Some(id) = container.image_id() {
                image_ids.insert(id.to_string());
            }
        }
    }
    for image_id in image_ids {
        info!("Removing image {image_id}");
        if let Err(e) = client.remove_image(&image_id).await {
            warn!("Could not remove image {image_id}: {e}");
        }
    }
}
