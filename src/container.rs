//! In-memory view of one runtime container.
//!
//! A `Container` wraps the daemon's inspect payload for the container and
//! for the image it was created from, and derives everything the update
//! cycle needs from labels. It is immutable for the lifetime of one update
//! session; the next session takes a fresh snapshot.

use std::collections::HashMap;
use std::time::Duration;

use bollard::models::{ContainerInspectResponse, ContainerStateStatusEnum, ImageInspect};

use crate::registry::Digest;

pub const LABEL_PREFIX: &str = "dev.vigil.";

pub const ENABLE_LABEL: &str = "dev.vigil.enable";
pub const SCOPE_LABEL: &str = "dev.vigil.scope";
pub const DEPENDS_ON_LABEL: &str = "dev.vigil.depends-on";
pub const NO_PULL_LABEL: &str = "dev.vigil.no-pull";
pub const MONITOR_ONLY_LABEL: &str = "dev.vigil.monitor-only";
pub const SUPERVISOR_LABEL: &str = "dev.vigil.supervisor";

const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(60);

/// A lifecycle point at which an operator-supplied command may run inside
/// the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    PreCheck,
    PreUpdate,
    PostUpdate,
    PostCheck,
}

impl Hook {
    pub fn label(self) -> &'static str {
        match self {
            Hook::PreCheck => "dev.vigil.lifecycle.pre-check",
            Hook::PreUpdate => "dev.vigil.lifecycle.pre-update",
            Hook::PostUpdate => "dev.vigil.lifecycle.post-update",
            Hook::PostCheck => "dev.vigil.lifecycle.post-check",
        }
    }

    pub fn timeout_label(self) -> &'static str {
        match self {
            Hook::PreCheck => "dev.vigil.lifecycle.pre-check.timeout",
            Hook::PreUpdate => "dev.vigil.lifecycle.pre-update.timeout",
            Hook::PostUpdate => "dev.vigil.lifecycle.post-update.timeout",
            Hook::PostCheck => "dev.vigil.lifecycle.post-check.timeout",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Hook::PreCheck => "pre-check",
            Hook::PreUpdate => "pre-update",
            Hook::PostUpdate => "post-update",
            Hook::PostCheck => "post-check",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    info: ContainerInspectResponse,
    image_info: Option<ImageInspect>,
}

impl Container {
    pub fn new(info: ContainerInspectResponse, image_info: Option<ImageInspect>) -> Self {
        Self { info, image_info }
    }

    pub fn id(&self) -> &str {
        self.info.id.as_deref().unwrap_or_default()
    }

    /// Human name without the leading slash the daemon prepends.
    pub fn name(&self) -> &str {
        self.info
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or_default()
    }

    /// The image reference (repository + tag) the container was started
    /// from, as recorded in its configuration.
    pub fn image_ref(&self) -> Option<&str> {
        self.info.config.as_ref().and_then(|c| c.image.as_deref())
    }

    /// The content-addressed id of the image the container currently runs.
    pub fn image_id(&self) -> Option<&str> {
        self.info.image.as_deref()
    }

    pub fn created(&self) -> Option<&str> {
        self.info.created.as_deref()
    }

    pub fn info(&self) -> &ContainerInspectResponse {
        &self.info
    }

    pub fn image_info(&self) -> Option<&ImageInspect> {
        self.image_info.as_ref()
    }

    fn status(&self) -> Option<ContainerStateStatusEnum> {
        self.info.state.as_ref().and_then(|s| s.status)
    }

    pub fn is_running(&self) -> bool {
        self.status() == Some(ContainerStateStatusEnum::RUNNING)
    }

    pub fn is_restarting(&self) -> bool {
        self.status() == Some(ContainerStateStatusEnum::RESTARTING)
    }

    pub fn labels(&self) -> Option<&HashMap<String, String>> {
        self.info.config.as_ref().and_then(|c| c.labels.as_ref())
    }

    fn label(&self, name: &str) -> Option<&str> {
        self.labels().and_then(|l| l.get(name)).map(String::as_str)
    }

    fn label_bool(&self, name: &str) -> Option<bool> {
        self.label(name).and_then(|v| v.parse().ok())
    }

    /// The explicit enable label, if any. `Some(false)` is an operator
    /// opt-out and always excludes the container.
    pub fn enabled(&self) -> Option<bool> {
        self.label_bool(ENABLE_LABEL)
    }

    pub fn scope(&self) -> Option<&str> {
        self.label(SCOPE_LABEL)
    }

    /// Whether this container is another instance of the supervisor.
    pub fn is_supervisor(&self) -> bool {
        self.label_bool(SUPERVISOR_LABEL).unwrap_or(false)
    }

    pub fn is_monitor_only(&self, global: bool) -> bool {
        global || self.label_bool(MONITOR_ONLY_LABEL).unwrap_or(false)
    }

    pub fn is_no_pull(&self, global: bool) -> bool {
        global || self.label_bool(NO_PULL_LABEL).unwrap_or(false)
    }

    /// Names from the `depends-on` label, comma separated.
    pub fn depends_on(&self) -> Vec<String> {
        self.label(DEPENDS_ON_LABEL)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| s.trim_start_matches('/').to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of containers this one is linked to in the legacy runtime
    /// configuration. Entries look like "/db:/web/db".
    pub fn links(&self) -> Vec<String> {
        self.info
            .host_config
            .as_ref()
            .and_then(|hc| hc.links.as_ref())
            .map(|links| {
                links
                    .iter()
                    .filter_map(|l| l.split(':').next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The dependency names the planner should honor. The label wins
    /// outright under label precedence, otherwise the union is used.
    pub fn dependency_names(&self, label_precedence: bool) -> Vec<String> {
        let labeled = self.depends_on();
        if label_precedence && !labeled.is_empty() {
            return labeled;
        }
        let mut names = labeled;
        for link in self.links() {
            if !names.contains(&link) {
                names.push(link);
            }
        }
        names
    }

    pub fn hook_command(&self, hook: Hook) -> Option<&str> {
        self.label(hook.label()).filter(|c| !c.is_empty())
    }

    pub fn hook_timeout(&self, hook: Hook) -> Duration {
        self.label(hook.timeout_label())
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HOOK_TIMEOUT)
    }

    /// Whether the digest is among the repo digests recorded for the image
    /// this container was started from.
    pub fn has_digest(&self, digest: &Digest) -> bool {
        self.image_info
            .as_ref()
            .and_then(|i| i.repo_digests.as_ref())
            .map(|digests| {
                digests
                    .iter()
                    .filter_map(|d| d.split('@').nth(1))
                    .any(|d| d == digest.as_str())
            })
            .unwrap_or(false)
    }

    /// Whether the image inspect payload carries any repo digest at all.
    /// Locally built images have none, and a HEAD probe is pointless then.
    pub fn has_repo_digests(&self) -> bool {
        self.image_info
            .as_ref()
            .and_then(|i| i.repo_digests.as_ref())
            .map(|d| !d.is_empty())
            .unwrap_or(false)
    }

    /// A container snapshot is only usable for recreation when the daemon
    /// returned its configuration sections.
    pub fn verify_configuration(&self) -> bool {
        self.info.config.is_some() && self.info.host_config.is_some()
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.image_ref().unwrap_or("<none>"))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use bollard::models::{ContainerConfig, ContainerState, HostConfig};

    /// Build a container snapshot for tests. `labels` are raw key/value
    /// pairs, `links` use the daemon's "/dep:/name/alias" form.
    pub fn container(
        name: &str,
        image: &str,
        labels: &[(&str, &str)],
        links: &[&str],
        running: bool,
    ) -> Container {
        let labels: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let info = ContainerInspectResponse {
            id: Some(format!("id-{name}")),
            name: Some(format!("/{name}")),
            created: Some("2024-01-01T00:00:00Z".to_string()),
            image: Some(format!("sha256:{:0>64}", name.len())),
            state: Some(ContainerState {
                status: Some(if running {
                    ContainerStateStatusEnum::RUNNING
                } else {
                    ContainerStateStatusEnum::EXITED
                }),
                running: Some(running),
                ..Default::default()
            }),
            config: Some(ContainerConfig {
                image: Some(image.to_string()),
                labels: Some(labels),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                links: if links.is_empty() {
                    None
                } else {
                    Some(links.iter().map(|l| l.to_string()).collect())
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        Container::new(info, None)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::container;
    use super::*;

    #[test]
    fn name_is_trimmed() {
        let c = container("web", "nginx:latest", &[], &[], true);
        assert_eq!(c.name(), "web");
        assert_eq!(c.image_ref(), Some("nginx:latest"));
        assert!(c.is_running());
    }

    #[test]
    fn depends_on_label_is_split_and_trimmed() {
        let c = container(
            "web",
            "nginx",
            &[(DEPENDS_ON_LABEL, "db, cache ,,/queue")],
            &[],
            true,
        );
        assert_eq!(c.depends_on(), vec!["db", "cache", "queue"]);
    }

    #[test]
    fn links_are_parsed_from_host_config() {
        let c = container("web", "nginx", &[], &["/db:/web/db"], true);
        assert_eq!(c.links(), vec!["db"]);
    }

    #[test]
    fn label_precedence_drops_links() {
        let c = container(
            "web",
            "nginx",
            &[(DEPENDS_ON_LABEL, "db")],
            &["/cache:/web/cache"],
            true,
        );
        assert_eq!(c.dependency_names(true), vec!["db"]);
        let mut union = c.dependency_names(false);
        union.sort();
        assert_eq!(union, vec!["cache", "db"]);
    }

    #[test]
    fn hook_timeout_defaults_to_a_minute() {
        let c = container(
            "job",
            "worker",
            &[
                (Hook::PreUpdate.label(), "/scripts/drain.sh"),
                (Hook::PreUpdate.timeout_label(), "120"),
            ],
            &[],
            true,
        );
        assert_eq!(c.hook_command(Hook::PreUpdate), Some("/scripts/drain.sh"));
        assert_eq!(c.hook_timeout(Hook::PreUpdate), Duration::from_secs(120));
        assert_eq!(c.hook_timeout(Hook::PostUpdate), Duration::from_secs(60));
    }

    #[test]
    fn monitor_only_and_no_pull_overrides() {
        let c = container("web", "nginx", &[(MONITOR_ONLY_LABEL, "true")], &[], true);
        assert!(c.is_monitor_only(false));
        assert!(!c.is_no_pull(false));
        assert!(c.is_no_pull(true));
    }
}
