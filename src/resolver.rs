//! Staleness resolution.
//!
//! Decides whether a container's running image differs from the newest one
//! available under the same reference. The cheap path is a registry HEAD
//! probe against the recorded repo digest; the expensive path is a full
//! pull followed by an image id comparison in the local store.

use log::{debug, info, warn};

use crate::cli::WarnStrategy;
use crate::config::SessionParams;
use crate::container::Container;
use crate::registry::{ImageRef, RegistryClient};
use crate::runtime::Client;

/// Outcome of a staleness check for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    UpToDate,
    Stale,
    PullFailed(String),
}

pub async fn resolve(
    client: &dyn Client,
    registry: &RegistryClient,
    container: &Container,
    params: &SessionParams,
) -> Freshness {
    let Some(reference) = container.image_ref() else {
        return Freshness::PullFailed("container has no image reference".to_string());
    };

    if container.is_no_pull(params.no_pull) {
        debug!("Skipping pull for {}", container.name());
        return compare_local(client, container, reference).await;
    }

    // HEAD probe first: if the published digest still matches what the
    // container was started from, the pull can be skipped entirely.
    if container.has_repo_digests() {
        match ImageRef::parse(reference) {
            Ok(image) => match registry.head_digest(&image).await {
                Ok(digest) if container.has_digest(&digest) => {
                    debug!("No new images found for {}", container.name());
                    return Freshness::UpToDate;
                }
                Ok(digest) => {
                    info!(
                        "Remote digest changed for {} ({digest}), pulling",
                        container.name()
                    );
                }
                Err(e) => {
                    if should_warn_on_head_failure(params.warn_on_head_failure, &image) {
                        warn!(
                            "Could not do a head request for {reference}, falling back to regular pull: {e}"
                        );
                    } else {
                        debug!("Could not do a head request for {reference}: {e}");
                    }
                }
            },
            Err(e) => debug!("Could not parse image reference {reference}: {e}"),
        }
    }

    if let Err(e) = client.pull_image(reference).await {
        return Freshness::PullFailed(e.to_string());
    }

    compare_local(client, container, reference).await
}

/// Compare the container's image id against the newest local image under
/// the same reference.
async fn compare_local(client: &dyn Client, container: &Container, reference: &str) -> Freshness {
    let latest = match client.latest_image_id(reference).await {
        Ok(id) => id,
        Err(e) => return Freshness::PullFailed(e.to_string()),
    };
    match container.image_id() {
        Some(current) if current == latest => Freshness::UpToDate,
        Some(_) => Freshness::Stale,
        None => Freshness::PullFailed("container has no image id".to_string()),
    }
}

fn should_warn_on_head_failure(strategy: WarnStrategy, image: &ImageRef) -> bool {
    match strategy {
        WarnStrategy::Always => true,
        WarnStrategy::Never => false,
        WarnStrategy::Auto => image.known_to_support_head(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::container;
    use crate::container::NO_PULL_LABEL;
    use crate::runtime::fake::FakeClient;

    #[tokio::test]
    async fn up_to_date_container_is_fresh() {
        let c = container("web", "nginx:latest", &[], &[], true);
        let client = FakeClient::with(vec![c.clone()]);
        let registry = RegistryClient::new();
        let params = SessionParams::default();

        let freshness = resolve(&client, &registry, &c, &params).await;
        assert_eq!(freshness, Freshness::UpToDate);
        assert_eq!(client.calls(), vec!["pull nginx:latest"]);
    }

    #[tokio::test]
    async fn new_image_id_means_stale() {
        let c = container("web", "nginx:latest", &[], &[], true);
        let client = FakeClient::with(vec![c.clone()]);
        client.publish_image("nginx:latest", "sha256:deadbeef");
        let registry = RegistryClient::new();
        let params = SessionParams::default();

        assert_eq!(resolve(&client, &registry, &c, &params).await, Freshness::Stale);
    }

    #[tokio::test]
    async fn no_pull_label_skips_registry() {
        let c = container("web", "nginx:latest", &[(NO_PULL_LABEL, "true")], &[], true);
        let client = FakeClient::with(vec![c.clone()]);
        let registry = RegistryClient::new();
        let params = SessionParams::default();

        assert_eq!(
            resolve(&client, &registry, &c, &params).await,
            Freshness::UpToDate
        );
        assert!(client.calls().is_empty(), "no pull should have happened");
    }

    #[tokio::test]
    async fn unknown_reference_is_a_pull_failure() {
        let c = container("web", "ghost:latest", &[], &[], true);
        let client = FakeClient::with(Vec::new());
        let registry = RegistryClient::new();
        let params = SessionParams::default();

        assert!(matches!(
            resolve(&client, &registry, &c, &params).await,
            Freshness::PullFailed(_)
        ));
    }

    #[test]
    fn head_warning_strategy() {
        let hub = ImageRef::parse("nginx").unwrap();
        let private = ImageRef::parse("registry.example.com/app").unwrap();
        assert!(should_warn_on_head_failure(WarnStrategy::Always, &private));
        assert!(!should_warn_on_head_failure(WarnStrategy::Never, &hub));
        assert!(should_warn_on_head_failure(WarnStrategy::Auto, &hub));
        assert!(!should_warn_on_head_failure(WarnStrategy::Auto, &private));
    }
}
