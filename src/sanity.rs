//! Pre-startup sanity checks.

use log::{info, warn};

use crate::container::Container;
use crate::runtime::{Client, ListParams, RuntimeError};

#[derive(Debug, thiserror::Error)]
pub enum SanityError {
    #[error(
        "found {0} supervisor instances in the same scope, expected at most one \
         (enable cleanup to remove excess instances)"
    )]
    MultipleInstances(usize),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Two supervisors in one scope race to update the same containers. With
/// cleanup enabled the newest instance survives and the rest are removed;
/// without it, starting up is refused.
pub async fn check_single_instance(
    client: &dyn Client,
    cleanup: bool,
    scope: &str,
) -> Result<(), SanityError> {
    let mut instances: Vec<Container> = client
        .list_containers(&ListParams::default())
        .await?
        .into_iter()
        .filter(|c| c.is_supervisor())
        .filter(|c| scope.is_empty() || c.scope() == Some(scope))
        .collect();

    if instances.len() <= 1 {
        return Ok(());
    }
    if !cleanup {
        return Err(SanityError::MultipleInstances(instances.len()));
    }

    // Creation timestamps are RFC 3339 and compare lexically.
    instances.sort_by(|a, b| a.created().cmp(&b.created()));
    let keep = instances.pop();

    for instance in &instances {
        warn!("Removing excess supervisor instance {}", instance.name());
        client.remove_container(instance, false).await?;
    }
    if let Some(keep) = keep {
        info!("Keeping supervisor instance {}", keep.name());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::container;
    use crate::container::{SCOPE_LABEL, SUPERVISOR_LABEL};
    use crate::runtime::fake::FakeClient;

    fn supervisor(name: &str, scope: Option<&str>) -> Container {
        let mut labels = vec![(SUPERVISOR_LABEL, "true")];
        if let Some(scope) = scope {
            labels.push((SCOPE_LABEL, scope));
        }
        container(name, "vigil:latest", &labels, &[], true)
    }

    #[tokio::test]
    async fn single_instance_passes() {
        let client = FakeClient::with(vec![
            supervisor("vigil", None),
            container("web", "nginx", &[], &[], true),
        ]);
        assert!(check_single_instance(&client, false, "").await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_instances_are_fatal_without_cleanup() {
        let client = FakeClient::with(vec![
            supervisor("vigil-1", None),
            supervisor("vigil-2", None),
        ]);
        assert!(matches!(
            check_single_instance(&client, false, "").await,
            Err(SanityError::MultipleInstances(2))
        ));
    }

    #[tokio::test]
    async fn cleanup_removes_all_but_one() {
        let client = FakeClient::with(vec![
            supervisor("vigil-1", None),
            supervisor("vigil-2", None),
        ]);
        assert!(check_single_instance(&client, true, "").await.is_ok());
        assert_eq!(client.mutating_calls().len(), 1);
    }

    #[tokio::test]
    async fn scopes_are_checked_independently() {
        let client = FakeClient::with(vec![
            supervisor("vigil-prod", Some("prod")),
            supervisor("vigil-dev", Some("dev")),
        ]);
        assert!(check_single_instance(&client, false, "prod").await.is_ok());
    }
}
