//! Lifecycle hook execution.
//!
//! Operators can attach commands to containers via labels; they run inside
//! the container through the runtime exec API at defined points of the
//! update cycle. A hook must exit zero to count as successful.

use log::{debug, error, info};

use crate::container::{Container, Hook};
use crate::runtime::{Client, RuntimeError};

#[derive(Debug, PartialEq, Eq)]
pub enum HookOutcome {
    /// No command configured for this hook.
    Absent,
    Completed,
    Failed(String),
}

/// Run a hook inside the container it is labeled on.
pub async fn run_hook(client: &dyn Client, container: &Container, hook: Hook) -> HookOutcome {
    run_hook_in(client, container, container.id(), hook).await
}

/// Run a hook sourced from `container`'s labels inside the container with
/// the given id. Post-update hooks execute in the replacement container,
/// which inherits the labels of the original.
pub async fn run_hook_in(
    client: &dyn Client,
    container: &Container,
    target_id: &str,
    hook: Hook,
) -> HookOutcome {
    let Some(command) = container.hook_command(hook) else {
        return HookOutcome::Absent;
    };
    let timeout = container.hook_timeout(hook);

    info!(
        "Executing {} command for {}: {command}",
        hook.name(),
        container.name()
    );

    match client.exec_command(target_id, command, timeout).await {
        Ok(0) => {
            debug!("{} command for {} succeeded", hook.name(), container.name());
            HookOutcome::Completed
        }
        Ok(code) => {
            error!(
                "{} command for {} exited with {code}",
                hook.name(),
                container.name()
            );
            HookOutcome::Failed(format!("{} command exited with {code}", hook.name()))
        }
        Err(e @ RuntimeError::ExecTimeout(_)) => {
            error!("{} command for {}: {e}", hook.name(), container.name());
            HookOutcome::Failed(format!("{} command timed out", hook.name()))
        }
        Err(e) => {
            error!(
                "Could not execute {} command for {}: {e}",
                hook.name(),
                container.name()
            );
            HookOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::testing::container;
    use crate::runtime::fake::FakeClient;

    #[tokio::test]
    async fn absent_hook_is_a_no_op() {
        let c = container("web", "nginx", &[], &[], true);
        let client = FakeClient::with(vec![c.clone()]);
        assert_eq!(run_hook(&client, &c, Hook::PreUpdate).await, HookOutcome::Absent);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn zero_exit_completes() {
        let c = container(
            "web",
            "nginx",
            &[(Hook::PreUpdate.label(), "/drain.sh")],
            &[],
            true,
        );
        let client = FakeClient::with(vec![c.clone()]);
        assert_eq!(
            run_hook(&client, &c, Hook::PreUpdate).await,
            HookOutcome::Completed
        );
        assert_eq!(client.calls(), vec!["exec id-web /drain.sh"]);
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let c = container(
            "web",
            "nginx",
            &[(Hook::PreUpdate.label(), "/drain.sh")],
            &[],
            true,
        );
        let client = FakeClient::with(vec![c.clone()]);
        client
            .exec_exit_codes
            .lock()
            .expect("poisoned mutex")
            .insert("/drain.sh".to_string(), 1);
        assert!(matches!(
            run_hook(&client, &c, Hook::PreUpdate).await,
            HookOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn hook_can_target_the_replacement_container() {
        let c = container(
            "web",
            "nginx",
            &[(Hook::PostUpdate.label(), "/warm-cache.sh")],
            &[],
            true,
        );
        let client = FakeClient::with(vec![c.clone()]);
        assert_eq!(
            run_hook_in(&client, &c, "new-id-web", Hook::PostUpdate).await,
            HookOutcome::Completed
        );
        assert_eq!(client.calls(), vec!["exec new-id-web /warm-cache.sh"]);
    }
}
