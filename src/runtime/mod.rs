//! Container runtime client.
//!
//! The update session only talks to the runtime through the `Client` trait
//! so the whole cycle can be exercised against an in-memory fake. The real
//! implementation backed by the Docker Engine API lives in `docker`.

use std::time::Duration;

use async_trait::async_trait;

use crate::container::Container;

pub mod docker;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime API error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("container {0} has an incomplete configuration snapshot")]
    MissingConfig(String),
    #[error("container {0} has no image reference")]
    MissingImage(String),
    #[error("command in {0} did not report an exit code")]
    MissingExitCode(String),
    #[error("command in {0} exceeded its timeout")]
    ExecTimeout(String),
}

/// Snapshot predicate options for container enumeration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListParams {
    pub include_stopped: bool,
    pub include_restarting: bool,
}

#[async_trait]
pub trait Client: Send + Sync {
    /// Enumerate containers, including their image inspect data.
    async fn list_containers(&self, params: &ListParams) -> Result<Vec<Container>>;

    /// The id of the image currently stored locally under `reference`.
    async fn latest_image_id(&self, reference: &str) -> Result<String>;

    /// Pull `reference` from its registry through the daemon.
    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Stop a container, SIGTERM first and SIGKILL after `timeout`.
    async fn stop_container(&self, container: &Container, timeout: Duration) -> Result<()>;

    /// Start an existing container by id.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Remove a container, optionally purging its anonymous volumes.
    async fn remove_container(&self, container: &Container, remove_volumes: bool) -> Result<()>;

    /// Create a new container from `container`'s configuration snapshot,
    /// running `image`. Returns the new container id.
    async fn create_container(
        &self,
        container: &Container,
        image: &str,
        disable_memory_swappiness: bool,
    ) -> Result<String>;

    /// Remove an image by id. Fails while containers still reference it.
    async fn remove_image(&self, image_id: &str) -> Result<()>;

    /// Run a command inside the container with the given id and return its
    /// exit code.
    async fn exec_command(
        &self,
        container_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<i64>;
}
