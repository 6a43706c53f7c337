//! Docker Engine implementation of the runtime client, via bollard.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, NetworkingConfig,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::Docker;
use futures_util::StreamExt;
use log::{debug, warn};

use super::{Client, ListParams, Result, RuntimeError};
use crate::container::Container;

pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connect to the local daemon: unix socket on Linux, named pipe on
    /// Windows.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    async fn snapshot_container(&self, id: &str) -> Result<Container> {
        let info = self.docker.inspect_container(id, None).await?;
        let image_info = match info.config.as_ref().and_then(|c| c.image.as_deref()) {
            Some(image) => match self.docker.inspect_image(image).await {
                Ok(inspect) => Some(inspect),
                Err(e) => {
                    debug!("Could not inspect image of container {id}: {e}");
                    None
                }
            },
            None => None,
        };
        Ok(Container::new(info, image_info))
    }
}

#[async_trait]
impl Client for DockerClient {
    async fn list_containers(&self, params: &ListParams) -> Result<Vec<Container>> {
        let mut statuses = vec!["running".to_string()];
        if params.include_stopped {
            statuses.push("created".to_string());
            statuses.push("exited".to_string());
        }
        if params.include_restarting {
            statuses.push("restarting".to_string());
        }

        let mut filters = HashMap::new();
        filters.insert("status".to_string(), statuses);

        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            // A container can disappear between the list and the inspect;
            // it simply misses this session's snapshot.
            match self.snapshot_container(&id).await {
                Ok(container) => containers.push(container),
                Err(e) => debug!("Skipping container {id}: {e}"),
            }
        }
        Ok(containers)
    }

    async fn latest_image_id(&self, reference: &str) -> Result<String> {
        let inspect = self.docker.inspect_image(reference).await?;
        inspect
            .id
            .ok_or_else(|| RuntimeError::MissingImage(reference.to_string()))
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        debug!("Pulling {reference}");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions::<String> {
                from_image: reference.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    async fn stop_container(&self, container: &Container, timeout: Duration) -> Result<()> {
        let result = self
            .docker
            .stop_container(
                container.id(),
                Some(StopContainerOptions {
                    t: timeout.as_secs() as i64,
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            // 304: the container was already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container: &Container, remove_volumes: bool) -> Result<()> {
        self.docker
            .remove_container(
                container.id(),
                Some(RemoveContainerOptions {
                    force: true,
                    v: remove_volumes,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn create_container(
        &self,
        container: &Container,
        image: &str,
        disable_memory_swappiness: bool,
    ) -> Result<String> {
        let info = container.info();
        let snapshot = info
            .config
            .clone()
            .ok_or_else(|| RuntimeError::MissingConfig(container.name().to_string()))?;
        let mut host_config = info
            .host_config
            .clone()
            .ok_or_else(|| RuntimeError::MissingConfig(container.name().to_string()))?;

        if disable_memory_swappiness {
            host_config.memory_swappiness = None;
        }

        let networking_config = info
            .network_settings
            .as_ref()
            .and_then(|ns| ns.networks.clone())
            .map(|endpoints_config| NetworkingConfig { endpoints_config });

        let config = Config::<String> {
            hostname: snapshot.hostname,
            domainname: snapshot.domainname,
            user: snapshot.user,
            exposed_ports: snapshot.exposed_ports,
            tty: snapshot.tty,
            env: snapshot.env,
            cmd: snapshot.cmd,
            healthcheck: snapshot.healthcheck,
            image: Some(image.to_string()),
            volumes: snapshot.volumes,
            working_dir: snapshot.working_dir,
            entrypoint: snapshot.entrypoint,
            labels: snapshot.labels,
            stop_signal: snapshot.stop_signal,
            stop_timeout: snapshot.stop_timeout,
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container.name().to_string(),
                    platform: None,
                }),
                config,
            )
            .await?;

        for warning in response.warnings {
            warn!("Creating {}: {warning}", container.name());
        }
        Ok(response.id)
    }

    async fn remove_image(&self, image_id: &str) -> Result<()> {
        self.docker
            .remove_image(
                image_id,
                Some(RemoveImageOptions {
                    force: false,
                    ..Default::default()
                }),
                None,
            )
            .await?;
        Ok(())
    }

    async fn exec_command(
        &self,
        container_id: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<i64> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions::<String> {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let drain = async {
            match self.docker.start_exec(&exec.id, None).await? {
                StartExecResults::Attached { mut output, .. } => {
                    while let Some(chunk) = output.next().await {
                        match chunk {
                            Ok(line) => debug!("{container_id}: {line}"),
                            Err(e) => return Err(RuntimeError::from(e)),
                        }
                    }
                    Ok(())
                }
                StartExecResults::Detached => Ok(()),
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(result) => result?,
            Err(_) => return Err(RuntimeError::ExecTimeout(container_id.to_string())),
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        inspect
            .exit_code
            .ok_or_else(|| RuntimeError::MissingExitCode(container_id.to_string()))
    }
}
