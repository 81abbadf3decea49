use crate::image_reference::ImageReference;
use crate::routing::RoutingNetwork;
use anyhow::Context;
use async_trait::async_trait;
use bollard::Docker;
use bollard::models::EndpointSettings;
use bollard::query_parameters::{
    ListNetworksOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Docker(#[from] bollard::errors::Error),
    #[error("{0}")]
    Engine(String),
}

/// A container currently known to the engine under some name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningContainer {
    pub id: String,
    pub image_id: String,
    pub running: bool,
}

/// Everything needed to create the replacement container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub network: RoutingNetwork,
}

/// The container engine operations a deployment needs, and nothing more.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers, running or not, whose name is exactly `name`.
    async fn list_containers(&self, name: &str) -> Result<Vec<RunningContainer>, RuntimeError>;

    /// Repository digests of the image with id `image_id`.
    async fn inspect_image(&self, image_id: &str) -> Result<Vec<String>, RuntimeError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Resolves only after the engine has finished the pull.
    async fn pull_image(&self, reference: &ImageReference) -> Result<(), RuntimeError>;

    /// Returns the id of the created container.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
}

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub async fn connect() -> anyhow::Result<Self> {
        info!("Connecting to the Docker engine");
        let docker =
            Docker::connect_with_local_defaults().context("Failed to create Docker client")?;
        let version = docker
            .version()
            .await
            .context("Failed to reach the Docker engine")?;
        info!(
            "Connected to Docker engine {} (API {})",
            version.version.as_deref().unwrap_or("unknown"),
            version.api_version.as_deref().unwrap_or("unknown")
        );
        Ok(Self { docker })
    }

    /// Networks whose name contains `name`; the engine filter is not exact.
    pub async fn find_networks(&self, name: &str) -> Result<Vec<RoutingNetwork>, RuntimeError> {
        let options = ListNetworksOptions {
            filters: Some(HashMap::from([(
                "name".to_string(),
                vec![name.to_string()],
            )])),
        };

        let networks = self.docker.list_networks(Some(options)).await?;
        Ok(networks
            .into_iter()
            .filter_map(|network| {
                Some(RoutingNetwork {
                    id: network.id?,
                    name: network.name?,
                })
            })
            .collect())
    }
}

/// Seconds for the engine's stop timeout; the engine reads negative values as "wait forever".
fn stop_timeout(grace: Duration) -> i32 {
    i32::try_from(grace.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, name: &str) -> Result<Vec<RunningContainer>, RuntimeError> {
        #[allow(deprecated)]
        let options = bollard::container::ListContainersOptions {
            all: true,
            filters: HashMap::from([("name".to_string(), vec![format!("^/{}$", name)])]),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        let expected = format!("/{}", name);

        Ok(containers
            .into_iter()
            .filter(|container| {
                container
                    .names
                    .as_ref()
                    .is_some_and(|names| names.iter().any(|n| *n == expected))
            })
            .filter_map(|container| {
                let running = container
                    .state
                    .as_ref()
                    .is_some_and(|state| state.to_string() == "running");
                Some(RunningContainer {
                    id: container.id?,
                    image_id: container.image_id.unwrap_or_default(),
                    running,
                })
            })
            .collect())
    }

    async fn inspect_image(&self, image_id: &str) -> Result<Vec<String>, RuntimeError> {
        let image = self.docker.inspect_image(image_id).await?;
        Ok(image.repo_digests.unwrap_or_default())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: Some(stop_timeout(grace)),
            ..Default::default()
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!("Container {} was already stopped", id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(id, None::<RemoveContainerOptions>)
            .await?;
        Ok(())
    }

    async fn pull_image(&self, reference: &ImageReference) -> Result<(), RuntimeError> {
        let from_image = reference.name();

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: from_image.as_str(),
            tag: reference.tag.as_str(),
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .create_image(Some(options), None, None::<bollard::auth::DockerCredentials>);

        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(status) = info.status {
                debug!("Pulling {}: {}", reference, status);
            }
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let endpoints = HashMap::from([(
            spec.network.name.clone(),
            EndpointSettings {
                network_id: Some(spec.network.id.clone()),
                ..Default::default()
            },
        )]);

        #[allow(deprecated)]
        let config = bollard::container::Config {
            image: Some(spec.image.clone()),
            labels: Some(spec.labels.clone()),
            networking_config: Some(bollard::container::NetworkingConfig {
                endpoints_config: endpoints,
            }),
            ..Default::default()
        };

        #[allow(deprecated)]
        let options = bollard::container::CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        #[allow(deprecated)]
        let created = self.docker.create_container(Some(options), config).await?;
        if created.id.is_empty() {
            return Err(RuntimeError::Engine(format!(
                "engine returned no id for container {}",
                spec.name
            )));
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;
        Ok(())
    }
}
