use crate::config::DeployConfig;
use crate::image_reference::ImageReference;
use crate::locks::NameLocks;
use crate::routing::{RoutingConfig, RoutingError, RoutingNetwork, RoutingSpec, container_name};
use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};
use crate::state::{DeployRequest, Target};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// The container engine step a deployment was performing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    List,
    Inspect,
    Stop,
    Remove,
    Pull,
    Create,
    Start,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::List => "list",
            Phase::Inspect => "inspect",
            Phase::Stop => "stop",
            Phase::Remove => "remove",
            Phase::Pull => "pull",
            Phase::Create => "create",
            Phase::Start => "start",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid deploy target: {0}")]
    InvalidTarget(&'static str),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("{phase} step failed for container {name}: {source}")]
    Runtime {
        phase: Phase,
        name: String,
        #[source]
        source: RuntimeError,
    },
    #[error("deployment of container {name} did not finish within {after:?}")]
    TimedOut { name: String, after: Duration },
}

impl DeployError {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            DeployError::Runtime { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// A container for the name already runs the pushed digest.
    AlreadyCurrent { container_id: String },
    /// Stale containers were removed and a fresh one started.
    Replaced { container_id: String, removed: usize },
}

/// Brings the host to exactly one container per repository running the pushed image.
pub struct Reconciler {
    runtime: Arc<dyn ContainerRuntime>,
    routing: RoutingConfig,
    network: RoutingNetwork,
    stop_grace: Duration,
    timeout: Option<Duration>,
    locks: NameLocks,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        routing: RoutingConfig,
        network: RoutingNetwork,
        deploy: &DeployConfig,
    ) -> Self {
        Self {
            runtime,
            routing,
            network,
            stop_grace: deploy.stop_grace(),
            timeout: deploy.timeout(),
            locks: NameLocks::new(),
        }
    }

    pub async fn deploy(
        &self,
        target: &Target,
        request: &DeployRequest,
    ) -> Result<DeployOutcome, DeployError> {
        if target.repository.is_empty() {
            return Err(DeployError::InvalidTarget("repository is empty"));
        }
        if request.registry_host.is_empty() {
            return Err(DeployError::InvalidTarget("registry host is empty"));
        }

        let name = container_name(&target.repository);
        let routing = RoutingSpec::for_repository(&target.repository, &self.routing, &self.network)?;

        let serialized = async {
            let _guard = self.locks.lock(&name).await;
            self.reconcile(&name, target, request, routing).await
        };

        match self.timeout {
            Some(after) => tokio::time::timeout(after, serialized)
                .await
                .map_err(|_| DeployError::TimedOut {
                    name: name.clone(),
                    after,
                })?,
            None => serialized.await,
        }
    }

    async fn reconcile(
        &self,
        name: &str,
        target: &Target,
        request: &DeployRequest,
        routing: RoutingSpec,
    ) -> Result<DeployOutcome, DeployError> {
        let failed = |phase: Phase| {
            move |source: RuntimeError| DeployError::Runtime {
                phase,
                name: name.to_string(),
                source,
            }
        };

        let existing = self
            .runtime
            .list_containers(name)
            .await
            .map_err(failed(Phase::List))?;
        debug!("Found {} existing containers named {}", existing.len(), name);

        let mut removed = 0;
        for container in &existing {
            let repo_digests = self
                .runtime
                .inspect_image(&container.image_id)
                .await
                .map_err(failed(Phase::Inspect))?;

            let current = runs_digest(&repo_digests, &target.digest);
            if current && container.running {
                info!(
                    "Image {} is already running for repository {} in container {}, nothing to do",
                    target.digest, target.repository, container.id
                );
                return Ok(DeployOutcome::AlreadyCurrent {
                    container_id: container.id.clone(),
                });
            }

            if current {
                info!(
                    "Container {} holds image {} for repository {} but is not running, replacing it",
                    container.id, target.digest, target.repository
                );
            } else {
                info!(
                    "New image detected for repository {}, stopping container {}",
                    target.repository, container.id
                );
            }
            self.runtime
                .stop_container(&container.id, self.stop_grace)
                .await
                .map_err(failed(Phase::Stop))?;
            self.runtime
                .remove_container(&container.id)
                .await
                .map_err(failed(Phase::Remove))?;
            removed += 1;
        }

        let reference = ImageReference::for_target(target, request);
        info!("Pulling image {}", reference);
        self.runtime
            .pull_image(&reference)
            .await
            .map_err(failed(Phase::Pull))?;

        info!("Creating container {} from {}", name, reference);
        debug!(
            "Publishing router {} on network {}",
            routing.router, routing.network
        );
        let spec = ContainerSpec {
            name: name.to_string(),
            image: reference.to_string(),
            labels: routing.labels,
            network: routing.network,
        };
        let container_id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(failed(Phase::Create))?;

        self.runtime
            .start_container(&container_id)
            .await
            .map_err(failed(Phase::Start))?;

        info!(
            "Latest image for repository {} is running in container {}",
            target.repository, container_id
        );
        Ok(DeployOutcome::Replaced {
            container_id,
            removed,
        })
    }
}

fn runs_digest(repo_digests: &[String], digest: &str) -> bool {
    repo_digests.iter().any(|d| d.contains(digest))
}
