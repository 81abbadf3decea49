use crate::reconciler::{DeployError, DeployOutcome, Reconciler};
use crate::state::{DEFAULT_TAG, DeployRequest, Target};
use axum::http::Uri;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

static PUSH_ACTION: &str = "push";

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Envelope {
    pub events: Vec<Event>,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct Event {
    pub id: String,
    pub timestamp: String,
    pub action: String,
    pub target: EventTarget,
    pub request: EventRequest,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct EventTarget {
    pub media_type: String,
    pub size: i64,
    pub digest: String,
    pub repository: String,
    pub url: String,
    pub host: String,
    #[serde(rename = "Tag", alias = "tag")]
    pub tag: String,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct EventRequest {
    pub id: String,
    pub addr: String,
    pub host: String,
    pub method: String,
    pub useragent: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidEvent {
    #[error("event {0} has no repository")]
    MissingRepository(String),
    #[error("event {0} does not name the registry host")]
    MissingRegistryHost(String),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error(transparent)]
    Invalid(#[from] InvalidEvent),
    #[error("unable to deploy event {id}: {source}")]
    Deploy {
        id: String,
        #[source]
        source: DeployError,
    },
}

/// How a batch of events was handled.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub deployed: usize,
    pub current: usize,
    pub ignored: usize,
}

impl Event {
    pub fn is_push(&self) -> bool {
        self.action == PUSH_ACTION
    }

    /// The deployment this push asks for, with the tag defaulted to `latest`.
    pub fn to_deployment(&self) -> Result<(Target, DeployRequest), InvalidEvent> {
        if self.target.repository.is_empty() {
            return Err(InvalidEvent::MissingRepository(self.id.clone()));
        }
        let registry_host = self
            .registry_host()
            .ok_or_else(|| InvalidEvent::MissingRegistryHost(self.id.clone()))?;

        let tag = if self.target.tag.is_empty() {
            DEFAULT_TAG.to_string()
        } else {
            self.target.tag.clone()
        };

        Ok((
            Target {
                repository: self.target.repository.clone(),
                tag,
                digest: self.target.digest.clone(),
            },
            DeployRequest { registry_host },
        ))
    }

    fn registry_host(&self) -> Option<String> {
        let from_url = self
            .target
            .url
            .parse::<Uri>()
            .ok()
            .and_then(|uri| uri.authority().map(|a| a.to_string()));

        from_url
            .into_iter()
            .chain([self.target.host.clone(), self.request.host.clone()])
            .find(|host| !host.is_empty())
    }
}

/// Deploys every push in order, stopping at the first failure.
pub async fn process(
    reconciler: &Reconciler,
    envelope: &Envelope,
) -> Result<Summary, NotificationError> {
    let mut summary = Summary::default();

    for event in &envelope.events {
        if !event.is_push() {
            info!("Unmanaged action {:?} in event {}, ignoring", event.action, event.id);
            summary.ignored += 1;
            continue;
        }

        info!(
            "Received a push for repository {:?}, tag {:?}, digest {:?} from {} ({}) at {}",
            event.target.repository,
            event.target.tag,
            event.target.digest,
            event.request.addr,
            event.request.useragent,
            event.timestamp
        );
        debug!(
            "Pushed manifest {} ({} bytes) via {} request {}",
            event.target.media_type, event.target.size, event.request.method, event.request.id
        );
        let (target, request) = event.to_deployment().inspect_err(|e| {
            warn!("Rejecting event: {}", e);
        })?;

        match reconciler.deploy(&target, &request).await {
            Ok(DeployOutcome::AlreadyCurrent { .. }) => summary.current += 1,
            Ok(DeployOutcome::Replaced { .. }) => summary.deployed += 1,
            Err(source) => {
                if let Some(phase) = source.phase() {
                    warn!("Deploy for event {} failed at the {} step", event.id, phase);
                }
                return Err(NotificationError::Deploy {
                    id: event.id.clone(),
                    source,
                });
            }
        }
    }

    Ok(summary)
}
