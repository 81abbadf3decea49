use crate::state::{DeployRequest, Target};
use std::fmt;

/// A pullable `registry/repository:tag` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl ImageReference {
    pub fn for_target(target: &Target, request: &DeployRequest) -> Self {
        Self {
            registry: request.registry_host.trim_end_matches('/').to_string(),
            repository: target.repository.clone(),
            tag: target.effective_tag().to_string(),
        }
    }

    /// Repository including the registry host, as the engine's pull API expects it.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}
