use crate::reconciler::Reconciler;
use std::sync::Arc;

pub static DEFAULT_TAG: &str = "latest";

#[derive(Clone)]
pub struct AppState {
    pub(crate) reconciler: Arc<Reconciler>,
}

/// The image a push notification asks this host to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub repository: String,
    pub tag: String,
    pub digest: String,
}

impl Target {
    pub fn effective_tag(&self) -> &str {
        if self.tag.is_empty() {
            DEFAULT_TAG
        } else {
            &self.tag
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub registry_host: String,
}
