use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static TRAEFIK_ENABLE_LABEL: &str = "traefik.enable";
static TRAEFIK_NETWORK_LABEL: &str = "traefik.docker.network";
static TRAEFIK_ROUTER_PREFIX: &str = "traefik.http.routers";

static ROUTER_NAME_FORBIDDEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").expect("router name pattern is valid"));

/// Reverse-proxy settings shared by every deployed application.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct RoutingConfig {
    pub entrypoint: String,
    pub path_prefix: String,
    pub tls: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            entrypoint: "websecure".to_string(),
            path_prefix: "/apps".to_string(),
            tls: true,
        }
    }
}

/// The Docker network the reverse proxy reaches applications through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingNetwork {
    pub id: String,
    pub name: String,
}

impl fmt::Display for RoutingNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("repository name is empty")]
    EmptyRepository,
    #[error("repository {0:?} does not yield a usable router name")]
    UnroutableRepository(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NetworkResolutionError {
    #[error("no network named {0:?} exists")]
    NotFound(String),
    #[error("{count} networks are named {name:?}, expected exactly one")]
    Ambiguous { name: String, count: usize },
}

/// Labels and network attachment published alongside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSpec {
    pub router: String,
    pub labels: HashMap<String, String>,
    pub network: RoutingNetwork,
}

impl RoutingSpec {
    pub fn for_repository(
        repository: &str,
        config: &RoutingConfig,
        network: &RoutingNetwork,
    ) -> Result<Self, RoutingError> {
        if repository.is_empty() {
            return Err(RoutingError::EmptyRepository);
        }
        let router = router_name(repository);
        if router.is_empty() {
            return Err(RoutingError::UnroutableRepository(repository.to_string()));
        }

        let prefix = config.path_prefix.trim_end_matches('/');
        let router_key = |suffix: &str| format!("{}.{}.{}", TRAEFIK_ROUTER_PREFIX, router, suffix);

        let labels = HashMap::from([
            (TRAEFIK_ENABLE_LABEL.to_string(), "true".to_string()),
            (
                router_key("rule"),
                format!("PathPrefix(`{}/{}`)", prefix, repository),
            ),
            (router_key("tls"), config.tls.to_string()),
            (router_key("entrypoints"), config.entrypoint.clone()),
            (TRAEFIK_NETWORK_LABEL.to_string(), network.name.clone()),
        ]);

        Ok(Self {
            router,
            labels,
            network: network.clone(),
        })
    }
}

/// Name of the single container serving `repository` on this host.
pub fn container_name(repository: &str) -> String {
    repository.replace('/', "_")
}

/// Router names become label key segments, so dots and slashes are dropped.
fn router_name(repository: &str) -> String {
    ROUTER_NAME_FORBIDDEN.replace_all(repository, "").into_owned()
}

/// Picks the single network whose name is exactly `name`.
pub fn select_network(
    name: &str,
    candidates: Vec<RoutingNetwork>,
) -> Result<RoutingNetwork, NetworkResolutionError> {
    let mut matching: Vec<RoutingNetwork> = candidates
        .into_iter()
        .filter(|network| network.name == name)
        .collect();

    match matching.len() {
        0 => Err(NetworkResolutionError::NotFound(name.to_string())),
        1 => Ok(matching.remove(0)),
        count => Err(NetworkResolutionError::Ambiguous {
            name: name.to_string(),
            count,
        }),
    }
}
