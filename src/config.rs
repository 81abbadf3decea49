use crate::routing::RoutingConfig;
use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "registry-deployer", version, about)]
pub struct Args {
    /// Docker network the reverse proxy reaches deployed containers through
    #[arg(env = "DEPLOYER_NETWORK")]
    pub network: String,

    /// Optional YAML configuration file
    #[arg(short, long, env = "DEPLOYER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration file
    #[arg(short, long, env = "DEPLOYER_PORT")]
    pub port: Option<u16>,
}

impl Args {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => {
                info!("No config file given, using defaults");
                Config::default()
            }
        };
        if let Some(port) = self.port {
            config.webserver.port = port;
        }
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub webserver: Webserver,
    pub routing: RoutingConfig,
    pub deploy: DeployConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Webserver {
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployConfig {
    pub stop_grace_seconds: u64,
    /// `null` disables the limit.
    pub timeout_seconds: Option<u64>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            stop_grace_seconds: 1,
            timeout_seconds: Some(300),
        }
    }
}

impl DeployConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error naming every missing variable.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let missing: Vec<&str> = re
        .captures_iter(input)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|name| env::var(name).is_err())
        .collect();
    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable: {}", missing.join(", "));
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });

    Ok(result.into_owned())
}
