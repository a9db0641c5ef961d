use crate::model::ProjectionMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub source: Option<String>,
    pub contexts: Vec<String>,
    pub discovery_timeout: Duration,
    pub list_timeout: Duration,
    pub favorites_path: Option<PathBuf>,
    pub projection: ProjectionMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            source: None,
            contexts: Vec::new(),
            discovery_timeout: Duration::from_secs(default_discovery_timeout_secs()),
            list_timeout: Duration::from_secs(default_list_timeout_secs()),
            favorites_path: None,
            projection: ProjectionMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct KubefieldsConfigFile {
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(
        default = "default_discovery_timeout_secs",
        alias = "discoveryTimeout"
    )]
    discovery_timeout_secs: u64,
    #[serde(default = "default_list_timeout_secs", alias = "listTimeout")]
    list_timeout_secs: u64,
    #[serde(default, alias = "favorites")]
    favorites_path: Option<PathBuf>,
    #[serde(default)]
    projection: ProjectionMode,
}

impl RuntimeConfig {
    /// Loads the first config file found, or defaults when there is none.
    pub fn discover() -> Result<Self> {
        match discover_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config {}", path.display()))?;
        let parsed: KubefieldsConfigFile = if raw.trim().is_empty() {
            serde_yaml::from_str("{}")
        } else {
            serde_yaml::from_str(&raw)
        }
        .with_context(|| format!("failed to parse runtime config {}", path.display()))?;

        Ok(Self {
            source: Some(path.display().to_string()),
            contexts: parsed
                .contexts
                .into_iter()
                .map(|context| context.trim().to_string())
                .filter(|context| !context.is_empty())
                .collect(),
            discovery_timeout: Duration::from_secs(parsed.discovery_timeout_secs.max(1)),
            list_timeout: Duration::from_secs(parsed.list_timeout_secs.max(1)),
            favorites_path: parsed.favorites_path,
            projection: parsed.projection,
        })
    }
}

fn default_discovery_timeout_secs() -> u64 {
    10
}

fn default_list_timeout_secs() -> u64 {
    8
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KUBEFIELDS_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("kubefields.yaml"),
        PathBuf::from("kubefields.yml"),
        PathBuf::from(".kubefields.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/kubefields/config.yaml"),
            PathBuf::from(&home).join(".config/kubefields/config.yml"),
            PathBuf::from(&home).join(".kubefields.yaml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

pub fn default_favorites_path() -> PathBuf {
    favorites_path_from(
        std::env::var("XDG_CONFIG_HOME").ok().as_deref(),
        std::env::var("HOME").ok().as_deref(),
    )
}

fn favorites_path_from(xdg_config_home: Option<&str>, home: Option<&str>) -> PathBuf {
    if let Some(base) = xdg_config_home
        && !base.trim().is_empty()
    {
        return PathBuf::from(base).join("kubefields/favorites.json");
    }
    if let Some(home) = home
        && !home.trim().is_empty()
    {
        return PathBuf::from(home).join(".config/kubefields/favorites.json");
    }
    PathBuf::from("kubefields-favorites.json")
}
