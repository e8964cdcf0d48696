use anyhow::{anyhow, Context, Result};
use serde_derive::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const METRICS_SERVER_URL: &str =
    "https://github.com/kubernetes-sigs/metrics-server/releases/latest/download/components.yaml";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding kind-config.yaml, components.yaml and friends.
    pub assets_dir: PathBuf,
    pub metrics_server_url: String,
    /// Passed to `kubectl wait --timeout`.
    pub wait_timeout: String,
    pub verbose: bool,
    pub assume_yes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            assets_dir: PathBuf::from("."),
            metrics_server_url: String::from(METRICS_SERVER_URL),
            wait_timeout: String::from("90s"),
            verbose: false,
            assume_yes: false,
        }
    }
}

impl Settings {
    /// `~/.devops-ready-cluster`, where settings and per-cluster state live.
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("user does not have a home"))?;

        Ok(home.join(".devops-ready-cluster"))
    }

    pub fn default_path() -> Result<PathBuf> {
        Ok(Settings::config_dir()?.join("config.yaml"))
    }

    /// Reads settings from `path`; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Settings> {
        if !path.exists() {
            return Ok(Settings::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("could not read settings from {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Settings::default());
        }

        serde_yaml::from_str(&contents)
            .with_context(|| format!("invalid settings in {}", path.display()))
    }

    /// Command line flags only ever switch things on.
    pub fn with_flags(mut self, verbose: bool, assume_yes: bool) -> Settings {
        self.verbose |= verbose;
        self.assume_yes |= assume_yes;
        self
    }

    pub fn asset(&self, name: &str) -> PathBuf {
        self.assets_dir.join(name)
    }
}
