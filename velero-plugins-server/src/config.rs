//! Configuration file of the plugin server: which namespaces the actions apply to.

use std::{fs, path::Path};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use velero_plugins::pod::BuildPodBackupAction;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Namespaces the orchestrator should invoke the action for. Empty means all.
    pub included_namespaces: Vec<String>,
    /// Namespaces the orchestrator should never invoke the action for.
    pub excluded_namespaces: Vec<String>,
}

impl Config {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn from_file(file_path: &Path) -> anyhow::Result<Self> {
        let config_content = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read {}", file_path.display()))?;
        Self::from_str(&config_content)
            .with_context(|| format!("Failed to parse {}", file_path.display()))
    }

    pub fn build_pod_action(&self) -> BuildPodBackupAction {
        BuildPodBackupAction::new().with_namespaces(
            self.included_namespaces.clone(),
            self.excluded_namespaces.clone(),
        )
    }
}
