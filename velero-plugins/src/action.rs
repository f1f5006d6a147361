//! The contract between a backup item action and the orchestrator that runs it.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Selects the items an action is invoked for.
/// Empty lists mean "no restriction" on that dimension.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceSelector {
    pub included_namespaces: Vec<String>,
    pub excluded_namespaces: Vec<String>,
    pub included_resources: Vec<String>,
    pub excluded_resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct GroupResource {
    pub group: String,
    pub resource: String,
}

/// An extra item the action asks the orchestrator to back up alongside the current one.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    pub group_resource: GroupResource,
    pub namespace: String,
    pub name: String,
}

/// The velero.io/v1 Backup the item belongs to. Only the fields that decide whether volumes are
/// backed up by the file system backup are read; everything else in the spec is ignored.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Backup",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_volumes_to_fs_backup: Option<bool>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutput {
    /// The item exactly as received, apart from the changes the action made.
    pub item: Value,
    pub additional_items: Vec<ResourceIdentifier>,
}

impl ExecuteOutput {
    pub fn new(item: Value) -> Self {
        Self {
            item,
            additional_items: Vec::new(),
        }
    }
}

/// A hook invoked once per item during a backup.
pub trait BackupItemAction: Send + Sync {
    /// The items this action wants to see.
    fn applies_to(&self) -> anyhow::Result<ResourceSelector>;

    /// Transform `item` before it is written to the backup.
    fn execute(&self, item: Value, backup: &Backup) -> anyhow::Result<ExecuteOutput>;
}
