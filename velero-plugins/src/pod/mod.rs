//! Backup item action for pods created by the OpenShift build controller.
//!
//! Build pods are usually completed by the time a backup runs, so their empty dir volumes cannot be read
//! by the file system backup. We still want the pods themselves in the backup, so we ask for those volumes
//! to be skipped.
use anyhow::Context as _;
use json_patch::{AddOperation, PatchOperation};
use jsonptr::Pointer;
use k8s_openapi::api::core::v1::Pod;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::action::{Backup, BackupItemAction, ExecuteOutput, ResourceSelector};
use crate::consts::{ANNOTATION_VOLUMES_TO_EXCLUDE, LABEL_BUILD_NAME, RESOURCE_PODS};

/// A pod is a build pod if the build name is set, either as a label or as an annotation.
pub fn is_build_pod(pod: &Pod) -> bool {
    let has_build_name = |map: &Option<std::collections::BTreeMap<String, String>>| {
        map.as_ref()
            .and_then(|map| map.get(LABEL_BUILD_NAME))
            .map_or(false, |value| !value.is_empty())
    };
    has_build_name(&pod.metadata.labels) || has_build_name(&pod.metadata.annotations)
}

/// Whether someone already decided which volumes of this pod to exclude.
pub fn has_volumes_to_exclude(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(ANNOTATION_VOLUMES_TO_EXCLUDE))
        .map_or(false, |value| !value.is_empty())
}

/// Write the names of all empty dir volumes, in pod order, to the exclusion annotation.
/// Any previous value is replaced, so callers should check `has_volumes_to_exclude` first.
pub fn skip_empty_dir_volumes(pod: &mut Pod) {
    let excludes = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(|volumes| {
            volumes
                .iter()
                .filter(|volume| volume.empty_dir.is_some())
                .map(|volume| volume.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    pod.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_VOLUMES_TO_EXCLUDE.to_string(), excludes);
}

/// Decode the generic item into a pod. Items that do not parse are treated as an empty pod,
/// which is never a build pod, so they pass through untouched.
pub fn decode_pod(item: &Value) -> Pod {
    match serde_json::from_value::<Pod>(item.clone()) {
        Ok(pod) => pod,
        Err(err) => {
            warn!(
                "[pod-backup] could not decode {:?} as a pod, leaving it as is: {}",
                item["metadata"]["name"].as_str(),
                err
            );
            Pod::default()
        }
    }
}

/// Patches that set the exclusion annotation on the item.
fn exclusion_patches(has_annotations: bool, excludes: &str) -> Vec<PatchOperation> {
    let mut patches = Vec::new();

    // Ensures that annotations exists before adding to it
    if !has_annotations {
        patches.push(PatchOperation::Add(AddOperation {
            path: Pointer::new(["metadata", "annotations"]),
            value: json!({}),
        }));
    }

    patches.push(PatchOperation::Add(AddOperation {
        path: Pointer::new(["metadata", "annotations", ANNOTATION_VOLUMES_TO_EXCLUDE]),
        value: json!(excludes),
    }));

    patches
}

/// Patch the raw item instead of re-encoding the typed pod, so fields the pod type does not know
/// about, and timestamps with sub-second precision, survive.
fn apply_patches(mut item: Value, patches: &[PatchOperation]) -> anyhow::Result<Value> {
    json_patch::patch(&mut item, patches).context("Failed to patch item")?;
    Ok(item)
}

#[derive(Debug, Clone, Default)]
pub struct BuildPodBackupAction {
    included_namespaces: Vec<String>,
    excluded_namespaces: Vec<String>,
}

impl BuildPodBackupAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the namespaces the orchestrator should invoke us for.
    pub fn with_namespaces(mut self, included: Vec<String>, excluded: Vec<String>) -> Self {
        self.included_namespaces = included;
        self.excluded_namespaces = excluded;
        self
    }
}

impl BackupItemAction for BuildPodBackupAction {
    fn applies_to(&self) -> anyhow::Result<ResourceSelector> {
        Ok(ResourceSelector {
            included_namespaces: self.included_namespaces.clone(),
            excluded_namespaces: self.excluded_namespaces.clone(),
            included_resources: vec![RESOURCE_PODS.to_string()],
            ..Default::default()
        })
    }

    fn execute(&self, item: Value, backup: &Backup) -> anyhow::Result<ExecuteOutput> {
        let mut pod = decode_pod(&item);

        info!(
            "[pod-backup] pod: {:?} backup: {:?}",
            pod.metadata.name, backup.metadata.name
        );
        debug!(
            "[pod-backup] backup: {:?} storage location: {:?} default volumes to fs backup: {:?}",
            backup.metadata.name,
            backup.spec.storage_location,
            backup.spec.default_volumes_to_fs_backup
        );

        if !is_build_pod(&pod) {
            return Ok(ExecuteOutput::new(item));
        }

        if has_volumes_to_exclude(&pod) {
            info!(
                "[pod-backup] pod: {:?} is a build pod, already have skip volumes using annotations, left as is",
                pod.metadata.name
            );
            return Ok(ExecuteOutput::new(item));
        }

        info!(
            "[pod-backup] pod: {:?} is a build pod, skipping volumes using annotations",
            pod.metadata.name
        );

        let has_annotations = pod.metadata.annotations.is_some();
        skip_empty_dir_volumes(&mut pod);
        let excludes = pod
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(ANNOTATION_VOLUMES_TO_EXCLUDE))
            .cloned()
            .unwrap_or_default();

        debug!(
            "[pod-backup] pod: {:?} excluding volumes {:?}",
            pod.metadata.name, excludes
        );

        let item = apply_patches(item, &exclusion_patches(has_annotations, &excludes))?;

        Ok(ExecuteOutput::new(item))
    }
}
