//! Backup item actions for build pods.
pub mod action;
pub mod pod;

pub mod consts {
    /// Label or annotation set by the OpenShift build controller on build pods.
    pub const LABEL_BUILD_NAME: &str = "openshift.io/build.name";
    /// Volumes listed here are skipped by the file system backup.
    pub const ANNOTATION_VOLUMES_TO_EXCLUDE: &str = "backup.velero.io/backup-volumes-excludes";
    /// The only resource the build pod action applies to.
    pub const RESOURCE_PODS: &str = "pods";
}
