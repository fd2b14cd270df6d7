use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::crd::AddonInstance;
use crate::crd::AddonInstanceStatus;
use crate::crd::Installation;
use crate::error::Result;

/// Kubernetes access needed by the status controller.
///
/// The kube backed implementation is [crate::k8s::K8sRepository].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusRepository: Send + Sync {
    /// Gets the addon instance `namespace/name`.
    async fn get_addon_instance(&self, namespace: &str, name: &str) -> Result<AddonInstance>;

    /// Merge patches `spec.heartbeatUpdatePeriod` of the addon instance.
    async fn patch_heartbeat_period(&self, instance: &AddonInstance, period: Duration) -> Result<()>;

    /// Gets the single installation of the namespace.
    ///
    /// Returns `None` when there is none and [crate::error::Error::TooManyInstallations]
    /// when there is more than one.
    async fn get_installation(&self, namespace: &str) -> Result<Option<Installation>>;

    async fn delete_installation(&self, installation: &Installation) -> Result<()>;

    /// Merge patches the status subresource of the addon instance.
    async fn patch_addon_instance_status(&self, instance: &AddonInstance, status: &AddonInstanceStatus)
        -> Result<()>;
}
