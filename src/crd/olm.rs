//! The parts of the Operator Lifecycle Manager API used to find the CSV of an upgrade.

use kube::CustomResource;
use serde::Deserialize;
use serde::Serialize;

pub const CLUSTER_SERVICE_VERSION_KIND: &str = "ClusterServiceVersion";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "InstallPlan",
    plural = "installplans",
    status = "InstallPlanStatus",
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstallPlanSpec {
    #[serde(default)]
    pub cluster_service_version_names: Vec<String>,
    #[serde(default)]
    pub approval: String,
    #[serde(default)]
    pub approved: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct InstallPlanStatus {
    #[serde(default)]
    pub phase: String,
    #[serde(default)]
    pub plan: Vec<Step>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Step {
    #[serde(default)]
    pub resolving: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub resource: StepResource,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResource {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_namespace: String,
    #[serde(default)]
    pub manifest: String,
}

impl InstallPlan {
    pub fn steps(&self) -> &[Step] {
        self.status.as_ref().map_or(&[], |status| status.plan.as_slice())
    }

    /// The manifest of the last step that installs a ClusterServiceVersion.
    pub fn csv_manifest(&self) -> Option<&str> {
        self.steps()
            .iter()
            .rev()
            .find(|step| step.resource.kind == CLUSTER_SERVICE_VERSION_KIND)
            .map(|step| step.resource.manifest.as_str())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}
