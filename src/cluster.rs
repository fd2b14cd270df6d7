//! Facts about the cluster the operator runs on.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
#[cfg(test)]
use mockall::automock;

use crate::affinity::ZONE_LABEL;
use crate::crd::ClusterVersion;
use crate::error::Error;
use crate::error::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterVersionSource: Send + Sync {
    /// Gets the singleton `ClusterVersion` named `version`.
    async fn get_cluster_version(&self) -> Result<ClusterVersion>;
}

/// Whether the cluster's most recent version is older than OpenShift 4.9.
///
/// Only `major.minor` of the latest history entry is compared, as integers.
pub async fn cluster_version_before_49<S>(source: &S) -> Result<bool>
where
    S: ClusterVersionSource + ?Sized,
{
    let cluster_version = source
        .get_cluster_version()
        .await
        .map_err(|e| Error::ClusterVersion(format!("failed to fetch version: {e}")))?;

    let version = cluster_version
        .latest_version()
        .ok_or_else(|| Error::ClusterVersion("cluster version has no history".to_owned()))?;

    let (major, minor) = major_minor(version)?;
    tracing::debug!(major, minor, "Found cluster version");

    Ok((major, minor) < (4, 9))
}

fn major_minor(version: &str) -> Result<(u64, u64)> {
    let mut parts = version.split('.');
    let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
        return Err(Error::ClusterVersion(format!(
            "Error splitting cluster version history {version}"
        )));
    };

    match (major.parse(), minor.parse()) {
        (Ok(major), Ok(minor)) => Ok((major, minor)),
        _ => Err(Error::ClusterVersion(format!("Error parsing cluster version {major}.{minor}"))),
    }
}

/// Whether the nodes span more than one availability zone.
///
/// Fails for an empty node list. Nodes without a zone label count as one zone.
pub fn is_multi_az_cluster(nodes: &[Node]) -> Result<bool> {
    let (first, rest) = nodes.split_first().ok_or(Error::NoNodes)?;

    let first_zone = zone(first);
    Ok(rest.iter().any(|node| zone(node) != first_zone))
}

fn zone(node: &Node) -> Option<&str> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(ZONE_LABEL))
        .map(String::as_str)
}
