//! The kube backed implementation of the operator's repository traits.
//!
//! [K8sRepository] is the only place talking to the api server. Reconcilers and helpers
//! depend on the narrow traits ([StatusRepository], [ConfigMapSource], [StrategyStore],
//! [ClusterVersionSource], [JobClient]) so their tests run against mocks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Node;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde_json::json;

use crate::backup::JobClient;
use crate::cache::CachedApiProvider;
use crate::cache::ProvideApi;
use crate::cluster;
use crate::cluster::ClusterVersionSource;
use crate::crd::addon_instance::format_go_duration;
use crate::crd::openshift::CLUSTER_VERSION_NAME;
use crate::crd::AddonInstance;
use crate::crd::AddonInstanceStatus;
use crate::crd::ClusterVersion;
use crate::crd::Installation;
use crate::csvlocator::ConfigMapSource;
use crate::error::Error;
use crate::error::Result;
use crate::status::StatusRepository;
use crate::strategy::StrategyStore;
use crate::strategy::STRATEGY_CONFIG_MAP_NAME;
use crate::TryResource;

/// Repository over a kube [Client], caching one [Api] per resource and namespace.
pub struct K8sRepository {
    client: Client,
    addon_instances: CachedApiProvider<AddonInstance>,
    installations: CachedApiProvider<Installation>,
    config_maps: CachedApiProvider<ConfigMap>,
    cron_jobs: CachedApiProvider<CronJob>,
    jobs: CachedApiProvider<Job>,
}

impl K8sRepository {
    pub fn new(client: Client) -> Self {
        Self {
            addon_instances: CachedApiProvider::new(client.clone()),
            installations: CachedApiProvider::new(client.clone()),
            config_maps: CachedApiProvider::new(client.clone()),
            cron_jobs: CachedApiProvider::new(client.clone()),
            jobs: CachedApiProvider::new(client.clone()),
            client,
        }
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes = Api::<Node>::all(self.client.clone()).list(&ListParams::default()).await?;
        Ok(nodes.items)
    }

    /// Whether the cluster's nodes span more than one availability zone.
    pub async fn is_multi_az_cluster(&self) -> Result<bool> {
        cluster::is_multi_az_cluster(&self.list_nodes().await?)
    }
}

/// Turns an absent object into [Error::MissingObject].
fn required<K>(object: Option<K>, kind: &'static str, namespace: &str, name: &str) -> Result<K> {
    object.ok_or_else(|| Error::MissingObject {
        kind,
        namespace: namespace.to_owned(),
        name: name.to_owned(),
    })
}

/// The only installation of `namespace`, if any.
fn single_installation(namespace: &str, mut installations: Vec<Installation>) -> Result<Option<Installation>> {
    match installations.len() {
        0 => Ok(None),
        1 => Ok(installations.pop()),
        _ => Err(Error::TooManyInstallations(namespace.to_owned())),
    }
}

#[async_trait]
impl StatusRepository for K8sRepository {
    async fn get_addon_instance(&self, namespace: &str, name: &str) -> Result<AddonInstance> {
        let instance = self.addon_instances.get(namespace)?.get_opt(name).await?;
        required(instance, "AddonInstance", namespace, name)
    }

    async fn patch_heartbeat_period(&self, instance: &AddonInstance, period: Duration) -> Result<()> {
        let patch = json!({ "spec": { "heartbeatUpdatePeriod": format_go_duration(period) } });

        self.addon_instances
            .get(&instance.try_namespace()?)?
            .patch(instance.try_name()?, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }

    async fn get_installation(&self, namespace: &str) -> Result<Option<Installation>> {
        let installations = self.installations.get(namespace)?.list(&ListParams::default()).await?;
        single_installation(namespace, installations.items)
    }

    async fn delete_installation(&self, installation: &Installation) -> Result<()> {
        self.installations
            .get(&installation.try_namespace()?)?
            .delete(installation.try_name()?, &DeleteParams::default())
            .await?;

        Ok(())
    }

    async fn patch_addon_instance_status(&self, instance: &AddonInstance, status: &AddonInstanceStatus) -> Result<()> {
        let patch = json!({ "status": status });

        self.addon_instances
            .get(&instance.try_namespace()?)?
            .patch_status(instance.try_name()?, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ConfigMapSource for K8sRepository {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let config_map = self.config_maps.get(namespace)?.get_opt(name).await?;
        required(config_map, "ConfigMap", namespace, name)
    }
}

#[async_trait]
impl StrategyStore for K8sRepository {
    async fn get_strategies(&self, namespace: &str) -> Result<ConfigMap> {
        self.get_config_map(namespace, STRATEGY_CONFIG_MAP_NAME).await
    }

    async fn patch_strategies(&self, namespace: &str, data: BTreeMap<String, String>) -> Result<()> {
        let patch = json!({ "data": data });

        self.config_maps
            .get(namespace)?
            .patch(STRATEGY_CONFIG_MAP_NAME, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ClusterVersionSource for K8sRepository {
    async fn get_cluster_version(&self) -> Result<ClusterVersion> {
        Ok(Api::<ClusterVersion>::all(self.client.clone())
            .get(CLUSTER_VERSION_NAME)
            .await?)
    }
}

#[async_trait]
impl JobClient for K8sRepository {
    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob> {
        let cron_job = self.cron_jobs.get(namespace)?.get_opt(name).await?;
        required(cron_job, "CronJob", namespace, name)
    }

    async fn create_job(&self, job: &Job) -> Result<Job> {
        Ok(self
            .jobs
            .get(&job.try_namespace()?)?
            .create(&PostParams::default(), job)
            .await?)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job> {
        let job = self.jobs.get(namespace)?.get_opt(name).await?;
        required(job, "Job", namespace, name)
    }
}
