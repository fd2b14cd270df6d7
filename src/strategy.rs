//! AWS strategy tiers of the cloud resource operator.
//!
//! The ConfigMap `cloud-resources-aws-strategies` maps every resource type to a set of tiers,
//! each tier holding the create and delete strategies passed to AWS. New tiers are derived
//! from the `production` tier by overriding parts of its create strategy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::value::to_raw_value;
use serde_json::value::RawValue;
use serde_json::Map;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

pub const STRATEGY_CONFIG_MAP_NAME: &str = "cloud-resources-aws-strategies";
pub const POSTGRES_STRATEGY_KEY: &str = "postgres";
pub const REDIS_STRATEGY_KEY: &str = "redis";
pub const NETWORK_STRATEGY_KEY: &str = "_network";
pub const PRODUCTION_TIER: &str = "production";

/// Reads and patches the strategy ConfigMap of a namespace.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StrategyStore: Send + Sync {
    async fn get_strategies(&self, namespace: &str) -> Result<ConfigMap>;

    /// Merge patches the given `data` keys of the strategy ConfigMap.
    async fn patch_strategies(&self, namespace: &str, data: BTreeMap<String, String>) -> Result<()>;
}

/// One tier of a resource type.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    #[serde(default)]
    pub region: String,
    pub create_strategy: Option<Box<RawValue>>,
    pub delete_strategy: Option<Box<RawValue>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: Option<String>,
    pub value: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessorFeature {
    pub name: Option<String>,
    pub value: Option<String>,
}

/// The RDS `CreateDBInstance` input. Absent fields are serialized as `null`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateDbInstanceInput {
    pub allocated_storage: Option<i64>,
    pub auto_minor_version_upgrade: Option<bool>,
    pub availability_zone: Option<String>,
    pub backup_retention_period: Option<i64>,
    pub character_set_name: Option<String>,
    pub copy_tags_to_snapshot: Option<bool>,
    #[serde(rename = "DBClusterIdentifier")]
    pub db_cluster_identifier: Option<String>,
    #[serde(rename = "DBInstanceClass")]
    pub db_instance_class: Option<String>,
    #[serde(rename = "DBInstanceIdentifier")]
    pub db_instance_identifier: Option<String>,
    #[serde(rename = "DBName")]
    pub db_name: Option<String>,
    #[serde(rename = "DBParameterGroupName")]
    pub db_parameter_group_name: Option<String>,
    #[serde(rename = "DBSecurityGroups")]
    pub db_security_groups: Option<Vec<String>>,
    #[serde(rename = "DBSubnetGroupName")]
    pub db_subnet_group_name: Option<String>,
    pub deletion_protection: Option<bool>,
    pub domain: Option<String>,
    #[serde(rename = "DomainIAMRoleName")]
    pub domain_iam_role_name: Option<String>,
    pub enable_cloudwatch_logs_exports: Option<Vec<String>>,
    #[serde(rename = "EnableIAMDatabaseAuthentication")]
    pub enable_iam_database_authentication: Option<bool>,
    pub enable_performance_insights: Option<bool>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub iops: Option<i64>,
    pub kms_key_id: Option<String>,
    pub license_model: Option<String>,
    pub master_user_password: Option<String>,
    pub master_username: Option<String>,
    pub max_allocated_storage: Option<i64>,
    pub monitoring_interval: Option<i64>,
    pub monitoring_role_arn: Option<String>,
    #[serde(rename = "MultiAZ")]
    pub multi_az: Option<bool>,
    pub nchar_character_set_name: Option<String>,
    pub option_group_name: Option<String>,
    #[serde(rename = "PerformanceInsightsKMSKeyId")]
    pub performance_insights_kms_key_id: Option<String>,
    pub performance_insights_retention_period: Option<i64>,
    pub port: Option<i64>,
    pub preferred_backup_window: Option<String>,
    pub preferred_maintenance_window: Option<String>,
    pub processor_features: Option<Vec<ProcessorFeature>>,
    pub promotion_tier: Option<i64>,
    pub publicly_accessible: Option<bool>,
    pub storage_encrypted: Option<bool>,
    pub storage_type: Option<String>,
    pub tags: Option<Vec<Tag>>,
    pub tde_credential_arn: Option<String>,
    pub tde_credential_password: Option<String>,
    pub timezone: Option<String>,
    pub vpc_security_group_ids: Option<Vec<String>>,
}

/// The ElastiCache `CreateCacheCluster` input. Absent fields are serialized as `null`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateCacheClusterInput {
    #[serde(rename = "AZMode")]
    pub az_mode: Option<String>,
    pub auth_token: Option<String>,
    pub auto_minor_version_upgrade: Option<bool>,
    pub cache_cluster_id: Option<String>,
    pub cache_node_type: Option<String>,
    pub cache_parameter_group_name: Option<String>,
    pub cache_security_group_names: Option<Vec<String>>,
    pub cache_subnet_group_name: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub notification_topic_arn: Option<String>,
    pub num_cache_nodes: Option<i64>,
    pub port: Option<i64>,
    pub preferred_availability_zone: Option<String>,
    pub preferred_availability_zones: Option<Vec<String>>,
    pub preferred_maintenance_window: Option<String>,
    pub replication_group_id: Option<String>,
    pub security_group_ids: Option<Vec<String>>,
    pub snapshot_arns: Option<Vec<String>>,
    pub snapshot_name: Option<String>,
    pub snapshot_retention_limit: Option<i64>,
    pub snapshot_window: Option<String>,
    pub tags: Option<Vec<Tag>>,
}

/// Overrides fields of `base` with the values of `overrides`.
///
/// Every override naming a field must be a non-null value decoding into that field's type on
/// its own, otherwise the override fails with [Error::StrategyOverride]. Keys naming no field
/// are skipped.
pub fn apply_overrides<T>(base: &T, overrides: &Map<String, Value>) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(mut fields) = serde_json::to_value(base)? else {
        return Err(Error::UserInput("Create strategies must serialize to a JSON object".to_owned()));
    };

    for (key, value) in overrides {
        if !fields.contains_key(key) {
            tracing::debug!(key, "Ignoring unknown strategy override");
            continue;
        }

        if value.is_null() {
            return Err(Error::StrategyOverride { key: key.clone() });
        }
        let single = Map::from_iter([(key.clone(), value.clone())]);
        serde_json::from_value::<T>(Value::Object(single)).map_err(|_| Error::StrategyOverride { key: key.clone() })?;

        fields.insert(key.clone(), value.clone());
    }

    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Adds `tier` to the Postgres strategies, derived from the production tier.
///
/// Does nothing for installations using cluster storage.
pub async fn create_postgres_tier_from_production<S>(
    store: &S,
    namespace: &str,
    use_cluster_storage: bool,
    tier: &str,
    overrides: &Map<String, Value>,
) -> Result<()>
where
    S: StrategyStore + ?Sized,
{
    if use_cluster_storage {
        return Ok(());
    }

    tracing::info!(tier, "Creating AWS Postgres strategy");
    create_tier_from_production::<S, CreateDbInstanceInput>(store, namespace, POSTGRES_STRATEGY_KEY, tier, overrides)
        .await
}

/// Adds `tier` to the Redis strategies, derived from the production tier.
///
/// Does nothing for installations using cluster storage.
pub async fn create_redis_tier_from_production<S>(
    store: &S,
    namespace: &str,
    use_cluster_storage: bool,
    tier: &str,
    overrides: &Map<String, Value>,
) -> Result<()>
where
    S: StrategyStore + ?Sized,
{
    if use_cluster_storage {
        return Ok(());
    }

    tracing::info!(tier, "Creating AWS Redis strategy");
    create_tier_from_production::<S, CreateCacheClusterInput>(store, namespace, REDIS_STRATEGY_KEY, tier, overrides)
        .await
}

async fn create_tier_from_production<S, T>(
    store: &S,
    namespace: &str,
    resource: &str,
    tier: &str,
    overrides: &Map<String, Value>,
) -> Result<()>
where
    S: StrategyStore + ?Sized,
    T: Serialize + DeserializeOwned + Default,
{
    let config_map = store.get_strategies(namespace).await?;
    let data = config_map.data.unwrap_or_default();

    let mut tiers = tiers_of(&data, resource)?;
    let production = tiers.get(PRODUCTION_TIER).ok_or_else(|| Error::MissingTier {
        resource: resource.to_owned(),
        tier: PRODUCTION_TIER.to_owned(),
    })?;

    let mut config: StrategyConfig = serde_json::from_str(production.get())?;
    let create_strategy: T = match &config.create_strategy {
        Some(raw) => serde_json::from_str(raw.get())?,
        None => T::default(),
    };
    config.create_strategy = Some(to_raw_value(&apply_overrides(&create_strategy, overrides)?)?);

    tiers.insert(tier.to_owned(), to_raw_value(&config)?);
    let mut patch = BTreeMap::from([(resource.to_owned(), serde_json::to_string(&tiers)?)]);

    if data.contains_key(NETWORK_STRATEGY_KEY) {
        let mut network = tiers_of(&data, NETWORK_STRATEGY_KEY)?;
        let production = network.get(PRODUCTION_TIER).cloned().ok_or_else(|| Error::MissingTier {
            resource: NETWORK_STRATEGY_KEY.to_owned(),
            tier: PRODUCTION_TIER.to_owned(),
        })?;
        network.insert(tier.to_owned(), production);
        patch.insert(NETWORK_STRATEGY_KEY.to_owned(), serde_json::to_string(&network)?);
    }

    tracing::info!(tier, resource, "Updating AWS strategy ConfigMap");
    store.patch_strategies(namespace, patch).await
}

/// The tiers of a resource type, values kept as they are stored.
fn tiers_of(data: &BTreeMap<String, String>, resource: &str) -> Result<BTreeMap<String, Box<RawValue>>> {
    let tiers = data.get(resource).ok_or_else(|| {
        Error::Config(format!("{STRATEGY_CONFIG_MAP_NAME} has no {resource} strategies"))
    })?;

    Ok(serde_json::from_str(tiers)?)
}
