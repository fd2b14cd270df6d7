//! The `RHMI` custom resource describing one managed middleware installation.

use std::collections::BTreeMap;
use std::env;

use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Duration;
use k8s_openapi::chrono::Utc;
use kube::CustomResource;
use kube::ResourceExt;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;
use strum::EnumString;

pub const DEFAULT_PULL_SECRET_NAME: &str = "pull-secret";
pub const DEFAULT_PULL_SECRET_NAMESPACE: &str = "openshift-config";

pub const ENV_ALERT_SMTP_FROM: &str = "ALERT_SMTP_FROM";

pub const ANNOTATION_IN_PROW: &str = "in_prow";
pub const ANNOTATION_SKIP_FINAL_DB_SNAPSHOTS: &str = "skip_final_db_snapshots";

/// Hours an installation or uninstallation may take before it is reported as blocked.
pub const BLOCKED_AFTER_HOURS: i64 = 2;

/// Products whose health decides whether the installation meets its SLO.
pub const CORE_PRODUCTS: [ProductName; 3] = [ProductName::CloudResources, ProductName::RhssoUser, ProductName::ThreeScale];

/// Phase of a stage or product reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, EnumString, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusPhase {
    #[default]
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "awaiting operator")]
    AwaitingOperator,
    #[strum(serialize = "awaiting cloud resources")]
    AwaitingCloudResources,
    #[strum(serialize = "creating components")]
    CreatingComponents,
    #[strum(serialize = "awaiting components")]
    AwaitingComponents,
    #[strum(serialize = "in progress")]
    InProgress,
    #[strum(serialize = "completed")]
    Completed,
    #[strum(serialize = "failed")]
    Failed,
    /// A value that is not known to this operator, kept verbatim.
    #[strum(default)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, EnumString, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageName {
    #[default]
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "bootstrap")]
    Bootstrap,
    #[strum(serialize = "installation")]
    Installation,
    #[strum(serialize = "cloud-resources")]
    CloudResources,
    #[strum(serialize = "products")]
    Products,
    #[strum(serialize = "complete")]
    Complete,
    #[strum(serialize = "uninstall - products")]
    UninstallProducts,
    #[strum(serialize = "uninstall - cloud-resources")]
    UninstallCloudResources,
    #[strum(serialize = "uninstall - bootstrap")]
    UninstallBootstrap,
    /// A value that is not known to this operator, kept verbatim.
    #[strum(default)]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProductName {
    #[strum(serialize = "rhsso")]
    Rhsso,
    #[strum(serialize = "rhssouser")]
    RhssoUser,
    #[strum(serialize = "3scale")]
    ThreeScale,
    #[strum(serialize = "cloud-resources")]
    CloudResources,
    #[strum(serialize = "marin3r")]
    Marin3r,
    #[strum(serialize = "grafana")]
    Grafana,
    /// A value that is not known to this operator, kept verbatim.
    #[strum(default)]
    Other(String),
}

string_enum_serde!(StatusPhase, StageName, ProductName);

impl Default for ProductName {
    fn default() -> Self {
        ProductName::Other(String::new())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "integreatly.org",
    version = "v1alpha1",
    kind = "RHMI",
    plural = "rhmis",
    root = "Installation",
    status = "InstallationStatus",
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub namespace_prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub routing_subdomain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub use_cluster_storage: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alert_from_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alerting_email_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority_class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<PullSecretSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PullSecretSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    #[serde(default)]
    pub stages: BTreeMap<StageName, StageStatus>,
    #[serde(default)]
    pub stage: StageName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_version: String,
    #[serde(default)]
    pub last_error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quota: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to_quota: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StageStatus {
    #[serde(default)]
    pub name: StageName,
    #[serde(default)]
    pub phase: StatusPhase,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub products: BTreeMap<ProductName, ProductStatus>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProductStatus {
    #[serde(default)]
    pub name: ProductName,
    #[serde(rename = "operator", default, skip_serializing_if = "String::is_empty")]
    pub operator_version: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub host: String,
    #[serde(rename = "status", default)]
    pub phase: StatusPhase,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub uninstall: bool,
}

static EMPTY_STATUS: InstallationStatus = InstallationStatus {
    stages: BTreeMap::new(),
    stage: StageName::None,
    version: String::new(),
    to_version: String::new(),
    last_error: String::new(),
    quota: String::new(),
    to_quota: String::new(),
};

impl Installation {
    /// The observed status, or an empty one when the installation has not been reconciled yet.
    pub fn current_status(&self) -> &InstallationStatus {
        self.status.as_ref().unwrap_or(&EMPTY_STATUS)
    }

    pub fn stage(&self, name: &StageName) -> Option<&StageStatus> {
        self.current_status().stages.get(name)
    }

    pub fn install_stage(&self) -> Option<&StageStatus> {
        self.stage(&StageName::Installation)
    }

    /// A version is written to the status once the first installation completed.
    pub fn is_installed(&self) -> bool {
        !self.current_status().version.is_empty()
    }

    pub fn is_uninstalling(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the installation has been pending for longer than [BLOCKED_AFTER_HOURS].
    ///
    /// An object without a creation timestamp is treated as created at the Unix epoch.
    pub fn is_install_blocked(&self, now: DateTime<Utc>) -> bool {
        let created = self
            .metadata
            .creation_timestamp
            .as_ref()
            .map_or_else(DateTime::default, |time| time.0);

        exceeded(created, now) && !self.is_installed() && !self.is_uninstalling()
    }

    pub fn is_uninstall_blocked(&self, now: DateTime<Utc>) -> bool {
        self.metadata
            .deletion_timestamp
            .as_ref()
            .is_some_and(|deleted| exceeded(deleted.0, now))
    }

    /// Not uninstalling and the overall stage is not `complete`.
    pub fn is_degraded(&self) -> bool {
        !self.is_uninstalling() && self.current_status().stage != StageName::Complete
    }

    pub fn is_product_completed(&self, product: &ProductName) -> bool {
        self.install_stage()
            .and_then(|stage| stage.products.get(product))
            .is_some_and(|status| status.phase == StatusPhase::Completed)
    }

    pub fn is_core_components_healthy(&self) -> bool {
        CORE_PRODUCTS.iter().all(|product| self.is_product_completed(product))
    }

    /// Products of the installation stage that are not completed, sorted by name.
    pub fn degraded_components(&self) -> Vec<ProductName> {
        let mut degraded: Vec<ProductName> = self
            .install_stage()
            .map(|stage| {
                stage
                    .products
                    .iter()
                    .filter(|(_, status)| status.phase != StatusPhase::Completed)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();

        degraded.sort_by_cached_key(ToString::to_string);
        degraded
    }

    /// The status of a product in whichever stage reports it first.
    pub fn product_status(&self, product: &ProductName) -> ProductStatus {
        self.current_status()
            .stages
            .values()
            .find_map(|stage| stage.products.get(product))
            .cloned()
            .unwrap_or_else(|| ProductStatus {
                name: product.clone(),
                ..Default::default()
            })
    }

    pub fn pull_secret(&self) -> PullSecretSpec {
        match &self.spec.pull_secret {
            Some(secret) if !secret.name.is_empty() && !secret.namespace.is_empty() => secret.clone(),
            _ => PullSecretSpec {
                name: DEFAULT_PULL_SECRET_NAME.to_owned(),
                namespace: DEFAULT_PULL_SECRET_NAMESPACE.to_owned(),
            },
        }
    }

    /// The sender address for alert emails, falling back to `ALERT_SMTP_FROM`.
    pub fn alert_from_address(&self) -> Option<String> {
        if !self.spec.alert_from_address.is_empty() {
            return Some(self.spec.alert_from_address.clone());
        }

        env::var(ENV_ALERT_SMTP_FROM).ok().filter(|address| !address.is_empty())
    }

    pub fn uses_cluster_storage(&self) -> bool {
        self.spec.use_cluster_storage.eq_ignore_ascii_case("true")
    }

    pub fn in_prow(&self) -> bool {
        self.annotation_is_true(ANNOTATION_IN_PROW)
    }

    pub fn skip_final_db_snapshots(&self) -> bool {
        self.annotation_is_true(ANNOTATION_SKIP_FINAL_DB_SNAPSHOTS)
    }

    fn annotation_is_true(&self, key: &str) -> bool {
        self.annotations().get(key).is_some_and(|value| value == "true")
    }
}

fn exceeded(since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    since
        .checked_add_signed(Duration::hours(BLOCKED_AFTER_HOURS))
        .is_some_and(|deadline| deadline < now)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    pub fn now() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    pub fn hours_ago(hours: i64) -> Time {
        Time(now() - Duration::hours(hours))
    }

    pub fn product(name: ProductName, phase: StatusPhase) -> (ProductName, ProductStatus) {
        (
            name.clone(),
            ProductStatus {
                name,
                phase,
                ..Default::default()
            },
        )
    }

    /// An installation created an hour ago whose install stage reports the given products.
    pub fn installation(
        stage: StageName,
        version: &str,
        products: impl IntoIterator<Item = (ProductName, ProductStatus)>,
    ) -> Installation {
        let install_stage = StageStatus {
            name: StageName::Installation,
            phase: StatusPhase::InProgress,
            products: products.into_iter().collect(),
        };

        Installation {
            metadata: ObjectMeta {
                name: Some("rhoam".to_owned()),
                namespace: Some("redhat-rhoam-operator".to_owned()),
                creation_timestamp: Some(hours_ago(1)),
                ..Default::default()
            },
            spec: InstallationSpec {
                type_: "managed-api".to_owned(),
                ..Default::default()
            },
            status: Some(InstallationStatus {
                stages: BTreeMap::from([(StageName::Installation, install_stage)]),
                stage,
                version: version.to_owned(),
                ..Default::default()
            }),
        }
    }

    pub fn healthy_installation() -> Installation {
        installation(
            StageName::Complete,
            "1.40.0",
            [
                product(ProductName::CloudResources, StatusPhase::Completed),
                product(ProductName::RhssoUser, StatusPhase::Completed),
                product(ProductName::ThreeScale, StatusPhase::Completed),
            ],
        )
    }

    #[test]
    fn test_status_decodes_known_and_unknown_values() {
        // Given: A status document as written by the installation reconcilers
        let json = r#"{
            "stage": "complete",
            "version": "1.40.0",
            "lastError": "",
            "stages": {
                "installation": {
                    "name": "installation",
                    "phase": "completed",
                    "products": {
                        "3scale": {"name": "3scale", "version": "2.13.0", "host": "", "status": "completed"},
                        "apicurito": {"name": "apicurito", "version": "1.0", "host": "", "status": "paused"}
                    }
                }
            }
        }"#;

        // When: Decoding it
        let status: InstallationStatus = serde_json::from_str(json).unwrap();

        // Then: Known values map to variants and unknown ones are preserved
        assert_eq!(status.stage, StageName::Complete);
        let products = &status.stages[&StageName::Installation].products;
        assert_eq!(products[&ProductName::ThreeScale].phase, StatusPhase::Completed);
        let unknown = &products[&ProductName::from("apicurito".to_owned())];
        assert_eq!(unknown.phase, StatusPhase::Other("paused".to_owned()));

        let encoded = serde_json::to_value(&status).unwrap();
        assert_eq!(encoded["stages"]["installation"]["products"]["apicurito"]["status"], "paused");
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(StageName::from("uninstall - products".to_owned()), StageName::UninstallProducts);
        assert_eq!(StageName::from("".to_owned()), StageName::None);
        assert_eq!(String::from(StatusPhase::AwaitingCloudResources), "awaiting cloud resources");
        assert_eq!(String::from(StatusPhase::default()), "");
        assert_eq!(ProductName::ThreeScale.to_string(), "3scale");
        assert_eq!(ProductName::from("apicurito".to_owned()).to_string(), "apicurito");
        assert_eq!(ProductName::default(), ProductName::Other(String::new()));
    }

    #[test]
    fn test_is_installed_requires_version() {
        assert!(healthy_installation().is_installed());
        assert!(!installation(StageName::Installation, "", []).is_installed());
        assert!(!Installation::new("rhoam", InstallationSpec::default()).is_installed());
    }

    #[test]
    fn test_install_blocked_after_two_hours() {
        // Given: An installation without a version created three hours ago
        let mut installation = installation(StageName::Installation, "", []);
        installation.metadata.creation_timestamp = Some(hours_ago(3));

        // Then: It is blocked
        assert!(installation.is_install_blocked(now()));

        // When: It was created only an hour ago
        installation.metadata.creation_timestamp = Some(hours_ago(1));

        // Then: It is not blocked yet
        assert!(!installation.is_install_blocked(now()));
    }

    #[test]
    fn test_install_blocked_ignores_installed_and_uninstalling() {
        let mut installed = healthy_installation();
        installed.metadata.creation_timestamp = Some(hours_ago(3));
        assert!(!installed.is_install_blocked(now()));

        let mut uninstalling = installation(StageName::Installation, "", []);
        uninstalling.metadata.creation_timestamp = Some(hours_ago(3));
        uninstalling.metadata.deletion_timestamp = Some(hours_ago(1));
        assert!(!uninstalling.is_install_blocked(now()));
    }

    #[test]
    fn test_missing_creation_timestamp_counts_as_epoch() {
        let mut installation = installation(StageName::Installation, "", []);
        installation.metadata.creation_timestamp = None;

        assert!(installation.is_install_blocked(now()));
    }

    #[test]
    fn test_uninstall_blocked_after_two_hours() {
        let mut installation = healthy_installation();
        assert!(!installation.is_uninstall_blocked(now()));

        installation.metadata.deletion_timestamp = Some(hours_ago(1));
        assert!(installation.is_uninstalling());
        assert!(!installation.is_uninstall_blocked(now()));

        installation.metadata.deletion_timestamp = Some(hours_ago(3));
        assert!(installation.is_uninstall_blocked(now()));
    }

    #[test]
    fn test_degraded_unless_complete_or_uninstalling() {
        assert!(!healthy_installation().is_degraded());
        assert!(installation(StageName::Products, "1.40.0", []).is_degraded());

        let mut uninstalling = installation(StageName::UninstallProducts, "1.40.0", []);
        uninstalling.metadata.deletion_timestamp = Some(hours_ago(1));
        assert!(!uninstalling.is_degraded());
    }

    #[test]
    fn test_core_components_health() {
        // Given: A healthy installation
        let healthy = healthy_installation();
        assert!(healthy.is_core_components_healthy());

        // When: 3scale is still in progress and a non core product failed
        let unhealthy = installation(
            StageName::Complete,
            "1.40.0",
            [
                product(ProductName::CloudResources, StatusPhase::Completed),
                product(ProductName::RhssoUser, StatusPhase::Completed),
                product(ProductName::ThreeScale, StatusPhase::InProgress),
                product(ProductName::Grafana, StatusPhase::Failed),
            ],
        );

        // Then: Core components are unhealthy and both products are degraded, sorted by name
        assert!(!unhealthy.is_core_components_healthy());
        assert_eq!(unhealthy.degraded_components(), vec![ProductName::ThreeScale, ProductName::Grafana]);
    }

    #[test]
    fn test_missing_core_product_is_unhealthy() {
        let installation = installation(
            StageName::Complete,
            "1.40.0",
            [product(ProductName::CloudResources, StatusPhase::Completed)],
        );

        assert!(!installation.is_core_components_healthy());
    }

    #[test]
    fn test_product_status_falls_back_to_name() {
        let installation = healthy_installation();

        assert_eq!(
            installation.product_status(&ProductName::ThreeScale).phase,
            StatusPhase::Completed
        );

        let missing = installation.product_status(&ProductName::Marin3r);
        assert_eq!(missing.name, ProductName::Marin3r);
        assert_eq!(missing.phase, StatusPhase::None);
    }

    #[test]
    fn test_pull_secret_defaults() {
        let mut installation = healthy_installation();
        assert_eq!(installation.pull_secret().name, DEFAULT_PULL_SECRET_NAME);
        assert_eq!(installation.pull_secret().namespace, DEFAULT_PULL_SECRET_NAMESPACE);

        installation.spec.pull_secret = Some(PullSecretSpec {
            name: "custom".to_owned(),
            namespace: String::new(),
        });
        assert_eq!(installation.pull_secret().name, DEFAULT_PULL_SECRET_NAME);

        installation.spec.pull_secret = Some(PullSecretSpec {
            name: "custom".to_owned(),
            namespace: "secrets".to_owned(),
        });
        assert_eq!(installation.pull_secret().name, "custom");
        assert_eq!(installation.pull_secret().namespace, "secrets");
    }

    #[test]
    fn test_alert_from_address_prefers_spec() {
        let mut installation = healthy_installation();
        installation.spec.alert_from_address = "noreply@example.com".to_owned();

        assert_eq!(installation.alert_from_address().as_deref(), Some("noreply@example.com"));
    }

    #[test]
    fn test_annotation_toggles() {
        let mut installation = healthy_installation();
        assert!(!installation.in_prow());
        assert!(!installation.skip_final_db_snapshots());

        installation.metadata.annotations = Some(BTreeMap::from([
            (ANNOTATION_IN_PROW.to_owned(), "true".to_owned()),
            (ANNOTATION_SKIP_FINAL_DB_SNAPSHOTS.to_owned(), "yes".to_owned()),
        ]));

        assert!(installation.in_prow());
        assert!(!installation.skip_final_db_snapshots());
    }
}
