//! Finds the ClusterServiceVersion an InstallPlan is about to install.
//!
//! Depending on the OLM version the CSV step of an InstallPlan either embeds the CSV
//! manifest or references the ConfigMap of the unpacked bundle that holds it. The built-in
//! [Locator]s handle one representation each; [ConditionalCsvLocator] picks the right one per
//! InstallPlan and [CachedCsvLocator] memoizes what was found.

use std::collections::HashMap;
use std::io::Read;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use k8s_openapi::api::core::v1::ConfigMap;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::crd::olm::CLUSTER_SERVICE_VERSION_KIND;
use crate::crd::ClusterServiceVersion;
use crate::crd::InstallPlan;
use crate::error::Error;
use crate::error::Result;

/// Read access to ConfigMaps for locators that follow bundle references.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigMapSource: Send + Sync {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
}

#[async_trait]
pub trait CsvLocator: Send + Sync {
    /// The CSV the InstallPlan installs, `None` when the plan has no CSV step or the
    /// referenced bundle holds no CSV.
    async fn get_csv(&self, source: &dyn ConfigMapSource, install_plan: &InstallPlan)
        -> Result<Option<ClusterServiceVersion>>;
}

/// Where the CSV step of an InstallPlan points when the bundle was unpacked to a ConfigMap.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnpackedBundleReference {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub catalog_source_name: String,
    #[serde(default)]
    pub catalog_source_namespace: String,
    #[serde(default)]
    pub replaces: String,
}

/// Reads the CSV embedded in the last CSV step of the plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedCsvLocator;

#[async_trait]
impl CsvLocator for EmbeddedCsvLocator {
    async fn get_csv(
        &self,
        _: &dyn ConfigMapSource,
        install_plan: &InstallPlan,
    ) -> Result<Option<ClusterServiceVersion>> {
        install_plan
            .csv_manifest()
            .map(|manifest| serde_json::from_str(manifest).map_err(Error::from))
            .transpose()
    }
}

/// Follows the bundle reference of the CSV step to the ConfigMap holding the CSV.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigMapCsvLocator;

#[async_trait]
impl CsvLocator for ConfigMapCsvLocator {
    async fn get_csv(
        &self,
        source: &dyn ConfigMapSource,
        install_plan: &InstallPlan,
    ) -> Result<Option<ClusterServiceVersion>> {
        let Some(manifest) = install_plan.csv_manifest() else {
            return Ok(None);
        };

        let reference: UnpackedBundleReference = serde_json::from_str(manifest)?;
        let config_map = source.get_config_map(&reference.namespace, &reference.name).await?;

        csv_from_config_map(&config_map)
    }
}

/// Scans `data`, then `binaryData` (base64 text of gzipped YAML), for the first
/// ClusterServiceVersion manifest.
fn csv_from_config_map(config_map: &ConfigMap) -> Result<Option<ClusterServiceVersion>> {
    for manifest in config_map.data.iter().flat_map(|data| data.values()) {
        if let Some(csv) = decode_csv(manifest)? {
            return Ok(Some(csv));
        }
    }

    for content in config_map.binary_data.iter().flat_map(|data| data.values()) {
        let compressed = BASE64.decode(&content.0)?;
        let mut manifest = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut manifest)?;

        if let Some(csv) = decode_csv(&manifest)? {
            return Ok(Some(csv));
        }
    }

    Ok(None)
}

fn decode_csv(manifest: &str) -> Result<Option<ClusterServiceVersion>> {
    let resource: serde_yaml::Value = serde_yaml::from_str(manifest)?;
    if resource.get("kind").and_then(serde_yaml::Value::as_str) != Some(CLUSTER_SERVICE_VERSION_KIND) {
        return Ok(None);
    }

    Ok(Some(serde_yaml::from_value(resource)?))
}

/// The built-in locators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator {
    Embedded,
    ConfigMap,
}

#[async_trait]
impl CsvLocator for Locator {
    async fn get_csv(
        &self,
        source: &dyn ConfigMapSource,
        install_plan: &InstallPlan,
    ) -> Result<Option<ClusterServiceVersion>> {
        match self {
            Locator::Embedded => EmbeddedCsvLocator.get_csv(source, install_plan).await,
            Locator::ConfigMap => ConfigMapCsvLocator.get_csv(source, install_plan).await,
        }
    }
}

/// Picks a locator for an InstallPlan, `None` when it can't handle the plan.
pub type Selector = fn(&InstallPlan) -> Option<Locator>;

/// Selects [Locator::ConfigMap] when the CSV step is a bundle reference naming a ConfigMap.
pub fn for_reference(install_plan: &InstallPlan) -> Option<Locator> {
    let reference: UnpackedBundleReference = serde_json::from_str(first_csv_manifest(install_plan)?).ok()?;
    (!reference.name.is_empty() && !reference.namespace.is_empty()).then_some(Locator::ConfigMap)
}

/// Selects [Locator::Embedded] when the CSV step embeds a named and namespaced CSV.
pub fn for_embedded(install_plan: &InstallPlan) -> Option<Locator> {
    let csv: ClusterServiceVersion = serde_json::from_str(first_csv_manifest(install_plan)?).ok()?;
    let named = csv.metadata.name.as_deref().is_some_and(|name| !name.is_empty());
    let namespaced = csv.metadata.namespace.as_deref().is_some_and(|ns| !ns.is_empty());
    (named && namespaced).then_some(Locator::Embedded)
}

fn first_csv_manifest(install_plan: &InstallPlan) -> Option<&str> {
    install_plan
        .steps()
        .iter()
        .find(|step| step.resource.kind == CLUSTER_SERVICE_VERSION_KIND)
        .map(|step| step.resource.manifest.as_str())
}

/// Combines selectors; the first one returning a locator wins.
pub fn switch_locators(selectors: Vec<Selector>) -> impl Fn(&InstallPlan) -> Option<Locator> + Send + Sync {
    move |install_plan| selectors.iter().find_map(|select| select(install_plan))
}

/// Delegates to the locator its selector picks for each InstallPlan.
pub struct ConditionalCsvLocator<F>
where
    F: Fn(&InstallPlan) -> Option<Locator> + Send + Sync,
{
    select: F,
}

impl<F> ConditionalCsvLocator<F>
where
    F: Fn(&InstallPlan) -> Option<Locator> + Send + Sync,
{
    pub fn new(select: F) -> Self {
        Self { select }
    }
}

#[async_trait]
impl<F> CsvLocator for ConditionalCsvLocator<F>
where
    F: Fn(&InstallPlan) -> Option<Locator> + Send + Sync,
{
    async fn get_csv(
        &self,
        source: &dyn ConfigMapSource,
        install_plan: &InstallPlan,
    ) -> Result<Option<ClusterServiceVersion>> {
        let locator = (self.select)(install_plan)
            .ok_or_else(|| Error::NoCsvLocator(install_plan.metadata.name.clone().unwrap_or_default()))?;

        locator.get_csv(source, install_plan).await
    }
}

/// Memoizes found CSVs per InstallPlan `namespace/name`. Entries are never evicted.
pub struct CachedCsvLocator<L>
where
    L: CsvLocator,
{
    cache: RwLock<HashMap<String, ClusterServiceVersion>>,
    locator: L,
}

impl<L> CachedCsvLocator<L>
where
    L: CsvLocator,
{
    pub fn new(locator: L) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            locator,
        }
    }
}

#[async_trait]
impl<L> CsvLocator for CachedCsvLocator<L>
where
    L: CsvLocator,
{
    async fn get_csv(
        &self,
        source: &dyn ConfigMapSource,
        install_plan: &InstallPlan,
    ) -> Result<Option<ClusterServiceVersion>> {
        let key = format!(
            "{}/{}",
            install_plan.metadata.namespace.as_deref().unwrap_or_default(),
            install_plan.metadata.name.as_deref().unwrap_or_default()
        );

        let cached = self.cache.read()?.get(&key).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let csv = self.locator.get_csv(source, install_plan).await?;
        if let Some(csv) = &csv {
            self.cache.write()?.insert(key, csv.clone());
        }

        Ok(csv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::olm::InstallPlanSpec;
    use crate::crd::olm::InstallPlanStatus;
    use crate::crd::olm::Step;
    use crate::crd::olm::StepResource;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    const EMBEDDED_CSV: &str = r#"{"apiVersion":"operators.coreos.com/v1alpha1","kind":"ClusterServiceVersion","metadata":{"name":"test-csv","namespace":"test","creationTimestamp":null},"spec":{"install":{"strategy":""},"version":"1.0.0","customresourcedefinitions":{},"apiservicedefinitions":{},"displayName":"","provider":{}},"status":{"lastUpdateTime":null,"lastTransitionTime":null,"certsLastUpdated":null,"certsRotateAt":null}}"#;

    const CSV_YAML: &str = r#"
apiVersion: v1alpha1
kind: ClusterServiceVersion
metadata:
    creationTimestamp: null
    name: test-csv
    namespace: test
spec:
    apiservicedefinitions: {}
    customresourcedefinitions: {}
    displayName: ""
    install:
        strategy: ""
        provider: {}
    version: 1.0.0
status:
    certsLastUpdated: null
    certsRotateAt: null
    lastTransitionTime: null
    lastUpdateTime: null"#;

    const SERVICE_YAML: &str = "apiVersion: v1\nkind: Service\nmetadata:\n    name: metrics\n";

    fn install_plan(name: &str, manifest: &str) -> InstallPlan {
        let mut plan = InstallPlan::new(name, InstallPlanSpec::default());
        plan.metadata.namespace = Some("test".to_owned());
        plan.status = Some(InstallPlanStatus {
            phase: "RequiresApproval".to_owned(),
            plan: vec![Step {
                resource: StepResource {
                    kind: CLUSTER_SERVICE_VERSION_KIND.to_owned(),
                    manifest: manifest.to_owned(),
                    ..Default::default()
                },
                ..Default::default()
            }],
        });
        plan
    }

    fn reference_manifest() -> String {
        serde_json::to_string(&UnpackedBundleReference {
            name: "test-cm".to_owned(),
            namespace: "test".to_owned(),
            ..Default::default()
        })
        .unwrap()
    }

    fn gzip_base64(content: &str) -> ByteString {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();
        ByteString(BASE64.encode(compressed).into_bytes())
    }

    fn config_map_source(config_map: ConfigMap) -> MockConfigMapSource {
        let mut source = MockConfigMapSource::new();
        source
            .expect_get_config_map()
            .withf(|namespace, name| namespace.to_string() == "test" && name.to_string() == "test-cm")
            .returning(move |_, _| Ok(config_map.clone()));
        source
    }

    fn assert_correct_csv(csv: Option<ClusterServiceVersion>) {
        let csv = csv.expect("expected csv to be found");
        assert_eq!(csv.metadata.name.as_deref(), Some("test-csv"));
        assert_eq!(csv.metadata.namespace.as_deref(), Some("test"));
        assert_eq!(csv.spec.version.as_deref(), Some("1.0.0"));
    }

    /// Counts calls and always returns the same CSV.
    struct CountingLocator {
        csv: Option<ClusterServiceVersion>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CsvLocator for CountingLocator {
        async fn get_csv(&self, _: &dyn ConfigMapSource, _: &InstallPlan) -> Result<Option<ClusterServiceVersion>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.csv.clone())
        }
    }

    #[tokio::test]
    async fn test_embedded_locator() {
        // Given: A plan embedding the CSV
        let plan = install_plan("test-ip", EMBEDDED_CSV);

        // When: Locating the CSV
        let csv = EmbeddedCsvLocator.get_csv(&MockConfigMapSource::new(), &plan).await.unwrap();

        // Then: The embedded CSV is decoded
        assert_correct_csv(csv);
    }

    #[tokio::test]
    async fn test_embedded_locator_without_csv_step() {
        let plan = InstallPlan::new("test-ip", InstallPlanSpec::default());

        let csv = EmbeddedCsvLocator.get_csv(&MockConfigMapSource::new(), &plan).await.unwrap();

        assert!(csv.is_none());
    }

    #[tokio::test]
    async fn test_embedded_locator_rejects_invalid_json() {
        let plan = install_plan("test-ip", "{not json");

        let result = EmbeddedCsvLocator.get_csv(&MockConfigMapSource::new(), &plan).await;

        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn test_config_map_locator_reads_binary_data() {
        // Given: A ConfigMap holding the gzipped CSV as binary data
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("test-cm".to_owned()),
                namespace: Some("test".to_owned()),
                ..Default::default()
            },
            binary_data: Some(BTreeMap::from([(
                "managed-api-service.clusterserviceversion.yaml".to_owned(),
                gzip_base64(CSV_YAML),
            )])),
            ..Default::default()
        };
        let source = config_map_source(config_map);
        let plan = install_plan("test-ip", &reference_manifest());

        // When: Locating the CSV
        let csv = ConfigMapCsvLocator.get_csv(&source, &plan).await.unwrap();

        // Then: The CSV is decompressed and decoded
        assert_correct_csv(csv);
    }

    #[tokio::test]
    async fn test_config_map_locator_skips_other_manifests() {
        // Given: A ConfigMap with a Service next to the CSV
        let config_map = ConfigMap {
            data: Some(BTreeMap::from([
                ("a-service.yaml".to_owned(), SERVICE_YAML.to_owned()),
                ("b-csv.yaml".to_owned(), CSV_YAML.to_owned()),
            ])),
            ..Default::default()
        };
        let source = config_map_source(config_map);
        let plan = install_plan("test-ip", &reference_manifest());

        // When: Locating the CSV
        let csv = ConfigMapCsvLocator.get_csv(&source, &plan).await.unwrap();

        // Then: The Service is skipped
        assert_correct_csv(csv);
    }

    #[tokio::test]
    async fn test_config_map_locator_without_csv() {
        let config_map = ConfigMap {
            data: Some(BTreeMap::from([("service.yaml".to_owned(), SERVICE_YAML.to_owned())])),
            ..Default::default()
        };
        let source = config_map_source(config_map);
        let plan = install_plan("test-ip", &reference_manifest());

        let csv = ConfigMapCsvLocator.get_csv(&source, &plan).await.unwrap();

        assert!(csv.is_none());
    }

    #[tokio::test]
    async fn test_config_map_locator_propagates_fetch_errors() {
        let mut source = MockConfigMapSource::new();
        source.expect_get_config_map().returning(|namespace, name| {
            Err(Error::MissingObject {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
        });
        let plan = install_plan("test-ip", &reference_manifest());

        let result = ConfigMapCsvLocator.get_csv(&source, &plan).await;

        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cached_locator_calls_inner_once() {
        // Given: A cached counting locator
        let mut found = ClusterServiceVersion::new("test-csv", Default::default());
        found.metadata.namespace = Some("test".to_owned());
        let cached = CachedCsvLocator::new(CountingLocator {
            csv: Some(found),
            calls: AtomicUsize::new(0),
        });
        let plan = install_plan("test-ip-1", EMBEDDED_CSV);
        let source = MockConfigMapSource::new();

        // When: Asking twice for the same plan
        let first = cached.get_csv(&source, &plan).await.unwrap().unwrap();
        let second = cached.get_csv(&source, &plan).await.unwrap().unwrap();

        // Then: The inner locator ran once and both answers match
        assert_eq!(first.metadata.name.as_deref(), Some("test-csv"));
        assert_eq!(first, second);
        assert_eq!(cached.locator.calls.load(Ordering::SeqCst), 1);

        // When: Asking for another plan
        cached
            .get_csv(&source, &install_plan("test-ip-2", EMBEDDED_CSV))
            .await
            .unwrap();

        // Then: The inner locator ran again
        assert_eq!(cached.locator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_locator_does_not_cache_misses() {
        let cached = CachedCsvLocator::new(CountingLocator {
            csv: None,
            calls: AtomicUsize::new(0),
        });
        let plan = install_plan("test-ip", EMBEDDED_CSV);
        let source = MockConfigMapSource::new();

        assert!(cached.get_csv(&source, &plan).await.unwrap().is_none());
        assert!(cached.get_csv(&source, &plan).await.unwrap().is_none());

        assert_eq!(cached.locator.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_selectors() {
        let embedded = install_plan("test-ip", EMBEDDED_CSV);
        let reference = install_plan("test-ip", &reference_manifest());
        let unnamed = install_plan("test-ip", r#"{"kind":"ConfigMap","name":"","namespace":"test"}"#);

        assert_eq!(for_embedded(&embedded), Some(Locator::Embedded));
        assert_eq!(for_reference(&embedded), None);
        assert_eq!(for_reference(&reference), Some(Locator::ConfigMap));
        assert_eq!(for_embedded(&reference), None);
        assert_eq!(for_reference(&unnamed), None);
    }

    #[test]
    fn test_switch_locators_takes_first_match() {
        let reference = install_plan("test-ip", &reference_manifest());

        let select = switch_locators(vec![for_embedded, for_reference]);
        assert_eq!(select(&reference), Some(Locator::ConfigMap));

        let never: Selector = |_| None;
        let always: Selector = |_| Some(Locator::Embedded);
        assert_eq!(switch_locators(vec![never, always, for_reference])(&reference), Some(Locator::Embedded));
        assert_eq!(switch_locators(vec![never])(&reference), None);
    }

    #[tokio::test]
    async fn test_conditional_locator_dispatches() {
        // Given: A conditional locator over both built-in strategies
        let locator = ConditionalCsvLocator::new(switch_locators(vec![for_reference, for_embedded]));

        // When: Locating the CSV of an embedding plan
        let csv = locator
            .get_csv(&MockConfigMapSource::new(), &install_plan("test-ip", EMBEDDED_CSV))
            .await
            .unwrap();

        // Then: The embedded strategy was used
        assert_correct_csv(csv);
    }

    #[tokio::test]
    async fn test_conditional_locator_without_match_fails() {
        let locator = ConditionalCsvLocator::new(switch_locators(vec![for_reference]));

        let result = locator
            .get_csv(&MockConfigMapSource::new(), &install_plan("test-ip", "{}"))
            .await;

        match result {
            Err(error @ Error::NoCsvLocator(_)) => {
                assert_eq!(error.to_string(), "No csvlocator found for installplan test-ip")
            }
            other => panic!("Expected NoCsvLocator, got {other:?}"),
        }
    }
}
