//! Spreading product pods across availability zones.

use std::collections::BTreeMap;
use std::env;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Affinity;
use k8s_openapi::api::core::v1::PodAffinityTerm;
use k8s_openapi::api::core::v1::PodAntiAffinity;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::WeightedPodAffinityTerm;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::crd::DeploymentConfig;
use crate::error::Error;
use crate::error::Result;

/// Node label holding the availability zone.
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// When `true`, replicas must be spread across zones instead of preferably spread.
pub const ENV_FORCE_ZONE_DISTRIBUTION: &str = "FORCE_ZONE_DISTRIBUTION";
pub const ENV_FORCED_DISTRIBUTION: &str = "FORCED_DISTRIBUTION";

/// Whether zone anti affinity is required, read from the environment.
///
/// Unset means preferred. A value that is not a boolean is a configuration error.
pub fn is_anti_affinity_required() -> Result<bool> {
    anti_affinity_required_from(|key| env::var(key).ok())
}

fn anti_affinity_required_from(lookup: impl Fn(&str) -> Option<String>) -> Result<bool> {
    let Some(value) = lookup(ENV_FORCE_ZONE_DISTRIBUTION).or_else(|| lookup(ENV_FORCED_DISTRIBUTION)) else {
        return Ok(false);
    };

    parse_bool(&value).ok_or_else(|| {
        Error::Config(format!(
            "{ENV_FORCE_ZONE_DISTRIBUTION} must be a boolean, got '{value}'"
        ))
    })
}

/// Accepts the spellings `strconv.ParseBool` accepts.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn selector(match_labels: BTreeMap<String, String>) -> PodAffinityTerm {
    PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_labels: Some(match_labels),
            ..Default::default()
        }),
        topology_key: ZONE_LABEL.to_owned(),
        ..Default::default()
    }
}

pub fn multi_az_anti_affinity_preferred(match_labels: BTreeMap<String, String>) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                pod_affinity_term: selector(match_labels),
                weight: 100,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn multi_az_anti_affinity_required(match_labels: BTreeMap<String, String>) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![selector(match_labels)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn select_anti_affinity(required: bool, match_labels: BTreeMap<String, String>) -> Affinity {
    if required {
        multi_az_anti_affinity_required(match_labels)
    } else {
        multi_az_anti_affinity_preferred(match_labels)
    }
}

/// A workload owning a pod template.
#[derive(Debug, Clone)]
pub enum PodTemplateOwner {
    StatefulSet(StatefulSet),
    Deployment(Deployment),
    DeploymentConfig(DeploymentConfig),
}

impl PodTemplateOwner {
    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            PodTemplateOwner::StatefulSet(owner) => owner.metadata.labels.as_ref(),
            PodTemplateOwner::Deployment(owner) => owner.metadata.labels.as_ref(),
            PodTemplateOwner::DeploymentConfig(owner) => owner.metadata.labels.as_ref(),
        }
    }

    /// The pod template, created empty when the owner has none yet.
    pub fn pod_template_mut(&mut self) -> &mut PodTemplateSpec {
        match self {
            PodTemplateOwner::StatefulSet(owner) => &mut owner.spec.get_or_insert_with(Default::default).template,
            PodTemplateOwner::Deployment(owner) => &mut owner.spec.get_or_insert_with(Default::default).template,
            PodTemplateOwner::DeploymentConfig(owner) => owner.spec.template.get_or_insert_with(Default::default),
        }
    }
}

pub type PodTemplateMutation = Box<dyn Fn(&mut PodTemplateOwner) -> Result<()> + Send + Sync>;

/// Sets zone anti affinity on the owner's pod template, matching pods on the owner's value
/// of `label`.
///
/// Whether the rule is required comes from the environment; unreadable values fall back to
/// preferred.
pub fn mutate_multi_az_anti_affinity(label: &str) -> PodTemplateMutation {
    let required = is_anti_affinity_required().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Falling back to preferred zone anti affinity");
        false
    });

    anti_affinity_mutation(required, label)
}

fn anti_affinity_mutation(required: bool, label: &str) -> PodTemplateMutation {
    let label = label.to_owned();

    Box::new(move |owner: &mut PodTemplateOwner| -> Result<()> {
        let value = owner
            .labels()
            .and_then(|labels| labels.get(&label))
            .cloned()
            .ok_or_else(|| Error::MissingLabel(label.clone()))?;

        let affinity = select_anti_affinity(required, BTreeMap::from([(label.clone(), value)]));
        owner
            .pod_template_mut()
            .spec
            .get_or_insert_with(Default::default)
            .affinity = Some(affinity);

        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::openshift::DeploymentConfigSpec;
    use kube::api::ObjectMeta;

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_owned(), "keycloak".to_owned())])
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| value.to_string())
        }
    }

    fn term_labels(term: &PodAffinityTerm) -> Option<&BTreeMap<String, String>> {
        term.label_selector.as_ref().and_then(|selector| selector.match_labels.as_ref())
    }

    #[test]
    fn test_anti_affinity_required_from_env() {
        assert!(!anti_affinity_required_from(lookup(&[])).unwrap());
        assert!(anti_affinity_required_from(lookup(&[(ENV_FORCE_ZONE_DISTRIBUTION, "true")])).unwrap());
        assert!(anti_affinity_required_from(lookup(&[(ENV_FORCE_ZONE_DISTRIBUTION, "1")])).unwrap());
        assert!(!anti_affinity_required_from(lookup(&[(ENV_FORCE_ZONE_DISTRIBUTION, "False")])).unwrap());
        assert!(anti_affinity_required_from(lookup(&[(ENV_FORCED_DISTRIBUTION, "T")])).unwrap());
        assert!(matches!(
            anti_affinity_required_from(lookup(&[(ENV_FORCE_ZONE_DISTRIBUTION, "yes")])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_preferred_anti_affinity() {
        let affinity = multi_az_anti_affinity_preferred(labels());

        let anti_affinity = affinity.pod_anti_affinity.unwrap();
        assert!(anti_affinity.required_during_scheduling_ignored_during_execution.is_none());
        let terms = anti_affinity.preferred_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].weight, 100);
        assert_eq!(terms[0].pod_affinity_term.topology_key, ZONE_LABEL);
        assert_eq!(term_labels(&terms[0].pod_affinity_term), Some(&labels()));
    }

    #[test]
    fn test_select_required_anti_affinity() {
        let affinity = select_anti_affinity(true, labels());

        let anti_affinity = affinity.pod_anti_affinity.unwrap();
        assert!(anti_affinity.preferred_during_scheduling_ignored_during_execution.is_none());
        let terms = anti_affinity.required_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(terms[0].topology_key, ZONE_LABEL);
        assert_eq!(term_labels(&terms[0]), Some(&labels()));
    }

    #[test]
    fn test_mutation_sets_affinity_on_each_owner_kind() {
        // Given: A labelled owner of each kind
        let metadata = ObjectMeta {
            name: Some("keycloak".to_owned()),
            labels: Some(labels()),
            ..Default::default()
        };
        let owners = vec![
            PodTemplateOwner::StatefulSet(StatefulSet {
                metadata: metadata.clone(),
                ..Default::default()
            }),
            PodTemplateOwner::Deployment(Deployment {
                metadata: metadata.clone(),
                ..Default::default()
            }),
            PodTemplateOwner::DeploymentConfig(DeploymentConfig {
                metadata,
                spec: DeploymentConfigSpec::default(),
            }),
        ];
        let mutation = anti_affinity_mutation(false, "app");

        for mut owner in owners {
            // When: Applying the mutation
            mutation(&mut owner).unwrap();

            // Then: The template prefers spreading pods with the owner's label
            let affinity = owner.pod_template_mut().spec.as_ref().unwrap().affinity.clone().unwrap();
            assert_eq!(affinity, multi_az_anti_affinity_preferred(labels()));
        }
    }

    #[test]
    fn test_mutation_requires_label() {
        // Given: An owner without the label
        let mut owner = PodTemplateOwner::Deployment(Deployment::default());

        // When: Applying the mutation
        let mutation = anti_affinity_mutation(true, "app");
        let error = mutation(&mut owner).unwrap_err();

        // Then: The missing label is reported and nothing changed
        assert_eq!(error.to_string(), "label app not found in object");
        assert!(owner.pod_template_mut().spec.is_none());
    }
}
