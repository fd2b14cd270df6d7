//! Heartbeats posted to the addon instance status.
//!
//! A pulse carries the conditions of one reconcile pass. Applying it upserts every
//! condition by type and stamps the heartbeat time, the same way the addon-operator client
//! library does it.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Utc;
use kube::Resource;

use crate::crd::AddonInstance;
use crate::crd::AddonInstanceStatus;
use crate::error::Result;
use crate::status::repository::StatusRepository;
use crate::ObserveGeneration;

#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    now: DateTime<Utc>,
    conditions: Vec<Condition>,
}

impl Pulse {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            conditions: Vec::new(),
        }
    }

    pub fn with_conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

impl ObserveGeneration for AddonInstanceStatus {
    fn add(&mut self, observed_generation: i64) {
        self.observed_generation = Some(observed_generation);
        for condition in &mut self.conditions {
            condition.observed_generation = Some(observed_generation);
        }
    }
}

/// Computes the status of `instance` after receiving `pulse`.
pub fn apply_pulse(instance: &AddonInstance, pulse: &Pulse) -> AddonInstanceStatus {
    let mut status = instance.status.clone().unwrap_or_default();

    for condition in pulse.conditions() {
        set_condition(&mut status.conditions, condition.clone());
    }

    status.last_heartbeat_time = Some(Time(pulse.now()));
    status.with_observed_gen(instance.meta());
    status
}

/// Upserts by type. The transition time only moves when the status value changes.
fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|existing| existing.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status {
                existing.status = condition.status;
                existing.last_transition_time = condition.last_transition_time;
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        None => conditions.push(condition),
    }
}

/// Posts `pulse` to the status of `instance`.
#[tracing::instrument(skip_all, fields(instance = %instance.metadata.name.as_deref().unwrap_or_default()))]
pub async fn send_pulse<S>(repository: &S, instance: &AddonInstance, pulse: Pulse) -> Result<()>
where
    S: StatusRepository + ?Sized,
{
    let status = apply_pulse(instance, &pulse);
    repository.patch_addon_instance_status(instance, &status).await?;
    tracing::debug!(conditions = status.conditions.len(), "Pulse sent");

    Ok(())
}
