//! Maps the state of an [Installation] to the conditions reported on the addon instance.
//!
//! Three families are reported for an existing installation, always in this order:
//!
//! * installed: any of installed, install blocked and uninstall blocked that hold,
//! * health: exactly one of healthy and unhealthy,
//! * degraded: exactly one of degraded and non-degraded.
//!
//! A missing installation means the addon was removed and only the uninstalled condition
//! is reported.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Utc;

use crate::crd::addon_instance::CONDITION_DEGRADED;
use crate::crd::addon_instance::CONDITION_INSTALLED;
use crate::crd::addon_instance::REASON_BLOCKED;
use crate::crd::addon_instance::REASON_SETUP_COMPLETE;
use crate::crd::addon_instance::REASON_TEARDOWN_COMPLETE;
use crate::crd::Installation;
use crate::crd::ProductName;

pub const CONDITION_CORE_COMPONENTS_HEALTHY: &str = "integreatly.org/CoreComponentsHealthy";

pub const REASON_CORE_COMPONENTS_HEALTHY: &str = "CoreComponentsHealthy";
pub const REASON_CORE_COMPONENTS_UNHEALTHY: &str = "CoreComponentsUnhealthy";
pub const REASON_DEGRADED: &str = "Degraded";
pub const REASON_NON_DEGRADED: &str = "NonDegraded";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

fn condition(type_: &str, status: &str, reason: &str, message: impl Into<String>, now: DateTime<Utc>) -> Condition {
    Condition {
        type_: type_.to_owned(),
        status: status.to_owned(),
        reason: reason.to_owned(),
        message: message.into(),
        last_transition_time: Time(now),
        observed_generation: None,
    }
}

pub fn installed(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_INSTALLED,
        STATUS_TRUE,
        REASON_SETUP_COMPLETE,
        "Installation completed",
        now,
    )
}

pub fn install_blocked(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_INSTALLED,
        STATUS_FALSE,
        REASON_BLOCKED,
        "Installation has not completed within two hours",
        now,
    )
}

pub fn uninstall_blocked(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_INSTALLED,
        STATUS_TRUE,
        REASON_BLOCKED,
        "Uninstallation has not completed within two hours",
        now,
    )
}

pub fn uninstalled(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_INSTALLED,
        STATUS_FALSE,
        REASON_TEARDOWN_COMPLETE,
        "Uninstallation completed",
        now,
    )
}

pub fn healthy(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_CORE_COMPONENTS_HEALTHY,
        STATUS_TRUE,
        REASON_CORE_COMPONENTS_HEALTHY,
        "Core components are healthy",
        now,
    )
}

/// The unhealthy condition listing the components that are not completed.
pub fn unhealthy(degraded_components: &[ProductName], now: DateTime<Utc>) -> Condition {
    let components = degraded_components
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    condition(
        CONDITION_CORE_COMPONENTS_HEALTHY,
        STATUS_FALSE,
        REASON_CORE_COMPONENTS_UNHEALTHY,
        format!("Core components are unhealthy, degraded components: [{components}]"),
        now,
    )
}

pub fn degraded(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_DEGRADED,
        STATUS_TRUE,
        REASON_DEGRADED,
        "Installation is not in the complete stage",
        now,
    )
}

pub fn non_degraded(now: DateTime<Utc>) -> Condition {
    condition(
        CONDITION_DEGRADED,
        STATUS_FALSE,
        REASON_NON_DEGRADED,
        "Installation is in the complete stage",
        now,
    )
}

/// Builds the conditions for one reconcile pass. Never fails.
pub fn build_conditions(installation: Option<&Installation>, now: DateTime<Utc>) -> Vec<Condition> {
    let Some(installation) = installation else {
        tracing::info!("Addon successfully uninstalled");
        return vec![uninstalled(now)];
    };

    let mut conditions = installed_conditions(installation, now);
    conditions.push(health_condition(installation, now));
    conditions.push(degraded_condition(installation, now));
    conditions
}

fn installed_conditions(installation: &Installation, now: DateTime<Utc>) -> Vec<Condition> {
    let mut conditions = Vec::new();

    if installation.is_installed() {
        conditions.push(installed(now));
    }
    if installation.is_install_blocked(now) {
        conditions.push(install_blocked(now));
    }
    if installation.is_uninstall_blocked(now) {
        conditions.push(uninstall_blocked(now));
    }

    conditions
}

fn health_condition(installation: &Installation, now: DateTime<Utc>) -> Condition {
    if installation.is_core_components_healthy() {
        healthy(now)
    } else {
        unhealthy(&installation.degraded_components(), now)
    }
}

fn degraded_condition(installation: &Installation, now: DateTime<Utc>) -> Condition {
    if installation.is_degraded() {
        tracing::warn!(
            stage = %installation.current_status().stage,
            "Installation degraded"
        );
        degraded(now)
    } else {
        non_degraded(now)
    }
}
