//! The addon-operator's `AddonInstance`, the channel through which the addon reports health.

use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

pub const DEFAULT_NAME: &str = "addon-instance";
pub const DEFAULT_HEARTBEAT_UPDATE_PERIOD: Duration = Duration::from_secs(10);

pub const CONDITION_INSTALLED: &str = "addons.managed.openshift.io/Installed";
pub const CONDITION_DEGRADED: &str = "addons.managed.openshift.io/Degraded";

pub const REASON_SETUP_COMPLETE: &str = "SetupComplete";
pub const REASON_TEARDOWN_COMPLETE: &str = "TeardownComplete";
pub const REASON_BLOCKED: &str = "Blocked";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[kube(
    group = "addons.managed.openshift.io",
    version = "v1alpha1",
    kind = "AddonInstance",
    plural = "addoninstances",
    status = "AddonInstanceStatus",
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AddonInstanceSpec {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub marked_for_deletion: bool,
    /// Go duration string, e.g. `10s` or `1m30s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_update_period: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonInstanceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_time: Option<Time>,
}

impl AddonInstance {
    /// The heartbeat period stored in the spec, `None` when absent or not a valid duration.
    pub fn heartbeat_update_period(&self) -> Option<Duration> {
        self.spec
            .heartbeat_update_period
            .as_deref()
            .and_then(|period| parse_go_duration(period).ok())
    }
}

/// Formats a duration the way Go's `time.Duration.String` does.
pub fn format_go_duration(duration: Duration) -> String {
    const MICRO: u128 = 1_000;
    const MILLI: u128 = 1_000_000;
    const SECOND: u128 = 1_000_000_000;

    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_owned();
    }

    if nanos < SECOND {
        let (unit, scale, width) = match nanos {
            n if n < MICRO => ("ns", 1, 0),
            n if n < MILLI => ("µs", MICRO, 3),
            _ => ("ms", MILLI, 6),
        };
        return format!("{}{}{unit}", nanos / scale, fraction(nanos % scale, width));
    }

    let seconds = duration.as_secs();
    let (hours, minutes, seconds) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
    let seconds = format!("{seconds}{}s", fraction(u128::from(duration.subsec_nanos()), 9));

    match (hours, minutes) {
        (0, 0) => seconds,
        (0, minutes) => format!("{minutes}m{seconds}"),
        (hours, minutes) => format!("{hours}h{minutes}m{seconds}"),
    }
}

fn fraction(value: u128, width: usize) -> String {
    if value == 0 || width == 0 {
        return String::new();
    }
    let digits = format!("{value:0width$}");
    format!(".{}", digits.trim_end_matches('0'))
}

/// Parses Go duration syntax (`1h30m`, `1.5s`, `250ms`). Negative durations are rejected.
pub fn parse_go_duration(value: &str) -> Result<Duration> {
    let invalid = || Error::UserInput(format!("invalid duration {value:?}"));

    let input = value.strip_prefix('+').unwrap_or(value);
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() || input.starts_with('-') {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return Err(invalid()),
        };

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let mut part = whole.checked_mul(scale).ok_or_else(invalid)?;
        let mut divisor = 1u128;
        for digit in frac.chars().filter_map(|c| c.to_digit(10)) {
            divisor = divisor.saturating_mul(10);
            part += u128::from(digit) * scale / divisor;
        }

        total = total.checked_add(part).ok_or_else(invalid)?;
        rest = tail;
    }

    let seconds = u64::try_from(total / 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(seconds, (total % 1_000_000_000) as u32))
}
