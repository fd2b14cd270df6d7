use std::env;
use std::time::Duration;

use kube::runtime::reflector::ObjectRef;

use crate::crd::addon_instance::DEFAULT_HEARTBEAT_UPDATE_PERIOD;
use crate::crd::addon_instance::DEFAULT_NAME;
use crate::crd::AddonInstance;
use crate::error::Error;
use crate::error::Result;

pub const ENV_WATCH_NAMESPACE: &str = "WATCH_NAMESPACE";
pub const ENV_ADDON_INSTANCE_NAME: &str = "ADDON_INSTANCE_NAME";
pub const ENV_HEARTBEAT_INTERVAL_SECONDS: &str = "HEARTBEAT_INTERVAL_SECONDS";

/// Settings of the status controller, fixed once the controller is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    addon_instance_name: String,
    addon_instance_namespace: String,
    heartbeat_interval: Duration,
}

#[derive(Debug, Default)]
pub struct ControllerOptionsBuilder {
    addon_instance_name: Option<String>,
    addon_instance_namespace: Option<String>,
    heartbeat_interval: Option<Duration>,
}

impl ControllerOptions {
    pub fn builder() -> ControllerOptionsBuilder {
        ControllerOptionsBuilder::default()
    }

    /// Reads the options from `WATCH_NAMESPACE`, `ADDON_INSTANCE_NAME` and
    /// `HEARTBEAT_INTERVAL_SECONDS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let namespace = lookup(ENV_WATCH_NAMESPACE)
            .ok_or_else(|| Error::Config(format!("{ENV_WATCH_NAMESPACE} must be set")))?;

        let mut builder = Self::builder().with_addon_instance_namespace(namespace);

        if let Some(name) = lookup(ENV_ADDON_INSTANCE_NAME) {
            builder = builder.with_addon_instance_name(name);
        }

        if let Some(seconds) = lookup(ENV_HEARTBEAT_INTERVAL_SECONDS) {
            let seconds = seconds
                .parse::<u64>()
                .ok()
                .filter(|seconds| *seconds > 0)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "{ENV_HEARTBEAT_INTERVAL_SECONDS} must be a positive number of seconds, got {seconds:?}"
                    ))
                })?;
            builder = builder.with_heartbeat_interval(Duration::from_secs(seconds));
        }

        builder.build()
    }

    pub fn addon_instance_name(&self) -> &str {
        &self.addon_instance_name
    }

    pub fn addon_instance_namespace(&self) -> &str {
        &self.addon_instance_namespace
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// The addon instance every reconciliation is funneled to.
    pub fn instance_ref(&self) -> ObjectRef<AddonInstance> {
        ObjectRef::new(&self.addon_instance_name).within(&self.addon_instance_namespace)
    }
}

impl ControllerOptionsBuilder {
    pub fn with_addon_instance_name(mut self, name: impl Into<String>) -> Self {
        self.addon_instance_name = Some(name.into());
        self
    }

    pub fn with_addon_instance_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.addon_instance_namespace = Some(namespace.into());
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    /// Applies the defaults for everything that was not set. The namespace has no default.
    pub fn build(self) -> Result<ControllerOptions> {
        let addon_instance_namespace = self
            .addon_instance_namespace
            .filter(|namespace| !namespace.is_empty())
            .ok_or_else(|| Error::Config("addon instance namespace is required".to_owned()))?;

        let heartbeat_interval = self
            .heartbeat_interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or(DEFAULT_HEARTBEAT_UPDATE_PERIOD);

        Ok(ControllerOptions {
            addon_instance_name: self
                .addon_instance_name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_NAME.to_owned()),
            addon_instance_namespace,
            heartbeat_interval,
        })
    }
}
