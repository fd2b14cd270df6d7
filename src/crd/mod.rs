//! Custom resources this operator reads and patches but does not own.
//!
//! None of these types is installed by the operator, so their schemas are never generated.

/// Serde glue for string-backed enums deriving strum's `EnumString` and `Display` with a
/// `#[strum(default)] Other(String)` variant, so unknown values survive a decode/encode cycle.
macro_rules! string_enum_serde {
    ($($name:ident),+ $(,)?) => {
        $(
            impl From<String> for $name {
                fn from(value: String) -> Self {
                    match value.parse::<$name>() {
                        Ok(known) => known,
                        Err(_) => $name::Other(value),
                    }
                }
            }

            impl From<$name> for String {
                fn from(value: $name) -> Self {
                    value.to_string()
                }
            }
        )+
    };
}

pub mod addon_instance;
pub mod installation;
pub mod olm;
pub mod openshift;

pub use addon_instance::AddonInstance;
pub use addon_instance::AddonInstanceSpec;
pub use addon_instance::AddonInstanceStatus;
pub use installation::Installation;
pub use installation::InstallationSpec;
pub use installation::InstallationStatus;
pub use installation::ProductName;
pub use installation::StageName;
pub use installation::StatusPhase;
pub use olm::ClusterServiceVersion;
pub use olm::InstallPlan;
pub use openshift::ClusterVersion;
pub use openshift::DeploymentConfig;
