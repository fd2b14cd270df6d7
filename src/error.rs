use std::fmt::Debug;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Any error originating from the `kube-rs` crate
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },
    #[error("{0}")]
    UserInput(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Unnamed k8s object")]
    UnnamedObject,
    #[error("{kind} {namespace}/{name} not found")]
    MissingObject {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("Too many RHMI resources found in namespace {0}, expected one")]
    TooManyInstallations(String),
    #[error("RwLock poisoned: {0}")]
    RwLockPoisoned(String),
    #[error("Failed to decode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to decode YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Failed to decode base64 data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Failed to decompress data: {0}")]
    Io(#[from] std::io::Error),
    #[error("No csvlocator found for installplan {0}")]
    NoCsvLocator(String),
    #[error("{0}")]
    ClusterVersion(String),
    #[error("Unable to parse key: {key}")]
    StrategyOverride { key: String },
    #[error("Invalid tier {tier} for {resource} strategy")]
    MissingTier { resource: String, tier: String },
    #[error("label {0} not found in object")]
    MissingLabel(String),
    #[error("no nodes found")]
    NoNodes,
    #[error("Backup job {job} failed: {message}")]
    BackupFailed { job: String, message: String },
    #[error("Backup job {job} did not complete within {seconds}s")]
    BackupTimeout { job: String, seconds: u64 },

    /// Wraps errors of collaborators that don't have a dedicated variant
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Whether the error is the api server reporting a missing object.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(response),
            } => response.code == 404,
            Error::MissingObject { .. } => true,
            _ => false,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Error::RwLockPoisoned(e.to_string())
    }
}
