//! `rhmi_operator` reports the health of a managed middleware installation (the `RHMI`
//! custom resource) to the OpenShift addon-operator and bundles the helpers the installation
//! reconcilers share.
//!
//! ## Status reporting
//!
//! The [status] controller watches one `AddonInstance` and the installation living next to
//! it. Every pass it keeps the instance's heartbeat period in line with the configured
//! interval, turns the installation state into conditions ([conditions]) and posts them as
//! a pulse. A pass is requeued after the heartbeat interval, so the addon-operator keeps
//! receiving heartbeats even when nothing changes.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kube::Client;
//! use rhmi_operator::cache::CachedApiProvider;
//! use rhmi_operator::events::EventRecorder;
//! use rhmi_operator::k8s::K8sRepository;
//! use rhmi_operator::status::ControllerOptions;
//! use rhmi_operator::status::StatusContext;
//! use rhmi_operator::status::StatusReconciler;
//! use rhmi_operator::Reconcile;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::try_default().await?;
//!     let options = ControllerOptions::builder()
//!         .with_addon_instance_namespace("redhat-rhoam-operator")
//!         .build()?;
//!
//!     let repository = Arc::new(K8sRepository::new(client.clone()));
//!     let events = Arc::new(EventRecorder::new(
//!         Arc::new(CachedApiProvider::new(client.clone())),
//!         "rhmi-operator",
//!     ));
//!     let context = StatusContext::new(options, repository, events);
//!
//!     StatusReconciler::new(client, context).start().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Installation helpers
//!
//! * [csvlocator] finds the ClusterServiceVersion an InstallPlan is about to install.
//! * [strategy] derives new AWS cloud resource tiers from the production tier.
//! * [affinity] spreads product pods across availability zones.
//! * [backup] runs backups concurrently, e.g. as jobs created from CronJobs.
//! * [cluster] answers questions about the cluster itself.
//! * [password] generates credentials.
//!
//! ## Error Handling
//!
//! Everything returns [error::Result]. Collaborators without a dedicated variant can be
//! wrapped in [error::Error::Anyhow].

pub mod affinity;
pub mod backup;
pub mod cache;
pub mod cluster;
pub mod conditions;
pub mod crd;
pub mod csvlocator;
pub mod error;
pub mod events;
pub mod k8s;
pub mod password;
pub mod status;
pub mod strategy;

use std::fmt::Debug;
use std::hash::Hash;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::controller::Error as KubeControllerError;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::Controller;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

const REQUEUE_AFTER_ERROR_SECONDS: u64 = 60;

type ReconciliationResult<R, RE, QE> = StdResult<(ObjectRef<R>, Action), KubeControllerError<RE, QE>>;

/// The Reconcile trait takes care of starting the controller and running the reconciliation
/// loop.
///
/// Implementors only provide [Reconcile::destruct], handing over a configured [Controller]
/// (watches included) and the [Context] that handles each reconciliation.
#[async_trait]
pub trait Reconcile<R, C>: Sized + Send
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default + Eq + Hash + Clone + Debug + Unpin,
    C: Context<R> + 'static,
{
    /// Runs the controller until shutdown, reconciling one object at a time.
    async fn start(self) {
        let (controller, context) = self.destruct();
        controller
            .shutdown_on_signal()
            .run(Self::reconcile, Self::error_policy, context)
            .for_each(Self::handle_reconciliation_result)
            .await;
    }

    /// Callback of the controller for every object that needs reconciling.
    async fn reconcile(resource: Arc<R>, context: Arc<C>) -> Result<Action> {
        context.handle_reconciliation(resource).await
    }

    /// Callback of the controller when [Reconcile::reconcile] failed.
    fn error_policy(resource: Arc<R>, error: &Error, context: Arc<C>) -> Action {
        context.handle_error(resource, error, Self::requeue_after_error_seconds())
    }

    /// Logs the outcome of every reconciliation.
    async fn handle_reconciliation_result<RE, QE>(reconciliation_result: ReconciliationResult<R, RE, QE>)
    where
        RE: Debug + Send,
        QE: Debug + Send,
    {
        match reconciliation_result {
            Ok((resource, action)) => {
                log::debug!("Reconciliation successful. Resource: {resource}, next: {action:?}");
            }
            Err(error) => {
                log::error!("Reconciliation error: {error:?}");
            }
        }
    }

    /// Delay before an object is reconciled again after an error. Override to change it.
    fn requeue_after_error_seconds() -> Option<Duration> {
        Some(Duration::from_secs(REQUEUE_AFTER_ERROR_SECONDS))
    }

    /// Splits the implementor into the controller to run and the context it runs with.
    fn destruct(self) -> (Controller<R>, Arc<C>);
}

/// The Context trait holds the reconciliation logic of a resource.
#[async_trait]
pub trait Context<R>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
    R::DynamicType: Default,
{
    /// Entry point of [Reconcile::reconcile]. Delegates to [Context::handle_apply].
    async fn handle_reconciliation(&self, object: Arc<R>) -> Result<Action> {
        self.handle_apply(object).await
    }

    /// Logs the error and requeues the object after `requeue`, or waits for the next change
    /// when `requeue` is `None`.
    fn handle_error(&self, object: Arc<R>, error: &Error, requeue: Option<Duration>) -> Action {
        log::error!(resource:serde = object; "Reconciliation error:\n{error:?}.");
        requeue.map_or_else(Action::await_change, Action::requeue)
    }

    /// Brings the world in line with `object`.
    ///
    /// Must be idempotent: it runs again on every change and every requeue.
    async fn handle_apply(&self, object: Arc<R>) -> Result<Action>;
}

/// The ObserveGeneration trait records which generation of a resource a status describes.
pub trait ObserveGeneration {
    /// Stores `observed_generation` in the status.
    fn add(&mut self, observed_generation: i64);

    /// Stores the generation of `meta`, if it has one.
    fn with_observed_gen(&mut self, meta: &ObjectMeta) {
        if let Some(observed_generation) = meta.generation {
            self.add(observed_generation)
        }
    }
}

/// The TryResource trait extracts name and namespace of a resource, failing instead of
/// returning options.
pub trait TryResource {
    fn try_name(&self) -> Result<&str>;
    fn try_namespace(&self) -> Result<String>;
}

impl<R> TryResource for R
where
    R: Resource,
{
    fn try_name(&self) -> Result<&str> {
        self.meta().name.as_deref().ok_or(Error::UnnamedObject)
    }

    fn try_namespace(&self) -> Result<String> {
        self.namespace().ok_or_else(|| {
            Error::UserInput("Expected resource to be namespaced. Can't work in an unknown namespace.".to_owned())
        })
    }
}
