use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Utc;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use strum::AsRefStr;
use strum::Display;

use crate::conditions::build_conditions;
use crate::crd::addon_instance::format_go_duration;
use crate::crd::AddonInstance;
use crate::crd::Installation;
use crate::error::Error;
use crate::error::Result;
use crate::events::EmitEvent;
use crate::events::EventData;
use crate::events::Reason;
use crate::status::options::ControllerOptions;
use crate::status::pulse::send_pulse;
use crate::status::pulse::Pulse;
use crate::status::repository::StatusRepository;
use crate::Context;
use crate::Reconcile;
use crate::TryResource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum StatusEventReason {
    HeartbeatPeriodUpdated,
    InstallationDeletionRequested,
    InstallationDeletionFailed,
}

impl Reason for StatusEventReason {}

/// Reports the state of the namespace's installation on the addon instance.
pub struct StatusContext<S, E>
where
    S: StatusRepository,
    E: EmitEvent<StatusEventReason>,
{
    options: ControllerOptions,
    repository: Arc<S>,
    events: Arc<E>,
}

impl<S, E> StatusContext<S, E>
where
    S: StatusRepository,
    E: EmitEvent<StatusEventReason>,
{
    pub fn new(options: ControllerOptions, repository: Arc<S>, events: Arc<E>) -> Self {
        Self {
            options,
            repository,
            events,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// One pass of the status loop for `namespace`, evaluated at `now`.
    ///
    /// Any failure aborts the pass and is returned as is.
    #[tracing::instrument(skip(self), fields(instance = %self.options.addon_instance_name()))]
    pub async fn reconcile_status(&self, namespace: &str, now: DateTime<Utc>) -> Result<Action> {
        let instance = self
            .repository
            .get_addon_instance(namespace, self.options.addon_instance_name())
            .await?;

        self.sync_heartbeat_period(&instance).await?;

        let installation = self.repository.get_installation(namespace).await?;
        if instance.spec.marked_for_deletion {
            if let Some(installation) = &installation {
                self.delete_installation(&instance, installation).await?;
            }
        }

        let conditions = build_conditions(installation.as_ref(), now);
        send_pulse(
            self.repository.as_ref(),
            &instance,
            Pulse::new(now).with_conditions(conditions),
        )
        .await?;

        Ok(Action::requeue(self.options.heartbeat_interval()))
    }

    /// Patches the heartbeat period when it differs from the configured interval. A missing
    /// or unparsable period counts as different.
    async fn sync_heartbeat_period(&self, instance: &AddonInstance) -> Result<()> {
        let interval = self.options.heartbeat_interval();
        if instance.heartbeat_update_period() == Some(interval) {
            return Ok(());
        }

        self.repository.patch_heartbeat_period(instance, interval).await?;
        tracing::info!(
            from = instance.spec.heartbeat_update_period.as_deref().unwrap_or_default(),
            to = %format_go_duration(interval),
            "Heartbeat update period updated"
        );
        self.events
            .emit(
                instance,
                EventData::normal(
                    StatusEventReason::HeartbeatPeriodUpdated,
                    format!("Heartbeat update period set to {}", format_go_duration(interval)),
                ),
            )
            .await;

        Ok(())
    }

    async fn delete_installation(&self, instance: &AddonInstance, installation: &Installation) -> Result<()> {
        if installation.is_uninstalling() {
            return Ok(());
        }

        let name = installation.try_name()?;
        if let Err(error) = self.repository.delete_installation(installation).await {
            self.events
                .emit(
                    instance,
                    EventData::warning(
                        StatusEventReason::InstallationDeletionFailed,
                        format!("Failed to delete installation {name}: {error}"),
                    ),
                )
                .await;
            return Err(error);
        }
        tracing::info!(installation = name, "Addon marked for deletion, deleting installation");
        self.events
            .emit(
                instance,
                EventData::normal(
                    StatusEventReason::InstallationDeletionRequested,
                    format!("Deleting installation {name} as the addon is marked for deletion"),
                ),
            )
            .await;

        Ok(())
    }
}

#[async_trait]
impl<S, E> Context<AddonInstance> for StatusContext<S, E>
where
    S: StatusRepository,
    E: EmitEvent<StatusEventReason>,
{
    async fn handle_apply(&self, object: Arc<AddonInstance>) -> Result<Action> {
        let namespace = object.try_namespace()?;
        self.reconcile_status(&namespace, Utc::now()).await
    }
}

/// Runs the status controller on the configured addon instance.
///
/// Changes to any installation in the instance's namespace trigger the instance as well.
pub struct StatusReconciler<S, E>
where
    S: StatusRepository,
    E: EmitEvent<StatusEventReason>,
{
    context: Arc<StatusContext<S, E>>,
    instances: Api<AddonInstance>,
    installations: Api<Installation>,
}

impl<S, E> StatusReconciler<S, E>
where
    S: StatusRepository,
    E: EmitEvent<StatusEventReason>,
{
    pub fn new(client: Client, context: StatusContext<S, E>) -> Self {
        let namespace = context.options().addon_instance_namespace();
        Self {
            instances: Api::namespaced(client.clone(), namespace),
            installations: Api::namespaced(client, namespace),
            context: Arc::new(context),
        }
    }
}

#[async_trait]
impl<S, E> Reconcile<AddonInstance, StatusContext<S, E>> for StatusReconciler<S, E>
where
    S: StatusRepository + 'static,
    E: EmitEvent<StatusEventReason> + 'static,
{
    fn destruct(self) -> (Controller<AddonInstance>, Arc<StatusContext<S, E>>) {
        let options = self.context.options();
        let instance_ref = options.instance_ref();
        let instances = Config::default().fields(&format!("metadata.name={}", options.addon_instance_name()));

        let controller = Controller::new(self.instances, instances).watches(
            self.installations,
            Config::default(),
            move |_: Installation| Some(instance_ref.clone()),
        );

        (controller, self.context)
    }

    /// Failed passes are retried on the heartbeat cadence, so a transient error costs at
    /// most one missed heartbeat.
    fn error_policy(
        resource: Arc<AddonInstance>,
        error: &Error,
        context: Arc<StatusContext<S, E>>,
    ) -> Action {
        let requeue = Some(context.options().heartbeat_interval());
        context.handle_error(resource, error, requeue)
    }
}
