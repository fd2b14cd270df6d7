use std::sync::Arc;

use kube::Client;
use rhmi_operator::cache::CachedApiProvider;
use rhmi_operator::events::EventRecorder;
use rhmi_operator::k8s::K8sRepository;
use rhmi_operator::status::ControllerOptions;
use rhmi_operator::status::StatusContext;
use rhmi_operator::status::StatusReconciler;
use rhmi_operator::Reconcile;

const COMPONENT: &str = "rhmi-operator";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let options = ControllerOptions::from_env()?;
    tracing::info!(
        namespace = options.addon_instance_namespace(),
        addon_instance = options.addon_instance_name(),
        heartbeat_interval = ?options.heartbeat_interval(),
        "Starting addon instance status controller"
    );

    let client = Client::try_default().await?;
    let repository = Arc::new(K8sRepository::new(client.clone()));
    let events = Arc::new(EventRecorder::new(
        Arc::new(CachedApiProvider::new(client.clone())),
        COMPONENT,
    ));
    let context = StatusContext::new(options, repository, events);

    StatusReconciler::new(client, context).start().await;

    tracing::info!("Status controller stopped");
    Ok(())
}
