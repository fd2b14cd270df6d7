//! Backups taken before upgrades.
//!
//! A [BackupExecutor] performs one backup and waits for it. [ConcurrentBackupExecutor] fans a
//! backup out to several executors and fails as soon as one of them fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::batch::v1::Job;
use kube::api::ObjectMeta;
#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::error::Result;
use crate::password::generate_name_suffix;

/// Interval between two checks of a running backup job.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BackupExecutor: Send + Sync {
    /// Performs the backup and waits until it finished.
    ///
    /// Executors that poll for completion give up after `timeout`.
    async fn perform_backup(&self, timeout: Duration) -> Result<()>;
}

/// Backs up nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackupExecutor;

#[async_trait]
impl BackupExecutor for NoopBackupExecutor {
    async fn perform_backup(&self, _: Duration) -> Result<()> {
        Ok(())
    }
}

/// Runs all inner executors at once and returns the first error.
///
/// The timeout is handed to every inner executor unchanged.
pub struct ConcurrentBackupExecutor {
    executors: Vec<Box<dyn BackupExecutor>>,
}

impl ConcurrentBackupExecutor {
    pub fn new(executors: Vec<Box<dyn BackupExecutor>>) -> Self {
        Self { executors }
    }
}

#[async_trait]
impl BackupExecutor for ConcurrentBackupExecutor {
    async fn perform_backup(&self, timeout: Duration) -> Result<()> {
        try_join_all(self.executors.iter().map(|executor| executor.perform_backup(timeout))).await?;
        Ok(())
    }
}

/// Kubernetes access needed to run a CronJob once.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn get_cron_job(&self, namespace: &str, name: &str) -> Result<CronJob>;

    async fn create_job(&self, job: &Job) -> Result<Job>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Job>;
}

/// Triggers a CronJob by creating a Job from its template and waits for the Job.
pub struct CronJobBackupExecutor<C>
where
    C: JobClient,
{
    client: Arc<C>,
    cron_job_name: String,
    namespace: String,
    job_name_prefix: String,
    poll_interval: Duration,
}

impl<C> CronJobBackupExecutor<C>
where
    C: JobClient,
{
    pub fn new(
        client: Arc<C>,
        cron_job_name: impl Into<String>,
        namespace: impl Into<String>,
        job_name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            cron_job_name: cron_job_name.into(),
            namespace: namespace.into(),
            job_name_prefix: job_name_prefix.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn job_from(&self, cron_job: &CronJob) -> Job {
        let template = cron_job
            .spec
            .as_ref()
            .map(|spec| spec.job_template.clone())
            .unwrap_or_default();
        let template_metadata = template.metadata.unwrap_or_default();

        Job {
            metadata: ObjectMeta {
                name: Some(format!("{}-{}", self.job_name_prefix, generate_name_suffix(5))),
                namespace: Some(self.namespace.clone()),
                labels: template_metadata.labels,
                annotations: template_metadata.annotations,
                ..Default::default()
            },
            spec: template.spec,
            status: None,
        }
    }

    async fn wait_for(&self, name: &str) -> Result<()> {
        loop {
            let job = self.client.get_job(&self.namespace, name).await?;
            let status = job.status.unwrap_or_default();

            if let Some(failure) = status
                .conditions
                .iter()
                .flatten()
                .find(|condition| condition.type_ == "Failed" && condition.status == "True")
            {
                return Err(Error::BackupFailed {
                    job: name.to_owned(),
                    message: failure.message.clone().unwrap_or_default(),
                });
            }

            if status.completion_time.is_some() {
                return Ok(());
            }

            tracing::debug!(job = name, "Backup job still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl<C> BackupExecutor for CronJobBackupExecutor<C>
where
    C: JobClient,
{
    #[tracing::instrument(skip(self))]
    async fn perform_backup(&self, timeout: Duration) -> Result<()> {
        let cron_job = self.client.get_cron_job(&self.namespace, &self.cron_job_name).await?;
        let job = self.client.create_job(&self.job_from(&cron_job)).await?;
        let name = job.metadata.name.unwrap_or_default();
        tracing::info!(
            cron_job = %self.cron_job_name,
            namespace = %self.namespace,
            job = %name,
            "Created backup job"
        );

        tokio::time::timeout(timeout, self.wait_for(&name))
            .await
            .map_err(|_| Error::BackupTimeout {
                job: name.clone(),
                seconds: timeout.as_secs(),
            })??;

        tracing::info!(job = %name, "Backup job completed");
        Ok(())
    }
}
