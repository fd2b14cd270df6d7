//! Kubernetes events about the objects the operator works on.
//!
//! Events are observability only: [EmitEvent::emit] logs failures instead of failing the
//! reconciliation.
//!
//! ```rust,ignore
//! use rhmi_operator::events::{EmitEvent, EventData, EventRecorder};
//! use rhmi_operator::status::StatusEventReason;
//!
//! let recorder = EventRecorder::new(Arc::new(CachedApiProvider::new(client)), "rhmi-operator");
//! recorder
//!     .emit(&addon_instance, EventData::normal(StatusEventReason::HeartbeatPeriodUpdated, "Heartbeat update period set to 10s"))
//!     .await;
//! ```

pub mod types;

mod recorder;

pub use recorder::EventRecorder;
pub use types::EventData;
pub use types::EventType;
pub use types::Reason;

use async_trait::async_trait;
use kube::Resource;

use crate::error::Result;
use crate::TryResource;

/// Trait for emitting Kubernetes events
#[async_trait]
pub trait EmitEvent<R>: Send + Sync
where
    R: Reason,
{
    /// Emits an event and reports failures. Prefer [EmitEvent::emit] in reconcilers.
    async fn try_emit<K>(&self, object: &K, event: EventData<R>) -> Result<()>
    where
        K: Resource<DynamicType = ()> + TryResource + Clone + Send + Sync;

    /// Emits an event, logging but not propagating errors.
    async fn emit<K>(&self, object: &K, event: EventData<R>)
    where
        K: Resource<DynamicType = ()> + TryResource + Clone + Send + Sync,
    {
        let reason = event.reason.to_owned();
        if let Err(e) = self.try_emit(object, event).await {
            tracing::warn!(
                error = %e,
                reason = %reason,
                "Failed to emit event"
            );
        }
    }
}
