use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::api::core::v1::EventSource;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::DateTime;
use k8s_openapi::chrono::Utc;
use kube::api::PostParams;
use kube::Resource;

use crate::cache::ProvideApi;
use crate::error::Result;
use crate::events::types::{EventData, Reason};
use crate::events::EmitEvent;
use crate::TryResource;

/// Implementation of EmitEvent that creates `core/v1` Event resources next to the object
pub struct EventRecorder<P>
where
    P: ProvideApi<Event> + Send + Sync,
{
    api_provider: Arc<P>,
    component: Cow<'static, str>,
}

impl<P> EventRecorder<P>
where
    P: ProvideApi<Event> + Send + Sync,
{
    /// `component` is reported as source and reporting component of every event.
    pub fn new(api_provider: Arc<P>, component: impl Into<Cow<'static, str>>) -> Self {
        Self {
            api_provider,
            component: component.into(),
        }
    }
}

#[async_trait]
impl<P, R> EmitEvent<R> for EventRecorder<P>
where
    P: ProvideApi<Event> + Send + Sync,
    R: Reason,
{
    #[tracing::instrument(
        skip(self, object),
        fields(
            object_kind = %K::kind(&()),
            object_name = %object.try_name().unwrap_or_default(),
            object_namespace = %object.try_namespace().unwrap_or_default(),
            event_type = %event.type_,
            event_reason = %event.reason,
        )
    )]
    async fn try_emit<K>(&self, object: &K, event: EventData<R>) -> Result<()>
    where
        K: Resource<DynamicType = ()> + TryResource + Clone + Send + Sync,
    {
        let namespace = object.try_namespace()?;
        let k8s_event = self.build_event(object, event, Utc::now())?;

        self.api_provider
            .get(&namespace)?
            .create(&PostParams::default(), &k8s_event)
            .await?;

        Ok(())
    }
}

impl<P> EventRecorder<P>
where
    P: ProvideApi<Event> + Send + Sync,
{
    /// The Event reporting `event` on `object`, placed in the object's namespace.
    fn build_event<K, R>(&self, object: &K, event: EventData<R>, now: DateTime<Utc>) -> Result<Event>
    where
        K: Resource<DynamicType = ()> + TryResource,
        R: Reason,
    {
        let namespace = object.try_namespace()?;
        let name = object.try_name()?;

        Ok(Event {
            metadata: ObjectMeta {
                name: Some(event_name(name, now)),
                namespace: Some(namespace),
                ..Default::default()
            },
            involved_object: object.object_ref(&()),
            reason: Some(event.reason.to_string()),
            message: Some(event.message),
            type_: Some(event.type_.to_string()),
            count: Some(1),
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            source: Some(EventSource {
                component: Some(self.component.to_string()),
                ..Default::default()
            }),
            reporting_component: Some(self.component.to_string()),
            ..Default::default()
        })
    }
}

/// Unique per object and instant, the way client-go names events.
fn event_name(object_name: &str, now: DateTime<Utc>) -> String {
    format!("{object_name}.{:x}", now.timestamp_nanos_opt().unwrap_or_default())
}
