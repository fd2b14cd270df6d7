//! [Api] handles shared per namespace, so repositories don't rebuild them on every call.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::RwLock;

use k8s_openapi::NamespaceResourceScope;
use kube::Api;
use kube::Client;
use kube::Resource;
use serde::de::DeserializeOwned;

use crate::error::Result;

/// Abstraction for obtaining namespaced [Api] instances.
///
/// [CachedApiProvider] fills its cache lazily, as namespaces are only known at runtime (the
/// watch namespace, product namespaces of an installation).
pub trait ProvideApi<R>: Send + Sync
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    /// Gets an [Arc<Api>] instance for the given namespace.
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>>;
}

/// Caches [Arc<Api>] instances per namespace, creating them on first use.
///
/// Cache hits only take the read lock.
pub struct CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    client: Client,
    cache: RwLock<HashMap<String, Arc<Api<R>>>>,
}

impl<R> CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl<R> ProvideApi<R> for CachedApiProvider<R>
where
    R: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    R::DynamicType: Default,
{
    fn get(&self, namespace: &str) -> Result<Arc<Api<R>>> {
        {
            let cache = self.cache.read()?;
            if let Some(api) = cache.get(namespace) {
                return Ok(Arc::clone(api));
            }
        }

        let mut cache = self.cache.write()?;

        // Another caller may have filled the slot while we waited for the write lock
        if let Some(api) = cache.get(namespace) {
            return Ok(Arc::clone(api));
        }

        let api = Arc::new(Api::<R>::namespaced(self.client.clone(), namespace));
        cache.insert(namespace.to_owned(), Arc::clone(&api));

        Ok(api)
    }
}
