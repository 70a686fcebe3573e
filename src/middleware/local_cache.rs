//! Request-local cache stores.
//!
//! A [`LocalStore`] lives exactly as long as one exchange. Stores are kept
//! in a shared [`LocalCacheRegistry`] keyed by the exchange id, never in the
//! interceptor itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::stack::Interceptor;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory cache scoped to one exchange.
#[derive(Debug, Default)]
pub struct LocalStore {
    entries: Mutex<HashMap<String, Bytes>>,
}

impl LocalStore {
    pub fn read(&self, key: &str) -> Option<Bytes> {
        lock(&self.entries).get(key).cloned()
    }

    pub fn write(&self, key: impl Into<String>, value: impl Into<Bytes>) {
        lock(&self.entries).insert(key.into(), value.into());
    }

    pub fn delete(&self, key: &str) -> bool {
        lock(&self.entries).remove(key).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Stores = HashMap<(u64, String), Arc<LocalStore>>;

/// Shared map from (exchange id, cache key) to the exchange's store.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Debug, Default)]
pub struct LocalCacheRegistry {
    stores: Arc<Mutex<Stores>>,
}

impl LocalCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store `key` installed for `req`'s exchange.
    pub fn cache_for(&self, req: &Request, key: &str) -> Option<Arc<LocalStore>> {
        lock(&self.stores).get(&(req.id(), key.to_owned())).cloned()
    }

    /// Installs `store` for `exchange`, or removes the entry when `None`.
    pub fn set_cache_for(&self, exchange: u64, key: &str, store: Option<LocalStore>) {
        let mut stores = lock(&self.stores);
        let slot = (exchange, key.to_owned());
        match store {
            Some(store) => {
                stores.insert(slot, Arc::new(store));
            }
            None => {
                stores.remove(&slot);
            }
        }
    }

    /// Number of live stores across all exchanges.
    pub fn len(&self) -> usize {
        lock(&self.stores).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Gives every exchange a fresh [`LocalStore`] under `key`.
#[derive(Debug)]
pub struct LocalCache {
    registry: LocalCacheRegistry,
    key: String,
}

impl LocalCache {
    pub fn new(registry: LocalCacheRegistry, key: impl Into<String>) -> Self {
        Self { registry, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Interceptor for LocalCache {
    fn on_start(&self, req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        self.registry.set_cache_for(req.id(), &self.key, Some(LocalStore::default()));
        Ok(())
    }

    fn on_finish(&self, req: &mut Request, _res: &mut Response) -> Result<(), Error> {
        self.registry.set_cache_for(req.id(), &self.key, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    #[test]
    fn store_operations() {
        let store = LocalStore::default();
        store.write("user:1", "ada");
        assert_eq!(store.read("user:1").as_deref(), Some(&b"ada"[..]));
        assert!(store.delete("user:1"));
        assert!(!store.delete("user:1"));
        store.write("a", "1");
        store.write("b", "2");
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn each_exchange_gets_its_own_store() {
        let registry = LocalCacheRegistry::new();
        let cache = LocalCache::new(registry.clone(), "views");
        let mut first = Request::builder(Method::GET, "/").build();
        let mut second = Request::builder(Method::GET, "/").build();
        let mut res = Response::default();

        cache.on_start(&mut first, &mut res).unwrap();
        cache.on_start(&mut second, &mut res).unwrap();

        registry.cache_for(&first, "views").unwrap().write("k", "first");
        assert!(registry.cache_for(&second, "views").unwrap().read("k").is_none());
        assert!(registry.cache_for(&first, "other").is_none());

        cache.on_finish(&mut first, &mut res).unwrap();
        assert!(registry.cache_for(&first, "views").is_none());
        assert_eq!(registry.len(), 1);

        cache.on_finish(&mut second, &mut res).unwrap();
        assert!(registry.is_empty());
    }
}
