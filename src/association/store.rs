//! Association stores.
//!
//! The OP keeps two disjoint server stores: shared associations negotiated
//! with RPs and private associations used for stateless assertions. The RP
//! keeps consumer stores keyed by OP endpoint. All backends are swappable
//! through the traits below; the in-memory backends serve single-process
//! deployments and tests.

use crate::association::{Association, AssociationType};
use crate::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use ulid::Ulid;

pub trait ServerAssociationStore: Send + Sync {
    /// Generate and persist a new association under a unique handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot persist the association.
    fn generate(&self, assoc_type: AssociationType, expires_in: u64)
        -> Result<Association, Error>;

    /// Unexpired association for `handle`, if any.
    fn load(&self, handle: &str) -> Option<Association>;

    fn remove(&self, handle: &str);
}

pub trait ConsumerAssociationStore: Send + Sync {
    fn save(&self, op_url: &str, association: Association);

    fn load(&self, op_url: &str, handle: &str) -> Option<Association>;

    /// The unexpired association for `op_url` with the latest expiry.
    /// Failed-association markers are never returned here; look them up
    /// with [`load`](Self::load) and the failed handle.
    fn load_latest(&self, op_url: &str) -> Option<Association>;

    fn remove(&self, op_url: &str, handle: &str);
}

/// Whether two handles point at the same physical store.
#[must_use]
pub fn same_store<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct InMemoryServerAssociationStore {
    prefix: String,
    associations: Mutex<HashMap<String, Association>>,
}

impl Default for InMemoryServerAssociationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServerAssociationStore {
    /// Store whose handles start with a random per-instance prefix.
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(Ulid::new().to_string())
    }

    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            associations: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.associations).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ServerAssociationStore for InMemoryServerAssociationStore {
    fn generate(
        &self,
        assoc_type: AssociationType,
        expires_in: u64,
    ) -> Result<Association, Error> {
        let mut associations = lock(&self.associations);
        associations.retain(|_, assoc| !assoc.has_expired());

        let mut handle = format!("{}.{}", self.prefix, Ulid::new());
        while associations.contains_key(&handle) {
            handle = format!("{}.{}", self.prefix, Ulid::new());
        }

        let association = Association::generate(assoc_type, handle.clone(), expires_in);
        associations.insert(handle, association.clone());
        debug!(
            handle = association.handle(),
            assoc_type = %assoc_type,
            expires_in,
            "generated association"
        );
        Ok(association)
    }

    fn load(&self, handle: &str) -> Option<Association> {
        let mut associations = lock(&self.associations);
        match associations.get(handle) {
            Some(assoc) if assoc.has_expired() => {
                associations.remove(handle);
                None
            }
            Some(assoc) => Some(assoc.clone()),
            None => None,
        }
    }

    fn remove(&self, handle: &str) {
        lock(&self.associations).remove(handle);
    }
}

#[derive(Debug, Default)]
pub struct InMemoryConsumerAssociationStore {
    associations: Mutex<HashMap<String, HashMap<String, Association>>>,
}

impl InMemoryConsumerAssociationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsumerAssociationStore for InMemoryConsumerAssociationStore {
    fn save(&self, op_url: &str, association: Association) {
        let mut associations = lock(&self.associations);
        let by_handle = associations.entry(op_url.to_string()).or_default();
        by_handle.retain(|_, assoc| !assoc.has_expired());
        by_handle.insert(association.handle().to_string(), association);
    }

    fn load(&self, op_url: &str, handle: &str) -> Option<Association> {
        let mut associations = lock(&self.associations);
        let by_handle = associations.get_mut(op_url)?;
        match by_handle.get(handle) {
            Some(assoc) if assoc.has_expired() => {
                by_handle.remove(handle);
                None
            }
            Some(assoc) => Some(assoc.clone()),
            None => None,
        }
    }

    fn load_latest(&self, op_url: &str) -> Option<Association> {
        let mut associations = lock(&self.associations);
        let by_handle = associations.get_mut(op_url)?;
        by_handle.retain(|_, assoc| !assoc.has_expired());
        by_handle
            .values()
            .filter(|assoc| !assoc.is_failed())
            .max_by_key(|assoc| assoc.expiry())
            .cloned()
    }

    fn remove(&self, op_url: &str, handle: &str) {
        if let Some(by_handle) = lock(&self.associations).get_mut(op_url) {
            by_handle.remove(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::FAILED_ASSOC_HANDLE;

    #[test]
    fn server_store_generates_unique_handles() -> Result<(), Error> {
        let store = InMemoryServerAssociationStore::with_prefix("shared");
        let a = store.generate(AssociationType::HmacSha256, 60)?;
        let b = store.generate(AssociationType::HmacSha256, 60)?;
        assert_ne!(a.handle(), b.handle());
        assert!(a.handle().starts_with("shared."));
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn server_store_load_and_remove() -> Result<(), Error> {
        let store = InMemoryServerAssociationStore::new();
        let assoc = store.generate(AssociationType::HmacSha1, 60)?;
        let loaded = store.load(assoc.handle());
        assert_eq!(loaded.map(|a| a.mac_key().to_vec()), Some(assoc.mac_key().to_vec()));

        store.remove(assoc.handle());
        assert!(store.load(assoc.handle()).is_none());
        Ok(())
    }

    #[test]
    fn server_store_hides_expired() -> Result<(), Error> {
        let store = InMemoryServerAssociationStore::new();
        let assoc = store.generate(AssociationType::HmacSha1, 0)?;
        assert!(store.load(assoc.handle()).is_none());
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn consumer_store_prefers_latest_expiry() {
        let store = InMemoryConsumerAssociationStore::new();
        let op = "https://op.example/server";
        store.save(op, Association::generate(AssociationType::HmacSha1, "short", 60));
        store.save(op, Association::generate(AssociationType::HmacSha256, "long", 600));
        store.save(
            "https://other.example/",
            Association::generate(AssociationType::HmacSha1, "other", 6000),
        );

        assert_eq!(
            store.load_latest(op).map(|a| a.handle().to_string()),
            Some("long".to_string())
        );
        assert!(store.load(op, "short").is_some());
        assert!(store.load(op, "other").is_none());

        store.remove(op, "long");
        assert_eq!(
            store.load_latest(op).map(|a| a.handle().to_string()),
            Some("short".to_string())
        );
    }

    #[test]
    fn store_identity() {
        let a: Arc<dyn ServerAssociationStore> = Arc::new(InMemoryServerAssociationStore::new());
        let b: Arc<dyn ServerAssociationStore> = Arc::new(InMemoryServerAssociationStore::new());
        assert!(same_store(&a, &Arc::clone(&a)));
        assert!(!same_store(&a, &b));
    }

    #[test]
    fn consumer_store_drops_expired() {
        let store = InMemoryConsumerAssociationStore::new();
        let op = "https://op.example/server";
        store.save(op, Association::generate(AssociationType::HmacSha1, "gone", 0));
        assert!(store.load(op, "gone").is_none());
        assert!(store.load_latest(op).is_none());
    }

    #[test]
    fn consumer_store_skips_failed_marker() {
        let store = InMemoryConsumerAssociationStore::new();
        let op = "https://op.example/server";
        store.save(op, Association::failed(6000));
        assert!(store.load_latest(op).is_none());

        store.save(op, Association::generate(AssociationType::HmacSha256, "real", 600));
        assert_eq!(
            store.load_latest(op).map(|a| a.handle().to_string()),
            Some("real".to_string())
        );
        assert!(store
            .load(op, FAILED_ASSOC_HANDLE)
            .is_some_and(|a| a.is_failed()));
    }
}
