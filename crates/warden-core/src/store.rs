//! Repository interface for known identities and unknown clusters.
//!
//! The engine and the management surface only talk to these traits, never
//! to a storage technology directly. [`MemoryStore`] is the in-process
//! implementation used for tests and ephemeral sessions.

use crate::types::{
    ClusterId, Identity, IdentityDetails, IdentityId, NewCluster, NewIdentity, UnknownCluster,
};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: i64 },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Identity,
    Cluster,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Identity => f.write_str("identity"),
            RecordKind::Cluster => f.write_str("unknown cluster"),
        }
    }
}

/// CRUD access to known identities.
pub trait IdentityRepo: Send + Sync {
    /// All identities in insertion (id) order.
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError>;

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError>;

    fn insert_identity(&self, identity: NewIdentity) -> Result<Identity, StoreError>;

    /// Replace the descriptive metadata of an identity.
    fn update_identity(&self, id: IdentityId, details: IdentityDetails) -> Result<Identity, StoreError>;

    /// Delete an identity, returning the removed record.
    fn delete_identity(&self, id: IdentityId) -> Result<Identity, StoreError>;
}

/// CRUD access to unknown-face clusters.
pub trait ClusterRepo: Send + Sync {
    /// All clusters in insertion (id) order.
    fn list_clusters(&self) -> Result<Vec<UnknownCluster>, StoreError>;

    fn get_cluster(&self, id: ClusterId) -> Result<Option<UnknownCluster>, StoreError>;

    fn insert_cluster(&self, cluster: NewCluster) -> Result<UnknownCluster, StoreError>;

    /// Delete a cluster, returning the removed record.
    fn delete_cluster(&self, id: ClusterId) -> Result<UnknownCluster, StoreError>;
}

/// Both repositories plus the one operation that must span them atomically.
pub trait GalleryStore: IdentityRepo + ClusterRepo {
    /// Insert `identity` and delete cluster `cluster_id` as a single unit:
    /// either both are applied or neither is.
    fn promote_cluster(
        &self,
        cluster_id: ClusterId,
        identity: NewIdentity,
    ) -> Result<Identity, StoreError>;
}

/// In-memory [`GalleryStore`]. Data is lost on restart.
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    identities: Vec<Identity>,
    clusters: Vec<UnknownCluster>,
    next_identity: IdentityId,
    next_cluster: ClusterId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryStoreInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    fn add_identity(&mut self, new: NewIdentity) -> Identity {
        self.next_identity += 1;
        let identity = Identity {
            id: self.next_identity,
            details: new.details,
            image_path: new.image_path,
            embedding: new.embedding,
            date_added: new.date_added,
        };
        self.identities.push(identity.clone());
        identity
    }
}

impl IdentityRepo for MemoryStore {
    fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.lock().identities.clone())
    }

    fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
        Ok(self.lock().identities.iter().find(|i| i.id == id).cloned())
    }

    fn insert_identity(&self, identity: NewIdentity) -> Result<Identity, StoreError> {
        Ok(self.lock().add_identity(identity))
    }

    fn update_identity(&self, id: IdentityId, details: IdentityDetails) -> Result<Identity, StoreError> {
        let mut inner = self.lock();
        let identity = inner
            .identities
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Identity,
                id,
            })?;
        identity.details = details;
        Ok(identity.clone())
    }

    fn delete_identity(&self, id: IdentityId) -> Result<Identity, StoreError> {
        let mut inner = self.lock();
        let pos = inner
            .identities
            .iter()
            .position(|i| i.id == id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Identity,
                id,
            })?;
        Ok(inner.identities.remove(pos))
    }
}

impl ClusterRepo for MemoryStore {
    fn list_clusters(&self) -> Result<Vec<UnknownCluster>, StoreError> {
        Ok(self.lock().clusters.clone())
    }

    fn get_cluster(&self, id: ClusterId) -> Result<Option<UnknownCluster>, StoreError> {
        Ok(self.lock().clusters.iter().find(|c| c.id == id).cloned())
    }

    fn insert_cluster(&self, cluster: NewCluster) -> Result<UnknownCluster, StoreError> {
        let mut inner = self.lock();
        inner.next_cluster += 1;
        let cluster = UnknownCluster {
            id: inner.next_cluster,
            image_path: cluster.image_path,
            embedding: cluster.embedding,
            date_detected: cluster.date_detected,
        };
        inner.clusters.push(cluster.clone());
        Ok(cluster)
    }

    fn delete_cluster(&self, id: ClusterId) -> Result<UnknownCluster, StoreError> {
        let mut inner = self.lock();
        let pos = inner
            .clusters
            .iter()
            .position(|c| c.id == id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Cluster,
                id,
            })?;
        Ok(inner.clusters.remove(pos))
    }
}

impl GalleryStore for MemoryStore {
    fn promote_cluster(
        &self,
        cluster_id: ClusterId,
        identity: NewIdentity,
    ) -> Result<Identity, StoreError> {
        // Single lock held across both mutations.
        let mut inner = self.lock();
        let pos = inner
            .clusters
            .iter()
            .position(|c| c.id == cluster_id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Cluster,
                id: cluster_id,
            })?;
        inner.clusters.remove(pos);
        Ok(inner.add_identity(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Embedding;
    use chrono::Utc;

    fn new_cluster(v: f32) -> NewCluster {
        NewCluster {
            image_path: format!("/tmp/unknown_{v}.jpg").into(),
            embedding: Embedding::new(vec![v, v]),
            date_detected: Utc::now(),
        }
    }

    fn new_identity(name: &str) -> NewIdentity {
        NewIdentity {
            details: IdentityDetails::named(name),
            image_path: "/tmp/known.jpg".into(),
            embedding: Embedding::new(vec![0.0, 0.0]),
            date_added: Utc::now(),
        }
    }

    #[test]
    fn memory_store_assigns_increasing_ids() {
        let store = MemoryStore::new();
        let a = store.insert_cluster(new_cluster(0.0)).unwrap();
        let b = store.insert_cluster(new_cluster(1.0)).unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.list_clusters().unwrap().len(), 2);
    }

    #[test]
    fn memory_store_ids_not_reused_after_delete() {
        let store = MemoryStore::new();
        let a = store.insert_cluster(new_cluster(0.0)).unwrap();
        store.delete_cluster(a.id).unwrap();
        let b = store.insert_cluster(new_cluster(1.0)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn memory_store_promote_moves_record() {
        let store = MemoryStore::new();
        let c = store.insert_cluster(new_cluster(0.0)).unwrap();
        let identity = store.promote_cluster(c.id, new_identity("alice")).unwrap();

        assert_eq!(identity.details.name, "alice");
        assert!(store.get_cluster(c.id).unwrap().is_none());
        assert_eq!(store.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn memory_store_promote_missing_cluster_changes_nothing() {
        let store = MemoryStore::new();
        let err = store.promote_cluster(42, new_identity("alice")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: RecordKind::Cluster, id: 42 }));
        assert!(store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn memory_store_update_and_delete_identity() {
        let store = MemoryStore::new();
        let id = store.insert_identity(new_identity("bob")).unwrap().id;

        let updated = store.update_identity(id, IdentityDetails::named("robert")).unwrap();
        assert_eq!(updated.details.name, "robert");

        store.delete_identity(id).unwrap();
        assert!(matches!(
            store.delete_identity(id),
            Err(StoreError::NotFound { kind: RecordKind::Identity, .. })
        ));
    }
}
