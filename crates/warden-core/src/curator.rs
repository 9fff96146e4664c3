//! Gallery curation: promotion of unknown clusters to identities, direct
//! enrollment, edits and deletions.
//!
//! Every operation validates before touching the store and refreshes the
//! shared gallery afterwards, so the next classified observation sees the
//! change.

use crate::alert::AlertGate;
use crate::gallery::{GalleryEntry, SharedGallery};
use crate::store::{GalleryStore, RecordKind, StoreError};
use crate::types::{
    ClusterId, Embedding, Identity, IdentityDetails, IdentityId, NewIdentity, UnknownCluster,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CurateError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: i64 },
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for CurateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => CurateError::NotFound { kind, id },
            other => CurateError::Storage(other),
        }
    }
}

/// Borrowed view of the session state that curation mutates.
pub struct Curator<'a, S: GalleryStore + ?Sized> {
    pub store: &'a S,
    pub gallery: &'a SharedGallery,
    pub gate: &'a Mutex<AlertGate>,
    pub embedding_dim: usize,
    pub known_dir: &'a Path,
}

impl<'a, S: GalleryStore + ?Sized> Curator<'a, S> {
    /// Turn an unknown cluster into a known identity.
    ///
    /// The identity takes the cluster's representative embedding and crop.
    /// Insert and delete happen atomically in the store; the cluster's
    /// cooldown entry is dropped and the gallery refreshed.
    pub fn promote(&self, cluster_id: ClusterId, details: IdentityDetails) -> Result<Identity, CurateError> {
        let details = validate(details)?;

        let cluster = self
            .store
            .get_cluster(cluster_id)?
            .ok_or(CurateError::NotFound {
                kind: RecordKind::Cluster,
                id: cluster_id,
            })?;

        let identity = self.store.promote_cluster(
            cluster_id,
            NewIdentity {
                details,
                image_path: cluster.image_path,
                embedding: cluster.embedding,
                date_added: Utc::now(),
            },
        )?;

        self.forget_cluster(cluster_id);
        self.refresh(Some(&identity));

        tracing::info!(
            cluster = cluster_id,
            identity = identity.id,
            name = %identity.details.name,
            "promoted unknown cluster"
        );
        Ok(identity)
    }

    /// Add an identity from an operator-supplied image and embedding.
    ///
    /// The image is copied into the known-faces directory.
    pub fn enroll(
        &self,
        details: IdentityDetails,
        image: &Path,
        embedding: Embedding,
    ) -> Result<Identity, CurateError> {
        let details = validate(details)?;
        if embedding.dim() != self.embedding_dim {
            return Err(CurateError::Validation(format!(
                "expected {}-dim embedding, got {}",
                self.embedding_dim,
                embedding.dim()
            )));
        }
        if !embedding.is_finite() {
            return Err(CurateError::Validation(
                "embedding contains NaN or infinite values".into(),
            ));
        }
        image::image_dimensions(image)
            .map_err(|e| CurateError::Validation(format!("unreadable image {}: {e}", image.display())))?;

        let image_path = known_image_path(self.known_dir, &details.name, image);
        std::fs::copy(image, &image_path)?;

        let inserted = self.store.insert_identity(NewIdentity {
            details,
            image_path: image_path.clone(),
            embedding,
            date_added: Utc::now(),
        });
        let identity = match inserted {
            Ok(identity) => identity,
            Err(e) => {
                remove_image(&image_path);
                return Err(e.into());
            }
        };

        self.refresh(Some(&identity));
        tracing::info!(identity = identity.id, name = %identity.details.name, "enrolled identity");
        Ok(identity)
    }

    /// Replace the metadata of an identity.
    pub fn edit(&self, id: IdentityId, details: IdentityDetails) -> Result<Identity, CurateError> {
        let details = validate(details)?;
        let identity = self.store.update_identity(id, details)?;
        self.refresh(None);
        tracing::info!(identity = id, name = %identity.details.name, "edited identity");
        Ok(identity)
    }

    /// Delete an identity and, best effort, its image.
    pub fn remove_identity(&self, id: IdentityId) -> Result<Identity, CurateError> {
        let identity = self.store.delete_identity(id)?;
        remove_image(&identity.image_path);
        self.refresh(None);
        tracing::info!(identity = id, name = %identity.details.name, "removed identity");
        Ok(identity)
    }

    /// Drop an unknown cluster without promoting it.
    pub fn discard_cluster(&self, id: ClusterId) -> Result<UnknownCluster, CurateError> {
        let cluster = self.store.delete_cluster(id)?;
        remove_image(&cluster.image_path);
        self.forget_cluster(id);
        tracing::info!(cluster = id, "discarded unknown cluster");
        Ok(cluster)
    }

    fn forget_cluster(&self, id: ClusterId) {
        let mut gate = match self.gate.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        gate.forget(id);
    }

    fn refresh(&self, added: Option<&Identity>) {
        if let Err(e) = self.gallery.reload(self.store) {
            tracing::error!(error = %e, "gallery reload failed");
            if let Some(identity) = added {
                self.gallery.push(GalleryEntry {
                    label: identity.details.name.clone(),
                    embedding: identity.embedding.clone(),
                });
            }
        }
    }
}

fn validate(details: IdentityDetails) -> Result<IdentityDetails, CurateError> {
    details
        .normalized()
        .ok_or_else(|| CurateError::Validation("name is required".into()))
}

/// `known_<name>_<timestamp>.<ext>` in `dir`.
fn known_image_path(dir: &Path, name: &str, source: &Path) -> PathBuf {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");

    let mut candidate = dir.join(format!("known_{slug}_{stamp}.{ext}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("known_{slug}_{stamp}-{n}.{ext}"));
        n += 1;
    }
    candidate
}

fn remove_image(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to delete image"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClusterRepo, IdentityRepo, MemoryStore};
    use crate::types::NewCluster;

    struct Fixture {
        store: MemoryStore,
        gallery: SharedGallery,
        gate: Mutex<AlertGate>,
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: MemoryStore::new(),
                gallery: SharedGallery::default(),
                gate: Mutex::new(AlertGate::default()),
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn curator(&self) -> Curator<'_, MemoryStore> {
            Curator {
                store: &self.store,
                gallery: &self.gallery,
                gate: &self.gate,
                embedding_dim: 2,
                known_dir: self.dir.path(),
            }
        }

        fn cluster(&self, values: &[f32]) -> UnknownCluster {
            let image_path = self.dir.path().join(format!("unknown_{}.jpg", values[0]));
            image::RgbImage::new(4, 4).save(&image_path).unwrap();
            self.store
                .insert_cluster(NewCluster {
                    image_path,
                    embedding: Embedding::new(values.to_vec()),
                    date_detected: Utc::now(),
                })
                .unwrap()
        }
    }

    #[test]
    fn test_promote_moves_cluster_into_gallery() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.5, 0.5]);
        fx.gate.lock().unwrap().admit(cluster.id, true, std::time::Instant::now());

        let identity = fx
            .curator()
            .promote(cluster.id, IdentityDetails::named("Alice"))
            .unwrap();

        assert_eq!(identity.details.name, "Alice");
        assert_eq!(identity.embedding, cluster.embedding);
        assert_eq!(identity.image_path, cluster.image_path);
        assert!(fx.store.get_cluster(cluster.id).unwrap().is_none());
        assert!(fx.gallery.snapshot().contains_label("Alice"));
        assert_eq!(fx.gate.lock().unwrap().tracked(), 0);
    }

    #[test]
    fn test_promote_twice_is_not_found() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.5, 0.5]);
        fx.curator().promote(cluster.id, IdentityDetails::named("Alice")).unwrap();

        let err = fx
            .curator()
            .promote(cluster.id, IdentityDetails::named("Alice"))
            .unwrap_err();
        assert!(matches!(err, CurateError::NotFound { kind: RecordKind::Cluster, .. }));
        assert_eq!(fx.store.list_identities().unwrap().len(), 1);
    }

    #[test]
    fn test_promote_blank_name_rejected_before_mutation() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.5, 0.5]);

        let err = fx
            .curator()
            .promote(cluster.id, IdentityDetails::named("   "))
            .unwrap_err();
        assert!(matches!(err, CurateError::Validation(_)));
        assert!(fx.store.get_cluster(cluster.id).unwrap().is_some());
        assert!(fx.store.list_identities().unwrap().is_empty());
    }

    #[test]
    fn test_promote_keeps_optional_metadata() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.1, 0.1]);
        let details = IdentityDetails {
            name: "Bob".into(),
            contact: Some("555-0100".into()),
            occupation: Some("courier".into()),
            ..IdentityDetails::default()
        };

        let identity = fx.curator().promote(cluster.id, details).unwrap();
        let stored = fx.store.get_identity(identity.id).unwrap().unwrap();
        assert_eq!(stored.details.contact.as_deref(), Some("555-0100"));
        assert_eq!(stored.details.occupation.as_deref(), Some("courier"));
        assert_eq!(stored.details.age, None);
    }

    #[test]
    fn test_enroll_copies_image_and_checks_dimension() {
        let fx = Fixture::new();
        let source = fx.dir.path().join("source.png");
        image::RgbImage::new(8, 8).save(&source).unwrap();

        let err = fx
            .curator()
            .enroll(IdentityDetails::named("Carol"), &source, Embedding::new(vec![0.0]))
            .unwrap_err();
        assert!(matches!(err, CurateError::Validation(_)));

        let identity = fx
            .curator()
            .enroll(IdentityDetails::named("Carol"), &source, Embedding::new(vec![0.0, 1.0]))
            .unwrap();
        assert!(identity.image_path.exists());
        assert_ne!(identity.image_path, source);
        assert_eq!(identity.image_path.extension().unwrap(), "png");
        assert!(fx.gallery.snapshot().contains_label("Carol"));
    }

    #[test]
    fn test_enroll_rejects_non_finite_embedding() {
        let fx = Fixture::new();
        let source = fx.dir.path().join("source.png");
        image::RgbImage::new(8, 8).save(&source).unwrap();

        for values in [vec![f32::NAN, 0.0], vec![f32::INFINITY, 0.0], vec![0.0, f32::NEG_INFINITY]] {
            let err = fx
                .curator()
                .enroll(IdentityDetails::named("Mallory"), &source, Embedding::new(values))
                .unwrap_err();
            assert!(matches!(err, CurateError::Validation(_)));
        }
        assert!(fx.store.list_identities().unwrap().is_empty());
        assert!(fx.gallery.snapshot().is_empty());
    }

    #[test]
    fn test_enroll_rejects_unreadable_image() {
        let fx = Fixture::new();
        let err = fx
            .curator()
            .enroll(
                IdentityDetails::named("Dan"),
                &fx.dir.path().join("missing.jpg"),
                Embedding::new(vec![0.0, 1.0]),
            )
            .unwrap_err();
        assert!(matches!(err, CurateError::Validation(_)));
    }

    #[test]
    fn test_edit_relabels_gallery() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.2, 0.2]);
        let identity = fx.curator().promote(cluster.id, IdentityDetails::named("Eve")).unwrap();

        fx.curator().edit(identity.id, IdentityDetails::named("Evelyn")).unwrap();
        let snap = fx.gallery.snapshot();
        assert!(snap.contains_label("Evelyn"));
        assert!(!snap.contains_label("Eve"));

        assert!(matches!(
            fx.curator().edit(999, IdentityDetails::named("x")),
            Err(CurateError::NotFound { kind: RecordKind::Identity, id: 999 })
        ));
    }

    #[test]
    fn test_remove_identity_deletes_image() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.3, 0.3]);
        let identity = fx.curator().promote(cluster.id, IdentityDetails::named("Finn")).unwrap();

        fx.curator().remove_identity(identity.id).unwrap();
        assert!(!identity.image_path.exists());
        assert!(fx.gallery.snapshot().is_empty());
    }

    #[test]
    fn test_discard_cluster() {
        let fx = Fixture::new();
        let cluster = fx.cluster(&[0.4, 0.4]);
        fx.gate.lock().unwrap().admit(cluster.id, true, std::time::Instant::now());

        fx.curator().discard_cluster(cluster.id).unwrap();
        assert!(!cluster.image_path.exists());
        assert!(fx.store.list_clusters().unwrap().is_empty());
        assert_eq!(fx.gate.lock().unwrap().tracked(), 0);
        assert!(matches!(
            fx.curator().discard_cluster(cluster.id),
            Err(CurateError::NotFound { .. })
        ));
    }
}
