//! In-memory gallery of known embeddings, shared between the frame worker
//! and the management surface.

use crate::store::{IdentityRepo, StoreError};
use crate::types::{Embedding, Identity};
use std::sync::{Arc, RwLock};

/// One labelled reference embedding.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Ordered list of known embeddings used by the classifier.
///
/// Order matters: it is the tie-break order for majority voting.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn from_identities(identities: &[Identity]) -> Self {
        Self::new(
            identities
                .iter()
                .map(|i| GalleryEntry {
                    label: i.details.name.clone(),
                    embedding: i.embedding.clone(),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }
}

/// Gallery snapshot behind a reader-writer lock.
///
/// Readers clone the `Arc` and classify against a complete snapshot; writers
/// swap in a whole new gallery, so no observation ever sees a partial update.
#[derive(Debug, Default)]
pub struct SharedGallery {
    current: RwLock<Arc<Gallery>>,
}

impl SharedGallery {
    pub fn new(gallery: Gallery) -> Self {
        Self {
            current: RwLock::new(Arc::new(gallery)),
        }
    }

    /// Build the shared gallery from every identity in the store.
    pub fn load<R: IdentityRepo + ?Sized>(repo: &R) -> Result<Self, StoreError> {
        let identities = repo.list_identities()?;
        Ok(Self::new(Gallery::from_identities(&identities)))
    }

    pub fn snapshot(&self) -> Arc<Gallery> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, gallery: Gallery) {
        let next = Arc::new(gallery);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Re-read every identity from the store and swap the snapshot.
    ///
    /// Returns the new gallery size.
    pub fn reload<R: IdentityRepo + ?Sized>(&self, repo: &R) -> Result<usize, StoreError> {
        let identities = repo.list_identities()?;
        let gallery = Gallery::from_identities(&identities);
        let size = gallery.len();
        self.replace(gallery);
        tracing::debug!(entries = size, "gallery reloaded");
        Ok(size)
    }

    /// Append one entry to a copy of the current snapshot.
    ///
    /// Used when a full reload is not possible but a just-written identity
    /// must be recognized on the next frame.
    pub fn push(&self, entry: GalleryEntry) {
        let mut next = (*self.snapshot()).clone();
        next.entries.push(entry);
        self.replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(label: &str, v: f32) -> GalleryEntry {
        GalleryEntry {
            label: label.into(),
            embedding: Embedding::new(vec![v, 0.0]),
        }
    }

    #[test]
    fn test_snapshot_is_stable_across_replace() {
        let shared = SharedGallery::new(Gallery::new(vec![entry("a", 0.0)]));
        let before = shared.snapshot();
        shared.replace(Gallery::new(vec![entry("b", 1.0), entry("c", 2.0)]));

        assert_eq!(before.len(), 1);
        assert_eq!(shared.snapshot().len(), 2);
        assert!(shared.snapshot().contains_label("c"));
    }

    #[test]
    fn test_push_appends_in_order() {
        let shared = SharedGallery::default();
        shared.push(entry("first", 0.0));
        shared.push(entry("second", 1.0));
        let snap = shared.snapshot();
        let labels: Vec<&str> = snap.entries().iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["first", "second"]);
    }
}
