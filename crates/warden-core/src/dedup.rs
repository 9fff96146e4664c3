//! Unknown-face deduplication: map an unrecognized embedding onto an existing
//! cluster, or open a new one with a padded face crop.

use crate::crop::{self, CropError, DEFAULT_PAD_FRACTION, DEFAULT_PASSPORT_SIZE};
use crate::store::{ClusterRepo, StoreError};
use crate::types::{BoundingBox, Embedding, NewCluster, UnknownCluster};
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default maximum distance between an unknown face and a cluster representative.
pub const DEFAULT_DEDUP_TOLERANCE: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("cluster store: {0}")]
    Store(#[from] StoreError),
    #[error("crop: {0}")]
    Crop(#[from] CropError),
    #[error("writing crop {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Closest cluster to a probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance: f32,
}

/// Find the cluster whose representative embedding is closest to `probe`.
///
/// Clusters with a different embedding dimension or a non-finite distance
/// are skipped. On equal distances the earlier cluster wins.
pub fn nearest_cluster(probe: &Embedding, clusters: &[UnknownCluster]) -> Option<Nearest> {
    let mut best: Option<Nearest> = None;

    for (index, cluster) in clusters.iter().enumerate() {
        let distance = match probe.euclidean_distance(&cluster.embedding) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(cluster = cluster.id, error = %e, "skipping cluster");
                continue;
            }
        };
        if !distance.is_finite() {
            tracing::warn!(cluster = cluster.id, "skipping cluster with non-finite distance");
            continue;
        }
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(Nearest { index, distance });
        }
    }

    best
}

/// Cluster an unknown observation was assigned to.
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    NewCluster(UnknownCluster),
    ExistingCluster { cluster: UnknownCluster, distance: f32 },
}

impl DedupOutcome {
    pub fn cluster(&self) -> &UnknownCluster {
        match self {
            DedupOutcome::NewCluster(c) => c,
            DedupOutcome::ExistingCluster { cluster, .. } => cluster,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, DedupOutcome::NewCluster(_))
    }
}

/// Assigns unknown faces to clusters and writes crops for new ones.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    pub tolerance: f32,
    pub pad_fraction: f32,
    /// Thumbnail side length; 0 writes the crop at its native size.
    pub passport_size: u32,
    pub unknown_dir: PathBuf,
}

impl Deduplicator {
    pub fn new(unknown_dir: impl Into<PathBuf>) -> Self {
        Self {
            tolerance: DEFAULT_DEDUP_TOLERANCE,
            pad_fraction: DEFAULT_PAD_FRACTION,
            passport_size: DEFAULT_PASSPORT_SIZE,
            unknown_dir: unknown_dir.into(),
        }
    }

    /// Resolve `probe` to a cluster, creating one if nothing is within tolerance.
    ///
    /// The representative embedding of an existing cluster is never updated.
    /// The crop is written and the cluster inserted only on the new-cluster path.
    pub fn assign<R: ClusterRepo + ?Sized>(
        &self,
        repo: &R,
        frame: &RgbImage,
        bbox: &BoundingBox,
        probe: &Embedding,
        now: DateTime<Utc>,
    ) -> Result<DedupOutcome, DedupError> {
        let mut clusters = repo.list_clusters()?;

        if let Some(nearest) = nearest_cluster(probe, &clusters) {
            if nearest.distance <= self.tolerance {
                let cluster = clusters.swap_remove(nearest.index);
                tracing::debug!(
                    cluster = cluster.id,
                    distance = nearest.distance,
                    "matched existing unknown cluster"
                );
                return Ok(DedupOutcome::ExistingCluster {
                    cluster,
                    distance: nearest.distance,
                });
            }
        }

        let face = crop::passport(crop::crop_face(frame, bbox, self.pad_fraction)?, self.passport_size);
        let image_path = unique_crop_path(&self.unknown_dir, now);
        face.save(&image_path).map_err(|source| DedupError::Image {
            path: image_path.clone(),
            source,
        })?;

        let inserted = repo.insert_cluster(NewCluster {
            image_path: image_path.clone(),
            embedding: probe.clone(),
            date_detected: now,
        });

        match inserted {
            Ok(cluster) => {
                tracing::info!(
                    cluster = cluster.id,
                    path = %cluster.image_path.display(),
                    existing = clusters.len(),
                    "new unknown cluster"
                );
                Ok(DedupOutcome::NewCluster(cluster))
            }
            Err(e) => {
                // No record points at the crop, so it would be orphaned.
                if let Err(rm) = std::fs::remove_file(&image_path) {
                    tracing::warn!(path = %image_path.display(), error = %rm, "failed to remove orphaned crop");
                }
                Err(e.into())
            }
        }
    }
}

/// `unknown_<YYYYmmdd_HHMMSS>_<millis>.jpg` in `dir`, with a numeric suffix
/// if that name is already taken.
pub fn unique_crop_path(dir: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = format!("unknown_{}", now.format("%Y%m%d_%H%M%S_%3f"));
    let mut candidate = dir.join(format!("{stem}.jpg"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{n}.jpg"));
        n += 1;
    }
    candidate
}
