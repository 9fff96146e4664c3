//! A monitoring session: the per-frame decision pipeline plus the state it
//! owns (gallery snapshot, alert gate, sinks, counters).

use crate::alert::{Alert, AlertGate, AlertSink, GateDecision, DEFAULT_COOLDOWN};
use crate::classifier::{Classification, Classifier, VotingClassifier, DEFAULT_MATCH_TOLERANCE};
use crate::crop::{DEFAULT_PAD_FRACTION, DEFAULT_PASSPORT_SIZE};
use crate::curator::{CurateError, Curator};
use crate::dedup::{DedupError, Deduplicator, DEFAULT_DEDUP_TOLERANCE};
use crate::gallery::{Gallery, SharedGallery};
use crate::store::{ClusterRepo, GalleryStore, StoreError};
use crate::types::{
    BoundingBox, ClusterId, Detection, DistanceError, Embedding, Identity, IdentityDetails,
    IdentityId, MatchResult, UnknownCluster,
};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Default embedding length of the reference encoder.
pub const DEFAULT_EMBEDDING_DIM: usize = 128;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("loading gallery: {0}")]
    Store(#[from] StoreError),
    #[error("creating {path}: {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure confined to a single observation.
#[derive(Error, Debug)]
pub enum ObservationError {
    #[error(transparent)]
    Dimension(#[from] DistanceError),
    #[error("embedding contains NaN or infinite values")]
    NonFinite,
    #[error(transparent)]
    Unknown(#[from] DedupError),
}

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub embedding_dim: usize,
    pub match_tolerance: f32,
    pub dedup_tolerance: f32,
    pub cooldown: Duration,
    pub pad_fraction: f32,
    pub passport_size: u32,
    pub known_dir: PathBuf,
    pub unknown_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            dedup_tolerance: DEFAULT_DEDUP_TOLERANCE,
            cooldown: DEFAULT_COOLDOWN,
            pad_fraction: DEFAULT_PAD_FRACTION,
            passport_size: DEFAULT_PASSPORT_SIZE,
            known_dir: PathBuf::from("known_faces"),
            unknown_dir: PathBuf::from("unknown_faces"),
        }
    }
}

/// One face in a processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub bbox: BoundingBox,
    pub label: MatchResult,
    pub alerted: bool,
}

/// Outcome of processing every detection in one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    pub observations: Vec<Observation>,
    pub errors: Vec<ObservationError>,
}

impl FrameReport {
    pub fn alerts(&self) -> usize {
        self.observations.iter().filter(|o| o.alerted).count()
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    observations: AtomicU64,
    known: AtomicU64,
    alerts: AtomicU64,
    suppressed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time session summary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub gallery_size: usize,
    pub unknown_clusters: Option<usize>,
    pub tracked_cooldowns: usize,
    pub frames: u64,
    pub observations: u64,
    pub known: u64,
    pub alerts: u64,
    pub suppressed: u64,
    pub errors: u64,
}

/// Owns the decision state for one run of the monitor.
///
/// Created at startup and dropped at shutdown; the cooldown map dies with it.
/// All methods take `&self` so the frame worker and the management surface
/// can share one session behind an `Arc`.
pub struct MonitorSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    config: SessionConfig,
    store: Arc<dyn GalleryStore>,
    gallery: SharedGallery,
    gate: Mutex<AlertGate>,
    classifier: VotingClassifier,
    dedup: Deduplicator,
    sinks: Vec<Arc<dyn AlertSink>>,
    counters: Counters,
}

impl MonitorSession {
    /// Create the image directories and load the gallery from `store`.
    pub fn start(config: SessionConfig, store: Arc<dyn GalleryStore>) -> Result<Self, SessionError> {
        for dir in [&config.known_dir, &config.unknown_dir] {
            std::fs::create_dir_all(dir).map_err(|source| SessionError::Dir {
                path: dir.clone(),
                source,
            })?;
        }

        let gallery = SharedGallery::load(store.as_ref())?;
        let id = Uuid::new_v4();

        tracing::info!(
            session = %id,
            gallery = gallery.snapshot().len(),
            match_tolerance = config.match_tolerance,
            dedup_tolerance = config.dedup_tolerance,
            cooldown_secs = config.cooldown.as_secs(),
            "monitor session started"
        );

        Ok(Self {
            id,
            started_at: Utc::now(),
            classifier: VotingClassifier {
                tolerance: config.match_tolerance,
            },
            dedup: Deduplicator {
                tolerance: config.dedup_tolerance,
                pad_fraction: config.pad_fraction,
                passport_size: config.passport_size,
                unknown_dir: config.unknown_dir.clone(),
            },
            gate: Mutex::new(AlertGate::new(config.cooldown)),
            config,
            store,
            gallery,
            sinks: Vec::new(),
            counters: Counters::default(),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn GalleryStore {
        self.store.as_ref()
    }

    pub fn gallery(&self) -> Arc<Gallery> {
        self.gallery.snapshot()
    }

    /// Classify every detection of one frame, in order.
    ///
    /// A failing observation is logged and reported; it never stops the
    /// remaining observations.
    pub fn process_frame(&self, frame: &RgbImage, detections: &[Detection], now: Instant) -> FrameReport {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        let mut report = FrameReport::default();

        for (idx, detection) in detections.iter().enumerate() {
            self.counters.observations.fetch_add(1, Ordering::Relaxed);
            match self.observe(frame, detection, now) {
                Ok(observation) => report.observations.push(observation),
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(face = idx, error = %e, "observation degraded");
                    report.observations.push(Observation {
                        bbox: detection.bbox,
                        label: MatchResult::Unresolved,
                        alerted: false,
                    });
                    report.errors.push(e);
                }
            }
        }

        report
    }

    fn observe(&self, frame: &RgbImage, detection: &Detection, now: Instant) -> Result<Observation, ObservationError> {
        let embedding = &detection.embedding;
        if embedding.dim() != self.config.embedding_dim {
            return Err(DistanceError::DimensionMismatch {
                left: embedding.dim(),
                right: self.config.embedding_dim,
            }
            .into());
        }
        if !embedding.is_finite() {
            return Err(ObservationError::NonFinite);
        }

        // Fresh snapshot per observation: a promotion between two faces of
        // the same frame is visible to the second one.
        let gallery = self.gallery.snapshot();
        if let Classification::Known { label, votes } = self.classifier.classify(embedding, &gallery) {
            self.counters.known.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(label = %label, votes, "known face");
            return Ok(Observation {
                bbox: detection.bbox,
                label: MatchResult::Known(label),
                alerted: false,
            });
        }

        let outcome = self
            .dedup
            .assign(self.store.as_ref(), frame, &detection.bbox, embedding, Utc::now())?;
        let cluster = outcome.cluster();

        let decision = {
            let mut gate = self.lock_gate();
            // Curation deletes the row before forgetting the cooldown entry,
            // so a cluster still present here cannot be left orphaned.
            if self.store.get_cluster(cluster.id).map_err(DedupError::from)?.is_none() {
                tracing::debug!(cluster = cluster.id, "cluster removed during observation; no alert");
                return Ok(Observation {
                    bbox: detection.bbox,
                    label: MatchResult::Unresolved,
                    alerted: false,
                });
            }
            gate.admit(cluster.id, outcome.is_new(), now)
        };
        let alerted = match decision {
            GateDecision::Alert => {
                self.raise(cluster);
                true
            }
            GateDecision::Suppress { remaining } => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    cluster = cluster.id,
                    remaining_secs = remaining.as_secs(),
                    "skipped duplicate alert within cooldown"
                );
                false
            }
        };

        Ok(Observation {
            bbox: detection.bbox,
            label: MatchResult::Unknown(cluster.id),
            alerted,
        })
    }

    fn raise(&self, cluster: &UnknownCluster) {
        self.counters.alerts.fetch_add(1, Ordering::Relaxed);
        let alert = Alert {
            label: MatchResult::Unknown(cluster.id).display_label().to_string(),
            cluster_id: cluster.id,
            image_path: cluster.image_path.clone(),
            raised_at: Utc::now(),
        };
        for sink in &self.sinks {
            sink.send(&alert);
        }
    }

    fn lock_gate(&self) -> MutexGuard<'_, AlertGate> {
        match self.gate.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn curator(&self) -> Curator<'_, dyn GalleryStore> {
        Curator {
            store: self.store.as_ref(),
            gallery: &self.gallery,
            gate: &self.gate,
            embedding_dim: self.config.embedding_dim,
            known_dir: &self.config.known_dir,
        }
    }

    /// Promote an unknown cluster to a known identity.
    pub fn promote(&self, cluster_id: ClusterId, details: IdentityDetails) -> Result<Identity, CurateError> {
        self.curator().promote(cluster_id, details)
    }

    pub fn enroll(&self, details: IdentityDetails, image: &Path, embedding: Embedding) -> Result<Identity, CurateError> {
        self.curator().enroll(details, image, embedding)
    }

    pub fn edit_identity(&self, id: IdentityId, details: IdentityDetails) -> Result<Identity, CurateError> {
        self.curator().edit(id, details)
    }

    pub fn remove_identity(&self, id: IdentityId) -> Result<Identity, CurateError> {
        self.curator().remove_identity(id)
    }

    pub fn discard_cluster(&self, id: ClusterId) -> Result<UnknownCluster, CurateError> {
        self.curator().discard_cluster(id)
    }

    /// Identities whose name contains `query`, case-insensitively. An empty
    /// query lists everything.
    pub fn search_identities(&self, query: &str) -> Result<Vec<Identity>, StoreError> {
        let needle = query.trim().to_lowercase();
        let mut identities = self.store.list_identities()?;
        if !needle.is_empty() {
            identities.retain(|i| i.details.name.to_lowercase().contains(&needle));
        }
        Ok(identities)
    }

    /// Unknown clusters, newest first.
    pub fn list_clusters(&self) -> Result<Vec<UnknownCluster>, StoreError> {
        let mut clusters = self.store.list_clusters()?;
        clusters.sort_by(|a, b| b.date_detected.cmp(&a.date_detected).then(b.id.cmp(&a.id)));
        Ok(clusters)
    }

    pub fn status(&self) -> SessionStatus {
        let unknown_clusters = ClusterRepo::list_clusters(self.store.as_ref())
            .map(|c| c.len())
            .ok();
        SessionStatus {
            session_id: self.id,
            started_at: self.started_at,
            gallery_size: self.gallery.snapshot().len(),
            unknown_clusters,
            tracked_cooldowns: self.lock_gate().tracked(),
            frames: self.counters.frames.load(Ordering::Relaxed),
            observations: self.counters.observations.load(Ordering::Relaxed),
            known: self.counters.known.load(Ordering::Relaxed),
            alerts: self.counters.alerts.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MonitorSession {
    fn drop(&mut self) {
        tracing::info!(session = %self.id, "monitor session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{IdentityRepo, MemoryStore};
    use crate::types::{NewCluster, NewIdentity};
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct CollectingSink {
        alerts: Mutex<Vec<Alert>>,
    }

    impl AlertSink for CollectingSink {
        fn send(&self, alert: &Alert) {
            self.alerts.lock().unwrap().push(alert.clone());
        }
    }

    impl CollectingSink {
        fn count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    struct Harness {
        session: MonitorSession,
        store: Arc<MemoryStore>,
        sink: Arc<CollectingSink>,
        frame: RgbImage,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(CollectingSink::default());
        let config = SessionConfig {
            embedding_dim: 4,
            passport_size: 16,
            known_dir: dir.path().join("known"),
            unknown_dir: dir.path().join("unknown"),
            ..SessionConfig::default()
        };
        let session = MonitorSession::start(config, store.clone())
            .unwrap()
            .with_sink(sink.clone());
        Harness {
            session,
            store,
            sink,
            frame: RgbImage::new(120, 120),
            _dir: dir,
        }
    }

    fn face(values: [f32; 4]) -> Detection {
        Detection {
            bbox: BoundingBox {
                x: 30.0,
                y: 30.0,
                width: 40.0,
                height: 40.0,
            },
            embedding: Embedding::new(values.to_vec()),
        }
    }

    /// `MemoryStore` wrapper whose operations can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_list_identities: AtomicBool,
        fail_list_clusters: AtomicBool,
        fail_insert_cluster: AtomicBool,
        hide_clusters: AtomicBool,
    }

    impl FlakyStore {
        fn check(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
            if flag.load(Ordering::SeqCst) {
                return Err(StoreError::Backend(format!("{op}: disk I/O error")));
            }
            Ok(())
        }
    }

    impl IdentityRepo for FlakyStore {
        fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
            Self::check(&self.fail_list_identities, "list_identities")?;
            self.inner.list_identities()
        }

        fn get_identity(&self, id: IdentityId) -> Result<Option<Identity>, StoreError> {
            self.inner.get_identity(id)
        }

        fn insert_identity(&self, identity: NewIdentity) -> Result<Identity, StoreError> {
            self.inner.insert_identity(identity)
        }

        fn update_identity(&self, id: IdentityId, details: IdentityDetails) -> Result<Identity, StoreError> {
            self.inner.update_identity(id, details)
        }

        fn delete_identity(&self, id: IdentityId) -> Result<Identity, StoreError> {
            self.inner.delete_identity(id)
        }
    }

    impl ClusterRepo for FlakyStore {
        fn list_clusters(&self) -> Result<Vec<UnknownCluster>, StoreError> {
            Self::check(&self.fail_list_clusters, "list_clusters")?;
            self.inner.list_clusters()
        }

        fn get_cluster(&self, id: ClusterId) -> Result<Option<UnknownCluster>, StoreError> {
            if self.hide_clusters.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.get_cluster(id)
        }

        fn insert_cluster(&self, cluster: NewCluster) -> Result<UnknownCluster, StoreError> {
            Self::check(&self.fail_insert_cluster, "insert_cluster")?;
            self.inner.insert_cluster(cluster)
        }

        fn delete_cluster(&self, id: ClusterId) -> Result<UnknownCluster, StoreError> {
            self.inner.delete_cluster(id)
        }
    }

    impl GalleryStore for FlakyStore {
        fn promote_cluster(&self, cluster_id: ClusterId, identity: NewIdentity) -> Result<Identity, StoreError> {
            self.inner.promote_cluster(cluster_id, identity)
        }
    }

    fn flaky_session(store: Arc<FlakyStore>, dir: &tempfile::TempDir) -> MonitorSession {
        let config = SessionConfig {
            embedding_dim: 4,
            passport_size: 16,
            known_dir: dir.path().join("known"),
            unknown_dir: dir.path().join("unknown"),
            ..SessionConfig::default()
        };
        MonitorSession::start(config, store).unwrap()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_unknown_lifecycle_through_promotion() {
        let h = harness();
        let t0 = Instant::now();
        let a = [0.0, 0.0, 0.0, 0.0];
        let a_near = [0.1, 0.0, 0.0, 0.0];

        // t=0: empty gallery, new cluster, alert.
        let report = h.session.process_frame(&h.frame, &[face(a)], t0);
        let MatchResult::Unknown(c1) = report.observations[0].label.clone() else {
            panic!("expected unknown, got {:?}", report.observations[0].label);
        };
        assert!(report.observations[0].alerted);
        assert_eq!(h.sink.count(), 1);

        // t=10: same cluster, cooldown active.
        let report = h.session.process_frame(&h.frame, &[face(a_near)], t0 + secs(10));
        assert_eq!(report.observations[0].label, MatchResult::Unknown(c1));
        assert!(!report.observations[0].alerted);
        assert_eq!(h.sink.count(), 1);

        // t=65: cooldown elapsed, alert again.
        let report = h.session.process_frame(&h.frame, &[face(a_near)], t0 + secs(65));
        assert!(report.observations[0].alerted);
        assert_eq!(h.sink.count(), 2);
        assert_eq!(h.store.list_clusters().unwrap().len(), 1);

        // Promote, then the same face is known and never reaches unknown handling.
        h.session.promote(c1, IdentityDetails::named("Alice")).unwrap();
        assert!(h.store.list_clusters().unwrap().is_empty());

        let report = h.session.process_frame(&h.frame, &[face(a_near)], t0 + secs(200));
        assert_eq!(report.observations[0].label, MatchResult::Known("Alice".into()));
        assert!(!report.observations[0].alerted);
        assert!(h.store.list_clusters().unwrap().is_empty());
        assert_eq!(h.sink.count(), 2);
    }

    #[test]
    fn test_alert_carries_cluster_image() {
        let h = harness();
        h.session.process_frame(&h.frame, &[face([0.0; 4])], Instant::now());

        let alerts = h.sink.alerts.lock().unwrap();
        assert_eq!(alerts[0].label, "Unknown");
        assert!(alerts[0].image_path.starts_with(&h.session.config().unknown_dir));
        assert!(alerts[0].image_path.exists());
    }

    #[test]
    fn test_bad_dimension_does_not_abort_frame() {
        let h = harness();
        let bad = Detection {
            bbox: face([0.0; 4]).bbox,
            embedding: Embedding::new(vec![0.0, 0.0]),
        };

        let report = h
            .session
            .process_frame(&h.frame, &[bad, face([1.0, 0.0, 0.0, 0.0])], Instant::now());

        assert_eq!(report.observations.len(), 2);
        assert_eq!(report.observations[0].label, MatchResult::Unresolved);
        assert!(matches!(report.observations[1].label, MatchResult::Unknown(_)));
        assert!(matches!(report.errors[0], ObservationError::Dimension(_)));
        assert_eq!(h.session.status().errors, 1);
    }

    #[test]
    fn test_non_finite_embedding_rejected_per_observation() {
        let h = harness();
        let report = h.session.process_frame(
            &h.frame,
            &[
                face([f32::INFINITY, 0.0, 0.0, 0.0]),
                face([f32::NAN, 0.0, 0.0, 0.0]),
                face([0.0; 4]),
            ],
            Instant::now(),
        );

        assert_eq!(report.observations[0].label, MatchResult::Unresolved);
        assert_eq!(report.observations[1].label, MatchResult::Unresolved);
        assert!(matches!(report.errors[..], [ObservationError::NonFinite, ObservationError::NonFinite]));
        assert!(matches!(report.observations[2].label, MatchResult::Unknown(_)));
        // Only the finite face reached the cluster store.
        assert_eq!(h.store.list_clusters().unwrap().len(), 1);
    }

    #[test]
    fn test_store_failure_degrades_unknown_faces_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        store
            .insert_identity(NewIdentity {
                details: IdentityDetails::named("Known"),
                image_path: dir.path().join("k.jpg"),
                embedding: Embedding::new(vec![0.0; 4]),
                date_added: Utc::now(),
            })
            .unwrap();
        let session = flaky_session(store.clone(), &dir);
        store.fail_list_clusters.store(true, Ordering::SeqCst);

        let report = session.process_frame(
            &RgbImage::new(120, 120),
            &[face([3.0, 0.0, 0.0, 0.0]), face([0.1, 0.0, 0.0, 0.0])],
            Instant::now(),
        );

        assert_eq!(report.observations.len(), 2);
        assert_eq!(report.observations[0].label, MatchResult::Unresolved);
        assert!(!report.observations[0].alerted);
        assert!(matches!(
            report.errors[..],
            [ObservationError::Unknown(DedupError::Store(StoreError::Backend(_)))]
        ));
        assert_eq!(report.observations[1].label, MatchResult::Known("Known".into()));
        assert_eq!(session.status().alerts, 0);
    }

    #[test]
    fn test_failed_cluster_insert_removes_crop() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        let session = flaky_session(store.clone(), &dir);
        store.fail_insert_cluster.store(true, Ordering::SeqCst);

        let report = session.process_frame(&RgbImage::new(120, 120), &[face([0.0; 4])], Instant::now());

        assert_eq!(report.observations[0].label, MatchResult::Unresolved);
        assert_eq!(report.errors.len(), 1);
        let leftovers = std::fs::read_dir(&session.config().unknown_dir).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_promoted_identity_recognized_when_reload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        let session = flaky_session(store.clone(), &dir);
        let frame = RgbImage::new(120, 120);
        let t0 = Instant::now();

        let report = session.process_frame(&frame, &[face([0.0; 4])], t0);
        let MatchResult::Unknown(cluster) = report.observations[0].label else {
            panic!("expected unknown, got {:?}", report.observations[0].label);
        };

        store.fail_list_identities.store(true, Ordering::SeqCst);
        session.promote(cluster, IdentityDetails::named("Alice")).unwrap();

        let report = session.process_frame(&frame, &[face([0.1, 0.0, 0.0, 0.0])], t0 + secs(1));
        assert_eq!(report.observations[0].label, MatchResult::Known("Alice".into()));
        assert_eq!(session.gallery().len(), 1);
    }

    #[test]
    fn test_cluster_removed_mid_observation_raises_no_alert() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::default());
        let session = flaky_session(store.clone(), &dir);
        let frame = RgbImage::new(120, 120);
        let t0 = Instant::now();

        session.process_frame(&frame, &[face([0.0; 4])], t0);
        assert_eq!(session.status().alerts, 1);
        session.discard_cluster(1).unwrap();
        assert_eq!(session.status().tracked_cooldowns, 0);

        // The next face matches a listed cluster that is gone by the time
        // the gate is consulted.
        store
            .inner
            .insert_cluster(NewCluster {
                image_path: dir.path().join("c.jpg"),
                embedding: Embedding::new(vec![0.0; 4]),
                date_detected: Utc::now(),
            })
            .unwrap();
        store.hide_clusters.store(true, Ordering::SeqCst);

        let report = session.process_frame(&frame, &[face([0.1, 0.0, 0.0, 0.0])], t0 + secs(120));
        assert_eq!(report.observations[0].label, MatchResult::Unresolved);
        assert!(!report.observations[0].alerted);
        assert!(report.errors.is_empty());
        let status = session.status();
        assert_eq!(status.alerts, 1);
        assert_eq!(status.tracked_cooldowns, 0);
    }

    #[test]
    fn test_two_distinct_faces_in_one_frame() {
        let h = harness();
        let report = h.session.process_frame(
            &h.frame,
            &[face([0.0, 0.0, 0.0, 0.0]), face([1.0, 1.0, 0.0, 0.0])],
            Instant::now(),
        );
        assert_eq!(report.alerts(), 2);
        assert_eq!(h.store.list_clusters().unwrap().len(), 2);
    }

    #[test]
    fn test_same_face_twice_in_one_frame_deduplicated() {
        let h = harness();
        let report = h.session.process_frame(
            &h.frame,
            &[face([0.0, 0.0, 0.0, 0.0]), face([0.05, 0.0, 0.0, 0.0])],
            Instant::now(),
        );
        assert_eq!(report.observations[0].label, report.observations[1].label);
        assert_eq!(report.alerts(), 1);
        assert_eq!(h.store.list_clusters().unwrap().len(), 1);
    }

    #[test]
    fn test_search_and_listing_order() {
        let h = harness();
        let t0 = Instant::now();
        h.session.process_frame(&h.frame, &[face([0.0; 4])], t0);
        h.session.process_frame(&h.frame, &[face([2.0, 0.0, 0.0, 0.0])], t0);

        let clusters = h.session.list_clusters().unwrap();
        assert!(clusters[0].id > clusters[1].id);

        h.session.promote(clusters[0].id, IdentityDetails::named("Grace Hopper")).unwrap();
        h.session.promote(clusters[1].id, IdentityDetails::named("Alan")).unwrap();

        let found = h.session.search_identities("hop").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].details.name, "Grace Hopper");
        assert_eq!(h.session.search_identities("").unwrap().len(), 2);
    }

    #[test]
    fn test_status_counts() {
        let h = harness();
        let t0 = Instant::now();
        h.session.process_frame(&h.frame, &[face([0.0; 4])], t0);
        h.session.process_frame(&h.frame, &[face([0.0; 4])], t0 + secs(1));

        let status = h.session.status();
        assert_eq!(status.frames, 2);
        assert_eq!(status.observations, 2);
        assert_eq!(status.alerts, 1);
        assert_eq!(status.suppressed, 1);
        assert_eq!(status.unknown_clusters, Some(1));
        assert_eq!(status.tracked_cooldowns, 1);
        assert_eq!(status.session_id, h.session.id());
    }

    #[test]
    fn test_gallery_loaded_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .insert_identity(NewIdentity {
                details: IdentityDetails::named("Known"),
                image_path: dir.path().join("k.jpg"),
                embedding: Embedding::new(vec![0.0; 4]),
                date_added: Utc::now(),
            })
            .unwrap();

        let config = SessionConfig {
            embedding_dim: 4,
            known_dir: dir.path().join("known"),
            unknown_dir: dir.path().join("unknown"),
            ..SessionConfig::default()
        };
        let session = MonitorSession::start(config, store).unwrap();
        let report = session.process_frame(&RgbImage::new(100, 100), &[face([0.1, 0.0, 0.0, 0.0])], Instant::now());
        assert_eq!(report.observations[0].label, MatchResult::Known("Known".into()));
    }
}
