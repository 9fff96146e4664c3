//! warden-core — Known/unknown face decisions for a monitoring camera.
//!
//! Classifies face embeddings against a gallery of known identities by
//! majority vote, groups unknown faces into clusters, rate-limits alerts per
//! cluster and promotes clusters to identities on operator request. Face
//! detection and embedding are external; see [`encoder::FaceEncoder`].

pub mod alert;
pub mod classifier;
pub mod crop;
pub mod curator;
pub mod dedup;
pub mod encoder;
pub mod gallery;
pub mod session;
pub mod store;
pub mod types;

pub use alert::{Alert, AlertGate, AlertSink, LogSink};
pub use classifier::{Classification, Classifier, VotingClassifier};
pub use curator::CurateError;
pub use encoder::{EncodedFrame, EncoderError, FaceEncoder};
pub use gallery::{Gallery, SharedGallery};
pub use session::{FrameReport, MonitorSession, SessionConfig, SessionError, SessionStatus};
pub use store::{ClusterRepo, GalleryStore, IdentityRepo, MemoryStore, RecordKind, StoreError};
pub use types::{
    BoundingBox, ClusterId, Detection, Embedding, Identity, IdentityDetails, IdentityId,
    MatchResult, NewCluster, NewIdentity, UnknownCluster,
};
