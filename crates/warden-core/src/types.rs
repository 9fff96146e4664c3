use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Row id of a known identity.
pub type IdentityId = i64;

/// Row id of an unknown-face cluster.
pub type ClusterId = i64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistanceError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

/// Axis-aligned face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Face embedding vector (128-dimensional for the default encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when no component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Both vectors must have the same dimension; a mismatch is reported
    /// instead of silently comparing the common prefix.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, DistanceError> {
        if self.values.len() != other.values.len() {
            return Err(DistanceError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Descriptive metadata attached to a known identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityDetails {
    pub name: String,
    pub contact: Option<String>,
    pub age: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub occupation: Option<String>,
}

impl IdentityDetails {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Trim the name and drop blank optional fields.
    ///
    /// Returns `None` when the name is empty after trimming.
    pub fn normalized(self) -> Option<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return None;
        }
        let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Some(Self {
            name,
            contact: clean(self.contact),
            age: clean(self.age),
            gender: clean(self.gender),
            address: clean(self.address),
            occupation: clean(self.occupation),
        })
    }
}

/// A known face in the gallery.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    #[serde(flatten)]
    pub details: IdentityDetails,
    pub image_path: PathBuf,
    #[serde(skip)]
    pub embedding: Embedding,
    pub date_added: DateTime<Utc>,
}

/// Identity fields supplied on insert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub details: IdentityDetails,
    pub image_path: PathBuf,
    pub embedding: Embedding,
    pub date_added: DateTime<Utc>,
}

/// A group of unknown-face observations represented by the embedding of
/// its first member.
#[derive(Debug, Clone, Serialize)]
pub struct UnknownCluster {
    pub id: ClusterId,
    pub image_path: PathBuf,
    #[serde(skip)]
    pub embedding: Embedding,
    pub date_detected: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCluster {
    pub image_path: PathBuf,
    pub embedding: Embedding,
    pub date_detected: DateTime<Utc>,
}

/// One face reported by the external detector/encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Resolved label of an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum MatchResult {
    Known(String),
    Unknown(ClusterId),
    /// Classified as unknown, but no cluster could be resolved (store or crop failure).
    Unresolved,
}

impl MatchResult {
    /// Label shown to operators and passed to alert sinks.
    pub fn display_label(&self) -> &str {
        match self {
            MatchResult::Known(name) => name,
            MatchResult::Unknown(_) | MatchResult::Unresolved => "Unknown",
        }
    }
}
