//! Nearest-neighbour classification of one embedding against the gallery.

use crate::gallery::Gallery;
use crate::types::Embedding;

/// Default maximum distance for a gallery entry to count as a match.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.6;

/// Outcome of classifying a single observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Known {
        label: String,
        /// Number of gallery entries with this label that matched.
        votes: usize,
    },
    Unknown,
}

/// Strategy for matching a probe embedding against a gallery of known faces.
pub trait Classifier {
    fn classify(&self, probe: &Embedding, gallery: &Gallery) -> Classification;
}

/// Majority vote over every gallery entry within tolerance (inclusive).
///
/// Ties go to the label whose first matching entry appears earliest in
/// gallery order. Entries whose dimension differs from the probe, or whose
/// distance is NaN, are skipped.
#[derive(Debug, Clone, Copy)]
pub struct VotingClassifier {
    pub tolerance: f32,
}

impl Default for VotingClassifier {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_MATCH_TOLERANCE,
        }
    }
}

impl Classifier for VotingClassifier {
    fn classify(&self, probe: &Embedding, gallery: &Gallery) -> Classification {
        // (label, votes), kept in order of first match.
        let mut tally: Vec<(&str, usize)> = Vec::new();

        for (idx, entry) in gallery.entries().iter().enumerate() {
            let distance = match probe.euclidean_distance(&entry.embedding) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(index = idx, label = %entry.label, error = %e, "skipping gallery entry");
                    continue;
                }
            };
            if distance.is_nan() || distance > self.tolerance {
                continue;
            }
            match tally.iter_mut().find(|(label, _)| *label == entry.label) {
                Some((_, votes)) => *votes += 1,
                None => tally.push((entry.label.as_str(), 1)),
            }
        }

        let mut best: Option<(&str, usize)> = None;
        for &(label, votes) in &tally {
            // Strictly greater: an equal count never displaces an earlier label.
            if best.map_or(true, |(_, v)| votes > v) {
                best = Some((label, votes));
            }
        }

        match best {
            Some((label, votes)) => Classification::Known {
                label: label.to_string(),
                votes,
            },
            None => Classification::Unknown,
        }
    }
}
