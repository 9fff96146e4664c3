//! Replay encoder: frames and detections recorded by an external detector
//! into a JSON-lines manifest, one frame per line:
//!
//! ```text
//! {"frame": "frames/000001.jpg", "faces": [{"bbox": {"x": 10, "y": 20, "width": 64, "height": 64}, "embedding": [0.01, ...]}]}
//! ```
//!
//! Relative frame paths are resolved against the manifest's directory.

use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use warden_core::{Detection, EncodedFrame, EncoderError, FaceEncoder};

/// One manifest line.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub frame: PathBuf,
    #[serde(default)]
    pub faces: Vec<Detection>,
}

/// Read every entry of a manifest. Blank lines are skipped.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>, EncoderError> {
    let file = std::fs::File::open(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut entries = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut entry: ManifestEntry = serde_json::from_str(&line).map_err(|e| {
            EncoderError::Invalid(format!("{}:{}: {e}", path.display(), idx + 1))
        })?;
        if entry.frame.is_relative() {
            entry.frame = base.join(&entry.frame);
        }
        entries.push(entry);
    }

    tracing::info!(path = %path.display(), frames = entries.len(), "replay manifest loaded");
    Ok(entries)
}

/// Decodes the frame image of a manifest entry and passes its recorded
/// detections through.
#[derive(Debug, Default)]
pub struct ReplayEncoder;

impl FaceEncoder for ReplayEncoder {
    type Input = ManifestEntry;

    fn encode(&mut self, input: ManifestEntry) -> Result<EncodedFrame, EncoderError> {
        let image = image::open(&input.frame)?.to_rgb8();
        tracing::trace!(
            frame = %input.frame.display(),
            width = image.width(),
            height = image.height(),
            faces = input.faces.len(),
            "frame decoded"
        );
        Ok(EncodedFrame {
            image,
            detections: input.faces,
        })
    }
}
