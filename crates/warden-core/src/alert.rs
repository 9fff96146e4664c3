//! Per-cluster alert cooldown and alert delivery.

use crate::types::ClusterId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Default minimum time between repeated alerts for the same cluster.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Gate decision for one unknown observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Alert,
    /// Cooldown still active; `remaining` until the next alert is allowed.
    Suppress { remaining: Duration },
}

/// Cooldown state machine keyed by cluster id.
///
/// Lives for one monitoring session; nothing is persisted across restarts.
#[derive(Debug)]
pub struct AlertGate {
    cooldown: Duration,
    last_alert: HashMap<ClusterId, Instant>,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether to alert for `cluster` at `now`.
    ///
    /// A freshly created cluster always alerts. An existing one alerts if it
    /// never alerted before or more than the cooldown has elapsed since its
    /// last alert. Suppression leaves the state untouched.
    pub fn admit(&mut self, cluster: ClusterId, fresh: bool, now: Instant) -> GateDecision {
        if !fresh {
            if let Some(&last) = self.last_alert.get(&cluster) {
                let elapsed = now.saturating_duration_since(last);
                if elapsed <= self.cooldown {
                    return GateDecision::Suppress {
                        remaining: self.cooldown - elapsed,
                    };
                }
            }
        }

        self.last_alert.insert(cluster, now);
        GateDecision::Alert
    }

    /// Drop the entry for a cluster that was promoted or discarded.
    pub fn forget(&mut self, cluster: ClusterId) -> bool {
        self.last_alert.remove(&cluster).is_some()
    }

    pub fn tracked(&self) -> usize {
        self.last_alert.len()
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

/// An alert about an unknown face.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub label: String,
    pub cluster_id: ClusterId,
    pub image_path: PathBuf,
    pub raised_at: DateTime<Utc>,
}

/// Fire-and-forget alert destination.
pub trait AlertSink: Send + Sync {
    fn send(&self, alert: &Alert);
}

/// Writes alerts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn send(&self, alert: &Alert) {
        tracing::warn!(
            label = %alert.label,
            cluster = alert.cluster_id,
            image = %alert.image_path.display(),
            "ALERT: {} detected",
            alert.label
        );
    }
}
