use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use warden_core::{EncoderError, FaceEncoder, MonitorSession};

/// Frames that may wait for the worker. Anything beyond is dropped at submit.
pub const FRAME_QUEUE_DEPTH: usize = 2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Backpressure and throughput counters shared between the pacer and the worker.
#[derive(Debug, Default)]
pub struct EngineStats {
    submitted: AtomicU64,
    dropped: AtomicU64,
    coalesced: AtomicU64,
    processed: AtomicU64,
    encode_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    pub submitted: u64,
    pub dropped: u64,
    pub coalesced: u64,
    pub processed: u64,
    pub encode_failures: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> EngineCounters {
        EngineCounters {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Non-blocking entry point into the frame worker.
pub struct FrameSubmitter<I> {
    tx: mpsc::Sender<I>,
    stats: Arc<EngineStats>,
}

impl<I> FrameSubmitter<I> {
    /// Queue a frame without waiting.
    ///
    /// Returns `Ok(false)` when the queue is full and the frame was dropped.
    pub fn submit(&self, input: I) -> Result<bool, EngineError> {
        match self.tx.try_send(input) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("frame dropped: worker behind");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::ChannelClosed),
        }
    }
}

/// Spawn the frame worker on a dedicated OS thread.
///
/// The worker always encodes the newest queued frame: older frames still in
/// the queue when it becomes free are discarded before any work is done on
/// them. The thread exits once every submitter is dropped.
pub fn spawn_engine<E>(
    mut encoder: E,
    session: Arc<MonitorSession>,
    stats: Arc<EngineStats>,
) -> Result<(FrameSubmitter<E::Input>, std::thread::JoinHandle<()>), EngineError>
where
    E: FaceEncoder + 'static,
{
    let (tx, mut rx) = mpsc::channel::<E::Input>(FRAME_QUEUE_DEPTH);
    let worker_stats = Arc::clone(&stats);

    let handle = std::thread::Builder::new()
        .name("warden-engine".into())
        .spawn(move || {
            tracing::info!(session = %session.id(), "engine thread started");
            while let Some(mut input) = rx.blocking_recv() {
                while let Ok(newer) = rx.try_recv() {
                    worker_stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    input = newer;
                }

                let frame = match encoder.encode(input) {
                    Ok(frame) => frame,
                    Err(e) => {
                        worker_stats.encode_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "frame encode failed; skipping");
                        continue;
                    }
                };

                let report = session.process_frame(&frame.image, &frame.detections, Instant::now());
                worker_stats.processed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    faces = report.observations.len(),
                    alerts = report.alerts(),
                    errors = report.errors.len(),
                    "frame processed"
                );
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((FrameSubmitter { tx, stats }, handle))
}

/// Submit `frames` at a fixed cadence until exhausted or the worker is gone.
///
/// Missed ticks are skipped rather than bursted, so a stalled pacer never
/// floods the queue.
pub async fn run_pacer<I>(
    frames: impl IntoIterator<Item = I>,
    interval: Duration,
    submitter: FrameSubmitter<I>,
) -> Result<(), EngineError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut count = 0u64;
    for frame in frames {
        ticker.tick().await;
        submitter.submit(frame)?;
        count += 1;
    }

    tracing::info!(frames = count, "replay finished");
    Ok(())
}
