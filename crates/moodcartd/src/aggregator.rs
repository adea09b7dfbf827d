//! Periodic expression sampling with a single in-flight guard.
//!
//! Every tick classifies the latest captured frame unless the previous call
//! is still outstanding, in which case the tick is skipped. Outcomes replace
//! the published [`DetectionResult`] wholesale:
//!
//! - no face, or a dominant score below the confidence gate: cleared
//! - a gated detection: published, and any failure notice cleared
//! - an inference error: the last result is kept and a notice is set
//! - the frame slot emptied after a frame was seen: cleared, a notice is
//!   set and sampling ends

use crate::engine::EngineError;
use async_trait::async_trait;
use moodcart_core::{DetectionResult, ExpressionVector};
use moodcart_hw::SharedFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Anything that can classify a frame without blocking the runtime.
#[async_trait]
pub trait Inference: Send + Sync + 'static {
    async fn classify(&self, frame: SharedFrame) -> Outcome;
}

pub type Outcome = Result<Option<ExpressionVector>, EngineError>;

/// Notice left on the board when the capture thread dies mid-session.
pub const CAPTURE_LOST: &str = "camera capture stopped";

/// Single-writer, multi-reader holder of the current detection.
#[derive(Debug)]
pub struct DetectionBoard {
    result: watch::Sender<Option<DetectionResult>>,
    notice: watch::Sender<Option<String>>,
}

impl Default for DetectionBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionBoard {
    pub fn new() -> Self {
        Self {
            result: watch::channel(None).0,
            notice: watch::channel(None).0,
        }
    }

    pub fn current(&self) -> Option<DetectionResult> {
        self.result.borrow().clone()
    }

    /// Last detection failure, until the next successful tick.
    pub fn notice(&self) -> Option<String> {
        self.notice.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<DetectionResult>> {
        self.result.subscribe()
    }

    /// Replace the current result and clear the failure notice.
    pub fn publish(&self, result: Option<DetectionResult>) {
        self.result.send_replace(result);
        self.notice.send_replace(None);
    }

    /// Record a failed tick without touching the current result.
    pub fn report(&self, message: String) {
        self.notice.send_replace(Some(message));
    }
}

/// Counters returned when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorStats {
    pub ticks: u64,
    pub inferences: u64,
    pub skipped: u64,
}

pub struct EmotionAggregator {
    inference: Arc<dyn Inference>,
    board: Arc<DetectionBoard>,
    frames: watch::Receiver<Option<SharedFrame>>,
    period: Duration,
}

impl EmotionAggregator {
    pub fn new(
        inference: Arc<dyn Inference>,
        board: Arc<DetectionBoard>,
        frames: watch::Receiver<Option<SharedFrame>>,
        period: Duration,
    ) -> Self {
        Self {
            inference,
            board,
            frames,
            period,
        }
    }

    /// Sample until `stop` fires, its sender is dropped, or capture is lost.
    ///
    /// An inference still outstanding at that point is aborted and its
    /// result never published.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) -> AggregatorStats {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<Outcome>> = None;
        let mut stats = AggregatorStats::default();
        let mut seen_frame = false;

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,

                outcome = settle(&mut in_flight), if in_flight.is_some() => {
                    self.apply(outcome);
                }

                _ = ticker.tick() => {
                    stats.ticks += 1;
                    if in_flight.is_some() {
                        stats.skipped += 1;
                        tracing::debug!("inference outstanding, tick skipped");
                        continue;
                    }
                    let Some(frame) = self.frames.borrow().clone() else {
                        if seen_frame {
                            tracing::warn!("capture lost; detection cleared");
                            self.board.publish(None);
                            self.board.report(CAPTURE_LOST.to_string());
                            break;
                        }
                        tracing::debug!("no frame captured yet");
                        continue;
                    };
                    seen_frame = true;
                    stats.inferences += 1;
                    let inference = self.inference.clone();
                    in_flight =
                        Some(tokio::spawn(async move { inference.classify(frame).await }));
                }
            }
        }

        if let Some(task) = in_flight.take() {
            task.abort();
            tracing::debug!("in-flight inference discarded");
        }
        tracing::debug!(
            ticks = stats.ticks,
            inferences = stats.inferences,
            skipped = stats.skipped,
            "sampling loop stopped"
        );
        stats
    }

    fn apply(&self, outcome: Outcome) {
        match outcome {
            Ok(None) => {
                tracing::debug!("no face");
                self.board.publish(None);
            }
            Ok(Some(vector)) => {
                let result = DetectionResult::from_vector(vector);
                match &result {
                    Some(r) => tracing::debug!(
                        emotion = %r.dominant_emotion,
                        confidence = r.confidence,
                        "detection published"
                    ),
                    None => {
                        tracing::debug!(confidence = vector.dominant().1, "below confidence gate")
                    }
                }
                self.board.publish(result);
            }
            Err(e) => {
                tracing::warn!(error = %e, "detection failed; keeping last result");
                self.board.report(e.to_string());
            }
        }
    }
}

/// Wait for the outstanding call and empty the slot.
async fn settle(slot: &mut Option<JoinHandle<Outcome>>) -> Outcome {
    let Some(task) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let joined = task.await;
    *slot = None;
    joined.unwrap_or_else(|e| Err(EngineError::Task(e.to_string())))
}
