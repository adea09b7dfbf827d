//! Camera session lifecycle: `Idle -> Starting -> Active -> Idle`.
//!
//! An active session owns a capture thread that publishes the latest frame
//! and the sampling loop that reads it. [`CaptureSession::stop`] is the one
//! teardown path that waits for the device to close. Dropping an active
//! session signals the same release without waiting.
//!
//! A capture thread that dies on its own empties the frame slot and moves
//! the session back to `Idle`; the next start replaces it.

use crate::aggregator::{AggregatorStats, DetectionBoard, EmotionAggregator, Inference};
use moodcart_hw::{CameraError, CameraProvider, CaptureConstraints, FrameSource, SharedFrame};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Active,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("camera access denied: {0}")]
    CameraAccessDenied(String),
}

pub struct CaptureSession {
    provider: Arc<dyn CameraProvider>,
    constraints: CaptureConstraints,
    period: Duration,
    inference: Arc<dyn Inference>,
    board: Arc<DetectionBoard>,
    /// Shared with the capture thread so a dead capture can report itself.
    state: Arc<watch::Sender<SessionState>>,
    /// Set once the camera could not be acquired; start stays disabled after that.
    denied: Option<String>,
    running: Option<Running>,
}

impl CaptureSession {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        constraints: CaptureConstraints,
        period: Duration,
        inference: Arc<dyn Inference>,
        board: Arc<DetectionBoard>,
    ) -> Self {
        Self {
            provider,
            constraints,
            period,
            inference,
            board,
            state: Arc::new(watch::channel(SessionState::Idle).0),
            denied: None,
            running: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Acquire the camera and begin sampling. No-op when already active.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.running.is_some() {
            if self.state() == SessionState::Active {
                tracing::debug!("capture session already active");
                return Ok(());
            }
            // The capture thread died; reap it before opening the device again.
            self.stop().await;
        }
        if let Some(reason) = &self.denied {
            return Err(SessionError::CameraAccessDenied(reason.clone()));
        }

        self.state.send_replace(SessionState::Starting);

        let provider = self.provider.clone();
        let constraints = self.constraints;
        let opened = tokio::task::spawn_blocking(move || provider.open(&constraints)).await;
        let source = match opened {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => return Err(self.refuse(e)),
            Err(e) => return Err(self.fail(format!("camera open task failed: {e}"))),
        };

        let id = Uuid::new_v4();
        let (frame_tx, frame_rx) = watch::channel(None);
        let release = Arc::new(AtomicBool::new(false));
        // Active goes out before the thread exists so an early capture death
        // is never overwritten.
        self.state.send_replace(SessionState::Active);
        let capture = Capture {
            id,
            frames: frame_tx,
            state: self.state.clone(),
            release: release.clone(),
        };
        let capture = match capture.spawn(source) {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail(format!("failed to spawn capture thread: {e}"))),
        };

        let aggregator = EmotionAggregator::new(
            self.inference.clone(),
            self.board.clone(),
            frame_rx,
            self.period,
        );
        let (stop_tx, stop_rx) = oneshot::channel();
        let sampler = tokio::spawn(aggregator.run(stop_rx));

        self.running = Some(Running {
            id,
            release,
            capture: Some(capture),
            sampler: Some(sampler),
            stop_sampler: Some(stop_tx),
        });
        tracing::info!(
            session = %id,
            width = constraints.width,
            height = constraints.height,
            fps = constraints.fps,
            "capture session started"
        );
        Ok(())
    }

    /// Stop sampling and release the camera. Always ends `Idle`.
    ///
    /// Returns only after the sampling loop has exited and the device is
    /// closed, so no detection is published afterwards.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let id = running.id;
            match running.shutdown().await {
                Some(stats) => tracing::info!(
                    session = %id,
                    ticks = stats.ticks,
                    inferences = stats.inferences,
                    skipped = stats.skipped,
                    "capture session stopped"
                ),
                None => tracing::info!(session = %id, "capture session stopped"),
            }
        }
        self.state.send_replace(SessionState::Idle);
    }

    /// Acquisition failures disable start for the rest of the process.
    fn refuse(&mut self, e: CameraError) -> SessionError {
        let reason = e.to_string();
        if e.is_acquisition_failure() {
            tracing::warn!(error = %e, "camera access denied; camera start disabled");
            self.denied = Some(reason.clone());
        } else {
            tracing::warn!(error = %e, "camera start failed");
        }
        self.state.send_replace(SessionState::Idle);
        SessionError::CameraAccessDenied(reason)
    }

    fn fail(&mut self, reason: String) -> SessionError {
        tracing::warn!(error = %reason, "camera start failed");
        self.state.send_replace(SessionState::Idle);
        SessionError::CameraAccessDenied(reason)
    }
}

/// Resources of an active session.
struct Running {
    id: Uuid,
    release: Arc<AtomicBool>,
    capture: Option<std::thread::JoinHandle<()>>,
    sampler: Option<JoinHandle<AggregatorStats>>,
    stop_sampler: Option<oneshot::Sender<()>>,
}

impl Running {
    async fn shutdown(mut self) -> Option<AggregatorStats> {
        if let Some(tx) = self.stop_sampler.take() {
            let _ = tx.send(());
        }
        let stats = match self.sampler.take() {
            Some(task) => task.await.ok(),
            None => None,
        };
        self.release.store(true, Ordering::SeqCst);
        // Joining waits out at most one frame dequeue, off the runtime threads.
        if let Some(thread) = self.capture.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::warn!(session = %self.id, "capture thread panicked"),
                Err(e) => tracing::warn!(error = %e, "camera release task failed"),
            }
        }
        stats
    }
}

impl Drop for Running {
    /// Signals release and detaches the capture thread; it closes the device
    /// at its next frame.
    fn drop(&mut self) {
        if let Some(task) = self.sampler.take() {
            task.abort();
        }
        self.release.store(true, Ordering::SeqCst);
    }
}

/// Everything the capture thread owns besides the frame source.
struct Capture {
    id: Uuid,
    frames: watch::Sender<Option<SharedFrame>>,
    state: Arc<watch::Sender<SessionState>>,
    release: Arc<AtomicBool>,
}

impl Capture {
    fn spawn(self, source: Box<dyn FrameSource>) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name("moodcart-capture".into())
            .spawn(move || self.run(source))
    }

    fn run(self, mut source: Box<dyn FrameSource>) {
        let Capture {
            id,
            frames,
            state,
            release,
        } = self;
        let result = source.run(&mut |frame| {
            if release.load(Ordering::SeqCst) {
                return ControlFlow::Break(());
            }
            frames.send_replace(Some(Arc::new(frame)));
            ControlFlow::Continue(())
        });
        drop(source);
        tracing::debug!(session = %id, "camera released");

        if release.load(Ordering::SeqCst) {
            return;
        }
        match result {
            Err(e) => tracing::warn!(session = %id, error = %e, "capture died; session idle"),
            Ok(()) => tracing::warn!(session = %id, "capture stream ended; session idle"),
        }
        frames.send_replace(None);
        state.send_replace(SessionState::Idle);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aggregator::tests::{face, ScriptedInference, Step};
    use crate::aggregator::CAPTURE_LOST;
    use moodcart_core::Emotion;
    use moodcart_hw::Frame;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, timeout};

    pub(crate) struct FakeSource {
        pub(crate) released: Arc<AtomicUsize>,
        /// Fail like an unplugged device once this many frames were delivered.
        pub(crate) fail_after: Option<u32>,
    }

    impl FrameSource for FakeSource {
        fn run(
            &mut self,
            sink: &mut dyn FnMut(Frame) -> ControlFlow<()>,
        ) -> Result<(), CameraError> {
            let mut sequence = 0;
            loop {
                if self.fail_after == Some(sequence) {
                    std::thread::sleep(Duration::from_millis(100));
                    return Err(CameraError::CaptureFailed("device unplugged".into()));
                }
                let frame = Frame::from_gray(vec![0; 4], 2, 2, sequence)
                    .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
                if sink(frame).is_break() {
                    return Ok(());
                }
                sequence += 1;
                std::thread::sleep(Duration::from_millis(5));
            }
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub(crate) refuse: Option<fn() -> CameraError>,
        pub(crate) opened: AtomicUsize,
        pub(crate) released: Arc<AtomicUsize>,
        pub(crate) fail_after: Option<u32>,
    }

    impl CameraProvider for FakeProvider {
        fn open(
            &self,
            constraints: &CaptureConstraints,
        ) -> Result<Box<dyn FrameSource>, CameraError> {
            assert_eq!(*constraints, CaptureConstraints::default());
            self.opened.fetch_add(1, Ordering::SeqCst);
            if let Some(refuse) = self.refuse {
                return Err(refuse());
            }
            Ok(Box::new(FakeSource {
                released: self.released.clone(),
                fail_after: self.fail_after,
            }))
        }
    }

    fn session(
        provider: Arc<FakeProvider>,
        inference: Arc<ScriptedInference>,
    ) -> (CaptureSession, Arc<DetectionBoard>) {
        let board = Arc::new(DetectionBoard::new());
        let session = CaptureSession::new(
            provider,
            CaptureConstraints::default(),
            Duration::from_millis(20),
            inference,
            board.clone(),
        );
        (session, board)
    }

    fn idle_inference() -> Arc<ScriptedInference> {
        ScriptedInference::new(vec![Step::NoFace], Duration::ZERO)
    }

    #[tokio::test]
    async fn test_start_stop_releases_camera() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = session(provider.clone(), idle_inference());
        let states = session.subscribe_state();
        assert_eq!(session.state(), SessionState::Idle);

        session.start().await.unwrap();
        assert_eq!(*states.borrow(), SessionState::Active);
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);

        sleep(Duration::from_millis(30)).await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = session(provider.clone(), idle_inference());

        session.start().await.unwrap();
        session.start().await.unwrap();
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Active);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_harmless() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = session(provider, idle_inference());
        session.stop().await;
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_denied_camera_stays_disabled() {
        let provider = Arc::new(FakeProvider {
            refuse: Some(|| CameraError::AccessDenied("/dev/video0: permission denied".into())),
            ..Default::default()
        });
        let (mut session, _) = session(provider.clone(), idle_inference());

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, SessionError::CameraAccessDenied(_)));
        assert_eq!(session.state(), SessionState::Idle);

        assert_eq!(session.start().await.unwrap_err(), err);
        assert_eq!(provider.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_format_failure_can_be_retried() {
        let provider = Arc::new(FakeProvider {
            refuse: Some(|| CameraError::FormatNegotiationFailed("no YUYV".into())),
            ..Default::default()
        });
        let (mut session, _) = session(provider.clone(), idle_inference());

        assert!(session.start().await.is_err());
        assert!(session.start().await.is_err());
        assert_eq!(provider.opened.load(Ordering::SeqCst), 2);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_active_session_publishes_detection() {
        let provider = Arc::new(FakeProvider::default());
        let inference =
            ScriptedInference::new(vec![face(&[(Emotion::Happy, 0.9)])], Duration::ZERO);
        let (mut session, board) = session(provider, inference);
        let mut results = board.subscribe();

        session.start().await.unwrap();
        timeout(Duration::from_secs(2), results.wait_for(|r| r.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(board.current().unwrap().dominant_emotion, Emotion::Happy);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_result_in_flight_at_stop_is_discarded() {
        let provider = Arc::new(FakeProvider::default());
        let inference = ScriptedInference::new(
            vec![face(&[(Emotion::Happy, 0.9)])],
            Duration::from_millis(300),
        );
        let (mut session, board) = session(provider, inference.clone());

        session.start().await.unwrap();
        sleep(Duration::from_millis(80)).await;
        assert!(inference.calls.load(Ordering::SeqCst) >= 1);
        session.stop().await;

        sleep(Duration::from_millis(400)).await;
        assert_eq!(board.current(), None);
    }

    #[tokio::test]
    async fn test_dropping_active_session_releases_camera() {
        let provider = Arc::new(FakeProvider::default());
        let (mut session, _) = session(provider.clone(), idle_inference());
        session.start().await.unwrap();
        drop(session);

        // Drop only signals release; the detached capture thread closes the device.
        timeout(Duration::from_secs(2), async {
            while provider.released.load(Ordering::SeqCst) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_capture_death_clears_detection_and_idles() {
        let provider = Arc::new(FakeProvider {
            fail_after: Some(1),
            ..Default::default()
        });
        let inference =
            ScriptedInference::new(vec![face(&[(Emotion::Happy, 0.9)])], Duration::ZERO);
        let (mut session, board) = session(provider.clone(), inference);
        let mut results = board.subscribe();
        let mut states = session.subscribe_state();

        session.start().await.unwrap();
        timeout(Duration::from_secs(2), results.wait_for(|r| r.is_some()))
            .await
            .unwrap()
            .unwrap();

        timeout(Duration::from_secs(2), states.wait_for(|s| *s == SessionState::Idle))
            .await
            .unwrap()
            .unwrap();
        timeout(Duration::from_secs(2), results.wait_for(|r| r.is_none()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(board.notice().as_deref(), Some(CAPTURE_LOST));
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);

        // The dead session is replaced rather than treated as still active.
        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(provider.opened.load(Ordering::SeqCst), 2);
        session.stop().await;
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(provider.released.load(Ordering::SeqCst), 2);
    }
}
