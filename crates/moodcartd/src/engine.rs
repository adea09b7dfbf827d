use crate::aggregator::Inference;
use async_trait::async_trait;
use moodcart_core::{ClassifierError, ExpressionClassifier, ExpressionVector, ModelStatus};
use moodcart_hw::SharedFrame;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("inference task failed: {0}")]
    Task(String),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Classify {
        frame: SharedFrame,
        reply: oneshot::Sender<Result<Option<ExpressionVector>, ClassifierError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    status: ModelStatus,
}

impl EngineHandle {
    /// Raw expression vector of the most confident face in `frame`, or `None`.
    pub async fn classify(
        &self,
        frame: SharedFrame,
    ) -> Result<Option<ExpressionVector>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Classify {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Model loading outcome, fixed for the life of the process.
    pub fn status(&self) -> &ModelStatus {
        &self.status
    }
}

#[async_trait]
impl Inference for EngineHandle {
    async fn classify(&self, frame: SharedFrame) -> Result<Option<ExpressionVector>, EngineError> {
        EngineHandle::classify(self, frame).await
    }
}

/// Move the classifier onto a dedicated OS thread and return a handle to it.
///
/// ONNX inference is blocking, so it never runs on the async runtime. The
/// thread exits once every handle has been dropped.
pub fn spawn_engine(mut classifier: ExpressionClassifier) -> Result<EngineHandle, EngineError> {
    let status = classifier.status().clone();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("moodcart-engine".into())
        .spawn(move || {
            tracing::info!(ready = classifier.is_ready(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Classify { frame, reply } => {
                        let result = classifier.classify(&frame);
                        if let Err(e) = &result {
                            tracing::debug!(
                                sequence = frame.sequence,
                                error = %e,
                                "classify failed"
                            );
                        }
                        // The caller may have been cancelled by a stop.
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, status })
}
