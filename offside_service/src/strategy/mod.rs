mod direct;
mod isolated;
mod queued;

pub use direct::DirectStrategy;
pub use isolated::IsolatedStrategy;
pub use queued::QueuedStrategy;

use crate::{
    config::{QueueConfig, WorkerConfig},
    frame::{interpret, ClassIds, FramePoints},
    rule::Verdict,
};
use async_trait::async_trait;
use offside_detector::{Detector, DetectorError};
use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Detection failed: {0}")]
    DetectionFailure(String),
    #[error("Worker failed: {0}")]
    WorkerFailure(String),
    #[error("Worker did not answer within {0:?}")]
    WorkerTimeout(Duration),
}

impl From<DetectorError> for StrategyError {
    fn from(err: DetectorError) -> Self {
        StrategyError::DetectionFailure(err.to_string())
    }
}

impl StrategyError {
    pub fn kind(&self) -> &'static str {
        match self {
            StrategyError::DetectionFailure(_) => "detection_failure",
            StrategyError::WorkerFailure(_) => "worker_failure",
            StrategyError::WorkerTimeout(_) => "worker_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Direct,
    Isolated,
    Queued,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Direct => "direct",
            StrategyKind::Isolated => "isolated",
            StrategyKind::Queued => "queued",
        }
    }
}

/// Points found in the frame and the verdict reached on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub points: FramePoints,
    pub verdict: Verdict,
}

#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub evaluation: Evaluation,
    /// Wall-clock seconds spent in `execute`.
    pub execution_time: f64,
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute(&self, image_path: &Path) -> Result<Evaluation, StrategyError>;

    async fn run(&self, image_path: &Path) -> Result<StrategyOutcome, StrategyError> {
        let start = Instant::now();
        let evaluation = self.execute(image_path).await?;
        Ok(StrategyOutcome {
            evaluation,
            execution_time: start.elapsed().as_secs_f64(),
        })
    }
}

/// Detect then interpret: the part of the pipeline every strategy schedules
/// differently.
pub async fn detect_frame(
    detector: &dyn Detector,
    classes: &ClassIds,
    image_path: &Path,
) -> Result<FramePoints, DetectorError> {
    let detections = detector.detect(image_path).await?;
    Ok(interpret(&detections, classes))
}

/// One instance of each strategy, sharing a single detector.
pub struct Strategies {
    direct: DirectStrategy,
    isolated: IsolatedStrategy,
    queued: QueuedStrategy,
}

impl Strategies {
    pub fn new(
        detector: Arc<dyn Detector>,
        classes: ClassIds,
        worker_config: &WorkerConfig,
        queue_config: &QueueConfig,
    ) -> std::io::Result<Self> {
        Ok(Self {
            direct: DirectStrategy::new(detector.clone(), classes),
            isolated: IsolatedStrategy::new(worker_config)?,
            queued: QueuedStrategy::new(detector, classes, queue_config),
        })
    }

    pub fn get(&self, kind: StrategyKind) -> &dyn ExecutionStrategy {
        match kind {
            StrategyKind::Direct => &self.direct,
            StrategyKind::Isolated => &self.isolated,
            StrategyKind::Queued => &self.queued,
        }
    }
}
