use super::{detect_frame, Evaluation, ExecutionStrategy, StrategyError, StrategyKind};
use crate::{frame::ClassIds, rule::evaluate};
use async_trait::async_trait;
use offside_detector::Detector;
use std::{path::Path, sync::Arc};
use tracing::instrument;

/// Runs the detector in the caller's own task.
pub struct DirectStrategy {
    detector: Arc<dyn Detector>,
    classes: ClassIds,
}

impl DirectStrategy {
    pub fn new(detector: Arc<dyn Detector>, classes: ClassIds) -> Self {
        Self { detector, classes }
    }
}

#[async_trait]
impl ExecutionStrategy for DirectStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    #[instrument(skip(self))]
    async fn execute(&self, image_path: &Path) -> Result<Evaluation, StrategyError> {
        let points = detect_frame(self.detector.as_ref(), &self.classes, image_path).await?;
        let verdict = evaluate(&points.players, points.ball);

        Ok(Evaluation { points, verdict })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{rule::Verdict, strategy::testing::MockDetector};
    use std::time::Duration;

    fn strategy() -> DirectStrategy {
        let detector = MockDetector {
            delay: Duration::ZERO,
        };
        DirectStrategy::new(Arc::new(detector), ClassIds::default())
    }

    #[tokio::test]
    async fn test_direct_returns_points_and_verdict() {
        let outcome = strategy().run(Path::new("offside.png")).await.unwrap();

        assert_eq!(outcome.evaluation.verdict, Verdict::Offside);
        assert_eq!(outcome.evaluation.points.players.len(), 3);
        assert!(outcome.evaluation.points.ball.is_some());
        assert!(outcome.execution_time >= 0.);
    }

    #[tokio::test]
    async fn test_direct_surfaces_detection_failure() {
        let result = strategy().execute(Path::new("broken.png")).await;

        assert!(matches!(result, Err(StrategyError::DetectionFailure(_))));
    }
}
