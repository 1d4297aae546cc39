use super::{detect_frame, Evaluation, ExecutionStrategy, StrategyError, StrategyKind};
use crate::{
    config::QueueConfig,
    frame::{ClassIds, FramePoints},
    rule::{evaluate, Verdict},
};
use async_trait::async_trait;
use offside_detector::Detector;
use std::{path::Path, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    time::timeout,
};
use tracing::instrument;

enum QueueItem {
    Frame(FramePoints),
    /// End of stream; the consumer reports and exits.
    Done,
}

/// Producer/consumer pipeline. Producers share a fixed pool of detection
/// permits; each request gets its own queue, consumer task and result channel.
pub struct QueuedStrategy {
    detector: Arc<dyn Detector>,
    classes: ClassIds,
    permits: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
    consumer_timeout: Duration,
}

impl QueuedStrategy {
    pub fn new(detector: Arc<dyn Detector>, classes: ClassIds, queue_config: &QueueConfig) -> Self {
        Self {
            detector,
            classes,
            permits: Arc::new(Semaphore::new(queue_config.permits)),
            capacity: queue_config.capacity,
            acquire_timeout: queue_config.get_acquire_timeout(),
            consumer_timeout: queue_config.get_consumer_timeout(),
        }
    }

    /// Holds a permit while detecting, then enqueues the frame followed by the
    /// end-of-stream marker.
    async fn produce(
        &self,
        image_path: &Path,
        queue: &mpsc::Sender<QueueItem>,
    ) -> Result<FramePoints, StrategyError> {
        let _permit = match timeout(self.acquire_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(StrategyError::WorkerFailure(
                    "detection permits closed".to_string(),
                ))
            }
            Err(_) => return Err(StrategyError::WorkerTimeout(self.acquire_timeout)),
        };

        let points = detect_frame(self.detector.as_ref(), &self.classes, image_path).await?;

        for item in [QueueItem::Frame(points.clone()), QueueItem::Done] {
            queue.send(item).await.map_err(|_| {
                StrategyError::WorkerFailure("consumer exited before the frame was queued".to_string())
            })?;
        }

        Ok(points)
    }
}

/// Evaluates every frame popped from the queue and reports the last verdict
/// once the end-of-stream marker arrives. Sends nothing if the queue closes
/// before any frame.
async fn consume(mut queue: mpsc::Receiver<QueueItem>, result: oneshot::Sender<Verdict>) {
    let mut verdict = None;

    while let Some(item) = queue.recv().await {
        match item {
            QueueItem::Frame(points) => verdict = Some(evaluate(&points.players, points.ball)),
            QueueItem::Done => break,
        }
    }

    if let Some(verdict) = verdict {
        let _ = result.send(verdict);
    }
}

#[async_trait]
impl ExecutionStrategy for QueuedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Queued
    }

    #[instrument(skip(self))]
    async fn execute(&self, image_path: &Path) -> Result<Evaluation, StrategyError> {
        let (queue_tx, queue_rx) = mpsc::channel(self.capacity);
        let (result_tx, result_rx) = oneshot::channel();
        let consumer = tokio::spawn(consume(queue_rx, result_tx));

        let points = match self.produce(image_path, &queue_tx).await {
            Ok(points) => points,
            Err(e) => {
                consumer.abort();
                return Err(e);
            }
        };
        drop(queue_tx);

        let verdict = match timeout(self.consumer_timeout, result_rx).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(_)) => {
                return Err(StrategyError::WorkerFailure(
                    "consumer exited without a verdict".to_string(),
                ))
            }
            Err(_) => {
                consumer.abort();
                return Err(StrategyError::WorkerTimeout(self.consumer_timeout));
            }
        };

        Ok(Evaluation { points, verdict })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::MockDetector;
    use async_trait::async_trait;
    use offside_detector::{Detection, DetectorError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn strategy(delay: Duration, permits: usize) -> QueuedStrategy {
        let queue_config = QueueConfig {
            permits,
            ..QueueConfig::default()
        };
        QueuedStrategy::new(
            Arc::new(MockDetector { delay }),
            ClassIds::default(),
            &queue_config,
        )
    }

    #[tokio::test]
    async fn test_queued_returns_points_and_verdict() {
        let evaluation = strategy(Duration::ZERO, 1)
            .execute(Path::new("offside.png"))
            .await
            .unwrap();

        assert_eq!(evaluation.verdict, Verdict::Offside);
        assert_eq!(evaluation.points.players.len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_requests_keep_their_own_verdicts() {
        let strategy = Arc::new(strategy(Duration::from_millis(20), 1));

        let mut handles = Vec::new();
        for i in 0..8 {
            let strategy = strategy.clone();
            let name = if i % 2 == 0 { "offside.png" } else { "onside.png" };
            handles.push(tokio::spawn(async move {
                (name, strategy.execute(Path::new(name)).await)
            }));
        }

        for handle in handles {
            let (name, result) = handle.await.unwrap();
            let expected = if name == "offside.png" {
                Verdict::Offside
            } else {
                Verdict::NotOffside
            };
            assert_eq!(result.unwrap().verdict, expected, "{}", name);
        }
    }

    struct CountingDetector {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Detector for CountingDetector {
        async fn detect(&self, _image_path: &Path) -> Result<Vec<Detection>, DetectorError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    async fn peak_concurrency(permits: usize) -> usize {
        let detector = Arc::new(CountingDetector {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let queue_config = QueueConfig {
            permits,
            ..QueueConfig::default()
        };
        let strategy = Arc::new(QueuedStrategy::new(
            detector.clone(),
            ClassIds::default(),
            &queue_config,
        ));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let strategy = strategy.clone();
                tokio::spawn(async move { strategy.execute(Path::new("empty.png")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        detector.peak.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_permit_serializes_detection() {
        assert_eq!(peak_concurrency(1).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_size_bounds_detection() {
        assert!(peak_concurrency(2).await <= 2);
    }

    #[tokio::test]
    async fn test_detection_failure_releases_permit() {
        let strategy = strategy(Duration::ZERO, 1);

        let failed = strategy.execute(Path::new("broken.png")).await;
        assert!(matches!(failed, Err(StrategyError::DetectionFailure(_))));

        let evaluation = strategy.execute(Path::new("onside.png")).await.unwrap();
        assert_eq!(evaluation.verdict, Verdict::NotOffside);
    }

    #[tokio::test]
    async fn test_permit_wait_is_bounded() {
        let queue_config = QueueConfig {
            acquire_timeout_ms: 20,
            ..QueueConfig::default()
        };
        let strategy = QueuedStrategy::new(
            Arc::new(MockDetector {
                delay: Duration::ZERO,
            }),
            ClassIds::default(),
            &queue_config,
        );
        let _held = strategy.permits.acquire().await.unwrap();

        let result = strategy.execute(Path::new("onside.png")).await;

        assert!(matches!(result, Err(StrategyError::WorkerTimeout(_))));
    }

    #[tokio::test]
    async fn test_consumer_without_frame_sends_nothing() {
        let (queue_tx, queue_rx) = mpsc::channel(2);
        let (result_tx, result_rx) = oneshot::channel();

        queue_tx.send(QueueItem::Done).await.unwrap();
        consume(queue_rx, result_tx).await;

        assert!(result_rx.await.is_err());
    }
}
