//! Body of the `offside-worker` process used by the isolated strategy.
//!
//! The worker is started with one image path, runs detection and
//! interpretation, and writes exactly one [`WorkerReply`] as a JSON line on
//! stdout before exiting.

use crate::{
    config::Config,
    frame::{ClassIds, FramePoints},
    strategy::detect_frame,
};
use offside_detector::{Detector, OrtDetector};
use serde::{Deserialize, Serialize};
use std::{io::Write, path::Path};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerReply {
    Frame(FramePoints),
    DetectionFailed(String),
}

pub async fn answer(detector: &dyn Detector, classes: &ClassIds, image_path: &Path) -> WorkerReply {
    match detect_frame(detector, classes, image_path).await {
        Ok(points) => WorkerReply::Frame(points),
        Err(e) => {
            tracing::error!("Detection failed for {:?}: {}", image_path, e);
            WorkerReply::DetectionFailed(e.to_string())
        }
    }
}

pub fn write_reply<W: Write>(writer: &mut W, reply: &WorkerReply) -> std::io::Result<()> {
    serde_json::to_writer(&mut *writer, reply)?;
    writeln!(writer)?;
    writer.flush()
}

/// Loads a single-session detector and answers for `image_path` on stdout.
pub async fn run(config: Config, image_path: &Path) -> std::io::Result<()> {
    let mut model_config = config.model.clone();
    model_config.num_instances = 1;

    let reply = match OrtDetector::new(&model_config) {
        Ok(detector) => answer(&detector, &config.classes, image_path).await,
        Err(e) => {
            tracing::error!("Failed to load detector: {}", e);
            WorkerReply::DetectionFailed(e.to_string())
        }
    };

    write_reply(&mut std::io::stdout().lock(), &reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testing::MockDetector;
    use std::time::Duration;

    #[tokio::test]
    async fn test_answer_reports_frame_points() {
        let detector = MockDetector {
            delay: Duration::ZERO,
        };

        let reply = answer(&detector, &ClassIds::default(), Path::new("onside.png")).await;

        match reply {
            WorkerReply::Frame(points) => {
                assert_eq!(points.players.len(), 2);
                assert!(points.ball.is_some());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answer_reports_detection_failure() {
        let detector = MockDetector {
            delay: Duration::ZERO,
        };

        let reply = answer(&detector, &ClassIds::default(), Path::new("broken.png")).await;

        assert!(matches!(reply, WorkerReply::DetectionFailed(_)));
    }

    #[test]
    fn test_reply_is_one_json_line() {
        let mut buffer = Vec::new();
        let reply = WorkerReply::DetectionFailed("corrupt image".to_string());

        write_reply(&mut buffer, &reply).unwrap();

        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "{\"detection_failed\":\"corrupt image\"}\n"
        );
    }

    #[test]
    fn test_frame_reply_wire_format() {
        let reply: WorkerReply =
            serde_json::from_str(r#"{"frame":{"players":[{"x":1,"y":2}],"ball":null}}"#).unwrap();

        assert_eq!(
            reply,
            WorkerReply::Frame(FramePoints {
                players: vec![crate::frame::PlayerPoint { x: 1, y: 2 }],
                ball: None,
            })
        );
    }
}
