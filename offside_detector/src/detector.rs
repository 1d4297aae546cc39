use crate::detection::Detection;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Failed to read image {path:?}: {source}")]
    ImageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to decode image: {0}")]
    ImageDecode(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

/// Object detector used by every execution strategy. Implementations are
/// built once and shared; `detect` must not mutate shared model state in a
/// way visible to concurrent callers.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(&self, image_path: &Path) -> Result<Vec<Detection>, DetectorError>;
}
