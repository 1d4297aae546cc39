mod config;
mod detection;
mod detector;
mod ort_detector;

pub use config::{ModelConfig, Validatable};
pub use detection::{non_max_suppression, BoundingBox, Detection};
pub use detector::{Detector, DetectorError};
pub use ort_detector::OrtDetector;
