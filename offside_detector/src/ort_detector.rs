use crate::{
    config::{ModelConfig, Validatable},
    detection::{non_max_suppression, BoundingBox, Detection},
    detector::{Detector, DetectorError},
};
use async_trait::async_trait;
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use tracing::instrument;

const OUTPUT_NAME: &str = "output0";

/// Decodes an encoded image and turns it into a normalized NCHW tensor of
/// `input_size`². Returns the tensor with the original width and height.
fn transform_image(
    image_data: &[u8],
    input_size: u32,
) -> Result<(Array<f32, Ix4>, u32, u32), DetectorError> {
    let image_reader = image::ImageReader::new(std::io::Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| DetectorError::ImageDecode(e.to_string()))?;

    let original_img = image_reader
        .decode()
        .map_err(|e| DetectorError::ImageDecode(e.to_string()))?;

    let (img_width, img_height) = original_img.dimensions();
    let img = original_img.resize_exact(input_size, input_size, FilterType::CatmullRom);

    let side = input_size as usize;
    let mut input = Array::zeros((1, 3, side, side));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_width, img_height))
}

/// Reads a YOLOv8 head of shape `[1, 4 + classes, anchors]`. Each anchor keeps
/// its best class when that score reaches `min_probability`; boxes are scaled
/// back to the original image size.
fn decode_output(
    output: ArrayViewD<'_, f32>,
    input_size: u32,
    img_width: u32,
    img_height: u32,
    min_probability: f32,
) -> Result<Vec<Detection>, DetectorError> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| DetectorError::MalformedOutput(format!("unexpected shape {:?}", shape)))?;
    if shape[0] != 1 || shape[1] <= 4 {
        return Err(DetectorError::MalformedOutput(format!(
            "unexpected shape {:?}",
            shape
        )));
    }

    let scale_x = img_width as f32 / input_size as f32;
    let scale_y = img_height as f32 / input_size as f32;
    let mut boxes = Vec::new();

    for anchor in output.index_axis(Axis(0), 0).axis_iter(Axis(1)) {
        let Some((class_id, prob)) = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            continue;
        };

        if prob < min_probability {
            continue;
        }

        let xc = anchor[0] * scale_x;
        let yc = anchor[1] * scale_y;
        let w = anchor[2] * scale_x;
        let h = anchor[3] * scale_y;

        boxes.push(Detection {
            class_id: class_id as u32,
            confidence: prob,
            bbox: BoundingBox {
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            },
        });
    }

    Ok(boxes)
}

/// YOLOv8 ONNX detector. Holds a fixed set of sessions, each behind its own
/// lock, handed out round-robin.
#[derive(Clone)]
pub struct OrtDetector {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    iou_threshold: f32,
    input_size: u32,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        model_config.validate().map_err(DetectorError::ModelLoad)?;

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| DetectorError::ModelLoad(e.to_string()))?;

        tracing::info!(
            model = ?model_config.get_path(),
            "Created {} ONNX sessions",
            num_instances
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
            input_size: model_config.input_size,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs[OUTPUT_NAME]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::MalformedOutput(e.to_string()))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::MalformedOutput(format!("invalid tensor shape: {}", e)))
    }

    /// Full synchronous pipeline for one encoded image.
    pub fn detect_image(&self, image_data: &[u8]) -> Result<Vec<Detection>, DetectorError> {
        let (input, img_width, img_height) = transform_image(image_data, self.input_size)?;
        let outputs = self.run_inference(&input)?;
        let boxes = decode_output(
            outputs.view(),
            self.input_size,
            img_width,
            img_height,
            self.min_probability,
        )?;

        Ok(non_max_suppression(boxes, self.iou_threshold))
    }
}

#[async_trait]
impl Detector for OrtDetector {
    #[instrument(skip(self))]
    async fn detect(&self, image_path: &Path) -> Result<Vec<Detection>, DetectorError> {
        let image_data =
            tokio::fs::read(image_path)
                .await
                .map_err(|source| DetectorError::ImageRead {
                    path: image_path.to_path_buf(),
                    source,
                })?;

        let detector = self.clone();
        let detections = tokio::task::spawn_blocking(move || detector.detect_image(&image_data))
            .await
            .map_err(|e| DetectorError::Inference(format!("inference task failed: {}", e)))??;

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.confidence,
                detection.bbox.x1,
                detection.bbox.y1,
                detection.bbox.x2,
                detection.bbox.y2
            );
        }

        Ok(detections)
    }
}
