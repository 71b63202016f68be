use crate::common::error::{FaceGateError, Result};
use crate::common::Config;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, CowArray};
use ort::{Environment, GraphOptimizationLevel, Session, SessionBuilder, Value};
use std::sync::Arc;

/// A detected face region in frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRect {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Finds face regions in a frame. Errors are per-frame and non-fatal:
/// the capture loop logs them and moves on.
pub trait FaceLocator: Send + Sync {
    fn detect(&self, frame: &DynamicImage) -> Result<Vec<FaceRect>>;
}

/// YOLOv8-face style single-class ONNX detector.
pub struct OnnxFaceLocator {
    session: Session,
    _environment: Arc<Environment>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
}

impl OnnxFaceLocator {
    pub fn new(config: &Config) -> Result<Self> {
        let model_path = &config.locator.model_path;
        if !model_path.exists() {
            return Err(FaceGateError::Configuration(format!(
                "Face detection model not found at: {:?}",
                model_path
            )));
        }

        let environment = Arc::new(
            Environment::builder()
                .with_name("face_locator")
                .build()
                .map_err(|e| FaceGateError::Configuration(format!("Failed to create ORT environment: {}", e)))?,
        );

        let session = SessionBuilder::new(&environment)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_model_from_file(model_path)?;

        Ok(Self {
            session,
            _environment: environment,
            input_width: config.locator.input_width,
            input_height: config.locator.input_height,
            confidence_threshold: config.locator.confidence_threshold,
        })
    }

    fn image_to_array(&self, img: &DynamicImage) -> Array4<f32> {
        let gray = img.to_luma8();
        let width = gray.width() as usize;
        let height = gray.height() as usize;
        let raw = gray.as_raw();
        let mut array = Array4::<f32>::zeros((1, 3, height, width));

        // The model takes 3 channels; NIR and MJPG frames are both fed
        // as grayscale replicated across channels.
        let norm = 1.0 / 255.0;
        for y in 0..height {
            let row = y * width;
            for x in 0..width {
                let value = raw[row + x] as f32 * norm;
                array[[0, 0, y, x]] = value;
                array[[0, 1, y, x]] = value;
                array[[0, 2, y, x]] = value;
            }
        }
        array
    }

    fn parse_detections(&self, outputs: &[Value]) -> Result<Vec<FaceRect>> {
        let mut faces = Vec::new();
        if outputs.is_empty() {
            return Ok(faces);
        }

        let output = outputs[0].try_extract::<f32>()?.view().to_owned();
        let data = output
            .as_slice()
            .ok_or_else(|| FaceGateError::Detection("Non-contiguous model output".into()))?;
        let shape = output.shape().to_vec();

        // YOLOv8 emits [1, 8400, 5] or the transposed [1, 5, 8400];
        // each prediction is [x_center, y_center, width, height, score].
        let (predictions, fields, transposed) = if shape.len() >= 3 {
            if shape[2] > shape[1] && shape[1] <= 10 {
                (shape[2], shape[1], true)
            } else {
                (shape[1], shape[2], false)
            }
        } else if shape.len() == 2 {
            (shape[0], shape[1], false)
        } else {
            tracing::warn!("Unexpected detector output shape: {:?}", shape);
            return Ok(faces);
        };

        for i in 0..predictions {
            let (xc_raw, yc_raw, w_raw, h_raw, confidence) = if transposed {
                (
                    data[i],
                    data[predictions + i],
                    data[2 * predictions + i],
                    data[3 * predictions + i],
                    if fields > 4 { data[4 * predictions + i] } else { 0.0 },
                )
            } else {
                let base = i * fields;
                (
                    data[base],
                    data[base + 1],
                    data[base + 2],
                    data[base + 3],
                    if fields > 4 { data[base + 4] } else { 0.0 },
                )
            };

            if confidence < 0.001 {
                continue;
            }

            // Some exports emit normalized coordinates.
            let scale = if xc_raw > 1.0 || yc_raw > 1.0 || w_raw > 1.0 || h_raw > 1.0 {
                1.0
            } else {
                self.input_width as f32
            };

            let xc = xc_raw * scale;
            let yc = yc_raw * scale;
            let w = w_raw * scale;
            let h = h_raw * scale;

            let x = (xc - w / 2.0).max(0.0);
            let y = (yc - h / 2.0).max(0.0);
            let right = (xc + w / 2.0).min(self.input_width as f32);
            let bottom = (yc + h / 2.0).min(self.input_height as f32);

            if right - x > 10.0 && bottom - y > 10.0 {
                faces.push(FaceRect {
                    x,
                    y,
                    width: right - x,
                    height: bottom - y,
                    confidence,
                });
            }
        }

        let mut faces = apply_nms(faces, 0.45);
        faces.retain(|f| f.confidence >= self.confidence_threshold);
        faces.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        faces.truncate(5);
        Ok(faces)
    }
}

impl FaceLocator for OnnxFaceLocator {
    fn detect(&self, frame: &DynamicImage) -> Result<Vec<FaceRect>> {
        let orig_width = frame.width() as f32;
        let orig_height = frame.height() as f32;

        let array = if frame.width() == self.input_width && frame.height() == self.input_height {
            self.image_to_array(frame)
        } else {
            let resized = frame.resize_exact(self.input_width, self.input_height, FilterType::Nearest);
            self.image_to_array(&resized)
        };

        let cow_array = CowArray::from(array.into_dyn());
        let input_tensor = Value::from_array(self.session.allocator(), &cow_array)?;
        let outputs = self.session.run(vec![input_tensor])?;

        let mut faces = self.parse_detections(&outputs)?;

        let scale_x = orig_width / self.input_width as f32;
        let scale_y = orig_height / self.input_height as f32;
        for face in &mut faces {
            face.x *= scale_x;
            face.width *= scale_x;
            face.y *= scale_y;
            face.height *= scale_y;
        }

        Ok(faces)
    }
}

fn apply_nms(mut boxes: Vec<FaceRect>, iou_threshold: f32) -> Vec<FaceRect> {
    if boxes.is_empty() {
        return boxes;
    }

    boxes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let mut keep = Vec::new();
    let mut indices: Vec<usize> = (0..boxes.len()).collect();

    while !indices.is_empty() {
        let i = indices[0];
        keep.push(boxes[i].clone());

        indices = indices[1..]
            .iter()
            .filter(|&&j| iou(&boxes[i], &boxes[j]) < iou_threshold)
            .copied()
            .collect();
    }

    keep
}

fn iou(a: &FaceRect, b: &FaceRect) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
