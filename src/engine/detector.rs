//! SCRFD Face Detector
//!
//! Face detection using the InsightFace SCRFD family.
//! Outputs bounding boxes and 5-point landmarks in source-frame pixels.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use openvino::{ElementType, InferRequest, Shape, Tensor};

use super::pool::{ModelPool, ModelType};
use super::preprocess::{preprocess_for_detection, ResizeInfo};

/// Raw detector output for one face
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: [(f32, f32); 5],
}

/// SCRFD Face Detector
pub struct FaceDetector {
    pool: Arc<ModelPool>,
    nms_threshold: f32,
}

impl FaceDetector {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self {
            pool,
            nms_threshold: 0.4,
        }
    }

    /// Detect faces in a decoded frame
    pub fn detect(&self, image: &DynamicImage, min_score: f32, input_size: u32) -> Result<Vec<FaceBox>> {
        anyhow::ensure!(
            input_size >= 32 && input_size % 32 == 0,
            "detector input size must be a positive multiple of 32, got {}",
            input_size
        );

        let resize_info = ResizeInfo::new(image.dimensions(), input_size);
        let input_tensor = preprocess_for_detection(image, input_size);

        let model = self.pool.get_model(ModelType::Detector)?;
        let mut request = model.create_infer_request()?;

        let input_shape = Shape::new(&[1, 3, input_size as i64, input_size as i64])?;
        let mut input = Tensor::new(ElementType::F32, &input_shape)?;

        let input_data = input_tensor
            .as_slice()
            .context("detector input tensor is not contiguous")?;
        unsafe {
            let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&input)?;
        request.infer()?;

        let detections = self.parse_outputs(&request, &resize_info, min_score, input_size)?;
        let kept = nms(detections, self.nms_threshold);

        tracing::debug!("Detected {} faces after NMS", kept.len());
        Ok(kept)
    }

    /// Decode SCRFD heads.
    ///
    /// The model has one score, one bbox and (optionally) one keypoint head
    /// per stride, laid out as `[scores.., bboxes.., kps..]`.
    fn parse_outputs(
        &self,
        request: &InferRequest,
        resize_info: &ResizeInfo,
        min_score: f32,
        input_size: u32,
    ) -> Result<Vec<FaceBox>> {
        let mut all_boxes = Vec::new();

        let mut output_count = 0;
        while output_count < 20 && request.get_output_tensor_by_index(output_count).is_ok() {
            output_count += 1;
        }

        let (fmc, use_kps, num_anchors) = match output_count {
            6 => (3, false, 2),
            9 => (3, true, 2),
            10 => (5, false, 1),
            15 => (5, true, 1),
            _ => {
                tracing::warn!("Unknown SCRFD output count: {}, trying default", output_count);
                (3, true, 2)
            }
        };

        let strides: &[i32] = if fmc == 3 { &[8, 16, 32] } else { &[8, 16, 32, 64, 128] };
        let size = input_size as i32;

        for (idx, &stride) in strides.iter().enumerate() {
            let scores = read_tensor_f32(&request.get_output_tensor_by_index(idx)?)?;
            let bboxes = read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc)?)?;
            let kps = if use_kps {
                Some(read_tensor_f32(&request.get_output_tensor_by_index(idx + fmc * 2)?)?)
            } else {
                None
            };

            let feat = size / stride;
            let stride_f = stride as f32;

            for i in 0..(feat * feat * num_anchors) as usize {
                let Some(&score) = scores.get(i) else {
                    break;
                };
                if score < min_score {
                    continue;
                }

                let cell = i / num_anchors as usize;
                let cx = (cell as i32 % feat) as f32 * stride_f;
                let cy = (cell as i32 / feat) as f32 * stride_f;

                let Some(dist) = bboxes.get(i * 4..i * 4 + 4) else {
                    continue;
                };
                let (x1, y1) = resize_info.to_original(cx - dist[0] * stride_f, cy - dist[1] * stride_f);
                let (x2, y2) = resize_info.to_original(cx + dist[2] * stride_f, cy + dist[3] * stride_f);

                let mut landmarks = [(0.0f32, 0.0f32); 5];
                if let Some(points) = kps.as_ref().and_then(|k| k.get(i * 10..i * 10 + 10)) {
                    for (j, lm) in landmarks.iter_mut().enumerate() {
                        *lm = resize_info.to_original(
                            cx + points[j * 2] * stride_f,
                            cy + points[j * 2 + 1] * stride_f,
                        );
                    }
                }

                let max_w = resize_info.original_width as f32;
                let max_h = resize_info.original_height as f32;
                all_boxes.push(FaceBox {
                    x1: x1.clamp(0.0, max_w),
                    y1: y1.clamp(0.0, max_h),
                    x2: x2.clamp(0.0, max_w),
                    y2: y2.clamp(0.0, max_h),
                    confidence: score,
                    landmarks,
                });
            }
        }

        tracing::trace!("{} candidate faces before NMS", all_boxes.len());
        Ok(all_boxes)
    }
}

/// Read tensor data as f32 vector
fn read_tensor_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    let shape = tensor.get_shape()?;
    let total_elements: i64 = shape.get_dimensions().iter().product();

    let data: Vec<f32> = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, total_elements as usize).to_vec()
    };

    Ok(data)
}

/// Non-maximum suppression, highest confidence first
pub fn nms(mut boxes: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<FaceBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        if keep.iter().all(|k| compute_iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection over union of two boxes
pub fn compute_iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> FaceBox {
        FaceBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            landmarks: [(0.0, 0.0); 5],
        }
    }

    #[test]
    fn test_iou_calculation() {
        let a = face(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = face(5.0, 5.0, 15.0, 15.0, 0.8);

        // Intersection 25, union 175
        assert!((compute_iou(&a, &b) - 0.143).abs() < 0.01);
        assert_eq!(compute_iou(&a, &face(20.0, 20.0, 30.0, 30.0, 0.5)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let boxes = vec![
            face(0.0, 0.0, 10.0, 10.0, 0.7),
            face(1.0, 1.0, 11.0, 11.0, 0.95),
            face(50.0, 50.0, 60.0, 60.0, 0.6),
        ];
        let kept = nms(boxes, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.95);
        assert_eq!(kept[1].confidence, 0.6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.4).is_empty());
    }
}
