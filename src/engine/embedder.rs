//! Face Embedder
//!
//! Runs the embedding model on an aligned 112x112 face and returns an
//! L2-normalised 128-d descriptor.

use std::sync::Arc;

use anyhow::Context;
use image::DynamicImage;
use openvino::{ElementType, Shape, Tensor};

use crate::error::ExtractionError;
use crate::pipeline::types::Embedding;
use crate::utils::math::l2_normalize;

use super::pool::{ModelPool, ModelType};
use super::preprocess::{image_to_nchw, EMBEDDER_INPUT_SIZE};

pub struct FaceEmbedder {
    pool: Arc<ModelPool>,
}

impl FaceEmbedder {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    /// Extract embedding from an aligned face image
    pub fn embed(&self, aligned_face: &DynamicImage) -> Result<Embedding, ExtractionError> {
        let (target_w, target_h) = EMBEDDER_INPUT_SIZE;
        let resized = if aligned_face.width() == target_w && aligned_face.height() == target_h {
            aligned_face.clone()
        } else {
            aligned_face.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
        };
        let input_tensor = image_to_nchw(&resized);

        let model = self.pool.get_model(ModelType::Embedder)?;
        let mut vector = run_inference(&model, &input_tensor, target_w, target_h)?;

        l2_normalize(&mut vector);
        Embedding::new(vector)
    }
}

fn run_inference(
    model: &super::pool::SafeCompiledModel,
    input_tensor: &ndarray::Array4<f32>,
    width: u32,
    height: u32,
) -> anyhow::Result<Vec<f32>> {
    let mut request = model.create_infer_request()?;

    let input_shape = Shape::new(&[1, 3, height as i64, width as i64])?;
    let mut input = Tensor::new(ElementType::F32, &input_shape)?;

    let input_data = input_tensor
        .as_slice()
        .context("embedder input tensor is not contiguous")?;
    unsafe {
        let tensor_data = input.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
        std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
    }

    request.set_input_tensor(&input)?;
    request.infer()?;

    let output = request.get_output_tensor()?;
    let output_len = output.get_shape()?.get_dimensions().iter().product::<i64>() as usize;
    let output_data: Vec<f32> = unsafe {
        let ptr = output.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, output_len).to_vec()
    };

    Ok(output_data)
}
