//! Model Pool
//!
//! Owns the OpenVINO core and the two compiled models the extractor needs.
//! Models are loaded explicitly and up front: a session must not start
//! against a half-ready backend, so there is no lazy load on first use.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use openvino::{CompiledModel, Core};
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::config::{InferenceConfig, ModelsConfig};
use crate::error::{ExtractionError, ModelLoadError};

/// Wrapper for OpenVINO Core that implements Send + Sync
pub struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

impl Deref for SafeCore {
    type Target = Core;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for SafeCore {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Wrapper for OpenVINO CompiledModel that implements Send + Sync
#[derive(Clone)]
pub struct SafeCompiledModel(pub Arc<CompiledModel>);
unsafe impl Send for SafeCompiledModel {}
unsafe impl Sync for SafeCompiledModel {}

impl SafeCompiledModel {
    /// Create an inference request
    /// OpenVINO CompiledModel methods are thread-safe in C++, but Rust bindings
    /// require &mut self. We bypass this restriction safely.
    pub fn create_infer_request(&self) -> anyhow::Result<openvino::InferRequest> {
        unsafe {
            let ptr = Arc::as_ptr(&self.0) as *mut CompiledModel;
            (*ptr).create_infer_request().map_err(|e| e.into())
        }
    }
}

/// Model types the extractor loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Detector,
    Embedder,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Detector => "detector",
            ModelType::Embedder => "embedder",
        }
    }
}

/// Compiled detector and embedder models
pub struct ModelPool {
    core: Mutex<Option<SafeCore>>,
    device: String,
    detector_path: PathBuf,
    embedder_path: PathBuf,
    detector: RwLock<Option<SafeCompiledModel>>,
    embedder: RwLock<Option<SafeCompiledModel>>,
}

impl ModelPool {
    /// Create an empty pool; nothing touches OpenVINO until `load_all`
    pub fn new(inference: &InferenceConfig, models: &ModelsConfig) -> Self {
        Self {
            core: Mutex::new(None),
            device: inference.device.clone(),
            detector_path: models.detector.clone(),
            embedder_path: models.embedder.clone(),
            detector: RwLock::new(None),
            embedder: RwLock::new(None),
        }
    }

    fn slot(&self, model_type: ModelType) -> (&RwLock<Option<SafeCompiledModel>>, &PathBuf) {
        match model_type {
            ModelType::Detector => (&self.detector, &self.detector_path),
            ModelType::Embedder => (&self.embedder, &self.embedder_path),
        }
    }

    /// Load every model. Already-loaded models are kept.
    pub fn load_all(&self) -> Result<(), ModelLoadError> {
        for model_type in [ModelType::Detector, ModelType::Embedder] {
            let (cache, path) = self.slot(model_type);
            if cache.read().is_some() {
                continue;
            }
            if !path.is_file() {
                return Err(ModelLoadError::NotFound(path.display().to_string()));
            }

            let compiled = self
                .compile(model_type, path)
                .map_err(|source| ModelLoadError::Backend {
                    model: model_type.as_str(),
                    source,
                })?;
            *cache.write() = Some(compiled);
        }
        Ok(())
    }

    fn compile(&self, model_type: ModelType, path: &PathBuf) -> anyhow::Result<SafeCompiledModel> {
        info!("Loading model: {} from {}", model_type.as_str(), path.display());
        let start = Instant::now();

        let path_str = path.to_str().context("model path is not valid UTF-8")?;

        // Core methods like read_model require &mut self in the Rust bindings
        let mut guard = self.core.lock();
        if guard.is_none() {
            let core = Core::new().context("failed to initialise OpenVINO runtime")?;
            *guard = Some(SafeCore(core));
        }
        let core = guard.as_mut().context("OpenVINO core unavailable")?;

        let model = core.read_model_from_file(path_str, "")?;
        let compiled = core.compile_model(&model, self.device.as_str().into())?;

        info!("Model {} loaded in {:?}", model_type.as_str(), start.elapsed());
        Ok(SafeCompiledModel(Arc::new(compiled)))
    }

    /// Get a loaded model
    pub fn get_model(&self, model_type: ModelType) -> Result<SafeCompiledModel, ExtractionError> {
        let (cache, _) = self.slot(model_type);
        cache.read().clone().ok_or(ExtractionError::ModelsNotLoaded)
    }

    /// Check if a model is loaded
    pub fn is_loaded(&self, model_type: ModelType) -> bool {
        self.slot(model_type).0.read().is_some()
    }

    pub fn all_loaded(&self) -> bool {
        self.is_loaded(ModelType::Detector) && self.is_loaded(ModelType::Embedder)
    }

    /// Get status of all models
    pub fn get_status(&self) -> Vec<(ModelType, bool)> {
        vec![
            (ModelType::Detector, self.is_loaded(ModelType::Detector)),
            (ModelType::Embedder, self.is_loaded(ModelType::Embedder)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn pool_with(detector: &str, embedder: &str) -> ModelPool {
        let mut config = Config::default();
        config.models.detector = PathBuf::from(detector);
        config.models.embedder = PathBuf::from(embedder);
        ModelPool::new(&config.inference, &config.models)
    }

    #[test]
    fn test_model_type_as_str() {
        assert_eq!(ModelType::Detector.as_str(), "detector");
        assert_eq!(ModelType::Embedder.as_str(), "embedder");
    }

    #[test]
    fn test_new_pool_has_nothing_loaded() {
        let pool = pool_with("a.onnx", "b.onnx");
        assert!(!pool.all_loaded());
        assert_eq!(
            pool.get_status(),
            vec![(ModelType::Detector, false), (ModelType::Embedder, false)]
        );
        assert!(matches!(
            pool.get_model(ModelType::Embedder),
            Err(ExtractionError::ModelsNotLoaded)
        ));
    }

    #[test]
    fn test_missing_model_file_fails_before_runtime_init() {
        let pool = pool_with("/nonexistent/scrfd.onnx", "/nonexistent/embed.onnx");
        match pool.load_all() {
            Err(ModelLoadError::NotFound(path)) => assert!(path.contains("scrfd")),
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert!(pool.core.lock().is_none());
    }
}
