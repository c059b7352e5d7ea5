//! Service configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::DetectOptions;
use crate::pipeline::matcher::DEFAULT_MATCH_THRESHOLD;
use crate::source::SourceDescriptor;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub recognition: RecognitionConfig,
    pub pipeline: PipelineConfig,
    pub render: RenderConfig,
    pub gallery: GalleryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub rest_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub detector: PathBuf,
    pub embedder: PathBuf,
}

/// Matching and detection constants. Both are tied to the embedding model in use.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub match_threshold: f32,
    pub detection_confidence: f32,
    pub enrollment_confidence: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64,
    pub refresh_hz: u32,
    pub auto_start: bool,
    pub source: Option<SourceDescriptor>,
    pub stream_poll_ms: u64,
    pub open_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub match_color: [u8; 3],
    pub no_match_color: [u8; 3],
    pub fill_alpha: f32,
    pub outline_width: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GalleryConfig {
    pub path: Option<PathBuf>,
    pub thumbnail_size: u32,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }
}

impl RecognitionConfig {
    pub fn detect_options(&self) -> DetectOptions {
        DetectOptions {
            min_score: self.detection_confidence,
            input_size: self.input_size,
        }
    }

    pub fn enrollment_options(&self) -> DetectOptions {
        DetectOptions {
            min_score: self.enrollment_confidence,
            input_size: self.input_size,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Period between display refresh ticks
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.refresh_hz.max(1)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            models: ModelsConfig::default(),
            recognition: RecognitionConfig::default(),
            pipeline: PipelineConfig::default(),
            render: RenderConfig::default(),
            gallery: GalleryConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { rest_port: 3000 }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("models/scrfd_2.5g_kps.onnx"),
            embedder: PathBuf::from("models/mobilefacenet_128.onnx"),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            detection_confidence: 0.5,
            enrollment_confidence: 0.5,
            input_size: 640,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            refresh_hz: 30,
            auto_start: false,
            source: None,
            stream_poll_ms: 66,
            open_timeout_ms: 5000,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            match_color: [255, 0, 0],
            no_match_color: [0, 255, 0],
            fill_alpha: 0.55,
            outline_width: 3,
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("data/gallery.json")),
            thumbnail_size: 150,
        }
    }
}
