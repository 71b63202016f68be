use crate::common::error::{FaceGateError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub locator: LocatorConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cleaner: CleanerConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub device_index: u32,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_warmup_frames")]
    pub warmup_frames: u32,
    #[serde(default = "default_warmup_delay")]
    pub warmup_delay_ms: u64,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_warmup_frames() -> u32 { 3 }
fn default_warmup_delay() -> u64 { 50 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            warmup_frames: default_warmup_frames(),
            warmup_delay_ms: default_warmup_delay(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocatorConfig {
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_locator_input")]
    pub input_width: u32,
    #[serde(default = "default_locator_input")]
    pub input_height: u32,
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,
}

fn default_model_path() -> PathBuf { PathBuf::from("models/face-detector.onnx") }
fn default_locator_input() -> u32 { 640 }
fn default_confidence() -> f32 { 0.5 }

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            input_width: default_locator_input(),
            input_height: default_locator_input(),
            confidence_threshold: default_confidence(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    /// Persist a capture every Nth processed frame.
    #[serde(default = "default_rate")]
    pub rate_every_n_frames: u32,
    #[serde(default = "default_registration_duration")]
    pub registration_duration_secs: u64,
    #[serde(default = "default_registration_captures")]
    pub registration_max_captures: u32,
    #[serde(default = "default_login_duration")]
    pub login_duration_secs: u64,
    #[serde(default = "default_login_captures")]
    pub login_max_captures: u32,
}

fn default_rate() -> u32 { 1 }
fn default_registration_duration() -> u64 { 10 }
fn default_registration_captures() -> u32 { 60 }
fn default_login_duration() -> u64 { 10 }
fn default_login_captures() -> u32 { 5 }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rate_every_n_frames: default_rate(),
            registration_duration_secs: default_registration_duration(),
            registration_max_captures: default_registration_captures(),
            login_duration_secs: default_login_duration(),
            login_max_captures: default_login_captures(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

fn default_similarity_threshold() -> f32 { 0.3 }

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of the per-identity reference namespace.
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    /// Root of the login probe namespace.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

fn default_images_dir() -> PathBuf { PathBuf::from("images") }
fn default_scratch_dir() -> PathBuf { PathBuf::from("scratch") }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CleanerConfig {
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
}

fn default_cleanup_interval() -> u64 { 30 }

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = std::path::Path::new("configs/facegate.toml");
        if !config_path.exists() {
            tracing::info!("No config file at {}, using built-in defaults", config_path.display());
            return Ok(Self::default());
        }
        Self::load_from_path(config_path)
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| FaceGateError::Configuration(format!("Config parse error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.camera.width == 0 || self.camera.width > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Camera width must be between 1 and 4096, got {}", self.camera.width
            )));
        }
        if self.camera.height == 0 || self.camera.height > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Camera height must be between 1 and 4096, got {}", self.camera.height
            )));
        }

        if self.capture.rate_every_n_frames == 0 {
            return Err(FaceGateError::Configuration(
                "Capture rate must be at least 1".into()
            ));
        }
        if self.capture.registration_max_captures == 0 || self.capture.login_max_captures == 0 {
            return Err(FaceGateError::Configuration(
                "Capture caps must be at least 1".into()
            ));
        }
        if self.capture.registration_duration_secs == 0 || self.capture.login_duration_secs == 0 {
            return Err(FaceGateError::Configuration(
                "Session durations must be at least 1 second".into()
            ));
        }

        if self.auth.similarity_threshold < -1.0 || self.auth.similarity_threshold > 1.0 {
            return Err(FaceGateError::Configuration(format!(
                "Similarity threshold must be between -1.0 and 1.0, got {}",
                self.auth.similarity_threshold
            )));
        }

        if self.locator.input_width == 0 || self.locator.input_width > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Locator input width must be between 1 and 4096, got {}",
                self.locator.input_width
            )));
        }
        if self.locator.input_height == 0 || self.locator.input_height > 4096 {
            return Err(FaceGateError::Configuration(format!(
                "Locator input height must be between 1 and 4096, got {}",
                self.locator.input_height
            )));
        }
        if self.locator.confidence_threshold < 0.0 || self.locator.confidence_threshold > 1.0 {
            return Err(FaceGateError::Configuration(format!(
                "Detection confidence must be between 0.0 and 1.0, got {}",
                self.locator.confidence_threshold
            )));
        }

        if self.cleaner.interval_secs == 0 {
            return Err(FaceGateError::Configuration(
                "Cleaner interval must be at least 1 second".into()
            ));
        }

        Ok(())
    }
}
