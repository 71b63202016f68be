use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceGateError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("A capture session is already running")]
    SessionAlreadyRunning,

    #[error("Identity already registered: {0}")]
    IdentityExists(String),

    #[error("No reference images stored for identity: {0}")]
    NoReferenceImages(String),

    #[error("No probe images captured for this login attempt")]
    NoProbeImages,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("ORT error: {0}")]
    Ort(#[from] ort::OrtError),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl FaceGateError {
    /// Decision-time errors that mean "cannot authenticate" rather
    /// than "rejected".
    pub fn is_cannot_authenticate(&self) -> bool {
        matches!(
            self,
            FaceGateError::NoReferenceImages(_) | FaceGateError::NoProbeImages
        )
    }
}

pub type Result<T> = std::result::Result<T, FaceGateError>;
