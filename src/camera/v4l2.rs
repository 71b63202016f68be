use crate::camera::FrameSource;
use crate::common::config::CameraConfig;
use crate::common::error::{FaceGateError, Result};
use image::{DynamicImage, ImageBuffer, Luma};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// Webcam frame source on V4L2 mmap streaming. IR cameras exposing a
/// GREY format are passed through as grayscale; everything else is
/// negotiated to MJPG and decoded per frame.
pub struct V4lFrameSource {
    stream: Option<v4l::io::mmap::Stream<'static>>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl V4lFrameSource {
    pub fn open(config: &CameraConfig) -> Result<Self> {
        tracing::info!("Opening camera device {}...", config.device_index);

        let device = Device::new(config.device_index as usize).map_err(|e| {
            FaceGateError::Camera(format!("Failed to open camera {}: {}", config.device_index, e))
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| FaceGateError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!(
                "Device {} may not support standard video capture: {:?}",
                config.device_index,
                caps.capabilities
            );
        }

        let mut fmt = device
            .format()
            .map_err(|e| FaceGateError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;

        // Keep GREY for IR sensors, otherwise ask for MJPG.
        if fmt.fourcc.str().unwrap_or("") != "GREY" {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set exact format: {}. Using device defaults.", e);
        }

        let fmt = device
            .format()
            .map_err(|e| FaceGateError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "Camera streaming {}x{} {}",
            fmt.width,
            fmt.height,
            fmt.fourcc.str().unwrap_or("????")
        );
        if fmt.width != config.width || fmt.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                fmt.width,
                fmt.height,
                config.width,
                config.height
            );
        }

        let mut stream = v4l::io::mmap::Stream::with_buffers(&device, Type::VideoCapture, 4)
            .map_err(|e| FaceGateError::Camera(format!("Failed to create stream: {}", e)))?;

        // Warmup frames settle exposure (and the IR emitter).
        for _ in 0..config.warmup_frames {
            stream
                .next()
                .map_err(|e| FaceGateError::Camera(format!("Failed to capture warmup frame: {}", e)))?;
            std::thread::sleep(std::time::Duration::from_millis(config.warmup_delay_ms));
        }

        Ok(Self {
            stream: Some(stream),
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Option<DynamicImage> {
    let needed = (width * height) as usize;
    if data.len() < needed {
        tracing::debug!("Short GREY frame: {} of {} bytes", data.len(), needed);
        return None;
    }
    ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data[..needed].to_vec())
        .map(DynamicImage::ImageLuma8)
}

impl FrameSource for V4lFrameSource {
    fn pull(&mut self) -> Result<Option<DynamicImage>> {
        let (width, height, fourcc) = (self.width, self.height, self.fourcc);
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FaceGateError::Camera("Frame source already released".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| FaceGateError::Camera(format!("Failed to capture frame: {}", e)))?;

        let used = meta.bytesused as usize;
        if used == 0 {
            return Ok(None);
        }
        let data = &buf[..used.min(buf.len())];

        match fourcc.str().unwrap_or("") {
            "GREY" => Ok(grey_to_image(data, width, height)),
            "MJPG" => match image::load_from_memory(data) {
                Ok(frame) => Ok(Some(frame)),
                Err(e) => {
                    tracing::debug!("Undecodable MJPG frame: {}", e);
                    Ok(None)
                }
            },
            other => Err(FaceGateError::Camera(format!(
                "Unsupported camera format: {}",
                other
            ))),
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("Camera stream released");
        }
    }
}
