pub mod v4l2;

use crate::common::error::Result;
use image::DynamicImage;

/// Pull-based video frame source. Exactly one source is open per
/// active capture session; `release` gives the device back.
pub trait FrameSource: Send {
    /// Next frame, or `None` for a frame that arrived empty or failed
    /// to decode (the caller skips it and pulls again).
    fn pull(&mut self) -> Result<Option<DynamicImage>>;

    fn release(&mut self);
}

pub use v4l2::V4lFrameSource;
