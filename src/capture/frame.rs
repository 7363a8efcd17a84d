//! Frame sources. Grabbing pixels is a platform service; the engine only
//! sees this trait.

use std::sync::atomic::{AtomicU64, Ordering};

use image::{Rgba, RgbaImage};

use crate::error::CaptureError;

/// Something that can produce a raw screen frame
pub trait FrameSource: Send + Sync {
    fn grab(&self) -> Result<RgbaImage, CaptureError>;
}

/// Synthetic source drawing a gradient that shifts on every grab
pub struct TestPattern {
    width: u32,
    height: u32,
    frames: AtomicU64,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: AtomicU64::new(0),
        }
    }

    /// Frames produced so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Default for TestPattern {
    fn default() -> Self {
        Self::new(320, 200)
    }
}

impl FrameSource for TestPattern {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed);
        let shift = (n % 256) as u32;
        let (w, h) = (self.width.max(1), self.height.max(1));

        Ok(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([
                ((x * 255 / w + shift) % 256) as u8,
                ((y * 255 / h) % 256) as u8,
                (shift * 7 % 256) as u8,
                255,
            ])
        }))
    }
}

/// Primary monitor via `xcap`
#[cfg(feature = "screen")]
#[derive(Debug, Default)]
pub struct PrimaryMonitor;

#[cfg(feature = "screen")]
impl FrameSource for PrimaryMonitor {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("cannot enumerate monitors: {e}")))?;

        let monitor = monitors
            .into_iter()
            .find(|m| m.is_primary())
            .ok_or_else(|| CaptureError::DeviceUnavailable("no primary monitor".into()))?;

        monitor
            .capture_image()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))
    }
}
