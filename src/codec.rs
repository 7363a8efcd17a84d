//! Rewinder - Frame Codec
//!
//! Turns a raw RGBA frame into the stored JPEG image and its thumbnail.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

use crate::error::CaptureError;

/// Encoded blobs for one capture
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub image: Vec<u8>,
    pub thumbnail: Vec<u8>,
}

/// JPEG encoder for captured frames
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    quality: u8,
    thumbnail_size: u32,
}

impl FrameEncoder {
    pub fn new(quality: u8, thumbnail_size: u32) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            thumbnail_size: thumbnail_size.max(1),
        }
    }

    /// Encode the full frame and a thumbnail that fits in a
    /// `thumbnail_size` square, keeping the aspect ratio
    pub fn encode(&self, frame: &RgbaImage) -> Result<EncodedFrame, CaptureError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CaptureError::EncodeFailed("empty frame".into()));
        }

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(frame.clone()).to_rgb8());
        let image = self.to_jpeg(&rgb)?;

        let thumb = rgb.thumbnail(self.thumbnail_size, self.thumbnail_size);
        let thumbnail = self.to_jpeg(&thumb)?;

        Ok(EncodedFrame { image, thumbnail })
    }

    fn to_jpeg(&self, img: &DynamicImage) -> Result<Vec<u8>, CaptureError> {
        let mut cursor = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut cursor, self.quality);
        img.write_with_encoder(encoder)?;
        Ok(cursor.into_inner())
    }
}
