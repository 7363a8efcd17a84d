//! Capture Pipeline: frame → JPEG → (seal) → store.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;

use super::frame::FrameSource;
use super::TriggerKind;
use crate::codec::FrameEncoder;
use crate::encryption::{BlobKind, EncryptionManager, SealMode};
use crate::error::CaptureError;
use crate::store::{ImageFormat, ImageRecord, ImageStore};

/// Hands out capture timestamps in Unix seconds, strictly increasing.
/// A capture landing in the same second as the previous one gets the next
/// free second.
#[derive(Debug, Default)]
pub struct CaptureClock {
    last: Option<i64>,
}

impl CaptureClock {
    /// Clock that continues after `last`, usually the newest stored capture
    pub fn seeded(last: Option<i64>) -> Self {
        Self { last }
    }

    pub fn next(&mut self, now: i64) -> i64 {
        let ts = match self.last {
            Some(last) if now <= last => last + 1,
            _ => now,
        };
        self.last = Some(ts);
        ts
    }
}

pub struct CapturePipeline {
    frames: Arc<dyn FrameSource>,
    encoder: FrameEncoder,
    encryption: Arc<EncryptionManager>,
    store: Arc<ImageStore>,
    /// Capture-serialization lock
    clock: Mutex<CaptureClock>,
}

impl CapturePipeline {
    pub fn new(
        frames: Arc<dyn FrameSource>,
        encoder: FrameEncoder,
        encryption: Arc<EncryptionManager>,
        store: Arc<ImageStore>,
    ) -> Result<Self, CaptureError> {
        let latest = store.latest_timestamp().map_err(CaptureError::StorageWriteFailed)?;

        Ok(Self {
            frames,
            encoder,
            encryption,
            store,
            clock: Mutex::new(CaptureClock::seeded(latest)),
        })
    }

    /// Run one capture to completion. Blocking; call from a blocking thread.
    pub fn capture(&self, kind: TriggerKind) -> Result<i64, CaptureError> {
        let started = Instant::now();
        let mut clock = self.clock.lock();

        // Mode is fixed for the whole capture, whatever toggles happen meanwhile
        let mode = self.encryption.seal_mode()?;
        let timestamp = clock.next(Utc::now().timestamp());

        let frame = self.frames.grab()?;
        let encoded = self.encoder.encode(&frame)?;

        let record = match &mode {
            SealMode::Plain => ImageRecord {
                timestamp,
                payload: encoded.image,
                thumbnail: Some(encoded.thumbnail),
                encrypted: false,
                format: ImageFormat::Jpeg,
                key_id: None,
            },
            SealMode::Sealed(keys) => ImageRecord {
                timestamp,
                payload: EncryptionManager::seal(keys, BlobKind::Image, timestamp, &encoded.image)?,
                thumbnail: Some(EncryptionManager::seal(
                    keys,
                    BlobKind::Thumbnail,
                    timestamp,
                    &encoded.thumbnail,
                )?),
                encrypted: true,
                format: ImageFormat::Jpeg,
                key_id: Some(keys.key_id().to_string()),
            },
        };

        self.store.put(&record).map_err(CaptureError::StorageWriteFailed)?;

        log::info!(
            "Captured {timestamp} ({kind}, {}) in {}ms",
            if record.encrypted { "encrypted" } else { "plain" },
            started.elapsed().as_millis()
        );
        Ok(timestamp)
    }
}
