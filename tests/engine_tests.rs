//! End-to-end behaviour of the engine through its public API.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use tempfile::tempdir;

use rewinder::codec::FrameEncoder;
use rewinder::commands::{self, IMAGE_NOT_FOUND};
use rewinder::error::{CaptureError, CredentialError, EncryptionError, QueryError};
use rewinder::{
    EngineError, EngineSettings, FrameSource, ImageAnswer, KdfParams, ManualHook, MemoryVault, PathAnswer,
    RewinderEngine, SecretVault, SourceState, SubmitOutcome, TestPattern, TriggerKind,
};

/// Always produces the same frame, so encoded output is predictable
struct FixedFrame(RgbaImage);

impl FrameSource for FixedFrame {
    fn grab(&self) -> Result<RgbaImage, CaptureError> {
        Ok(self.0.clone())
    }
}

fn settings(dir: &Path) -> EngineSettings {
    let mut settings = EngineSettings::new(dir);
    settings.kdf = KdfParams::insecure_fast();
    settings.capture_interval = Duration::from_secs(3600);
    settings.thumbnail_size = 32;
    settings.keyring_service = "rewinder-tests".into();
    settings
}

fn start(dir: &Path, frames: Arc<dyn FrameSource>, vault: Arc<MemoryVault>) -> RewinderEngine {
    RewinderEngine::start(
        settings(dir),
        frames,
        Arc::new(ManualHook::new()),
        vault as Arc<dyn SecretVault>,
    )
    .unwrap()
}

fn fixed_frame() -> RgbaImage {
    RgbaImage::from_fn(96, 64, |x, y| Rgba([(x * 2) as u8, (y * 3) as u8, 90, 255]))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn never_written_timestamps_are_not_found() {
    let dir = tempdir().unwrap();
    let engine = start(dir.path(), Arc::new(TestPattern::new(32, 32)), Arc::new(MemoryVault::new()));

    let ts = engine.capture_now().await.unwrap();

    for probe in [0, ts - 1, ts + 1, i64::MAX, -5] {
        assert_eq!(engine.image(probe).await.unwrap(), ImageAnswer::NotFound);
        assert_eq!(engine.thumbnail(probe).await.unwrap(), ImageAnswer::NotFound);
        assert_eq!(engine.image_path(probe).await.unwrap(), PathAnswer::NotFound);
        assert_eq!(
            commands::get_image_base64_from_timestamp(&engine, probe).await.unwrap(),
            IMAGE_NOT_FOUND
        );
    }

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_trip_is_byte_identical_in_both_modes() {
    let dir = tempdir().unwrap();
    let frame = fixed_frame();
    let engine = start(dir.path(), Arc::new(FixedFrame(frame.clone())), Arc::new(MemoryVault::new()));

    let expected = FrameEncoder::new(95, 32).encode(&frame).unwrap();

    let plain = engine.capture_now().await.unwrap();

    engine.generate_credentials().await.unwrap();
    assert!(engine.toggle_encryption(true).await.unwrap());
    let sealed = engine.capture_now().await.unwrap();

    for ts in [plain, sealed] {
        assert_eq!(engine.image(ts).await.unwrap(), ImageAnswer::Found(expected.image.clone()));
        assert_eq!(engine.thumbnail(ts).await.unwrap(), ImageAnswer::Found(expected.thumbnail.clone()));
    }

    // Sealed bytes on disk are not the JPEG
    let on_disk = std::fs::read(dir.path().join(format!("images/{sealed}.jpg.enc"))).unwrap();
    assert_ne!(on_disk, expected.image);

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mixed_mode_history_stays_readable() {
    let dir = tempdir().unwrap();
    let frame = fixed_frame();
    let engine = start(dir.path(), Arc::new(FixedFrame(frame.clone())), Arc::new(MemoryVault::new()));
    let expected = FrameEncoder::new(95, 32).encode(&frame).unwrap().image;

    engine.store_credentials(b"correct horse".to_vec()).await.unwrap();
    engine.toggle_encryption(true).await.unwrap();
    let a = engine.capture_now().await.unwrap();

    engine.toggle_encryption(false).await.unwrap();
    let b = engine.capture_now().await.unwrap();

    assert!(dir.path().join(format!("images/{a}.jpg.enc")).exists());
    assert!(dir.path().join(format!("images/{b}.jpg")).exists());

    assert_eq!(engine.image(a).await.unwrap(), ImageAnswer::Found(expected.clone()));
    assert_eq!(engine.image(b).await.unwrap(), ImageAnswer::Found(expected));

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.records, 2);
    assert_eq!(stats.encrypted_records, 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enabling_encryption_without_credentials_fails() {
    let dir = tempdir().unwrap();
    let engine = start(dir.path(), Arc::new(TestPattern::default()), Arc::new(MemoryVault::new()));

    let err = engine.toggle_encryption(true).await.unwrap_err();
    assert!(matches!(err, EngineError::Encryption(EncryptionError::NoCredential)));
    assert!(!engine.encryption_status());

    let message = commands::toggle_encryption(&engine, true).await.unwrap_err();
    assert!(message.contains("No credential"));
    assert!(!commands::get_encryption_status(&engine).unwrap());

    // Captures still work, in plaintext
    let ts = engine.capture_now().await.unwrap();
    assert!(dir.path().join(format!("images/{ts}.jpg")).exists());

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clear_history_forgets_every_capture() {
    let dir = tempdir().unwrap();
    let engine = start(dir.path(), Arc::new(TestPattern::new(32, 32)), Arc::new(MemoryVault::new()));

    let mut written = Vec::new();
    written.push(engine.capture_now().await.unwrap());
    engine.generate_credentials().await.unwrap();
    engine.toggle_encryption(true).await.unwrap();
    written.push(engine.capture_now().await.unwrap());
    written.push(engine.capture_now().await.unwrap());

    // A decrypted view copy exists before clearing
    assert!(matches!(engine.image_path(written[1]).await.unwrap(), PathAnswer::Found(_)));

    commands::clear_image_history(&engine).await.unwrap();

    for ts in &written {
        assert_eq!(engine.image(*ts).await.unwrap(), ImageAnswer::NotFound);
        assert_eq!(engine.image_path(*ts).await.unwrap(), PathAnswer::NotFound);
    }
    assert!(engine.list_timestamps(100).await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(dir.path().join("view")).unwrap().count(), 0);

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_never_share_a_timestamp() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(start(
        dir.path(),
        Arc::new(TestPattern::new(48, 32)),
        Arc::new(MemoryVault::new()),
    ));
    engine.toggle_click_event(true).unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        tasks.spawn(async move { engine.capture_now().await.unwrap() });
    }
    for kind in [TriggerKind::Periodic, TriggerKind::Click] {
        assert_ne!(engine.submit(kind), SubmitOutcome::Closed);
    }

    let mut direct = HashSet::new();
    while let Some(ts) = tasks.join_next().await {
        assert!(direct.insert(ts.unwrap()), "duplicate timestamp");
    }

    // Let queued triggers drain
    tokio::time::sleep(Duration::from_millis(500)).await;

    let all = engine.list_timestamps(1000).await.unwrap();
    let unique: HashSet<_> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len());
    assert!(all.len() >= direct.len());

    for ts in all {
        let ImageAnswer::Found(bytes) = engine.image(ts).await.unwrap() else {
            panic!("capture {ts} missing");
        };
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_credentials_make_sealed_captures_fail_to_decrypt() {
    let dir = tempdir().unwrap();
    let engine = start(dir.path(), Arc::new(TestPattern::new(32, 32)), Arc::new(MemoryVault::new()));

    engine.store_credentials(b"s3cret".to_vec()).await.unwrap();
    engine.toggle_encryption(true).await.unwrap();
    let sealed = engine.capture_now().await.unwrap();

    commands::delete_credentials(&engine).await.unwrap();
    assert!(!engine.encryption_status());

    let err = engine.image(sealed).await.unwrap_err();
    assert!(matches!(err, EngineError::Query(QueryError::DecryptFailed(_))));

    let message = commands::get_image_base64_from_timestamp(&engine, sealed).await.unwrap_err();
    assert_ne!(message, IMAGE_NOT_FOUND);
    assert!(message.contains("Decryption failed"));

    // New captures after deletion are plaintext
    let plain = engine.capture_now().await.unwrap();
    assert!(matches!(engine.image(plain).await.unwrap(), ImageAnswer::Found(_)));

    // Same secret again opens the old capture
    engine.store_credentials(b"s3cret".to_vec()).await.unwrap();
    assert!(matches!(engine.image(sealed).await.unwrap(), ImageAnswer::Found(_)));

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn toggles_and_history_survive_restart() {
    let dir = tempdir().unwrap();
    let vault = Arc::new(MemoryVault::new());

    let (sealed, plain) = {
        let engine = start(dir.path(), Arc::new(TestPattern::new(32, 32)), Arc::clone(&vault));
        let plain = engine.capture_now().await.unwrap();
        engine.generate_credentials().await.unwrap();
        engine.toggle_encryption(true).await.unwrap();
        engine.toggle_periodic_capture(true).unwrap();
        engine.toggle_periodic_capture(false).unwrap();
        engine.toggle_click_event(true).unwrap();
        let sealed = engine.capture_now().await.unwrap();
        engine.shutdown().await.unwrap();
        (sealed, plain)
    };

    let engine = start(dir.path(), Arc::new(TestPattern::new(32, 32)), Arc::clone(&vault));
    assert!(engine.encryption_status());
    assert!(!engine.periodic_capture_status());
    assert!(engine.click_event_status());
    assert_eq!(engine.click_source_state(), SourceState::Armed);
    assert_eq!(engine.periodic_source_state(), SourceState::Disabled);

    assert!(matches!(engine.image(plain).await.unwrap(), ImageAnswer::Found(_)));
    assert!(matches!(engine.image(sealed).await.unwrap(), ImageAnswer::Found(_)));

    // Clock continues past stored history
    let next = engine.capture_now().await.unwrap();
    assert!(next > sealed);

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn encryption_is_disabled_at_startup_without_credentials() {
    let dir = tempdir().unwrap();
    let vault = Arc::new(MemoryVault::new());

    {
        let engine = start(dir.path(), Arc::new(TestPattern::default()), Arc::clone(&vault));
        engine.generate_credentials().await.unwrap();
        engine.toggle_encryption(true).await.unwrap();
        engine.shutdown().await.unwrap();
    }

    // Credential removed outside the engine
    vault.erase().unwrap();

    let engine = start(dir.path(), Arc::new(TestPattern::default()), Arc::clone(&vault));
    assert!(!engine.encryption_status());
    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn click_toggle_follows_hook_registration() {
    let dir = tempdir().unwrap();
    let hook = Arc::new(ManualHook::unavailable());
    let engine = RewinderEngine::start(
        settings(dir.path()),
        Arc::new(TestPattern::default()),
        hook,
        Arc::new(MemoryVault::new()),
    )
    .unwrap();

    assert!(engine.toggle_click_event(true).is_err());
    assert!(!engine.click_event_status());
    assert_eq!(engine.click_source_state(), SourceState::Disabled);

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clicks_become_captures() {
    let dir = tempdir().unwrap();
    let hook = Arc::new(ManualHook::new());
    let engine = RewinderEngine::start(
        settings(dir.path()),
        Arc::new(TestPattern::default()),
        Arc::clone(&hook) as Arc<dyn rewinder::InputHook>,
        Arc::new(MemoryVault::new()),
    )
    .unwrap();

    assert!(hook.click().is_none());
    engine.toggle_click_event(true).unwrap();
    assert_eq!(hook.click(), Some(SubmitOutcome::Queued));

    let mut found = false;
    for _ in 0..200 {
        if !engine.list_timestamps(1).await.unwrap().is_empty() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(found, "click did not produce a capture");

    engine.toggle_click_event(false).unwrap();
    assert!(hook.click().is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn base64_and_path_commands() {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let dir = tempdir().unwrap();
    let engine = start(dir.path(), Arc::new(TestPattern::new(40, 30)), Arc::new(MemoryVault::new()));

    let ts = commands::capture_now(&engine).await.unwrap();

    let encoded = commands::get_image_base64_from_timestamp(&engine, ts).await.unwrap();
    let decoded = STANDARD.decode(encoded).unwrap();
    assert_eq!(&decoded[..2], &[0xFF, 0xD8]);

    let thumb = commands::get_thumbnail_base64_from_timestamp(&engine, ts).await.unwrap();
    assert_ne!(thumb, IMAGE_NOT_FOUND);

    let path = commands::get_image_path_from_timestamp(&engine, ts).await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), decoded);

    assert_eq!(commands::list_timestamps(&engine, 10).await.unwrap(), vec![ts]);
    assert_eq!(commands::get_storage_stats(&engine).await.unwrap().records, 1);

    engine.shutdown().await.unwrap();
}

/// Keyring that refuses every call, as when the OS store is locked
struct LockedVault;

impl SecretVault for LockedVault {
    fn read(&self) -> Result<Option<zeroize::Zeroizing<Vec<u8>>>, CredentialError> {
        Err(CredentialError::Vault("locked".into()))
    }

    fn write(&self, _secret: &[u8]) -> Result<(), CredentialError> {
        Err(CredentialError::Vault("locked".into()))
    }

    fn erase(&self) -> Result<(), CredentialError> {
        Err(CredentialError::Vault("locked".into()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_keyring_does_not_block_startup() {
    let dir = tempdir().unwrap();

    let plain = {
        let engine = start(dir.path(), Arc::new(TestPattern::default()), Arc::new(MemoryVault::new()));
        let plain = engine.capture_now().await.unwrap();
        engine.generate_credentials().await.unwrap();
        engine.toggle_encryption(true).await.unwrap();
        engine.shutdown().await.unwrap();
        plain
    };

    let engine = RewinderEngine::start(
        settings(dir.path()),
        Arc::new(TestPattern::default()),
        Arc::new(ManualHook::new()),
        Arc::new(LockedVault),
    )
    .unwrap();

    assert!(!engine.encryption_status());
    assert!(matches!(engine.image(plain).await.unwrap(), ImageAnswer::Found(_)));

    let next = engine.capture_now().await.unwrap();
    assert!(matches!(engine.image(next).await.unwrap(), ImageAnswer::Found(_)));

    engine.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capture_after_shutdown_is_refused() {
    let dir = tempdir().unwrap();
    let engine = start(dir.path(), Arc::new(TestPattern::default()), Arc::new(MemoryVault::new()));

    engine.capture_now().await.unwrap();
    engine.shutdown().await.unwrap();

    let err = engine.capture_now().await.unwrap_err();
    assert!(matches!(err, EngineError::Capture(CaptureError::Stopped)));
    assert_eq!(engine.list_timestamps(10).await.unwrap().len(), 1);
}
