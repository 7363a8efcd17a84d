//! Capture Scheduler
//!
//! Periodic and click sources push triggers into a bounded channel. A
//! single worker drains it, running each capture on the blocking pool and
//! awaiting it before taking the next one. When the queue is full a new
//! trigger is dropped: a fresher frame is already on its way.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock as AsyncRwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::hook::{ClickSink, InputHook};
use super::pipeline::CapturePipeline;
use super::{SubmitOutcome, TriggerKind};
use crate::error::{CaptureError, EngineError, HookError};

/// Per-source state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Disabled,
    Armed,
}

/// Cloneable submit handle into the scheduler queue
#[derive(Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<TriggerKind>,
}

impl TriggerSender {
    pub fn submit(&self, kind: TriggerKind) -> SubmitOutcome {
        match self.tx.try_send(kind) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                log::debug!("{kind} trigger coalesced, a capture is already pending");
                SubmitOutcome::Coalesced
            }
            Err(TrySendError::Closed(_)) => SubmitOutcome::Closed,
        }
    }
}

pub struct CaptureScheduler {
    runtime: Handle,
    pipeline: Arc<CapturePipeline>,
    sender: TriggerSender,
    hook: Arc<dyn InputHook>,
    interval: Duration,
    periodic: Mutex<Option<CancellationToken>>,
    click: Mutex<SourceState>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Held shared by direct captures, exclusively by shutdown
    direct: AsyncRwLock<()>,
}

impl CaptureScheduler {
    /// Start the capture worker on `runtime`. Both sources start disarmed.
    pub fn start(
        runtime: Handle,
        pipeline: Arc<CapturePipeline>,
        hook: Arc<dyn InputHook>,
        interval: Duration,
        queue_depth: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let shutdown = CancellationToken::new();
        let worker = runtime.spawn(capture_worker(Arc::clone(&pipeline), rx, shutdown.clone()));

        Self {
            runtime,
            pipeline,
            sender: TriggerSender { tx },
            hook,
            interval,
            periodic: Mutex::new(None),
            click: Mutex::new(SourceState::Disabled),
            shutdown,
            worker: Mutex::new(Some(worker)),
            direct: AsyncRwLock::new(()),
        }
    }

    pub fn submit(&self, kind: TriggerKind) -> SubmitOutcome {
        self.sender.submit(kind)
    }

    pub fn sender(&self) -> TriggerSender {
        self.sender.clone()
    }

    /// Capture right away, bypassing the queue but not the capture lock.
    /// Fails with `Stopped` once shutdown has begun; shutdown waits for a
    /// direct capture already running.
    pub async fn capture_now(&self) -> Result<i64, EngineError> {
        let _running = self.direct.read().await;
        if self.shutdown.is_cancelled() {
            return Err(CaptureError::Stopped.into());
        }

        let pipeline = Arc::clone(&self.pipeline);
        Ok(tokio::task::spawn_blocking(move || pipeline.capture(TriggerKind::Manual)).await??)
    }

    // ─── Periodic source ─────────────────────────────────────────────────────

    pub fn arm_periodic(&self) {
        let mut slot = self.periodic.lock();
        if slot.is_some() {
            return;
        }

        let token = self.shutdown.child_token();
        self.runtime
            .spawn(periodic_source(self.sender.clone(), self.interval, token.clone()));
        *slot = Some(token);
        log::info!("Periodic capture armed every {:?}", self.interval);
    }

    /// Stops future ticks. A capture already queued still runs.
    pub fn disarm_periodic(&self) {
        if let Some(token) = self.periodic.lock().take() {
            token.cancel();
            log::info!("Periodic capture disarmed");
        }
    }

    pub fn periodic_state(&self) -> SourceState {
        match *self.periodic.lock() {
            Some(_) => SourceState::Armed,
            None => SourceState::Disabled,
        }
    }

    // ─── Click source ────────────────────────────────────────────────────────

    /// Register with the input hook. On failure the source stays disabled.
    pub fn arm_click(&self) -> Result<(), HookError> {
        let mut state = self.click.lock();
        if *state == SourceState::Armed {
            return Ok(());
        }

        self.hook.register(ClickSink::new(self.sender.clone()))?;
        *state = SourceState::Armed;
        log::info!("Click capture armed");
        Ok(())
    }

    pub fn disarm_click(&self) {
        let mut state = self.click.lock();
        if *state == SourceState::Armed {
            self.hook.unregister();
            *state = SourceState::Disabled;
            log::info!("Click capture disarmed");
        }
    }

    pub fn click_state(&self) -> SourceState {
        *self.click.lock()
    }

    /// Disarm both sources and wait for the worker and any direct capture.
    /// A capture in flight is finished and persisted first; triggers still
    /// queued are dropped.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.disarm_periodic();
        self.disarm_click();
        self.shutdown.cancel();
        drop(self.direct.write().await);

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            handle.await?;
            log::info!("Capture worker stopped");
        }
        Ok(())
    }
}

async fn capture_worker(
    pipeline: Arc<CapturePipeline>,
    mut rx: mpsc::Receiver<TriggerKind>,
    shutdown: CancellationToken,
) {
    loop {
        let kind = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            kind = rx.recv() => match kind {
                Some(kind) => kind,
                None => break,
            },
        };

        let pipeline = Arc::clone(&pipeline);
        match tokio::task::spawn_blocking(move || pipeline.capture(kind)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::error!("{kind} capture failed: {e}"),
            Err(e) => log::error!("{kind} capture task failed: {e}"),
        }
    }
}

async fn periodic_source(sender: TriggerSender, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if sender.submit(TriggerKind::Periodic) == SubmitOutcome::Closed {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::{FrameSource, TestPattern};
    use crate::capture::hook::ManualHook;
    use crate::codec::FrameEncoder;
    use crate::config::{ConfigStore, KdfParams};
    use crate::credentials::{CredentialManager, MemoryVault};
    use crate::encryption::EncryptionManager;
    use crate::error::CaptureError;
    use crate::store::ImageStore;
    use image::RgbaImage;
    use std::sync::mpsc as std_mpsc;
    use tempfile::{tempdir, TempDir};

    /// Blocks every grab until the test releases it
    struct GatedSource {
        entered: Mutex<std_mpsc::Sender<()>>,
        release: Mutex<std_mpsc::Receiver<()>>,
        inner: TestPattern,
    }

    impl FrameSource for GatedSource {
        fn grab(&self) -> Result<RgbaImage, CaptureError> {
            let _ = self.entered.lock().send(());
            let _ = self.release.lock().recv();
            self.inner.grab()
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<ImageStore>,
        hook: Arc<ManualHook>,
        scheduler: CaptureScheduler,
    }

    fn fixture(frames: Arc<dyn FrameSource>, hook: ManualHook, interval: Duration) -> Fixture {
        let dir = tempdir().unwrap();
        let config = Arc::new(ConfigStore::load_or_create(dir.path()).unwrap());
        let encryption = Arc::new(EncryptionManager::new(
            config,
            CredentialManager::new(Arc::new(MemoryVault::new())),
            KdfParams::insecure_fast(),
            "rewinder-test",
            "key",
        ));
        let store = Arc::new(ImageStore::open(dir.path()).unwrap());
        let pipeline = Arc::new(
            CapturePipeline::new(frames, FrameEncoder::new(70, 16), encryption, Arc::clone(&store)).unwrap(),
        );
        let hook = Arc::new(hook);
        let scheduler = CaptureScheduler::start(
            Handle::current(),
            pipeline,
            Arc::clone(&hook) as Arc<dyn InputHook>,
            interval,
            1,
        );

        Fixture {
            _dir: dir,
            store,
            hook,
            scheduler,
        }
    }

    async fn wait_for_records(store: &ImageStore, count: usize) {
        for _ in 0..200 {
            if store.len().unwrap() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("expected {count} records, found {}", store.len().unwrap());
    }

    fn gated() -> (Arc<GatedSource>, std_mpsc::Receiver<()>, std_mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let source = Arc::new(GatedSource {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            inner: TestPattern::new(16, 16),
        });
        (source, entered_rx, release_tx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_triggers_coalesce_while_capture_in_flight() {
        let (source, entered, release) = gated();
        let fx = fixture(source, ManualHook::new(), Duration::from_secs(3600));

        assert_eq!(fx.scheduler.submit(TriggerKind::Manual), SubmitOutcome::Queued);
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        // Worker is busy: one trigger fits in the queue, the rest are dropped
        assert_eq!(fx.scheduler.submit(TriggerKind::Click), SubmitOutcome::Queued);
        assert_eq!(fx.scheduler.submit(TriggerKind::Click), SubmitOutcome::Coalesced);
        assert_eq!(fx.scheduler.submit(TriggerKind::Periodic), SubmitOutcome::Coalesced);

        release.send(()).unwrap();
        entered.recv_timeout(Duration::from_secs(5)).unwrap();
        release.send(()).unwrap();

        wait_for_records(&fx.store, 2).await;
        fx.scheduler.shutdown().await.unwrap();
        assert_eq!(fx.store.len().unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_waits_for_in_flight_capture() {
        let (source, entered, release) = gated();
        let fx = fixture(source, ManualHook::new(), Duration::from_secs(3600));

        fx.scheduler.submit(TriggerKind::Manual);
        entered.recv_timeout(Duration::from_secs(5)).unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            release.send(()).unwrap();
        });

        fx.scheduler.shutdown().await.unwrap();
        releaser.join().unwrap();

        assert_eq!(fx.store.len().unwrap(), 1);
        assert_eq!(fx.scheduler.submit(TriggerKind::Manual), SubmitOutcome::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_periodic_source_arm_disarm() {
        let fx = fixture(Arc::new(TestPattern::new(16, 16)), ManualHook::new(), Duration::from_millis(40));
        assert_eq!(fx.scheduler.periodic_state(), SourceState::Disabled);

        fx.scheduler.arm_periodic();
        fx.scheduler.arm_periodic();
        assert_eq!(fx.scheduler.periodic_state(), SourceState::Armed);

        wait_for_records(&fx.store, 2).await;

        fx.scheduler.disarm_periodic();
        assert_eq!(fx.scheduler.periodic_state(), SourceState::Disabled);

        // Let anything already queued drain, then no new captures appear
        tokio::time::sleep(Duration::from_millis(200)).await;
        let settled = fx.store.len().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.store.len().unwrap(), settled);

        fx.scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_click_source_registers_with_hook() {
        let fx = fixture(Arc::new(TestPattern::new(16, 16)), ManualHook::new(), Duration::from_secs(3600));

        assert!(fx.hook.click().is_none());

        fx.scheduler.arm_click().unwrap();
        assert!(fx.hook.is_registered());
        assert_eq!(fx.scheduler.click_state(), SourceState::Armed);

        assert_eq!(fx.hook.click(), Some(SubmitOutcome::Queued));
        wait_for_records(&fx.store, 1).await;

        fx.scheduler.disarm_click();
        assert!(!fx.hook.is_registered());
        assert!(fx.hook.click().is_none());

        fx.scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_click_registration_failure_leaves_source_disabled() {
        let fx = fixture(
            Arc::new(TestPattern::new(16, 16)),
            ManualHook::unavailable(),
            Duration::from_secs(3600),
        );

        assert!(fx.scheduler.arm_click().is_err());
        assert_eq!(fx.scheduler.click_state(), SourceState::Disabled);

        fx.scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_waits_for_direct_capture() {
        let (source, entered, release) = gated();
        let fx = fixture(source, ManualHook::new(), Duration::from_secs(3600));

        let (captured, stopped) = tokio::join!(fx.scheduler.capture_now(), async {
            tokio::task::spawn_blocking(move || entered.recv_timeout(Duration::from_secs(5)))
                .await
                .unwrap()
                .unwrap();
            let releaser = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                release.send(()).unwrap();
            });
            let stopped = fx.scheduler.shutdown().await;
            releaser.await.unwrap();
            stopped
        });

        stopped.unwrap();
        let ts = captured.unwrap();
        assert!(fx.store.get(ts).unwrap().is_some());

        let late = fx.scheduler.capture_now().await;
        assert!(matches!(late, Err(EngineError::Capture(CaptureError::Stopped))));
        assert_eq!(fx.store.len().unwrap(), 1);
    }
}
