use crate::camera::FrameSource;
use crate::common::config::CaptureConfig;
use crate::common::error::{FaceGateError, Result};
use crate::core::locator::{FaceLocator, FaceRect};
use crate::storage::ImageStore;
use image::DynamicImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Registration,
    Login,
}

/// Everything a capture session is parameterized on, fixed at start.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub mode: SessionMode,
    pub identity: String,
    pub duration: Duration,
    pub rate_every_n_frames: u32,
    pub max_captures: u32,
}

impl SessionPlan {
    pub fn registration(identity: &str, capture: &CaptureConfig) -> Self {
        Self {
            mode: SessionMode::Registration,
            identity: identity.to_string(),
            duration: Duration::from_secs(capture.registration_duration_secs),
            rate_every_n_frames: capture.rate_every_n_frames,
            max_captures: capture.registration_max_captures,
        }
    }

    pub fn login(identity: &str, capture: &CaptureConfig) -> Self {
        Self {
            mode: SessionMode::Login,
            identity: identity.to_string(),
            duration: Duration::from_secs(capture.login_duration_secs),
            rate_every_n_frames: capture.rate_every_n_frames,
            max_captures: capture.login_max_captures,
        }
    }
}

/// Posted to the foreground renderer, fire-and-forget.
pub struct PreviewFrame {
    pub image: DynamicImage,
    pub faces: Vec<FaceRect>,
    pub stored: u32,
    pub target: u32,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub mode: SessionMode,
    pub identity: String,
    /// Frames that decoded and went through face location.
    pub frames_seen: u64,
    /// Store writes that succeeded (replicate-writes included).
    pub stored: u32,
    pub elapsed: Duration,
}

struct SessionHandle {
    running: Arc<AtomicBool>,
    worker: JoinHandle<Result<SessionSummary>>,
}

/// Owns the single allowed capture session. Starting a second one
/// while the first is still running is an error, not a second thread.
pub struct SessionController {
    active: Option<SessionHandle>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn start(
        &mut self,
        plan: SessionPlan,
        source: Box<dyn FrameSource>,
        locator: Arc<dyn FaceLocator>,
        store: ImageStore,
        preview: Option<SyncSender<PreviewFrame>>,
    ) -> Result<()> {
        if let Some(handle) = &self.active {
            if handle.running.load(Ordering::SeqCst) {
                return Err(FaceGateError::SessionAlreadyRunning);
            }
        }
        // Reap a previously completed session before replacing it.
        if let Some(handle) = self.active.take() {
            let _ = handle.worker.join();
        }

        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);
        let worker = std::thread::Builder::new()
            .name("capture-session".into())
            .spawn(move || run_capture_loop(plan, source, locator, store, preview, worker_running))?;

        self.active = Some(SessionHandle { running, worker });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|h| h.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Cooperative cancel: the loop observes the flag between frames.
    /// No completion logic runs on the cancelled session.
    pub fn stop(&self) {
        if let Some(handle) = &self.active {
            handle.running.store(false, Ordering::SeqCst);
        }
    }

    /// Block until the active session finishes and return its summary.
    pub fn wait(&mut self) -> Result<SessionSummary> {
        let handle = self
            .active
            .take()
            .ok_or_else(|| anyhow::anyhow!("No capture session to wait for"))?;
        handle
            .worker
            .join()
            .map_err(|_| anyhow::anyhow!("Capture worker panicked"))?
    }
}

fn run_capture_loop(
    plan: SessionPlan,
    mut source: Box<dyn FrameSource>,
    locator: Arc<dyn FaceLocator>,
    store: ImageStore,
    preview: Option<SyncSender<PreviewFrame>>,
    running: Arc<AtomicBool>,
) -> Result<SessionSummary> {
    // A login session keeps the cleaner off the scratch namespace for
    // its whole duration.
    let _lease = match plan.mode {
        SessionMode::Login => Some(store.scratch_lease()),
        SessionMode::Registration => None,
    };

    tracing::info!(
        "Starting {:?} session for {} ({}s window, capture every {} frames, cap {})",
        plan.mode,
        plan.identity,
        plan.duration.as_secs(),
        plan.rate_every_n_frames,
        plan.max_captures,
    );

    let start = Instant::now();
    let rate = plan.rate_every_n_frames as u64;
    let mut frame_count: u64 = 0;
    let mut stored: u32 = 0;

    while running.load(Ordering::SeqCst) && start.elapsed() < plan.duration {
        let frame = match source.pull() {
            Ok(Some(frame)) => frame,
            // An empty or undecodable frame is skipped entirely: no
            // face location, no counter increment.
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Frame pull failed: {}", e);
                continue;
            }
        };

        match locator.detect(&frame) {
            Ok(faces) => {
                for _face in &faces {
                    if frame_count % rate == 0 && stored < plan.max_captures {
                        // One ordinal per frame: a frame carrying more
                        // than one rectangle rewrites the same file.
                        let ordinal = (frame_count / rate) as u32;
                        let saved = match plan.mode {
                            SessionMode::Registration => {
                                store.save_reference(&plan.identity, ordinal, &frame)
                            }
                            SessionMode::Login => store.save_probe(ordinal, &frame),
                        };
                        match saved {
                            Ok(path) => {
                                stored += 1;
                                tracing::debug!("Stored capture {} at {:?}", ordinal, path);
                            }
                            Err(e) => {
                                // That single capture is lost; the
                                // session keeps going.
                                tracing::warn!("Failed to store capture {}: {}", ordinal, e);
                            }
                        }
                    }
                }

                if let Some(tx) = &preview {
                    let _ = tx.try_send(PreviewFrame {
                        image: frame,
                        faces,
                        stored,
                        target: plan.max_captures,
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Face detection failed on frame {}: {}", frame_count, e);
            }
        }

        frame_count += 1;
    }

    running.store(false, Ordering::SeqCst);
    source.release();

    let summary = SessionSummary {
        mode: plan.mode,
        identity: plan.identity,
        frames_seen: frame_count,
        stored,
        elapsed: start.elapsed(),
    };

    match summary.mode {
        SessionMode::Registration => tracing::info!(
            "Registration complete for {}: {} captures over {} frames in {:.1}s",
            summary.identity,
            summary.stored,
            summary.frames_seen,
            summary.elapsed.as_secs_f32(),
        ),
        SessionMode::Login => tracing::info!(
            "Login capture window complete for {}: {} probes over {} frames in {:.1}s",
            summary.identity,
            summary.stored,
            summary.frames_seen,
            summary.elapsed.as_secs_f32(),
        ),
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, GrayImage};
    use std::fs;
    use std::sync::atomic::AtomicU64;

    fn solid_frame(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([value])))
    }

    fn full_rect() -> FaceRect {
        FaceRect {
            x: 0.0,
            y: 0.0,
            width: 16.0,
            height: 16.0,
            confidence: 0.9,
        }
    }

    /// Yields a fixed prefix of frames, then keeps returning the last
    /// element (or `None` once the prefix is exhausted).
    struct ScriptedSource {
        script: Vec<Option<DynamicImage>>,
        pulls: usize,
        exhausted_yields_none: bool,
        released: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn endless(frame: DynamicImage) -> Self {
            Self {
                script: vec![Some(frame)],
                pulls: 0,
                exhausted_yields_none: false,
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        fn finite(script: Vec<Option<DynamicImage>>) -> Self {
            Self {
                script,
                pulls: 0,
                exhausted_yields_none: true,
                released: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn pull(&mut self) -> Result<Option<DynamicImage>> {
            let frame = if self.pulls < self.script.len() {
                self.script[self.pulls].clone()
            } else if self.exhausted_yields_none {
                None
            } else {
                self.script.last().cloned().flatten()
            };
            self.pulls += 1;
            Ok(frame)
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct StubLocator {
        rects_per_frame: usize,
        fail: bool,
        calls: AtomicU64,
    }

    impl StubLocator {
        fn finding(rects_per_frame: usize) -> Self {
            Self {
                rects_per_frame,
                fail: false,
                calls: AtomicU64::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                rects_per_frame: 0,
                fail: true,
                calls: AtomicU64::new(0),
            }
        }
    }

    impl FaceLocator for StubLocator {
        fn detect(&self, _frame: &DynamicImage) -> Result<Vec<FaceRect>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(FaceGateError::Detection("stub failure".into()));
            }
            Ok(vec![full_rect(); self.rects_per_frame])
        }
    }

    fn temp_store(tag: &str) -> ImageStore {
        let base = std::env::temp_dir().join(format!(
            "facegate-session-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&base);
        ImageStore::new(base.join("images"), base.join("scratch")).unwrap()
    }

    fn quick_plan(mode: SessionMode, cap: u32, millis: u64) -> SessionPlan {
        SessionPlan {
            mode,
            identity: "ana".to_string(),
            duration: Duration::from_millis(millis),
            rate_every_n_frames: 1,
            max_captures: cap,
        }
    }

    fn reference_ordinals(store: &ImageStore, identity: &str) -> Vec<u32> {
        let mut ordinals: Vec<u32> = fs::read_dir(store.identity_dir(identity))
            .unwrap()
            .map(|e| {
                let name = e.unwrap().file_name().into_string().unwrap();
                name.trim_start_matches(&format!("{}_", identity))
                    .trim_end_matches(".jpg")
                    .parse()
                    .unwrap()
            })
            .collect();
        ordinals.sort_unstable();
        ordinals
    }

    #[test]
    fn registration_stores_a_gap_free_ordinal_prefix() {
        let store = temp_store("prefix");
        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 5, 400),
                Box::new(ScriptedSource::endless(solid_frame(128))),
                Arc::new(StubLocator::finding(1)),
                store.clone(),
                None,
            )
            .unwrap();

        let summary = controller.wait().unwrap();
        assert_eq!(summary.stored, 5);
        assert!(summary.frames_seen >= 5);
        assert_eq!(reference_ordinals(&store, "ana"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn capture_rate_skips_intermediate_frames() {
        let store = temp_store("rate");
        let mut controller = SessionController::new();
        let mut plan = quick_plan(SessionMode::Registration, 1000, 300);
        plan.rate_every_n_frames = 3;
        controller
            .start(
                plan,
                Box::new(ScriptedSource::endless(solid_frame(100))),
                Arc::new(StubLocator::finding(1)),
                store.clone(),
                None,
            )
            .unwrap();

        let summary = controller.wait().unwrap();
        let ordinals = reference_ordinals(&store, "ana");
        // Qualifying frames are 0, 3, 6, ...; ordinals come out dense.
        let expected: Vec<u32> = (0..ordinals.len() as u32).collect();
        assert_eq!(ordinals, expected);
        assert!(summary.frames_seen as usize >= ordinals.len() * 3 - 2);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let store = temp_store("reject");
        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 10, 2000),
                Box::new(ScriptedSource::endless(solid_frame(50))),
                Arc::new(StubLocator::finding(1)),
                store.clone(),
                None,
            )
            .unwrap();

        let second = controller.start(
            quick_plan(SessionMode::Registration, 10, 2000),
            Box::new(ScriptedSource::endless(solid_frame(50))),
            Arc::new(StubLocator::finding(1)),
            store,
            None,
        );
        assert!(matches!(second, Err(FaceGateError::SessionAlreadyRunning)));

        controller.stop();
        controller.wait().unwrap();
    }

    #[test]
    fn stop_cancels_early_and_releases_the_source() {
        let store = temp_store("stop");
        let source = ScriptedSource::endless(solid_frame(80));
        let released = Arc::clone(&source.released);

        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 1_000_000, 60_000),
                Box::new(source),
                Arc::new(StubLocator::finding(1)),
                store,
                None,
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(50));
        controller.stop();
        let summary = controller.wait().unwrap();

        assert!(summary.elapsed < Duration::from_secs(10));
        assert!(released.load(Ordering::SeqCst));
        assert!(!controller.is_running());
    }

    #[test]
    fn multi_rect_frames_consume_the_cap_but_rewrite_one_ordinal() {
        let store = temp_store("multirect");
        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 4, 300),
                Box::new(ScriptedSource::endless(solid_frame(128))),
                Arc::new(StubLocator::finding(2)),
                store.clone(),
                None,
            )
            .unwrap();

        let summary = controller.wait().unwrap();
        // Two writes per qualifying frame: the cap of 4 is consumed by
        // frames 0 and 1, which produce only two distinct files.
        assert_eq!(summary.stored, 4);
        assert_eq!(reference_ordinals(&store, "ana"), vec![0, 1]);
    }

    #[test]
    fn empty_frames_are_skipped_entirely() {
        let store = temp_store("empty");
        let script = vec![
            None,
            None,
            Some(solid_frame(90)),
            None,
            Some(solid_frame(90)),
        ];
        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 100, 200),
                Box::new(ScriptedSource::finite(script)),
                Arc::new(StubLocator::finding(1)),
                store.clone(),
                None,
            )
            .unwrap();

        let summary = controller.wait().unwrap();
        // Only decoded frames count and only they reach the locator.
        assert_eq!(summary.frames_seen, 2);
        assert_eq!(summary.stored, 2);
        assert_eq!(reference_ordinals(&store, "ana"), vec![0, 1]);
    }

    #[test]
    fn detection_errors_are_nonfatal_and_still_count_frames() {
        let store = temp_store("detfail");
        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 10, 200),
                Box::new(ScriptedSource::endless(solid_frame(70))),
                Arc::new(StubLocator::failing()),
                store.clone(),
                None,
            )
            .unwrap();

        let summary = controller.wait().unwrap();
        assert_eq!(summary.stored, 0);
        assert!(summary.frames_seen > 0);
        assert!(!store.identity_exists("ana"));
    }

    #[test]
    fn login_writes_probes_and_holds_the_scratch_lease() {
        let store = temp_store("login");
        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Login, 3, 400),
                Box::new(ScriptedSource::endless(solid_frame(60))),
                Arc::new(StubLocator::finding(1)),
                store.clone(),
                None,
            )
            .unwrap();

        // The worker holds a lease for the whole window.
        std::thread::sleep(Duration::from_millis(100));
        assert!(store.scratch_in_use());

        let summary = controller.wait().unwrap();
        assert!(!store.scratch_in_use());
        assert_eq!(summary.stored, 3);
        assert_eq!(store.load_probe_images().unwrap().len(), 3);
    }

    #[test]
    fn dropped_preview_receiver_does_not_break_the_loop() {
        let store = temp_store("preview");
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        drop(rx);

        let mut controller = SessionController::new();
        controller
            .start(
                quick_plan(SessionMode::Registration, 3, 200),
                Box::new(ScriptedSource::endless(solid_frame(128))),
                Arc::new(StubLocator::finding(1)),
                store,
                Some(tx),
            )
            .unwrap();

        let summary = controller.wait().unwrap();
        assert_eq!(summary.stored, 3);
    }
}
