//! End-to-end pipeline behaviour over study files and scripted cameras.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use framepipe::core::pipeline_events::{ErrorEvent, PlaybackChanged, SourceStalled};
use framepipe::entities::frame::{Image, PixelFormat};
use framepipe::sources::camera::{CameraSource, CaptureDevice, DeviceFormat};
use framepipe::sources::study::write_study;
use framepipe::{
    AlgorithmId, MaskParams, PipelineConfig, PipelineError, PipelineStatus, PlaybackMode, Pipeline, SourceSpec,
    Subscriber,
};

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn study(dir: &Path, frames: usize) -> SourceSpec {
    let path = dir.join("study.mfs");
    let images: Vec<Image> = (0..frames)
        .map(|i| Image::filled(8, 8, PixelFormat::Gray8, (i % 256) as f32))
        .collect();
    write_study(&path, &images, 30.0).unwrap();
    SourceSpec::Study { path }
}

/// Scripted device: `frames` good grabs, then either silence or a hard failure.
struct ScriptedDevice {
    frames: u32,
    fail_after: bool,
    closed: Arc<AtomicBool>,
}

impl CaptureDevice for ScriptedDevice {
    fn name(&self) -> String {
        "scripted".into()
    }

    fn open(&mut self) -> framepipe::Result<DeviceFormat> {
        Ok(DeviceFormat { width: 4, height: 4, fps: 100.0 })
    }

    fn grab(&mut self, timeout: Duration) -> framepipe::Result<Option<Image>> {
        if self.frames > 0 {
            self.frames -= 1;
            thread::sleep(Duration::from_millis(10));
            return Ok(Some(Image::filled(4, 4, PixelFormat::Gray8, 7.0)));
        }
        if self.fail_after {
            return Err(PipelineError::Source("device unplugged".into()));
        }
        thread::sleep(timeout);
        Ok(None)
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn scripted(frames: u32, fail_after: bool) -> (framepipe::Source, Arc<AtomicBool>) {
    let closed = Arc::new(AtomicBool::new(false));
    let device = ScriptedDevice { frames, fail_after, closed: Arc::clone(&closed) };
    (CameraSource::new(Box::new(device), Duration::from_millis(30)).into(), closed)
}

#[test]
fn plays_bounded_source_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig { capacity: 100, fps: 30.0, loop_enabled: false, ..Default::default() };
    let mut pipeline = Pipeline::new(config).unwrap();

    let positions = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&positions);
    pipeline.subscribe(Subscriber::new().on_frame(move |e| p.lock().unwrap().push(e.position)));

    pipeline.start_spec(&study(dir.path(), 150)).unwrap();
    pipeline.play().unwrap();

    assert!(wait_until(Duration::from_secs(20), || {
        let s = pipeline.playback();
        s.mode == PlaybackMode::Paused && s.position == 149
    }));

    let ring = pipeline.buffer().unwrap();
    assert!(wait_until(Duration::from_secs(2), || ring.fill_level() == 100));
    assert_eq!(pipeline.fill_level(), 100);
    assert!(matches!(ring.get(50), Err(PipelineError::NotInBuffer { seq: 50 })));
    assert!(ring.get(149).is_ok());

    // Frames reach the consumer in playback order
    assert!(wait_until(Duration::from_secs(2), || positions.lock().unwrap().last() == Some(&149)));
    let seen = positions.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "out of order: {:?}", seen);
    assert_eq!(seen.first(), Some(&0));

    // Already at the end: stepping forward is out of range
    assert!(matches!(pipeline.step(1), Err(PipelineError::OutOfRange { .. })));
    assert_eq!(pipeline.playback().position, 149);

    pipeline.stop();
    assert_eq!(pipeline.status(), PipelineStatus::Idle);
    assert_eq!(pipeline.playback().mode, PlaybackMode::Stopped);
}

#[test]
fn loop_wraps_and_repositions_acquisition() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig { capacity: 10, fps: 240.0, loop_enabled: true, ..Default::default() };
    let mut pipeline = Pipeline::new(config).unwrap();

    let wraps = Arc::new(AtomicU64::new(0));
    let last = Arc::new(AtomicU64::new(0));
    let (w, l) = (Arc::clone(&wraps), Arc::clone(&last));
    pipeline.subscribe(Subscriber::new().on_frame(move |e| {
        if e.position < l.swap(e.position, Ordering::Relaxed) {
            w.fetch_add(1, Ordering::Relaxed);
        }
    }));

    pipeline.start_spec(&study(dir.path(), 30)).unwrap();
    pipeline.play().unwrap();
    assert!(wait_until(Duration::from_secs(10), || wraps.load(Ordering::Relaxed) >= 2));
    assert!(pipeline.stats().repositions >= 2);
    assert_eq!(pipeline.playback().mode, PlaybackMode::Playing);
    pipeline.stop();
}

#[test]
fn pacing_matches_fps() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig { capacity: 100, fps: 40.0, delivery_capacity: 64, ..Default::default() };
    let mut pipeline = Pipeline::new(config).unwrap();
    let delivered = Arc::new(AtomicU64::new(0));
    let d = Arc::clone(&delivered);
    pipeline.subscribe(Subscriber::new().on_frame(move |_| {
        d.fetch_add(1, Ordering::Relaxed);
    }));

    pipeline.start_spec(&study(dir.path(), 500)).unwrap();
    // Let read-ahead fill the buffer so no tick starves
    let ring = pipeline.buffer().unwrap();
    assert!(wait_until(Duration::from_secs(5), || ring.fill_level() == 100));

    pipeline.play().unwrap();
    thread::sleep(Duration::from_millis(1000));
    pipeline.pause().unwrap();
    pipeline.stop();
    let ticks = pipeline.stats().processed as i64;

    // 40 FPS over one second, with slack for scheduler jitter around play/pause
    assert!((ticks - 40).abs() <= 3, "ticks = {}", ticks);
    assert_eq!(delivered.load(Ordering::Relaxed) as i64, ticks);
}

#[test]
fn seek_and_step_while_paused() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(PipelineConfig { capacity: 20, ..Default::default() }).unwrap();
    let positions = Arc::new(Mutex::new(Vec::new()));
    let p = Arc::clone(&positions);
    pipeline.subscribe(Subscriber::new().on_frame(move |e| p.lock().unwrap().push(e.position)));
    let settled = Arc::new(AtomicU64::new(0));
    let s = Arc::clone(&settled);
    pipeline.events().subscribe::<PlaybackChanged, _>(move |e| {
        if e.0.mode == PlaybackMode::Paused {
            s.fetch_add(1, Ordering::Relaxed);
        }
    });

    pipeline.start_spec(&study(dir.path(), 100)).unwrap();
    assert_eq!(pipeline.seek(1000).unwrap(), 99);
    assert!(wait_until(Duration::from_secs(5), || settled.load(Ordering::Relaxed) == 1));
    assert_eq!(pipeline.playback().mode, PlaybackMode::Paused);

    assert_eq!(pipeline.step(-1).unwrap(), 98);
    assert_eq!(pipeline.step(-10).unwrap(), 88);
    assert!(wait_until(Duration::from_secs(5), || positions.lock().unwrap().contains(&88)));
    assert!(positions.lock().unwrap().contains(&99));

    // Algorithm change re-renders the paused frame with the new kernel
    let before = positions.lock().unwrap().len();
    pipeline.select_algorithm("gaussian", MaskParams { size: 5 }).unwrap();
    assert!(wait_until(Duration::from_secs(5), || positions.lock().unwrap().len() > before));
    assert_eq!(positions.lock().unwrap().last(), Some(&88));
    assert_eq!(pipeline.processing_config().algorithm, AlgorithmId::Gaussian);
    pipeline.stop();
}

#[test]
fn live_source_rejects_seek_and_stops_while_blocked() {
    let (source, closed) = scripted(5, false);
    let mut pipeline = Pipeline::new(PipelineConfig { stall_notice_after: 2, ..Default::default() }).unwrap();
    let stalls = Arc::new(AtomicU64::new(0));
    let s = Arc::clone(&stalls);
    pipeline.events().subscribe::<SourceStalled, _>(move |e| {
        assert!(e.consecutive_timeouts >= 2);
        s.fetch_add(1, Ordering::Relaxed);
    });

    pipeline.start(source).unwrap();
    pipeline.play().unwrap();
    let before = pipeline.playback();
    assert_eq!(pipeline.seek(3), Err(PipelineError::NotSupported("source is not seekable")));
    assert_eq!(pipeline.playback().mode, before.mode);

    // Device goes silent after five frames; one stall notice, pipeline stays up
    assert!(wait_until(Duration::from_secs(5), || stalls.load(Ordering::Relaxed) == 1));
    thread::sleep(Duration::from_millis(150));
    assert_eq!(stalls.load(Ordering::Relaxed), 1);
    assert_eq!(pipeline.status(), PipelineStatus::Running);
    assert_eq!(pipeline.stats().acquired, 5);

    // Acquisition is inside a blocking grab right now
    let started = Instant::now();
    pipeline.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(closed.load(Ordering::Acquire));
    assert_eq!(pipeline.status(), PipelineStatus::Idle);
}

#[test]
fn fatal_source_error_is_terminal_until_stop() {
    let (source, closed) = scripted(3, true);
    let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
    let fatal = Arc::new(AtomicU64::new(0));
    let f = Arc::clone(&fatal);
    pipeline.subscribe(Subscriber::new().on_error(move |e: &ErrorEvent| {
        if e.fatal {
            f.fetch_add(1, Ordering::Relaxed);
        }
    }));

    pipeline.start(source).unwrap();
    pipeline.play().unwrap();
    assert!(wait_until(Duration::from_secs(5), || matches!(pipeline.status(), PipelineStatus::Failed(_))));
    assert!(wait_until(Duration::from_secs(2), || fatal.load(Ordering::Relaxed) == 1));
    assert!(matches!(pipeline.play(), Err(PipelineError::Failed(_))));
    assert_ne!(pipeline.playback().mode, PlaybackMode::Playing);

    pipeline.stop();
    assert!(closed.load(Ordering::Acquire));
    assert_eq!(pipeline.status(), PipelineStatus::Idle);

    // Reusable after stop
    let (source, _) = scripted(2, false);
    pipeline.start(source).unwrap();
    assert_eq!(pipeline.status(), PipelineStatus::Running);
    pipeline.stop();
}

#[test]
fn stop_is_safe_from_any_state() {
    let dir = tempfile::tempdir().unwrap();
    let spec = study(dir.path(), 20);
    let mut pipeline = Pipeline::new(PipelineConfig::default()).unwrap();

    pipeline.stop();
    assert_eq!(pipeline.status(), PipelineStatus::Idle);

    // Stopped (started, never played)
    pipeline.start_spec(&spec).unwrap();
    pipeline.stop();

    // Playing
    pipeline.start_spec(&spec).unwrap();
    pipeline.play().unwrap();
    thread::sleep(Duration::from_millis(50));
    pipeline.stop();

    // Paused and Seeking
    pipeline.start_spec(&spec).unwrap();
    pipeline.play().unwrap();
    pipeline.pause().unwrap();
    pipeline.seek(15).unwrap();
    pipeline.stop();
    pipeline.stop();

    assert_eq!(pipeline.status(), PipelineStatus::Idle);
    assert!(matches!(pipeline.play(), Err(PipelineError::NotRunning)));
}

#[test]
fn instances_do_not_interfere() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let mut a = Pipeline::new(PipelineConfig { fps: 120.0, ..Default::default() }).unwrap();
    let mut b = Pipeline::new(PipelineConfig { fps: 120.0, ..Default::default() }).unwrap();
    a.select_algorithm("sobel-x", MaskParams::default()).unwrap();

    let algos_b = Arc::new(Mutex::new(Vec::new()));
    let ab = Arc::clone(&algos_b);
    b.subscribe(Subscriber::new().on_frame(move |e| ab.lock().unwrap().push(e.algorithm)));

    a.start_spec(&study(dir_a.path(), 40)).unwrap();
    b.start_spec(&study(dir_b.path(), 10)).unwrap();
    a.play().unwrap();
    b.play().unwrap();

    assert!(wait_until(Duration::from_secs(5), || b.playback().mode == PlaybackMode::Paused));
    assert_eq!(b.playback().position, 9);
    assert!(algos_b.lock().unwrap().iter().all(|&id| id == AlgorithmId::Identity));

    b.stop();
    assert_eq!(a.status(), PipelineStatus::Running);
    a.stop();
}
