//! Pipeline coordinator: acquisition, processing and delivery threads.
//!
//! ```text
//!  Source ──read_next──▶ [acquisition] ──push──▶ FrameRingBuffer
//!                             ▲                        │ get
//!                  reposition │                        ▼
//!                             └──────────────── [processing] ◀── PlaybackController (ticks, step/seek)
//!                                                      │ apply(ProcessingConfig)
//!                                                      ▼
//!                                    bounded drop-oldest queue ──▶ [delivery] ──▶ EventBus subscribers
//! ```
//!
//! # Threads
//!
//! - **Acquisition** owns the source for the whole session and is the only
//!   thread that reads, seeks or pushes. On finite sources it never reads more
//!   than `capacity - 1` frames past the playhead, so the frame being played
//!   is never evicted by read-ahead. When playback needs a frame that is no
//!   longer buffered (backward seek, loop wrap) the processing side posts a
//!   reposition target; acquisition seeks the source and starts a new ring
//!   buffer epoch there.
//! - **Processing** sleeps on its wake channel, with the pacer deadline as
//!   timeout while playing. Ticks and step/seek renders fetch from the ring
//!   buffer, apply the processing stage and enqueue the result.
//! - **Delivery** forwards frames and notices to the event bus.
//!
//! # Shutdown
//!
//! `stop()` raises the shutdown flag, wakes everyone and joins acquisition and
//! processing. Their channel ends drop with them, which lets delivery drain
//! and exit. Only then is the source (returned by the acquisition thread)
//! closed. A camera read in progress is bounded by its device timeout, so
//! `stop()` cannot hang on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use log::{debug, error, info, trace, warn};
use serde::Serialize;
use uuid::Uuid;

use super::delivery::{DeliveryQueue, Notice, delivery_loop, delivery_queue};
use super::event_bus::{BoxedEvent, EventBus};
use super::pacer::Pacer;
use super::pipeline_events::{ErrorEvent, FillLevelChanged, FrameDelivered, PlaybackChanged, SourceStalled};
use super::player::{BufferWindow, PlaybackController, PlaybackState, TickPlan, Timeline};
use super::ring_buffer::FrameRingBuffer;
use crate::config::PipelineConfig;
use crate::entities::effects::{self, MaskParams, ProcessingConfig};
use crate::entities::frame::Frame;
use crate::error::{PipelineError, Result};
use crate::sources::{DataSource, ReadOutcome, Source, SourceDescriptor, SourceSpec};

/// Upper bound on any idle wait, so shutdown is noticed even without a wake.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Retry interval for a step/seek render whose frame is still on its way.
const RETRY_WAIT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStatus {
    Idle,
    Running,
    /// Terminal until `stop()`
    Failed(PipelineError),
}

/// Counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub acquired: u64,
    pub processed: u64,
    pub delivered: u64,
    /// Processed frames discarded by the drop-oldest delivery queue
    pub dropped: u64,
    /// Ticks skipped because the frame was not buffered yet
    pub starved: u64,
    pub repositions: u64,
    pub last_processing_time: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    processed: AtomicU64,
    delivered: Arc<AtomicU64>,
    dropped: AtomicU64,
    starved: AtomicU64,
    repositions: AtomicU64,
    last_processing_us: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for c in [
            &self.acquired,
            &self.processed,
            &*self.delivered,
            &self.dropped,
            &self.starved,
            &self.repositions,
            &self.last_processing_us,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            starved: self.starved.load(Ordering::Relaxed),
            repositions: self.repositions.load(Ordering::Relaxed),
            last_processing_time: Duration::from_micros(self.last_processing_us.load(Ordering::Relaxed)),
        }
    }
}

/// Wake reasons for the processing thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Command,
    FrameArrived,
    Shutdown,
}

/// Consumer callbacks, registered with `Pipeline::subscribe`.
///
/// Callbacks run on the delivery thread.
#[derive(Default)]
pub struct Subscriber {
    on_frame: Option<Box<dyn Fn(&FrameDelivered) + Send + Sync>>,
    on_error: Option<Box<dyn Fn(&ErrorEvent) + Send + Sync>>,
    on_fill_level: Option<Box<dyn Fn(&FillLevelChanged) + Send + Sync>>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame(mut self, f: impl Fn(&FrameDelivered) + Send + Sync + 'static) -> Self {
        self.on_frame = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&ErrorEvent) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_fill_level(mut self, f: impl Fn(&FillLevelChanged) + Send + Sync + 'static) -> Self {
        self.on_fill_level = Some(Box::new(f));
        self
    }
}

/// State shared by the three threads of one session
struct Shared {
    tag: String,
    descriptor: SourceDescriptor,
    ring: Arc<FrameRingBuffer>,
    controller: Arc<PlaybackController>,
    processing: Arc<RwLock<ProcessingConfig>>,
    status: Arc<Mutex<PipelineStatus>>,
    counters: Arc<Counters>,
    shutdown: AtomicBool,
    failed: AtomicBool,
    /// Position playback needs next; read-ahead on finite sources is bounded by it
    playhead: AtomicU64,
    /// Position the acquisition thread reads next
    cursor: AtomicU64,
    /// Sequence number the processing thread is waiting for, 0 = none
    awaiting_seq: AtomicU64,
    reposition: Mutex<Option<u64>>,
}

impl Shared {
    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn frame_at(&self, position: u64) -> Option<Frame> {
        self.ring.get(position + 1).ok()
    }
}

/// Per-session thread handles and channel ends
struct Session {
    shared: Arc<Shared>,
    acq_wake: Sender<()>,
    proc_wake: Sender<Wake>,
    acquisition: Option<JoinHandle<Source>>,
    processing: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
}

impl Session {
    fn wake(&self) {
        let _ = self.proc_wake.try_send(Wake::Command);
        let _ = self.acq_wake.try_send(());
    }
}

/// Acquisition → ring buffer → playback → processing → delivery, for one source at a time.
///
/// # Example
/// ```ignore
/// let mut pipeline = Pipeline::new(PipelineConfig::default())?;
/// pipeline.subscribe(Subscriber::new().on_frame(|e| show(&e.frame)));
/// pipeline.start_spec(&SourceSpec::Study { path: "scan.mfs".into() })?;
/// pipeline.play()?;
/// ```
pub struct Pipeline {
    id: Uuid,
    config: PipelineConfig,
    bus: EventBus,
    controller: Arc<PlaybackController>,
    processing: Arc<RwLock<ProcessingConfig>>,
    status: Arc<Mutex<PipelineStatus>>,
    counters: Arc<Counters>,
    session: Option<Session>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("playback", &self.playback())
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let id = Uuid::new_v4();
        let controller = Arc::new(PlaybackController::new(config.fps, config.loop_enabled)?);
        info!("[{}] Pipeline created: capacity={} fps={}", short_id(&id), config.capacity, config.fps);
        Ok(Self {
            id,
            bus: EventBus::with_deferred(config.deferred_events),
            controller,
            processing: Arc::new(RwLock::new(config.processing)),
            status: Arc::new(Mutex::new(PipelineStatus::Idle)),
            counters: Arc::new(Counters::default()),
            session: None,
            config,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn tag(&self) -> String {
        short_id(&self.id)
    }

    fn set_status(&self, status: PipelineStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    // ========== Lifecycle ==========

    /// Build the source described by `spec` and start on it.
    pub fn start_spec(&mut self, spec: &SourceSpec) -> Result<()> {
        let source = spec.build(self.config.camera_timeout());
        self.start(source)
    }

    /// Open `source` and spawn the acquisition, processing and delivery threads.
    ///
    /// Playback starts `Stopped` at position 0. An open failure puts the
    /// pipeline in `Failed`, is emitted as a fatal `ErrorEvent` and returned.
    pub fn start(&mut self, mut source: Source) -> Result<()> {
        if self.session.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }
        if let PipelineStatus::Failed(e) = self.status() {
            return Err(PipelineError::Failed(e.to_string()));
        }

        if let Err(e) = source.open() {
            error!("[{}] Failed to open source: {}", self.tag(), e);
            source.close();
            self.set_status(PipelineStatus::Failed(e.clone()));
            self.bus.emit(ErrorEvent {
                error: e.clone(),
                fatal: true,
            });
            return Err(e);
        }

        let descriptor = source.descriptor();
        info!(
            "[{}] Starting on {:?} '{}' ({}x{}, {} frames, seekable={})",
            self.tag(),
            descriptor.kind,
            descriptor.name,
            descriptor.width,
            descriptor.height,
            descriptor
                .frame_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "live".into()),
            descriptor.seekable
        );

        self.counters.reset();
        self.controller.attach(Timeline {
            frame_count: descriptor.frame_count,
            seekable: descriptor.seekable,
        });

        let shared = Arc::new(Shared {
            tag: self.tag(),
            descriptor,
            ring: Arc::new(FrameRingBuffer::new(self.config.capacity)),
            controller: Arc::clone(&self.controller),
            processing: Arc::clone(&self.processing),
            status: Arc::clone(&self.status),
            counters: Arc::clone(&self.counters),
            shutdown: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            playhead: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
            awaiting_seq: AtomicU64::new(0),
            reposition: Mutex::new(None),
        });

        let (acq_wake_tx, acq_wake_rx) = bounded::<()>(1);
        let (proc_wake_tx, proc_wake_rx) = bounded::<Wake>(16);
        let (notice_tx, notice_rx) = unbounded::<Notice>();
        let (queue, frames_rx) = delivery_queue::<FrameDelivered>(self.config.delivery_capacity);

        let mut session = Session {
            shared: Arc::clone(&shared),
            acq_wake: acq_wake_tx.clone(),
            proc_wake: proc_wake_tx.clone(),
            acquisition: None,
            processing: None,
            delivery: None,
        };

        // Before spawning: a fatal read may set Failed right away
        self.set_status(PipelineStatus::Running);
        let spawned = self.spawn_threads(
            &mut session,
            source,
            ThreadChannels {
                acq_wake_rx,
                acq_wake_tx,
                proc_wake_rx,
                proc_wake_tx,
                notice_tx,
                notice_rx,
                queue,
                frames_rx,
            },
        );
        if let Err(e) = spawned {
            error!("[{}] {}", self.tag(), e);
            self.session = Some(session);
            self.stop();
            return Err(e);
        }

        self.session = Some(session);
        Ok(())
    }

    fn spawn_threads(&self, session: &mut Session, source: Source, ch: ThreadChannels) -> Result<()> {
        let tag = self.tag();
        let shared = &session.shared;

        let bus = self.bus.clone();
        let delivered = Arc::clone(&self.counters.delivered);
        let frames_rx = ch.frames_rx;
        let notice_rx = ch.notice_rx;
        session.delivery = Some(
            thread::Builder::new()
                .name(format!("framepipe-dlv-{}", tag))
                .spawn(move || delivery_loop(frames_rx, notice_rx, bus, delivered))
                .map_err(|e| PipelineError::Failed(format!("spawn delivery thread: {}", e)))?,
        );

        let proc = ProcessingWorker {
            shared: Arc::clone(shared),
            wake: ch.proc_wake_rx,
            acq_wake: ch.acq_wake_tx.clone(),
            queue: ch.queue,
            notices: ch.notice_tx.clone(),
        };
        session.processing = Some(
            thread::Builder::new()
                .name(format!("framepipe-proc-{}", tag))
                .spawn(move || proc.run())
                .map_err(|e| PipelineError::Failed(format!("spawn processing thread: {}", e)))?,
        );

        let acq = AcquisitionWorker {
            shared: Arc::clone(shared),
            wake: ch.acq_wake_rx,
            proc_wake: ch.proc_wake_tx,
            notices: ch.notice_tx,
            stall_notice_after: self.config.stall_notice_after.max(1),
        };
        session.acquisition = Some(
            thread::Builder::new()
                .name(format!("framepipe-acq-{}", tag))
                .spawn(move || acq.run(source))
                .map_err(|e| PipelineError::Failed(format!("spawn acquisition thread: {}", e)))?,
        );
        Ok(())
    }

    /// Stop all threads, close the source and return to `Idle`.
    ///
    /// Safe from any state; a no-op when idle. Clears `Failed`.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            if matches!(self.status(), PipelineStatus::Failed(_)) {
                info!("[{}] Cleared failed state", self.tag());
                self.set_status(PipelineStatus::Idle);
            }
            return;
        };
        let tag = self.tag();
        debug!("[{}] Stopping", tag);

        session.shared.shutdown.store(true, Ordering::Release);
        let _ = session.proc_wake.try_send(Wake::Shutdown);
        let _ = session.acq_wake.try_send(());

        let source = session.acquisition.take().and_then(|h| match h.join() {
            Ok(source) => Some(source),
            Err(_) => {
                error!("[{}] Acquisition thread panicked", tag);
                None
            }
        });
        if let Some(h) = session.processing.take()
            && h.join().is_err()
        {
            error!("[{}] Processing thread panicked", tag);
        }

        // Last senders go away here; delivery drains what is queued, then exits
        let delivery = session.delivery.take();
        drop(session);
        if let Some(h) = delivery
            && h.join().is_err()
        {
            error!("[{}] Delivery thread panicked", tag);
        }

        if let Some(mut source) = source {
            source.close();
        }

        self.controller.detach();
        self.set_status(PipelineStatus::Idle);
        info!("[{}] Stopped", tag);
    }

    // ========== Commands ==========

    fn running(&self) -> Result<&Session> {
        if let PipelineStatus::Failed(e) = self.status() {
            return Err(PipelineError::Failed(e.to_string()));
        }
        self.session.as_ref().ok_or(PipelineError::NotRunning)
    }

    fn window(session: &Session) -> Option<BufferWindow> {
        BufferWindow::from_seq_range(session.shared.ring.range())
    }

    pub fn play(&self) -> Result<()> {
        let session = self.running()?;
        self.controller.play()?;
        session.wake();
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let session = self.running()?;
        self.controller.pause()?;
        session.wake();
        Ok(())
    }

    /// Move the position by `delta` frames. Returns the new position.
    pub fn step(&self, delta: i64) -> Result<u64> {
        let session = self.running()?;
        let position = self.controller.step(delta, Self::window(session))?;
        session.wake();
        Ok(position)
    }

    /// Jump to `position` (clamped) and pause there. Returns the clamped position.
    pub fn seek(&self, position: u64) -> Result<u64> {
        let session = self.running()?;
        let position = self.controller.seek(position)?;
        session.wake();
        Ok(position)
    }

    pub fn set_fps(&self, fps: f32) -> Result<()> {
        self.controller.set_fps(fps)?;
        if let Some(session) = &self.session {
            session.wake();
        }
        Ok(())
    }

    /// Step up the FPS preset ladder. Returns the new rate.
    pub fn faster(&self) -> f32 {
        let fps = self.controller.faster();
        if let Some(session) = &self.session {
            session.wake();
        }
        fps
    }

    /// Step down the FPS preset ladder. Returns the new rate.
    pub fn slower(&self) -> f32 {
        let fps = self.controller.slower();
        if let Some(session) = &self.session {
            session.wake();
        }
        fps
    }

    pub fn set_loop(&self, enabled: bool) {
        self.controller.set_loop(enabled);
        if let Some(session) = &self.session {
            session.wake();
        }
    }

    /// Change the processing algorithm. Applies from the next frame; when
    /// paused, the current frame is re-rendered.
    pub fn select_algorithm(&self, identifier: &str, mask: MaskParams) -> Result<ProcessingConfig> {
        let config = ProcessingConfig::select(identifier, mask)?;
        *self.processing.write().unwrap_or_else(|e| e.into_inner()) = config;
        info!("[{}] Algorithm: {}", self.tag(), config.label());
        if let Some(session) = &self.session {
            self.controller.request_refresh();
            session.wake();
        }
        Ok(config)
    }

    // ========== Consumer side ==========

    /// Register consumer callbacks. They persist across stop/start.
    pub fn subscribe(&self, subscriber: Subscriber) {
        if let Some(f) = subscriber.on_frame {
            self.bus.subscribe::<FrameDelivered, _>(move |e| f(e));
        }
        if let Some(f) = subscriber.on_error {
            self.bus.subscribe::<ErrorEvent, _>(move |e| f(e));
        }
        if let Some(f) = subscriber.on_fill_level {
            self.bus.subscribe::<FillLevelChanged, _>(move |e| f(e));
        }
    }

    /// The bus itself, for typed subscriptions (`SourceStalled`, `PlaybackChanged`).
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Events queued since the last poll (only with `deferred_events`).
    pub fn poll_events(&self) -> Vec<BoxedEvent> {
        self.bus.poll()
    }

    // ========== Queries ==========

    pub fn status(&self) -> PipelineStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn playback(&self) -> PlaybackState {
        self.controller.snapshot()
    }

    pub fn processing_config(&self) -> ProcessingConfig {
        *self.processing.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn fill_level(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.shared.ring.fill_level())
    }

    /// The ring buffer of the running session
    pub fn buffer(&self) -> Option<Arc<FrameRingBuffer>> {
        self.session.as_ref().map(|s| Arc::clone(&s.shared.ring))
    }

    pub fn descriptor(&self) -> Option<SourceDescriptor> {
        self.session.as_ref().map(|s| s.shared.descriptor.clone())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

struct ThreadChannels {
    acq_wake_rx: Receiver<()>,
    acq_wake_tx: Sender<()>,
    proc_wake_rx: Receiver<Wake>,
    proc_wake_tx: Sender<Wake>,
    notice_tx: Sender<Notice>,
    notice_rx: Receiver<Notice>,
    queue: DeliveryQueue<FrameDelivered>,
    frames_rx: Receiver<FrameDelivered>,
}

// ============================================================================
// Acquisition
// ============================================================================

struct AcquisitionWorker {
    shared: Arc<Shared>,
    wake: Receiver<()>,
    proc_wake: Sender<Wake>,
    notices: Sender<Notice>,
    stall_notice_after: u32,
}

impl AcquisitionWorker {
    /// Read until shutdown or a fatal error. Hands the source back for closing.
    fn run(self, mut source: Source) -> Source {
        let s = &self.shared;
        let finite = s.descriptor.is_finite();
        let capacity = s.ring.capacity() as u64;
        let mut next_seq = 1u64;
        let mut at_end = false;
        let mut timeouts = 0u32;
        let mut stalled = false;
        let mut last_fill = 0usize;
        debug!("[{}] Acquisition started", s.tag);

        while !s.stopping() {
            let target = s.reposition.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(target) = target {
                match source.seek(target) {
                    Ok(()) => {
                        s.ring.reset(target + 1);
                        next_seq = target + 1;
                        at_end = false;
                        s.cursor.store(target, Ordering::Release);
                        s.counters.repositions.fetch_add(1, Ordering::Relaxed);
                        debug!("[{}] Repositioned source to {}", s.tag, target);
                        self.notify_fill(&mut last_fill);
                    }
                    Err(e) => {
                        warn!("[{}] Reposition to {} failed: {}", s.tag, target, e);
                        self.notice(Notice::Error(ErrorEvent { error: e, fatal: false }));
                    }
                }
                continue;
            }

            if finite {
                // Stay within one buffer length of the playhead
                let limit = s.playhead.load(Ordering::Acquire) + capacity - 1;
                if at_end || next_seq - 1 > limit {
                    let _ = self.wake.recv_timeout(IDLE_WAIT);
                    continue;
                }
            }

            match source.read_next() {
                Ok(ReadOutcome::Frame { image, timestamp }) => {
                    if stalled {
                        info!("[{}] Source recovered after {} timeouts", s.tag, timeouts);
                    }
                    timeouts = 0;
                    stalled = false;

                    let seq = next_seq;
                    next_seq += 1;
                    s.ring.push(Frame::new(seq, timestamp, image));
                    s.cursor.store(seq, Ordering::Release);
                    s.counters.acquired.fetch_add(1, Ordering::Relaxed);
                    trace!("[{}] Acquired seq {}", s.tag, seq);

                    if s.awaiting_seq.load(Ordering::Acquire) == seq {
                        let _ = self.proc_wake.try_send(Wake::FrameArrived);
                    }
                    self.notify_fill(&mut last_fill);
                }
                Ok(ReadOutcome::EndOfStream) => {
                    if !at_end {
                        debug!("[{}] End of stream after seq {}", s.tag, next_seq - 1);
                    }
                    at_end = true;
                }
                Err(PipelineError::SourceTimeout(timeout)) => {
                    timeouts += 1;
                    if timeouts >= self.stall_notice_after && !stalled {
                        stalled = true;
                        warn!("[{}] Source stalled: {} consecutive timeouts", s.tag, timeouts);
                        self.notice(Notice::Stalled(SourceStalled {
                            consecutive_timeouts: timeouts,
                            timeout,
                        }));
                    }
                }
                Err(e) => {
                    error!("[{}] Source failed: {}", s.tag, e);
                    s.failed.store(true, Ordering::Release);
                    *s.status.lock().unwrap_or_else(|e| e.into_inner()) = PipelineStatus::Failed(e.clone());
                    let _ = s.controller.pause();
                    self.notice(Notice::Error(ErrorEvent { error: e, fatal: true }));
                    let _ = self.proc_wake.try_send(Wake::Command);
                    break;
                }
            }
        }

        debug!("[{}] Acquisition finished", s.tag);
        source
    }

    fn notify_fill(&self, last_fill: &mut usize) {
        let level = self.shared.ring.fill_level();
        if level != *last_fill {
            *last_fill = level;
            self.notice(Notice::FillLevel(FillLevelChanged {
                level,
                capacity: self.shared.ring.capacity(),
            }));
        }
    }

    fn notice(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}

// ============================================================================
// Processing
// ============================================================================

enum Render {
    Delivered,
    /// Frame not buffered yet; retry
    Waiting,
    /// Frame can no longer be produced (evicted on a live source)
    Lost,
}

struct ProcessingWorker {
    shared: Arc<Shared>,
    wake: Receiver<Wake>,
    acq_wake: Sender<()>,
    queue: DeliveryQueue<FrameDelivered>,
    notices: Sender<Notice>,
}

impl ProcessingWorker {
    fn run(self) {
        let s = &self.shared;
        let mut pacer = Pacer::new(s.controller.fps());
        debug!("[{}] Processing started", s.tag);

        while !s.stopping() {
            let failed = s.failed.load(Ordering::Acquire);
            let now = Instant::now();

            pacer.set_fps(s.controller.fps());
            if s.controller.is_playing() && !failed {
                pacer.start(now);
            } else {
                pacer.stop();
            }

            if pacer.is_due(now) {
                pacer.on_tick(now);
                self.tick();
            }

            // A newer command replaces any deferred request
            let mut retrying = false;
            if let Some(request) = s.controller.take_render_request()
                && !failed
            {
                match self.render(request.position) {
                    Render::Delivered => {
                        if s.controller.settle(request) {
                            self.notice(Notice::Playback(PlaybackChanged(s.controller.snapshot())));
                        }
                    }
                    Render::Waiting => {
                        s.controller.defer_render_request(request);
                        retrying = true;
                    }
                    Render::Lost => {
                        s.controller.settle(request);
                    }
                }
            }

            let timeout = match (retrying, pacer.time_until(Instant::now())) {
                (true, Some(t)) => t.min(RETRY_WAIT),
                (true, None) => RETRY_WAIT,
                (false, Some(t)) => t,
                (false, None) => IDLE_WAIT,
            };
            match self.wake.recv_timeout(timeout) {
                Ok(Wake::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Wake::Command) | Ok(Wake::FrameArrived) | Err(RecvTimeoutError::Timeout) => {}
            }
        }
        debug!("[{}] Processing finished", s.tag);
    }

    fn tick(&self) {
        let s = &self.shared;
        let window = BufferWindow::from_seq_range(s.ring.range());
        match s.controller.plan_tick(window) {
            TickPlan::Idle => {}
            TickPlan::Starved => {
                s.counters.starved.fetch_add(1, Ordering::Relaxed);
            }
            TickPlan::Finished { position } => {
                info!("[{}] Playback reached the end at {}", s.tag, position);
                self.notice(Notice::Playback(PlaybackChanged(s.controller.snapshot())));
            }
            TickPlan::Show { position, revision } => {
                self.advance_playhead(position);
                match s.frame_at(position) {
                    Some(frame) => {
                        s.awaiting_seq.store(0, Ordering::Release);
                        self.deliver(&frame, position);
                        s.controller.commit_tick(position, revision);
                    }
                    None => {
                        trace!("[{}] Tick starved at {}", s.tag, position);
                        s.counters.starved.fetch_add(1, Ordering::Relaxed);
                        self.request_frame(position);
                    }
                }
            }
        }
    }

    fn render(&self, position: u64) -> Render {
        let s = &self.shared;
        self.advance_playhead(position);
        if let Some(frame) = s.frame_at(position) {
            s.awaiting_seq.store(0, Ordering::Release);
            self.deliver(&frame, position);
            return Render::Delivered;
        }
        if !s.descriptor.is_finite() {
            debug!("[{}] Frame {} left the buffer before it was rendered", s.tag, position);
            return Render::Lost;
        }
        self.request_frame(position);
        Render::Waiting
    }

    fn advance_playhead(&self, position: u64) {
        if self.shared.playhead.swap(position, Ordering::AcqRel) != position {
            let _ = self.acq_wake.try_send(());
        }
    }

    /// Make sure `position` is on its way: either read-ahead will reach it,
    /// or the source has to be repositioned.
    fn request_frame(&self, position: u64) {
        let s = &self.shared;
        if !s.descriptor.is_finite() {
            return;
        }
        s.awaiting_seq.store(position + 1, Ordering::Release);

        let cursor = s.cursor.load(Ordering::Acquire);
        let capacity = s.ring.capacity() as u64;
        let arriving = position >= cursor && position < cursor + capacity;
        if arriving || s.ring.contains(position + 1) {
            return;
        }
        if !s.descriptor.seekable {
            warn!("[{}] Frame {} is gone and the source cannot seek", s.tag, position);
            return;
        }
        let mut target = s.reposition.lock().unwrap_or_else(|e| e.into_inner());
        if *target != Some(position) {
            debug!("[{}] Requesting reposition to {} (cursor {})", s.tag, position, cursor);
            *target = Some(position);
        }
        drop(target);
        let _ = self.acq_wake.try_send(());
    }

    fn deliver(&self, frame: &Frame, position: u64) {
        let s = &self.shared;
        // Snapshot once per frame; later changes apply to the next frame
        let config = *s.processing.read().unwrap_or_else(|e| e.into_inner());

        let started = Instant::now();
        match effects::apply(frame, &config) {
            Ok(output) => {
                let processing_time = started.elapsed();
                s.counters.processed.fetch_add(1, Ordering::Relaxed);
                s.counters
                    .last_processing_us
                    .store(processing_time.as_micros() as u64, Ordering::Relaxed);
                let dropped = self.queue.push(FrameDelivered {
                    frame: output,
                    position,
                    algorithm: config.algorithm,
                    processing_time,
                });
                if dropped > 0 {
                    s.counters.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
                    trace!("[{}] Delivery queue full, dropped {}", s.tag, dropped);
                }
            }
            Err(e) => {
                warn!("[{}] Processing frame {} failed: {}", s.tag, position, e);
                self.notice(Notice::Error(ErrorEvent { error: e, fatal: false }));
            }
        }
    }

    fn notice(&self, notice: Notice) {
        let _ = self.notices.send(notice);
    }
}
