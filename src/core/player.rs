//! Playback state machine.
//!
//! `PlaybackController` owns the one `PlaybackState` of a pipeline. The
//! consumer mutates it through commands (`play`, `pause`, `step`, `seek`,
//! `set_fps`, `set_loop`), the processing thread reads it once per pacing tick.
//!
//! # States
//!
//! - `Stopped`: initial; no advance, no delivery
//! - `Playing`: advances one frame per tick
//! - `Paused`: position fixed, step/seek accepted
//! - `Seeking`: transient, settles to `Paused` once the target is rendered
//!
//! # Tick protocol
//!
//! Ticks are split in two so the position only moves when the frame exists:
//! `plan_tick()` names the position to show, the processing thread fetches and
//! renders it, then `commit_tick()` makes it current. A plan whose frame is
//! missing is dropped and re-planned on the next tick (starvation).
//!
//! Every command bumps a revision counter; a commit carrying an older revision
//! is discarded so a late tick never undoes a seek or step.
//!
//! Positions are 0-based frame indices. On live sources they are the indices
//! of frames produced since start, bounded by the buffered window.

use std::sync::Mutex;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// FPS presets for jog control (`faster` / `slower`)
pub const FPS_PRESETS: &[f32] = &[1.0, 2.0, 4.0, 8.0, 12.0, 24.0, 30.0, 60.0, 120.0, 240.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackMode {
    Stopped,
    Playing,
    Paused,
    Seeking,
}

/// Snapshot of the playback state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub mode: PlaybackMode,
    pub position: u64,
    pub fps: f32,
    pub loop_enabled: bool,
}

/// What the controller knows about the attached source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeline {
    /// `Some(n)` for finite sources, `None` for live ones
    pub frame_count: Option<u64>,
    pub seekable: bool,
}

/// Buffered positions on a live source, inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferWindow {
    pub oldest: u64,
    pub newest: u64,
}

impl BufferWindow {
    /// Window from a ring buffer `(tail_seq, head_seq)` range
    pub fn from_seq_range(range: Option<(u64, u64)>) -> Option<Self> {
        range.map(|(tail, head)| Self {
            oldest: tail.saturating_sub(1),
            newest: head.saturating_sub(1),
        })
    }
}

/// Decision for one pacing tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPlan {
    /// Not playing
    Idle,
    /// Fetch and render `position`, then `commit_tick`
    Show { position: u64, revision: u64 },
    /// Live source has nothing newer than the current frame
    Starved,
    /// Finite source ended without loop; now paused at `position`
    Finished { position: u64 },
}

/// Position the processing thread must render outside of ticks (after step/seek)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub position: u64,
    pub revision: u64,
}

#[derive(Debug)]
struct Inner {
    state: PlaybackState,
    timeline: Option<Timeline>,
    /// Current position has been shown; the next tick advances from it
    primed: bool,
    render: Option<RenderRequest>,
    revision: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn timeline(&self) -> Result<Timeline> {
        self.timeline.ok_or(PipelineError::NotRunning)
    }

    fn request_render(&mut self) {
        let revision = self.bump();
        self.render = (self.state.mode != PlaybackMode::Stopped).then_some(RenderRequest {
            position: self.state.position,
            revision,
        });
    }
}

/// Playback state machine shared by the consumer and the processing thread.
#[derive(Debug)]
pub struct PlaybackController {
    inner: Mutex<Inner>,
}

fn validate_fps(fps: f32) -> Result<f32> {
    if fps.is_finite() && fps > 0.0 {
        Ok(fps)
    } else {
        Err(PipelineError::InvalidArgument(format!("FPS must be positive, got {}", fps)))
    }
}

impl PlaybackController {
    pub fn new(fps: f32, loop_enabled: bool) -> Result<Self> {
        let fps = validate_fps(fps)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                state: PlaybackState {
                    mode: PlaybackMode::Stopped,
                    position: 0,
                    fps,
                    loop_enabled,
                },
                timeline: None,
                primed: false,
                render: None,
                revision: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========== Lifecycle (coordinator) ==========

    /// Bind to a freshly opened source: Stopped at position 0. FPS and loop are kept.
    pub fn attach(&self, timeline: Timeline) {
        let mut inner = self.lock();
        inner.timeline = Some(timeline);
        inner.state.mode = PlaybackMode::Stopped;
        inner.state.position = 0;
        inner.primed = false;
        inner.render = None;
        inner.bump();
        debug!("Playback attached: {:?}", timeline);
    }

    /// Unbind from the source and return to Stopped. FPS and loop are kept.
    pub fn detach(&self) {
        let mut inner = self.lock();
        inner.timeline = None;
        inner.state.mode = PlaybackMode::Stopped;
        inner.state.position = 0;
        inner.primed = false;
        inner.render = None;
        inner.bump();
    }

    // ========== Queries ==========

    pub fn snapshot(&self) -> PlaybackState {
        self.lock().state
    }

    pub fn mode(&self) -> PlaybackMode {
        self.lock().state.mode
    }

    pub fn position(&self) -> u64 {
        self.lock().state.position
    }

    pub fn fps(&self) -> f32 {
        self.lock().state.fps
    }

    pub fn loop_enabled(&self) -> bool {
        self.lock().state.loop_enabled
    }

    pub fn is_playing(&self) -> bool {
        self.mode() == PlaybackMode::Playing
    }

    pub fn timeline(&self) -> Option<Timeline> {
        self.lock().timeline
    }

    // ========== Commands ==========

    /// Stopped/Paused/Seeking -> Playing. No-op while already playing.
    pub fn play(&self) -> Result<()> {
        let mut inner = self.lock();
        let timeline = inner.timeline()?;
        if inner.state.mode == PlaybackMode::Playing {
            return Ok(());
        }
        if timeline.frame_count == Some(0) {
            return Err(PipelineError::OutOfRange { position: 0, len: 0 });
        }
        // From Stopped the first tick shows the current position itself
        inner.primed = inner.state.mode == PlaybackMode::Paused;
        inner.state.mode = PlaybackMode::Playing;
        inner.render = None;
        inner.bump();
        debug!("Play from position {}", inner.state.position);
        Ok(())
    }

    /// Playing -> Paused. No-op in other states.
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.timeline()?;
        if inner.state.mode == PlaybackMode::Playing {
            inner.state.mode = PlaybackMode::Paused;
            inner.bump();
            debug!("Paused at position {}", inner.state.position);
        }
        Ok(())
    }

    pub fn toggle(&self) -> Result<()> {
        if self.is_playing() { self.pause() } else { self.play() }
    }

    /// Move by `delta` frames, staying in the current state.
    ///
    /// Finite sources wrap when looping, otherwise fail with `OutOfRange`.
    /// Live sources move inside `window`: past the newest frame is
    /// `OutOfRange`, before the oldest is `InsufficientHistory`.
    pub fn step(&self, delta: i64, window: Option<BufferWindow>) -> Result<u64> {
        if delta == 0 {
            return Err(PipelineError::InvalidArgument("step delta must be non-zero".into()));
        }
        let mut inner = self.lock();
        let timeline = inner.timeline()?;
        let current = inner.state.position as i64;
        let target = current.saturating_add(delta);

        let position = match timeline.frame_count {
            Some(len) => {
                if len == 0 {
                    return Err(PipelineError::OutOfRange { position: target, len });
                }
                if (0..len as i64).contains(&target) {
                    target as u64
                } else if inner.state.loop_enabled {
                    target.rem_euclid(len as i64) as u64
                } else {
                    return Err(PipelineError::OutOfRange { position: target, len });
                }
            }
            None => {
                let Some(window) = window else {
                    return Err(PipelineError::InsufficientHistory {
                        requested: delta.unsigned_abs(),
                        available: 0,
                    });
                };
                if target > window.newest as i64 {
                    return Err(PipelineError::OutOfRange {
                        position: target,
                        len: window.newest + 1,
                    });
                }
                if target < window.oldest as i64 {
                    return Err(PipelineError::InsufficientHistory {
                        requested: delta.unsigned_abs(),
                        available: (current - window.oldest as i64).max(0) as u64,
                    });
                }
                target as u64
            }
        };

        inner.state.position = position;
        inner.primed = true;
        inner.request_render();
        trace!("Step {:+} -> {}", delta, position);
        Ok(position)
    }

    /// Jump to `position` (clamped to the source) and pause there.
    pub fn seek(&self, position: u64) -> Result<u64> {
        let mut inner = self.lock();
        let timeline = inner.timeline()?;
        if !timeline.seekable {
            return Err(PipelineError::NotSupported("source is not seekable"));
        }
        let Some(last) = timeline.frame_count.and_then(|n| n.checked_sub(1)) else {
            return Err(PipelineError::OutOfRange {
                position: position as i64,
                len: timeline.frame_count.unwrap_or(0),
            });
        };

        let target = position.min(last);
        inner.state.mode = PlaybackMode::Seeking;
        inner.state.position = target;
        inner.primed = true;
        inner.request_render();
        debug!("Seek {} -> {}", position, target);
        Ok(target)
    }

    /// Seeking -> Paused once `request` has been rendered.
    pub fn settle(&self, request: RenderRequest) -> bool {
        let mut inner = self.lock();
        if inner.revision != request.revision || inner.state.mode != PlaybackMode::Seeking {
            return false;
        }
        inner.state.mode = PlaybackMode::Paused;
        trace!("Seek settled at {}", inner.state.position);
        true
    }

    pub fn set_fps(&self, fps: f32) -> Result<()> {
        let fps = validate_fps(fps)?;
        let mut inner = self.lock();
        inner.state.fps = fps;
        trace!("FPS set to {}", fps);
        Ok(())
    }

    /// Next preset above the current FPS
    pub fn faster(&self) -> f32 {
        let mut inner = self.lock();
        let fps = inner.state.fps;
        if let Some(&next) = FPS_PRESETS.iter().find(|&&f| f > fps) {
            inner.state.fps = next;
            trace!("FPS increased to {}", next);
        }
        inner.state.fps
    }

    /// Next preset below the current FPS
    pub fn slower(&self) -> f32 {
        let mut inner = self.lock();
        let fps = inner.state.fps;
        if let Some(&prev) = FPS_PRESETS.iter().rev().find(|&&f| f < fps) {
            inner.state.fps = prev;
            trace!("FPS decreased to {}", prev);
        }
        inner.state.fps
    }

    pub fn set_loop(&self, enabled: bool) {
        self.lock().state.loop_enabled = enabled;
    }

    /// Re-render the current position (e.g. after an algorithm change) when not playing.
    pub fn request_refresh(&self) {
        let mut inner = self.lock();
        if inner.timeline.is_some() && matches!(inner.state.mode, PlaybackMode::Paused | PlaybackMode::Seeking) {
            inner.request_render();
        }
    }

    // ========== Processing thread ==========

    /// Pending step/seek render, cleared on read.
    pub fn take_render_request(&self) -> Option<RenderRequest> {
        self.lock().render.take()
    }

    /// Put back a render request whose frame was not available yet.
    pub fn defer_render_request(&self, request: RenderRequest) {
        let mut inner = self.lock();
        if inner.revision == request.revision && inner.render.is_none() {
            inner.render = Some(request);
        }
    }

    /// Decide what this tick shows. May transition to Paused at the end of a
    /// finite, non-looping source.
    pub fn plan_tick(&self, window: Option<BufferWindow>) -> TickPlan {
        let mut inner = self.lock();
        if inner.state.mode != PlaybackMode::Playing {
            return TickPlan::Idle;
        }
        let Some(timeline) = inner.timeline else {
            return TickPlan::Idle;
        };
        let current = inner.state.position;
        let revision = inner.revision;

        match timeline.frame_count {
            Some(len) => {
                if len == 0 {
                    inner.state.mode = PlaybackMode::Paused;
                    return TickPlan::Finished { position: 0 };
                }
                if !inner.primed {
                    return TickPlan::Show { position: current.min(len - 1), revision };
                }
                if current + 1 < len {
                    TickPlan::Show { position: current + 1, revision }
                } else if inner.state.loop_enabled {
                    trace!("Loop: {} -> 0", current);
                    TickPlan::Show { position: 0, revision }
                } else {
                    inner.state.mode = PlaybackMode::Paused;
                    inner.state.position = len - 1;
                    inner.bump();
                    debug!("Reached end at {}, pausing", len - 1);
                    TickPlan::Finished { position: len - 1 }
                }
            }
            None => match window {
                Some(w) if !inner.primed || w.newest > current => TickPlan::Show { position: w.newest, revision },
                _ => TickPlan::Starved,
            },
        }
    }

    /// Make a rendered tick current. Ignored if a command intervened.
    pub fn commit_tick(&self, position: u64, revision: u64) -> bool {
        let mut inner = self.lock();
        if inner.revision != revision || inner.state.mode != PlaybackMode::Playing {
            return false;
        }
        inner.state.position = position;
        inner.primed = true;
        true
    }
}
