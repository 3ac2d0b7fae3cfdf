//! Fixed-capacity frame ring buffer.
//!
//! Single producer (the acquisition thread) pushes, any number of readers call
//! `get`/`rewind`/`fill_level` concurrently.
//!
//! # Layout
//!
//! Slot `seq % capacity` holds the frame with sequence number `seq`. The window
//! of retained frames is always contiguous: `[head - fill + 1, head]`.
//!
//! # Publication
//!
//! `head` and `fill` are packed into one `window` atomic so a reader always
//! sees a matching pair. The producer writes the slot first, then publishes the
//! window with `Release`. Readers load it with `Acquire`, read the slot, then
//! confirm the frame's own sequence number. A slot that was overwritten or
//! cleared in the meantime simply reads as `NotInBuffer`; a reader never sees
//! a half-written frame because slots only ever swap whole `Frame` handles.
//!
//! Slot locks guard an `Arc` swap, so `get` waits at most for one pointer write.
//!
//! # Epochs
//!
//! `reset(next_seq)` empties the buffer and bumps the epoch. The acquisition
//! thread calls it after repositioning the source so a stale window is never
//! mixed with frames from the new read position.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace, warn};

use crate::entities::frame::Frame;
use crate::error::{PipelineError, Result};

pub const DEFAULT_CAPACITY: usize = 100;

/// Bits of the packed window holding the fill count
const FILL_BITS: u32 = 20;
const FILL_MASK: u64 = (1 << FILL_BITS) - 1;
/// Largest capacity the packed window can describe
pub const MAX_CAPACITY: usize = FILL_MASK as usize;
/// Largest sequence number the packed window can describe
pub const MAX_SEQ: u64 = u64::MAX >> FILL_BITS;

fn pack(head: u64, fill: u64) -> u64 {
    (head << FILL_BITS) | fill
}

fn unpack(window: u64) -> (u64, u64) {
    (window >> FILL_BITS, window & FILL_MASK)
}

#[derive(Debug)]
pub struct FrameRingBuffer {
    slots: Box<[RwLock<Option<Frame>>]>,
    /// Newest sequence number (0 when nothing was pushed) and fill, packed
    window: AtomicU64,
    epoch: AtomicU64,
    pushed: AtomicU64,
}

impl FrameRingBuffer {
    /// Create a buffer holding `capacity` frames (clamped to `1..=MAX_CAPACITY`).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        let slots = (0..capacity).map(|_| RwLock::new(None)).collect::<Vec<_>>();
        debug!("FrameRingBuffer created: capacity={}", capacity);
        Self {
            slots: slots.into_boxed_slice(),
            window: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            pushed: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, seq: u64) -> &RwLock<Option<Frame>> {
        &self.slots[(seq % self.slots.len() as u64) as usize]
    }

    /// Consistent `(head, fill)` snapshot
    fn snapshot(&self) -> (u64, u64) {
        unpack(self.window.load(Ordering::Acquire))
    }

    fn store(&self, seq: u64, frame: Option<Frame>) {
        *self.slot(seq).write().unwrap_or_else(|e| e.into_inner()) = frame;
    }

    /// Insert `frame` at the head, evicting the oldest one when full.
    ///
    /// Never blocks beyond a slot swap. Returns `false` (and ignores the frame)
    /// when its sequence number is not newer than the current head. A jump in
    /// sequence numbers restarts the window at the new frame.
    pub fn push(&self, frame: Frame) -> bool {
        let seq = frame.sequence();
        let (head, fill) = self.snapshot();

        if seq == 0 || seq <= head || seq > MAX_SEQ {
            warn!("Ring push ignored: seq {} not after head {}", seq, head);
            return false;
        }

        let new_fill = if fill > 0 && seq != head + 1 {
            debug!("Ring sequence gap {} -> {}, restarting window", head, seq);
            self.clear_slots();
            1
        } else {
            (fill + 1).min(self.capacity() as u64)
        };

        self.store(seq, Some(frame));
        self.window.store(pack(seq, new_fill), Ordering::Release);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        trace!("Ring push seq={} fill={}", seq, new_fill);
        true
    }

    /// Frame with sequence number `seq`, if it is inside the retained window.
    pub fn get(&self, seq: u64) -> Result<Frame> {
        let (head, fill) = self.snapshot();
        if fill == 0 || seq > head || seq.saturating_add(fill) <= head {
            return Err(PipelineError::NotInBuffer { seq });
        }

        let guard = self.slot(seq).read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(frame) if frame.sequence() == seq => Ok(frame.clone()),
            // Overwritten or cleared since the counters were read
            _ => Err(PipelineError::NotInBuffer { seq }),
        }
    }

    /// Frame `n` pushes back from the newest; `rewind(1)` is the latest frame.
    pub fn rewind(&self, n: u64) -> Result<Frame> {
        if n == 0 {
            return Err(PipelineError::InvalidArgument("rewind depth must be at least 1".into()));
        }
        let (head, fill) = self.snapshot();
        if n > fill {
            return Err(PipelineError::InsufficientHistory {
                requested: n,
                available: fill,
            });
        }
        // fill <= head within one snapshot, so this cannot underflow
        self.get(head + 1 - n)
    }

    pub fn latest(&self) -> Option<Frame> {
        self.rewind(1).ok()
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.range().is_some_and(|(tail, head)| seq >= tail && seq <= head)
    }

    /// Number of occupied slots (0..=capacity).
    pub fn fill_level(&self) -> usize {
        self.snapshot().1 as usize
    }

    pub fn fill_fraction(&self) -> f32 {
        self.fill_level() as f32 / self.capacity() as f32
    }

    pub fn is_empty(&self) -> bool {
        self.fill_level() == 0
    }

    /// Newest sequence number, 0 if nothing was pushed in this epoch.
    pub fn head_seq(&self) -> u64 {
        self.snapshot().0
    }

    /// Oldest retained sequence number
    pub fn tail_seq(&self) -> Option<u64> {
        self.range().map(|(tail, _)| tail)
    }

    /// Retained window `(oldest, newest)`, inclusive
    pub fn range(&self) -> Option<(u64, u64)> {
        let (head, fill) = self.snapshot();
        (fill > 0).then(|| (head + 1 - fill, head))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Total frames accepted since construction
    pub fn total_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Drop every frame and start a new epoch whose first push is `next_seq`.
    ///
    /// Producer-side only. Frames already handed to readers stay alive.
    pub fn reset(&self, next_seq: u64) {
        let head = next_seq.saturating_sub(1).min(MAX_SEQ);
        self.window.store(pack(head, 0), Ordering::Release);
        self.clear_slots();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Ring reset: epoch={} next_seq={}", epoch, next_seq);
    }

    fn clear_slots(&self) {
        for slot in self.slots.iter() {
            *slot.write().unwrap_or_else(|e| e.into_inner()) = None;
        }
    }
}
