//! Consumer-facing delivery path.
//!
//! Processed frames travel through a bounded queue with a drop-oldest policy:
//! the processing thread never waits on the consumer. When the queue is full
//! the producer pops the oldest entry itself (it holds a receiver clone) and
//! retries. Notices (errors, fill level, stalls, playback changes) use a
//! separate unbounded channel so they are never dropped behind frames.
//!
//! The delivery thread waits on both channels with `select!` and hands each
//! item to the `EventBus`, which runs subscriber callbacks on that thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, never, select};
use log::{debug, trace};

use super::event_bus::EventBus;
use super::pipeline_events::{ErrorEvent, FillLevelChanged, FrameDelivered, PlaybackChanged, SourceStalled};

/// Producer half of a bounded drop-oldest queue.
#[derive(Debug)]
pub struct DeliveryQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
        }
    }
}

/// Create a queue holding at most `capacity` items (at least 1).
pub fn delivery_queue<T>(capacity: usize) -> (DeliveryQueue<T>, Receiver<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    (
        DeliveryQueue {
            tx,
            rx: rx.clone(),
            capacity,
        },
        rx,
    )
}

impl<T> DeliveryQueue<T> {
    /// Enqueue without blocking. Returns how many old items were dropped.
    pub fn push(&self, item: T) -> usize {
        let mut item = item;
        let mut dropped = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => return dropped,
                Err(TrySendError::Full(back)) => {
                    item = back;
                    if self.rx.try_recv().is_ok() {
                        dropped += 1;
                    }
                }
                // Unreachable while we hold a receiver; count the item as lost
                Err(TrySendError::Disconnected(_)) => return dropped + 1,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Out-of-band messages from the acquisition and processing threads
#[derive(Clone, Debug)]
pub enum Notice {
    Error(ErrorEvent),
    FillLevel(FillLevelChanged),
    Stalled(SourceStalled),
    Playback(PlaybackChanged),
}

/// Delivery thread body. Returns once both channels are closed and drained.
pub fn delivery_loop(
    frames: Receiver<FrameDelivered>,
    notices: Receiver<Notice>,
    bus: EventBus,
    delivered: Arc<AtomicU64>,
) {
    let idle_frames = never::<FrameDelivered>();
    let idle_notices = never::<Notice>();
    let mut frames = Some(frames);
    let mut notices = Some(notices);

    while frames.is_some() || notices.is_some() {
        let mut frames_closed = false;
        let mut notices_closed = false;
        select! {
            recv(frames.as_ref().unwrap_or(&idle_frames)) -> msg => match msg {
                Ok(event) => {
                    trace!("Delivering frame at position {}", event.position);
                    delivered.fetch_add(1, Ordering::Relaxed);
                    bus.emit(event);
                }
                Err(_) => frames_closed = true,
            },
            recv(notices.as_ref().unwrap_or(&idle_notices)) -> msg => match msg {
                Ok(notice) => dispatch_notice(&bus, notice),
                Err(_) => notices_closed = true,
            },
        }
        if frames_closed {
            frames = None;
        }
        if notices_closed {
            notices = None;
        }
    }
    debug!("Delivery loop finished");
}

fn dispatch_notice(bus: &EventBus, notice: Notice) {
    match notice {
        Notice::Error(e) => bus.emit(e),
        Notice::FillLevel(e) => bus.emit(e),
        Notice::Stalled(e) => bus.emit(e),
        Notice::Playback(e) => bus.emit(e),
    }
}
