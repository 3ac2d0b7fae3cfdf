//! Single producer, many readers: no torn frames, window stays consistent.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use framepipe::entities::frame::{Frame, Image, PixelBuffer, PixelFormat};
use framepipe::{FrameRingBuffer, PipelineError};

const CAPACITY: usize = 16;
const PUSHES: u64 = 20_000;

/// Every sample of frame `seq` carries the same value derived from `seq`.
fn frame(seq: u64) -> Frame {
    let v = (seq % 251) as u8;
    let image = Image::new(8, 8, PixelFormat::Gray8, PixelBuffer::U8(vec![v; 64])).unwrap();
    Frame::new(seq, Duration::from_millis(seq), image)
}

fn assert_intact(f: &Frame) {
    let expected = (f.sequence() % 251) as u8;
    let PixelBuffer::U8(data) = f.image().buffer() else {
        panic!("unexpected buffer type");
    };
    assert!(data.iter().all(|&v| v == expected), "torn frame {}", f.sequence());
    assert_eq!(f.timestamp(), Duration::from_millis(f.sequence()));
}

#[test]
fn concurrent_get_never_sees_torn_frames() {
    let ring = Arc::new(FrameRingBuffer::new(CAPACITY));
    let done = Arc::new(AtomicBool::new(false));
    let hits = Arc::new(AtomicU64::new(0));

    let readers: Vec<_> = (0..6)
        .map(|r| {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            let hits = Arc::clone(&hits);
            thread::spawn(move || {
                let mut n = r as u64;
                while !done.load(Ordering::Acquire) {
                    let head = ring.head_seq();
                    // Pseudo-random offsets, some deliberately outside the window
                    n = n.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let back = (n >> 33) % (CAPACITY as u64 + 4);
                    let seq = head.saturating_sub(back);
                    match ring.get(seq) {
                        Ok(f) => {
                            assert_eq!(f.sequence(), seq);
                            assert_intact(&f);
                            hits.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(PipelineError::NotInBuffer { .. }) => {}
                        Err(e) => panic!("unexpected error {e}"),
                    }
                    if let Ok(f) = ring.rewind(1 + back % CAPACITY as u64) {
                        assert_intact(&f);
                    }
                    if let Some((tail, head)) = ring.range() {
                        assert!(head >= tail);
                        assert!(head - tail < CAPACITY as u64);
                    }
                    if r % 2 == 0 {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for seq in 1..=PUSHES {
        assert!(ring.push(frame(seq)));
        if seq % 1000 == 0 {
            thread::sleep(Duration::from_micros(200));
        }
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert!(hits.load(Ordering::Relaxed) > 0);
    assert_eq!(ring.fill_level(), CAPACITY);
    assert_eq!(ring.head_seq(), PUSHES);
    assert_eq!(ring.total_pushed(), PUSHES);
}

/// Reader checks that hold at any instant, whatever the producer is doing.
fn check_window(ring: &FrameRingBuffer) {
    if let Some((tail, head)) = ring.range() {
        assert!(tail >= 1, "tail {tail} below first sequence");
        assert!(head >= tail, "window ({tail}, {head}) inverted");
        assert!(head - tail < ring.capacity() as u64);
    }
    for n in 1..=3 {
        match ring.rewind(n) {
            Ok(f) => assert_intact(&f),
            Err(PipelineError::InsufficientHistory { requested, available }) => {
                assert_eq!(requested, n);
                assert!(available < n);
            }
            // Evicted or cleared between the window read and the slot read
            Err(PipelineError::NotInBuffer { .. }) => {}
            Err(e) => panic!("unexpected error {e}"),
        }
    }
}

#[test]
fn window_reads_race_fill_growth() {
    for _ in 0..2_000 {
        let ring = FrameRingBuffer::new(8);
        let done = AtomicBool::new(false);
        thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    check_window(&ring);
                }
                check_window(&ring);
            });
            for seq in 1..=6 {
                assert!(ring.push(frame(seq)));
            }
            done.store(true, Ordering::Release);
        });
        assert_eq!(ring.range(), Some((1, 6)));
    }
}

#[test]
fn reads_stay_consistent_across_resets() {
    let ring = Arc::new(FrameRingBuffer::new(CAPACITY));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|r| {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut n = r as u64 + 1;
                while !done.load(Ordering::Acquire) {
                    check_window(&ring);
                    n = n.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let seq = (n >> 33) % 200 + 1;
                    match ring.get(seq) {
                        Ok(f) => {
                            assert_eq!(f.sequence(), seq);
                            assert_intact(&f);
                        }
                        Err(PipelineError::NotInBuffer { .. }) => {}
                        Err(e) => panic!("unexpected error {e}"),
                    }
                }
            })
        })
        .collect();

    // Bursts of pushes, each followed by a reposition: backwards (loop wrap),
    // forwards (seek ahead) or to the same place
    let mut next = 1u64;
    for round in 0..2_000u64 {
        let burst = 1 + round % (2 * CAPACITY as u64);
        for _ in 0..burst {
            assert!(ring.push(frame(next)));
            next += 1;
        }
        next = match round % 3 {
            0 => 1,
            1 => next + 40,
            _ => next,
        };
        ring.reset(next);
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(ring.epoch(), 2_000);
    assert!(ring.is_empty());
    assert!(ring.push(frame(next)));
    assert_eq!(ring.range(), Some((next, next)));
}

#[test]
fn overflow_keeps_last_capacity_frames() {
    let ring = FrameRingBuffer::new(100);
    for seq in 1..=150 {
        ring.push(frame(seq));
    }
    assert_eq!(ring.fill_level(), 100);
    assert_eq!(ring.range(), Some((51, 150)));
    assert_eq!(ring.get(50).unwrap_err(), PipelineError::NotInBuffer { seq: 50 });
    for seq in 51..=150 {
        assert_eq!(ring.get(seq).unwrap().sequence(), seq);
    }

    // Rewind law: rewind(n) is the frame pushed n-1 pushes before the latest
    for n in 1..=100u64 {
        assert_eq!(ring.rewind(n).unwrap().sequence(), 150 - n + 1);
    }
    assert!(matches!(
        ring.rewind(101),
        Err(PipelineError::InsufficientHistory { requested: 101, available: 100 })
    ));
}
