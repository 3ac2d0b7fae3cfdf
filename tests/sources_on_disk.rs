//! Image-sequence and study sources read from real files.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use framepipe::entities::frame::{Image, PixelFormat};
use framepipe::entities::loader::Loader;
use framepipe::sources::camera::test_pattern;
use framepipe::sources::study::{StudyHeader, encode_study, write_study};
use framepipe::sources::{DataSource, ReadOutcome, SourceKind};
use framepipe::{Pipeline, PipelineConfig, PipelineError, PlaybackMode, SourceSpec, Subscriber};

fn read_value(outcome: ReadOutcome) -> f32 {
    match outcome {
        ReadOutcome::Frame { image, .. } => image.sample(0, 0, 0),
        ReadOutcome::EndOfStream => panic!("unexpected end of stream"),
    }
}

#[test]
fn sequence_orders_by_frame_number() {
    let dir = tempfile::tempdir().unwrap();
    // Written out of order, with uneven padding
    for (name, value) in [("shot.10.png", 10.0), ("shot.2.png", 2.0), ("shot.0001.png", 1.0)] {
        Loader::save_png(&Image::filled(6, 4, PixelFormat::Gray8, value), &dir.path().join(name)).unwrap();
    }
    // Lower priority extension, ignored while PNGs exist
    std::fs::write(dir.path().join("shot.0003.jpg"), b"not really a jpeg").unwrap();

    let mut source = SourceSpec::ImageSequence { dir: dir.path().to_path_buf() }.build(Duration::from_millis(100));
    source.open().unwrap();
    let d = source.descriptor();
    assert_eq!(d.kind, SourceKind::ImageSequence);
    assert_eq!((d.width, d.height), (6, 4));
    assert_eq!(d.frame_count, Some(3));
    assert!(d.seekable);

    let values: Vec<f32> = (0..3).map(|_| read_value(source.read_next().unwrap())).collect();
    assert_eq!(values, vec![1.0, 2.0, 10.0]);
    assert!(matches!(source.read_next().unwrap(), ReadOutcome::EndOfStream));

    source.seek(1).unwrap();
    assert_eq!(read_value(source.read_next().unwrap()), 2.0);
    assert!(matches!(source.seek(3), Err(PipelineError::OutOfRange { .. })));

    source.close();
    source.close();
    assert!(matches!(source.read_next(), Err(PipelineError::Source(_))));
}

#[test]
fn study_container_layout() {
    let frames: Vec<Image> = (0..4).map(|i| Image::filled(3, 2, PixelFormat::Gray16, i as f32 * 1000.0)).collect();
    let bytes = encode_study(&frames, 25.0).unwrap();
    let header = StudyHeader::decode(&bytes).unwrap();
    assert_eq!(header.frame_count, 4);
    assert_eq!(header.format, PixelFormat::Gray16);
    assert_eq!(header.frame_bytes(), 3 * 2 * 2);
    assert_eq!(bytes.len() as u64, header.frame_offset(4));
}

#[test]
fn study_timestamps_follow_native_rate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.mfs");
    let frames: Vec<Image> = (0..5).map(|i| test_pattern(16, 12, i, 5)).collect();
    write_study(&path, &frames, 10.0).unwrap();

    let mut source = SourceSpec::Study { path }.build(Duration::from_millis(100));
    source.open().unwrap();
    source.seek(3).unwrap();
    match source.read_next().unwrap() {
        ReadOutcome::Frame { image, timestamp } => {
            assert_eq!(timestamp, Duration::from_secs_f64(3.0 / 10.0));
            assert_eq!(image.format(), PixelFormat::Rgb8);
            assert_eq!(image.buffer(), frames[3].buffer());
        }
        ReadOutcome::EndOfStream => panic!("expected a frame"),
    }
    source.close();
}

#[test]
fn pipeline_over_image_sequence() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..12u32 {
        let image = Image::filled(5, 5, PixelFormat::Gray8, (i * 10) as f32);
        Loader::save_png(&image, &dir.path().join(format!("f.{:04}.png", i + 1))).unwrap();
    }

    let mut pipeline = Pipeline::new(PipelineConfig { capacity: 4, fps: 120.0, ..Default::default() }).unwrap();
    let values = Arc::new(Mutex::new(Vec::new()));
    let v = Arc::clone(&values);
    pipeline.subscribe(Subscriber::new().on_frame(move |e| {
        v.lock().unwrap().push((e.position, e.frame.image().sample(2, 2, 0)));
    }));

    pipeline.start_spec(&SourceSpec::ImageSequence { dir: dir.path().to_path_buf() }).unwrap();
    pipeline.play().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while pipeline.playback().mode != PlaybackMode::Paused && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    pipeline.stop();

    let values = values.lock().unwrap();
    assert_eq!(values.len(), 12);
    for (position, value) in values.iter() {
        assert_eq!(*value, (*position * 10) as f32);
    }
}
