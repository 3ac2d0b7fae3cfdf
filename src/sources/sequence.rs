//! Directory-of-images source.
//!
//! Files are discovered once on `open()` via [`list_numbered`] and decoded
//! lazily, one per `read_next()`. Dimensions come from the first file's
//! header; every frame must match them.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};

use super::{DataSource, ReadOutcome, SourceDescriptor, SourceKind};
use crate::entities::loader::Loader;
use crate::error::{PipelineError, Result};
use crate::utils::sequences::list_numbered;

/// Image sequences carry no rate of their own.
pub const SEQUENCE_FPS: f32 = 30.0;

/// Bounded, seekable source over a directory of numbered image files.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    width: usize,
    height: usize,
    cursor: u64,
    open: bool,
}

impl ImageSequenceSource {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            files: Vec::new(),
            width: 0,
            height: 0,
            cursor: 0,
            open: false,
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn len(&self) -> u64 {
        self.files.len() as u64
    }
}

impl DataSource for ImageSequenceSource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::ImageSequence,
            name: self.dir.display().to_string(),
            width: self.width,
            height: self.height,
            frame_count: Some(self.len()),
            native_fps: SEQUENCE_FPS,
            seekable: true,
        }
    }

    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let files = list_numbered(&self.dir)?;
        if let Some(first) = files.first() {
            let header = Loader::header(first)?;
            self.width = header.width;
            self.height = header.height;
        }
        info!(
            "Opened sequence {}: {} frames, {}x{}",
            self.dir.display(),
            files.len(),
            self.width,
            self.height
        );
        self.files = files;
        self.cursor = 0;
        self.open = true;
        Ok(())
    }

    fn read_next(&mut self) -> Result<ReadOutcome> {
        if !self.open {
            return Err(PipelineError::Source(format!("Sequence {} not open", self.dir.display())));
        }
        let Some(path) = self.files.get(self.cursor as usize) else {
            return Ok(ReadOutcome::EndOfStream);
        };

        let image = Loader::load(path)?;
        if image.resolution() != (self.width, self.height) {
            return Err(PipelineError::Source(format!(
                "{}: {}x{} does not match sequence size {}x{}",
                path.display(),
                image.width(),
                image.height(),
                self.width,
                self.height
            )));
        }

        let timestamp = Duration::from_secs_f64(self.cursor as f64 / SEQUENCE_FPS as f64);
        self.cursor += 1;
        Ok(ReadOutcome::Frame { image, timestamp })
    }

    fn seek(&mut self, index: u64) -> Result<()> {
        if !self.open {
            return Err(PipelineError::Source(format!("Sequence {} not open", self.dir.display())));
        }
        if index >= self.len() {
            return Err(PipelineError::OutOfRange {
                position: index as i64,
                len: self.len(),
            });
        }
        debug!("Sequence seek {} -> {}", self.cursor, index);
        self.cursor = index;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.files.clear();
            debug!("Closed sequence {}", self.dir.display());
        }
    }

    fn position(&self) -> u64 {
        self.cursor
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::frame::{Image, PixelFormat};

    fn write_frames(dir: &std::path::Path, n: usize) {
        for i in 0..n {
            let img = Image::filled(4, 3, PixelFormat::Gray8, (i * 10) as f32);
            Loader::save_png(&img, &dir.join(format!("frame_{}.png", i + 1))).unwrap();
        }
    }

    #[test]
    fn test_reads_in_order_then_ends() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let mut src = ImageSequenceSource::new(dir.path().to_path_buf());
        src.open().unwrap();

        let d = src.descriptor();
        assert_eq!(d.frame_count, Some(3));
        assert_eq!((d.width, d.height), (4, 3));
        assert!(d.seekable);

        for i in 0..3 {
            match src.read_next().unwrap() {
                ReadOutcome::Frame { image, .. } => assert_eq!(image.sample(0, 0, 0), (i * 10) as f32),
                ReadOutcome::EndOfStream => panic!("ended early"),
            }
        }
        assert!(matches!(src.read_next().unwrap(), ReadOutcome::EndOfStream));
    }

    #[test]
    fn test_seek() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 5);
        let mut src = ImageSequenceSource::new(dir.path().to_path_buf());
        src.open().unwrap();

        src.seek(3).unwrap();
        assert_eq!(src.position(), 3);
        match src.read_next().unwrap() {
            ReadOutcome::Frame { image, timestamp } => {
                assert_eq!(image.sample(1, 1, 0), 30.0);
                assert_eq!(timestamp, Duration::from_secs_f64(3.0 / 30.0));
            }
            ReadOutcome::EndOfStream => panic!("ended early"),
        }
        assert!(matches!(src.seek(5), Err(PipelineError::OutOfRange { position: 5, len: 5 })));
        assert_eq!(src.position(), 4);
    }

    #[test]
    fn test_empty_dir_is_empty_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = ImageSequenceSource::new(dir.path().to_path_buf());
        src.open().unwrap();
        assert_eq!(src.descriptor().frame_count, Some(0));
        assert!(matches!(src.read_next().unwrap(), ReadOutcome::EndOfStream));
    }

    #[test]
    fn test_read_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 1);
        let mut src = ImageSequenceSource::new(dir.path().to_path_buf());
        src.open().unwrap();
        src.close();
        src.close();
        assert!(matches!(src.read_next(), Err(PipelineError::Source(_))));
    }

    #[test]
    fn test_missing_dir_fails_open() {
        let mut src = ImageSequenceSource::new(PathBuf::from("/no/such/dir"));
        assert!(matches!(src.open(), Err(PipelineError::Source(_))));
    }
}
