use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::entities::effects::{MaskParams, ProcessingConfig};
use crate::error::{PipelineError, Result};
use crate::sources::SourceSpec;
use crate::utils::media;

// Build version with target info
const VERSION_INFO: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\n",
    "Sources: camera (synthetic), image sequence (png/jpeg/tiff/bmp), study (.mfs)"
);

/// Frame acquisition and playback pipeline
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None, args_conflicts_with_subcommands = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Directory of numbered images, or a study file (.mfs)
    #[arg(value_name = "SOURCE")]
    pub source: Option<PathBuf>,

    /// Use the built-in synthetic camera instead of a file source
    #[arg(short = 's', long = "synthetic", conflicts_with = "source")]
    pub synthetic: bool,

    /// Synthetic camera size
    #[arg(long = "size", value_names = ["WIDTH", "HEIGHT"], num_args = 2, default_values_t = [640, 480])]
    pub size: Vec<usize>,

    /// Playback rate (also the synthetic camera rate)
    #[arg(long = "fps", value_name = "FPS")]
    pub fps: Option<f32>,

    /// Loop finite sources
    #[arg(short = 'o', long = "loop")]
    pub loop_playback: bool,

    /// Processing algorithm (see --list-algorithms)
    #[arg(short = 'a', long = "algorithm", value_name = "NAME")]
    pub algorithm: Option<String>,

    /// Mask size for the algorithm (3 or 5)
    #[arg(short = 'm', long = "mask-size", value_name = "N")]
    pub mask_size: Option<u8>,

    /// Ring buffer capacity in frames
    #[arg(long = "capacity", value_name = "FRAMES")]
    pub capacity: Option<usize>,

    /// Start position (0-based) for finite sources
    #[arg(long = "start", value_name = "N")]
    pub start: Option<u64>,

    /// Stop after this many seconds (default: end of a finite source, 5s for cameras)
    #[arg(short = 'd', long = "duration", value_name = "SECONDS")]
    pub duration: Option<f64>,

    /// Write every delivered frame as PNG into this directory
    #[arg(long = "dump", value_name = "DIR")]
    pub dump_dir: Option<PathBuf>,

    /// Print the available algorithms and exit
    #[arg(long = "list-algorithms")]
    pub list_algorithms: bool,

    /// Save the effective configuration to framepipe.json in the config directory
    #[arg(long = "save-config")]
    pub save_config: bool,

    /// Enable debug logging to file (default: framepipe.log in the config directory)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a test-pattern image sequence and study file
    Generate {
        /// Output directory (created if missing)
        #[arg(value_name = "DIR")]
        out: PathBuf,

        /// Number of frames
        #[arg(short = 'n', long = "frames", default_value_t = 150)]
        frames: u64,

        #[arg(long = "width", default_value_t = 320)]
        width: usize,

        #[arg(long = "height", default_value_t = 240)]
        height: usize,

        /// Native frame rate stored in the study header
        #[arg(long = "fps", default_value_t = 30.0)]
        fps: f32,

        /// Skip the PNG sequence, write only the study file
        #[arg(long = "study-only")]
        study_only: bool,
    },
    /// Open a source and print its description
    Info {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,
    },
}

impl Args {
    /// Source to run, from the positional path or `--synthetic`.
    pub fn source_spec(&self) -> Result<SourceSpec> {
        if self.synthetic {
            return Ok(SourceSpec::Synthetic {
                width: self.size.first().copied().unwrap_or(640),
                height: self.size.get(1).copied().unwrap_or(480),
                fps: self.fps.unwrap_or(30.0),
            });
        }
        match &self.source {
            Some(path) => spec_for_path(path),
            None => Err(PipelineError::InvalidArgument(
                "no source given (pass a directory, a study file or --synthetic)".into(),
            )),
        }
    }

    /// Apply command-line overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, mut config: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(capacity) = self.capacity {
            config.capacity = capacity;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if self.loop_playback {
            config.loop_enabled = true;
        }
        if self.algorithm.is_some() || self.mask_size.is_some() {
            let mask = self.mask_size.map(|size| MaskParams { size }).unwrap_or(config.processing.mask);
            config.processing = match &self.algorithm {
                Some(name) => ProcessingConfig::select(name, mask)?,
                None => ProcessingConfig::new(config.processing.algorithm, mask)?,
            };
        }
        config.validate()?;
        Ok(config)
    }

    /// Run time limit; `None` means until a finite source finishes.
    pub fn run_limit(&self, live: bool) -> Option<Duration> {
        match self.duration {
            Some(secs) if secs > 0.0 => Some(Duration::from_secs_f64(secs)),
            _ if live => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

/// Pick the source kind from what is on disk.
pub fn spec_for_path(path: &std::path::Path) -> Result<SourceSpec> {
    if path.is_dir() {
        Ok(SourceSpec::ImageSequence { dir: path.to_path_buf() })
    } else if media::is_study(path) {
        Ok(SourceSpec::Study { path: path.to_path_buf() })
    } else if media::is_image(path) {
        // A single frame selects the sequence it belongs to
        let dir = path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."));
        Ok(SourceSpec::ImageSequence { dir })
    } else if path.exists() {
        Ok(SourceSpec::Study { path: path.to_path_buf() })
    } else {
        Err(PipelineError::Source(format!("No such file or directory: {}", path.display())))
    }
}
