use framepipe::cli::{Args, Command};
use framepipe::config::{CONFIG_FILE_NAME, PipelineConfig};
use framepipe::core::pipeline_events::{ErrorEvent, PlaybackChanged, SourceStalled};
use framepipe::core::player::PlaybackMode;
use framepipe::entities::effects::{AlgorithmId, ProcessingConfig};
use framepipe::entities::loader::Loader;
use framepipe::paths::{self, PathConfig};
use framepipe::sources::camera::test_pattern;
use framepipe::sources::study::write_study;
use framepipe::sources::DataSource;
use framepipe::{Pipeline, PipelineStatus, Subscriber};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    // Create path configuration from CLI args and environment
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());

    init_logging(&args, &path_config)?;
    info!("framepipe {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);

    match &args.command {
        Some(Command::Generate {
            out,
            frames,
            width,
            height,
            fps,
            study_only,
        }) => generate(out, *frames, *width, *height, *fps, *study_only),
        Some(Command::Info { source }) => print_info(source),
        None if args.list_algorithms => {
            list_algorithms();
            Ok(())
        }
        None => run(&args, &path_config),
    }
}

fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = match log_path_opt {
            Some(path) => path.clone(),
            None => {
                paths::ensure_config_dir(path_config)?;
                paths::config_file("framepipe.log", path_config)
            }
        };
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn list_algorithms() {
    for &algorithm in AlgorithmId::all() {
        let sizes: Vec<String> = ProcessingConfig::presets()
            .iter()
            .filter(|p| p.algorithm == algorithm && algorithm != AlgorithmId::Identity)
            .map(|p| format!("{0}x{0}", p.mask.size))
            .collect();
        if sizes.is_empty() {
            println!("{:<12} {}", algorithm.as_str(), algorithm.display_name());
        } else {
            println!("{:<12} {} ({})", algorithm.as_str(), algorithm.display_name(), sizes.join(", "));
        }
    }
}

fn generate(out: &Path, frames: u64, width: usize, height: usize, fps: f32, study_only: bool) -> Result<()> {
    if frames == 0 || width == 0 || height == 0 {
        bail!("frames, width and height must be positive");
    }
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let images: Vec<_> = (0..frames)
        .into_par_iter()
        .map(|i| test_pattern(width, height, i, frames))
        .collect();

    if !study_only {
        let seq_dir = out.join("sequence");
        std::fs::create_dir_all(&seq_dir)?;
        images
            .par_iter()
            .enumerate()
            .try_for_each(|(i, image)| Loader::save_png(image, &seq_dir.join(format!("frame.{:04}.png", i + 1))))?;
        println!("Wrote {} frames to {}", frames, seq_dir.display());
    }

    let study = out.join("study.mfs");
    write_study(&study, &images, fps)?;
    println!("Wrote study {}", study.display());
    Ok(())
}

fn print_info(path: &Path) -> Result<()> {
    let spec = framepipe::cli::spec_for_path(path)?;
    let mut source = spec.build(PipelineConfig::default().camera_timeout());
    source.open()?;
    let d = source.descriptor();
    source.close();

    println!("Kind:       {:?}", d.kind);
    println!("Name:       {}", d.name);
    println!("Resolution: {}x{}", d.width, d.height);
    match d.frame_count {
        Some(n) => println!("Frames:     {}", n),
        None => println!("Frames:     live"),
    }
    println!("Native FPS: {}", d.native_fps);
    println!("Seekable:   {}", d.seekable);
    Ok(())
}

fn run(args: &Args, path_config: &PathConfig) -> Result<()> {
    let spec = args.source_spec()?;
    let config = args.apply_overrides(PipelineConfig::load_default(path_config)?)?;
    info!(
        "Config path: {}",
        paths::config_file(CONFIG_FILE_NAME, path_config).display()
    );

    if args.save_config {
        paths::ensure_config_dir(path_config)?;
        let path = paths::config_file(CONFIG_FILE_NAME, path_config);
        config.save(&path)?;
        println!("Saved config to {}", path.display());
    }

    if let Some(dir) = &args.dump_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let mut pipeline = Pipeline::new(config)?;
    let finished = Arc::new(AtomicBool::new(false));
    let frames_seen = Arc::new(AtomicU64::new(0));

    let dump_dir: Option<PathBuf> = args.dump_dir.clone();
    let seen = Arc::clone(&frames_seen);
    pipeline.subscribe(
        Subscriber::new()
            .on_frame(move |e| {
                seen.fetch_add(1, Ordering::Relaxed);
                if let Some(dir) = &dump_dir {
                    let path = dir.join(format!("out.{:06}.png", e.position));
                    if let Err(err) = Loader::save_png(e.frame.image(), &path) {
                        warn!("Failed to write {}: {}", path.display(), err);
                    }
                }
            })
            .on_error(|e: &ErrorEvent| {
                if e.fatal {
                    error!("Fatal: {}", e.error);
                } else {
                    warn!("{}", e.error);
                }
            }),
    );
    let done = Arc::clone(&finished);
    pipeline.events().subscribe::<PlaybackChanged, _>(move |e| {
        if e.0.mode == PlaybackMode::Paused {
            done.store(true, Ordering::Release);
        }
    });
    pipeline.events().subscribe::<SourceStalled, _>(|e| {
        warn!("Source stalled ({} timeouts of {:?})", e.consecutive_timeouts, e.timeout);
    });

    pipeline.start_spec(&spec)?;
    let live = pipeline.descriptor().is_some_and(|d| !d.is_finite());

    if let Some(start) = args.start.filter(|_| !live) {
        let position = pipeline.seek(start)?;
        info!("Starting at position {}", position);
        // Wait for the seek to settle before playing
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.playback().mode == PlaybackMode::Seeking && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        finished.store(false, Ordering::Release);
    }
    pipeline.play()?;

    let limit = args.run_limit(live);
    let started = Instant::now();
    loop {
        std::thread::sleep(Duration::from_millis(20));
        if let PipelineStatus::Failed(e) = pipeline.status() {
            pipeline.stop();
            bail!("pipeline failed: {}", e);
        }
        if limit.is_some_and(|l| started.elapsed() >= l) {
            break;
        }
        if limit.is_none() && finished.load(Ordering::Acquire) && pipeline.playback().mode != PlaybackMode::Playing {
            break;
        }
    }

    let playback = pipeline.playback();
    let stats = pipeline.stats();
    let fill = pipeline.fill_level();
    pipeline.stop();

    info!(
        "Done after {:.2}s at position {}: {} frames seen",
        started.elapsed().as_secs_f64(),
        playback.position,
        frames_seen.load(Ordering::Relaxed)
    );
    let report = serde_json::json!({
        "playback": playback,
        "stats": stats,
        "fill_level": fill,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
