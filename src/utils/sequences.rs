//! Numbered image sequence discovery
//!
//! Lists the image files of a directory in ascending frame-number order.
//! Extension priority: PNG first; if none, JPEG; if still none, any other
//! format the loader understands.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use log::{debug, info};
use regex::Regex;

use crate::error::{PipelineError, Result};

/// Extension groups, tried in order until one yields files.
const EXTENSION_GROUPS: &[&[&str]] = &[&["png"], &["jpg", "jpeg"], &["tif", "tiff", "bmp"]];

static FRAME_DIGITS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(\d+)").ok());

/// List image files in `dir`, sorted by frame number.
///
/// Files without a number sort after numbered ones, by name.
pub fn list_numbered(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::Source(format!("Not a directory: {}", dir.display())));
    }

    for group in EXTENSION_GROUPS {
        let mut paths = Vec::new();
        for ext in *group {
            paths.extend(glob_ext(dir, ext)?);
            // Upper-case variants on case-sensitive filesystems
            paths.extend(glob_ext(dir, &ext.to_ascii_uppercase())?);
        }
        paths.sort();
        paths.dedup();

        if !paths.is_empty() {
            paths.sort_by(compare_frames);
            info!("Found {} .{} frames in {}", paths.len(), group[0], dir.display());
            return Ok(paths);
        }
    }

    debug!("No image files in {}", dir.display());
    Ok(Vec::new())
}

fn glob_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{}/*.{}", escaped, ext);
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)
        .map_err(|e| PipelineError::Source(format!("Glob error for pattern {}: {}", pattern, e)))?
    {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => return Err(PipelineError::Source(format!("Glob entry error: {}", e))),
        }
    }
    Ok(paths)
}

fn compare_frames(a: &PathBuf, b: &PathBuf) -> Ordering {
    match (frame_number(a), frame_number(b)) {
        (Some(na), Some(nb)) => na.cmp(&nb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Frame number of a file stem: the last group of digits in it.
///
/// Example: "/path/seq.0042.png" -> Some(42), "shot_0003_final.png" -> Some(3),
/// "/path/cover.png" -> None
pub fn frame_number(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let re = FRAME_DIGITS.as_ref()?;
    re.find_iter(stem).last()?.as_str().parse().ok()
}
