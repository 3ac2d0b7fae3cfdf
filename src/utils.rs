//! Utility functions and constants
//!
//! **Used by**: sources, cli

pub mod sequences;

/// Source file type detection
pub mod media {
    use std::path::Path;

    /// Multi-frame study container extensions
    pub const STUDY_EXTS: &[&str] = &["mfs", "study"];

    /// Single-image extensions readable by the loader
    pub const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

    fn has_ext(path: &Path, exts: &[&str]) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|s| exts.contains(&s.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// Check if file is a study container
    pub fn is_study(path: &Path) -> bool {
        has_ext(path, STUDY_EXTS)
    }

    /// Check if file is a single image
    pub fn is_image(path: &Path) -> bool {
        has_ext(path, IMAGE_EXTS)
    }

}
