// Split raw image segment discovery (.001, .002, .003, ...)

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult};

/// Check if a file name carries a three-digit segment extension
pub fn is_numbered_segment(path: &str) -> bool {
    extract_segment_number(path).is_some()
}

/// Segment number from a `.NNN` extension
pub fn extract_segment_number(path: &str) -> Option<u32> {
    let ext = Path::new(path).extension()?.to_str()?;
    if ext.len() == 3 && ext.chars().all(|c| c.is_ascii_digit()) {
        ext.parse().ok()
    } else {
        None
    }
}

/// Discover every segment belonging to the image that `path` is part of.
///
/// Any segment of a split set may be given; segments are returned sorted by
/// number. A path without a numbered extension is a single-segment image.
pub fn discover_numbered_segments(path: &Path) -> EngineResult<Vec<PathBuf>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| EngineError::InvalidImage(format!("Invalid image path: {}", path.display())))?;

    if !is_numbered_segment(&name) {
        if !path.exists() {
            return Err(EngineError::InvalidImage(format!("Image not found: {}", path.display())));
        }
        debug!(path = %path.display(), "Single file (non-segmented)");
        return Ok(vec![path.to_path_buf()]);
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let base_lower = name[..name.len() - 4].to_lowercase();
    trace!(?dir, base = %base_lower, "Scanning for numbered segments");

    // Case-insensitive scan, so IMAGE.001 and image.002 join the same set
    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if file_name.len() != base_lower.len() + 4 {
            continue;
        }
        match file_name.get(..base_lower.len()) {
            Some(prefix) if prefix.to_lowercase() == base_lower => {}
            _ => continue,
        }
        if let Some(num) = extract_segment_number(&file_name) {
            found.push((num, entry.path()));
        }
    }
    found.sort_by_key(|(num, _)| *num);

    // Stop at the first gap in the sequence
    let mut segments = Vec::with_capacity(found.len());
    for (expected, (num, seg_path)) in (1u32..).zip(found) {
        if num != expected {
            break;
        }
        segments.push(seg_path);
    }

    if segments.is_empty() {
        return Err(EngineError::InvalidImage(format!(
            "No segments found starting at .001 for {}",
            path.display()
        )));
    }
    debug!(segment_count = segments.len(), "Found numbered segments");
    Ok(segments)
}
