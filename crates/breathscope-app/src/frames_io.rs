//! PNG frame directories.

use anyhow::{bail, Context, Result};
use breathscope_core::Frame;
use std::path::{Path, PathBuf};
use tracing::info;

/// Load every `*.png` in `dir`, sorted by file name. All frames must share
/// one size.
pub fn load_dir(dir: &Path) -> Result<(Vec<PathBuf>, Vec<Frame>)> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no PNG frames in {}", dir.display());
    }

    let mut frames = Vec::with_capacity(paths.len());
    for path in &paths {
        let rgba = image::open(path)
            .with_context(|| format!("decoding {}", path.display()))?
            .into_rgba8();
        let (w, h) = rgba.dimensions();
        frames.push(Frame::new(w, h, rgba.into_raw())?);
    }
    info!(count = frames.len(), dir = %dir.display(), "Loaded frames");
    Ok((paths, frames))
}

/// Write `frames` into `dir` using the file names of `names`.
pub fn save_dir(dir: &Path, names: &[PathBuf], frames: &[Frame]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for (name, frame) in names.iter().zip(frames) {
        let file = name
            .file_name()
            .with_context(|| format!("{} has no file name", name.display()))?;
        let out = dir.join(file);
        image::save_buffer(
            &out,
            frame.data(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgba8,
        )
        .with_context(|| format!("writing {}", out.display()))?;
    }
    info!(count = frames.len(), dir = %dir.display(), "Wrote frames");
    Ok(())
}
