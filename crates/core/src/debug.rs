//! Snapshot dumps for aborted runs.

use std::path::{Path, PathBuf};

use crate::types::ScreenSnapshot;

/// `<dir>/<instance>/<task>-<timestamp>.png`
pub fn capture_path(dir: &Path, instance: &str, task: &str) -> PathBuf {
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
    dir.join(instance).join(format!("{}-{}.png", task, ts))
}

/// Write the snapshot as PNG. BGRA rows are reordered to RGBA.
#[cfg(feature = "debug-capture")]
pub fn save_snapshot(dir: &Path, instance: &str, task: &str, snapshot: &ScreenSnapshot) -> anyhow::Result<PathBuf> {
    use anyhow::{bail, Context};

    if !snapshot.has_pixels() {
        bail!("snapshot {} carries no pixels", snapshot.seq);
    }
    let (w, h) = (snapshot.width as usize, snapshot.height as usize);
    let stride = snapshot.bytes_per_row as usize;
    if stride < w * 4 {
        bail!("row stride {} too small for width {}", stride, w);
    }
    let mut rgba = Vec::with_capacity(w * h * 4);
    for row in snapshot.data.chunks(stride).take(h) {
        for px in row[..w * 4].chunks_exact(4) {
            rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    let img = image::RgbaImage::from_raw(snapshot.width, snapshot.height, rgba)
        .context("pixel buffer does not match snapshot size")?;

    let path = capture_path(dir, instance, task);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    img.save(&path).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(not(feature = "debug-capture"))]
pub fn save_snapshot(_dir: &Path, _instance: &str, _task: &str, _snapshot: &ScreenSnapshot) -> anyhow::Result<PathBuf> {
    anyhow::bail!("built without the debug-capture feature")
}
