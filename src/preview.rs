use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::media::MAX_STICKER_EDGE;

/// Compose a short MP4 clip for the announcement: the representative sticker
/// centered over a solid black square background. Requires `ffmpeg` in PATH;
/// callers treat failure as non-fatal and degrade to a text-only post.
pub async fn render_preview(sticker_png: &[u8], workdir: &Path, seconds: u32) -> Result<Vec<u8>> {
    tokio::fs::create_dir_all(workdir)
        .await
        .with_context(|| format!("creating preview workdir: {}", workdir.display()))?;
    let png_path = workdir.join("preview_src.png");
    let mp4_path = workdir.join("preview.mp4");
    tokio::fs::write(&png_path, sticker_png)
        .await
        .context("writing preview source frame")?;

    let background = format!(
        "color=c=black:s={edge}x{edge}:d={seconds}",
        edge = MAX_STICKER_EDGE
    );
    let output = Command::new("ffmpeg")
        .arg("-y")
        .args(["-f", "lavfi", "-i", &background])
        .args(["-loop", "1", "-i"])
        .arg(&png_path)
        .args([
            "-filter_complex",
            "[1]scale=w=min(iw\\,512):h=-1[fg];[0][fg]overlay=(W-w)/2:(H-h)/2",
        ])
        .args(["-t", &seconds.to_string()])
        .args(["-pix_fmt", "yuv420p"])
        .args(["-movflags", "+faststart"])
        .arg(&mp4_path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("spawning ffmpeg (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(%stderr, "ffmpeg failed");
        bail!("ffmpeg exited with {}", output.status);
    }

    tokio::fs::read(&mp4_path)
        .await
        .context("reading rendered preview clip")
}
