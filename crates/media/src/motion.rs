//! Motion-picture watermarks through an external transcoder (ffmpeg).

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use {
    tidemark_common::{WatermarkSpec, naming},
    tokio::process::Command,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::error::{Result, WatermarkError};

/// Width the overlay image is scaled to, aspect ratio preserved.
pub const OVERLAY_WIDTH: u32 = 300;
/// Offset of the overlay from the top-left corner.
pub const OVERLAY_OFFSET: u32 = 10;
/// Font size of text overlays on video.
pub const TEXT_FONT_SIZE: u32 = 30;

/// What to burn into a video. Image overlays win over text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MotionMark {
    Image(PathBuf),
    Text(String),
}

impl MotionMark {
    /// `None` when neither an image nor text is configured.
    #[must_use]
    pub fn from_spec(spec: &WatermarkSpec) -> Option<Self> {
        if let Some(path) = &spec.image_path {
            return Some(Self::Image(path.clone()));
        }
        spec.has_text().then(|| Self::Text(spec.text.clone()))
    }
}

/// Runs the configured transcoder binary.
#[derive(Debug, Clone)]
pub struct Transcoder {
    binary: String,
}

impl Transcoder {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Absolute path of the binary, from `PATH` when not already a path.
    pub fn resolve(&self) -> Result<PathBuf> {
        let configured = expand_tilde(&self.binary);
        which::which(&configured).map_err(|source| WatermarkError::ToolUnavailable {
            binary: self.binary.clone(),
            source,
        })
    }

    /// Watermark `data` and return the transcoded bytes.
    ///
    /// Input, output, and the text file live in `work_dir` and are removed
    /// before returning. The child is killed if `cancel` fires.
    pub async fn apply(
        &self,
        data: &[u8],
        file_name: &str,
        mark: &MotionMark,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let binary = self.resolve()?;
        if let MotionMark::Image(path) = mark
            && !path.is_file()
        {
            return Err(WatermarkError::MissingOverlay { path: path.clone() });
        }

        let input = work_dir.join(naming::unique_file_name(file_name));
        let output = work_dir.join(naming::unique_file_name(file_name));
        let text_file = work_dir.join(naming::unique_file_name("watermark.txt"));
        let scratch = Scratch(vec![input.clone(), output.clone(), text_file.clone()]);

        tokio::fs::write(&input, data).await?;
        if let MotionMark::Text(text) = mark {
            tokio::fs::write(&text_file, text).await?;
        }

        let args = build_args(&input, &output, mark, &text_file);
        debug!(binary = %binary.display(), ?args, "running transcoder");

        let mut cmd = Command::new(&binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(WatermarkError::Cancelled),
            out = cmd.output() => out.map_err(|e| WatermarkError::external("failed to spawn transcoder", e))?,
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(WatermarkError::ToolFailed {
                status: result.status.to_string(),
                stderr: last_lines(&stderr, 5),
            });
        }

        let bytes = tokio::fs::read(&output).await?;
        info!(file_name, bytes = bytes.len(), "video watermarked");
        drop(scratch);
        Ok(bytes)
    }
}

/// Transcoder arguments for one overlay.
#[must_use]
pub fn build_args(
    input: &Path,
    output: &Path,
    mark: &MotionMark,
    text_file: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
    match mark {
        MotionMark::Image(image) => {
            args.push("-i".into());
            args.push(image.into());
            args.push("-filter_complex".into());
            args.push(
                format!(
                    "[1:v]scale={OVERLAY_WIDTH}:-1[wm];[0:v][wm]overlay={OVERLAY_OFFSET}:{OVERLAY_OFFSET}"
                )
                .into(),
            );
        },
        MotionMark::Text(_) => {
            args.push("-vf".into());
            args.push(
                format!(
                    "drawtext=textfile='{}':expansion=none:fontcolor=white:fontsize={TEXT_FONT_SIZE}:x={OVERLAY_OFFSET}:y={OVERLAY_OFFSET}",
                    escape_filter_value(&text_file.to_string_lossy())
                )
                .into(),
            );
        },
    }
    args.push("-codec:a".into());
    args.push("copy".into());
    args.push(output.into());
    args
}

/// Escape a value quoted inside a filtergraph option.
fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '\'' | ':' => {
                out.push('\\');
                out.push(c);
            },
            _ => out.push(c),
        }
    }
    out
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = dirs_next::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(path)
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Removes scratch files on every exit path.
struct Scratch(Vec<PathBuf>);

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}
