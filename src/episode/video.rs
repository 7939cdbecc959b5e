//! Per-episode video through an external `ffmpeg` process.
//!
//! Frames are piped to ffmpeg's stdin as PNG (`image2pipe`), so the harness
//! never touches pixel data. The first frame fixes the video size; later
//! frames with a different size are dropped. Video is best-effort: if ffmpeg
//! cannot be started or dies, the recorder disables itself and the episode
//! carries on.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, warn};

use crate::config::VideoConfig;
use crate::env::Frame;

pub const VIDEO_FILE_NAME: &str = "video.mp4";

enum State {
    /// Waiting for the first frame.
    Idle,
    Recording(Encoder),
    Disabled,
}

struct Encoder {
    child: Child,
    stdin: ChildStdin,
    size: (u32, u32),
}

pub struct VideoRecorder {
    config: VideoConfig,
    path: PathBuf,
    state: State,
    frames: usize,
    dropped: usize,
}

impl VideoRecorder {
    /// A recorder writing `video.mp4` into `episode_dir`.
    pub fn new(config: &VideoConfig, episode_dir: &Path) -> Self {
        let state = if config.enabled { State::Idle } else { State::Disabled };
        Self {
            config: config.clone(),
            path: episode_dir.join(VIDEO_FILE_NAME),
            state,
            frames: 0,
            dropped: 0,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames
    }

    pub fn frames_dropped(&self) -> usize {
        self.dropped
    }

    /// Append a frame. Never fails; problems are logged and disable video.
    pub async fn push(&mut self, frame: &Frame) {
        if matches!(self.state, State::Idle) {
            self.state = match self.spawn(frame.dimensions()) {
                Ok(encoder) => State::Recording(encoder),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "video disabled for this episode");
                    State::Disabled
                }
            };
        }

        let State::Recording(encoder) = &mut self.state else {
            return;
        };

        if frame.dimensions() != encoder.size {
            warn!(
                expected = ?encoder.size,
                got = ?frame.dimensions(),
                "frame size changed, dropping frame from video"
            );
            self.dropped += 1;
            return;
        }

        if let Err(e) = encoder.stdin.write_all(frame.png_bytes()).await {
            warn!(error = %e, "ffmpeg stopped accepting frames, video disabled");
            self.state = State::Disabled;
            return;
        }
        self.frames += 1;
    }

    /// Close the stream and wait for ffmpeg. Returns the video path if one was
    /// written.
    pub async fn finish(&mut self) -> Result<Option<PathBuf>> {
        let State::Recording(Encoder { child, stdin, .. }) =
            std::mem::replace(&mut self.state, State::Disabled)
        else {
            return Ok(None);
        };
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .context("failed waiting for ffmpeg")?;
        if !output.status.success() {
            warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "ffmpeg failed to encode video"
            );
            return Ok(None);
        }

        debug!(path = %self.path.display(), frames = self.frames, dropped = self.dropped, "video written");
        Ok(Some(self.path.clone()))
    }

    fn spawn(&self, size: (u32, u32)) -> Result<Encoder> {
        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(ffmpeg_args(&self.config, &self.path))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.config.ffmpeg_path.display()))?;

        let stdin = child.stdin.take().context("ffmpeg stdin is unavailable")?;
        Ok(Encoder { child, stdin, size })
    }
}

fn ffmpeg_args(config: &VideoConfig, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "image2pipe".into(),
        "-framerate".into(),
        config.fps.to_string(),
        "-c:v".into(),
        "png".into(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        config.codec.clone(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output.display().to_string(),
    ]
}
