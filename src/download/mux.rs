//! ffmpeg 调用：m3u8 直链拉流并封装为单个文件。

use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::models::DownloadError;
use crate::base_system::context::Config;

#[derive(Debug, Clone)]
pub struct Muxer {
    program: String,
    user_agent: String,
    audio_codec: String,
}

impl Muxer {
    pub fn new(program: &str, user_agent: &str, audio_codec: &str) -> Self {
        Self {
            program: program.to_string(),
            user_agent: user_agent.to_string(),
            audio_codec: audio_codec.to_string(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(&cfg.ffmpeg_path, &cfg.user_agent, &cfg.audio_codec)
    }

    /// With an audio playlist the video is copied and the audio re-encoded;
    /// without one the single input is stream-copied as a whole.
    pub fn command_args(
        &self,
        video_url: &str,
        audio_url: Option<&str>,
        out: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-user_agent"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(OsString::from(&self.user_agent));

        match audio_url {
            Some(audio) => {
                let codec = self.audio_codec.as_str();
                for a in ["-i", video_url, "-i", audio, "-c:v", "copy", "-c:a", codec] {
                    args.push(OsString::from(a));
                }
            }
            None => {
                for a in ["-i", video_url, "-c", "copy"] {
                    args.push(OsString::from(a));
                }
            }
        }
        args.push(out.as_os_str().to_os_string());
        args
    }

    /// Runs ffmpeg to completion. The caller reads `out` afterwards.
    pub fn download_via_mux(
        &self,
        video_url: &str,
        audio_url: Option<&str>,
        out: &Path,
    ) -> Result<(), DownloadError> {
        let args = self.command_args(video_url, audio_url, out);
        let inputs = if audio_url.is_some() { 2 } else { 1 };
        debug!(target: "ffmpeg", inputs, "starting {}", self.program);
        run_tool(&self.program, &args)
    }
}

fn run_tool(program: &str, args: &[OsString]) -> Result<(), DownloadError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| DownloadError::Mux(format!("failed to start {program}: {e}")))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    warn!(target: "ffmpeg", status = %output.status, "{stderr}");
    if stderr.is_empty() {
        Err(DownloadError::Mux("ffmpeg failed".to_string()))
    } else {
        Err(DownloadError::Mux(stderr.to_string()))
    }
}
