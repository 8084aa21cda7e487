//! 下载相关的数据模型定义。
//!
//! 包含画质选择、平台/模式、m3u8 流对、下载结果、进度快照与错误类型。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;

use super::normalize::sanitize_output_name;

pub const MIME_MP4: &str = "video/mp4";
pub const MIME_MATROSKA: &str = "video/x-matroska";
pub const MIME_WEBM: &str = "video/webm";

/// MIME type of a merge container named by its extension; unknown ones are served as mp4.
pub fn container_mime(container: &str) -> &'static str {
    match container.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
        "mkv" => MIME_MATROSKA,
        "webm" => MIME_WEBM,
        _ => MIME_MP4,
    }
}

/// Format expression used for any label the lookup does not know.
pub const FALLBACK_FORMAT: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Moodle,
    Crystalink,
}

impl Platform {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "moodle" => Some(Self::Moodle),
            "crystalink" => Some(Self::Crystalink),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMode {
    PageUrl,
    DirectStream,
}

impl DownloadMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "page_url" | "page" => Some(Self::PageUrl),
            "direct_stream" | "stream" | "m3u8" => Some(Self::DirectStream),
            _ => None,
        }
    }

    /// MIME type offered to the browser for this mode's artifact.
    pub fn mime(self) -> &'static str {
        match self {
            Self::PageUrl => MIME_MP4,
            Self::DirectStream => MIME_MATROSKA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Best,
    #[value(name = "720p")]
    #[serde(rename = "720p")]
    P720,
    #[value(name = "480p")]
    #[serde(rename = "480p")]
    P480,
    #[value(name = "audio")]
    #[serde(rename = "audio")]
    AudioOnly,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Self::Best, Self::P720, Self::P480, Self::AudioOnly];

    /// Label shown in the UI.
    pub fn label(self) -> &'static str {
        match self {
            Self::Best => "Meilleure qualité",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::AudioOnly => "Audio seulement",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Best => "best",
            Self::P720 => "720p",
            Self::P480 => "480p",
            Self::AudioOnly => "audio",
        }
    }

    pub fn format_expression(self) -> &'static str {
        match self {
            Self::Best => "bestvideo*+bestaudio/best",
            Self::P720 => "bv*[height<=720]+ba/b",
            Self::P480 => "bv*[height<=480]+ba/b",
            Self::AudioOnly => "bestaudio/best",
        }
    }

    /// Accepts either the UI label or the slug.
    pub fn from_label(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|q| q.label() == raw || q.slug().eq_ignore_ascii_case(raw))
    }
}

/// m3u8 inputs of the direct-stream mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPair {
    pub video_url: String,
    pub audio_url: Option<String>,
    pub output_name: String,
}

impl StreamPair {
    /// An empty or blank audio URL means the video playlist already carries audio.
    pub fn new(video_url: &str, audio_url: &str, output_name: &str) -> Self {
        let audio = audio_url.trim();
        Self {
            video_url: video_url.trim().to_string(),
            audio_url: (!audio.is_empty()).then(|| audio.to_string()),
            output_name: output_name.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.mkv", sanitize_output_name(&self.output_name))
    }
}

/// A finished download waiting to be handed to the client.
///
/// The file lives in a private temporary directory that is removed when the
/// result (or the parts taken out of it) is dropped.
#[derive(Debug)]
pub struct DownloadResult {
    dir: TempDir,
    path: PathBuf,
    filename: String,
    mime: &'static str,
}

impl DownloadResult {
    pub(crate) fn new(dir: TempDir, path: PathBuf, mime: &'static str) -> Self {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video".to_string());
        Self {
            dir,
            path,
            filename,
            mime,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    /// Size on disk in bytes, 0 if the file cannot be read.
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Moves the file into `dest_dir`, keeping its name, and returns the new path.
    pub fn persist_into(self, dest_dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dest_dir)?;
        let dest = dest_dir.join(&self.filename);
        if fs::rename(&self.path, &dest).is_err() {
            // Different filesystem.
            fs::copy(&self.path, &dest)?;
        }
        Ok(dest)
    }

    pub(crate) fn into_parts(self) -> (TempDir, PathBuf, String, &'static str) {
        (self.dir, self.path, self.filename, self.mime)
    }
}

#[cfg(test)]
impl DownloadResult {
    pub(crate) fn read_bytes(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Downloading,
    Finishing,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub bytes_done: u64,
    pub bytes_total: Option<u64>,
    /// `None` while the total size is unknown.
    pub fraction: Option<f64>,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}")]
    Extraction(String),
    #[error("{0}")]
    Mux(String),
    #[error("local file error: {0}")]
    Io(#[from] io::Error),
}

impl DownloadError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Extraction(_) => "extraction",
            Self::Mux(_) => "mux",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_accepts_labels_and_slugs() {
        assert_eq!(Quality::from_label("Audio seulement"), Some(Quality::AudioOnly));
        assert_eq!(Quality::from_label("audio"), Some(Quality::AudioOnly));
        assert_eq!(Quality::from_label(" Meilleure qualité "), Some(Quality::Best));
        assert_eq!(Quality::from_label("720P"), Some(Quality::P720));
        assert_eq!(Quality::from_label("1080p"), None);
    }

    #[test]
    fn blank_audio_url_means_single_input() {
        let pair = StreamPair::new("https://example/video.m3u8", "  ", "lecture1");
        assert_eq!(pair.audio_url, None);
        assert_eq!(pair.file_name(), "lecture1.mkv");

        let pair = StreamPair::new("https://example/v.m3u8", "https://example/a.m3u8", "");
        assert_eq!(pair.audio_url.as_deref(), Some("https://example/a.m3u8"));
        assert_eq!(pair.file_name(), "video.mkv");
    }

    #[test]
    fn mode_mime_types() {
        assert_eq!(DownloadMode::PageUrl.mime(), "video/mp4");
        assert_eq!(DownloadMode::DirectStream.mime(), "video/x-matroska");
        assert_eq!(DownloadMode::parse("direct_stream"), Some(DownloadMode::DirectStream));
        assert_eq!(DownloadMode::parse("nope"), None);
    }

    #[test]
    fn container_mime_types() {
        assert_eq!(container_mime("mp4"), MIME_MP4);
        assert_eq!(container_mime(" MKV "), MIME_MATROSKA);
        assert_eq!(container_mime(".webm"), MIME_WEBM);
        assert_eq!(container_mime("mov"), MIME_MP4);
    }

    #[test]
    fn result_persists_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let file = dir_path.join("clip.mkv");
        fs::write(&file, b"matroska").unwrap();

        let result = DownloadResult::new(dir, file, MIME_MATROSKA);
        assert_eq!(result.filename(), "clip.mkv");
        assert_eq!(result.read_bytes().unwrap(), b"matroska");
        assert_eq!(result.size(), 8);

        let out = tempfile::tempdir().unwrap();
        let saved = result.persist_into(out.path()).unwrap();
        assert_eq!(fs::read(&saved).unwrap(), b"matroska");
        assert!(!dir_path.exists());
    }
}
