//! 直链模式：m3u8 视频（可选音频）经 ffmpeg 封装为 mkv。

use tracing::{info, warn};

use super::models::{DownloadError, DownloadMode, DownloadResult, StreamPair};
use super::mux::Muxer;
use super::normalize::loggable_url;

/// Fetches `pair` with `muxer` into `<sanitized name>.mkv` inside a fresh
/// temporary directory.
pub fn download_direct_stream(
    muxer: &Muxer,
    pair: &StreamPair,
) -> Result<DownloadResult, DownloadError> {
    if pair.video_url.is_empty() {
        return Err(DownloadError::Mux("no video playlist URL given".to_string()));
    }

    let work_dir = tempfile::Builder::new().prefix("cvd-stream-").tempdir()?;
    let out = work_dir.path().join(pair.file_name());

    info!(
        target: "job",
        video = loggable_url(&pair.video_url),
        audio = pair.audio_url.as_deref().map(loggable_url),
        file = %out.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        "stream download started"
    );

    muxer.download_via_mux(&pair.video_url, pair.audio_url.as_deref(), &out)?;

    if !out.is_file() {
        warn!(target: "job", "ffmpeg exited cleanly without writing the output");
        return Err(DownloadError::Mux("ffmpeg produced no output file".to_string()));
    }

    let result = DownloadResult::new(work_dir, out, DownloadMode::DirectStream.mime());
    info!(target: "job", file = result.filename(), bytes = result.size(), "stream download finished");
    Ok(result)
}
