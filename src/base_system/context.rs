//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息。

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

/// Safari UA sent by ffmpeg on every playlist/segment request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_9_5) \
AppleWebKit/601.7.8 (KHTML, like Gecko) Version/9.1.3 Safari/537.86.7";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Web 配置
    #[serde(default = "default_web_bind")]
    pub web_bind: String,

    // 外部工具
    #[serde(default = "default_ytdlp_command")]
    pub ytdlp_command: Vec<String>,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // 下载参数
    #[serde(default = "default_concurrent_fragments")]
    pub concurrent_fragments: u32,
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    // 结果保留
    #[serde(default = "default_result_ttl_secs")]
    pub result_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_bind: default_web_bind(),
            ytdlp_command: default_ytdlp_command(),
            ffmpeg_path: default_ffmpeg_path(),
            user_agent: default_user_agent(),
            concurrent_fragments: default_concurrent_fragments(),
            merge_output_format: default_merge_output_format(),
            audio_codec: default_audio_codec(),
            result_ttl_secs: default_result_ttl_secs(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 8] = [
            FieldMeta {
                name: "web_bind",
                description: "Web UI listen address, e.g. 127.0.0.1:18424 or [::1]:18424",
            },
            FieldMeta {
                name: "ytdlp_command",
                description: "yt-dlp command line prefix, e.g. [yt-dlp] or [python3, -m, yt_dlp]",
            },
            FieldMeta {
                name: "ffmpeg_path",
                description: "ffmpeg executable (name on PATH or absolute path)",
            },
            FieldMeta {
                name: "user_agent",
                description: "User-Agent sent by ffmpeg for m3u8 playlists and segments",
            },
            FieldMeta {
                name: "concurrent_fragments",
                description: "Fragments yt-dlp downloads in parallel",
            },
            FieldMeta {
                name: "merge_output_format",
                description: "Container yt-dlp merges separate audio/video into",
            },
            FieldMeta {
                name: "audio_codec",
                description: "Codec the separate m3u8 audio stream is re-encoded to",
            },
            FieldMeta {
                name: "result_ttl_secs",
                description: "Seconds a finished file waits for the browser before it is discarded",
            },
        ];
        &FIELDS
    }
}

fn default_web_bind() -> String {
    "127.0.0.1:18424".to_string()
}

fn default_ytdlp_command() -> Vec<String> {
    vec!["yt-dlp".to_string()]
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_concurrent_fragments() -> u32 {
    5
}

fn default_merge_output_format() -> String {
    "mp4".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_result_ttl_secs() -> u64 {
    30 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.concurrent_fragments, 5);
        assert_eq!(cfg.merge_output_format, "mp4");
        assert_eq!(cfg.audio_codec, "aac");
        assert_eq!(cfg.ytdlp_command, vec!["yt-dlp".to_string()]);
        assert!(cfg.user_agent.contains("Safari"));
    }
}
