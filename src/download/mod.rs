//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`     — 数据模型（Quality / StreamPair / DownloadResult / ProgressSnapshot 等）
//! - `normalize`  — 用户输入归一化（格式表达式、文件名、Referer、cookies）
//! - `progress`   — 进度上报与 CLI 进度条
//! - `extractor`  — 提取后端抽象与 yt-dlp 子进程实现
//! - `mux`        — ffmpeg 调用
//! - `page`       — 页面 URL 模式编排
//! - `stream`     — m3u8 直链模式编排
//! - `tools`      — 外部工具探测

pub mod extractor;
pub mod models;
pub mod mux;
pub mod normalize;
pub mod page;
pub mod progress;
pub mod stream;
pub mod tools;
