//! 交互层入口。
//!
//! 包含浏览器端 Web UI 与单次下载的命令行模式。

pub mod cli;
pub mod web;
