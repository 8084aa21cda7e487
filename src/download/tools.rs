//! 外部工具探测（yt-dlp / ffmpeg 是否可用及其版本）。

use std::process::{Command, Stdio};

use serde::Serialize;
use tracing::{info, warn};

use crate::base_system::context::Config;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolStatus {
    pub name: &'static str,
    pub program: String,
    pub version: Option<String>,
    pub available: bool,
}

/// Runs `program [prefix_args..] version_arg` and keeps the first output line.
pub fn probe(name: &'static str, command: &[String], version_arg: &str) -> ToolStatus {
    let program = command.first().cloned().unwrap_or_default();
    let version = if program.is_empty() {
        None
    } else {
        Command::new(&program)
            .args(&command[1..])
            .arg(version_arg)
            .stdin(Stdio::null())
            .output()
            .ok()
            .filter(|out| out.status.success())
            .and_then(|out| {
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .next()
                    .map(|l| l.trim().to_string())
            })
            .filter(|v| !v.is_empty())
    };

    ToolStatus {
        name,
        available: version.is_some(),
        program,
        version,
    }
}

pub fn probe_all(cfg: &Config) -> Vec<ToolStatus> {
    vec![
        probe("yt-dlp", &cfg.ytdlp_command, "--version"),
        probe("ffmpeg", std::slice::from_ref(&cfg.ffmpeg_path), "-version"),
    ]
}

/// Logs what was found at startup; a missing tool only disables its mode.
pub fn log_tool_report(tools: &[ToolStatus]) {
    for tool in tools {
        match &tool.version {
            Some(v) => info!(target: "startup", tool = tool.name, version = %v, "tool found"),
            None => warn!(
                target: "startup",
                tool = tool.name,
                program = %tool.program,
                "tool not found; its download mode will fail"
            ),
        }
    }
}
