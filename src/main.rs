//! Course Video Downloader：课程平台视频下载器的 Rust 实现。
//!
//! 两种获取方式：把页面 URL 交给 yt-dlp，或把 m3u8 直链交给 ffmpeg 封装。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志等基础设施
//! - `download`：输入归一化、后端调用、进度与结果
//! - `ui`：浏览器 Web UI 与单次下载的命令行模式

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod base_system;
mod download;
mod ui;

use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use ui::cli::{PageArgs, StreamArgs};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "course-video-downloader")]
#[command(about = "Download lecture videos from a page URL (yt-dlp) or m3u8 links (ffmpeg)")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the browser UI (default)
    Serve {
        /// Overrides `web_bind`, e.g. 0.0.0.0:18424 or several separated by commas
        #[arg(long)]
        bind: Option<String>,
    },
    /// Download from a page URL through yt-dlp
    Page(PageArgs),
    /// Download m3u8 playlists through ffmpeg
    Stream(StreamArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("Course Video Downloader v{}", VERSION);
        return Ok(());
    }

    let command = cli.command.unwrap_or(Command::Serve { bind: None });
    let serving = matches!(command, Command::Serve { .. });
    let data_dir = cli.data_dir.as_deref();

    let log = init_logging(cli.debug, data_dir, serving)?;
    info!(target: "startup", "Course Video Downloader v{}", VERSION);

    let config = load_or_create::<Config>(data_dir).context("failed to load config.yml")?;

    let outcome = match command {
        Command::Serve { bind } => ui::web::run(config, bind.as_deref()),
        Command::Page(args) => ui::cli::run_page(&config, args).map(|_| ()),
        Command::Stream(args) => ui::cli::run_stream(&config, args).map(|_| ()),
    };

    if let Err(e) = outcome {
        error!(target: "startup", "{e:#}");
        eprintln!("Échec : {e:#}");
        log.safe_exit();
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>, serving: bool) -> Result<LogSystem> {
    let logs_dir = base_dir.unwrap_or(Path::new(".")).join("logs");
    let opts = LogOptions {
        debug,
        archive_on_exit: true,
        console: serving || debug,
        handle_ctrlc: !serving,
        logs_dir,
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}
