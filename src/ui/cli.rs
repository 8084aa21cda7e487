//! 命令行模式：单次下载到本地目录。

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

use crate::base_system::context::Config;
use crate::download::extractor::YtDlp;
use crate::download::models::{DownloadResult, Platform, Quality, StreamPair};
use crate::download::mux::Muxer;
use crate::download::normalize::{CookieFile, resolve_referer};
use crate::download::page::{PageRequest, download_via_extractor};
use crate::download::progress::format_bytes;
use crate::download::stream::download_direct_stream;

#[derive(Debug, Args)]
pub struct PageArgs {
    /// Page URL of the lecture video
    pub url: String,

    #[arg(long, value_enum, default_value_t = Quality::Best)]
    pub quality: Quality,

    /// cookies.txt exported from the browser
    #[arg(long)]
    pub cookies: Option<PathBuf>,

    /// Referer header; defaults to the page URL
    #[arg(long, conflicts_with = "no_referer")]
    pub referer: Option<String>,

    /// Send no Referer header
    #[arg(long, default_value_t = false)]
    pub no_referer: bool,

    #[arg(long, value_enum)]
    pub platform: Option<Platform>,

    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Video .m3u8 URL
    pub video: String,

    /// Separate audio .m3u8 URL
    #[arg(long)]
    pub audio: Option<String>,

    /// Output file name without extension
    #[arg(long, default_value = "video")]
    pub name: String,

    #[arg(long, value_enum)]
    pub platform: Option<Platform>,

    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

pub fn run_page(config: &Config, args: PageArgs) -> Result<PathBuf> {
    let start = Instant::now();

    let upload = match &args.cookies {
        Some(path) => Some(
            fs::read(path).with_context(|| format!("cannot read cookies file {}", path.display()))?,
        ),
        None => None,
    };
    let cookie = CookieFile::materialize(upload.as_deref()).context("cannot stage cookies file")?;

    let referer_field = if args.no_referer {
        Some("")
    } else {
        args.referer.as_deref()
    };
    let referer = resolve_referer(&args.url, referer_field);

    info!(target: "job", platform = ?args.platform, quality = args.quality.slug(), "page mode");

    let extractor = YtDlp::from_command(&config.ytdlp_command);
    let req = PageRequest {
        url: &args.url,
        format: args.quality.format_expression(),
        cookie_file: cookie.as_ref().map(CookieFile::path),
        referer: referer.as_deref(),
    };
    let result = download_via_extractor(&extractor, &req, config, None)?;
    save(result, &args.out_dir, start)
}

pub fn run_stream(config: &Config, args: StreamArgs) -> Result<PathBuf> {
    let start = Instant::now();
    let pair = StreamPair::new(&args.video, args.audio.as_deref().unwrap_or(""), &args.name);

    info!(target: "job", platform = ?args.platform, "stream mode");

    let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
    spinner.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Téléchargement via ffmpeg…");
    spinner.enable_steady_tick(Duration::from_millis(120));

    let muxer = Muxer::from_config(config);
    let outcome = download_direct_stream(&muxer, &pair);
    spinner.finish_and_clear();

    save(outcome?, &args.out_dir, start)
}

fn save(result: DownloadResult, out_dir: &std::path::Path, start: Instant) -> Result<PathBuf> {
    let size = result.size();
    let saved = result
        .persist_into(out_dir)
        .with_context(|| format!("cannot save into {}", out_dir.display()))?;

    println!(
        "Terminé ! {} ({}, {:.1}s)",
        saved.display(),
        format_bytes(size),
        start.elapsed().as_secs_f64()
    );
    Ok(saved)
}
