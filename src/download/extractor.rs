//! 提取后端：通过 yt-dlp 子进程解析页面并下载媒体。

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use super::progress::{TransferEvent, TransferStatus};

const PROGRESS_MARK: &str = "[cvd-progress]";
const FILE_MARK: &str = "[cvd-file]";

/// Typed replacement for yt-dlp's option dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorOptions {
    /// Absolute output template; the file name comes from the media title.
    pub output_template: String,
    pub format: String,
    /// Container separate video/audio streams are merged into (default `mp4`).
    pub merge_output_format: String,
    /// Extra HTTP headers, e.g. `Referer`.
    pub http_headers: BTreeMap<String, String>,
    /// Fragments fetched in parallel (default 5).
    pub concurrent_fragments: u32,
    pub cookie_file: Option<PathBuf>,
}

impl ExtractorOptions {
    pub fn new(work_dir: &Path, format: &str) -> Self {
        Self {
            output_template: work_dir.join("%(title)s.%(ext)s").to_string_lossy().to_string(),
            format: format.to_string(),
            merge_output_format: "mp4".to_string(),
            http_headers: BTreeMap::new(),
            concurrent_fragments: 5,
            cookie_file: None,
        }
    }

    pub fn with_referer(mut self, referer: Option<&str>) -> Self {
        if let Some(r) = referer {
            self.http_headers.insert("Referer".to_string(), r.to_string());
        }
        self
    }

    pub fn with_cookie_file(mut self, cookie_file: Option<&Path>) -> Self {
        self.cookie_file = cookie_file.map(Path::to_path_buf);
        self
    }
}

/// The page-URL backend. Blocks until the media is on disk.
///
/// Returns the path the backend reports for the final file, if it reports
/// one, or the backend's error text.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract_and_download(
        &self,
        url: &str,
        options: &ExtractorOptions,
        on_event: &mut dyn FnMut(TransferEvent),
    ) -> Result<Option<PathBuf>, String>;
}

/// yt-dlp driven as a child process.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    prefix_args: Vec<String>,
}

impl YtDlp {
    /// `command` is the program followed by fixed leading arguments,
    /// e.g. `["python3", "-m", "yt_dlp"]`.
    pub fn from_command(command: &[String]) -> Self {
        let mut it = command.iter().cloned();
        let program = it.next().unwrap_or_else(|| "yt-dlp".to_string());
        Self {
            program,
            prefix_args: it.collect(),
        }
    }

    pub fn build_args(&self, url: &str, options: &ExtractorOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.prefix_args.iter().map(OsString::from).collect();
        let mut push = |a: &str| args.push(OsString::from(a));

        push("--no-colors");
        push("-o");
        push(&options.output_template);
        push("-f");
        push(&options.format);
        push("--merge-output-format");
        push(&options.merge_output_format);
        push("--concurrent-fragments");
        push(&options.concurrent_fragments.to_string());
        for (name, value) in &options.http_headers {
            push("--add-headers");
            push(&format!("{name}:{value}"));
        }
        push("--newline");
        push("--progress");
        push("--progress-template");
        push(&format!(
            "download:{PROGRESS_MARK} %(progress.status)s %(progress.downloaded_bytes)s \
             %(progress.total_bytes)s %(progress.total_bytes_estimate)s"
        ));
        push("--print");
        push(&format!("after_move:{FILE_MARK}%(filepath)s"));

        if let Some(cookie) = &options.cookie_file {
            args.push(OsString::from("--cookies"));
            args.push(cookie.as_os_str().to_os_string());
        }
        args.push(OsString::from("--"));
        args.push(OsString::from(url));
        args
    }
}

enum Line {
    Stdout(String),
    Stderr(String),
}

impl Extractor for YtDlp {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn extract_and_download(
        &self,
        url: &str,
        options: &ExtractorOptions,
        on_event: &mut dyn FnMut(TransferEvent),
    ) -> Result<Option<PathBuf>, String> {
        let mut child = Command::new(&self.program)
            .args(self.build_args(url, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.program))?;

        let (tx, rx) = crossbeam_channel::unbounded::<Line>();
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_line_reader(out, tx.clone(), Line::Stdout));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_line_reader(err, tx.clone(), Line::Stderr));
        }
        drop(tx);

        let mut reported: Option<PathBuf> = None;
        let mut diagnostics: Vec<String> = Vec::new();
        // yt-dlp writes progress to stderr once --print makes it quiet, so check both.
        for line in rx.iter() {
            let (text, from_stderr) = match line {
                Line::Stdout(t) => (t, false),
                Line::Stderr(t) => (t, true),
            };
            if let Some(ev) = parse_progress_line(&text) {
                on_event(ev);
            } else if let Some(path) = parse_file_line(&text) {
                reported = Some(path);
            } else if from_stderr {
                debug!(target: "ytdlp", "{text}");
                diagnostics.push(text);
            } else {
                debug!(target: "ytdlp", "{text}");
            }
        }

        join_readers(readers);
        let status = child
            .wait()
            .map_err(|e| format!("waiting for {} failed: {e}", self.program))?;

        if status.success() {
            return Ok(reported);
        }

        let message = error_message(&diagnostics)
            .unwrap_or_else(|| format!("{} exited with {status}", self.program));
        warn!(target: "ytdlp", "{message}");
        Err(message)
    }
}

fn spawn_line_reader<R, F>(source: R, tx: Sender<Line>, wrap: F) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
    F: Fn(String) -> Line + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(source);
        for line in reader.split(b'\n') {
            let Ok(raw) = line else { break };
            let text = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
            if text.is_empty() {
                continue;
            }
            if tx.send(wrap(text)).is_err() {
                break;
            }
        }
    })
}

/// `ERROR:` lines when present (what yt-dlp raises), otherwise everything on stderr.
/// Waits for the pipe readers. Returns how many of them panicked.
fn join_readers(readers: Vec<thread::JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for r in readers {
        if r.join().is_err() {
            warn!(target: "ytdlp", "output reader panicked; some lines were lost");
            panicked += 1;
        }
    }
    panicked
}

fn error_message(diagnostics: &[String]) -> Option<String> {
    let errors: Vec<&str> = diagnostics
        .iter()
        .map(|l| l.trim())
        .filter(|l| l.starts_with("ERROR:"))
        .collect();
    let picked = if errors.is_empty() {
        diagnostics.iter().map(|l| l.trim()).filter(|l| !l.is_empty()).collect::<Vec<_>>()
    } else {
        errors
    };
    (!picked.is_empty()).then(|| picked.join("\n"))
}

pub(crate) fn parse_progress_line(line: &str) -> Option<TransferEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_MARK)?;
    let mut parts = rest.split_whitespace();
    let status = match parts.next()? {
        "downloading" => TransferStatus::Downloading,
        "finished" => TransferStatus::Finished,
        _ => return None,
    };
    let downloaded_bytes = parts.next().and_then(parse_byte_count).unwrap_or(0);
    let total = parts.next().and_then(parse_byte_count);
    let estimate = parts.next().and_then(parse_byte_count);
    Some(TransferEvent {
        status,
        downloaded_bytes,
        total_bytes: total.or(estimate),
    })
}

// yt-dlp prints "NA" for missing fields and floats for estimates.
fn parse_byte_count(raw: &str) -> Option<u64> {
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f >= 0.0)
        .map(|f| f.round() as u64)
}

fn parse_file_line(line: &str) -> Option<PathBuf> {
    let path = line.trim_end().strip_prefix(FILE_MARK)?;
    (!path.is_empty()).then(|| PathBuf::from(path))
}

/// Finds the file the backend actually produced.
///
/// The merge step may rewrite the extension, so a sibling named
/// `<stem>.<merge_ext>` wins over the reported path. Without a reported
/// path the newest finished file in `work_dir` is used.
pub fn resolve_output_path(
    work_dir: &Path,
    reported: Option<&Path>,
    merge_ext: &str,
) -> Option<PathBuf> {
    if let Some(path) = reported {
        let merged = path.with_extension(merge_ext);
        if merged.is_file() {
            return Some(merged);
        }
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    let mut candidates: Vec<(PathBuf, bool, std::time::SystemTime)> = fs::read_dir(work_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let path = e.path();
            let name = path.file_name()?.to_string_lossy().to_string();
            if name.ends_with(".part") || name.ends_with(".ytdl") || name.starts_with('.') {
                return None;
            }
            let meta = e.metadata().ok()?;
            if !meta.is_file() || meta.len() == 0 {
                return None;
            }
            let is_merged = path
                .extension()
                .is_some_and(|x| x.eq_ignore_ascii_case(merge_ext));
            Some((path, is_merged, meta.modified().ok()?))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)));
    candidates.into_iter().next().map(|(p, _, _)| p)
}
