//! 进度上报与 CLI 进度条管理。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::{Phase, ProgressSnapshot};

/// Highest fraction shown before the backend reports `finished`.
pub const DOWNLOAD_CAP: f64 = 0.99;

/// Observer receiving every snapshot of a running download (web job store, CLI bar).
pub type ProgressObserver = Box<dyn FnMut(ProgressSnapshot) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Downloading,
    Finished,
}

/// Raw progress report from the extraction backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEvent {
    pub status: TransferStatus,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Turns raw backend events into a display value that never goes backwards.
///
/// The fraction stays below [`DOWNLOAD_CAP`] until a `finished` event, after
/// which the tracker is in the finishing phase at 1.0 for good (yt-dlp reports
/// one `finished` per stream and then merges).
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    snapshot: ProgressSnapshot,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            snapshot: ProgressSnapshot {
                phase: Phase::Downloading,
                bytes_done: 0,
                bytes_total: None,
                fraction: None,
            },
        }
    }
}

impl ProgressTracker {
    pub fn observe(&mut self, event: TransferEvent) -> ProgressSnapshot {
        let snap = &mut self.snapshot;
        snap.bytes_done = event.downloaded_bytes;
        if event.total_bytes.is_some() {
            snap.bytes_total = event.total_bytes;
        }

        match (snap.phase, event.status) {
            (_, TransferStatus::Finished) => {
                snap.phase = Phase::Finishing;
                snap.fraction = Some(1.0);
            }
            (Phase::Finishing, TransferStatus::Downloading) => {}
            (Phase::Downloading, TransferStatus::Downloading) => {
                if let Some(total) = event.total_bytes.filter(|t| *t > 0) {
                    let current = (event.downloaded_bytes as f64 / total as f64).min(DOWNLOAD_CAP);
                    let prev = snap.fraction.unwrap_or(0.0);
                    snap.fraction = Some(current.max(prev));
                }
            }
        }
        *snap
    }
}

/// Tracker plus where its snapshots go.
pub(crate) struct ProgressReporter {
    tracker: ProgressTracker,
    cb: Option<ProgressObserver>,
    cli: Option<ProgressBar>,
}

impl ProgressReporter {
    pub(crate) fn handle(&mut self, event: TransferEvent) {
        let snap = self.tracker.observe(event);
        if let Some(cb) = self.cb.as_mut() {
            cb(snap);
        }
        if let Some(bar) = self.cli.as_ref() {
            draw_cli(bar, snap);
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(bar) = self.cli.take() {
            bar.finish_and_clear();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Without an observer the progress is drawn as a terminal bar on stderr.
pub(crate) fn make_reporter(progress: Option<ProgressObserver>) -> ProgressReporter {
    let cli = if progress.is_none() {
        let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix("Téléchargement");
        bar.set_message("Préparation…");
        Some(bar)
    } else {
        None
    };

    ProgressReporter {
        tracker: ProgressTracker::default(),
        cb: progress,
        cli,
    }
}

fn draw_cli(bar: &ProgressBar, snap: ProgressSnapshot) {
    match (snap.phase, snap.fraction) {
        (Phase::Finishing, _) => {
            bar.set_position(100);
            bar.set_prefix("Fusion/finition");
            bar.set_message(format_bytes(snap.bytes_done));
        }
        (Phase::Downloading, Some(f)) => {
            bar.set_position((f * 100.0).floor() as u64);
            bar.set_message(format!("{:.1}%", f * 100.0));
        }
        (Phase::Downloading, None) => {
            bar.set_message(format_bytes(snap.bytes_done));
        }
    }
}

pub fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{v:.1} {}", UNITS[unit])
    }
}
