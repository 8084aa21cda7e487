use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::base_system::context::Config;
use crate::download::extractor::Extractor;
use crate::download::models::{DownloadMode, DownloadResult, Platform, ProgressSnapshot};
use crate::download::mux::Muxer;
use crate::download::tools::ToolStatus;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) bind_addrs: Arc<Vec<SocketAddr>>,
    pub(crate) config: Arc<Config>,
    pub(crate) tools: Arc<Vec<ToolStatus>>,
    pub(crate) jobs: Arc<JobStore>,
    pub(crate) extractor: Arc<dyn Extractor>,
    pub(crate) muxer: Arc<Muxer>,
}

#[cfg(test)]
impl AppState {
    pub(crate) fn for_tests(extractor: Arc<dyn Extractor>) -> Self {
        Self {
            bind_addrs: Arc::new(vec![SocketAddr::from(([127, 0, 0, 1], 18424))]),
            config: Arc::new(Config::default()),
            tools: Arc::new(Vec::new()),
            jobs: Arc::new(JobStore::default()),
            extractor,
            muxer: Arc::new(Muxer::new("/nonexistent/ffmpeg-cvd", "ua", "aac")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum JobState {
    Queued,
    Running,
    Done,
    Failed,
    /// The file was handed to the browser; nothing is kept.
    Delivered,
    /// Nobody fetched the file in time; it was released.
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct JobInfo {
    pub(crate) id: u64,
    pub(crate) mode: DownloadMode,
    pub(crate) platform: Option<Platform>,
    /// Page URL or video playlist URL, without query string.
    pub(crate) label: String,
    pub(crate) state: JobState,
    pub(crate) progress: Option<ProgressSnapshot>,
    pub(crate) message: Option<String>,
    pub(crate) filename: Option<String>,
    pub(crate) created_ms: u64,
    pub(crate) updated_ms: u64,
}

#[derive(Debug)]
struct JobEntry {
    info: JobInfo,
    result: Option<DownloadResult>,
}

/// Why a result could not be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimError {
    NotFound,
    NotReady,
    Gone,
}

#[derive(Debug, Default)]
pub(crate) struct JobStore {
    next_id: AtomicU64,
    inner: Mutex<HashMap<u64, JobEntry>>,
}

impl JobStore {
    pub(crate) fn create(&self, mode: DownloadMode, platform: Option<Platform>, label: String) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let now = now_ms();

        let info = JobInfo {
            id,
            mode,
            platform,
            label,
            state: JobState::Queued,
            progress: None,
            message: None,
            filename: None,
            created_ms: now,
            updated_ms: now,
        };

        let mut g = self.inner.lock().unwrap();
        g.insert(id, JobEntry { info, result: None });
        id
    }

    pub(crate) fn list(&self) -> Vec<JobInfo> {
        let g = self.inner.lock().unwrap();
        let mut v: Vec<JobInfo> = g.values().map(|e| e.info.clone()).collect();
        v.sort_by(|a, b| {
            b.updated_ms
                .cmp(&a.updated_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        v
    }

    pub(crate) fn get(&self, id: u64) -> Option<JobInfo> {
        let g = self.inner.lock().unwrap();
        g.get(&id).map(|e| e.info.clone())
    }

    pub(crate) fn set_running(&self, id: u64) {
        self.update(id, |j| {
            j.state = JobState::Running;
            j.message = None;
        });
    }

    pub(crate) fn set_progress(&self, id: u64, snap: ProgressSnapshot) {
        self.update(id, |j| {
            j.progress = Some(snap);
        });
    }

    pub(crate) fn set_done(&self, id: u64, result: DownloadResult) {
        let mut g = self.inner.lock().unwrap();
        let Some(e) = g.get_mut(&id) else {
            return;
        };
        e.info.state = JobState::Done;
        e.info.message = None;
        e.info.filename = Some(result.filename().to_string());
        e.info.updated_ms = now_ms();
        e.result = Some(result);
    }

    pub(crate) fn set_failed(&self, id: u64, msg: String) {
        self.update(id, |j| {
            j.state = JobState::Failed;
            j.message = Some(msg);
        });
    }

    /// Hands the finished file out exactly once.
    pub(crate) fn take_result(&self, id: u64) -> Result<DownloadResult, ClaimError> {
        let mut g = self.inner.lock().unwrap();
        let Some(e) = g.get_mut(&id) else {
            return Err(ClaimError::NotFound);
        };
        match e.info.state {
            JobState::Queued | JobState::Running | JobState::Failed => Err(ClaimError::NotReady),
            JobState::Delivered | JobState::Expired => Err(ClaimError::Gone),
            JobState::Done => {
                let result = e.result.take().ok_or(ClaimError::Gone)?;
                e.info.state = JobState::Delivered;
                e.info.updated_ms = now_ms();
                Ok(result)
            }
        }
    }

    /// Releases results nobody fetched within `ttl` and forgets settled jobs
    /// older than that. Returns how many results were released.
    pub(crate) fn sweep_expired(&self, ttl: Duration) -> usize {
        let cutoff = now_ms().saturating_sub(ttl.as_millis() as u64);
        let mut g = self.inner.lock().unwrap();
        g.retain(|_, e| {
            let settled = matches!(
                e.info.state,
                JobState::Delivered | JobState::Expired | JobState::Failed
            );
            !(settled && e.info.updated_ms <= cutoff)
        });

        let mut released = 0;
        for e in g.values_mut() {
            if e.info.state == JobState::Done && e.info.updated_ms <= cutoff {
                e.result = None;
                e.info.state = JobState::Expired;
                e.info.message = Some("Fichier expiré, relancez le téléchargement.".to_string());
                e.info.updated_ms = now_ms();
                released += 1;
            }
        }
        released
    }

    fn update<F: FnOnce(&mut JobInfo)>(&self, id: u64, f: F) {
        let mut g = self.inner.lock().unwrap();
        let Some(e) = g.get_mut(&id) else {
            return;
        };
        f(&mut e.info);
        e.info.updated_ms = now_ms();
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::models::{MIME_MP4, Phase};

    fn finished_result(name: &str) -> (DownloadResult, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let file = dir_path.join(name);
        std::fs::write(&file, b"data").unwrap();
        (DownloadResult::new(dir, file, MIME_MP4), dir_path)
    }

    #[test]
    fn job_lifecycle_hands_result_out_once() {
        let store = JobStore::default();
        let id = store.create(
            DownloadMode::PageUrl,
            Some(Platform::Moodle),
            "https://moodle.example/view.php".to_string(),
        );
        assert_eq!(store.get(id).unwrap().state, JobState::Queued);
        assert_eq!(store.take_result(id).unwrap_err(), ClaimError::NotReady);

        store.set_running(id);
        store.set_progress(
            id,
            ProgressSnapshot {
                phase: Phase::Downloading,
                bytes_done: 5,
                bytes_total: Some(10),
                fraction: Some(0.5),
            },
        );
        assert_eq!(store.get(id).unwrap().progress.unwrap().fraction, Some(0.5));

        let (result, dir) = finished_result("Cours.mp4");
        store.set_done(id, result);
        let info = store.get(id).unwrap();
        assert_eq!(info.state, JobState::Done);
        assert_eq!(info.filename.as_deref(), Some("Cours.mp4"));

        let taken = store.take_result(id).unwrap();
        assert_eq!(taken.filename(), "Cours.mp4");
        assert_eq!(store.get(id).unwrap().state, JobState::Delivered);
        assert_eq!(store.take_result(id).unwrap_err(), ClaimError::Gone);

        drop(taken);
        assert!(!dir.exists());
    }

    #[test]
    fn failed_job_keeps_message() {
        let store = JobStore::default();
        let id = store.create(DownloadMode::DirectStream, None, "v.m3u8".to_string());
        store.set_failed(id, "Échec : 404".to_string());
        let info = store.get(id).unwrap();
        assert_eq!(info.state, JobState::Failed);
        assert_eq!(info.message.as_deref(), Some("Échec : 404"));
        assert_eq!(store.take_result(id).unwrap_err(), ClaimError::NotReady);
        assert_eq!(store.take_result(id + 1).unwrap_err(), ClaimError::NotFound);
    }

    #[test]
    fn unclaimed_results_expire() {
        let store = JobStore::default();
        let id = store.create(DownloadMode::PageUrl, None, "u".to_string());
        let (result, dir) = finished_result("a.mp4");
        store.set_done(id, result);

        assert_eq!(store.sweep_expired(Duration::from_secs(3600)), 0);
        assert!(dir.exists());

        assert_eq!(store.sweep_expired(Duration::ZERO), 1);
        assert!(!dir.exists());
        assert_eq!(store.get(id).unwrap().state, JobState::Expired);
        assert_eq!(store.take_result(id).unwrap_err(), ClaimError::Gone);
    }

    #[test]
    fn settled_jobs_are_pruned_after_ttl() {
        let store = JobStore::default();
        let failed = store.create(DownloadMode::DirectStream, None, "f".to_string());
        store.set_failed(failed, "Échec : 404".to_string());
        let delivered = store.create(DownloadMode::PageUrl, None, "d".to_string());
        let (result, _dir) = finished_result("d.mp4");
        store.set_done(delivered, result);
        drop(store.take_result(delivered).unwrap());
        let running = store.create(DownloadMode::PageUrl, None, "r".to_string());
        store.set_running(running);

        store.sweep_expired(Duration::from_secs(3600));
        assert_eq!(store.list().len(), 3);

        store.sweep_expired(Duration::ZERO);
        assert!(store.get(failed).is_none());
        assert!(store.get(delivered).is_none());
        assert_eq!(store.get(running).unwrap().state, JobState::Running);
    }

    #[test]
    fn list_is_newest_first() {
        let store = JobStore::default();
        let a = store.create(DownloadMode::PageUrl, None, "a".to_string());
        let b = store.create(DownloadMode::PageUrl, None, "b".to_string());
        let ids: Vec<u64> = store.list().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
