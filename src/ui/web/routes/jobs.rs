use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::download::models::{
    DownloadError, DownloadMode, DownloadResult, Platform, Quality, StreamPair,
};
use crate::download::normalize::{
    CookieFile, DEFAULT_OUTPUT_NAME, loggable_url, quality_to_format, resolve_referer,
};
use crate::download::page::{PageRequest, download_via_extractor};
use crate::download::stream::download_direct_stream;
use crate::ui::web::state::{AppState, JobInfo, JobState};

/// Raw multipart submission: text fields plus the optional cookies upload.
#[derive(Debug, Default)]
pub(crate) struct JobForm {
    pub(crate) fields: HashMap<String, String>,
    pub(crate) cookies: Option<Vec<u8>>,
}

impl JobForm {
    fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Trimmed, `None` when absent or blank.
    fn required(&self, key: &str) -> Option<String> {
        self.text(key)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug)]
pub(crate) struct PageJob {
    pub(crate) url: String,
    pub(crate) format: &'static str,
    pub(crate) cookies: Option<Vec<u8>>,
    pub(crate) referer: Option<String>,
}

#[derive(Debug)]
pub(crate) enum JobKind {
    Page(PageJob),
    Stream(StreamPair),
}

#[derive(Debug)]
pub(crate) struct JobRequest {
    pub(crate) platform: Option<Platform>,
    pub(crate) kind: JobKind,
}

impl JobRequest {
    pub(crate) fn from_form(form: JobForm) -> Result<Self, String> {
        let mode = match form.text("mode").map(str::trim) {
            None | Some("") => DownloadMode::PageUrl,
            Some(raw) => DownloadMode::parse(raw).ok_or_else(|| format!("unknown mode: {raw}"))?,
        };
        let platform = form.text("platform").and_then(Platform::parse);

        let kind = match mode {
            DownloadMode::PageUrl => {
                let url = form.required("url").ok_or("url is required")?;
                let format = match form.text("quality") {
                    None => Quality::Best.format_expression(),
                    Some(label) => quality_to_format(label),
                };
                let referer = resolve_referer(&url, form.text("referer"));
                JobKind::Page(PageJob {
                    url,
                    format,
                    cookies: form.cookies,
                    referer,
                })
            }
            DownloadMode::DirectStream => {
                let video = form
                    .required("video_m3u8_url")
                    .ok_or("video_m3u8_url is required")?;
                let name = form
                    .required("output_name")
                    .unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string());
                let audio = form.text("audio_m3u8_url").unwrap_or("");
                JobKind::Stream(StreamPair::new(&video, audio, &name))
            }
        };

        Ok(Self { platform, kind })
    }

    pub(crate) fn mode(&self) -> DownloadMode {
        match self.kind {
            JobKind::Page(_) => DownloadMode::PageUrl,
            JobKind::Stream(_) => DownloadMode::DirectStream,
        }
    }

    fn label(&self) -> String {
        match &self.kind {
            JobKind::Page(p) => loggable_url(&p.url).to_string(),
            JobKind::Stream(s) => loggable_url(&s.video_url).to_string(),
        }
    }
}

pub(crate) fn ttl(state: &AppState) -> Duration {
    Duration::from_secs(state.config.result_ttl_secs)
}

pub(crate) async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    state.jobs.sweep_expired(ttl(&state));
    let items = state.jobs.list();
    Json(json!({ "items": items }))
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<JobInfo>, StatusCode> {
    state.jobs.sweep_expired(ttl(&state));
    state.jobs.get(id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn read_form(mut multipart: Multipart) -> Result<JobForm, String> {
    let mut form = JobForm::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "cookies" {
            let bytes = field.bytes().await.map_err(|e| e.to_string())?;
            form.cookies = Some(bytes.to_vec());
        } else {
            let text = field.text().await.map_err(|e| e.to_string())?;
            form.fields.insert(name, text);
        }
    }
    Ok(form)
}

pub(crate) async fn create_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let bad_request = |msg: String| (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })));

    let form = read_form(multipart).await.map_err(bad_request)?;
    let req = JobRequest::from_form(form).map_err(bad_request)?;

    state.jobs.sweep_expired(ttl(&state));
    let mode = req.mode();
    let id = state.jobs.create(mode, req.platform, req.label());
    info!(target: "web", id, mode = ?mode, platform = ?req.platform, "job queued");

    let worker = state.clone();
    thread::spawn(move || run_job(&worker, id, req));

    Ok(Json(json!({ "id": id, "mode": mode, "state": JobState::Queued })))
}

/// Blocking body of one job; runs on its own thread.
pub(crate) fn run_job(state: &AppState, id: u64, req: JobRequest) {
    state.jobs.set_running(id);

    let outcome = match req.kind {
        JobKind::Page(job) => run_page_job(state, id, job),
        JobKind::Stream(pair) => download_direct_stream(&state.muxer, &pair),
    };

    match outcome {
        Ok(result) => {
            info!(target: "job", id, file = result.filename(), "job done");
            state.jobs.set_done(id, result);
        }
        Err(e) => {
            warn!(target: "job", id, kind = e.kind(), "job failed: {e}");
            state.jobs.set_failed(id, format!("Échec : {e}"));
        }
    }
}

fn run_page_job(state: &AppState, id: u64, job: PageJob) -> Result<DownloadResult, DownloadError> {
    // Lives until the download returns; the file is removed with it.
    let cookie = CookieFile::materialize(job.cookies.as_deref())?;

    let req = PageRequest {
        url: &job.url,
        format: job.format,
        cookie_file: cookie.as_ref().map(CookieFile::path),
        referer: job.referer.as_deref(),
    };

    let jobs = state.jobs.clone();
    download_via_extractor(
        state.extractor.as_ref(),
        &req,
        &state.config,
        Some(Box::new(move |snap| jobs.set_progress(id, snap))),
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::download::extractor::{Extractor, ExtractorOptions};
    use crate::download::progress::{TransferEvent, TransferStatus};

    fn form(pairs: &[(&str, &str)]) -> JobForm {
        JobForm {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            cookies: None,
        }
    }

    #[test]
    fn page_form_resolves_format_and_referer() {
        let req = JobRequest::from_form(form(&[
            ("mode", "page_url"),
            ("platform", "Crystalink"),
            ("url", " https://crystalink.example/watch?id=9 "),
            ("quality", "720p"),
        ]))
        .unwrap();
        assert_eq!(req.platform, Some(Platform::Crystalink));
        let JobKind::Page(job) = req.kind else {
            panic!("expected a page job");
        };
        assert_eq!(job.url, "https://crystalink.example/watch?id=9");
        assert_eq!(job.format, "bv*[height<=720]+ba/b");
        assert_eq!(job.referer.as_deref(), Some("https://crystalink.example/watch?id=9"));
    }

    #[test]
    fn blank_referer_field_disables_header() {
        let req = JobRequest::from_form(form(&[
            ("url", "https://moodle.example/v"),
            ("referer", ""),
            ("quality", "something else"),
        ]))
        .unwrap();
        let JobKind::Page(job) = req.kind else {
            panic!("expected a page job");
        };
        assert_eq!(job.referer, None);
        assert_eq!(job.format, "best");
    }

    #[test]
    fn omitted_quality_means_best() {
        let req = JobRequest::from_form(form(&[("url", "https://moodle.example/v")])).unwrap();
        let JobKind::Page(job) = req.kind else {
            panic!("expected a page job");
        };
        assert_eq!(job.format, "bestvideo*+bestaudio/best");
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        assert!(JobRequest::from_form(form(&[("mode", "page_url"), ("url", "  ")])).is_err());
        assert!(JobRequest::from_form(form(&[("mode", "direct_stream")])).is_err());
        assert!(JobRequest::from_form(form(&[("mode", "bogus"), ("url", "x")])).is_err());
    }

    #[test]
    fn stream_form_defaults_output_name() {
        let req = JobRequest::from_form(form(&[
            ("mode", "direct_stream"),
            ("video_m3u8_url", "https://cdn.example/v.m3u8"),
            ("audio_m3u8_url", ""),
            ("output_name", "  "),
        ]))
        .unwrap();
        assert_eq!(req.mode(), DownloadMode::DirectStream);
        let JobKind::Stream(pair) = req.kind else {
            panic!("expected a stream job");
        };
        assert_eq!(pair.audio_url, None);
        assert_eq!(pair.file_name(), "video.mkv");
    }

    struct WritingExtractor;

    impl Extractor for WritingExtractor {
        fn name(&self) -> &str {
            "fake"
        }

        fn extract_and_download(
            &self,
            _url: &str,
            options: &ExtractorOptions,
            on_event: &mut dyn FnMut(TransferEvent),
        ) -> Result<Option<PathBuf>, String> {
            if options.cookie_file.as_ref().is_some_and(|p| !p.exists()) {
                return Err("cookie file vanished".to_string());
            }
            let dir = PathBuf::from(&options.output_template)
                .parent()
                .unwrap()
                .to_path_buf();
            let out = dir.join("Amphi.mp4");
            std::fs::write(&out, b"mp4").unwrap();
            on_event(TransferEvent {
                status: TransferStatus::Finished,
                downloaded_bytes: 3,
                total_bytes: Some(3),
            });
            Ok(Some(out))
        }
    }

    #[test]
    fn page_job_runs_to_done_with_cookies() {
        let state = AppState::for_tests(Arc::new(WritingExtractor));
        let mut f = form(&[("url", "https://moodle.example/v")]);
        f.cookies = Some(b"# Netscape HTTP Cookie File\n".to_vec());
        let req = JobRequest::from_form(f).unwrap();
        let id = state.jobs.create(req.mode(), None, "x".to_string());

        run_job(&state, id, req);

        let info = state.jobs.get(id).unwrap();
        assert_eq!(info.state, JobState::Done);
        assert_eq!(info.filename.as_deref(), Some("Amphi.mp4"));
        assert_eq!(info.progress.unwrap().fraction, Some(1.0));
    }

    #[test]
    fn stream_job_failure_is_reported_in_french() {
        let state = AppState::for_tests(Arc::new(WritingExtractor));
        let req = JobRequest::from_form(form(&[
            ("mode", "direct_stream"),
            ("video_m3u8_url", "https://cdn.example/v.m3u8"),
        ]))
        .unwrap();
        let id = state.jobs.create(req.mode(), None, "x".to_string());

        run_job(&state, id, req);

        let info = state.jobs.get(id).unwrap();
        assert_eq!(info.state, JobState::Failed);
        assert!(info.message.unwrap().starts_with("Échec : failed to start"));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let state = AppState::for_tests(Arc::new(WritingExtractor));
        let err = get_job(State(state), Path(42)).await.unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }
}
