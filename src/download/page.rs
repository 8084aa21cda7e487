//! 页面 URL 模式：交给提取后端下载，返回最终文件。

use std::path::Path;

use tracing::{info, warn};

use super::extractor::{Extractor, ExtractorOptions, resolve_output_path};
use super::models::{DownloadError, DownloadResult, container_mime};
use super::normalize::loggable_url;
use super::progress::{ProgressObserver, make_reporter};
use crate::base_system::context::Config;

/// Inputs of one page-URL download.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub url: &'a str,
    pub format: &'a str,
    pub cookie_file: Option<&'a Path>,
    pub referer: Option<&'a str>,
}

/// Downloads `req.url` through `extractor` into a fresh temporary directory.
///
/// Any backend failure comes back as [`DownloadError::Extraction`] carrying
/// the backend's own text; the temporary directory is removed with it.
pub fn download_via_extractor(
    extractor: &dyn Extractor,
    req: &PageRequest<'_>,
    cfg: &Config,
    progress: Option<ProgressObserver>,
) -> Result<DownloadResult, DownloadError> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(DownloadError::Extraction("no page URL given".to_string()));
    }

    let work_dir = tempfile::Builder::new().prefix("cvd-page-").tempdir()?;

    let mut options = ExtractorOptions::new(work_dir.path(), req.format)
        .with_referer(req.referer)
        .with_cookie_file(req.cookie_file);
    options.merge_output_format = cfg.merge_output_format.clone();
    options.concurrent_fragments = cfg.concurrent_fragments.max(1);

    info!(
        target: "job",
        backend = extractor.name(),
        url = loggable_url(url),
        format = req.format,
        cookies = req.cookie_file.is_some(),
        referer = req.referer.is_some(),
        "page download started"
    );

    let mut reporter = make_reporter(progress);
    let reported = extractor
        .extract_and_download(url, &options, &mut |ev| reporter.handle(ev))
        .map_err(|msg| {
            warn!(target: "job", url = loggable_url(url), "extraction failed");
            DownloadError::Extraction(msg)
        })?;
    reporter.finish();

    let path = resolve_output_path(
        work_dir.path(),
        reported.as_deref(),
        &options.merge_output_format,
    )
    .ok_or_else(|| {
        DownloadError::Extraction("download finished but no output file was found".to_string())
    })?;

    let mime = container_mime(&options.merge_output_format);
    let result = DownloadResult::new(work_dir, path, mime);
    info!(target: "job", file = result.filename(), bytes = result.size(), "page download finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::download::models::Quality;
    use crate::download::normalize::quality_to_format;
    use crate::download::progress::{TransferEvent, TransferStatus};

    /// Simulated backend: records the options it got and writes files into the work dir.
    struct FakeExtractor {
        seen: Mutex<Option<ExtractorOptions>>,
        files: Vec<(&'static str, &'static str)>,
        report: Option<&'static str>,
        fail_with: Option<&'static str>,
    }

    impl FakeExtractor {
        fn writing(files: Vec<(&'static str, &'static str)>, report: Option<&'static str>) -> Self {
            Self {
                seen: Mutex::new(None),
                files,
                report,
                fail_with: None,
            }
        }

        fn failing(msg: &'static str) -> Self {
            Self {
                seen: Mutex::new(None),
                files: Vec::new(),
                report: None,
                fail_with: Some(msg),
            }
        }
    }

    impl Extractor for FakeExtractor {
        fn name(&self) -> &str {
            "fake"
        }

        fn extract_and_download(
            &self,
            _url: &str,
            options: &ExtractorOptions,
            on_event: &mut dyn FnMut(TransferEvent),
        ) -> Result<Option<PathBuf>, String> {
            *self.seen.lock().unwrap() = Some(options.clone());
            let dir = PathBuf::from(&options.output_template)
                .parent()
                .unwrap()
                .to_path_buf();
            on_event(TransferEvent {
                status: TransferStatus::Downloading,
                downloaded_bytes: 40,
                total_bytes: Some(100),
            });
            if let Some(msg) = self.fail_with {
                fs::write(dir.join("partial.mp4.part"), b"half").unwrap();
                return Err(msg.to_string());
            }
            for (name, data) in &self.files {
                fs::write(dir.join(name), data).unwrap();
            }
            on_event(TransferEvent {
                status: TransferStatus::Finished,
                downloaded_bytes: 100,
                total_bytes: Some(100),
            });
            Ok(self.report.map(|r| dir.join(r)))
        }
    }

    fn quiet() -> Option<ProgressObserver> {
        Some(Box::new(|_| {}))
    }

    fn request(format: &str) -> PageRequest<'_> {
        PageRequest {
            url: "https://moodle.example/mod/resource/view.php?id=42",
            format,
            cookie_file: None,
            referer: Some("https://moodle.example/mod/resource/view.php?id=42"),
        }
    }

    #[test]
    fn backend_error_becomes_extraction_failure() {
        let fake = FakeExtractor::failing("ERROR: HTTP Error 403: Forbidden");
        let err =
            download_via_extractor(&fake, &request("best"), &Config::default(), quiet()).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(err.to_string().contains("403: Forbidden"));

        // The work directory (and the partial file) went away with the error.
        let seen = fake.seen.lock().unwrap().clone().unwrap();
        let dir = PathBuf::from(seen.output_template).parent().unwrap().to_path_buf();
        assert!(!dir.exists());
    }

    #[test]
    fn plain_403_text_is_kept_verbatim() {
        let fake = FakeExtractor::failing("403 Forbidden");
        let err =
            download_via_extractor(&fake, &request("best"), &Config::default(), quiet()).unwrap_err();
        assert_eq!(err.to_string(), "403 Forbidden");
    }

    #[test]
    fn options_follow_request_and_config() {
        let fake = FakeExtractor::writing(vec![("Cours.mp4", "mp4")], Some("Cours.mp4"));
        let cookie = PathBuf::from("/tmp/cookies.txt");
        let req = PageRequest {
            cookie_file: Some(&cookie),
            ..request("bv*[height<=720]+ba/b")
        };
        download_via_extractor(&fake, &req, &Config::default(), quiet()).unwrap();

        let seen = fake.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.format, "bv*[height<=720]+ba/b");
        assert_eq!(seen.merge_output_format, "mp4");
        assert_eq!(seen.concurrent_fragments, 5);
        assert_eq!(seen.cookie_file.as_deref(), Some(cookie.as_path()));
        assert_eq!(
            seen.http_headers.get("Referer").map(String::as_str),
            Some("https://moodle.example/mod/resource/view.php?id=42")
        );
        assert!(seen.output_template.ends_with("%(title)s.%(ext)s"));
    }

    #[test]
    fn audio_only_result_takes_merged_container() {
        let format = quality_to_format("Audio seulement");
        assert_eq!(format, Quality::AudioOnly.format_expression());

        // Backend reports the pre-merge name; the merge step produced the mp4.
        let fake = FakeExtractor::writing(
            vec![("Cours 3.webm", "webm"), ("Cours 3.mp4", "merged")],
            Some("Cours 3.webm"),
        );
        let snaps = Arc::new(Mutex::new(Vec::new()));
        let sink = snaps.clone();
        let result = download_via_extractor(
            &fake,
            &request(format),
            &Config::default(),
            Some(Box::new(move |s| sink.lock().unwrap().push(s))),
        )
        .unwrap();

        assert_eq!(result.filename(), "Cours 3.mp4");
        assert_eq!(result.mime(), "video/mp4");
        assert_eq!(result.read_bytes().unwrap(), b"merged");

        let snaps = snaps.lock().unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].fraction, Some(0.4));
        assert_eq!(snaps[1].fraction, Some(1.0));
    }

    #[test]
    fn matroska_merge_container_is_served_as_matroska() {
        let fake = FakeExtractor::writing(vec![("Cours.mkv", "mkv")], Some("Cours.mkv"));
        let cfg = Config {
            merge_output_format: "mkv".to_string(),
            ..Config::default()
        };
        let result = download_via_extractor(&fake, &request("best"), &cfg, quiet()).unwrap();
        assert_eq!(result.filename(), "Cours.mkv");
        assert_eq!(result.mime(), "video/x-matroska");
        assert_eq!(fake.seen.lock().unwrap().as_ref().unwrap().merge_output_format, "mkv");
    }

    #[test]
    fn unreported_path_is_found_by_scanning() {
        let fake = FakeExtractor::writing(vec![("Lecture.m4a", "audio")], None);
        let req = request("bestaudio/best");
        let result = download_via_extractor(&fake, &req, &Config::default(), quiet()).unwrap();
        assert_eq!(result.filename(), "Lecture.m4a");
    }

    #[test]
    fn nothing_written_is_a_failure() {
        let fake = FakeExtractor::writing(Vec::new(), None);
        let err =
            download_via_extractor(&fake, &request("best"), &Config::default(), quiet()).unwrap_err();
        assert_eq!(err.kind(), "extraction");
    }

    #[test]
    fn empty_url_is_rejected_before_the_backend_runs() {
        let fake = FakeExtractor::writing(Vec::new(), None);
        let req = PageRequest {
            url: "   ",
            ..request("best")
        };
        let err = download_via_extractor(&fake, &req, &Config::default(), quiet()).unwrap_err();
        assert_eq!(err.kind(), "extraction");
        assert!(fake.seen.lock().unwrap().is_none());
    }
}
