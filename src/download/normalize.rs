//! 用户输入归一化：画质 → 格式表达式、cookies 临时文件、Referer、输出文件名。

use std::io::{self, Write};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tempfile::NamedTempFile;

use super::models::{FALLBACK_FORMAT, Quality};

pub const DEFAULT_OUTPUT_NAME: &str = "video";

/// Maps a quality label (or slug) to a yt-dlp format expression. Never fails.
pub fn quality_to_format(label: &str) -> &'static str {
    Quality::from_label(label)
        .map(Quality::format_expression)
        .unwrap_or(FALLBACK_FORMAT)
}

fn illegal_name_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-\s\.]+").expect("static regex"))
}

/// Replaces every run of characters outside `[\w\-\s.]` with `_`.
///
/// Falls back to [`DEFAULT_OUTPUT_NAME`] when nothing of the input survives,
/// e.g. `"???"` or an empty field.
pub fn sanitize_output_name(raw: &str) -> String {
    let re = illegal_name_chars();
    let survived = re
        .split(raw)
        .any(|part| part.chars().any(|c| !c.is_whitespace()));
    if !survived {
        return DEFAULT_OUTPUT_NAME.to_string();
    }
    re.replace_all(raw, "_").trim().to_string()
}

/// `None` for the field means "not sent": the page URL doubles as Referer.
/// An explicitly blank field disables the header.
pub fn resolve_referer(url: &str, field: Option<&str>) -> Option<String> {
    let value = match field {
        Some(v) => v.trim(),
        None => url.trim(),
    };
    (!value.is_empty()).then(|| value.to_string())
}

/// Strips query string and fragment, which often carry signed tokens.
pub fn loggable_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// An uploaded cookies.txt written to a private temporary file.
///
/// The file exists exactly as long as the handle; it is never cached across
/// requests.
#[derive(Debug)]
pub struct CookieFile {
    file: NamedTempFile,
}

impl CookieFile {
    /// Returns `Ok(None)` when nothing (or an empty file) was uploaded.
    pub fn materialize(upload: Option<&[u8]>) -> io::Result<Option<Self>> {
        let Some(bytes) = upload.filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        let mut file = tempfile::Builder::new()
            .prefix("cvd-cookies-")
            .suffix(".txt")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Some(Self { file }))
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
