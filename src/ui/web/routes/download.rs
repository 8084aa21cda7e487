use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{StatusCode, header};
use axum::response::Response;
use tempfile::TempDir;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::ui::web::routes::jobs::ttl;
use crate::ui::web::state::{AppState, ClaimError};

fn make_content_disposition(filename: &str) -> Option<header::HeaderValue> {
    // RFC 5987 filename* for UTF-8 names, plus ASCII fallback for legacy clients.
    fn is_unreserved(b: u8) -> bool {
        b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_')
    }

    let mut encoded = String::with_capacity(filename.len() * 3);
    for &b in filename.as_bytes() {
        if is_unreserved(b) {
            encoded.push(char::from(b));
        } else {
            encoded.push('%');
            encoded.push_str(&format!("{b:02X}"));
        }
    }

    let ascii_fallback = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback, encoded
    );
    header::HeaderValue::from_str(&value).ok()
}

/// Sends a finished job's file. Works once; the temp directory goes away
/// when the response body is dropped.
pub(crate) async fn download_result(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<u64>,
) -> Result<Response, StatusCode> {
    state.jobs.sweep_expired(ttl(&state));
    let result = state.jobs.take_result(id).map_err(|e| match e {
        ClaimError::NotFound => StatusCode::NOT_FOUND,
        ClaimError::NotReady => StatusCode::CONFLICT,
        ClaimError::Gone => StatusCode::GONE,
    })?;

    let (dir, path, filename, mime) = result.into_parts();
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let len = file.metadata().await.ok().map(|m| m.len());

    let stream = TempDirStream {
        _dir: dir,
        inner: ReaderStream::new(file),
    };
    let body = Body::from_stream(stream);

    let mut resp = Response::new(body);
    *resp.status_mut() = StatusCode::OK;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(mime));
    if let Some(len) = len {
        resp.headers_mut()
            .insert(header::CONTENT_LENGTH, header::HeaderValue::from(len));
    }
    if let Some(hv) = make_content_disposition(&filename) {
        resp.headers_mut().insert(header::CONTENT_DISPOSITION, hv);
    }

    info!(target: "web", id, file = %filename, bytes = len, "result handed out");
    Ok(resp)
}

/// Keeps the job's temporary directory alive while its file is streamed.
struct TempDirStream {
    _dir: TempDir,
    inner: ReaderStream<tokio::fs::File>,
}

impl futures_core::Stream for TempDirStream {
    type Item = Result<axum::body::Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
