use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::base_system::context::Config;
use crate::download::models::Quality;
use crate::ui::web::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) async fn api_status(State(state): State<AppState>) -> Json<Value> {
    let cfg: &Config = &state.config;
    let qualities: Vec<&str> = Quality::ALL.iter().map(|q| q.label()).collect();
    Json(json!({
        "version": VERSION,
        "bind_addrs": state.bind_addrs.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
        "tools": state.tools.as_ref(),
        "qualities": qualities,
        "platforms": ["Moodle", "Crystalink"],
        "config": {
            "merge_output_format": cfg.merge_output_format,
            "concurrent_fragments": cfg.concurrent_fragments,
            "result_ttl_secs": cfg.result_ttl_secs,
        }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::download::extractor::YtDlp;

    #[tokio::test]
    async fn status_lists_qualities_and_bind() {
        let state = AppState::for_tests(Arc::new(YtDlp::from_command(&["yt-dlp".to_string()])));
        let Json(v) = api_status(State(state)).await;
        assert_eq!(v["version"], VERSION);
        assert_eq!(v["bind_addrs"][0], "127.0.0.1:18424");
        assert_eq!(v["qualities"][3], "Audio seulement");
        assert_eq!(v["config"]["merge_output_format"], "mp4");
    }
}
