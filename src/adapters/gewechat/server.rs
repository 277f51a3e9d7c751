use crate::plugins::revocation::temp_store::TempStore;
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const MAX_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    tx: mpsc::Sender<Vec<u8>>,
    store: TempStore,
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    file: Option<String>,
}

/// 回调路由：任意路径的 POST 进入事件队列，GET `?file=tmp/..` 提供临时文件下载
pub fn router(tx: mpsc::Sender<Vec<u8>>, store: TempStore) -> Router {
    Router::new()
        .route("/", get(serve_file).post(collect))
        .route("/{*path}", get(serve_file).post(collect))
        .layer(DefaultBodyLimit::max(MAX_BODY))
        .with_state(AppState { tx, store })
}

pub async fn serve(listener: TcpListener, tx: mpsc::Sender<Vec<u8>>, store: TempStore) {
    if let Err(e) = axum::serve(listener, router(tx, store)).await {
        error!(target: "Gewechat", "回调服务运行错误: {}", e);
    }
}

async fn collect(State(state): State<AppState>, body: Bytes) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }
    match state.tx.send(body.to_vec()).await {
        Ok(()) => (
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"ret":200,"msg":"ok"}"#,
        )
            .into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "queue closed").into_response(),
    }
}

async fn serve_file(State(state): State<AppState>, Query(query): Query<FileQuery>) -> Response {
    let Some(rel) = query.file else {
        return "ok".into_response();
    };
    let Some(path) = state.store.resolve_public(&rel) else {
        debug!(target: "Gewechat", "拒绝的文件请求: {}", rel);
        return StatusCode::NOT_FOUND.into_response();
    };
    match fs::read(&path).await {
        Ok(bytes) => {
            debug!(target: "Gewechat", "提供临时文件: {}", rel);
            ([(header::CONTENT_TYPE, mime_for(&path))], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
