//! HTTP surface: `GET /images/{identifier}` streams the discovery ISO.
//!
//! Errors never carry a body; the cause is logged and only the status code
//! reaches the client. Once the shutdown token fires, bodies still streaming
//! end early and connections get a bounded grace period to drain.

mod range;

use std::io::{self, SeekFrom};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::resolver::VersionResolver;
use crate::store::ImageStore;

pub use range::ByteRange;

static DOWNLOAD_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/images/([^/]+)$").expect("download path pattern is valid"));

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    store: Arc<ImageStore>,
    resolver: Arc<dyn VersionResolver>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<ImageStore>,
        resolver: Arc<dyn VersionResolver>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            resolver,
            shutdown,
        }
    }
}

/// Build the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/images/{*rest}", get(download_image))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` until `shutdown` fires.
///
/// After the signal no new connections are accepted. Connections still open
/// when `grace` runs out are abandoned so a stalled client cannot hold the
/// process.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    grace: Duration,
) -> io::Result<()> {
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    let deadline = async {
        shutdown.cancelled().await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result,
        _ = deadline => {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Connections still open after shutdown grace period, closing"
            );
            Ok(())
        }
    }
}

/// Extract the cluster identifier from a download path.
pub fn parse_cluster_id(path: &str) -> Option<&str> {
    DOWNLOAD_PATH
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn download_image(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let Some(cluster_id) = parse_cluster_id(uri.path()) else {
        warn!(path = %uri.path(), "Malformed download path");
        return StatusCode::NOT_FOUND.into_response();
    };

    let version = match state.resolver.resolve(cluster_id).await {
        Ok(version) => version,
        Err(e) => {
            error!(cluster_id = %cluster_id, error = %e, "Failed to resolve cluster version");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    debug!(cluster_id = %cluster_id, version = %version, "Serving discovery image");

    let file = match state.store.base_file(&version).await {
        Ok(file) => file,
        Err(e) => {
            error!(version = %version, error = %e, "Error getting base image");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(e) => {
            error!(version = %version, error = %e, "Error getting file info");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let modified = match metadata.modified() {
        Ok(modified) => range::last_modified(modified),
        Err(e) => {
            error!(version = %version, error = %e, "Error getting modification time");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let file_name = format!("{cluster_id}-discovery.iso").replace('"', "\\\"");
    let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
    else {
        error!(cluster_id = %cluster_id, "Cluster ID cannot be used as a file name");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let last_modified = range::format_http_date(modified);

    // Preconditions first, then If-Range decides whether Range is honoured.
    let header_date = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(range::parse_http_date)
    };
    if let Some(since) = header_date(header::IF_UNMODIFIED_SINCE)
        && modified > since
    {
        return StatusCode::PRECONDITION_FAILED.into_response();
    }
    if let Some(since) = header_date(header::IF_MODIFIED_SINCE)
        && modified <= since
    {
        return (
            StatusCode::NOT_MODIFIED,
            [(header::LAST_MODIFIED, last_modified)],
        )
            .into_response();
    }

    let range_allowed = match headers.get(header::IF_RANGE) {
        None => true,
        Some(value) => value
            .to_str()
            .ok()
            .and_then(range::parse_http_date)
            .is_some_and(|date| date == modified),
    };
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .filter(|_| range_allowed);

    let size = metadata.len();
    let (status, start, len, content_range) = match ByteRange::parse(range_header, size) {
        ByteRange::Full => (StatusCode::OK, 0, size, None),
        ByteRange::Partial { start, end } => (
            StatusCode::PARTIAL_CONTENT,
            start,
            end - start + 1,
            Some(format!("bytes {start}-{end}/{size}")),
        ),
        ByteRange::Unsatisfiable => {
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{size}"))],
            )
                .into_response();
        }
    };

    let mut file = file;
    if start > 0
        && let Err(e) = file.seek(SeekFrom::Start(start)).await
    {
        error!(version = %version, error = %e, "Error seeking in base image");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // The handle lives inside the body stream and is closed when the body is
    // finished, the connection is dropped or the service shuts down.
    let stream = ReaderStream::new(file.take(len))
        .take_until(state.shutdown.clone().cancelled_owned());
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    response_headers.insert(header::CONTENT_DISPOSITION, disposition);
    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        response_headers.insert(header::LAST_MODIFIED, value);
    }
    if let Some(content_range) = content_range
        && let Ok(value) = HeaderValue::from_str(&content_range)
    {
        response_headers.insert(header::CONTENT_RANGE, value);
    }

    response
}
