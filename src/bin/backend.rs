#![forbid(unsafe_code)]

//! Axum backend for clipshelf.
//!
//! Uploads are spooled into the staging area and handed to the
//! [`UploadPipeline`], which owns naming, placement, probing and the catalog
//! append. Metadata lookups for remote videos go through `yt-dlp`. Stored
//! files are served back from the storage root so a record's `path` can be
//! fetched directly.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path as AxumPath, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use clipshelf::{
    catalog::{CatalogStore, VideoRecord},
    config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config},
    error::{ExtractError, UploadError},
    extract::{self, ExtractedInfo, MetadataExtractor, YtDlp},
    probe::{DurationProbe, Ffprobe},
    security::{ensure_not_root, redact_root},
    upload::{IncomingUpload, UploadPipeline, validate_media_type},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempPath};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    signal,
};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const UPLOAD_FIELD: &str = "file";
const UPLOAD_FAILED: &str = "Failed to process the uploaded video";
const LOOKUP_FAILED: &str = "Failed to process video";
const UPLOAD_REJECTED: &str = "Invalid upload";

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "backend",
    about = "Upload catalog and remote video metadata server"
)]
struct Cli {
    /// Directory holding `videos/`, the staging area and the catalog document
    #[arg(long, value_name = "DIR")]
    media_root: Option<PathBuf>,

    /// TCP port to listen on [default: 3000]
    #[arg(long)]
    port: Option<u16>,

    /// IPv4 or IPv6 address to bind [default: 127.0.0.1]
    #[arg(long)]
    host: Option<String>,

    /// ffprobe executable used for duration probing
    #[arg(long, value_name = "PATH")]
    ffprobe: Option<PathBuf>,

    /// yt-dlp executable used for metadata lookups
    #[arg(long = "yt-dlp", value_name = "PATH")]
    yt_dlp: Option<PathBuf>,

    /// Alternate `.env` file
    #[arg(long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct BackendArgs {
    config: RuntimeConfig,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_cli(Cli::parse())
    }

    fn from_cli(cli: Cli) -> Result<Self> {
        let config = resolve_runtime_config(RuntimeOverrides {
            media_root: cli.media_root,
            clipshelf_port: cli.port,
            clipshelf_host: cli.host,
            ffprobe_bin: cli.ffprobe,
            ytdlp_bin: cli.yt_dlp,
            env_path: cli.env_file,
        })?;
        let listen_host = parse_host_arg(&config.clipshelf_host)?;
        Ok(Self {
            config,
            listen_host,
        })
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/CLIPSHELF_HOST")
}

/// Shared state injected into every Axum handler.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<UploadPipeline>,
    catalog: Arc<CatalogStore>,
    extractor: Arc<dyn MetadataExtractor>,
    files: Arc<FilePaths>,
}

impl AppState {
    fn new(
        config: &RuntimeConfig,
        probe: Arc<dyn DurationProbe>,
        extractor: Arc<dyn MetadataExtractor>,
    ) -> Result<Self> {
        let files = FilePaths::new(config);
        files.prepare()?;
        let catalog = Arc::new(CatalogStore::load(config.catalog_path()));
        let pipeline = Arc::new(UploadPipeline::new(
            files.storage.clone(),
            catalog.clone(),
            probe,
        ));
        Ok(Self {
            pipeline,
            catalog,
            extractor,
            files: Arc::new(files),
        })
    }
}

/// Materialized file-system locations used at runtime.
struct FilePaths {
    media_root: PathBuf,
    storage: PathBuf,
    staging: PathBuf,
}

impl FilePaths {
    fn new(config: &RuntimeConfig) -> Self {
        Self {
            media_root: config.media_root.clone(),
            storage: config.storage_root(),
            staging: config.staging_dir(),
        }
    }

    /// Creates the storage root and staging area, and clears bodies left in
    /// staging by an earlier run.
    fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.storage)
            .with_context(|| format!("creating {}", self.storage.display()))?;
        fs::create_dir_all(&self.staging)
            .with_context(|| format!("creating {}", self.staging.display()))?;
        let entries = fs::read_dir(&self.staging)
            .with_context(|| format!("reading {}", self.staging.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file()
                && let Err(err) = fs::remove_file(&path)
            {
                warn!(path = %path.display(), error = %err, "stale staged upload not removed");
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    /// Creates a 400 error with the provided message.
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a 404 error with the provided message.
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    /// Creates a 500 error with a fixed message and a diagnostic detail.
    fn internal(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Validation(message) => Self {
                details: Some(message),
                ..Self::bad_request(UPLOAD_REJECTED)
            },
            other => {
                error!(error = %other, "upload failed");
                Self::internal(UPLOAD_FAILED, other.to_string())
            }
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Validation(message) => Self::bad_request(message),
            ExtractError::Tool(err) => {
                error!(error = %err, "metadata lookup failed");
                Self::internal(LOOKUP_FAILED, err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => serde_json::json!({
                "error": self.message,
                "details": details,
            }),
            None => serde_json::json!({
                "error": self.message,
            }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let BackendArgs {
        config,
        listen_host,
    } = BackendArgs::parse()?;

    ensure_not_root("backend")?;

    let state = AppState::new(
        &config,
        Arc::new(Ffprobe::new(config.ffprobe_bin.clone())),
        Arc::new(YtDlp::new(config.ytdlp_bin.clone())),
    )?;
    info!(
        media_root = %config.media_root.display(),
        videos = state.catalog.len(),
        "catalog ready"
    );

    let addr = SocketAddr::new(listen_host, config.clipshelf_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_video))
        .route("/api/extract-info", get(extract_info))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/{id}", get(get_video))
        .route("/videos/{file}", get(stream_stored_file))
        .fallback(fallback)
        // Uploads have no size limit.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on the handler; Ctrl+C still ends the
    // process when installation fails.
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn fallback(req: Request<Body>) -> ApiError {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        ApiError::not_found("endpoint not found")
    } else {
        ApiError::not_found("not found")
    }
}

#[derive(Serialize)]
struct UploadResponse {
    status: &'static str,
    message: &'static str,
    video: VideoRecord,
}

async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let upload = loop {
        let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? else {
            return Err(ApiError::bad_request("File is required"));
        };
        // Text fields, including a filename-less `file`, are ignored.
        if field.name() != Some(UPLOAD_FIELD) || field.file_name().is_none() {
            continue;
        }
        let original_name = field.file_name().map(str::to_string);
        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        // Reject before spooling a body that would be discarded anyway.
        validate_media_type(&media_type)?;
        let staged = spool_field(&state.files, &mut field).await?;
        break IncomingUpload {
            staged,
            original_name,
            media_type,
        };
    };

    let video = state.pipeline.ingest(upload).await?;
    Ok(Json(UploadResponse {
        status: "success",
        message: "File uploaded and video information extracted",
        video,
    }))
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::bad_request(format!("Failed to read multipart body: {err}"))
}

/// Streams one multipart field into a fresh file in the staging area. The
/// returned path deletes the file when dropped.
async fn spool_field(files: &FilePaths, field: &mut Field<'_>) -> ApiResult<TempPath> {
    let staging_error = |err: std::io::Error| {
        error!(error = %err, "staging upload failed");
        let details = redact_root(&format!("staging upload: {err}"), &files.media_root, ".");
        ApiError::internal(UPLOAD_FAILED, details)
    };
    let (std_file, staged) = NamedTempFile::new_in(&files.staging)
        .map_err(staging_error)?
        .into_parts();
    let mut file = File::from_std(std_file);
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await.map_err(staging_error)?;
    }
    file.flush().await.map_err(staging_error)?;
    Ok(staged)
}

#[derive(Deserialize)]
struct ExtractQuery {
    video_url: Option<String>,
}

#[derive(Serialize)]
struct ExtractResponse {
    status: &'static str,
    #[serde(flatten)]
    info: ExtractedInfo,
}

async fn extract_info(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> ApiResult<Json<ExtractResponse>> {
    let info = extract::lookup(state.extractor.as_ref(), query.video_url.as_deref()).await?;
    Ok(Json(ExtractResponse {
        status: "success",
        info,
    }))
}

async fn list_videos(State(state): State<AppState>) -> Json<Vec<VideoRecord>> {
    Json(state.catalog.list())
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoRecord>> {
    state
        .catalog
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("video not found"))
}

async fn stream_stored_file(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&file)?;
    stream_file(state.files.storage.join(&file), &headers).await
}

/// Validates that a single dynamic path segment never escapes its base folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    if value.is_empty()
        || Path::new(value)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }

    Ok(())
}

async fn stream_file(path: PathBuf, headers: &HeaderMap) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    if !metadata.is_file() {
        return Err(ApiError::not_found("file not found"));
    }
    let size = metadata.len();

    let guessed = MimeGuess::from_path(&path).first();
    let range = headers
        .get(header::RANGE)
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            response
                .headers_mut()
                .insert(header::CONTENT_RANGE, header_value(format!("bytes */{size}"))?);
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            response.headers_mut().insert(
                header::CONTENT_RANGE,
                header_value(format!("bytes {start}-{end}/{size}"))?,
            );
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            response
        }
        None => {
            let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            response
        }
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn header_value(value: String) -> ApiResult<HeaderValue> {
    HeaderValue::try_from(value)
        .map_err(|err| ApiError::internal("Failed to build response", err.to_string()))
}

/// Parses a single `bytes=` range, including open-ended and suffix forms.
fn parse_range_header(value: &HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    if range.is_empty() || range.contains(',') {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        // Suffix range: "-N" means last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 || size == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size - 1));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use clipshelf::error::ToolError;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::{
        io::Write,
        os::unix::process::ExitStatusExt,
        process::ExitStatus,
    };
    use tempfile::{TempDir, tempdir};
    use tower::ServiceExt;

    const BOUNDARY: &str = "clipshelf-test-boundary";

    /// Answers with a fixed duration, or fails quoting the probed path the
    /// way ffprobe does.
    struct FakeProbe(Result<f64, String>);

    #[async_trait]
    impl DurationProbe for FakeProbe {
        async fn probe(&self, path: &Path) -> Result<f64, ToolError> {
            self.0.clone().map_err(|reason| ToolError::Parse {
                tool: "ffprobe".into(),
                message: format!("{}: {reason}", path.display()),
            })
        }
    }

    struct FakeExtractor {
        payload: Result<Value, String>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl MetadataExtractor for FakeExtractor {
        async fn dump(&self, _url: &str) -> Result<Value, ToolError> {
            *self.calls.lock() += 1;
            self.payload.clone().map_err(|stderr| ToolError::Failed {
                tool: "yt-dlp".into(),
                status: ExitStatus::from_raw(1 << 8),
                stderr,
            })
        }
    }

    fn remote_clip() -> Value {
        json!({
            "title": "Remote clip",
            "formats": [
                {"format_id": "18", "vcodec": "h264", "acodec": "aac"},
                {"format_id": "140", "vcodec": "none", "acodec": "aac"}
            ]
        })
    }

    struct BackendTestContext {
        temp: TempDir,
        state: AppState,
        extractor: Arc<FakeExtractor>,
    }

    impl BackendTestContext {
        fn new() -> Self {
            Self::with_fakes(Ok(30.2), Ok(remote_clip()))
        }

        fn with_fakes(probe: Result<f64, String>, payload: Result<Value, String>) -> Self {
            let temp = tempdir().unwrap();
            let config = config_for(temp.path());
            let extractor = Arc::new(FakeExtractor {
                payload,
                calls: Mutex::new(0),
            });
            let state =
                AppState::new(&config, Arc::new(FakeProbe(probe)), extractor.clone()).unwrap();
            Self {
                temp,
                state,
                extractor,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (status, headers, body.to_vec())
        }

        async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
            let (status, _, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        fn storage_entries(&self) -> usize {
            fs::read_dir(self.temp.path().join("videos")).unwrap().count()
        }

        fn staging_entries(&self) -> usize {
            fs::read_dir(self.temp.path().join(".incoming"))
                .unwrap()
                .count()
        }
    }

    fn config_for(media_root: &Path) -> RuntimeConfig {
        let env_path = media_root.join("absent.env");
        resolve_runtime_config(RuntimeOverrides {
            media_root: Some(media_root.to_path_buf()),
            env_path: Some(env_path),
            ..RuntimeOverrides::default()
        })
        .unwrap()
    }

    fn multipart_request(parts: &[(&str, Option<&str>, Option<&str>, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, filename, content_type, content) in parts {
            write!(body, "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"").unwrap();
            if let Some(filename) = filename {
                write!(body, "; filename=\"{filename}\"").unwrap();
            }
            body.extend_from_slice(b"\r\n");
            if let Some(content_type) = content_type {
                write!(body, "Content-Type: {content_type}\r\n").unwrap();
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        write!(body, "--{BOUNDARY}--\r\n").unwrap();

        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn cli_overrides_reach_runtime_config() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join("backend.env");
        fs::write(&env_path, "MEDIA_ROOT=\"/from-file\"\nCLIPSHELF_PORT=\"7000\"\n").unwrap();
        let cli = Cli::try_parse_from([
            "backend",
            "--media-root",
            "/srv/clips",
            "--port",
            "9090",
            "--host",
            "0.0.0.0",
            "--yt-dlp",
            "/opt/yt-dlp",
            "--env-file",
            env_path.to_str().unwrap(),
        ])
        .unwrap();
        let args = BackendArgs::from_cli(cli).unwrap();
        assert_eq!(args.config.media_root, PathBuf::from("/srv/clips"));
        assert_eq!(args.config.clipshelf_port, 9090);
        assert_eq!(args.config.ytdlp_bin, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(args.listen_host, "0.0.0.0".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn invalid_host_is_rejected() {
        let cli = Cli {
            host: Some("not-an-ip".into()),
            env_file: Some(PathBuf::from("/nonexistent/clipshelf.env")),
            ..Cli::default()
        };
        let err = BackendArgs::from_cli(cli).unwrap_err();
        assert!(err.to_string().contains("CLIPSHELF_HOST"));
    }

    #[test]
    fn prepare_creates_dirs_and_clears_staging() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".incoming")).unwrap();
        fs::write(dir.path().join(".incoming").join(".tmpstale"), b"x").unwrap();
        let files = FilePaths::new(&config_for(dir.path()));
        files.prepare().unwrap();
        assert!(dir.path().join("videos").is_dir());
        assert_eq!(fs::read_dir(dir.path().join(".incoming")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn upload_returns_cataloged_record() {
        let ctx = BackendTestContext::new();
        let request = multipart_request(&[
            ("title", None, None, "ignored"),
            ("file", Some("clip.mp4"), Some("video/mp4"), "fake mp4 bytes"),
        ]);
        let (status, body) = ctx.send_json(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "File uploaded and video information extracted");
        assert_eq!(body["video"]["name"], "clip");
        assert_eq!(body["video"]["duration"], 30);
        assert_eq!(body["video"]["path"], "videos/clip.mp4");
        assert_eq!(body["video"]["description"], "");
        assert_eq!(
            fs::read(ctx.temp.path().join("videos/clip.mp4")).unwrap(),
            b"fake mp4 bytes"
        );
        assert_eq!(ctx.staging_entries(), 0);

        let persisted: Value = serde_json::from_str(
            &fs::read_to_string(ctx.temp.path().join("suggest_video.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(persisted["videos"][0]["id"], body["video"]["id"]);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let ctx = BackendTestContext::new();
        let request = multipart_request(&[("file", None, None, "just text")]);
        let (status, body) = ctx.send_json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "File is required");
        assert_eq!(ctx.storage_entries(), 0);
    }

    #[tokio::test]
    async fn upload_with_disallowed_type_leaves_no_trace() {
        let ctx = BackendTestContext::new();
        let request = multipart_request(&[(
            "file",
            Some("movie.webm"),
            Some("video/webm"),
            "webm bytes",
        )]);
        let (status, body) = ctx.send_json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], UPLOAD_REJECTED);
        assert!(body["details"].as_str().unwrap().contains("mp4, mov, and mp3"));
        assert_eq!(ctx.storage_entries(), 0);
        assert_eq!(ctx.staging_entries(), 0);
        assert!(ctx.state.catalog.is_empty());
    }

    #[tokio::test]
    async fn uploaded_file_is_served_with_ranges() {
        let ctx = BackendTestContext::new();
        let request = multipart_request(&[(
            "file",
            Some("song.mp3"),
            Some("audio/mpeg"),
            "0123456789",
        )]);
        let (status, body) = ctx.send_json(request).await;
        assert_eq!(status, StatusCode::OK);
        let path = body["video"]["path"].as_str().unwrap().to_string();

        let (status, headers, bytes) = ctx.send(get_request(&format!("/{path}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"0123456789");
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");

        let ranged = Request::builder()
            .uri(format!("/{path}"))
            .header(header::RANGE, "bytes=2-5")
            .body(Body::empty())
            .unwrap();
        let (status, headers, bytes) = ctx.send(ranged).await;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(bytes, b"2345");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 2-5/10");
    }

    #[tokio::test]
    async fn stored_file_route_rejects_traversal() {
        let ctx = BackendTestContext::new();
        let (status, _) = ctx.send_json(get_request("/videos/..")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(ensure_safe_path_segment("../suggest_video.json").is_err());
        assert!(ensure_safe_path_segment("clip.mp4").is_ok());
    }

    #[tokio::test]
    async fn video_listing_and_lookup() {
        let ctx = BackendTestContext::new();
        for name in ["a.mp4", "a.mp4"] {
            let request = multipart_request(&[("file", Some(name), Some("video/mp4"), "x")]);
            assert_eq!(ctx.send_json(request).await.0, StatusCode::OK);
        }

        let (status, list) = ctx.send_json(get_request("/api/videos")).await;
        assert_eq!(status, StatusCode::OK);
        let list = list.as_array().unwrap().clone();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["path"], "videos/a.mp4");
        assert_eq!(list[1]["path"], "videos/a_1.mp4");

        let id = list[1]["id"].as_str().unwrap();
        let (status, single) = ctx.send_json(get_request(&format!("/api/videos/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(single["name"], "a_1");

        let (status, body) = ctx.send_json(get_request("/api/videos/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "video not found");
    }

    #[tokio::test]
    async fn extract_info_reshapes_tool_output() {
        let ctx = BackendTestContext::new();
        let (status, body) = ctx
            .send_json(get_request(
                "/api/extract-info?video_url=https%3A%2F%2Fexample.test%2Fwatch%3Fv%3D1",
            ))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["videoTitle"], "Remote clip");
        assert_eq!(
            body["videoAndAudioFormats"],
            json!([{"format_id": "18", "vcodec": "h264", "acodec": "aac"}])
        );
    }

    #[tokio::test]
    async fn extract_info_requires_url() {
        let ctx = BackendTestContext::new();
        let (status, body) = ctx.send_json(get_request("/api/extract-info")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing video_url parameter");
        assert_eq!(*ctx.extractor.calls.lock(), 0);
    }

    #[tokio::test]
    async fn upload_probe_failure_is_500_with_details() {
        let ctx = BackendTestContext::with_fakes(
            Err("Invalid data found when processing input".into()),
            Ok(remote_clip()),
        );
        let media_root = ctx.temp.path().display().to_string();
        let request = multipart_request(&[("file", Some("broken.mp4"), Some("video/mp4"), "x")]);

        let (status, body) = ctx.send_json(request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], UPLOAD_FAILED);
        let details = body["details"].as_str().unwrap();
        assert!(details.contains("videos/broken.mp4: Invalid data"), "{details}");
        assert!(!details.contains(&media_root), "{details}");
        assert!(ctx.temp.path().join("videos/broken.mp4").is_file());
        assert!(ctx.state.catalog.is_empty());
        assert!(!ctx.temp.path().join("suggest_video.json").exists());
    }

    #[tokio::test]
    async fn staging_failure_details_stay_relative() {
        let ctx = BackendTestContext::new();
        let media_root = ctx.temp.path().display().to_string();
        fs::remove_dir(ctx.temp.path().join(".incoming")).unwrap();
        let request = multipart_request(&[("file", Some("clip.mp4"), Some("video/mp4"), "x")]);

        let (status, body) = ctx.send_json(request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], UPLOAD_FAILED);
        let details = body["details"].as_str().unwrap();
        assert!(details.contains("./.incoming"), "{details}");
        assert!(!details.contains(&media_root), "{details}");
        assert_eq!(ctx.storage_entries(), 0);
    }

    #[tokio::test]
    async fn extract_tool_failure_is_500_with_details() {
        let ctx = BackendTestContext::with_fakes(
            Ok(1.0),
            Err("ERROR: Unsupported URL: https://example.test/".into()),
        );
        let (status, body) = ctx
            .send_json(get_request(
                "/api/extract-info?video_url=https%3A%2F%2Fexample.test%2F",
            ))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], LOOKUP_FAILED);
        let details = body["details"].as_str().unwrap();
        assert!(details.contains("Unsupported URL"), "{details}");
        assert_eq!(*ctx.extractor.calls.lock(), 1);
    }

    #[tokio::test]
    async fn unknown_api_route_is_json_404() {
        let ctx = BackendTestContext::new();
        let (status, body) = ctx.send_json(get_request("/api/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "endpoint not found");
    }

    #[tokio::test]
    async fn api_error_serializes_details() {
        let response = ApiError::internal(UPLOAD_FAILED, "disk full").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], UPLOAD_FAILED);
        assert_eq!(parsed["details"], "disk full");

        let response = ApiError::not_found("missing").into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"], "missing");
        assert!(parsed.get("details").is_none());
    }

    #[test]
    fn parse_range_header_forms() {
        let value = |raw: &str| HeaderValue::from_str(raw).unwrap();
        assert_eq!(parse_range_header(&value("bytes=0-99"), 1000), Some((0, 99)));
        assert_eq!(parse_range_header(&value("bytes=500-"), 1000), Some((500, 999)));
        assert_eq!(parse_range_header(&value("bytes=-100"), 1000), Some((900, 999)));
        assert_eq!(parse_range_header(&value("bytes=-5000"), 1000), Some((0, 999)));
        assert_eq!(parse_range_header(&value("bytes=9-3"), 1000), None);
        assert_eq!(parse_range_header(&value("items=0-1"), 1000), None);
        assert_eq!(parse_range_header(&value("bytes=0-1,4-5"), 1000), None);
    }
}
