//! Upload ingestion: validate, name, place, probe, identify, catalog.
//!
//! Every step from naming through the catalog append runs under one commit
//! lock. Resolving a name and creating the file are separate filesystem
//! calls, and so are reading and rewriting the catalog document; holding the
//! lock across both pairs is what keeps two concurrent `clip.mp4` uploads
//! from landing on the same name or losing an append. Probing sits inside
//! the lock as well because the record cannot be committed without it.
//! Nothing is retried; the first failing step ends the upload.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tempfile::{PathPersistError, TempPath};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    catalog::{CatalogStore, VideoRecord},
    error::{CatalogError, ToolError, UploadError},
    naming::{create_unique_file, resolve_unique_name, split_name},
    probe::{DurationProbe, round_seconds},
    security::{redact_root, sanitize_upload_name},
};

/// Directory name of the storage root under the media root. Record paths are
/// expressed relative to the media root, e.g. `videos/clip.mp4`.
pub const STORAGE_DIR: &str = "videos";

/// The fixed allow-list of accepted media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Mp4,
    Mov,
    MpegAudio,
}

impl MediaKind {
    /// Matches a declared media type, ignoring case and parameters such as
    /// `; codecs=...`.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "video/mp4" => Some(Self::Mp4),
            "video/quicktime" => Some(Self::Mov),
            "audio/mpeg" => Some(Self::MpegAudio),
            _ => None,
        }
    }

    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::MpegAudio => "mp3",
        }
    }
}

/// Checks a declared media type against the allow-list.
pub fn validate_media_type(media_type: &str) -> Result<MediaKind, UploadError> {
    MediaKind::from_media_type(media_type).ok_or_else(|| {
        UploadError::Validation(format!(
            "Only mp4, mov, and mp3 formats are allowed (got {media_type:?})"
        ))
    })
}

/// A received file waiting in the staging area. Dropping it before it is
/// placed deletes the staged bytes.
pub struct IncomingUpload {
    pub staged: TempPath,
    pub original_name: Option<String>,
    pub media_type: String,
}

pub struct UploadPipeline {
    storage_root: PathBuf,
    catalog: Arc<CatalogStore>,
    probe: Arc<dyn DurationProbe>,
    commit_lock: Mutex<()>,
}

impl UploadPipeline {
    pub fn new(
        storage_root: impl Into<PathBuf>,
        catalog: Arc<CatalogStore>,
        probe: Arc<dyn DurationProbe>,
    ) -> Self {
        Self {
            storage_root: storage_root.into(),
            catalog,
            probe,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn catalog(&self) -> &Arc<CatalogStore> {
        &self.catalog
    }

    /// Runs one upload to completion and returns the committed record.
    /// Error text is stripped of the absolute media root.
    pub async fn ingest(&self, upload: IncomingUpload) -> Result<VideoRecord, UploadError> {
        self.commit(upload)
            .await
            .map_err(|err| self.redact_error(err))
    }

    async fn commit(&self, upload: IncomingUpload) -> Result<VideoRecord, UploadError> {
        let IncomingUpload {
            staged,
            original_name,
            media_type,
        } = upload;

        let kind = validate_media_type(&media_type)?;
        let desired = match original_name.as_deref() {
            Some(raw) => sanitize_upload_name(raw)
                .ok_or_else(|| UploadError::Validation(format!("Invalid file name {raw:?}")))?,
            None => format!("upload.{}", kind.default_extension()),
        };

        let _commit = self.commit_lock.lock().await;

        let root = self.storage_root.clone();
        let stored_name = tokio::task::spawn_blocking(move || place_staged(&root, staged, &desired))
            .await
            .map_err(|err| UploadError::io("placement task", io::Error::other(err)))??;
        let placed = self.storage_root.join(&stored_name);

        let seconds = match self.probe.probe(&placed).await {
            Ok(seconds) => seconds,
            Err(err) => {
                warn!(
                    file = %stored_name,
                    error = %err,
                    "duration probe failed; file is placed but not cataloged"
                );
                return Err(err.into());
            }
        };

        let record = VideoRecord {
            id: Uuid::new_v4().to_string(),
            name: split_name(&stored_name).0.to_string(),
            description: String::new(),
            duration: round_seconds(seconds),
            path: format!("{STORAGE_DIR}/{stored_name}"),
        };

        let catalog = self.catalog.clone();
        let record = tokio::task::spawn_blocking(move || catalog.append(record))
            .await
            .map_err(|err| UploadError::io("catalog task", io::Error::other(err)))?
            .map_err(|err| {
                warn!(
                    file = %stored_name,
                    error = %err,
                    "catalog append failed; file is placed but not cataloged"
                );
                UploadError::from(err)
            })?;

        info!(id = %record.id, path = %record.path, duration = record.duration, "upload cataloged");
        Ok(record)
    }

    /// The storage root becomes `videos` and its parent, the media root,
    /// becomes `.`.
    fn redact(&self, text: &str) -> String {
        let text = redact_root(text, &self.storage_root, STORAGE_DIR);
        match self.storage_root.parent() {
            Some(media_root) => redact_root(&text, media_root, "."),
            None => text,
        }
    }

    fn redact_io(&self, err: io::Error) -> io::Error {
        io::Error::new(err.kind(), self.redact(&err.to_string()))
    }

    fn redact_error(&self, err: UploadError) -> UploadError {
        match err {
            UploadError::Validation(message) => UploadError::Validation(message),
            UploadError::Io { context, source } => UploadError::Io {
                context: self.redact(&context),
                source: self.redact_io(source),
            },
            UploadError::ExternalTool(err) => UploadError::ExternalTool(self.redact_tool(err)),
            UploadError::Persistence(err) => UploadError::Persistence(match err {
                CatalogError::Write { source } => CatalogError::Write {
                    source: self.redact_io(source),
                },
                CatalogError::Read(message) => CatalogError::Read(self.redact(&message)),
                duplicate @ CatalogError::Duplicate { .. } => duplicate,
            }),
        }
    }

    /// Tool output may quote the absolute placed path.
    fn redact_tool(&self, err: ToolError) -> ToolError {
        match err {
            ToolError::Spawn { tool, source } => ToolError::Spawn {
                tool,
                source: self.redact_io(source),
            },
            ToolError::Failed {
                tool,
                status,
                stderr,
            } => ToolError::Failed {
                tool,
                status,
                stderr: self.redact(&stderr),
            },
            ToolError::Parse { tool, message } => ToolError::Parse {
                tool,
                message: self.redact(&message),
            },
        }
    }
}

/// Moves the staged file into `root` under a collision-free name derived
/// from `desired`. Callers must hold the commit lock.
fn place_staged(root: &Path, staged: TempPath, desired: &str) -> Result<String, UploadError> {
    let name = resolve_unique_name(root, desired)
        .map_err(|err| UploadError::io("resolving a unique file name", err))?;
    match staged.persist_noclobber(root.join(&name)) {
        Ok(()) => Ok(name),
        Err(PathPersistError { error, path })
            if matches!(
                error.kind(),
                io::ErrorKind::CrossesDevices | io::ErrorKind::Unsupported
            ) =>
        {
            copy_into_root(root, &path, desired)
        }
        Err(PathPersistError { error, .. }) => {
            Err(UploadError::io(format!("placing upload as {name}"), error))
        }
    }
}

/// Fallback when a rename is impossible: claim a name exclusively and copy
/// the bytes. A partial copy is removed before the error is returned.
fn copy_into_root(root: &Path, staged: &Path, desired: &str) -> Result<String, UploadError> {
    let (name, mut dest) = create_unique_file(root, desired)
        .map_err(|err| UploadError::io("claiming a unique file name", err))?;
    let copied = File::open(staged)
        .and_then(|mut source| io::copy(&mut source, &mut dest))
        .and_then(|_| dest.sync_all());
    if let Err(err) = copied {
        drop(dest);
        if let Err(cleanup) = fs::remove_file(root.join(&name)) {
            error!(file = %name, error = %cleanup, "partially copied upload could not be removed");
        }
        return Err(UploadError::io(format!("copying upload into {name}"), err));
    }
    Ok(name)
}
