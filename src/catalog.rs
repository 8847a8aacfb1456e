//! The video catalog and its JSON mirror on disk.
//!
//! [`CatalogStore`] owns both the in-memory sequence and the document path.
//! Every append rewrites the whole document before it is acknowledged, and a
//! failed rewrite pops the record again so memory never runs ahead of disk.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::error::CatalogError;

/// One cataloged upload, serialized with these exact field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub duration: u64,
    pub path: String,
}

/// On-disk shape: `{"videos": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    videos: Vec<VideoRecord>,
}

/// Borrowing twin of [`CatalogDocument`] so a flush does not clone records.
#[derive(Serialize)]
struct CatalogDocumentRef<'a> {
    videos: &'a [VideoRecord],
}

/// What [`CatalogStore::open`] found on disk.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded { count: usize },
    Missing,
    /// The document existed but could not be read or parsed; the store
    /// starts empty.
    Recovered { error: CatalogError },
}

pub struct CatalogStore {
    path: PathBuf,
    videos: Mutex<Vec<VideoRecord>>,
}

impl CatalogStore {
    /// Reads the document at `path`. Never fails: a missing or corrupt
    /// document yields an empty store and the reason in [`LoadOutcome`].
    pub fn open(path: impl Into<PathBuf>) -> (Self, LoadOutcome) {
        let path = path.into();
        let (videos, outcome) = match read_document(&path) {
            Ok(Some(document)) => {
                let count = document.videos.len();
                (document.videos, LoadOutcome::Loaded { count })
            }
            Ok(None) => (Vec::new(), LoadOutcome::Missing),
            Err(error) => (Vec::new(), LoadOutcome::Recovered { error }),
        };
        let store = Self {
            path,
            videos: Mutex::new(videos),
        };
        (store, outcome)
    }

    /// [`open`](Self::open) plus a log line describing the outcome.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let (store, outcome) = Self::open(path);
        match &outcome {
            LoadOutcome::Loaded { count } => {
                info!(path = %store.path.display(), count, "catalog loaded")
            }
            LoadOutcome::Missing => {
                info!(path = %store.path.display(), "no catalog document yet, starting empty")
            }
            LoadOutcome::Recovered { error } => warn!(
                path = %store.path.display(),
                %error,
                "catalog document unreadable, starting empty"
            ),
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record` and rewrites the document. On any failure the
    /// in-memory sequence is left exactly as it was.
    pub fn append(&self, record: VideoRecord) -> Result<VideoRecord, CatalogError> {
        let mut videos = self.videos.lock();
        if videos.iter().any(|existing| existing.id == record.id) {
            return Err(CatalogError::Duplicate {
                field: "id",
                value: record.id,
            });
        }
        if videos.iter().any(|existing| existing.path == record.path) {
            return Err(CatalogError::Duplicate {
                field: "path",
                value: record.path,
            });
        }

        videos.push(record.clone());
        if let Err(source) = write_document(&self.path, &videos) {
            videos.pop();
            return Err(CatalogError::Write { source });
        }
        Ok(record)
    }

    pub fn list(&self) -> Vec<VideoRecord> {
        self.videos.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<VideoRecord> {
        self.videos.lock().iter().find(|video| video.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.videos.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.lock().is_empty()
    }
}

fn read_document(path: &Path) -> Result<Option<CatalogDocument>, CatalogError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(CatalogError::Read(err.to_string())),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|err| CatalogError::Read(err.to_string()))
}

/// Writes the full document to a sibling temp file and renames it over
/// `path`, so readers never observe a half-written catalog.
fn write_document(path: &Path, videos: &[VideoRecord]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let payload = serde_json::to_vec_pretty(&CatalogDocumentRef { videos })?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&payload)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
