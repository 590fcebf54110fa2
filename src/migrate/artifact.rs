//! Timestamped artifact files.
//!
//! An artifact is a pretty-printed JSON array of hits of one kind:
//!
//! ```text
//! alerts_20240101_120000.json               full hits, store metadata included
//! alerts_definitions_20240101_120000.json   {"_id", "_source"} only
//! ```
//!
//! Files are created with `create_new`, so an existing capture is never
//! overwritten; a name collision gets a `_1`, `_2`, ... suffix. Readers also
//! accept the raw search-response layout `{"hits": {"hits": [...]}}`.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::migrate::document::{ConfigDocument, DocumentKind};
use crate::migrate::error::{MigrateError, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactForm {
    Full,
    Definitions,
}

impl fmt::Display for ArtifactForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactForm::Full => write!(f, "full"),
            ArtifactForm::Definitions => write!(f, "definitions"),
        }
    }
}

/// A batch of documents of one kind, ready to be written.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub kind: DocumentKind,
    pub form: ArtifactForm,
    pub captured_at: DateTime<Local>,
    pub documents: Vec<ConfigDocument>,
}

impl Artifact {
    pub fn new(kind: DocumentKind, form: ArtifactForm, documents: Vec<ConfigDocument>) -> Self {
        Self {
            kind,
            form,
            captured_at: Local::now(),
            documents,
        }
    }

    /// File name without extension or collision suffix.
    pub fn file_stem(&self) -> String {
        let timestamp = self.captured_at.format(TIMESTAMP_FORMAT);
        match self.form {
            ArtifactForm::Full => format!("{}_{}", self.kind.plural(), timestamp),
            ArtifactForm::Definitions => {
                format!("{}_definitions_{}", self.kind.plural(), timestamp)
            }
        }
    }

    /// Write the artifact into `dir`, creating it if needed. Returns the path written.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| MigrateError::io(dir, e))?;

        let hits: Vec<Value> = self.documents.iter().map(ConfigDocument::to_hit).collect();
        let body = serde_json::to_vec_pretty(&hits)
            .map_err(|e| MigrateError::Document(format!("Failed to encode artifact: {}", e)))?;

        let stem = self.file_stem();
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("{}.json", stem),
                n => format!("{}_{}.json", stem, n),
            };
            let path = dir.join(name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&body)
                        .await
                        .map_err(|e| MigrateError::io(&path, e))?;
                    file.flush().await.map_err(|e| MigrateError::io(&path, e))?;
                    debug!("Wrote {} {} to {:?}", self.documents.len(), self.kind.plural(), path);
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(MigrateError::io(&path, e)),
            }
        }
    }
}

/// An artifact entry that could not be turned into a document.
#[derive(Debug)]
pub struct MalformedEntry {
    /// 1-based position in the artifact
    pub position: usize,
    pub id: Option<String>,
    pub error: MigrateError,
}

impl MalformedEntry {
    /// Identifier used in reports: the entry's `_id` if readable, else `#<position>`.
    pub fn label(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("#{}", self.position))
    }
}

/// Artifact read back from disk. Entries keep their file order.
#[derive(Debug)]
pub struct LoadedArtifact {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub entries: Vec<std::result::Result<ConfigDocument, MalformedEntry>>,
}

impl LoadedArtifact {
    pub fn documents(&self) -> impl Iterator<Item = &ConfigDocument> {
        self.entries.iter().filter_map(|entry| entry.as_ref().ok())
    }

    pub fn malformed(&self) -> impl Iterator<Item = &MalformedEntry> {
        self.entries.iter().filter_map(|entry| entry.as_ref().err())
    }
}

/// Read an artifact of `kind`.
///
/// A file that is not JSON, or has neither layout, is a
/// [`MigrateError::Document`]. Individual entries that fail to parse are
/// kept as [`MalformedEntry`] so the rest of the file stays usable.
pub async fn read_artifact(path: &Path, kind: DocumentKind) -> Result<LoadedArtifact> {
    let raw = fs::read(path).await.map_err(|e| MigrateError::io(path, e))?;
    let value: Value = serde_json::from_slice(&raw)
        .map_err(|e| MigrateError::Document(format!("{:?} is not valid JSON: {}", path, e)))?;

    let hits = match value {
        Value::Array(hits) => hits,
        Value::Object(mut response) => match response.remove("hits") {
            Some(Value::Object(mut outer)) => match outer.remove("hits") {
                Some(Value::Array(hits)) => hits,
                _ => return Err(unrecognized(path)),
            },
            _ => return Err(unrecognized(path)),
        },
        _ => return Err(unrecognized(path)),
    };

    let entries = hits
        .into_iter()
        .enumerate()
        .map(|(index, hit)| {
            let id = ConfigDocument::raw_id(&hit);
            ConfigDocument::from_hit(kind, hit).map_err(|error| MalformedEntry {
                position: index + 1,
                id,
                error,
            })
        })
        .collect();

    Ok(LoadedArtifact {
        path: path.to_path_buf(),
        kind,
        entries,
    })
}

fn unrecognized(path: &Path) -> MigrateError {
    MigrateError::Document(format!(
        "{:?} is neither a JSON array of hits nor a search response",
        path
    ))
}

/// Resolve a restore file argument.
///
/// A value containing a path separator is used as-is; a bare file name is
/// looked up in `dir`; `None` picks the newest capture of `kind` in `dir`.
pub async fn resolve_artifact_path(
    dir: &Path,
    kind: DocumentKind,
    file: Option<&str>,
) -> Result<PathBuf> {
    match file {
        Some(file) if file.contains(std::path::MAIN_SEPARATOR) || file.contains('/') => {
            Ok(PathBuf::from(file))
        }
        Some(file) => Ok(dir.join(file)),
        None => latest_artifact(dir, kind).await,
    }
}

/// Newest artifact of `kind` in `dir`, by modification time then name.
///
/// Both full and definitions captures are considered.
pub async fn latest_artifact(dir: &Path, kind: DocumentKind) -> Result<PathBuf> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| MigrateError::io(dir, e))?;

    let prefix = format!("{}_", kind.plural());
    let mut newest: Option<(SystemTime, String, PathBuf)> = None;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MigrateError::io(dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || !name.ends_with(".json") {
            continue;
        }
        let modified = entry
            .metadata()
            .await
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let is_newer = newest
            .as_ref()
            .is_none_or(|(time, best, _)| (modified, &name) > (*time, best));
        if is_newer {
            newest = Some((modified, name, entry.path()));
        }
    }

    newest.map(|(_, _, path)| path).ok_or_else(|| {
        MigrateError::Config(format!(
            "No {} artifact found in {:?}",
            kind.plural(),
            dir
        ))
    })
}
