//! Collect every alert or report definition from a device into an artifact.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::migrate::artifact::{Artifact, ArtifactForm, MalformedEntry, read_artifact};
use crate::migrate::document::{ConfigDocument, DocumentKind};
use crate::migrate::error::Result;
use crate::migrate::transport::ConfigTransport;

/// Outcome of one collection (or offline extraction) for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub kind: DocumentKind,
    pub form: ArtifactForm,
    pub path: PathBuf,
    /// Document count reported by the store, when it answered
    pub remote_total: Option<u64>,
    pub seen: usize,
    pub written: usize,
    pub skipped: usize,
}

pub struct Collector<'a> {
    transport: &'a ConfigTransport,
    output_dir: PathBuf,
}

impl<'a> Collector<'a> {
    pub fn new(transport: &'a ConfigTransport, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            output_dir: output_dir.into(),
        }
    }

    /// Enumerate all documents of `kind` and write them to a new artifact.
    ///
    /// A listing failure aborts the kind before anything is written. Hits
    /// that are not documents are skipped and counted in either form.
    pub async fn collect(&self, kind: DocumentKind, definitions_only: bool) -> Result<CollectReport> {
        let remote_total = match self.transport.count(kind).await {
            Ok(total) => {
                info!("Store reports {} {}", total, kind.plural());
                Some(total)
            }
            Err(e) => {
                warn!("Could not count {}: {}", kind.plural(), e);
                None
            }
        };

        let listed = self.transport.list_all(kind).await?;
        let seen = listed.len();
        let (documents, unreadable) = drop_malformed(kind, listed);

        let (form, documents, skipped) = if definitions_only {
            let (definitions, skipped) = project_definitions(documents);
            (ArtifactForm::Definitions, definitions, unreadable + skipped)
        } else {
            (ArtifactForm::Full, documents, unreadable)
        };

        if seen == 0 && remote_total.is_some_and(|total| total > 0) {
            warn!(
                "Listing returned no {} although the store reports {}",
                kind.plural(),
                remote_total.unwrap_or_default()
            );
        }

        let written = documents.len();
        let path = Artifact::new(kind, form, documents)
            .write_to(&self.output_dir)
            .await?;

        info!(
            "Collected {} {} ({} seen, {} skipped) into {:?}",
            written,
            kind.plural(),
            seen,
            skipped,
            path
        );

        Ok(CollectReport {
            kind,
            form,
            path,
            remote_total,
            seen,
            written,
            skipped,
        })
    }
}

/// Keep the readable entries; log and count the rest.
fn drop_malformed(
    kind: DocumentKind,
    entries: impl IntoIterator<Item = std::result::Result<ConfigDocument, MalformedEntry>>,
) -> (Vec<ConfigDocument>, usize) {
    let mut skipped = 0;
    let documents = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(document) => Some(document),
            Err(malformed) => {
                warn!("Skipping {} {}: {}", kind, malformed.label(), malformed.error);
                skipped += 1;
                None
            }
        })
        .collect();
    (documents, skipped)
}

/// Project documents to their definitions, skipping any with nothing left
/// to restore. Returns the definitions and the number skipped.
fn project_definitions(
    documents: impl IntoIterator<Item = ConfigDocument>,
) -> (Vec<ConfigDocument>, usize) {
    let mut skipped = 0;
    let definitions = documents
        .into_iter()
        .filter_map(|document| match document.definition() {
            Ok(definition) => Some(definition),
            Err(e) => {
                warn!("Skipping {}: {}", document.id, e);
                skipped += 1;
                None
            }
        })
        .collect();
    (definitions, skipped)
}

/// Build a definitions-only artifact from an existing full capture, without
/// contacting any device.
///
/// Malformed entries in `input` are skipped and counted like documents that
/// fail projection.
pub async fn extract_definitions(
    input: &Path,
    kind: DocumentKind,
    output_dir: &Path,
) -> Result<CollectReport> {
    let loaded = read_artifact(input, kind).await?;
    let seen = loaded.entries.len();
    let (documents, mut skipped) = drop_malformed(kind, loaded.entries);

    let (definitions, projection_skipped) = project_definitions(documents);
    skipped += projection_skipped;

    let written = definitions.len();
    let path = Artifact::new(kind, ArtifactForm::Definitions, definitions)
        .write_to(output_dir)
        .await?;

    info!(
        "Extracted {} {} definitions from {:?} into {:?}",
        written,
        kind,
        input,
        path
    );

    Ok(CollectReport {
        kind,
        form: ArtifactForm::Definitions,
        path,
        remote_total: None,
        seen,
        written,
        skipped,
    })
}
