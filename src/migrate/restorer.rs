//! Replay artifacts into a device with idempotent upserts.
//!
//! Every entry is written with `PUT /<index>/_doc/<id>`, so restoring the same
//! artifact twice leaves the destination exactly as restoring it once.
//!
//! Failure handling per entry:
//!
//! | Error | Effect |
//! |-------|--------|
//! | [`MigrateError::Document`] (malformed entry) | recorded, batch continues |
//! | [`MigrateError::RemoteApi`] (store rejected it) | recorded, batch continues |
//! | [`MigrateError::Transport`] (tunnel gone) | current and remaining entries recorded, batch aborted |

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::migrate::artifact::{LoadedArtifact, read_artifact, resolve_artifact_path};
use crate::migrate::document::DocumentKind;
use crate::migrate::error::{MigrateError, Result};
use crate::migrate::transport::{ConfigTransport, PutOutcome};

/// One entry that did not make it to the destination.
#[derive(Debug)]
pub struct RestoreFailure {
    /// Document id, or `#<position>` when the entry had no readable id
    pub id: String,
    pub error: MigrateError,
}

#[derive(Debug)]
pub struct RestoreReport {
    pub kind: DocumentKind,
    pub source: PathBuf,
    pub created: usize,
    pub updated: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<RestoreFailure>,
    /// The transport failed and the remaining entries were not attempted
    pub aborted: bool,
}

impl RestoreReport {
    fn new(kind: DocumentKind, source: PathBuf) -> Self {
        Self {
            kind,
            source,
            created: 0,
            updated: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            aborted: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.aborted
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    fn record_failure(&mut self, id: String, error: MigrateError) {
        error!("Failed to restore {} {}: {}", self.kind, id, error);
        self.failed.push(RestoreFailure { id, error });
    }
}

/// Which artifact to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSelector {
    /// Alerts from a file name, path, or the newest alerts capture
    Alerts(Option<String>),
    Reports(Option<String>),
    /// A specific file; the kind is inferred from its name unless given
    File {
        path: PathBuf,
        kind: Option<DocumentKind>,
    },
}

impl RestoreSelector {
    /// Resolve to the artifact path and the kind it holds.
    pub async fn resolve(&self, artifact_dir: &Path) -> Result<(PathBuf, DocumentKind)> {
        match self {
            RestoreSelector::Alerts(file) => {
                let path =
                    resolve_artifact_path(artifact_dir, DocumentKind::Alert, file.as_deref()).await?;
                Ok((path, DocumentKind::Alert))
            }
            RestoreSelector::Reports(file) => {
                let path =
                    resolve_artifact_path(artifact_dir, DocumentKind::Report, file.as_deref())
                        .await?;
                Ok((path, DocumentKind::Report))
            }
            RestoreSelector::File { path, kind } => {
                let kind = kind
                    .or_else(|| DocumentKind::infer_from_path(path))
                    .ok_or_else(|| {
                        MigrateError::Config(format!(
                            "Cannot tell whether {:?} holds alerts or reports; pass --kind",
                            path
                        ))
                    })?;
                Ok((path.clone(), kind))
            }
        }
    }
}

pub struct Restorer<'a> {
    transport: &'a ConfigTransport,
}

impl<'a> Restorer<'a> {
    pub fn new(transport: &'a ConfigTransport) -> Self {
        Self { transport }
    }

    /// Resolve `selector`, read the artifact and replay it.
    ///
    /// Only problems with the artifact file itself are returned as errors;
    /// per-entry failures are in the report.
    pub async fn restore_selected(
        &self,
        selector: &RestoreSelector,
        artifact_dir: &Path,
    ) -> Result<RestoreReport> {
        let (path, kind) = selector.resolve(artifact_dir).await?;
        info!("Restoring {} from {:?}", kind.plural(), path);
        let artifact = read_artifact(&path, kind).await?;
        Ok(self.restore(artifact).await)
    }

    /// Replay every entry of `artifact` in file order.
    pub async fn restore(&self, artifact: LoadedArtifact) -> RestoreReport {
        let mut report = RestoreReport::new(artifact.kind, artifact.path);
        let mut entries = artifact.entries.into_iter();

        while let Some(entry) = entries.next() {
            let document = match entry {
                Ok(document) => document,
                Err(malformed) => {
                    report.record_failure(malformed.label(), malformed.error);
                    continue;
                }
            };

            match self
                .transport
                .put(document.kind, &document.id, &document.source)
                .await
            {
                Ok(outcome) => {
                    debug!("Restored {} {}: {:?}", document.kind, document.id, outcome);
                    match outcome {
                        PutOutcome::Created => report.created += 1,
                        PutOutcome::Updated => report.updated += 1,
                        PutOutcome::Noop | PutOutcome::Unknown => {}
                    }
                    report.succeeded.push(document.id);
                }
                Err(MigrateError::Transport(message)) => {
                    report.aborted = true;
                    report.record_failure(document.id, MigrateError::Transport(message.clone()));
                    let remaining_count = entries.len();
                    for remaining in entries.by_ref() {
                        match remaining {
                            Ok(document) => report.failed.push(RestoreFailure {
                                id: document.id,
                                error: MigrateError::Transport(message.clone()),
                            }),
                            Err(malformed) => {
                                report.record_failure(malformed.label(), malformed.error)
                            }
                        }
                    }
                    error!(
                        "Transport lost; {} remaining {} not attempted",
                        remaining_count,
                        report.kind.plural()
                    );
                    break;
                }
                Err(e) => report.record_failure(document.id, e),
            }
        }

        info!(
            "Restored {}/{} {} from {:?} ({} created, {} updated, {} failed)",
            report.succeeded.len(),
            report.total(),
            report.kind.plural(),
            report.source,
            report.created,
            report.updated,
            report.failed.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::testing::FakeStore;
    use crate::migrate::transport::TransportOptions;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;

    fn transport(store: &FakeStore) -> ConfigTransport {
        let options = TransportOptions {
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        ConfigTransport::new(store.addr(), options).unwrap()
    }

    fn write_artifact(dir: &TempDir, name: &str, entries: Value) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, serde_json::to_vec_pretty(&entries).unwrap()).unwrap();
        path
    }

    fn alerts(ids: &[&str]) -> Value {
        Value::Array(
            ids.iter()
                .map(|id| json!({"_id": id, "_index": "old-index", "_source": {"name": id}}))
                .collect(),
        )
    }

    mod replay {
        use super::*;

        #[tokio::test]
        async fn test_malformed_entry_does_not_stop_batch() {
            let store = FakeStore::start().await;
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(
                &dir,
                "alerts_mixed.json",
                json!([
                    {"_id": "1", "_source": {"name": "one"}},
                    {"_id": "2", "_source": {"name": "two"}},
                    {"_id": "3", "_source": ["not", "an", "object"]},
                    {"_id": "4", "_source": {"name": "four"}},
                    {"_id": "5", "_source": {"name": "five"}},
                ]),
            );

            let artifact = read_artifact(&path, DocumentKind::Alert).await.unwrap();
            let report = Restorer::new(&transport).restore(artifact).await;

            assert_eq!(report.succeeded, vec!["1", "2", "4", "5"]);
            assert_eq!(report.failed.len(), 1);
            assert_eq!(report.failed[0].id, "3");
            assert!(matches!(report.failed[0].error, MigrateError::Document(_)));
            assert!(!report.is_success());
            assert!(!report.aborted);
            assert_eq!(store.puts(), vec!["1", "2", "4", "5"]);
        }

        #[tokio::test]
        async fn test_restore_twice_is_idempotent() {
            let store = FakeStore::start().await;
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(&dir, "alerts_x.json", alerts(&["a", "b", "c"]));
            let index = DocumentKind::Alert.default_index();

            let restorer = Restorer::new(&transport);
            let first = restorer
                .restore(read_artifact(&path, DocumentKind::Alert).await.unwrap())
                .await;
            let after_first: Vec<_> = ["a", "b", "c"]
                .iter()
                .map(|id| store.document(index, id))
                .collect();

            let second = restorer
                .restore(read_artifact(&path, DocumentKind::Alert).await.unwrap())
                .await;
            let after_second: Vec<_> = ["a", "b", "c"]
                .iter()
                .map(|id| store.document(index, id))
                .collect();

            assert_eq!((first.created, first.updated), (3, 0));
            assert_eq!((second.created, second.updated), (0, 3));
            assert_eq!(after_first, after_second);
            assert_eq!(store.len(index), 3);
        }

        #[tokio::test]
        async fn test_restore_uses_configured_index_not_hit_index() {
            let store = FakeStore::start().await;
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(&dir, "alerts_x.json", alerts(&["a"]));

            let artifact = read_artifact(&path, DocumentKind::Alert).await.unwrap();
            Restorer::new(&transport).restore(artifact).await;

            assert!(store.document(DocumentKind::Alert.default_index(), "a").is_some());
            assert_eq!(store.len("old-index"), 0);
        }

        #[tokio::test]
        async fn test_rejected_document_is_recorded() {
            let store = FakeStore::start().await;
            store.reject_id("b");
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(&dir, "alerts_x.json", alerts(&["a", "b", "c"]));

            let artifact = read_artifact(&path, DocumentKind::Alert).await.unwrap();
            let report = Restorer::new(&transport).restore(artifact).await;

            assert_eq!(report.succeeded, vec!["a", "c"]);
            assert_eq!(report.failed.len(), 1);
            assert!(matches!(
                report.failed[0].error,
                MigrateError::RemoteApi { status: 400, .. }
            ));
        }

        #[tokio::test]
        async fn test_transport_failure_aborts_and_records_remaining() {
            let store = FakeStore::start().await;
            store.stall_id("b");
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(&dir, "alerts_x.json", alerts(&["a", "b", "c", "d"]));

            let artifact = read_artifact(&path, DocumentKind::Alert).await.unwrap();
            let report = Restorer::new(&transport).restore(artifact).await;

            assert!(report.aborted);
            assert_eq!(report.succeeded, vec!["a"]);
            let failed: Vec<_> = report.failed.iter().map(|f| f.id.as_str()).collect();
            assert_eq!(failed, vec!["b", "c", "d"]);
            assert!(report
                .failed
                .iter()
                .all(|f| matches!(f.error, MigrateError::Transport(_))));
            assert_eq!(store.puts(), vec!["a"]);
        }

        #[tokio::test]
        async fn test_malformed_remainder_keeps_its_own_error() {
            let store = FakeStore::start().await;
            store.stall_id("b");
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(
                &dir,
                "alerts_x.json",
                json!([
                    {"_id": "a", "_source": {"name": "a"}},
                    {"_id": "b", "_source": {"name": "b"}},
                    {"_id": "c", "_source": "not an object"},
                    {"_id": "d", "_source": {"name": "d"}},
                ]),
            );

            let artifact = read_artifact(&path, DocumentKind::Alert).await.unwrap();
            let report = Restorer::new(&transport).restore(artifact).await;

            assert!(report.aborted);
            let failed: Vec<_> = report
                .failed
                .iter()
                .map(|f| (f.id.as_str(), f.error.is_document_level()))
                .collect();
            assert_eq!(failed, vec![("b", false), ("c", true), ("d", false)]);
            assert!(matches!(report.failed[2].error, MigrateError::Transport(_)));
        }

        #[tokio::test]
        async fn test_definitions_artifact_restores() {
            let store = FakeStore::start().await;
            let transport = transport(&store);
            let dir = TempDir::new().unwrap();
            let path = write_artifact(
                &dir,
                "reports_definitions_x.json",
                json!([{"_id": "r-1", "_source": {"title": "t", "body": "b"}}]),
            );

            let report = Restorer::new(&transport)
                .restore_selected(
                    &RestoreSelector::File {
                        path: path.clone(),
                        kind: None,
                    },
                    dir.path(),
                )
                .await
                .unwrap();

            assert!(report.is_success());
            assert_eq!(report.kind, DocumentKind::Report);
            assert_eq!(
                store.document(DocumentKind::Report.default_index(), "r-1"),
                Some(json!({"title": "t", "body": "b"}))
            );
        }
    }

    mod selectors {
        use super::*;

        #[tokio::test]
        async fn test_bare_alerts_name_resolves_in_artifact_dir() {
            let dir = TempDir::new().unwrap();
            let (path, kind) = RestoreSelector::Alerts(Some("alerts_1.json".to_string()))
                .resolve(dir.path())
                .await
                .unwrap();
            assert_eq!(path, dir.path().join("alerts_1.json"));
            assert_eq!(kind, DocumentKind::Alert);
        }

        #[tokio::test]
        async fn test_omitted_reports_name_picks_newest() {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("reports_20240101_000000.json"), "[]").unwrap();
            std::fs::write(dir.path().join("alerts_20250101_000000.json"), "[]").unwrap();

            let (path, kind) = RestoreSelector::Reports(None)
                .resolve(dir.path())
                .await
                .unwrap();
            assert_eq!(path.file_name().unwrap(), "reports_20240101_000000.json");
            assert_eq!(kind, DocumentKind::Report);
        }

        #[tokio::test]
        async fn test_file_with_unknown_kind_needs_explicit_kind() {
            let dir = TempDir::new().unwrap();
            let selector = RestoreSelector::File {
                path: PathBuf::from("/backups/export.json"),
                kind: None,
            };
            let err = selector.resolve(dir.path()).await.unwrap_err();
            assert!(matches!(err, MigrateError::Config(_)));

            let selector = RestoreSelector::File {
                path: PathBuf::from("/backups/export.json"),
                kind: Some(DocumentKind::Alert),
            };
            let (_, kind) = selector.resolve(dir.path()).await.unwrap();
            assert_eq!(kind, DocumentKind::Alert);
        }
    }
}
