//! Command orchestration for the `alert-migrate` binary.
//!
//! - `collect`: tunnel to the source device, capture alerts and/or reports
//! - `restore`: tunnel to the destination device, replay artifacts
//! - `extract`: offline definitions-only extraction from a full capture
//!
//! Artifacts to restore are resolved and read before any tunnel is opened,
//! so a missing file never costs an SSH round trip.

use std::path::Path;

use tracing::{error, info, warn};

use crate::migrate::artifact::{LoadedArtifact, read_artifact};
use crate::migrate::collector::{CollectReport, Collector, extract_definitions};
use crate::migrate::config::{DeviceRole, MigrateConfig, RunSettings};
use crate::migrate::document::DocumentKind;
use crate::migrate::error::{MigrateError, Result};
use crate::migrate::lifecycle::with_tunnel;
use crate::migrate::restorer::{RestoreReport, RestoreSelector, Restorer};
use crate::migrate::transport::ConfigTransport;

/// What `collect` should capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectRequest {
    /// Restrict to one kind; both when unset
    pub only: Option<DocumentKind>,
    pub alerts_definitions: bool,
    pub reports_definitions: bool,
}

impl CollectRequest {
    pub fn kinds(&self) -> Vec<DocumentKind> {
        match self.only {
            Some(kind) => vec![kind],
            None => DocumentKind::ALL.to_vec(),
        }
    }

    pub fn definitions_only(&self, kind: DocumentKind) -> bool {
        match kind {
            DocumentKind::Alert => self.alerts_definitions,
            DocumentKind::Report => self.reports_definitions,
        }
    }
}

#[derive(Debug, Default)]
pub struct CollectOutcome {
    pub reports: Vec<CollectReport>,
    /// Kinds that produced no artifact
    pub failures: Vec<(DocumentKind, MigrateError)>,
}

impl CollectOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .reports
            .iter()
            .map(|report| {
                let total = report
                    .remote_total
                    .map_or_else(|| "unknown".to_string(), |total| total.to_string());
                format!(
                    "{} ({}): {} written, {} skipped, {} seen, store total {} -> {}",
                    report.kind.plural(),
                    report.form,
                    report.written,
                    report.skipped,
                    report.seen,
                    total,
                    report.path.display()
                )
            })
            .collect();
        lines.extend(
            self.failures
                .iter()
                .map(|(kind, e)| format!("{}: FAILED: {}", kind.plural(), e)),
        );
        lines
    }
}

#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub reports: Vec<RestoreReport>,
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(RestoreReport::is_success)
    }

    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for report in &self.reports {
            lines.push(format!(
                "{} from {}: {} restored ({} created, {} updated), {} failed{}",
                report.kind.plural(),
                report.source.display(),
                report.succeeded.len(),
                report.created,
                report.updated,
                report.failed.len(),
                if report.aborted { ", aborted" } else { "" }
            ));
            for failure in &report.failed {
                lines.push(format!("  {}: {}", failure.id, failure.error));
            }
        }
        lines
    }
}

/// Capture the kinds in `request` from an already reachable store.
///
/// A failing kind is recorded and the next kind is still attempted, unless
/// the failure is a lost transport.
pub async fn collect_all(
    transport: &ConfigTransport,
    output_dir: &Path,
    request: &CollectRequest,
) -> CollectOutcome {
    let collector = Collector::new(transport, output_dir);
    let mut outcome = CollectOutcome::default();

    for kind in request.kinds() {
        match collector.collect(kind, request.definitions_only(kind)).await {
            Ok(report) => outcome.reports.push(report),
            Err(e) => {
                error!("Collecting {} failed: {}", kind.plural(), e);
                let lost = matches!(e, MigrateError::Transport(_));
                outcome.failures.push((kind, e));
                if lost {
                    break;
                }
            }
        }
    }

    outcome
}

/// Replay loaded artifacts in order against an already reachable store.
pub async fn restore_all(transport: &ConfigTransport, artifacts: Vec<LoadedArtifact>) -> RestoreOutcome {
    let restorer = Restorer::new(transport);
    let mut outcome = RestoreOutcome::default();
    for artifact in artifacts {
        outcome.reports.push(restorer.restore(artifact).await);
    }
    outcome
}

/// Resolve and read the artifacts named by `selectors`.
///
/// No selectors means the newest capture of each kind.
pub async fn load_artifacts(
    selectors: &[RestoreSelector],
    artifact_dir: &Path,
) -> Result<Vec<LoadedArtifact>> {
    let defaults = [RestoreSelector::Alerts(None), RestoreSelector::Reports(None)];
    let selectors = if selectors.is_empty() {
        &defaults[..]
    } else {
        selectors
    };

    let mut artifacts = Vec::with_capacity(selectors.len());
    for selector in selectors {
        let (path, kind) = selector.resolve(artifact_dir).await?;
        let artifact = read_artifact(&path, kind).await?;
        let malformed = artifact.malformed().count();
        if malformed > 0 {
            warn!("{:?} has {} malformed entries", path, malformed);
        }
        info!(
            "Loaded {} {} entries from {:?}",
            artifact.entries.len(),
            kind,
            path
        );
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

/// `collect`: tunnel to the source device and capture.
pub async fn run_collect(
    config: &MigrateConfig,
    settings: &RunSettings,
    request: &CollectRequest,
) -> Result<CollectOutcome> {
    let spec = config.tunnel_spec(DeviceRole::Source)?;
    let output_dir = settings.output_dir.as_path();

    with_tunnel(&spec, settings, |transport| async move {
        Ok(collect_all(&transport, output_dir, request).await)
    })
    .await
}

/// `restore`: tunnel to the destination device and replay artifacts.
pub async fn run_restore(
    config: &MigrateConfig,
    settings: &RunSettings,
    selectors: &[RestoreSelector],
) -> Result<RestoreOutcome> {
    let spec = config.tunnel_spec(DeviceRole::Destination)?;
    let artifacts = load_artifacts(selectors, &settings.output_dir).await?;

    with_tunnel(&spec, settings, |transport| async move {
        Ok(restore_all(&transport, artifacts).await)
    })
    .await
}

/// `extract`: definitions-only artifact from a full capture, no device needed.
pub async fn run_extract(
    kind: DocumentKind,
    input: &Path,
    settings: &RunSettings,
) -> Result<CollectOutcome> {
    let report = extract_definitions(input, kind, &settings.output_dir).await?;
    Ok(CollectOutcome {
        reports: vec![report],
        failures: Vec::new(),
    })
}
