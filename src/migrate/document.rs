//! Configuration documents and their definitions-only projection.
//!
//! A document is the store's search hit split into three parts: the `_id`
//! (preserved verbatim, it is the upsert key), the `_source` payload, and the
//! rest of the hit (`_index`, `_version`, `_seq_no`, ...) kept as metadata so
//! a full artifact reproduces the remote representation.
//!
//! # Definitions-only projection
//!
//! The projection keeps what the store's index API needs to recreate the
//! object and drops bookkeeping:
//!
//! - all hit metadata,
//! - every `_`-prefixed key inside the source (store-internal fields),
//! - the kind's audit timestamps (see [`DefinitionSchema`]).
//!
//! Every other field is kept verbatim, so a definition restores through the
//! same upsert as a full capture. A document whose source holds nothing but
//! bookkeeping has no definition and is rejected with
//! [`MigrateError::Document`].

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::migrate::error::{MigrateError, Result};

/// Fields that define the definitions-only projection of a kind.
#[derive(Debug)]
pub struct DefinitionSchema {
    /// Audit fields maintained by the device, dropped by the projection
    pub audit_fields: &'static [&'static str],
}

impl DefinitionSchema {
    /// Whether `key` is bookkeeping rather than part of the definition.
    pub fn is_bookkeeping(&self, key: &str) -> bool {
        key.starts_with('_') || self.audit_fields.contains(&key)
    }
}

static ALERT_SCHEMA: DefinitionSchema = DefinitionSchema {
    audit_fields: &["createdTime", "modifiedTime", "lastTriggeredTime"],
};

static REPORT_SCHEMA: DefinitionSchema = DefinitionSchema {
    audit_fields: &["createdTime", "modifiedTime", "lastRunTime"],
};

/// The two kinds of configuration object migrated between devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Alert,
    Report,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Alert, DocumentKind::Report];

    /// Plural form used in artifact file names and logs.
    pub fn plural(&self) -> &'static str {
        match self {
            DocumentKind::Alert => "alerts",
            DocumentKind::Report => "reports",
        }
    }

    /// Store index holding this kind on the device.
    pub fn default_index(&self) -> &'static str {
        match self {
            DocumentKind::Alert => "rt-alert-def-vrm-ty-rt-alert-def-vrm",
            DocumentKind::Report => {
                "vrm-scheduled-report-definition-vrm-ty-vrm-scheduled-report-definition"
            }
        }
    }

    pub fn schema(&self) -> &'static DefinitionSchema {
        match self {
            DocumentKind::Alert => &ALERT_SCHEMA,
            DocumentKind::Report => &REPORT_SCHEMA,
        }
    }

    /// Guess the kind from an artifact file name (`alerts_...`, `reports_...`).
    pub fn infer_from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        DocumentKind::ALL
            .into_iter()
            .find(|kind| name.starts_with(kind.plural()) || name.starts_with(&kind.to_string()))
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Alert => write!(f, "alert"),
            DocumentKind::Report => write!(f, "report"),
        }
    }
}

impl FromStr for DocumentKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "alert" | "alerts" => Ok(DocumentKind::Alert),
            "report" | "reports" => Ok(DocumentKind::Report),
            other => Err(MigrateError::Config(format!(
                "Unknown document kind {:?} (expected alerts or reports)",
                other
            ))),
        }
    }
}

/// One configuration object of a known kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    pub id: String,
    pub kind: DocumentKind,
    pub source: Map<String, Value>,
    /// Remaining hit fields (`_index`, `_version`, ...); empty for definitions
    pub metadata: Map<String, Value>,
}

impl ConfigDocument {
    /// Split a store hit (`{"_id": .., "_source": {..}, ...}`) into a document.
    pub fn from_hit(kind: DocumentKind, hit: Value) -> Result<Self> {
        let Value::Object(mut hit) = hit else {
            return Err(MigrateError::Document(format!(
                "{} entry is not a JSON object",
                kind
            )));
        };

        let id = match hit.remove("_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(MigrateError::Document(format!(
                    "{} entry has an invalid _id: {}",
                    kind, other
                )));
            }
            None => {
                return Err(MigrateError::Document(format!("{} entry has no _id", kind)));
            }
        };

        let source = match hit.remove("_source") {
            Some(Value::Object(source)) => source,
            Some(_) => {
                return Err(MigrateError::Document(format!(
                    "{} {}: _source is not a JSON object",
                    kind, id
                )));
            }
            None => {
                return Err(MigrateError::Document(format!(
                    "{} {}: missing _source",
                    kind, id
                )));
            }
        };

        Ok(Self {
            id,
            kind,
            source,
            metadata: hit,
        })
    }

    /// Best-effort `_id` of a raw entry, for reporting entries that failed to parse.
    pub fn raw_id(hit: &Value) -> Option<String> {
        match hit.get("_id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Render back to the hit layout used in artifacts.
    pub fn to_hit(&self) -> Value {
        let mut hit = self.metadata.clone();
        hit.insert("_id".to_string(), Value::String(self.id.clone()));
        hit.insert("_source".to_string(), Value::Object(self.source.clone()));
        Value::Object(hit)
    }

    /// Whether this document carries no store metadata.
    pub fn is_definition(&self) -> bool {
        self.metadata.is_empty()
    }

    /// Reduce to the definitions-only form.
    pub fn definition(&self) -> Result<ConfigDocument> {
        let schema = self.kind.schema();

        let source: Map<String, Value> = self
            .source
            .iter()
            .filter(|(key, _)| !schema.is_bookkeeping(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if source.is_empty() {
            return Err(MigrateError::Document(format!(
                "{} {} has no definition fields, only bookkeeping",
                self.kind, self.id
            )));
        }

        Ok(ConfigDocument {
            id: self.id.clone(),
            kind: self.kind,
            source,
            metadata: Map::new(),
        })
    }

    /// Value of the `name` field, for logs.
    pub fn name(&self) -> Option<&str> {
        self.source.get("name").and_then(Value::as_str)
    }
}
