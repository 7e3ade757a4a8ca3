use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Identity of one synchronizable target. The wire names double as selection
/// keys and fetch-meta sidecar file names, so they must stay bit-compatible
/// with the documents already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TargetId {
    #[serde(rename = "self")]
    SelfInfo,
    #[serde(rename = "group_pipeline")]
    GroupPipeline,
    #[serde(rename = "samples")]
    Samples,
    #[serde(rename = "organization")]
    Organization,
    #[serde(rename = "instrument_type")]
    InstrumentType,
    #[serde(rename = "dataset_list")]
    DatasetList,
    #[serde(rename = "template")]
    Template,
    #[serde(rename = "invoiceSchemas")]
    InvoiceSchemas,
    #[serde(rename = "instruments")]
    Instruments,
    #[serde(rename = "licenses")]
    Licenses,
    #[serde(rename = "info_generate")]
    InfoGenerate,
    #[serde(rename = "dataset_details")]
    DatasetDetails,
}

impl TargetId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetId::SelfInfo => "self",
            TargetId::GroupPipeline => "group_pipeline",
            TargetId::Samples => "samples",
            TargetId::Organization => "organization",
            TargetId::InstrumentType => "instrument_type",
            TargetId::DatasetList => "dataset_list",
            TargetId::Template => "template",
            TargetId::InvoiceSchemas => "invoiceSchemas",
            TargetId::Instruments => "instruments",
            TargetId::Licenses => "licenses",
            TargetId::InfoGenerate => "info_generate",
            TargetId::DatasetDetails => "dataset_details",
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TargetId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "self" => Ok(TargetId::SelfInfo),
            "group_pipeline" => Ok(TargetId::GroupPipeline),
            "samples" => Ok(TargetId::Samples),
            "organization" => Ok(TargetId::Organization),
            "instrument_type" => Ok(TargetId::InstrumentType),
            "dataset_list" => Ok(TargetId::DatasetList),
            "template" => Ok(TargetId::Template),
            "invoiceSchemas" => Ok(TargetId::InvoiceSchemas),
            "instruments" => Ok(TargetId::Instruments),
            "licenses" => Ok(TargetId::Licenses),
            "info_generate" => Ok(TargetId::InfoGenerate),
            "dataset_details" => Ok(TargetId::DatasetDetails),
            other => Err(SyncError::InvalidTargetId(other.to_string())),
        }
    }
}

/// Storage shape of a target's local representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// One JSON document holding a collection.
    List,
    /// Many per-item JSON files under one or more directories.
    Directory,
    /// A list document plus item directories evaluated together.
    Composite,
    /// Synthesized from other local targets, never fetched.
    Generated,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::List => write!(f, "list"),
            TargetKind::Directory => write!(f, "directory"),
            TargetKind::Composite => write!(f, "composite"),
            TargetKind::Generated => write!(f, "generated"),
        }
    }
}

/// Per-target refresh mode supplied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Always fetch, regardless of local state.
    Overwrite,
    /// Fetch when the local copy is absent or stale.
    #[default]
    Older,
    /// Fetch only when the local copy is absent.
    Missing,
    /// Never fetch.
    Skip,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Overwrite => write!(f, "overwrite"),
            FetchMode::Older => write!(f, "older"),
            FetchMode::Missing => write!(f, "missing"),
            FetchMode::Skip => write!(f, "skip"),
        }
    }
}

/// Fallback order for resolving a target's effective last-known-good
/// timestamp: B = embedded document timestamp, C = fetch-meta record,
/// A = filesystem mtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutdatedPolicy {
    #[default]
    Bca,
    Ca,
    A,
}

impl fmt::Display for OutdatedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutdatedPolicy::Bca => write!(f, "bca"),
            OutdatedPolicy::Ca => write!(f, "ca"),
            OutdatedPolicy::A => write!(f, "a"),
        }
    }
}

/// Outcome of a whole pipeline run. Cancellation is a first-class result,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "common info sync completed"),
            RunOutcome::Cancelled => write!(f, "cancelled by user"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_target_id_roundtrip() {
        for id in [
            TargetId::SelfInfo,
            TargetId::GroupPipeline,
            TargetId::Samples,
            TargetId::Organization,
            TargetId::InstrumentType,
            TargetId::DatasetList,
            TargetId::Template,
            TargetId::InvoiceSchemas,
            TargetId::Instruments,
            TargetId::Licenses,
            TargetId::InfoGenerate,
            TargetId::DatasetDetails,
        ] {
            let parsed: TargetId = id.as_str().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn parse_target_id_invalid() {
        let err = "dataset".parse::<TargetId>().unwrap_err();
        assert_matches!(err, SyncError::InvalidTargetId(_));
    }

    #[test]
    fn target_id_serde_uses_wire_names() {
        let json = serde_json::to_string(&TargetId::InvoiceSchemas).unwrap();
        assert_eq!(json, "\"invoiceSchemas\"");
        let back: TargetId = serde_json::from_str("\"group_pipeline\"").unwrap();
        assert_eq!(back, TargetId::GroupPipeline);
    }

    #[test]
    fn fetch_mode_default_is_older() {
        assert_eq!(FetchMode::default(), FetchMode::Older);
        let mode: FetchMode = serde_json::from_str("\"overwrite\"").unwrap();
        assert_eq!(mode, FetchMode::Overwrite);
    }

    #[test]
    fn outdated_policy_wire_names() {
        let policy: OutdatedPolicy = serde_json::from_str("\"ca\"").unwrap();
        assert_eq!(policy, OutdatedPolicy::Ca);
        assert_eq!(OutdatedPolicy::default(), OutdatedPolicy::Bca);
    }
}
