use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::TargetId;
use crate::error::SyncError;

/// Filesystem layout of the local metadata tree. The base directory is
/// injected at construction so the whole engine can run against a temp
/// directory in tests.
#[derive(Debug, Clone)]
pub struct Store {
    base: Utf8PathBuf,
}

impl Store {
    pub fn new(base: Utf8PathBuf) -> Self {
        Self { base }
    }

    pub fn from_working_dir() -> Result<Self, SyncError> {
        let cwd = std::env::current_dir().map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let base = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| SyncError::Filesystem("non-utf8 working directory".to_string()))?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Utf8Path {
        &self.base
    }

    /// Root of the cached metadata tree, `<base>/output/rde/data`.
    pub fn data_root(&self) -> Utf8PathBuf {
        self.base.join("output").join("rde").join("data")
    }

    pub fn self_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("self.json")
    }

    pub fn group_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("group.json")
    }

    pub fn group_detail_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("groupDetail.json")
    }

    pub fn subgroup_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("subGroup.json")
    }

    pub fn organization_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("organization.json")
    }

    pub fn instrument_type_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("instrumentType.json")
    }

    pub fn template_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("template.json")
    }

    pub fn instruments_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("instruments.json")
    }

    pub fn licenses_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("licenses.json")
    }

    pub fn dataset_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("dataset.json")
    }

    pub fn info_json_path(&self) -> Utf8PathBuf {
        self.data_root().join("info.json")
    }

    pub fn group_project_dir(&self) -> Utf8PathBuf {
        self.data_root().join("groupProjects")
    }

    pub fn group_organization_dir(&self) -> Utf8PathBuf {
        self.data_root().join("groupOrganizations")
    }

    pub fn subgroup_details_dir(&self) -> Utf8PathBuf {
        self.data_root().join("subGroupDetails")
    }

    pub fn subgroup_rel_details_dir(&self) -> Utf8PathBuf {
        self.data_root().join("subGroupRelDetails")
    }

    pub fn template_chunks_dir(&self) -> Utf8PathBuf {
        self.data_root().join("templateChunks")
    }

    pub fn instrument_chunks_dir(&self) -> Utf8PathBuf {
        self.data_root().join("instrumentChunks")
    }

    pub fn dataset_chunks_dir(&self) -> Utf8PathBuf {
        self.data_root().join("datasetChunks")
    }

    pub fn samples_dir(&self) -> Utf8PathBuf {
        self.data_root().join("samples")
    }

    pub fn invoice_schemas_dir(&self) -> Utf8PathBuf {
        self.data_root().join("invoiceSchemas")
    }

    pub fn datasets_dir(&self) -> Utf8PathBuf {
        self.data_root().join("datasets")
    }

    pub fn fetch_meta_dir(&self) -> Utf8PathBuf {
        self.data_root().join(".fetch_meta")
    }

    pub fn fetch_meta_path(&self, target: TargetId) -> Utf8PathBuf {
        self.fetch_meta_dir().join(format!("{}.json", target.as_str()))
    }

    /// Best-effort read of a target's fetch-meta sidecar. Any I/O or parse
    /// failure is reported as "no record".
    pub fn load_fetch_meta(&self, target: TargetId) -> Option<FetchMeta> {
        let path = self.fetch_meta_path(target);
        let content = fs::read_to_string(path.as_std_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Records the current UTC time (and, when supplied and non-negative,
    /// the fetch duration) for a target. Callers treat failure as non-fatal.
    pub fn save_fetch_meta(
        &self,
        target: TargetId,
        elapsed_seconds: Option<f64>,
    ) -> Result<(), SyncError> {
        let meta = FetchMeta {
            fetched_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            elapsed_seconds: elapsed_seconds.filter(|secs| *secs >= 0.0),
        };
        let path = self.fetch_meta_path(target);
        write_json_atomic(&path, &meta).map_err(|err| match err {
            SyncError::Filesystem(msg) => SyncError::MetadataPersistence(msg),
            other => other,
        })
    }

    pub fn ensure_data_root(&self) -> Result<(), SyncError> {
        fs::create_dir_all(self.data_root().as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }
}

/// Fetch bookkeeping sidecar, one small JSON file per target under
/// `.fetch_meta/`. An audit hint, never load-bearing for correctness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchMeta {
    pub fetched_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
}

/// Writes a serializable value as pretty JSON via a temp file in the target
/// directory, then persists it over the destination.
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), SyncError> {
    let parent = path
        .parent()
        .ok_or_else(|| SyncError::Filesystem(format!("no parent directory for {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".rde-sync")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), &content).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(())
}
