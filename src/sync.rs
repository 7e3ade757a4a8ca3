//! The sync orchestrator: walks the target catalog in dependency order,
//! decides fetch vs. skip per target, dispatches to the [`Fetcher`]
//! collaborator, records fetch metadata, and reports progress with
//! cooperative cancellation between steps.

use std::fs;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::{TargetSpec, build_catalog};
use crate::config::Selection;
use crate::domain::{FetchMode, OutdatedPolicy, RunOutcome, TargetId};
use crate::error::SyncError;
use crate::fetcher::Fetcher;
use crate::freshness::is_stale;
use crate::local::{anchor_exists, resolve_anchor};
use crate::store::{Store, write_json_atomic};

/// Receives progress updates; returning `false` requests cancellation,
/// honored between target steps only, never mid-fetch.
pub trait ProgressSink {
    fn notify(&self, percent: u8, message: &str) -> bool;
}

/// Always-continue sink.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn notify(&self, _percent: u8, _message: &str) -> bool {
        true
    }
}

pub struct SyncEngine<F: Fetcher> {
    store: Store,
    fetcher: F,
}

impl<F: Fetcher> SyncEngine<F> {
    pub fn new(store: Store, fetcher: F) -> Self {
        Self { store, fetcher }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Runs the whole pipeline, strictly in catalog order. The first fetch
    /// or prerequisite error aborts the run; local writes of earlier targets
    /// stay in place. Cancellation is a result, not an error.
    pub fn run(
        &self,
        token: &str,
        selection: &Selection,
        progress: &dyn ProgressSink,
    ) -> Result<RunOutcome, SyncError> {
        self.store.ensure_data_root()?;

        let catalog = build_catalog(&self.store, selection.include_dataset_details);
        let enabled: Vec<&TargetSpec> = catalog
            .iter()
            .filter(|spec| selection.enabled_for(spec.id))
            .collect();
        let total = enabled.len().max(1);
        let mut completed = 0usize;

        for spec in enabled {
            let percent = overall_percent(completed, total);
            if !progress.notify(percent, &format!("preparing: {}", spec.label)) {
                info!(target_id = %spec.id, "run cancelled by caller");
                return Ok(RunOutcome::Cancelled);
            }

            self.check_prerequisites(spec.id)?;

            let mode = selection.mode_for(spec.id);
            if !self.should_fetch(spec, mode, selection.outdated_policy, selection.stale_days) {
                info!(target_id = %spec.id, %mode, "skipped, local copy is sufficient");
                completed += 1;
                continue;
            }

            self.execute(spec, mode, token, progress)?;
            completed += 1;
        }

        let _ = progress.notify(100, "sync completed");
        Ok(RunOutcome::Completed)
    }

    /// The generic fetch decision. Target-specific rules (group-hierarchy
    /// cache reuse, dataset-detail list bootstrap) are layered on top in
    /// `execute`.
    pub fn should_fetch(
        &self,
        spec: &TargetSpec,
        mode: FetchMode,
        policy: OutdatedPolicy,
        stale_days: u32,
    ) -> bool {
        match mode {
            FetchMode::Skip => false,
            FetchMode::Overwrite => true,
            FetchMode::Missing | FetchMode::Older => {
                let Some(anchor) = resolve_anchor(spec) else {
                    // nothing to inspect: err toward fetching
                    return true;
                };
                let exists = anchor_exists(&anchor);
                match mode {
                    FetchMode::Missing => !exists,
                    _ => {
                        !exists || is_stale(&self.store, spec.id, &anchor, policy, stale_days)
                    }
                }
            }
        }
    }

    /// Samples and invoice schemas cannot even be evaluated without their
    /// upstream documents.
    fn check_prerequisites(&self, target: TargetId) -> Result<(), SyncError> {
        match target {
            TargetId::Samples => {
                self.require_file(target, &self.store.subgroup_json_path(), "subGroup.json")
            }
            TargetId::InvoiceSchemas => {
                self.require_file(target, &self.store.template_json_path(), "template.json")?;
                self.require_file(target, &self.store.subgroup_json_path(), "subGroup.json")
            }
            _ => Ok(()),
        }
    }

    fn require_file(
        &self,
        target: TargetId,
        path: &camino::Utf8Path,
        requires: &'static str,
    ) -> Result<(), SyncError> {
        if path.as_std_path().is_file() {
            Ok(())
        } else {
            Err(SyncError::PrerequisiteMissing { target, requires })
        }
    }

    fn execute(
        &self,
        spec: &TargetSpec,
        mode: FetchMode,
        token: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let started = Instant::now();
        match spec.id {
            TargetId::SelfInfo => {
                self.fetcher.fetch_self(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::GroupPipeline => {
                let files_ready = spec
                    .list_paths
                    .iter()
                    .all(|path| path.as_std_path().is_file());
                let reuse = mode != FetchMode::Overwrite
                    && files_ready
                    && self.fetcher.subgroups_complete(&self.store);
                if reuse {
                    info!(target_id = %spec.id, "group hierarchy cache reused");
                } else {
                    self.fetcher.fetch_group_hierarchy(
                        token,
                        &self.store,
                        mode == FetchMode::Overwrite,
                        progress,
                    )?;
                    self.record_fetch_meta(spec.id, started);
                }
            }
            TargetId::Samples => {
                self.fetcher.fetch_samples(token, &self.store, progress)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::Organization => {
                self.fetcher.fetch_organization(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::InstrumentType => {
                self.fetcher.fetch_instrument_type(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::DatasetList => {
                self.fetcher.fetch_dataset_list(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::Template => {
                self.fetcher.fetch_templates(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::InvoiceSchemas => {
                self.fetcher
                    .fetch_invoice_schemas(token, &self.store, progress)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::Instruments => {
                self.fetcher.fetch_instruments(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::Licenses => {
                self.fetcher.fetch_licenses(token, &self.store)?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::InfoGenerate => {
                self.generate_info()?;
                self.record_fetch_meta(spec.id, started);
            }
            TargetId::DatasetDetails => {
                self.run_dataset_details(token, mode, progress)?;
                self.record_fetch_meta(spec.id, started);
            }
        }
        Ok(())
    }

    /// Synthesizes `info.json` from the already-local group documents. No
    /// network; fetch-meta is still recorded so freshness queries treat the
    /// document like any other target.
    fn generate_info(&self) -> Result<(), SyncError> {
        let subgroup_path = self.store.subgroup_json_path();
        if !subgroup_path.as_std_path().is_file() {
            return Err(SyncError::PrerequisiteMissing {
                target: TargetId::InfoGenerate,
                requires: "subGroup.json",
            });
        }

        let content = fs::read_to_string(subgroup_path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let subgroup: Value = serde_json::from_str(&content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;

        let (users, subgroups) = extract_users_and_subgroups(&subgroup);

        // groupDetail.json is optional input; unreadable means no group id
        let group_id = fs::read_to_string(self.store.group_detail_json_path().as_std_path())
            .ok()
            .and_then(|detail| serde_json::from_str::<Value>(&detail).ok())
            .and_then(|detail| {
                detail
                    .get("data")
                    .and_then(|data| data.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let project_group_id = subgroup
            .get("data")
            .and_then(|data| data.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let info = InfoDocument {
            group_id,
            project_group_id,
            users,
            subgroups,
        };
        write_json_atomic(&self.store.info_json_path(), &info)
    }

    fn run_dataset_details(
        &self,
        token: &str,
        mode: FetchMode,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        // bootstrap the dataset list when it is not local yet
        if !self.store.dataset_json_path().as_std_path().is_file() {
            let started = Instant::now();
            self.fetcher.fetch_dataset_list(token, &self.store)?;
            self.record_fetch_meta(TargetId::DatasetList, started);
        }

        if mode == FetchMode::Overwrite {
            let content = fs::read_to_string(self.store.dataset_json_path().as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
            let listing: Value = serde_json::from_str(&content)
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
            let ids: Vec<String> = listing
                .get("data")
                .and_then(Value::as_array)
                .map(|data| {
                    data.iter()
                        .filter_map(|entry| entry.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let total = ids.len().max(1);
            for (index, id) in ids.iter().enumerate() {
                // per-item progress; mid-step cancellation is not honored
                let percent = ((index * 100) / total).min(100) as u8;
                let _ = progress.notify(
                    percent,
                    &format!("dataset detail {}/{}", index + 1, total),
                );
                self.fetcher.fetch_dataset_detail(token, &self.store, id)?;
            }
        } else {
            self.fetcher
                .fetch_outdated_dataset_details(token, &self.store, progress)?;
        }
        Ok(())
    }

    /// Best-effort bookkeeping: a persistence failure is logged and
    /// discarded, never fatal.
    fn record_fetch_meta(&self, target: TargetId, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        if let Err(err) = self.store.save_fetch_meta(target, Some(elapsed)) {
            warn!(target_id = %target, %err, "fetch metadata not persisted");
        }
    }
}

/// Read-only snapshot of every catalog target's local state, for status
/// listings. Performs no network I/O.
pub fn status_report(store: &Store, include_dataset_details: bool) -> StatusReport {
    let targets = build_catalog(store, include_dataset_details)
        .iter()
        .map(|spec| {
            let local = crate::local::compute_local_status(spec);
            let meta = store.load_fetch_meta(spec.id);
            StatusEntry {
                target_id: spec.id,
                label: spec.label,
                kind: spec.kind,
                status: local.status,
                list_count: local.list_count,
                file_count: local.file_count,
                latest_local: crate::local::latest_local_timestamp(spec)
                    .map(|ts| ts.to_rfc3339()),
                fetched_at: meta.as_ref().map(|meta| meta.fetched_at.clone()),
                elapsed_seconds: meta.and_then(|meta| meta.elapsed_seconds),
            }
        })
        .collect();

    StatusReport { targets }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub targets: Vec<StatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub target_id: TargetId,
    pub label: &'static str,
    pub kind: crate::domain::TargetKind,
    pub status: crate::local::StatusKind,
    pub list_count: Option<usize>,
    pub file_count: Option<usize>,
    pub latest_local: Option<String>,
    pub fetched_at: Option<String>,
    pub elapsed_seconds: Option<f64>,
}

fn overall_percent(completed: usize, total: usize) -> u8 {
    ((completed * 100) / total).min(100) as u8
}

/// Merged document synthesized for the `info_generate` target. Field names
/// match the documents already produced by earlier tool versions.
#[derive(Debug, Serialize)]
struct InfoDocument {
    group_id: Option<String>,
    project_group_id: Option<String>,
    users: Vec<InfoUser>,
    subgroups: Vec<InfoSubgroup>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoUser {
    user_id: Option<String>,
    user_name: Option<String>,
    email: Option<String>,
    family_name: Option<String>,
    given_name: Option<String>,
    organization_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoSubgroup {
    group_id: Option<String>,
    name: Option<String>,
    group_type: Option<String>,
    description: Option<String>,
}

fn extract_users_and_subgroups(subgroup: &Value) -> (Vec<InfoUser>, Vec<InfoSubgroup>) {
    let mut users = Vec::new();
    let mut subgroups = Vec::new();

    let included = subgroup
        .get("included")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for item in &included {
        let id = item.get("id").and_then(Value::as_str).map(str::to_string);
        let attr = |key: &str| {
            item.get("attributes")
                .and_then(|attrs| attrs.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match item.get("type").and_then(Value::as_str) {
            Some("user") => users.push(InfoUser {
                user_id: id,
                user_name: attr("userName"),
                email: attr("emailAddress"),
                family_name: attr("familyName"),
                given_name: attr("givenName"),
                organization_name: attr("organizationName"),
            }),
            Some("group") => subgroups.push(InfoSubgroup {
                group_id: id,
                name: attr("name"),
                group_type: attr("groupType"),
                description: attr("description"),
            }),
            _ => {}
        }
    }

    (users, subgroups)
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use crate::catalog::build_catalog;

    use super::*;

    struct NoopFetcher;

    impl Fetcher for NoopFetcher {
        fn fetch_self(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_group_hierarchy(
            &self,
            _: &str,
            _: &Store,
            _: bool,
            _: &dyn ProgressSink,
        ) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_samples(&self, _: &str, _: &Store, _: &dyn ProgressSink) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_organization(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_instrument_type(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_dataset_list(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_templates(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_invoice_schemas(
            &self,
            _: &str,
            _: &Store,
            _: &dyn ProgressSink,
        ) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_instruments(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_licenses(&self, _: &str, _: &Store) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_dataset_detail(&self, _: &str, _: &Store, _: &str) -> Result<(), SyncError> {
            Ok(())
        }
        fn fetch_outdated_dataset_details(
            &self,
            _: &str,
            _: &Store,
            _: &dyn ProgressSink,
        ) -> Result<(), SyncError> {
            Ok(())
        }
        fn subgroups_complete(&self, _: &Store) -> bool {
            false
        }
    }

    fn temp_engine() -> (tempfile::TempDir, SyncEngine<NoopFetcher>) {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new(base);
        store.ensure_data_root().unwrap();
        (temp, SyncEngine::new(store, NoopFetcher))
    }

    #[test]
    fn skip_never_fetches_overwrite_always_does() {
        let (_temp, engine) = temp_engine();
        let catalog = build_catalog(engine.store(), true);

        for spec in &catalog {
            assert!(!engine.should_fetch(spec, FetchMode::Skip, OutdatedPolicy::Bca, 0));
            assert!(engine.should_fetch(spec, FetchMode::Overwrite, OutdatedPolicy::Bca, 0));
        }
    }

    #[test]
    fn missing_mode_follows_anchor_existence() {
        let (_temp, engine) = temp_engine();
        let catalog = build_catalog(engine.store(), false);
        let licenses = catalog
            .iter()
            .find(|spec| spec.id == TargetId::Licenses)
            .unwrap();

        assert!(engine.should_fetch(licenses, FetchMode::Missing, OutdatedPolicy::Bca, 0));

        std::fs::write(engine.store().licenses_json_path(), b"[]").unwrap();
        assert!(!engine.should_fetch(licenses, FetchMode::Missing, OutdatedPolicy::Bca, 0));
    }

    #[test]
    fn older_mode_policy_a_uses_mtime() {
        let (_temp, engine) = temp_engine();
        let catalog = build_catalog(engine.store(), false);
        let licenses = catalog
            .iter()
            .find(|spec| spec.id == TargetId::Licenses)
            .unwrap();

        // absent anchor: fetch
        assert!(engine.should_fetch(licenses, FetchMode::Older, OutdatedPolicy::A, 30));

        // freshly written anchor: not stale under a 30-day threshold
        std::fs::write(engine.store().licenses_json_path(), b"[]").unwrap();
        assert!(!engine.should_fetch(licenses, FetchMode::Older, OutdatedPolicy::A, 30));
    }

    #[test]
    fn directory_anchor_with_only_chunks_counts_as_missing() {
        let (_temp, engine) = temp_engine();
        let catalog = build_catalog(engine.store(), false);
        let samples = catalog
            .iter()
            .find(|spec| spec.id == TargetId::Samples)
            .unwrap();

        let dir = engine.store().samples_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("summary.json"), b"{}").unwrap();
        assert!(engine.should_fetch(samples, FetchMode::Missing, OutdatedPolicy::Bca, 0));

        std::fs::write(dir.join("s1.json"), b"{}").unwrap();
        assert!(!engine.should_fetch(samples, FetchMode::Missing, OutdatedPolicy::Bca, 0));
    }

    #[test]
    fn extract_users_and_subgroups_shapes() {
        let subgroup: Value = serde_json::from_str(
            r#"{"data": {"id": "proj"}, "included": [
                {"type": "user", "id": "u1", "attributes": {
                    "userName": "alice", "emailAddress": "a@example.org",
                    "familyName": "A", "givenName": "Alice",
                    "organizationName": "NIMS"}},
                {"type": "group", "id": "g1", "attributes": {
                    "name": "team", "groupType": "TEAM", "description": "d"}},
                {"type": "other", "id": "x"}
            ]}"#,
        )
        .unwrap();

        let (users, subgroups) = extract_users_and_subgroups(&subgroup);
        assert_eq!(users.len(), 1);
        assert_eq!(subgroups.len(), 1);
        assert_eq!(users[0].user_name.as_deref(), Some("alice"));
        assert_eq!(subgroups[0].group_id.as_deref(), Some("g1"));

        let json = serde_json::to_value(&users[0]).unwrap();
        assert!(json.get("userId").is_some());
        assert!(json.get("organizationName").is_some());
    }

    #[test]
    fn overall_percent_clamps() {
        assert_eq!(overall_percent(0, 10), 0);
        assert_eq!(overall_percent(3, 10), 30);
        assert_eq!(overall_percent(10, 10), 100);
        assert_eq!(overall_percent(11, 10), 100);
    }
}
