use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::info;

use crate::error::SyncError;
use crate::local::subgroup_details_complete;
use crate::store::{Store, write_json_atomic};
use crate::sync::ProgressSink;

const PROGRAM_ID: &str = "4bbf62be-f270-4a46-9682-38cd064607ba";

/// Network collaborator of the sync engine, one capability per remote
/// target. The orchestrator dispatches through this trait instead of
/// branching on target identity, and treats every error as fatal.
pub trait Fetcher: Send + Sync {
    fn fetch_self(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_group_hierarchy(
        &self,
        token: &str,
        store: &Store,
        force_download: bool,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError>;
    fn fetch_samples(
        &self,
        token: &str,
        store: &Store,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError>;
    fn fetch_organization(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_instrument_type(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_dataset_list(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_templates(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_invoice_schemas(
        &self,
        token: &str,
        store: &Store,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError>;
    fn fetch_instruments(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_licenses(&self, token: &str, store: &Store) -> Result<(), SyncError>;
    fn fetch_dataset_detail(
        &self,
        token: &str,
        store: &Store,
        dataset_id: &str,
    ) -> Result<(), SyncError>;
    /// Re-fetches only the dataset details whose remote `modified` timestamp
    /// is newer than the local file.
    fn fetch_outdated_dataset_details(
        &self,
        token: &str,
        store: &Store,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError>;
    /// Whether the per-subgroup detail files are complete for the current
    /// subgroup list.
    fn subgroups_complete(&self, store: &Store) -> bool;
}

/// Blocking HTTP implementation against the RDE portal APIs. Base URLs are
/// injectable so tests can point at a local server.
#[derive(Clone)]
pub struct RdeHttpClient {
    client: Client,
    api_base: String,
    user_api_base: String,
    instrument_api_base: String,
    material_api_base: String,
}

impl RdeHttpClient {
    pub fn new() -> Result<Self, SyncError> {
        Self::with_base_urls(
            "https://rde-api.nims.go.jp",
            "https://rde-user-api.nims.go.jp",
            "https://rde-instrument-api.nims.go.jp",
            "https://rde-material-api.nims.go.jp",
        )
    }

    pub fn with_base_urls(
        api_base: &str,
        user_api_base: &str,
        instrument_api_base: &str,
        material_api_base: &str,
    ) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("rde-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::Http(err.to_string()))?,
        );
        headers.insert("Accept", HeaderValue::from_static("application/vnd.api+json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::Http(err.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            user_api_base: user_api_base.trim_end_matches('/').to_string(),
            instrument_api_base: instrument_api_base.trim_end_matches('/').to_string(),
            material_api_base: material_api_base.trim_end_matches('/').to_string(),
        })
    }

    fn get_json(&self, token: &str, url: &str) -> Result<Value, SyncError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .map_err(|err| SyncError::Http(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(SyncError::ApiStatus {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<Value>()
            .map_err(|err| SyncError::Http(err.to_string()))
    }

    fn get_and_save(
        &self,
        token: &str,
        url: &str,
        path: &camino::Utf8Path,
    ) -> Result<Value, SyncError> {
        let payload = self.get_json(token, url)?;
        write_json_atomic(path, &payload)?;
        Ok(payload)
    }

    /// Subgroup ids named by a group document's `included` entries.
    fn group_ids(payload: &Value) -> Vec<String> {
        payload
            .get("included")
            .and_then(Value::as_array)
            .map(|included| {
                included
                    .iter()
                    .filter(|item| item.get("type").and_then(Value::as_str) == Some("group"))
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Fetcher for RdeHttpClient {
    fn fetch_self(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!("{}/users/self", self.user_api_base);
        self.get_and_save(token, &url, &store.self_json_path())?;
        Ok(())
    }

    fn fetch_group_hierarchy(
        &self,
        token: &str,
        store: &Store,
        force_download: bool,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let root_url = format!(
            "{}/groups/root?include=children%2Cmembers",
            self.api_base
        );
        let root = self.get_and_save(token, &root_url, &store.group_json_path())?;

        let group_id = root
            .get("data")
            .and_then(Value::as_array)
            .and_then(|data| data.first())
            .or_else(|| root.get("data"))
            .and_then(|entry| entry.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Http("group root document has no group id".to_string()))?
            .to_string();

        let detail_url = format!(
            "{}/groups/{group_id}?include=children%2Cmembers",
            self.api_base
        );
        let detail = self.get_and_save(token, &detail_url, &store.group_detail_json_path())?;

        // the project group is the first child of the root group
        let project_group_id = Self::group_ids(&detail)
            .into_iter()
            .next()
            .unwrap_or(group_id);
        let subgroup_url = format!(
            "{}/groups/{project_group_id}?include=children%2Cmembers",
            self.api_base
        );
        let subgroup = self.get_and_save(token, &subgroup_url, &store.subgroup_json_path())?;

        let subgroup_ids = Self::group_ids(&subgroup);
        let total = subgroup_ids.len().max(1);
        for (index, id) in subgroup_ids.iter().enumerate() {
            let target = store.subgroup_details_dir().join(format!("{id}.json"));
            if !force_download && target.as_std_path().is_file() {
                continue;
            }
            let percent = ((index * 100) / total).min(100) as u8;
            let _ = progress.notify(
                percent,
                &format!("subgroup detail {}/{}", index + 1, total),
            );
            let url = format!(
                "{}/groups/{id}?include=children%2Cmembers",
                self.api_base
            );
            self.get_and_save(token, &url, &target)?;
        }
        Ok(())
    }

    fn fetch_samples(
        &self,
        token: &str,
        store: &Store,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let content = std::fs::read_to_string(store.subgroup_json_path().as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let subgroup: Value = serde_json::from_str(&content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;

        let group_ids = Self::group_ids(&subgroup);
        let total = group_ids.len().max(1);
        for (index, id) in group_ids.iter().enumerate() {
            let percent = ((index * 100) / total).min(100) as u8;
            let _ = progress.notify(percent, &format!("samples {}/{}", index + 1, total));
            let url = format!(
                "{}/samples?groupId={id}&page%5Blimit%5D=1000&page%5Boffset%5D=0",
                self.material_api_base
            );
            self.get_and_save(token, &url, &store.samples_dir().join(format!("{id}.json")))?;
        }
        Ok(())
    }

    fn fetch_organization(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!("{}/organizations", self.instrument_api_base);
        self.get_and_save(token, &url, &store.organization_json_path())?;
        Ok(())
    }

    fn fetch_instrument_type(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!(
            "{}/typeTerms?programId={PROGRAM_ID}",
            self.instrument_api_base
        );
        self.get_and_save(token, &url, &store.instrument_type_json_path())?;
        Ok(())
    }

    fn fetch_dataset_list(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!(
            "{}/datasets?sort=-modified&page%5Blimit%5D=5000&include=manager%2Creleases",
            self.api_base
        );
        self.get_and_save(token, &url, &store.dataset_json_path())?;
        Ok(())
    }

    fn fetch_templates(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!(
            "{}/datasetTemplates?programId={PROGRAM_ID}&sort=id&page%5Blimit%5D=10000&page%5Boffset%5D=0&include=instruments",
            self.api_base
        );
        self.get_and_save(token, &url, &store.template_json_path())?;
        Ok(())
    }

    fn fetch_invoice_schemas(
        &self,
        token: &str,
        store: &Store,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let content = std::fs::read_to_string(store.template_json_path().as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let templates: Value = serde_json::from_str(&content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;

        let template_ids: Vec<String> = templates
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let total = template_ids.len().max(1);
        for (index, id) in template_ids.iter().enumerate() {
            let percent = ((index * 100) / total).min(100) as u8;
            let _ = progress.notify(
                percent,
                &format!("invoice schema {}/{}", index + 1, total),
            );
            let url = format!("{}/invoiceSchemas/{id}", self.api_base);
            self.get_and_save(
                token,
                &url,
                &store.invoice_schemas_dir().join(format!("{id}.json")),
            )?;
        }
        Ok(())
    }

    fn fetch_instruments(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!(
            "{}/instruments?programId={PROGRAM_ID}&page%5Blimit%5D=10000&sort=id&page%5Boffset%5D=0",
            self.instrument_api_base
        );
        self.get_and_save(token, &url, &store.instruments_json_path())?;
        Ok(())
    }

    fn fetch_licenses(&self, token: &str, store: &Store) -> Result<(), SyncError> {
        let url = format!("{}/licenses", self.api_base);
        self.get_and_save(token, &url, &store.licenses_json_path())?;
        Ok(())
    }

    fn fetch_dataset_detail(
        &self,
        token: &str,
        store: &Store,
        dataset_id: &str,
    ) -> Result<(), SyncError> {
        let url = format!(
            "{}/datasets/{dataset_id}?updateViews=true&include=releases%2Capplicant%2Cprogram%2Cmanager%2Ctemplate%2Cinstruments%2Clicense",
            self.api_base
        );
        self.get_and_save(
            token,
            &url,
            &store.datasets_dir().join(format!("{dataset_id}.json")),
        )?;
        Ok(())
    }

    fn fetch_outdated_dataset_details(
        &self,
        token: &str,
        store: &Store,
        progress: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let content = std::fs::read_to_string(store.dataset_json_path().as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let listing: Value = serde_json::from_str(&content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;

        let datasets = listing
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = datasets.len().max(1);

        for (index, dataset) in datasets.iter().enumerate() {
            let Some(id) = dataset.get("id").and_then(Value::as_str) else {
                continue;
            };
            let modified = dataset
                .get("attributes")
                .and_then(|attrs| attrs.get("modified"))
                .and_then(Value::as_str)
                .and_then(crate::freshness::parse_timestamp);
            let Some(modified) = modified else {
                continue;
            };

            let local = store.datasets_dir().join(format!("{id}.json"));
            let up_to_date = crate::local::mtime_utc(&local)
                .map(|mtime| mtime >= modified)
                .unwrap_or(false);
            if up_to_date {
                info!(dataset_id = id, "dataset detail is current, not re-fetched");
                continue;
            }

            let percent = ((index * 100) / total).min(100) as u8;
            let _ = progress.notify(
                percent,
                &format!("dataset detail {}/{}", index + 1, total),
            );
            self.fetch_dataset_detail(token, store, id)?;
        }
        Ok(())
    }

    fn subgroups_complete(&self, store: &Store) -> bool {
        subgroup_details_complete(store)
    }
}
