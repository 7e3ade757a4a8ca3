use camino::Utf8PathBuf;

use crate::domain::{TargetId, TargetKind};
use crate::store::Store;

/// Identity and storage shape of one synchronizable target.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub id: TargetId,
    pub label: &'static str,
    pub kind: TargetKind,
    /// The canonical list document, when the target has one.
    pub primary_list_path: Option<Utf8PathBuf>,
    /// Files that must all exist for the list portion to be complete.
    pub list_paths: Vec<Utf8PathBuf>,
    /// Directories holding many per-item JSON files.
    pub dir_paths: Vec<Utf8PathBuf>,
}

/// Builds the ordered catalog of synchronizable targets. The vector order is
/// the execution order and encodes the dependency chain between targets
/// (group hierarchy before samples and invoice schemas, dataset list before
/// dataset details, both group entities before the generated info document).
/// The engine trusts this order; it does not verify it.
pub fn build_catalog(store: &Store, include_dataset_details: bool) -> Vec<TargetSpec> {
    let mut specs = vec![
        TargetSpec {
            id: TargetId::SelfInfo,
            label: "user profile (self.json)",
            kind: TargetKind::List,
            primary_list_path: Some(store.self_json_path()),
            list_paths: vec![store.self_json_path()],
            dir_paths: Vec::new(),
        },
        TargetSpec {
            id: TargetId::GroupPipeline,
            label: "group hierarchy (group/groupDetail/subGroup + details)",
            kind: TargetKind::Composite,
            primary_list_path: Some(store.group_json_path()),
            list_paths: vec![
                store.group_json_path(),
                store.group_detail_json_path(),
                store.subgroup_json_path(),
            ],
            dir_paths: vec![
                store.group_project_dir(),
                store.group_organization_dir(),
                store.subgroup_details_dir(),
                store.subgroup_rel_details_dir(),
            ],
        },
        TargetSpec {
            id: TargetId::Samples,
            label: "samples (samples/*.json)",
            kind: TargetKind::Directory,
            primary_list_path: None,
            list_paths: Vec::new(),
            dir_paths: vec![store.samples_dir()],
        },
        TargetSpec {
            id: TargetId::Organization,
            label: "organizations (organization.json)",
            kind: TargetKind::List,
            primary_list_path: Some(store.organization_json_path()),
            list_paths: vec![store.organization_json_path()],
            dir_paths: Vec::new(),
        },
        TargetSpec {
            id: TargetId::InstrumentType,
            label: "instrument types (instrumentType.json)",
            kind: TargetKind::List,
            primary_list_path: Some(store.instrument_type_json_path()),
            list_paths: vec![store.instrument_type_json_path()],
            dir_paths: Vec::new(),
        },
        TargetSpec {
            id: TargetId::DatasetList,
            label: "dataset list (dataset.json)",
            kind: TargetKind::Composite,
            primary_list_path: Some(store.dataset_json_path()),
            list_paths: vec![store.dataset_json_path()],
            dir_paths: vec![store.dataset_chunks_dir()],
        },
        TargetSpec {
            id: TargetId::Template,
            label: "dataset templates (template.json)",
            kind: TargetKind::Composite,
            primary_list_path: Some(store.template_json_path()),
            list_paths: vec![store.template_json_path()],
            dir_paths: vec![store.template_chunks_dir()],
        },
        TargetSpec {
            id: TargetId::InvoiceSchemas,
            label: "invoice schemas (invoiceSchemas/*.json)",
            kind: TargetKind::Directory,
            primary_list_path: None,
            list_paths: Vec::new(),
            dir_paths: vec![store.invoice_schemas_dir()],
        },
        TargetSpec {
            id: TargetId::Instruments,
            label: "instruments (instruments.json)",
            kind: TargetKind::Composite,
            primary_list_path: Some(store.instruments_json_path()),
            list_paths: vec![store.instruments_json_path()],
            dir_paths: vec![store.instrument_chunks_dir()],
        },
        TargetSpec {
            id: TargetId::Licenses,
            label: "licenses (licenses.json)",
            kind: TargetKind::List,
            primary_list_path: Some(store.licenses_json_path()),
            list_paths: vec![store.licenses_json_path()],
            dir_paths: Vec::new(),
        },
        TargetSpec {
            id: TargetId::InfoGenerate,
            label: "merged info document (info.json)",
            kind: TargetKind::Generated,
            primary_list_path: Some(store.info_json_path()),
            list_paths: vec![store.info_json_path()],
            dir_paths: Vec::new(),
        },
    ];

    if include_dataset_details {
        specs.push(TargetSpec {
            id: TargetId::DatasetDetails,
            label: "per-dataset details (datasets/*.json)",
            kind: TargetKind::Directory,
            primary_list_path: None,
            list_paths: Vec::new(),
            dir_paths: vec![store.datasets_dir()],
        });
    }

    specs
}
