use camino::Utf8PathBuf;
use serde_json::{Value, json};

use rde_sync::domain::TargetId;
use rde_sync::local::StatusKind;
use rde_sync::store::{Store, write_json_atomic};
use rde_sync::sync::status_report;

fn temp_store() -> (tempfile::TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new(base);
    store.ensure_data_root().unwrap();
    (temp, store)
}

#[test]
fn empty_store_reports_everything_missing() {
    let (_temp, store) = temp_store();
    let report = status_report(&store, true);

    assert_eq!(report.targets.len(), 12);
    for entry in &report.targets {
        assert_eq!(entry.status, StatusKind::Missing);
        assert_eq!(entry.fetched_at, None);
        assert_eq!(entry.latest_local, None);
    }
}

#[test]
fn counts_and_meta_show_up_per_target() {
    let (_temp, store) = temp_store();

    write_json_atomic(
        &store.licenses_json_path(),
        &json!({"data": [{"id": "l1"}, {"id": "l2"}, {"id": "l3"}]}),
    )
    .unwrap();
    store.save_fetch_meta(TargetId::Licenses, Some(1.5)).unwrap();

    write_json_atomic(&store.samples_dir().join("g1.json"), &json!({"data": []})).unwrap();
    // chunk artifacts never count as items
    write_json_atomic(
        &store.datasets_dir().join("dataset_chunk_0001.json"),
        &json!({}),
    )
    .unwrap();

    let report = status_report(&store, true);
    let entry = |id: TargetId| {
        report
            .targets
            .iter()
            .find(|entry| entry.target_id == id)
            .unwrap()
    };

    let licenses = entry(TargetId::Licenses);
    assert_eq!(licenses.status, StatusKind::Complete);
    assert_eq!(licenses.list_count, Some(3));
    assert_eq!(licenses.elapsed_seconds, Some(1.5));
    assert!(licenses.fetched_at.is_some());
    assert!(licenses.latest_local.is_some());

    let samples = entry(TargetId::Samples);
    assert_eq!(samples.status, StatusKind::Complete);
    assert_eq!(samples.file_count, Some(1));

    let details = entry(TargetId::DatasetDetails);
    assert_eq!(details.status, StatusKind::Missing);
    assert_eq!(details.file_count, Some(0));
}

#[test]
fn report_serializes_with_wire_names() {
    let (_temp, store) = temp_store();
    let report = status_report(&store, false);

    let value = serde_json::to_value(&report).unwrap();
    let targets = value["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 11);
    assert_eq!(targets[0]["target_id"], Value::String("self".to_string()));
    assert_eq!(targets[1]["target_id"], json!("group_pipeline"));
    assert_eq!(targets[0]["status"], json!("missing"));
}
