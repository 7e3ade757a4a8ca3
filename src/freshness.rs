//! Freshness oracle: resolves one effective last-known-good timestamp per
//! target from up to three competing sources and compares it against the
//! staleness threshold.
//!
//! Sources, each normalized to UTC:
//! - A: the anchor file's modification time
//! - B: a timestamp embedded in the anchor JSON document
//! - C: the `fetched_at` of the target's fetch-meta record

use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::domain::{OutdatedPolicy, TargetId};
use crate::local::mtime_utc;
use crate::store::Store;

const META_KEYS: [&str; 4] = ["updatedAt", "generatedAt", "createdAt", "fetchedAt"];
const ATTRIBUTE_KEYS: [&str; 3] = ["modified", "updated", "created"];

/// Lenient ISO-8601 parse: RFC 3339 first, then common naive forms which are
/// assumed to be UTC. Unparseable input is treated as absent.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    None
}

/// Source B: searches the anchor document for a timestamp, in order
/// `meta.{updatedAt,generatedAt,createdAt,fetchedAt}`, then
/// `data.attributes.{modified,updated,created}` for an object `data`, then
/// the same attributes on the first element of an array `data`.
pub fn embedded_timestamp(anchor: &Utf8Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(anchor.as_std_path()).ok()?;
    let payload: Value = serde_json::from_str(&content).ok()?;
    let object = payload.as_object()?;

    let mut candidates: Vec<&str> = Vec::new();
    if let Some(meta) = object.get("meta").and_then(Value::as_object) {
        for key in META_KEYS {
            if let Some(value) = meta.get(key).and_then(Value::as_str) {
                if !value.is_empty() {
                    candidates.push(value);
                }
            }
        }
    }

    let attributes = match object.get("data") {
        Some(Value::Object(data)) => data.get("attributes").and_then(Value::as_object),
        Some(Value::Array(data)) => data
            .first()
            .and_then(Value::as_object)
            .and_then(|first| first.get("attributes"))
            .and_then(Value::as_object),
        _ => None,
    };
    if let Some(attributes) = attributes {
        for key in ATTRIBUTE_KEYS {
            if let Some(value) = attributes.get(key).and_then(Value::as_str) {
                if !value.is_empty() {
                    candidates.push(value);
                }
            }
        }
    }

    candidates.into_iter().find_map(parse_timestamp)
}

/// Source C: the parsed `fetched_at` of the target's fetch-meta record.
pub fn fetch_meta_timestamp(store: &Store, target: TargetId) -> Option<DateTime<Utc>> {
    let meta = store.load_fetch_meta(target)?;
    parse_timestamp(&meta.fetched_at)
}

/// Whether the target's effective timestamp is older than `stale_days` ago.
/// When no source yields a value the target is treated as stale, erring
/// toward a re-fetch over trusting absent data.
pub fn is_stale(
    store: &Store,
    target: TargetId,
    anchor: &Utf8Path,
    policy: OutdatedPolicy,
    stale_days: u32,
) -> bool {
    is_stale_at(Utc::now(), store, target, anchor, policy, stale_days)
}

pub fn is_stale_at(
    now: DateTime<Utc>,
    store: &Store,
    target: TargetId,
    anchor: &Utf8Path,
    policy: OutdatedPolicy,
    stale_days: u32,
) -> bool {
    let effective = match policy {
        OutdatedPolicy::Bca => embedded_timestamp(anchor)
            .or_else(|| fetch_meta_timestamp(store, target))
            .or_else(|| mtime_utc(anchor)),
        OutdatedPolicy::Ca => fetch_meta_timestamp(store, target).or_else(|| mtime_utc(anchor)),
        OutdatedPolicy::A => mtime_utc(anchor),
    };
    debug!(
        target_id = %target,
        %anchor,
        %policy,
        effective = effective.map(|ts| ts.to_rfc3339()),
        "resolved effective timestamp"
    );

    let Some(effective) = effective else {
        return true;
    };
    effective < now - Duration::days(i64::from(stale_days))
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use chrono::TimeZone;

    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = Store::new(base);
        store.ensure_data_root().unwrap();
        (temp, store)
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    #[test]
    fn parse_timestamp_variants() {
        assert!(parse_timestamp("2024-05-01T10:20:30Z").is_some());
        assert!(parse_timestamp("2024-05-01T10:20:30+09:00").is_some());
        // naive values are assumed UTC
        assert_eq!(
            parse_timestamp("2024-05-01T10:20:30"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 20, 30).unwrap())
        );
        assert!(parse_timestamp("2024-05-01").is_some());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("next tuesday").is_none());
    }

    #[test]
    fn embedded_timestamp_search_order() {
        let (_temp, store) = temp_store();
        let path = store.data_root().join("doc.json");

        std::fs::write(
            &path,
            br#"{"meta": {"updatedAt": "2024-01-02T00:00:00Z", "createdAt": "2020-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(
            embedded_timestamp(&path),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );

        std::fs::write(
            &path,
            br#"{"data": {"attributes": {"modified": "2023-06-01T12:00:00Z"}}}"#,
        )
        .unwrap();
        assert_eq!(
            embedded_timestamp(&path),
            Some(Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap())
        );

        std::fs::write(
            &path,
            br#"{"data": [{"attributes": {"created": "2022-03-04T05:06:07Z"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            embedded_timestamp(&path),
            Some(Utc.with_ymd_and_hms(2022, 3, 4, 5, 6, 7).unwrap())
        );

        std::fs::write(&path, br#"{"data": []}"#).unwrap();
        assert_eq!(embedded_timestamp(&path), None);

        // unparseable candidates are skipped, not fatal
        std::fs::write(
            &path,
            br#"{"meta": {"updatedAt": "soon", "generatedAt": "2021-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        assert_eq!(
            embedded_timestamp(&path),
            Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn no_source_means_stale() {
        let (_temp, store) = temp_store();
        let anchor = store.data_root().join("absent.json");
        assert!(is_stale(
            &store,
            TargetId::SelfInfo,
            &anchor,
            OutdatedPolicy::Bca,
            30,
        ));
    }

    #[test]
    fn policy_bca_prefers_embedded_over_fetch_meta() {
        let (_temp, store) = temp_store();
        let anchor = store.data_root().join("organization.json");
        let old = days_ago(400).to_rfc3339();
        std::fs::write(
            &anchor,
            format!(r#"{{"meta": {{"updatedAt": "{old}"}}}}"#),
        )
        .unwrap();
        // fetch-meta record says "2 days ago" (save_fetch_meta writes now)
        store.save_fetch_meta(TargetId::Organization, None).unwrap();

        // BCA: B wins, 400 days old -> stale
        assert!(is_stale(
            &store,
            TargetId::Organization,
            &anchor,
            OutdatedPolicy::Bca,
            30,
        ));
        // CA: C wins, fresh -> not stale
        assert!(!is_stale(
            &store,
            TargetId::Organization,
            &anchor,
            OutdatedPolicy::Ca,
            30,
        ));
    }

    #[test]
    fn policy_a_uses_mtime_only() {
        let (_temp, store) = temp_store();
        let anchor = store.data_root().join("licenses.json");
        let old = days_ago(400).to_rfc3339();
        std::fs::write(
            &anchor,
            format!(r#"{{"meta": {{"updatedAt": "{old}"}}}}"#),
        )
        .unwrap();

        // the file was just written, so its mtime is fresh
        assert!(!is_stale(
            &store,
            TargetId::Licenses,
            &anchor,
            OutdatedPolicy::A,
            30,
        ));
    }

    #[test]
    fn is_stale_is_idempotent() {
        let (_temp, store) = temp_store();
        let anchor = store.data_root().join("doc.json");
        std::fs::write(&anchor, br#"{"meta": {"updatedAt": "2020-01-01T00:00:00Z"}}"#).unwrap();

        let now = Utc::now();
        let first = is_stale_at(now, &store, TargetId::Template, &anchor, OutdatedPolicy::Bca, 7);
        let second = is_stale_at(now, &store, TargetId::Template, &anchor, OutdatedPolicy::Bca, 7);
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn threshold_is_inclusive_of_fresh_edge() {
        let (_temp, store) = temp_store();
        let anchor = store.data_root().join("doc.json");
        let ts = days_ago(10).to_rfc3339();
        std::fs::write(&anchor, format!(r#"{{"meta": {{"updatedAt": "{ts}"}}}}"#)).unwrap();

        let now = Utc::now();
        assert!(!is_stale_at(
            now,
            &store,
            TargetId::Template,
            &anchor,
            OutdatedPolicy::Bca,
            30,
        ));
        assert!(is_stale_at(
            now,
            &store,
            TargetId::Template,
            &anchor,
            OutdatedPolicy::Bca,
            9,
        ));
    }
}
