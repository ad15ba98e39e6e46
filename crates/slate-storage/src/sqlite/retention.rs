//! Revision retention engine.
//!
//! Runs after every successful put. `latest` keeps the newest `count` live
//! revisions of the written hash-key group and tombstones the rest with a
//! grace TTL; `latest_hash` hard-deletes the superseded set instead;
//! `interval` applies the `latest` rule within `interval`-second time
//! buckets. Every sweep appends the expired-row purge so GC is amortized
//! across writes. Errors here are logged and swallowed by the caller; a
//! retention failure never fails the user's write.

use std::collections::BTreeMap;

use tracing::debug;

use slate_core::SqlValue;
use slate_core::schema_info::SchemaInfo;
use slate_core::timeuuid;
use slate_core::types::RetentionPolicy;

use crate::error::{Result, StorageError};
use crate::sqlite::client::{Client, Row};
use crate::sqlite::query::{self, PutPlan, SoftDeleteGate};

/// Applies the schema's retention policy for the group just written.
pub(crate) fn apply(
    client: &Client,
    info: &SchemaInfo,
    n: &str,
    plan: &PutPlan,
    now_ms: i64,
) -> Result<()> {
    let (count, grace_ttl, hard_delete, interval) = match &info.schema.revision_retention_policy {
        RetentionPolicy::All => return Ok(()),
        RetentionPolicy::Latest { count, grace_ttl } => (*count, *grace_ttl, false, None),
        RetentionPolicy::LatestHash { count, grace_ttl } => (*count, *grace_ttl, true, None),
        RetentionPolicy::Interval {
            count,
            grace_ttl,
            interval,
        } => (*count, *grace_ttl, false, Some(*interval)),
    };

    // Live revisions of the written hash-key group, newest first.
    let hash_values: Vec<(String, SqlValue)> = info
        .hash_keys()
        .iter()
        .map(|k| {
            (
                (*k).to_owned(),
                plan.written.get(*k).cloned().unwrap_or(SqlValue::Null),
            )
        })
        .collect();
    let scan = query::build_revision_scan_query(info, n, &hash_values, SoftDeleteGate::LiveOnly);
    let rows = client.query(&scan)?;

    let superseded = select_superseded(info, &rows, count as usize, interval)?;

    let mut statements = Vec::new();
    for row in &superseded {
        if hard_delete {
            statements.push(query::build_delete_older_query(n, row));
        } else {
            statements.push(query::build_tombstone_query(
                n,
                row,
                now_ms + grace_ttl as i64 * 1000,
            ));
        }
    }
    statements.push(query::build_delete_expired_query(n));

    debug!(table = %n, superseded = superseded.len(), "applying retention policy");
    client.run(&statements)
}

/// Picks the revisions past the retention window. Rows arrive newest first.
fn select_superseded(
    info: &SchemaInfo,
    rows: &[Row],
    count: usize,
    interval_seconds: Option<u64>,
) -> Result<Vec<Row>> {
    let Some(interval_seconds) = interval_seconds else {
        return Ok(rows.iter().skip(count).cloned().collect());
    };

    let interval_ms = interval_seconds as i64 * 1000;
    let mut per_bucket: BTreeMap<i64, usize> = BTreeMap::new();
    let mut superseded = Vec::new();
    for row in rows {
        let t = revision_time(info, row)?;
        let bucket = t - t.rem_euclid(interval_ms);
        let seen = per_bucket.entry(bucket).or_insert(0);
        *seen += 1;
        if *seen > count {
            superseded.push(row.clone());
        }
    }
    Ok(superseded)
}

/// Embedded time of a scanned revision's tid column.
fn revision_time(info: &SchemaInfo, row: &Row) -> Result<i64> {
    let value = row
        .iter()
        .find(|(name, _)| *name == info.tid)
        .map(|(_, v)| v);
    match value {
        Some(SqlValue::Text(sortable)) => {
            let canonical = timeuuid::from_sortable(sortable)
                .map_err(|e| StorageError::Codec(e.into()))?;
            timeuuid::unix_millis(&canonical).map_err(|e| StorageError::Codec(e.into()))
        }
        _ => Err(StorageError::Internal(
            "revision scan is missing the tid column".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use slate_core::validation::validate_and_normalize;

    fn test_info() -> SchemaInfo {
        let schema = serde_json::from_value(json!({
            "table": "t",
            "attributes": {"key": "string", "tid": "timeuuid"},
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ]
        }))
        .unwrap();
        SchemaInfo::derive(validate_and_normalize(schema).unwrap()).unwrap()
    }

    /// A sortable tid with a chosen wall-clock time.
    fn tid_at(ms: i64) -> String {
        let ts = uuid::Timestamp::from_unix(
            uuid::Context::new(0),
            (ms / 1000) as u64,
            ((ms % 1000) * 1_000_000) as u32,
        );
        let canonical = uuid::Uuid::new_v1(ts, &[0; 6]).hyphenated().to_string();
        timeuuid::to_sortable(&canonical).unwrap()
    }

    fn row(key: &str, tid: String) -> Row {
        vec![
            ("key".into(), SqlValue::Text(key.into())),
            ("tid".into(), SqlValue::Text(tid)),
        ]
    }

    #[test]
    fn latest_skips_the_newest_count() {
        let info = test_info();
        // Newest first, as the scan returns them.
        let rows: Vec<Row> = (0..5)
            .map(|i| row("k", tid_at(100_000 - i * 1000)))
            .collect();

        let superseded = select_superseded(&info, &rows, 2, None).unwrap();
        assert_eq!(superseded.len(), 3);
        assert_eq!(superseded[0], rows[2]);
    }

    #[test]
    fn interval_buckets_keep_newest_per_bucket() {
        let info = test_info();
        // Two 60s buckets: three revisions in [120000, 180000), two in
        // [60000, 120000). Newest first.
        let rows: Vec<Row> = vec![
            row("k", tid_at(170_000)),
            row("k", tid_at(150_000)),
            row("k", tid_at(130_000)),
            row("k", tid_at(110_000)),
            row("k", tid_at(70_000)),
        ];

        let superseded = select_superseded(&info, &rows, 1, Some(60)).unwrap();
        // Per bucket only the newest survives: 150000 and 130000 go, 70000
        // goes; 170000 and 110000 stay.
        assert_eq!(superseded.len(), 3);
        assert_eq!(superseded[0], rows[1]);
        assert_eq!(superseded[1], rows[2]);
        assert_eq!(superseded[2], rows[4]);
    }

    #[test]
    fn all_policy_is_a_no_op_selection() {
        let info = test_info();
        let rows: Vec<Row> = (0..3).map(|i| row("k", tid_at(50_000 - i * 1000))).collect();
        let superseded = select_superseded(&info, &rows, 3, None).unwrap();
        assert!(superseded.is_empty());
    }
}
