//! End-to-end scenarios against a real database.

use pretty_assertions::assert_eq;
use serde_json::json;

use slate_core::request::{DeleteRequest, GetRequest, PutRequest};
use slate_core::timeuuid;
use slate_core::types::TableSchema;
use slate_storage::{Db, StorageConfig};

fn schema(v: serde_json::Value) -> TableSchema {
    serde_json::from_value(v).unwrap()
}

fn get_req(v: serde_json::Value) -> GetRequest {
    serde_json::from_value(v).unwrap()
}

fn put_req(v: serde_json::Value) -> PutRequest {
    serde_json::from_value(v).unwrap()
}

fn simple_schema() -> TableSchema {
    schema(json!({
        "table": "simple",
        "attributes": {"key": "string", "tid": "timeuuid", "body": "blob"},
        "index": [
            {"attribute": "key", "type": "hash"},
            {"attribute": "tid", "type": "range", "order": "desc"}
        ]
    }))
}

/// Mints `n` timeuuids with strictly increasing embedded times.
fn mint_seq(n: usize) -> Vec<String> {
    let mut tids = Vec::with_capacity(n);
    for i in 0..n {
        if i > 0 {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        tids.push(timeuuid::mint());
    }
    tids
}

#[test]
fn create_put_get_round_trip() {
    let db = Db::open_in_memory().unwrap();
    assert_eq!(db.create_table("d", simple_schema()).status, 201);

    let t1 = timeuuid::mint();
    let put = put_req(json!({
        "table": "simple",
        "attributes": {"key": "k", "tid": t1, "body": "hello"}
    }));
    assert_eq!(db.put("d", &put).status, 201);

    let resp = db.get(
        "d",
        &get_req(json!({"table": "simple", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["count"], 1);
    let item = &resp.items().unwrap()[0];
    assert_eq!(item["key"], "k");
    assert_eq!(item["tid"], json!(t1));
    assert_eq!(item["body"], "hello");
    // Bookkeeping columns never leak.
    assert!(item.get("_exist_until").is_none());
}

#[test]
fn between_predicate_selects_the_enclosed_revision() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());

    let tids = mint_seq(3);
    let (t0, t1, t2) = (&tids[0], &tids[1], &tids[2]);
    for tid in [t1, t2] {
        let put = put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": tid, "body": "b"}
        }));
        assert_eq!(db.put("d", &put).status, 201);
    }

    let resp = db.get(
        "d",
        &get_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": {"between": [t0, t1]}},
            "limit": 3
        })),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body["count"], 1);
    assert_eq!(resp.items().unwrap()[0]["tid"], json!(t1.clone()));
}

#[test]
fn static_column_joins_onto_every_revision() {
    let db = Db::open_in_memory().unwrap();
    db.create_table(
        "d",
        schema(json!({
            "table": "pages",
            "attributes": {
                "key": "string", "tid": "timeuuid", "latestTid": "timeuuid"
            },
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "latestTid", "type": "static"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ]
        })),
    );

    let tids = mint_seq(2);
    let (t1, t2) = (&tids[0], &tids[1]);
    db.put(
        "d",
        &put_req(json!({
            "table": "pages",
            "attributes": {"key": "k", "tid": t1, "latestTid": t1}
        })),
    );
    db.put(
        "d",
        &put_req(json!({
            "table": "pages",
            "attributes": {"key": "k", "tid": t2}
        })),
    );

    let resp = db.get(
        "d",
        &get_req(json!({
            "table": "pages",
            "proj": ["key", "tid", "latestTid"],
            "attributes": {"key": "k"}
        })),
    );
    assert_eq!(resp.status, 200);
    let items = resp.items().unwrap();
    assert_eq!(items.len(), 2);
    for item in items {
        assert_eq!(item["latestTid"], json!(t1.clone()), "static value joins onto every row");
    }
}

#[test]
fn unsupported_migration_is_rejected() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());

    // Same attributes, but the tid range order flips: the key sequence
    // changes, which cannot be done in place.
    let proposed = schema(json!({
        "table": "simple",
        "attributes": {"key": "string", "tid": "timeuuid", "body": "blob"},
        "index": [
            {"attribute": "key", "type": "hash"},
            {"attribute": "tid", "type": "range", "order": "asc"}
        ],
        "version": 2
    }));
    let resp = db.create_table("d", proposed);
    assert_eq!(resp.status, 400);
    assert_eq!(resp.body["type"], "bad_request");

    // The stored schema is unchanged.
    let stored = db.get_table_schema("d", "simple");
    assert_eq!(stored.body["version"], 1);
}

#[test]
fn additive_migration_adds_a_nullable_column() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());

    let t1 = timeuuid::mint();
    db.put(
        "d",
        &put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": t1, "body": "old"}
        })),
    );

    let proposed = schema(json!({
        "table": "simple",
        "attributes": {
            "key": "string", "tid": "timeuuid", "body": "blob",
            "extra": "string"
        },
        "index": [
            {"attribute": "key", "type": "hash"},
            {"attribute": "tid", "type": "range", "order": "desc"}
        ],
        "version": 2
    }));
    assert_eq!(db.create_table("d", proposed).status, 201);

    let resp = db.get(
        "d",
        &get_req(json!({
            "table": "simple",
            "proj": ["extra"],
            "attributes": {"key": "k"}
        })),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(resp.items().unwrap()[0]["extra"], json!(null));

    let stored = db.get_table_schema("d", "simple");
    assert_eq!(stored.body["version"], 2);
}

#[test]
fn retention_latest_bounds_live_revisions() {
    let db = Db::open_in_memory().unwrap();
    db.create_table(
        "d",
        schema(json!({
            "table": "revs",
            "attributes": {"key": "string", "tid": "timeuuid", "body": "string"},
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ],
            "revisionRetentionPolicy": {"type": "latest", "count": 2, "grace_ttl": 0}
        })),
    );

    let tids = mint_seq(5);
    for (i, tid) in tids.iter().enumerate() {
        let put = put_req(json!({
            "table": "revs",
            "attributes": {"key": "k", "tid": tid, "body": format!("rev {i}")}
        }));
        assert_eq!(db.put("d", &put).status, 201);
    }

    let resp = db.get(
        "d",
        &get_req(json!({"table": "revs", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.status, 200);
    let items = resp.items().unwrap();
    assert_eq!(items.len(), 2, "only the newest two revisions stay live");
    // Newest first under the declared descending order.
    assert_eq!(items[0]["tid"], json!(tids[4].clone()));
    assert_eq!(items[1]["tid"], json!(tids[3].clone()));
}

#[test]
fn retention_latest_hash_hard_deletes_superseded_rows() {
    let db = Db::open_in_memory().unwrap();
    db.create_table(
        "d",
        schema(json!({
            "table": "revs",
            "attributes": {"key": "string", "tid": "timeuuid"},
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ],
            "revisionRetentionPolicy": {"type": "latest_hash", "count": 1, "grace_ttl": 0}
        })),
    );

    for tid in mint_seq(3) {
        db.put(
            "d",
            &put_req(json!({
                "table": "revs",
                "attributes": {"key": "k", "tid": tid}
            })),
        );
    }

    let resp = db.get(
        "d",
        &get_req(json!({"table": "revs", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.body["count"], 1);
}

#[test]
fn missing_table_reads_as_empty() {
    let db = Db::open_in_memory().unwrap();
    let resp = db.get(
        "d",
        &get_req(json!({"table": "unknown", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.status, 404);
    assert_eq!(resp.body["count"], 0);
    assert_eq!(resp.items().unwrap().len(), 0);
}

#[test]
fn concurrent_writers_upsert_one_row() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());
    let tid = timeuuid::mint();

    std::thread::scope(|s| {
        for body in ["from thread one", "from thread two"] {
            let db = &db;
            let tid = tid.clone();
            s.spawn(move || {
                let put = put_req(json!({
                    "table": "simple",
                    "attributes": {"key": "k", "tid": tid, "body": body}
                }));
                assert_eq!(db.put("d", &put).status, 201);
            });
        }
    });

    let resp = db.get(
        "d",
        &get_req(json!({"table": "simple", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.body["count"], 1, "identical primary keys collapse to one row");
    let body = resp.items().unwrap()[0]["body"].as_str().unwrap().to_owned();
    assert!(body.starts_with("from thread"));
}

#[test]
fn secondary_index_routes_reads() {
    let db = Db::open_in_memory().unwrap();
    db.create_table(
        "d",
        schema(json!({
            "table": "posts",
            "attributes": {
                "key": "string", "tid": "timeuuid",
                "author": "string", "title": "string"
            },
            "index": [
                {"attribute": "key", "type": "hash"},
                {"attribute": "tid", "type": "range", "order": "desc"}
            ],
            "secondaryIndexes": {
                "by_author": [
                    {"attribute": "author", "type": "hash"},
                    {"attribute": "title", "type": "proj"}
                ]
            }
        })),
    );

    for (key, author, title) in [
        ("p1", "alice", "one"),
        ("p2", "alice", "two"),
        ("p3", "bob", "three"),
    ] {
        db.put(
            "d",
            &put_req(json!({
                "table": "posts",
                "attributes": {
                    "key": key, "author": author, "title": title
                }
            })),
        );
    }

    let resp = db.get(
        "d",
        &get_req(json!({
            "table": "posts",
            "index": "by_author",
            "attributes": {"author": "alice"}
        })),
    );
    assert_eq!(resp.status, 200);
    let items = resp.items().unwrap();
    assert_eq!(items.len(), 2);
    for item in items {
        assert_eq!(item["author"], "alice");
        assert!(item.get("title").is_some(), "projected column is returned");
    }
}

#[test]
fn ttl_write_is_invisible_after_expiry() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());

    let tids = mint_seq(2);
    db.put(
        "d",
        &put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": tids[0], "body": "expired", "_ttl": 0}
        })),
    );
    db.put(
        "d",
        &put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": tids[1], "body": "alive", "_ttl": 3600}
        })),
    );

    std::thread::sleep(std::time::Duration::from_millis(5));
    let resp = db.get(
        "d",
        &get_req(json!({"table": "simple", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.body["count"], 1);
    assert_eq!(resp.items().unwrap()[0]["body"], "alive");
}

#[test]
fn put_if_not_exists_keeps_the_existing_row() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());
    let tid = timeuuid::mint();

    db.put(
        "d",
        &put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": tid, "body": "original"}
        })),
    );
    // Conditional put against the same primary key: 201, but no overwrite.
    let resp = db.put(
        "d",
        &put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": tid, "body": "intruder"},
            "if": "not exists"
        })),
    );
    assert_eq!(resp.status, 201);

    let resp = db.get(
        "d",
        &get_req(json!({"table": "simple", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.items().unwrap()[0]["body"], "original");
}

#[test]
fn delete_then_drop_are_idempotent() {
    let db = Db::open_in_memory().unwrap();
    db.create_table("d", simple_schema());
    let tid = timeuuid::mint();
    db.put(
        "d",
        &put_req(json!({
            "table": "simple",
            "attributes": {"key": "k", "tid": tid, "body": "b"}
        })),
    );

    let del: DeleteRequest = serde_json::from_value(json!({
        "table": "simple",
        "attributes": {"key": "k"}
    }))
    .unwrap();
    assert_eq!(db.delete("d", &del).status, 204);
    let resp = db.get(
        "d",
        &get_req(json!({"table": "simple", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.status, 404);

    assert_eq!(db.drop_table("d", "simple").status, 204);
    assert_eq!(db.drop_table("d", "simple").status, 204, "second drop succeeds");
    assert_eq!(db.get_table_schema("d", "simple").status, 404);
}

#[test]
fn file_backed_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        dbname: dir.path().join("slate.db").to_string_lossy().into_owned(),
        ..StorageConfig::default()
    };
    let tid = timeuuid::mint();

    {
        let db = Db::open(config.clone()).unwrap();
        db.create_table("d", simple_schema());
        db.put(
            "d",
            &put_req(json!({
                "table": "simple",
                "attributes": {"key": "k", "tid": tid, "body": "persisted"}
            })),
        );
    }

    let db = Db::open(config).unwrap();
    let resp = db.get(
        "d",
        &get_req(json!({"table": "simple", "attributes": {"key": "k"}})),
    );
    assert_eq!(resp.status, 200);
    assert_eq!(resp.items().unwrap()[0]["body"], "persisted");
}
