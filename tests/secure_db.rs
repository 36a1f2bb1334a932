//! End-to-end scenarios over the full stack: vault, sealer, homomorphic
//! index, store.
//!
//! Tests run with degree 2048 and a narrow range width so key generation
//! and the bit comparator stay fast; the ignored test at the bottom
//! exercises the default production parameters.

use std::sync::Arc;

use tempfile::TempDir;

use sealstore::{KeyPolicy, SecureDb, SecureDbConfig};

const PASSWORD: &str = "correct horse battery staple";

fn test_config(dir: &TempDir) -> SecureDbConfig {
    let mut config = SecureDbConfig::new(dir.path().join("records.db"), dir.path().join("keys"));
    config.fhe.degree = 2048;
    config.fhe.range_bits = 4;
    config
}

fn open_fresh(dir: &TempDir) -> SecureDb {
    SecureDb::open(test_config(dir), KeyPolicy::Generate { password: PASSWORD }).unwrap()
}

#[test]
fn round_trip_insert_and_equality_search() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    let id = db.add_record(42, "hello", false).unwrap();
    assert_eq!(db.get_record(id).unwrap().as_deref(), Some("hello"));

    let hits = db.search_by_index(42).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    assert_eq!(hits[0].data, "hello");

    assert!(db.search_by_index(43).unwrap().is_empty());
}

#[test]
fn multi_value_equality_search_returns_each_record_once() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    let a = db.add_record(1, "one", false).unwrap();
    let b = db.add_record(2, "two", false).unwrap();
    db.add_record(3, "three", false).unwrap();

    let mut ids: Vec<i64> = db
        .search_by_indices(&[1, 2, 9])
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![a, b]);
}

#[test]
fn range_search_honours_bounds_and_open_ends() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    // Range width is 4 bits in the test config, so indices stay below 16.
    let rows = [(2u64, "a"), (5, "b"), (9, "c"), (14, "d")];
    for (index, data) in rows {
        db.add_record(index, data, true).unwrap();
    }

    let mid: Vec<String> = db
        .search_by_range(Some(4), Some(10))
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(mid, vec!["b", "c"]);

    let low: Vec<String> = db
        .search_by_range(None, Some(2))
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(low, vec!["a"]);

    let high: Vec<String> = db
        .search_by_range(Some(14), None)
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(high, vec!["d"]);
}

#[test]
fn records_without_range_support_are_excluded_from_range_results() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    db.add_record(5, "ranged", true).unwrap();
    db.add_record(6, "plain", false).unwrap();

    let hits = db.search_by_range(Some(0), Some(15)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].data, "ranged");
}

#[test]
fn duplicate_payloads_dedupe_to_one_reference() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    assert_eq!(db.store().reference_count().unwrap(), 0);
    let a = db.add_record(1, "same", false).unwrap();
    let b = db.add_record(2, "same", false).unwrap();
    assert_ne!(a, b);

    // Equal payloads seal to the identical blob, so the two inserts share
    // one reference row.
    assert_eq!(db.store().reference_count().unwrap(), 1);
    assert_eq!(db.get_record(a).unwrap().as_deref(), Some("same"));
    assert_eq!(db.get_record(b).unwrap().as_deref(), Some("same"));

    db.add_record(3, "different", false).unwrap();
    assert_eq!(db.store().reference_count().unwrap(), 2);
}

#[test]
fn verbatim_import_shares_the_reference_entry() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    db.add_record(1, "same", false).unwrap();
    let exported = db.export_records(true).unwrap();
    assert_eq!(db.store().reference_count().unwrap(), 1);

    // Re-importing the identical ciphertext must not create a second
    // reference row.
    db.import_records(&exported, false).unwrap();
    assert_eq!(db.store().reference_count().unwrap(), 1);

    let hits = db.search_by_index(1).unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn rotation_backs_up_old_keys_and_severs_old_records() {
    let dir = TempDir::new().unwrap();
    let mut db = open_fresh(&dir);

    let id = db.add_record(7, "x", false).unwrap();
    assert_eq!(db.search_by_index(7).unwrap().len(), 1);

    db.rotate_fhe_keys(PASSWORD).unwrap();

    // backups/ holds the timestamped pre-rotation keys.
    let backups: Vec<String> = std::fs::read_dir(dir.path().join("keys").join("backups"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(backups.iter().any(|n| n.starts_with("public.key_")));
    assert!(backups.iter().any(|n| n.starts_with("secret.key_")));

    // The payload is still readable (the AES key did not rotate), but the
    // homomorphic index no longer matches under the new keys: rotation
    // re-encryption is an operator task.
    assert_eq!(db.get_record(id).unwrap().as_deref(), Some("x"));
    match db.search_by_index(7) {
        Ok(hits) => assert!(hits.is_empty()),
        Err(_) => {} // garbage decryption may also surface as noise exhaustion
    }
}

#[test]
fn tampered_payload_fails_authentication() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);
    let config = test_config(&dir);

    let id = db.add_record(5, "secret", false).unwrap();

    // Flip one ciphertext byte behind the store's back.
    let conn = rusqlite::Connection::open(&config.db_path).unwrap();
    let mut payload: Vec<u8> = conn
        .query_row(
            "SELECT encrypted_payload FROM encrypted_records WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .unwrap();
    let last = payload.len() - 1;
    payload[last] ^= 0xff;
    conn.execute(
        "UPDATE encrypted_records SET encrypted_payload = ?1 WHERE id = ?2",
        rusqlite::params![payload, id],
    )
    .unwrap();
    drop(conn);

    // The record cache still holds the pre-tamper row; external mutations
    // are invisible to it.
    db.clear_caches();
    let err = db.get_record(id).unwrap_err();
    assert!(matches!(
        err,
        sealstore::Error::Crypto(sealstore::CryptoError::DecryptionFailed)
    ));
}

#[test]
fn backup_and_restore_recovers_all_records() {
    let dir = TempDir::new().unwrap();
    let mut db = open_fresh(&dir);

    let mut ids = Vec::new();
    for i in 0..5u64 {
        ids.push(db.add_record(i, &format!("record-{i}"), false).unwrap());
    }

    let external = dir.path().join("offsite");
    let archive = db.generate_backup(Some(&external)).unwrap();

    std::fs::remove_dir_all(dir.path().join("keys")).unwrap();
    db.restore_backup(&archive, PASSWORD).unwrap();

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(
            db.get_record(*id).unwrap().as_deref(),
            Some(format!("record-{i}").as_str())
        );
    }
}

#[test]
fn updates_and_predicate_mutations() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    let ids = db
        .add_records_batch(&[
            (1, "one".to_string(), false),
            (2, "two".to_string(), false),
            (2, "two-again".to_string(), false),
        ])
        .unwrap();
    assert_eq!(ids.len(), 3);

    assert!(db.update_record(ids[0], "uno").unwrap());
    assert_eq!(db.get_record(ids[0]).unwrap().as_deref(), Some("uno"));

    let touched = db.update_by_index(2, "dos").unwrap();
    assert_eq!(touched.len(), 2);
    assert_eq!(db.get_record(ids[1]).unwrap().as_deref(), Some("dos"));
    assert_eq!(db.get_record(ids[2]).unwrap().as_deref(), Some("dos"));

    let removed = db.delete_by_index(2).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(db.get_record(ids[1]).unwrap().is_none());
    assert_eq!(db.search_by_index(2).unwrap().len(), 0);
    assert_eq!(db.search_by_index(1).unwrap().len(), 1);
}

#[test]
fn batch_reads_preserve_order_and_mark_absent_ids() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    let a = db.add_record(1, "a", false).unwrap();
    let b = db.add_record(2, "b", false).unwrap();

    let fetched = db.get_records_batch(&[b, 9999, a]).unwrap();
    assert_eq!(fetched[0], (b, Some("b".to_string())));
    assert_eq!(fetched[1], (9999, None));
    assert_eq!(fetched[2], (a, Some("a".to_string())));
}

#[test]
fn export_import_round_trip_via_plaintext() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    db.add_record(10, "alpha", false).unwrap();
    db.add_record(11, "beta", false).unwrap();

    let path = dir.path().join("dump.json");
    assert_eq!(db.export_data(&path, false).unwrap(), 2);

    // A second instance over the same keys re-encrypts from plaintext.
    let dir2 = TempDir::new().unwrap();
    let mut config2 = test_config(&dir2);
    config2.keys_dir = dir.path().join("keys");
    let db2 = SecureDb::open(config2, KeyPolicy::Load { password: PASSWORD }).unwrap();

    let mut exported: Vec<sealstore::ExportedRecord> =
        serde_json::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
    for (record, index) in exported.iter_mut().zip([10u64, 11]) {
        record.index_value = Some(index);
    }
    assert_eq!(db2.import_records(&exported, false).unwrap(), 2);
    let hits = db2.search_by_index(10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].data, "alpha");
}

#[test]
fn encrypt_only_instance_can_insert_but_not_search() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);
    db.add_record(3, "writer", false).unwrap();
    drop(db);

    let reader = SecureDb::open(
        test_config(&dir),
        KeyPolicy::LoadEncryptOnly { password: PASSWORD },
    )
    .unwrap();
    assert!(reader.is_encrypt_only());

    // Inserts still work: encryption only needs the public key.
    let id = reader.add_record(4, "from encrypt-only", false).unwrap();
    // Payload decryption is symmetric and unaffected by the FHE mode.
    assert_eq!(
        reader.get_record(id).unwrap().as_deref(),
        Some("from encrypt-only")
    );
    // Predicate scans need the secret key.
    assert!(reader.search_by_index(3).is_err());
}

#[test]
fn cache_stats_reflect_activity() {
    let dir = TempDir::new().unwrap();
    let db = open_fresh(&dir);

    let id = db.add_record(1, "x", false).unwrap();
    db.get_record(id).unwrap();
    db.get_record(id).unwrap();

    let stats = db.get_cache_stats();
    assert!(stats.store.records.hits >= 2);
    assert_eq!(stats.store.records.capacity, 1000);

    db.search_by_index(1).unwrap();
    db.search_by_index(1).unwrap();
    let stats = db.get_cache_stats();
    assert!(stats.store.equality_queries.hits >= 1);

    db.clear_caches();
    let stats = db.get_cache_stats();
    assert_eq!(stats.store.records.hits, 0);
    assert_eq!(stats.store.equality_queries.hits, 0);
}

#[test]
fn concurrent_writers_and_readers_observe_their_writes() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(open_fresh(&dir));

    let mut handles = Vec::new();
    for thread in 0..4u64 {
        let db = Arc::clone(&db);
        handles.push(std::thread::spawn(move || {
            let mut ids = Vec::new();
            for i in 0..5u64 {
                let value = thread * 100 + i;
                let id = db
                    .add_record(value % 16, &format!("t{thread}-{i}"), false)
                    .unwrap();
                ids.push((id, format!("t{thread}-{i}")));
            }
            // Read-after-write by id is linearizable.
            for (id, expected) in &ids {
                assert_eq!(db.get_record(*id).unwrap().as_deref(), Some(expected.as_str()));
            }
            ids
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.join().unwrap().len();
    }
    assert_eq!(total, 20);

    // A write that returned is visible to any thread.
    let all: usize = (0..16u64)
        .map(|v| db.search_by_index(v).unwrap().len())
        .sum();
    assert_eq!(all, 20);
}

#[test]
#[ignore = "production parameters: degree 8192 keygen and a 32-wide comparator chain are expensive"]
fn full_width_range_scenario() {
    let dir = TempDir::new().unwrap();
    let config = SecureDbConfig::new(dir.path().join("records.db"), dir.path().join("keys"));
    let db = SecureDb::open(config, KeyPolicy::Generate { password: PASSWORD }).unwrap();

    for (index, data) in [(10u64, "a"), (20, "b"), (30, "c"), (40, "d")] {
        db.add_record(index, data, true).unwrap();
    }

    let mid: Vec<String> = db
        .search_by_range(Some(15), Some(35))
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(mid, vec!["b", "c"]);
    let low: Vec<String> = db
        .search_by_range(None, Some(10))
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(low, vec!["a"]);
    let high: Vec<String> = db
        .search_by_range(Some(40), None)
        .unwrap()
        .into_iter()
        .map(|r| r.data)
        .collect();
    assert_eq!(high, vec!["d"]);
}
