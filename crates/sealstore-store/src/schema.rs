//! Relational schema.
//!
//! `reference_table` is a content-addressed shadow of the payload column:
//! `encrypted_records.encrypted_payload` stores the blob directly and the
//! reference rows exist only for garbage-collection bookkeeping. Operators
//! expecting store-by-reference semantics should note the divergence.

use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS encrypted_records (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    encrypted_index  BLOB NOT NULL,
    encrypted_payload BLOB NOT NULL,
    created_at       TIMESTAMP NOT NULL,
    updated_at       TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_encrypted_records_index
    ON encrypted_records (encrypted_index);

CREATE TABLE IF NOT EXISTS reference_table (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    hash_value     VARCHAR(64) NOT NULL UNIQUE,
    encrypted_data BLOB NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_reference_table_hash
    ON reference_table (hash_value);

CREATE TABLE IF NOT EXISTS range_query_indices (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id     INTEGER NOT NULL REFERENCES encrypted_records (id),
    bit_position  INTEGER NOT NULL,
    encrypted_bit BLOB NOT NULL,
    UNIQUE (record_id, bit_position)
);
CREATE INDEX IF NOT EXISTS idx_range_query_indices_record
    ON range_query_indices (record_id);
"#;

/// Create the tables and indices if they do not exist.
pub fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly_and_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            tables,
            vec!["encrypted_records", "range_query_indices", "reference_table"]
        );
    }

    #[test]
    fn reference_hash_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        conn.execute(
            "INSERT INTO reference_table (hash_value, encrypted_data) VALUES ('abc', x'01')",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO reference_table (hash_value, encrypted_data) VALUES ('abc', x'02')",
            [],
        );
        assert!(dup.is_err());
    }
}
