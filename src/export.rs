//! JSON import and export of records.
//!
//! The interchange format is an array of objects with optional encrypted
//! fields. When both `encrypted_index` and `encrypted_payload` are present
//! an import inserts them verbatim; otherwise `(index_value, data)` are
//! re-encrypted under the importing instance's keys.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sealstore_store::NewRecord;

use crate::db::SecureDb;
use crate::error::Result;

/// One record in the interchange format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_value: Option<u64>,
    pub data: String,
    /// Base64 of the compressed BFV index ciphertext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_index: Option<String>,
    /// Base64 of the sealed payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_payload: Option<String>,
}

impl SecureDb {
    /// Decrypt every record into the interchange format. With
    /// `include_encrypted`, the raw ciphertexts ride along base64-encoded.
    pub fn export_records(&self, include_encrypted: bool) -> Result<Vec<ExportedRecord>> {
        let records = self.store().get_all()?;
        let mut exported = Vec::with_capacity(records.len());
        for record in records {
            let data = self.open_payload(&record.encrypted_payload)?;
            exported.push(ExportedRecord {
                id: Some(record.id),
                index_value: None,
                data,
                encrypted_index: include_encrypted
                    .then(|| Base64::encode_string(&record.encrypted_index)),
                encrypted_payload: include_encrypted
                    .then(|| Base64::encode_string(&record.encrypted_payload)),
            });
        }
        Ok(exported)
    }

    /// Export all records to a JSON file; returns how many were written.
    pub fn export_data(&self, output: &Path, include_encrypted: bool) -> Result<usize> {
        let records = self.export_records(include_encrypted)?;
        let file = File::create(output)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &records)?;
        info!(count = records.len(), output = %output.display(), "records exported");
        Ok(records.len())
    }

    /// Insert records from the interchange format; returns how many were
    /// imported. Records carrying both encrypted fields are inserted
    /// verbatim; records with an `index_value` are re-encrypted; anything
    /// else is skipped.
    pub fn import_records(
        &self,
        records: &[ExportedRecord],
        enable_range_query: bool,
    ) -> Result<usize> {
        let mut imported = 0usize;
        let mut skipped = 0usize;
        for record in records {
            match (&record.encrypted_index, &record.encrypted_payload) {
                (Some(index_b64), Some(payload_b64)) => {
                    let (Ok(encrypted_index), Ok(encrypted_payload)) =
                        (Base64::decode_vec(index_b64), Base64::decode_vec(payload_b64))
                    else {
                        skipped += 1;
                        continue;
                    };
                    // Verbatim ciphertexts cannot carry range-bit rows.
                    self.store().add(NewRecord {
                        encrypted_index,
                        encrypted_payload,
                        encrypted_bits: None,
                    })?;
                    imported += 1;
                }
                _ => match record.index_value {
                    Some(index_value) => {
                        self.add_record(index_value, &record.data, enable_range_query)?;
                        imported += 1;
                    }
                    None => skipped += 1,
                },
            }
        }
        if skipped > 0 {
            warn!(skipped, "records without usable fields were skipped");
        }
        Ok(imported)
    }

    /// Import records from a JSON file; returns how many were inserted.
    pub fn import_data(&self, input: &Path, enable_range_query: bool) -> Result<usize> {
        let file = File::open(input)?;
        let records: Vec<ExportedRecord> = serde_json::from_reader(BufReader::new(file))?;
        let imported = self.import_records(&records, enable_range_query)?;
        info!(imported, input = %input.display(), "records imported");
        Ok(imported)
    }
}
