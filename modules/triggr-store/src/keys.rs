//! On-disk key layout and record codec.
//!
//! Key families, all `/`-separated and binary-lexicographically ordered:
//!
//! ```text
//! proj/<project_id>                      Project record
//! tkey/<project_id>/<trigger_id>         Trigger record
//! coll/<project_id>/<collection>/meta    CollectionMeta
//! doc/<project_id>/<collection>/<doc_id> Document record
//! ```
//!
//! Record payloads are a single format-version byte followed by JSON.
//! Unknown version bytes are reserved for future formats and surface as
//! storage errors naming the offending key family.

use serde::de::DeserializeOwned;
use serde::Serialize;

use triggr_common::{ProjectId, Result, TriggrError};

/// Current record format version.
pub const RECORD_VERSION: u8 = 1;

pub fn project_key(project: ProjectId) -> Vec<u8> {
    format!("proj/{project}").into_bytes()
}

pub const PROJECT_PREFIX: &[u8] = b"proj/";

pub fn trigger_key(project: ProjectId, trigger_id: &str) -> Vec<u8> {
    format!("tkey/{project}/{trigger_id}").into_bytes()
}

pub fn trigger_prefix(project: ProjectId) -> Vec<u8> {
    format!("tkey/{project}/").into_bytes()
}

pub fn collection_meta_key(project: ProjectId, collection: &str) -> Vec<u8> {
    format!("coll/{project}/{collection}/meta").into_bytes()
}

pub fn collection_prefix(project: ProjectId) -> Vec<u8> {
    format!("coll/{project}/").into_bytes()
}

pub fn doc_key(project: ProjectId, collection: &str, doc_id: &str) -> Vec<u8> {
    format!("doc/{project}/{collection}/{doc_id}").into_bytes()
}

pub fn doc_prefix(project: ProjectId, collection: &str) -> Vec<u8> {
    format!("doc/{project}/{collection}/").into_bytes()
}

/// Prefix covering every document in every collection of a project.
pub fn doc_prefix_all(project: ProjectId) -> Vec<u8> {
    format!("doc/{project}/").into_bytes()
}

pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let mut out = vec![RECORD_VERSION];
    let json =
        serde_json::to_vec(record).map_err(|e| TriggrError::Storage(format!("encode: {e}")))?;
    out.extend_from_slice(&json);
    Ok(out)
}

pub fn decode_record<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T> {
    match bytes.split_first() {
        Some((&RECORD_VERSION, json)) => serde_json::from_slice(json)
            .map_err(|e| TriggrError::Storage(format!("decode {what}: {e}"))),
        Some((version, _)) => Err(TriggrError::Storage(format!(
            "decode {what}: unknown record version {version}"
        ))),
        None => Err(TriggrError::Storage(format!("decode {what}: empty record"))),
    }
}
