use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use triggr_common::{ProjectId, Value};

/// A contract event decoded against a project's schema, ready for the
/// trigger router. Transient: never persisted, lost on restart by design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedEvent {
    pub project: ProjectId,
    pub name: String,
    pub fields: BTreeMap<String, Value>,
    pub block_number: u64,
    pub extrinsic_index: u32,
}
