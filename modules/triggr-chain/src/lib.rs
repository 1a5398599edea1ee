//! Chain ingestion: one websocket subscription per registered contract,
//! SCALE decoding of emitted event payloads against the project schema, and
//! a bounded intake channel toward the trigger router.

pub mod ingest;
pub mod rpc;
pub mod scale;
pub mod types;

pub use ingest::{Ingester, IngestStatus};
pub use types::DecodedEvent;
