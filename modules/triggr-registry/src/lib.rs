//! Contract registry: projects (with their parsed event schemas and API-key
//! digests) and trigger records. Descriptor parsing happens once at upload
//! time; at runtime the router and ingester only ever see the typed schema.

pub mod descriptor;
pub mod projects;
pub mod triggers;

pub use descriptor::{parse_descriptor, ContractDescriptor, EventDecl, ScalarType};
pub use projects::{Project, ProjectRegistry};
pub use triggers::{TriggerRecord, TriggerRegistry};
