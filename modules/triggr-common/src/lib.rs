//! Shared types for the Triggr node: configuration, the error taxonomy,
//! document values, and id newtypes. Every other module depends on this one
//! and nothing here depends on storage, the chain, or the web layer.

pub mod config;
pub mod error;
pub mod ids;
pub mod value;

pub use config::Config;
pub use error::{Result, TriggrError};
pub use ids::{valid_collection_name, valid_trigger_id, ProjectId, MAX_DSL_SOURCE_BYTES};
pub use value::Value;
