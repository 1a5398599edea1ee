//! Storage layer: the sled adapter, the on-disk key layout, and the document
//! store. The sled database is owned here; every other module reaches disk
//! through these APIs.

pub mod change;
pub mod docs;
pub mod keys;
pub mod kv;

pub use change::{ChangeOp, ChangeRecord, ChangeSink, CollectingSink, NullSink};
pub use docs::{CollectionMeta, DocMeta, Document, DocumentStore};
pub use kv::{BatchOp, KvEngine};
