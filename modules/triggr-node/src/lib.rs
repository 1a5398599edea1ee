//! Node internals: trigger router, pub/sub bus, and the HTTP/WS gateway.
//! The `triggr` binary wires these together; integration tests drive them
//! directly.

pub mod gateway;
pub mod pubsub;
pub mod router;

pub use gateway::{build_router, AppState};
pub use pubsub::{PubSub, PubSubSink, Subscriber, WsPayload};
pub use router::TriggerRouter;
