//! Workspace facade crate.
//!
//! Re-exports the component crates under one name for integration tests
//! and downstream binaries. The actual implementations live in
//! `crates/aw-*`; this crate has no logic of its own.

pub use aw_capabilities as capabilities;
pub use aw_circuit_breaker as circuit_breaker;
pub use aw_context as context;
pub use aw_fanout as fanout;
pub use aw_peer_proxy as peer_proxy;
pub use aw_protocol as protocol;
pub use aw_storage as storage;
pub use aw_subscriptions as subscriptions;
pub use aw_trust as trust;
