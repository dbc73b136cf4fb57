pub mod backoff;
pub mod engine;
pub mod folders;
pub mod local_scan;
pub mod paths;
pub mod reconcile;
pub mod remote;
pub mod remote_scan;
pub mod transfer;

#[cfg(test)]
pub(crate) mod memory_store;

pub use engine::{EngineError, EngineSettings, SyncEngine, SyncPhase, SyncReport};
