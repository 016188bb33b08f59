//! The incremental indexing pipeline, leaves first: discovery, revision control,
//! version records, change detection, chunking and the orchestrator tying them
//! together.

pub mod change_detector;
pub mod chunking_strategy;
pub mod discovery;
pub mod orchestrator;
pub mod revision;
pub mod version_store;
