//! Small synchronization primitives the core builds on.
//!
//! # Design Decisions
//! - `WaitGroup` tracks in-flight callback tasks so close can drain them
//! - `Group` serializes per-key work (upstream dials, cache misses)
//! - Both are crate-internal; public behavior is specified by their users

pub(crate) mod single_flight;
pub(crate) mod wait_group;
