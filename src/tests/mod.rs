//! tests/mod.rs
//!
//! End-to-end scenario tests wiring C2/C3/C5/C6 together without a live
//! Postgres instance: cross-component coverage that doesn't belong in any
//! single module's `#[cfg(test)]` block.

mod reconciliation;
mod stream_consumer;
