//! Storage layer: the per-tenant vector index and durable snapshots

pub mod snapshot;
pub mod vector;
