//! Core cache engine
//!
//! Leaves first: normalization, domain classification, the embedding LRU,
//! scoring, and per-tenant state; `engine` wires them into the query
//! pipeline behind the collaborator traits in `providers`.

pub mod context;
pub mod domain;
pub mod embedding_cache;
pub mod engine;
pub mod models;
pub mod normalize;
pub mod providers;
pub mod scoring;
pub mod tenant;
pub mod types;
