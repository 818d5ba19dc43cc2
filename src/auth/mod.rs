//! Authentication: bearer API keys and the key registry
//!
//! Tenant identity is derived purely from the key string
//! (`sc-<tenant>-<rest>`); the registry additionally validates activity and
//! does usage accounting, and its failures never fail a request.

pub mod api_key;
pub mod registry;

pub use api_key::{AuthedTenant, parse_bearer};
pub use registry::{FileKeyRegistry, KeyInfo, KeyRegistry, UsageRecord};
