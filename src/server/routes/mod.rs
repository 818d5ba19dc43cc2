//! HTTP route modules

pub mod cache;
pub mod chat;
pub mod health;
