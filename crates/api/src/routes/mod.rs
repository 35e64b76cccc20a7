//! HTTP handlers.

pub mod orders;
pub mod system;
