//! Plugin infrastructure
//!
//! The ordered hook pipeline run by the key service, and the plugins that
//! ship with the crate.

pub mod builtin;
mod pipeline;

pub use builtin::{RateLimitIdentity, RateLimitPlugin, ScopePlugin, UsageLimitPlugin};
pub use pipeline::PluginPipeline;
