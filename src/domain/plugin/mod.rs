//! Plugin domain module
//!
//! Types and traits for the policy hook pipeline.
//!
//! ## Overview
//!
//! Plugins hook into key creation and verification at fixed phases:
//! - `setup` - once, while the service is built
//! - `before_create_key` / `on_key_created`
//! - `before_verify` / `on_key_record_loaded` / `on_verify_success`
//!
//! Any hook may reject, which stops the pipeline and the calling operation.
//! Plugins can also contribute named capabilities to the service.

mod capability;
mod decision;
mod entity;
mod error;
mod hook;

pub use capability::{Capability, CapabilityRegistry};
pub use decision::{PolicyDecision, Rejection};
pub use entity::{HookResult, Plugin};
pub use error::PluginError;
pub use hook::{Hook, HookPhase};
