//! Hook phases
//!
//! Each lifecycle callback is a variant of [`Hook`] carrying exactly the
//! data its phase sees. The pipeline dispatches a hook to a plugin by
//! matching on the variant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::key::{CreateKeyInput, KeyRecord, VerifyInput};

/// Lifecycle phase a hook belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    Setup,
    BeforeCreateKey,
    OnKeyCreated,
    BeforeVerify,
    OnKeyRecordLoaded,
    OnVerifySuccess,
}

impl HookPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::BeforeCreateKey => "before_create_key",
            Self::OnKeyCreated => "on_key_created",
            Self::BeforeVerify => "before_verify",
            Self::OnKeyRecordLoaded => "on_key_record_loaded",
            Self::OnVerifySuccess => "on_verify_success",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook invocation and its arguments
#[derive(Debug, Clone, Copy)]
pub enum Hook<'a> {
    BeforeCreateKey(&'a CreateKeyInput),
    OnKeyCreated(&'a KeyRecord),
    BeforeVerify(&'a VerifyInput),
    OnKeyRecordLoaded {
        input: &'a VerifyInput,
        record: &'a KeyRecord,
    },
    OnVerifySuccess {
        input: &'a VerifyInput,
        record: &'a KeyRecord,
    },
}

impl Hook<'_> {
    pub fn phase(&self) -> HookPhase {
        match self {
            Self::BeforeCreateKey(_) => HookPhase::BeforeCreateKey,
            Self::OnKeyCreated(_) => HookPhase::OnKeyCreated,
            Self::BeforeVerify(_) => HookPhase::BeforeVerify,
            Self::OnKeyRecordLoaded { .. } => HookPhase::OnKeyRecordLoaded,
            Self::OnVerifySuccess { .. } => HookPhase::OnVerifySuccess,
        }
    }
}
