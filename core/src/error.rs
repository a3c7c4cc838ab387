//! Structured error surface (`spec.md` §7).
//!
//! Every variant carries the offending entity's name and a human-readable
//! message so the CLI can print `<entity>: <message>` without re-deriving
//! context, and so tests can match on variants without parsing strings.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum FwError {
    #[error("{entity}: {message}")]
    BadData { entity: String, message: String },

    #[error("{entity}: {message}")]
    BadRule { entity: String, message: String },

    #[error("{hostname}: no reachable management address")]
    MissingManagement { hostname: String },

    #[error("{host}: interface {iface} address mismatch (model says {expected}, live is {got})")]
    InterfaceMismatch {
        host: String,
        iface: String,
        expected: String,
        got: String,
    },

    #[error("configuration must be saved before {operation}")]
    SaveRequired { operation: &'static str },

    #[error("{host}: operation timed out")]
    Timeout { host: String },

    #[error("{host}: failed to apply configuration: {message}")]
    ApplyFailed { host: String, message: String },

    #[error("{host}: unreachable")]
    Unreachable { host: String },
}

impl FwError {
    pub fn bad_data(entity: impl Into<String>, message: impl fmt::Display) -> Self {
        FwError::BadData {
            entity: entity.into(),
            message: message.to_string(),
        }
    }

    pub fn bad_rule(entity: impl Into<String>, message: impl fmt::Display) -> Self {
        FwError::BadRule {
            entity: entity.into(),
            message: message.to_string(),
        }
    }

    pub fn entity(&self) -> &str {
        match self {
            FwError::BadData { entity, .. } | FwError::BadRule { entity, .. } => entity,
            FwError::MissingManagement { hostname } => hostname,
            FwError::InterfaceMismatch { host, .. } => host,
            FwError::SaveRequired { .. } => "",
            FwError::Timeout { host }
            | FwError::ApplyFailed { host, .. }
            | FwError::Unreachable { host } => host,
        }
    }
}

/// Adapted from the teacher's `anyhow-ext` crate: lets callers ask whether a
/// chain of `anyhow::Context` ultimately wraps a specific error kind,
/// without forcing every call site to downcast by hand.
pub trait ErrorExt {
    fn any_is<T>(&self) -> bool
    where
        T: std::error::Error + Send + Sync + 'static;
}

impl ErrorExt for anyhow::Error {
    fn any_is<T>(&self) -> bool
    where
        T: std::error::Error + Send + Sync + 'static,
    {
        self.chain().any(|e| e.is::<T>())
    }
}
