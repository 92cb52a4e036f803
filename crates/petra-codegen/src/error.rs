//! Codegen error types.

use petra_types::{ErrorCode, LookupError, ModelError, Origin};
use thiserror::Error;

/// Errors that can occur during C++ code generation.
///
/// All of them are fatal: generation stops at the first one.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// A type names an extern type the project does not declare.
    #[error("{origin}: unknown type '{name}'")]
    UnknownType { name: String, origin: Origin },

    /// A value of an extern type with disabled transport would cross a
    /// process boundary.
    #[error("{origin}: transport of type '{type_name}' is disabled")]
    TransportDisabled { type_name: String, origin: Origin },

    /// A custom-transport extern type lacks codec bodies.
    #[error("{origin}: extern type '{type_name}' uses custom transport but has no {} code", .missing.join("/"))]
    CustomCodecMissing {
        type_name: String,
        missing: Vec<&'static str>,
        origin: Origin,
    },

    /// A module interface edge that is not a plain variable or a packing
    /// variable.
    #[error("{origin}: invalid interface expression: {message}")]
    InvalidInterface { message: String, origin: Origin },

    /// The match plan does not fit the transition it belongs to.
    #[error("{origin}: invalid match plan: {message}")]
    InvalidPlan { message: String, origin: Origin },

    /// An expression reads a variable no binding provides.
    #[error("{origin}: unresolved variable '{name}'")]
    UnresolvedVariable { name: String, origin: Origin },

    /// An expression that cannot be emitted (unknown function, untyped
    /// literal, bad projection).
    #[error("{origin}: {message}")]
    InvalidExpression { message: String, origin: Origin },

    /// A model reference could not be resolved.
    #[error("{0}")]
    Lookup(#[from] LookupError),

    /// An internal consistency check failed.
    #[error("internal codegen error: {0}")]
    Internal(String),
}

impl CodegenError {
    /// The structured error code front ends report.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownType { .. } => ErrorCode::UNKNOWN_TYPE,
            Self::TransportDisabled { .. } => ErrorCode::TRANSPORT_DISABLED,
            Self::CustomCodecMissing { .. } => ErrorCode::CUSTOM_CODEC_MISSING,
            Self::InvalidInterface { .. } => ErrorCode::INVALID_INTERFACE_EXPR,
            Self::InvalidPlan { .. } => ErrorCode::PLAN_INVALID_INSTRUCTION,
            Self::UnresolvedVariable { .. } => ErrorCode::UNRESOLVED_VARIABLE,
            Self::InvalidExpression { .. } => ErrorCode::TYPE_MISMATCH,
            Self::Lookup(LookupError::UnknownNet(_)) => ErrorCode::UNKNOWN_NET,
            Self::Lookup(LookupError::UnknownExternType(_)) => ErrorCode::UNKNOWN_TYPE,
            Self::Lookup(LookupError::UnknownArea(_)) => ErrorCode::UNKNOWN_AREA,
            Self::Lookup(LookupError::UnknownPlace(_) | LookupError::UnknownTransition(_)) => {
                ErrorCode::UNKNOWN_PLACE
            }
            Self::Internal(_) => ErrorCode::PLAN_INVALID_INSTRUCTION,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        match self {
            Self::UnknownType { origin, .. }
            | Self::TransportDisabled { origin, .. }
            | Self::CustomCodecMissing { origin, .. }
            | Self::InvalidInterface { origin, .. }
            | Self::InvalidPlan { origin, .. }
            | Self::UnresolvedVariable { origin, .. }
            | Self::InvalidExpression { origin, .. } => Some(origin),
            Self::Lookup(_) | Self::Internal(_) => None,
        }
    }

    /// Convert into the structured form shared with the validator.
    pub fn to_model_error(&self) -> ModelError {
        let message = match self {
            // Drop the origin prefix; ModelError carries it separately.
            Self::UnknownType { name, .. } => format!("unknown type '{name}'"),
            Self::TransportDisabled { type_name, .. } => {
                format!("transport of type '{type_name}' is disabled")
            }
            Self::CustomCodecMissing {
                type_name, missing, ..
            } => format!(
                "extern type '{type_name}' uses custom transport but has no {} code",
                missing.join("/")
            ),
            Self::InvalidInterface { message, .. } => {
                format!("invalid interface expression: {message}")
            }
            Self::InvalidPlan { message, .. } => format!("invalid match plan: {message}"),
            Self::UnresolvedVariable { name, .. } => format!("unresolved variable '{name}'"),
            Self::InvalidExpression { message, .. } => message.clone(),
            Self::Lookup(e) => e.to_string(),
            Self::Internal(m) => format!("internal codegen error: {m}"),
        };
        match self.origin() {
            Some(origin) => ModelError::new(self.code(), message, origin.clone()),
            None => ModelError::unlocated(self.code(), message),
        }
    }
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;
