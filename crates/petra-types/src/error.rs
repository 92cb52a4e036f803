use crate::Origin;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of errors reported before fail-fast.
pub const MAX_ERRORS: usize = 20;

/// Error severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Error category, determined by error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Type,
    Transport,
    Structure,
    Plan,
}

/// Numeric error code (E100–E499).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Type errors (E100–E199) ──
    pub const UNKNOWN_TYPE: Self = Self(100);
    pub const TYPE_MISMATCH: Self = Self(101);

    // ── Transport errors (E200–E299) ──
    pub const TRANSPORT_DISABLED: Self = Self(200);
    pub const CUSTOM_CODEC_MISSING: Self = Self(201);

    // ── Structure errors (E300–E399) ──
    pub const UNKNOWN_PLACE: Self = Self(300);
    pub const UNKNOWN_NET: Self = Self(301);
    pub const UNKNOWN_AREA: Self = Self(302);
    pub const INVALID_INTERFACE_EXPR: Self = Self(303);
    pub const MISSING_TARGET: Self = Self(304);
    pub const EDGE_DIRECTION: Self = Self(305);
    pub const PACKING_EXPR: Self = Self(306);
    pub const SUBNET_NOT_MODULE: Self = Self(307);
    pub const DUPLICATE_ID: Self = Self(308);

    // ── Plan errors (E400–E499) ──
    pub const PLAN_UNKNOWN_EDGE: Self = Self(400);
    pub const PLAN_EDGE_REPEATED: Self = Self(401);
    pub const PLAN_EDGE_UNMATCHED: Self = Self(402);
    pub const PLAN_INVALID_INSTRUCTION: Self = Self(403);
    pub const PLAN_INVALID_ACCESS: Self = Self(404);
    pub const UNRESOLVED_VARIABLE: Self = Self(405);

    /// Get the category for this error code.
    pub fn category(self) -> ErrorCategory {
        match self.0 {
            100..=199 => ErrorCategory::Type,
            200..=299 => ErrorCategory::Transport,
            300..=399 => ErrorCategory::Structure,
            400..=499 => ErrorCategory::Plan,
            _ => ErrorCategory::Structure, // fallback
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A structured model error.
///
/// Front ends render these; they must not parse free-form strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelError {
    /// Error code (e.g., E200).
    pub code: ErrorCode,
    /// Error severity.
    pub severity: Severity,
    /// Error category (derived from code).
    pub category: ErrorCategory,
    /// Human-readable error message.
    pub message: String,
    /// The offending model element, when one can be named.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// Optional fix suggestion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ModelError {
    /// Create a new error located at a model element.
    pub fn new(code: ErrorCode, message: impl Into<String>, origin: Origin) -> Self {
        Self {
            code,
            severity: Severity::Error,
            category: code.category(),
            message: message.into(),
            origin: Some(origin),
            suggestion: None,
        }
    }

    /// Create an error that concerns the project as a whole.
    pub fn unlocated(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            category: code.category(),
            message: message.into(),
            origin: None,
            suggestion: None,
        }
    }

    /// Attach a fix suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(
                f,
                "{}: {} [{}] {}",
                origin, self.code, self.category, self.message
            ),
            None => write!(f, "{} [{}] {}", self.code, self.category, self.message),
        }
    }
}

impl std::error::Error for ModelError {}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type => write!(f, "type"),
            Self::Transport => write!(f, "transport"),
            Self::Structure => write!(f, "structure"),
            Self::Plan => write!(f, "plan"),
        }
    }
}

/// The structured JSON output for validation results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileErrors {
    pub errors: Vec<ModelError>,
    pub warnings: Vec<ModelError>,
    pub total_errors: usize,
    pub total_warnings: usize,
}

impl CompileErrors {
    /// Create an empty result (no errors).
    pub fn empty() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            total_errors: 0,
            total_warnings: 0,
        }
    }

    /// Check if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Add an error, respecting the MAX_ERRORS limit.
    pub fn push_error(&mut self, error: ModelError) {
        if self.errors.len() < MAX_ERRORS {
            self.errors.push(error);
        }
        self.total_errors += 1;
    }

    /// Add a warning.
    pub fn push_warning(&mut self, warning: ModelError) {
        self.warnings.push(warning);
        self.total_warnings += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::UNKNOWN_TYPE.category(), ErrorCategory::Type);
        assert_eq!(
            ErrorCode::TRANSPORT_DISABLED.category(),
            ErrorCategory::Transport
        );
        assert_eq!(
            ErrorCode::INVALID_INTERFACE_EXPR.category(),
            ErrorCategory::Structure
        );
        assert_eq!(
            ErrorCode::PLAN_EDGE_UNMATCHED.category(),
            ErrorCategory::Plan
        );
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(format!("{}", ErrorCode::TRANSPORT_DISABLED), "E200");
        assert_eq!(format!("{}", ErrorCode::UNKNOWN_TYPE), "E100");
    }

    #[test]
    fn test_model_error_display_with_origin() {
        let err = ModelError::new(
            ErrorCode::TRANSPORT_DISABLED,
            "Transport of type 'Handle' is disabled",
            Origin::part(14, "expr"),
        );
        assert_eq!(
            err.to_string(),
            "*14/expr: E200 [transport] Transport of type 'Handle' is disabled"
        );
    }

    #[test]
    fn test_model_error_display_unlocated() {
        let err = ModelError::unlocated(ErrorCode::UNKNOWN_NET, "No nets in project");
        assert_eq!(err.to_string(), "E301 [structure] No nets in project");
    }

    #[test]
    fn test_model_error_with_suggestion() {
        let err = ModelError::new(
            ErrorCode::CUSTOM_CODEC_MISSING,
            "missing pack",
            Origin::element(2),
        )
        .with_suggestion("Provide getsize, pack and unpack bodies");
        assert_eq!(
            err.suggestion.as_deref(),
            Some("Provide getsize, pack and unpack bodies")
        );
    }

    #[test]
    fn test_model_error_json_serialization() {
        let err = ModelError::new(
            ErrorCode::UNKNOWN_TYPE,
            "Unknown type 'Matrix'",
            Origin::part(5, "type"),
        );
        let json = serde_json::to_string_pretty(&err).unwrap();
        assert!(json.contains("\"code\""));
        assert!(json.contains("\"category\": \"type\""));
        assert!(json.contains("\"origin\""));
        assert!(!json.contains("\"suggestion\""));

        let back: ModelError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code, err.code);
        assert_eq!(back.origin, err.origin);
    }

    #[test]
    fn test_compile_errors_max_limit() {
        let mut errs = CompileErrors::empty();
        for i in 0..25 {
            errs.push_error(ModelError::new(
                ErrorCode::UNKNOWN_PLACE,
                format!("Error {i}"),
                Origin::element(i),
            ));
        }
        assert_eq!(errs.errors.len(), 20);
        assert_eq!(errs.total_errors, 25);
        assert!(errs.has_errors());
    }

    #[test]
    fn test_compile_errors_empty() {
        let errs = CompileErrors::empty();
        assert!(!errs.has_errors());
        assert_eq!(errs.total_errors, 0);
        assert_eq!(errs.total_warnings, 0);
    }
}
