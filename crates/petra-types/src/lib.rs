//! Shared types for the Petra net compiler.
//!
//! This crate defines the net model (places, transitions, edges, nets,
//! projects), value types, model expressions, match plans and the structured
//! errors used across all compiler stages.

mod error;
mod expr;
mod model;
mod origin;
mod plan;
mod ty;

pub use error::{CompileErrors, ErrorCategory, ErrorCode, ModelError, Severity, MAX_ERRORS};
pub use expr::{BinaryOp, Expr, UnaryOp};
pub use model::{
    Addressing, Area, Direction, Edge, EdgeKind, FunctionParam, Interface, LookupError, Net,
    Parameter, Place, Project, Transition, UserFunction,
};
pub use origin::Origin;
pub use plan::{Access, EdgeMatch, Instruction, MatchPlan, PlanTable};
pub use ty::{ExternCode, ExternType, Field, TransportMode, Type};

/// Result type used throughout the Petra compiler.
pub type Result<T> = std::result::Result<T, ModelError>;
