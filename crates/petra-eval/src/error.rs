//! Runtime error types for the Petra reference evaluator.

use std::fmt;

use petra_types::LookupError;

/// Evaluation error: expression traps, transport failures, broken plans and
/// faults the generated program would abort on.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Division by zero, integer overflow
    ArithmeticTrap(String),
    /// Unknown context variable
    UndefinedVariable(String),
    /// Unknown project parameter
    UndefinedParameter(String),
    /// Call to a function nobody registered
    UnknownFunction(String),
    /// Operand or token of the wrong shape
    TypeMismatch(String),
    /// Value of a disabled-transport extern type crossing a process boundary
    TransportDisabled(String),
    /// Malformed or truncated wire data
    Decode(String),
    /// Match plan that does not fit its transition
    InvalidPlan(String),
    /// Module finished without a token in a required output place
    ModuleOutputMissing(String),
    /// Unknown net, place, transition or area
    Lookup(LookupError),
    /// Project without a net to start from
    EmptyProject,
    /// Unknown net instance
    UnknownInstance(u32),
    /// Process index beyond the configured process count
    UnknownProcess(usize),
    /// Inbound message for a place index the net does not have
    InvalidPlaceIndex(usize),
    /// Failure raised by registered user code
    UserCode(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArithmeticTrap(msg) => write!(f, "arithmetic trap: {msg}"),
            Self::UndefinedVariable(name) => write!(f, "undefined variable: {name}"),
            Self::UndefinedParameter(name) => write!(f, "undefined parameter: {name}"),
            Self::UnknownFunction(name) => write!(f, "unknown function: {name}"),
            Self::TypeMismatch(msg) => write!(f, "type mismatch: {msg}"),
            Self::TransportDisabled(name) => write!(f, "transport of type '{name}' is disabled"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::InvalidPlan(msg) => write!(f, "invalid match plan: {msg}"),
            Self::ModuleOutputMissing(module) => {
                write!(f, "Token in output places of module {module} not found")
            }
            Self::Lookup(err) => write!(f, "{err}"),
            Self::EmptyProject => write!(f, "project has no nets"),
            Self::UnknownInstance(id) => write!(f, "unknown net instance {id}"),
            Self::UnknownProcess(id) => write!(f, "unknown process {id}"),
            Self::InvalidPlaceIndex(pos) => write!(f, "invalid place index {pos} in receive"),
            Self::UserCode(msg) => write!(f, "user code failed: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<LookupError> for EvalError {
    fn from(err: LookupError) -> Self {
        Self::Lookup(err)
    }
}

/// Result alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;
