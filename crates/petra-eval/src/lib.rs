//! Petra reference evaluator.
//!
//! Executes a net model and its match plans directly, with the semantics the
//! generated C++ program has: the same binding search order, the same firing
//! effects and the same wire layout for tokens crossing processes. Used to
//! check models without a C++ toolchain and as the reference the generator's
//! output is compared against.
//!
//! User C++ fragments cannot run here; they are stood in for by Rust
//! closures registered in a [`UserCode`].

pub mod code;
pub mod codec;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod instance;
pub mod matcher;
pub mod protocol;
pub mod ring;
pub mod simulation;
pub mod value;

pub use code::{Context, UserCode, Vars};
pub use codec::{ExternCodec, Packer, Unpacker, WireCodec};
pub use error::{EvalError, EvalResult};
pub use evaluator::Evaluator;
pub use protocol::{serve, Command, Response};
pub use simulation::{Envelope, FireOutcome, Simulation, SimulationConfig};
pub use value::Value;
