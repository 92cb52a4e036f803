//! Petra C++ code generator: compiles a net model and its match plans into
//! a program for the Petra runtime.
//!
//! # Architecture
//!
//! The generator takes a validated [`petra_types::Project`] and a
//! [`petra_types::PlanTable`] and produces one self-contained C++
//! translation unit:
//!
//! - [`codec`] derives size/pack/unpack/stringify code for every value
//!   type, in dependency order;
//! - [`matcher`] renders each transition's match plan as a backtracking
//!   loop nest over the token rings of its input places;
//! - [`fire`] emits the firing effects (token removal, activation, subnet
//!   spawn and finalizer, user code, local and remote output) under
//!   statically tracked lock discipline, see [`lock`];
//! - [`net`] assembles one class per net with report, receive and spawn
//!   routines;
//! - [`compiler`] strings the pieces together and emits `main`.
//!
//! ## Runtime contract
//!
//! The output includes `cailie.h` and relies on `CaNet`, `CaPlace<T>`,
//! `CaToken<T>`, `CaPacker`/`CaUnpacker`, `CaOutput` and `CaNetDef`.
//! `enable_<id>` is entered with the net locked and always returns with it
//! unlocked; `enable_check_<id>` never touches the lock or the places.

pub mod codec;
pub mod compiler;
pub mod emitter;
pub mod error;
pub mod fire;
pub mod lock;
pub mod matcher;
pub mod net;
pub mod source_map;
pub mod writer;

pub use compiler::{generate, generate_with_options, CodegenOptions, Generated};
pub use error::{CodegenError, CodegenResult};
pub use source_map::SourceMap;
