//! User code seams.
//!
//! The generated program compiles user C++ fragments in. The evaluator
//! cannot, so every fragment it has to run is supplied as Rust: transition
//! bodies, place initializers, project functions and custom extern codecs,
//! each registered under the id or name of its model element. A transition
//! body without a registered implementation leaves its variables untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::codec::{ExternCodec, ExternCodecs};
use crate::error::EvalResult;
use crate::value::Value;

/// Context variables of a firing, by name.
pub type Vars = BTreeMap<String, Value>;

/// What user code sees of the running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    process_id: usize,
    process_count: usize,
    halted: bool,
}

impl Context {
    pub fn new(process_id: usize, process_count: usize) -> Self {
        Self {
            process_id,
            process_count,
            halted: false,
        }
    }

    pub fn process_id(&self) -> usize {
        self.process_id
    }

    pub fn process_count(&self) -> usize {
        self.process_count
    }

    /// Ask for the enclosing module instance to stop after this firing.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn halt_requested(&self) -> bool {
        self.halted
    }
}

/// Body of a transition.
pub trait TransitionCode: Send + Sync {
    fn run(&self, ctx: &mut Context, vars: &mut Vars) -> EvalResult<()>;
}

impl<F> TransitionCode for F
where
    F: Fn(&mut Context, &mut Vars) -> EvalResult<()> + Send + Sync,
{
    fn run(&self, ctx: &mut Context, vars: &mut Vars) -> EvalResult<()> {
        self(ctx, vars)
    }
}

/// Initializer code of a place: the tokens it starts with.
pub trait PlaceInitCode: Send + Sync {
    fn init(&self, ctx: &mut Context) -> EvalResult<Vec<Value>>;
}

impl<F> PlaceInitCode for F
where
    F: Fn(&mut Context) -> EvalResult<Vec<Value>> + Send + Sync,
{
    fn init(&self, ctx: &mut Context) -> EvalResult<Vec<Value>> {
        self(ctx)
    }
}

pub type NativeFunction = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

/// Registry of everything the model delegates to user code.
#[derive(Clone, Default)]
pub struct UserCode {
    functions: BTreeMap<String, NativeFunction>,
    transitions: BTreeMap<u32, Arc<dyn TransitionCode>>,
    place_inits: BTreeMap<u32, Arc<dyn PlaceInitCode>>,
    codecs: ExternCodecs,
}

impl UserCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        self
    }

    pub fn with_transition<F>(mut self, transition: u32, f: F) -> Self
    where
        F: Fn(&mut Context, &mut Vars) -> EvalResult<()> + Send + Sync + 'static,
    {
        self.transitions.insert(transition, Arc::new(f));
        self
    }

    pub fn with_place_init<F>(mut self, place: u32, f: F) -> Self
    where
        F: Fn(&mut Context) -> EvalResult<Vec<Value>> + Send + Sync + 'static,
    {
        self.place_inits.insert(place, Arc::new(f));
        self
    }

    pub fn with_extern_codec(mut self, type_name: &str, codec: impl ExternCodec + 'static) -> Self {
        self.codecs.insert(type_name.to_string(), Arc::new(codec));
        self
    }

    pub fn function(&self, name: &str) -> Option<&NativeFunction> {
        self.functions.get(name)
    }

    pub fn transition(&self, id: u32) -> Option<&dyn TransitionCode> {
        self.transitions.get(&id).map(|code| code.as_ref())
    }

    pub fn place_init(&self, id: u32) -> Option<&dyn PlaceInitCode> {
        self.place_inits.get(&id).map(|code| code.as_ref())
    }

    pub fn codecs(&self) -> &ExternCodecs {
        &self.codecs
    }
}

impl fmt::Debug for UserCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCode")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions.keys().collect::<Vec<_>>())
            .field("place_inits", &self.place_inits.keys().collect::<Vec<_>>())
            .field("codecs", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_closures_run() {
        let code = UserCode::new()
            .with_transition(4, |ctx: &mut Context, vars: &mut Vars| {
                vars.insert("y".into(), Value::Int(ctx.process_id() as i32));
                ctx.halt();
                Ok(())
            })
            .with_place_init(7, |_: &mut Context| Ok(vec![Value::Int(1)]));

        let mut ctx = Context::new(2, 4);
        let mut vars = Vars::new();
        code.transition(4).unwrap().run(&mut ctx, &mut vars).unwrap();
        assert_eq!(vars.get("y"), Some(&Value::Int(2)));
        assert!(ctx.halt_requested());
        assert!(code.transition(5).is_none());
        assert_eq!(
            code.place_init(7).unwrap().init(&mut ctx).unwrap(),
            vec![Value::Int(1)]
        );
    }
}
