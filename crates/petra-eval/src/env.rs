//! Scoped variable bindings for matching and firing.
//!
//! The matcher opens one scope per matched edge and drops it when it moves
//! on to the next candidate token, so a backtracked binding never leaks
//! into a sibling attempt.

use std::collections::BTreeMap;

use crate::value::Value;

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: BTreeMap<String, Value>,
}

/// Scoped variable environment with push/pop semantics.
///
/// Lookups search from the innermost scope outward; `define` always writes
/// the innermost scope.
#[derive(Debug, Clone)]
pub struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Drop the innermost scope; the outermost one is never dropped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn define(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string(), value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every visible binding, inner scopes shadowing outer ones.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut all = BTreeMap::new();
        for scope in &self.scopes {
            for (name, value) in &scope.bindings {
                all.insert(name.clone(), value.clone());
            }
        }
        all
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BTreeMap<String, Value>> for Environment {
    fn from(bindings: BTreeMap<String, Value>) -> Self {
        Self {
            scopes: vec![Scope { bindings }],
        }
    }
}
