//! Net instances.
//!
//! An instance of a net exists on every process. Each process holds a
//! [`NetUnit`]: its share of the places and the scheduler's activation
//! flags. Initial tokens are seeded per unit according to the place's
//! areas.

use std::collections::{BTreeMap, BTreeSet};

use petra_types::{LookupError, MatchPlan, Net, Transition, Type};

use crate::code::Vars;
use crate::env::Environment;
use crate::error::{EvalError, EvalResult};
use crate::evaluator::Evaluator;
use crate::matcher::{Binding, Matcher, Places};
use crate::ring::TokenRing;
use crate::value::Value;

/// Completion of a subnet-spawning firing, run in the parent once the
/// module instance has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct Finalizer {
    pub parent: u32,
    /// Process the spawning firing ran on.
    pub process: usize,
    pub transition: u32,
    /// Bindings of the firing, restored before the parent's outputs run.
    pub vars: Vars,
}

/// One process's share of a net instance.
#[derive(Debug, Clone)]
pub struct NetUnit {
    places: Places,
    /// Transition positions the scheduler should look at.
    active: BTreeSet<usize>,
    /// Firings started under autohalt and not yet completed.
    running_transitions: usize,
}

impl NetUnit {
    pub fn new(net: &Net) -> Self {
        Self {
            places: net.places.iter().map(|p| (p.id, TokenRing::new())).collect(),
            active: (0..net.transitions.len()).collect(),
            running_transitions: 0,
        }
    }

    pub fn places(&self) -> &Places {
        &self.places
    }

    pub fn ring(&self, place: u32) -> EvalResult<&TokenRing<Value>> {
        self.places
            .get(&place)
            .ok_or_else(|| LookupError::UnknownPlace(place).into())
    }

    fn ring_mut(&mut self, place: u32) -> EvalResult<&mut TokenRing<Value>> {
        self.places
            .get_mut(&place)
            .ok_or_else(|| LookupError::UnknownPlace(place).into())
    }

    /// Tokens of a place, in ring order.
    pub fn tokens(&self, place: u32) -> EvalResult<Vec<Value>> {
        Ok(self.ring(place)?.to_vec())
    }

    /// Add a token and flag every transition reading the place.
    pub fn add(&mut self, net: &Net, place: u32, value: Value) -> EvalResult<()> {
        self.ring_mut(place)?.push(value);
        self.activate_readers(net, place);
        Ok(())
    }

    pub fn add_all(&mut self, net: &Net, place: u32, values: Vec<Value>) -> EvalResult<()> {
        self.ring_mut(place)?.extend(values);
        self.activate_readers(net, place);
        Ok(())
    }

    /// Take the tokens of a binding out of their rings. Flags readers of
    /// every touched place.
    pub fn consume(&mut self, net: &Net, binding: &Binding) -> EvalResult<Vec<Value>> {
        let mut values = Vec::with_capacity(binding.tokens.len());
        let mut touched = BTreeSet::new();
        for (place, id) in &binding.tokens {
            let value = self.ring_mut(*place)?.remove(*id).ok_or_else(|| {
                EvalError::InvalidPlan(format!("token of place {place} consumed twice"))
            })?;
            values.push(value);
            touched.insert(*place);
        }
        for place in touched {
            self.activate_readers(net, place);
        }
        Ok(values)
    }

    /// Empty a place in one step.
    pub fn drain(&mut self, net: &Net, place: u32) -> EvalResult<Vec<Value>> {
        let values = self.ring_mut(place)?.drain();
        self.activate_readers(net, place);
        Ok(values)
    }

    fn activate_readers(&mut self, net: &Net, place: u32) {
        self.active.extend(net.transitions_out(place));
    }

    pub fn is_active(&self, pos: usize) -> bool {
        self.active.contains(&pos)
    }

    pub fn deactivate(&mut self, pos: usize) {
        self.active.remove(&pos);
    }

    pub fn inc_running_transitions(&mut self) {
        self.running_transitions += 1;
    }

    pub fn dec_running_transitions(&mut self) {
        self.running_transitions = self.running_transitions.saturating_sub(1);
    }

    pub fn running_transitions(&self) -> usize {
        self.running_transitions
    }

    /// First binding enabling `tr` on this unit, without touching it.
    pub fn find_binding(
        &self,
        ev: &Evaluator<'_>,
        net: &Net,
        tr: &Transition,
        plan: &MatchPlan,
    ) -> EvalResult<Option<Binding>> {
        Matcher::new(ev, &self.places, net, tr, plan)?.find()
    }
}

/// A spawned net on every process.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: u32,
    pub net: u32,
    pub main_process: usize,
    /// Set for module instances spawned by a firing.
    pub finalizer: Option<Finalizer>,
    /// User code asked the instance to stop.
    pub halted: bool,
    units: Vec<NetUnit>,
}

impl Instance {
    pub fn new(id: u32, net: &Net, process_count: usize, finalizer: Option<Finalizer>) -> Self {
        let process_count = process_count.max(1);
        Self {
            id,
            net: net.id,
            main_process: id as usize % process_count,
            finalizer,
            halted: false,
            units: (0..process_count).map(|_| NetUnit::new(net)).collect(),
        }
    }

    pub fn unit(&self, process: usize) -> EvalResult<&NetUnit> {
        self.units
            .get(process)
            .ok_or(EvalError::UnknownProcess(process))
    }

    pub fn unit_mut(&mut self, process: usize) -> EvalResult<&mut NetUnit> {
        self.units
            .get_mut(process)
            .ok_or(EvalError::UnknownProcess(process))
    }

    pub fn units(&self) -> impl Iterator<Item = (usize, &NetUnit)> + '_ {
        self.units.iter().enumerate()
    }

    /// Seed initial tokens on every process.
    ///
    /// A place without areas starts on the main process; one with areas on
    /// every process listed by all of them.
    pub fn seed(
        &mut self,
        ev: &Evaluator<'_>,
        net: &Net,
        mut init_code: impl FnMut(u32, usize) -> EvalResult<Option<Vec<Value>>>,
    ) -> EvalResult<()> {
        let env = Environment::new();
        let mut areas: BTreeMap<u32, Vec<i32>> = BTreeMap::new();
        for area in &net.areas {
            let value = ev.eval_as(&area.expr, &Type::array(Type::Int), &env)?;
            let members = match value {
                Value::Array(items) => items.iter().filter_map(Value::as_int).collect(),
                _ => Vec::new(),
            };
            areas.insert(area.id, members);
        }

        for (process, unit) in self.units.iter_mut().enumerate() {
            for place in net.places.iter().filter(|p| p.has_initializer()) {
                let mut owned = true;
                for area in &place.areas {
                    let members = areas.get(area).ok_or(LookupError::UnknownArea(*area))?;
                    owned &= members.iter().any(|m| usize::try_from(*m).ok() == Some(process));
                }
                if place.areas.is_empty() {
                    owned = process == self.main_process;
                }
                if !owned {
                    continue;
                }
                if let Some(init) = &place.init_expr {
                    let ty = Type::array(place.ty.clone());
                    if let Value::Array(values) = ev.eval_as(init, &ty, &env)? {
                        unit.add_all(net, place.id, values)?;
                    }
                }
                if place.init_code.is_some() {
                    if let Some(values) = init_code(place.id, process)? {
                        unit.add_all(net, place.id, values)?;
                    }
                }
            }
        }
        Ok(())
    }
}
