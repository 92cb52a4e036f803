//! Binding search: the interpreted counterpart of the generated match
//! skeleton.
//!
//! Edges are tried in plan order, each over the ring of its place from the
//! head. A failing instruction or guard moves the current edge to its next
//! token; a ring running out backtracks to the previous edge. Packing
//! limits are checked once every edge is bound and retry the innermost one.

use std::collections::{BTreeMap, BTreeSet};

use petra_types::{Access, Edge, Instruction, MatchPlan, Net, Transition, Type};

use crate::env::Environment;
use crate::error::{EvalError, EvalResult};
use crate::evaluator::{compare, Evaluator};
use crate::ring::{TokenId, TokenRing};
use crate::value::Value;

/// Outcome of one plan instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep going with the current candidates.
    Next,
    /// Invoke the failure continuation of the current depth.
    Fail,
}

/// A satisfying assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// Matched token of each plan edge, with the place it sits in.
    pub tokens: Vec<(u32, TokenId)>,
    /// Every variable the plan binds.
    pub vars: BTreeMap<String, Value>,
}

/// Places of one net unit, by place id.
pub type Places = BTreeMap<u32, TokenRing<Value>>;

struct Slot<'a> {
    edge: &'a Edge,
    place_ty: &'a Type,
    ring: &'a TokenRing<Value>,
}

pub struct Matcher<'a> {
    ev: &'a Evaluator<'a>,
    tr: &'a Transition,
    plan: &'a MatchPlan,
    slots: Vec<Slot<'a>>,
    places: &'a Places,
}

impl<'a> Matcher<'a> {
    /// Check `plan` against `tr` and prepare a search over `places`.
    pub fn new(
        ev: &'a Evaluator<'a>,
        places: &'a Places,
        net: &'a Net,
        tr: &'a Transition,
        plan: &'a MatchPlan,
    ) -> EvalResult<Self> {
        let mut slots = Vec::with_capacity(plan.matches.len());
        let mut seen = BTreeSet::new();
        for m in &plan.matches {
            let edge = tr.input(m.edge).ok_or_else(|| {
                EvalError::InvalidPlan(format!(
                    "edge {} is not an input of transition {}",
                    m.edge, tr.id
                ))
            })?;
            if !edge.is_normal() || !seen.insert(edge.id) {
                return Err(EvalError::InvalidPlan(format!(
                    "edge {} cannot be matched here",
                    edge.id
                )));
            }
            let place = net
                .place(edge.place)
                .ok_or(petra_types::LookupError::UnknownPlace(edge.place))?;
            let ring = places
                .get(&edge.place)
                .ok_or(petra_types::LookupError::UnknownPlace(edge.place))?;
            slots.push(Slot {
                edge,
                place_ty: &place.ty,
                ring,
            });
        }
        for (name, access) in &plan.access {
            if let Access::Token { slot, path } = access {
                let valid = slots
                    .get(*slot)
                    .is_some_and(|s| s.place_ty.project(path).is_some());
                if !valid {
                    return Err(EvalError::InvalidPlan(format!(
                        "variable '{name}' reads a token component that does not exist"
                    )));
                }
            }
        }
        Ok(Self {
            ev,
            tr,
            plan,
            slots,
            places,
        })
    }

    /// Tokens required per place.
    fn multiplicities(&self) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for slot in &self.slots {
            *counts.entry(slot.edge.place).or_insert(0) += 1;
        }
        counts
    }

    /// The first binding in enumeration order, `None` if the transition is
    /// not enabled. Never mutates anything.
    pub fn find(&self) -> EvalResult<Option<Binding>> {
        for (place, count) in self.multiplicities() {
            let available = self.places.get(&place).map_or(0, TokenRing::len);
            if available < count {
                return Ok(None);
            }
        }

        let mut env = Environment::new();
        self.bind_computed(&mut env)?;
        for instr in &self.plan.init {
            if self.step(instr, None, &env)? == Step::Fail {
                return Ok(None);
            }
        }
        let mut chosen = Vec::with_capacity(self.slots.len());
        self.search(0, &mut env, &mut chosen)
    }

    fn search(
        &self,
        depth: usize,
        env: &mut Environment,
        chosen: &mut Vec<TokenId>,
    ) -> EvalResult<Option<Binding>> {
        let Some(slot) = self.slots.get(depth) else {
            return self.complete(env, chosen);
        };
        for id in slot.ring.ids() {
            let taken = self.slots[..depth]
                .iter()
                .zip(chosen.iter())
                .any(|(earlier, token)| earlier.edge.place == slot.edge.place && *token == id);
            if taken {
                continue;
            }
            let Some(token) = slot.ring.get(id) else {
                continue;
            };
            env.push_scope();
            chosen.push(id);
            let found = self.try_token(depth, token, env, chosen)?;
            if found.is_some() {
                return Ok(found);
            }
            chosen.pop();
            env.pop_scope();
        }
        Ok(None)
    }

    fn try_token(
        &self,
        depth: usize,
        token: &Value,
        env: &mut Environment,
        chosen: &mut Vec<TokenId>,
    ) -> EvalResult<Option<Binding>> {
        for (name, access) in &self.plan.access {
            if let Access::Token { slot, path } = access {
                if *slot == depth {
                    let value = token.project(path).cloned().ok_or_else(|| {
                        EvalError::TypeMismatch(format!("token has no component at {path:?}"))
                    })?;
                    env.define(name, value);
                }
            }
        }
        self.bind_computed(env)?;

        for instr in &self.plan.matches[depth].instructions {
            if self.step(instr, Some((depth, token)), env)? == Step::Fail {
                return Ok(None);
            }
        }
        let slot = &self.slots[depth];
        if let Some(guard) = &slot.edge.guard {
            if !self.ev.eval_bool(guard, env)? {
                return Ok(None);
            }
        }
        self.search(depth + 1, env, chosen)
    }

    /// Every edge bound: check packing limits.
    fn complete(&self, env: &Environment, chosen: &[TokenId]) -> EvalResult<Option<Binding>> {
        let counts = self.multiplicities();
        for edge in self.tr.packing_inputs() {
            let Some(limit) = edge.limit() else { continue };
            let limit = self.ev.eval_int(limit, env)?;
            let need = counts.get(&edge.place).copied().unwrap_or(0);
            let available = self.places.get(&edge.place).map_or(0, TokenRing::len);
            if (available as i64) < need as i64 + i64::from(limit) {
                return Ok(None);
            }
        }
        Ok(Some(Binding {
            tokens: self
                .slots
                .iter()
                .zip(chosen)
                .map(|(slot, id)| (slot.edge.place, *id))
                .collect(),
            vars: env.flatten(),
        }))
    }

    /// Define computed variables whose inputs are now all bound.
    fn bind_computed(&self, env: &mut Environment) -> EvalResult<()> {
        loop {
            let mut progressed = false;
            for (name, access) in &self.plan.access {
                let Access::Expr(expr) = access else { continue };
                if env.contains(name) || !expr.free_vars().iter().all(|v| env.contains(v)) {
                    continue;
                }
                let value = match self.tr.context.get(name) {
                    Some(ty) => self.ev.eval_as(expr, ty, env)?,
                    None => self.ev.eval(expr, env)?,
                };
                env.define(name, value);
                progressed = true;
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn step(
        &self,
        instr: &Instruction,
        current: Option<(usize, &Value)>,
        env: &Environment,
    ) -> EvalResult<Step> {
        let pass = match instr {
            Instruction::Fail => false,
            Instruction::Guard(expr) => self.ev.eval_bool(expr, env)?,
            Instruction::Check { path, expr } => {
                let Some((depth, token)) = current else {
                    return Err(EvalError::InvalidPlan("token check outside of an edge".into()));
                };
                let ty = self.slots[depth].place_ty.project(path).ok_or_else(|| {
                    EvalError::InvalidPlan(format!("no component at {path:?}"))
                })?;
                let component = token.project(path).ok_or_else(|| {
                    EvalError::TypeMismatch(format!("token has no component at {path:?}"))
                })?;
                let expected = self.ev.eval_as(expr, ty, env)?;
                compare(component, &expected)? == std::cmp::Ordering::Equal
            }
        };
        Ok(if pass { Step::Next } else { Step::Fail })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::UserCode;
    use petra_types::{Addressing, BinaryOp, Direction, EdgeKind, EdgeMatch, Expr, Place};

    fn input(id: u32, place: u32, var: &str) -> Edge {
        Edge {
            id,
            place,
            direction: Direction::Input,
            kind: EdgeKind::Normal,
            expr: Expr::var(var),
            guard: None,
            target: None,
            addressing: Addressing::Local,
        }
    }

    fn net(inputs: Vec<Edge>) -> Net {
        Net {
            id: 1,
            name: "n".into(),
            places: vec![Place {
                id: 1,
                name: "p".into(),
                ty: Type::Int,
                init_expr: None,
                init_code: None,
                areas: Vec::new(),
            }],
            transitions: vec![Transition {
                id: 10,
                name: "t".into(),
                inputs,
                outputs: Vec::new(),
                subnet: None,
                code: None,
                context: BTreeMap::new(),
            }],
            areas: Vec::new(),
            interface: Default::default(),
            is_local: false,
            is_module: false,
            autohalt: false,
        }
    }

    fn plan(edges: &[u32], vars: &[&str]) -> MatchPlan {
        MatchPlan {
            matches: edges
                .iter()
                .map(|&edge| EdgeMatch {
                    edge,
                    instructions: Vec::new(),
                })
                .collect(),
            init: Vec::new(),
            access: vars
                .iter()
                .enumerate()
                .map(|(slot, v)| (v.to_string(), Access::token(slot, [])))
                .collect(),
        }
    }

    fn places(tokens: &[i32]) -> Places {
        BTreeMap::from([(1, tokens.iter().map(|t| Value::Int(*t)).collect())])
    }

    fn find(net: &Net, plan: &MatchPlan, places: &Places) -> EvalResult<Option<Binding>> {
        let params = BTreeMap::new();
        let code = UserCode::new();
        let ev = Evaluator::new(&params, &code);
        Matcher::new(&ev, places, net, &net.transitions[0], plan)?.find()
    }

    #[test]
    fn test_two_edges_never_share_a_token() {
        let n = net(vec![input(20, 1, "x"), input(21, 1, "y")]);
        let mut p = plan(&[20, 21], &["x", "y"]);
        p.matches[1].instructions = vec![Instruction::Guard(Expr::binary(
            BinaryOp::Eq,
            Expr::var("x"),
            Expr::var("y"),
        ))];

        assert_eq!(find(&n, &p, &places(&[5, 6])).unwrap(), None);
        let binding = find(&n, &p, &places(&[5, 6, 5])).unwrap().unwrap();
        assert_eq!(binding.vars.get("x"), Some(&Value::Int(5)));
        assert_ne!(binding.tokens[0], binding.tokens[1]);
    }

    #[test]
    fn test_count_guard_skips_instructions() {
        let n = net(vec![input(20, 1, "x"), input(21, 1, "y")]);
        let mut p = plan(&[20, 21], &["x", "y"]);
        // Would raise if it ran.
        p.init = vec![Instruction::Guard(Expr::var("undefined"))];
        assert_eq!(find(&n, &p, &places(&[1])).unwrap(), None);
        assert!(find(&n, &p, &places(&[1, 2])).is_err());
    }

    #[test]
    fn test_backtracks_to_earlier_edge() {
        let mut second = input(21, 1, "y");
        second.guard = Some(Expr::binary(BinaryOp::Gt, Expr::var("y"), Expr::var("x")));
        let n = net(vec![input(20, 1, "x"), second]);
        let p = plan(&[20, 21], &["x", "y"]);
        // Nothing beats 9, so x moves on to 3 and y restarts from the head.
        let binding = find(&n, &p, &places(&[9, 3, 4])).unwrap().unwrap();
        assert_eq!(binding.vars.get("x"), Some(&Value::Int(3)));
        assert_eq!(binding.vars.get("y"), Some(&Value::Int(9)));
    }

    #[test]
    fn test_check_compares_components() {
        let n = net(vec![input(20, 1, "x")]);
        let mut p = plan(&[20], &["x"]);
        p.matches[0].instructions = vec![Instruction::Check {
            path: Vec::new(),
            expr: Expr::Int(4),
        }];
        let binding = find(&n, &p, &places(&[3, 4])).unwrap().unwrap();
        assert_eq!(binding.vars.get("x"), Some(&Value::Int(4)));
    }

    #[test]
    fn test_unknown_edge_is_invalid_plan() {
        let n = net(vec![input(20, 1, "x")]);
        let p = plan(&[99], &[]);
        assert!(matches!(
            find(&n, &p, &places(&[1])),
            Err(EvalError::InvalidPlan(_))
        ));
    }
}
