//! Match-plan rendering: backtracking enumeration over token rings.
//!
//! The same skeleton backs both `enable_*` (match, then fire) and
//! `enable_check_*` (match only); callers supply the terminal action. Plan
//! instructions are interpreted against a [`Continuation`] that says what
//! "fail" means at the current nesting depth.
//!
//! Emitted shape for two edges on one place:
//!
//! ```text
//! if (n->place_3.size() < 2) { <failure> }
//! CaToken<int > *token_0 = n->place_3.begin();
//! do {
//!     <instructions of edge 0, fail = advance token_0>
//!     CaToken<int > *token_1 = n->place_3.begin();
//!     do {
//!         if (token_1 == token_0) { token_1 = token_1->next; continue; }
//!         <instructions of edge 1, fail = advance token_1>
//!         <terminal>
//!         token_1 = token_1->next;
//!     } while (token_1 != n->place_3.begin());
//!     token_0 = token_0->next;
//! } while (token_0 != n->place_3.begin());
//! ```

use std::collections::BTreeMap;

use petra_types::{Access, Edge, Expr, Instruction, MatchPlan, Net, Origin, Place, Transition, Type};

use crate::compiler::Ctx;
use crate::emitter::ExprEmitter;
use crate::error::{CodegenError, CodegenResult};
use crate::writer::CodeWriter;

/// What an instruction does when its test fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Leave the function with this statement.
    Return(String),
    /// Advance a cursor and retry its loop.
    Retry { cursor: String },
}

impl Continuation {
    pub fn code(&self) -> String {
        match self {
            Continuation::Return(stmt) => stmt.clone(),
            Continuation::Retry { cursor } => format!("{cursor} = {cursor}->next; continue;"),
        }
    }
}

/// A plan checked against its transition.
pub(crate) struct ResolvedPlan<'a> {
    pub plan: &'a MatchPlan,
    /// Matched edge and its place, in plan order.
    pub slots: Vec<(&'a Edge, &'a Place)>,
}

impl<'a> ResolvedPlan<'a> {
    pub fn resolve(net: &'a Net, tr: &'a Transition, plan: &'a MatchPlan) -> CodegenResult<Self> {
        let origin = Origin::part(tr.id, "plan");
        let mut slots: Vec<(&Edge, &Place)> = Vec::with_capacity(plan.matches.len());
        for m in &plan.matches {
            let edge = tr.input(m.edge).ok_or_else(|| CodegenError::InvalidPlan {
                message: format!("edge {} is not an input of transition {}", m.edge, tr.id),
                origin: origin.clone(),
            })?;
            if !edge.is_normal() {
                return Err(CodegenError::InvalidPlan {
                    message: format!("packing edge {} cannot be matched token by token", edge.id),
                    origin: origin.clone(),
                });
            }
            if slots.iter().any(|(e, _)| e.id == edge.id) {
                return Err(CodegenError::InvalidPlan {
                    message: format!("edge {} is matched twice", edge.id),
                    origin: origin.clone(),
                });
            }
            let place = net
                .place(edge.place)
                .ok_or(petra_types::LookupError::UnknownPlace(edge.place))?;
            slots.push((edge, place));
        }
        for (name, access) in &plan.access {
            if let Access::Token { slot, path } = access {
                let valid = slots
                    .get(*slot)
                    .is_some_and(|(_, place)| place.ty.project(path).is_some());
                if !valid {
                    return Err(CodegenError::InvalidPlan {
                        message: format!("variable '{name}' reads a token component that does not exist"),
                        origin: origin.clone(),
                    });
                }
            }
        }
        Ok(Self { plan, slots })
    }

    /// Required token count per place, in first-use order.
    pub fn multiplicities(&self) -> Vec<(&'a Place, usize)> {
        let mut counts: Vec<(&Place, usize)> = Vec::new();
        for (_, place) in &self.slots {
            match counts.iter_mut().find(|(p, _)| p.id == place.id) {
                Some((_, count)) => *count += 1,
                None => counts.push((place, 1)),
            }
        }
        counts
    }

    /// Earliest slot after which a variable is available, `None` if the
    /// plan never binds it.
    fn bound_at(&self, name: &str) -> Option<usize> {
        match self.plan.access.get(name)? {
            Access::Token { slot, .. } => Some(*slot),
            Access::Expr(expr) => expr
                .free_vars()
                .into_iter()
                .map(|v| self.bound_at(v))
                .try_fold(0, |acc, slot| slot.map(|s| acc.max(s))),
        }
    }

    /// Fail if `expr`, run at `slot` (`None` = before any token), reads a
    /// variable bound only later.
    fn check_available(&self, expr: &Expr, slot: Option<usize>, origin: &Origin) -> CodegenResult<()> {
        for name in expr.free_vars() {
            let ready = match (self.bound_at(name), slot) {
                (Some(bound), Some(current)) => bound <= current,
                // Unbound variables are reported by the emitter.
                (None, _) => true,
                (Some(_), None) => false,
            };
            if !ready {
                return Err(CodegenError::InvalidPlan {
                    message: format!("variable '{name}' is read before its edge is matched"),
                    origin: origin.clone(),
                });
            }
        }
        Ok(())
    }
}

/// C++ path of component `path` of the token under `cursor`.
pub(crate) fn element_path(cursor: &str, ty: &Type, path: &[usize]) -> String {
    let mut code = format!("{cursor}->element");
    let mut current = ty;
    for &index in path {
        if let Type::Product(fields) = current {
            if let Some(field) = fields.get(index) {
                code.push('.');
                code.push_str(&field.name);
                current = &field.ty;
            }
        }
    }
    code
}

/// Bind every variable of the access table, token components first and
/// computed ones after the variables they read.
pub(crate) fn bind_access(
    em: &mut ExprEmitter<'_, '_>,
    resolved: &ResolvedPlan<'_>,
    tr: &Transition,
    token_prefix: &str,
) -> CodegenResult<()> {
    let mut pending: BTreeMap<&str, &Expr> = BTreeMap::new();
    for (name, access) in &resolved.plan.access {
        match access {
            Access::Token { slot, path } => {
                let (_, place) = resolved.slots[*slot];
                let code = element_path(&format!("{token_prefix}{slot}"), &place.ty, path);
                em.bind(name.clone(), code, place.ty.project(path).cloned());
            }
            Access::Expr(expr) => {
                pending.insert(name.as_str(), expr);
            }
        }
    }
    let origin = Origin::part(tr.id, "plan");
    while !pending.is_empty() {
        let ready: Vec<&str> = pending
            .iter()
            .filter(|(_, expr)| expr.free_vars().iter().all(|v| em.binding(v).is_some()))
            .map(|(name, _)| *name)
            .collect();
        if ready.is_empty() {
            let name = pending.keys().next().copied().unwrap_or_default();
            return Err(CodegenError::InvalidPlan {
                message: format!("access expression of '{name}' depends on unbound variables"),
                origin,
            });
        }
        for name in ready {
            if let Some(expr) = pending.remove(name) {
                let ty = tr.context.get(name).cloned().or_else(|| em.infer(expr));
                let code = em.emit(expr, ty.as_ref(), &origin)?;
                em.bind(name, format!("({code})"), ty);
            }
        }
    }
    Ok(())
}

/// Render the match skeleton of `tr` into `w`.
///
/// `failure` is the statement that leaves the function when no binding
/// exists; the caller writes it again after the skeleton. `terminal` runs
/// with every variable of the plan bound.
pub(crate) fn render_match<F>(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    net: &Net,
    tr: &Transition,
    failure: &str,
    terminal: F,
) -> CodegenResult<()>
where
    F: FnOnce(&mut CodeWriter, &mut ExprEmitter<'_, '_>, &ResolvedPlan<'_>) -> CodegenResult<()>,
{
    let plan = cx.plans.plan_for(tr.id);
    let resolved = ResolvedPlan::resolve(net, tr, plan)?;
    let mut em = cx.emitter();
    bind_access(&mut em, &resolved, tr, "token_")?;

    // 1. Cheap rejection on token counts.
    for (place, count) in resolved.multiplicities() {
        w.if_line(
            format!("n->place_{}.size() < {count}", place.id),
            failure,
        );
    }

    // 2. One-time instructions.
    let top = Continuation::Return(failure.to_string());
    for instr in &plan.init {
        render_instruction(&em, w, &resolved, instr, None, &top, tr)?;
    }

    // 3. One loop per matched edge.
    for (slot, (edge, place)) in resolved.slots.iter().enumerate() {
        let cursor = format!("token_{slot}");
        let cpp = cx.codecs.cpp_type(&place.ty)?;
        w.line(format!("// Edge {}", edge.id));
        w.line(format!("CaToken<{cpp} > *{cursor} = n->place_{}.begin();", place.id));
        w.do_begin();
        let retry = Continuation::Retry {
            cursor: cursor.clone(),
        };
        for (earlier, (_, other)) in resolved.slots[..slot].iter().enumerate() {
            if other.id == place.id {
                w.if_line(format!("{cursor} == token_{earlier}"), retry.code());
            }
        }
        for instr in &plan.matches[slot].instructions {
            render_instruction(&em, w, &resolved, instr, Some(slot), &retry, tr)?;
        }
        if let Some(guard) = &edge.guard {
            let origin = Origin::part(edge.id, "guard");
            resolved.check_available(guard, Some(slot), &origin)?;
            let code = em.emit(guard, Some(&Type::Bool), &origin)?;
            w.if_line(format!("!({code})"), retry.code());
        }
    }

    // 4. Packing inputs enumerate nothing; they retry the innermost edge.
    let innermost = match resolved.slots.len() {
        0 => top.clone(),
        n => Continuation::Retry {
            cursor: format!("token_{}", n - 1),
        },
    };
    let multiplicities = resolved.multiplicities();
    for edge in tr.packing_inputs() {
        let Some(limit) = edge.limit() else { continue };
        let origin = Origin::part(edge.id, "limit");
        let need = multiplicities
            .iter()
            .find(|(p, _)| p.id == edge.place)
            .map_or(0, |(_, count)| *count);
        let limit = em.emit(limit, Some(&Type::Int), &origin)?;
        w.if_line(
            format!("n->place_{}.size() < {need} + {limit}", edge.place),
            innermost.code(),
        );
    }

    // 5. Everything bound.
    terminal(w, &mut em, &resolved)?;

    // 6. Unwind.
    for (slot, (_, place)) in resolved.slots.iter().enumerate().rev() {
        w.line(format!("token_{slot} = token_{slot}->next;"));
        w.do_end(format!("token_{slot} != n->place_{}.begin()", place.id));
    }
    Ok(())
}

fn render_instruction(
    em: &ExprEmitter<'_, '_>,
    w: &mut CodeWriter,
    resolved: &ResolvedPlan<'_>,
    instr: &Instruction,
    slot: Option<usize>,
    fail: &Continuation,
    tr: &Transition,
) -> CodegenResult<()> {
    let origin = Origin::part(tr.id, "plan");
    match instr {
        Instruction::Fail => w.line(fail.code()),
        Instruction::Guard(expr) => {
            resolved.check_available(expr, slot, &origin)?;
            let code = em.emit(expr, Some(&Type::Bool), &origin)?;
            w.if_line(format!("!({code})"), fail.code());
        }
        Instruction::Check { path, expr } => {
            let Some(slot) = slot else {
                return Err(CodegenError::InvalidPlan {
                    message: "token check outside of an edge".into(),
                    origin,
                });
            };
            let (_, place) = resolved.slots[slot];
            let Some(ty) = place.ty.project(path) else {
                return Err(CodegenError::InvalidPlan {
                    message: format!("place {} has no component at {path:?}", place.id),
                    origin,
                });
            };
            if !em.codecs().is_comparable(ty) {
                return Err(CodegenError::InvalidPlan {
                    message: format!("values of type {ty} cannot be compared"),
                    origin,
                });
            }
            resolved.check_available(expr, Some(slot), &origin)?;
            let code = em.emit(expr, Some(ty), &origin)?;
            let component = element_path(&format!("token_{slot}"), &place.ty, path);
            w.if_line(format!("!({component} == {code})"), fail.code());
        }
    }
    Ok(())
}
