//! Firing effects: what a transition does once its match succeeded.
//!
//! Order inside `enable_<id>`:
//!
//! 1. remove matched tokens, drain packing inputs;
//! 2. activate downstream transitions, bump the autohalt counter;
//! 3. spawn the subnet and hand the rest to a finalizer, or
//! 4. run user code with the net released, or
//! 5. keep the lock;
//! 6. produce every output (local add under the lock, remote send without it);
//! 7. release the lock, free tokens, honour the module halt flag.
//!
//! Lock transitions all go through [`NetLock`].

use std::collections::BTreeSet;

use petra_types::{Access, Addressing, Edge, LookupError, Net, Origin, Transition, Type};

use crate::compiler::Ctx;
use crate::emitter::ExprEmitter;
use crate::error::{CodegenError, CodegenResult};
use crate::lock::NetLock;
use crate::matcher::{bind_access, render_match, ResolvedPlan};
use crate::source_map::{FragmentKind, Fragments};
use crate::writer::{string_literal, CodeWriter};

// ══════════════════════════════════════════════════════════════════════════════
// Declarations
// ══════════════════════════════════════════════════════════════════════════════

/// Helper structs and the enable-check prototype, emitted before the net
/// class so its report routine can call them.
pub(crate) fn emit_transition_decls(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    net: &Net,
    tr: &Transition,
) -> CodegenResult<()> {
    if tr.subnet.is_some() {
        emit_tokens_struct(cx, w, net, tr)?;
    }
    if tr.code.is_some() {
        emit_vars_struct(cx, w, tr)?;
    }
    w.line(format!(
        "bool enable_check_{}(CaThread *thread, CaNet *net);",
        tr.id
    ));
    Ok(())
}

/// References to every context variable, handed to the user code.
fn emit_vars_struct(cx: &Ctx<'_, '_>, w: &mut CodeWriter, tr: &Transition) -> CodegenResult<()> {
    let name = format!("Vars_{}", tr.id);
    let mut members = Vec::with_capacity(tr.context.len());
    for (var, ty) in &tr.context {
        members.push((var.as_str(), cx.codecs.cpp_type(ty)?));
    }
    w.line(format!("struct {name} {{"));
    if members.is_empty() {
        w.line("};");
        return Ok(());
    }
    let params: Vec<String> = members
        .iter()
        .map(|(var, cpp)| format!("{cpp} &{var}"))
        .collect();
    let inits: Vec<String> = members
        .iter()
        .map(|(var, _)| format!("{var}({var})"))
        .collect();
    w.line(format!(
        "\t{name}({}) : {} {{}}",
        params.join(", "),
        inits.join(", ")
    ));
    for (var, cpp) in &members {
        w.line(format!("\t{cpp} &{var};"));
    }
    w.line("};");
    Ok(())
}

/// What the finalizer of a subnet-spawning transition needs from the
/// firing: the matched tokens and drained packing inputs.
fn emit_tokens_struct(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    net: &Net,
    tr: &Transition,
) -> CodegenResult<()> {
    let resolved = ResolvedPlan::resolve(net, tr, cx.plans.plan_for(tr.id))?;
    w.line(format!("struct Tokens_{} {{", tr.id));
    for (slot, (_, place)) in resolved.slots.iter().enumerate() {
        w.line(format!(
            "\tCaToken<{} > *token_{slot};",
            cx.codecs.cpp_type(&place.ty)?
        ));
    }
    for edge in tr.packing_inputs() {
        let var = packing_var(edge)?;
        let place = net
            .place(edge.place)
            .ok_or(LookupError::UnknownPlace(edge.place))?;
        w.line(format!(
            "\t{} var_{var};",
            cx.codecs.cpp_type(&Type::array(place.ty.clone()))?
        ));
    }
    w.line("};");
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Per-transition functions
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn emit_transition(
    cx: &Ctx<'_, '_>,
    frags: &mut Fragments,
    w: &mut CodeWriter,
    net: &Net,
    tr: &Transition,
) -> CodegenResult<()> {
    if let Some(code) = &tr.code {
        let func = format!("transition_user_fn_{}", tr.id);
        frags.write_function(
            w,
            &func,
            &format!("void {func}(CaContext &ctx, Vars_{} &var)", tr.id),
            code,
            FragmentKind::Transition,
            Origin::part(tr.id, "function"),
        );
    }
    if tr.subnet.is_some() {
        emit_finalizer(cx, w, net, tr)?;
    }
    emit_enable(cx, w, net, tr)?;
    emit_enable_check(cx, w, net, tr)
}

/// Match and fire. Entered with the net locked, always leaves it unlocked.
fn emit_enable(cx: &Ctx<'_, '_>, w: &mut CodeWriter, net: &Net, tr: &Transition) -> CodegenResult<()> {
    tracing::trace!(transition = tr.id, "emitting enable");
    let failure = "n->unlock(); return CA_NOT_ENABLED;";
    w.function_begin(format!("int enable_{}(CaThread *thread, CaNet *net)", tr.id));
    w.line("CaContext ctx(thread, net);");
    w.line(format!("Net_{0} *n = (Net_{0}*) net;", net.id));
    render_match(cx, w, net, tr, failure, |w, em, resolved| {
        fire(cx, w, em, resolved, net, tr)
    })?;
    w.line("n->unlock();");
    w.line("return CA_NOT_ENABLED;");
    w.function_end();
    Ok(())
}

/// Match only. Touches neither places nor the lock.
fn emit_enable_check(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    net: &Net,
    tr: &Transition,
) -> CodegenResult<()> {
    w.function_begin(format!(
        "bool enable_check_{}(CaThread *thread, CaNet *net)",
        tr.id
    ));
    w.line("CaContext ctx(thread, net);");
    w.line(format!("Net_{0} *n = (Net_{0}*) net;", net.id));
    render_match(cx, w, net, tr, "return false;", |w, _, _| {
        w.line("return true;");
        Ok(())
    })?;
    w.line("return false;");
    w.function_end();
    Ok(())
}

fn fire(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    em: &mut ExprEmitter<'_, '_>,
    resolved: &ResolvedPlan<'_>,
    net: &Net,
    tr: &Transition,
) -> CodegenResult<()> {
    // Context variables become addressable locals: computed ones are
    // materialized, unbound ones are left for user code or packing edges.
    for (name, ty) in &tr.context {
        let cpp = cx.codecs.cpp_type(ty)?;
        match resolved.plan.access.get(name) {
            Some(Access::Token { .. }) => continue,
            Some(Access::Expr(_)) => {
                let code = em.binding(name).map(|b| b.code.clone()).unwrap_or_default();
                w.line(format!("{cpp} var_{name} = {code};"));
            }
            None => w.line(format!("{cpp} var_{name};")),
        }
        em.bind(name.clone(), format!("var_{name}"), Some(ty.clone()));
    }

    // 1. Consume.
    let mut changed = BTreeSet::new();
    for (slot, (_, place)) in resolved.slots.iter().enumerate() {
        w.line(format!("n->place_{}.remove(token_{slot});", place.id));
        changed.insert(place.id);
    }
    for edge in tr.packing_inputs() {
        let var = packing_var(edge)?;
        let code = match em.binding(var) {
            Some(binding) => binding.code.clone(),
            None => {
                let place = net
                    .place(edge.place)
                    .ok_or(LookupError::UnknownPlace(edge.place))?;
                let seq = Type::array(place.ty.clone());
                w.line(format!("{} var_{var};", cx.codecs.cpp_type(&seq)?));
                em.bind(var, format!("var_{var}"), Some(seq));
                format!("var_{var}")
            }
        };
        w.line(format!("{code} = n->place_{}.to_vector_and_clear();", edge.place));
        changed.insert(edge.place);
    }

    // 2. Let the scheduler reconsider this transition and everything that
    // reads a changed place.
    let own = net
        .transition_pos(tr.id)
        .ok_or(LookupError::UnknownTransition(tr.id))?;
    let downstream: BTreeSet<usize> = changed
        .iter()
        .flat_map(|place| net.transitions_out(*place))
        .chain([own])
        .collect();
    for pos in downstream {
        w.line(format!("n->activate_transition_by_pos_id({pos});"));
    }
    if net.autohalt {
        w.line("n->inc_running_transitions();");
    }

    let mut lock = NetLock::declare(w, "n", "lock", true);

    // 3. Subnet: the finalizer completes the firing.
    if let Some(subnet_id) = tr.subnet {
        let subnet = cx.project.net(subnet_id)?;
        let index = cx.project.net_index(subnet_id)?;
        lock.ensure_released(w);
        w.line(format!(
            "Net_{0} *subnet = (Net_{0}*) thread->spawn_net({index}, net);",
            subnet.id
        ));
        w.line(format!("Tokens_{0} *tokens = new Tokens_{0}();", tr.id));
        for slot in 0..resolved.slots.len() {
            w.line(format!("tokens->token_{slot} = token_{slot};"));
        }
        for edge in tr.packing_inputs() {
            let var = packing_var(edge)?;
            let code = em.binding(var).map(|b| b.code.clone()).unwrap_or_default();
            w.line(format!("tokens->var_{var} = {code};"));
        }
        w.line(format!(
            "subnet->set_finalizer((CaNetFinalizerFn*) transition_finalizer_{}, tokens);",
            tr.id
        ));
        let mut subnet_lock = NetLock::declare(w, "subnet", "subnet_lock", false);
        for edge in &subnet.interface.inputs {
            send_token(cx, w, em, &mut subnet_lock, subnet, "subnet", edge)?;
        }
        subnet_lock.finish(w);
        lock.finish(w);
        halt_check(w, net);
        w.line("return CA_TRANSITION_FIRED_WITH_MODULE;");
        return Ok(());
    }

    // 4. User code never runs under the lock.
    if tr.code.is_some() {
        lock.ensure_released(w);
        let args: Vec<String> = tr
            .context
            .keys()
            .map(|name| em.binding(name).map(|b| b.code.clone()).unwrap_or_default())
            .collect();
        if args.is_empty() {
            w.line(format!("Vars_{} vars;", tr.id));
        } else {
            w.line(format!("Vars_{} vars({});", tr.id, args.join(", ")));
        }
        w.line(format!("transition_user_fn_{}(ctx, vars);", tr.id));
    }

    // 6. Produce.
    for edge in tr.outputs_in_order() {
        send_token(cx, w, em, &mut lock, net, "n", edge)?;
    }
    if net.autohalt {
        lock.ensure_held(w);
        w.line("n->dec_running_transitions();");
    }

    // 7. Leave.
    lock.finish(w);
    for slot in 0..resolved.slots.len() {
        w.line(format!("delete token_{slot};"));
    }
    halt_check(w, net);
    w.line("return CA_TRANSITION_FIRED;");
    Ok(())
}

fn halt_check(w: &mut CodeWriter, net: &Net) {
    if net.is_module {
        w.if_line("ctx.get_halt_flag()", "thread->halt(net);");
    }
}

fn packing_var(edge: &Edge) -> CodegenResult<&str> {
    edge.packing_var()
        .ok_or_else(|| CodegenError::InvalidExpression {
            message: "a packing edge must name a variable".into(),
            origin: Origin::part(edge.id, "expr"),
        })
}

// ══════════════════════════════════════════════════════════════════════════════
// Subnet finalizer
// ══════════════════════════════════════════════════════════════════════════════

/// Completion of a subnet-spawning transition, called by the runtime once
/// the module instance has finished.
fn emit_finalizer(cx: &Ctx<'_, '_>, w: &mut CodeWriter, net: &Net, tr: &Transition) -> CodegenResult<()> {
    let Some(subnet_id) = tr.subnet else {
        return Ok(());
    };
    let subnet = cx.project.net(subnet_id)?;
    w.function_begin(format!(
        "void transition_finalizer_{0}(CaThread *thread, Net_{1} *n, Net_{2} *subnet, Tokens_{0} *tokens)",
        tr.id, net.id, subnet.id
    ));
    w.line("CaContext ctx(thread, n);");

    let resolved = ResolvedPlan::resolve(net, tr, cx.plans.plan_for(tr.id))?;
    let mut em = cx.emitter();
    bind_access(&mut em, &resolved, tr, "tokens->token_")?;
    for edge in tr.packing_inputs() {
        let var = packing_var(edge)?;
        let place = net
            .place(edge.place)
            .ok_or(LookupError::UnknownPlace(edge.place))?;
        em.bind(var, format!("tokens->var_{var}"), Some(Type::array(place.ty.clone())));
    }

    // Module outputs shadow the parent's own bindings.
    let mut required = Vec::new();
    for edge in &subnet.interface.outputs {
        let place = subnet
            .place(edge.place)
            .ok_or(LookupError::UnknownPlace(edge.place))?;
        let origin = Origin::part(edge.id, "expr");
        if edge.is_packing() {
            let var = edge.packing_var().ok_or_else(|| CodegenError::InvalidInterface {
                message: "a packing interface edge must name a variable".into(),
                origin: origin.clone(),
            })?;
            em.bind(
                var,
                format!("subnet->place_{}.to_vector()", place.id),
                Some(Type::array(place.ty.clone())),
            );
        } else {
            let var = edge.expr.as_var().ok_or_else(|| CodegenError::InvalidInterface {
                message: "an interface edge must be a single variable".into(),
                origin: origin.clone(),
            })?;
            em.bind(
                var,
                format!("subnet->place_{}.first_value()", place.id),
                Some(place.ty.clone()),
            );
            required.push(format!("subnet->place_{}.is_empty()", place.id));
        }
    }
    if !required.is_empty() {
        w.if_begin(required.join(" || "));
        let message = format!("Token in output places of module {} not found", subnet.name);
        w.line(format!("fprintf(stderr, \"%s\\n\", {});", string_literal(&message)));
        w.line("exit(-1);");
        w.block_end();
    }

    let mut lock = NetLock::declare(w, "n", "lock", false);
    for edge in tr.outputs_in_order() {
        send_token(cx, w, &em, &mut lock, net, "n", edge)?;
    }
    if net.autohalt {
        lock.ensure_held(w);
        w.line("n->dec_running_transitions();");
    }
    lock.finish(w);
    for slot in 0..resolved.slots.len() {
        w.line(format!("delete tokens->token_{slot};"));
    }
    w.line("delete tokens;");
    w.function_end();
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Output production
// ══════════════════════════════════════════════════════════════════════════════

/// Produce the token(s) of one output edge into `net_var`, an instance of
/// `target_net`.
fn send_token(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    em: &ExprEmitter<'_, '_>,
    lock: &mut NetLock,
    target_net: &Net,
    net_var: &str,
    edge: &Edge,
) -> CodegenResult<()> {
    let guarded = match &edge.guard {
        Some(guard) => {
            let code = em.emit(guard, Some(&Type::Bool), &Origin::part(edge.id, "guard"))?;
            w.if_begin(code);
            Some(lock.state())
        }
        None => None,
    };

    match edge.addressing {
        Addressing::Local => {
            lock.ensure_held(w);
            local_add(w, em, target_net, net_var, edge)?;
        }
        Addressing::Unicast => {
            lock.ensure_released(w);
            let target = target_code(em, edge, &Type::Int)?;
            w.line(format!("int target_{} = {target};", edge.id));
            w.if_begin(format!("target_{} == thread->get_process_id()", edge.id));
            let before = lock.state();
            lock.ensure_held(w);
            local_add(w, em, target_net, net_var, edge)?;
            let local = lock.state();
            w.else_branch();
            lock.restore(before);
            remote_send(cx, w, em, target_net, net_var, edge, false)?;
            w.block_end();
            lock.merge(local);
        }
        Addressing::Multicast => {
            lock.ensure_released(w);
            w.block_begin();
            let target = target_code(em, edge, &Type::array(Type::Int))?;
            w.line(format!("std::vector<int > target_{} = {target};", edge.id));
            remote_send(cx, w, em, target_net, net_var, edge, true)?;
            w.block_end();
        }
    }

    if let Some(before) = guarded {
        w.block_end();
        lock.merge(before);
    }
    Ok(())
}

fn target_code(em: &ExprEmitter<'_, '_>, edge: &Edge, ty: &Type) -> CodegenResult<String> {
    let origin = Origin::part(edge.id, "target");
    let target = edge
        .target
        .as_ref()
        .ok_or_else(|| CodegenError::InvalidExpression {
            message: "a remote edge needs a target expression".into(),
            origin: origin.clone(),
        })?;
    em.emit(target, Some(ty), &origin)
}

fn local_add(
    w: &mut CodeWriter,
    em: &ExprEmitter<'_, '_>,
    target_net: &Net,
    net_var: &str,
    edge: &Edge,
) -> CodegenResult<()> {
    let place = target_net
        .place(edge.place)
        .ok_or(LookupError::UnknownPlace(edge.place))?;
    let origin = Origin::part(edge.id, "expr");
    if edge.is_packing() {
        let seq = Type::array(place.ty.clone());
        let code = em.emit(&edge.expr, Some(&seq), &origin)?;
        w.line(format!("{net_var}->place_{}.add_all({code});", place.id));
    } else {
        let code = em.emit(&edge.expr, Some(&place.ty), &origin)?;
        w.line(format!("{net_var}->place_{}.add({code});", place.id));
    }
    for pos in target_net.transitions_out(place.id) {
        w.line(format!("{net_var}->activate_transition_by_pos_id({pos});"));
    }
    Ok(())
}

/// Serialize and send; runs with the net released. The target is already
/// in `target_<edge id>`.
fn remote_send(
    cx: &Ctx<'_, '_>,
    w: &mut CodeWriter,
    em: &ExprEmitter<'_, '_>,
    target_net: &Net,
    net_var: &str,
    edge: &Edge,
    multicast: bool,
) -> CodegenResult<()> {
    let place = target_net
        .place(edge.place)
        .ok_or(LookupError::UnknownPlace(edge.place))?;
    let pos = target_net
        .place_pos(edge.place)
        .ok_or(LookupError::UnknownPlace(edge.place))?;
    let origin = Origin::part(edge.id, "expr");
    let codecs = cx.codecs;
    let target = format!("target_{}", edge.id);

    if edge.is_packing() {
        let seq = Type::array(place.ty.clone());
        let code = em.emit(&edge.expr, Some(&seq), &origin)?;
        w.line(format!("{} values = {code};", codecs.cpp_type(&seq)?));
        w.line("size_t size = 0;");
        w.for_index("i", "values.size()");
        w.line(format!(
            "size += {};",
            codecs.size_code(&place.ty, "values[i]", &origin)?
        ));
        w.block_end();
        w.line("CaPacker packer(size, CA_RESERVED_PREFIX);");
        w.for_index("i", "values.size()");
        w.line(codecs.pack_code(&place.ty, "packer", "values[i]", &origin)?);
        w.block_end();
        let call = if multicast { "multisend_multicast" } else { "multisend" };
        w.line(format!(
            "thread->{call}({target}, {net_var}, {pos}, values.size(), packer);"
        ));
    } else {
        let code = em.emit(&edge.expr, Some(&place.ty), &origin)?;
        w.line(format!("{} value = {code};", codecs.cpp_type(&place.ty)?));
        w.line(format!(
            "CaPacker packer({}, CA_RESERVED_PREFIX);",
            codecs.size_code(&place.ty, "value", &origin)?
        ));
        w.line(codecs.pack_code(&place.ty, "packer", "value", &origin)?);
        let call = if multicast { "send_multicast" } else { "send" };
        w.line(format!("thread->{call}({target}, {net_var}, {pos}, packer);"));
    }
    Ok(())
}
