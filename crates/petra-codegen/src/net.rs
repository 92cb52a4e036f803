//! Net assembly: one class and one group of functions per net.
//!
//! Declarations come first for every net (place initializers, transition
//! helper structs, the net class with its report and receive routines),
//! then the definitions (spawn routine and per-transition functions), so a
//! finalizer can name the class of the module it reconciles.

use petra_types::{LookupError, Net, Origin, Place, Type};

use crate::compiler::Ctx;
use crate::error::CodegenResult;
use crate::fire;
use crate::source_map::{FragmentKind, Fragments};
use crate::writer::CodeWriter;

// ══════════════════════════════════════════════════════════════════════════════
// Class
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn emit_net_class(
    cx: &Ctx<'_, '_>,
    frags: &mut Fragments,
    w: &mut CodeWriter,
    net: &Net,
) -> CodegenResult<()> {
    tracing::debug!(net = net.id, name = %net.name, "emitting net class");
    for place in &net.places {
        if let Some(code) = &place.init_code {
            let func = format!("place_user_fn_{}", place.id);
            let cpp = cx.codecs.cpp_type(&place.ty)?;
            frags.write_function(
                w,
                &func,
                &format!("void {func}(CaContext &ctx, std::vector<{cpp} > &tokens)"),
                code,
                FragmentKind::PlaceInit,
                Origin::part(place.id, "init_function"),
            );
        }
    }
    for tr in &net.transitions {
        fire::emit_transition_decls(cx, w, net, tr)?;
    }
    w.emptyline();

    let class = format!("Net_{}", net.id);
    w.class_begin(&class, Some("CaNet"));
    w.line(format!(
        "{class}(int id, int main_process_id, CaNetDef *def, CaThread *thread, CaNet *parent_net)"
    ));
    w.line("\t: CaNet(id, main_process_id, def, thread, parent_net) {}");
    w.emptyline();
    for place in &net.places {
        w.line(format!(
            "CaPlace<{} > place_{};",
            cx.codecs.cpp_type(&place.ty)?,
            place.id
        ));
    }
    w.emptyline();
    emit_report(cx, w, net)?;
    emit_receive(cx, w, net)?;
    w.class_end();
    w.emptyline();
    Ok(())
}

/// Current tokens of every place and the enabled transitions, in the
/// runtime's tagged-element form.
fn emit_report(cx: &Ctx<'_, '_>, w: &mut CodeWriter, net: &Net) -> CodegenResult<()> {
    w.function_begin("void write_reports_content(CaThread *thread, CaOutput &output)");
    for place in &net.places {
        let cpp = cx.codecs.cpp_type(&place.ty)?;
        w.line("output.child(\"place\");");
        w.line(format!("output.set(\"id\", {});", place.id));
        w.block_begin();
        w.line(format!("CaToken<{cpp} > *t = place_{}.begin();", place.id));
        w.if_begin("t");
        w.do_begin();
        w.line("output.child(\"token\");");
        w.line(format!(
            "output.set(\"value\", {});",
            cx.codecs.as_string_code(&place.ty, "t->element")?
        ));
        w.line("output.back();");
        w.line("t = t->next;");
        w.do_end(format!("t != place_{}.begin()", place.id));
        w.block_end();
        w.block_end();
        w.line("output.back();");
    }
    for tr in &net.transitions {
        w.if_begin(format!("enable_check_{}(thread, this)", tr.id));
        w.line("output.child(\"enabled\");");
        w.line(format!("output.set(\"id\", {});", tr.id));
        w.line("output.back();");
        w.block_end();
    }
    w.block_end();
    Ok(())
}

/// Decode an inbound token into the place at `place_pos`.
fn emit_receive(cx: &Ctx<'_, '_>, w: &mut CodeWriter, net: &Net) -> CodegenResult<()> {
    let targeted = cx.project.remotely_targeted_places();
    w.function_begin("void receive(int place_pos, CaUnpacker &unpacker)");
    w.switch_begin("place_pos");
    for (pos, place) in net.places.iter().enumerate() {
        if !targeted.contains(&place.id) {
            continue;
        }
        // Blame the edge that sends here, not the place.
        let origin = cx
            .project
            .remote_edges()
            .find(|e| e.place == place.id)
            .map_or_else(|| Origin::part(place.id, "receive"), |e| Origin::part(e.id, "expr"));
        w.case_begin(pos.to_string());
        w.line(format!(
            "place_{}.add({});",
            place.id,
            cx.codecs.unpack_code(&place.ty, "unpacker", &origin)?
        ));
        for tr_pos in net.transitions_out(place.id) {
            w.line(format!("this->activate_transition_by_pos_id({tr_pos});"));
        }
        w.case_end();
    }
    w.line("default:");
    w.line(format!(
        "\tfprintf(stderr, \"Net_{}: invalid place index %i in receive\\n\", place_pos);",
        net.id
    ));
    w.line("\texit(-1);");
    w.block_end();
    w.block_end();
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Functions
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn emit_net_functions(
    cx: &Ctx<'_, '_>,
    frags: &mut Fragments,
    w: &mut CodeWriter,
    net: &Net,
) -> CodegenResult<()> {
    emit_spawn(cx, w, net)?;
    for tr in &net.transitions {
        fire::emit_transition(cx, frags, w, net, tr)?;
    }
    Ok(())
}

/// Allocate an instance and seed initialized places on the locations that
/// own them.
fn emit_spawn(cx: &Ctx<'_, '_>, w: &mut CodeWriter, net: &Net) -> CodegenResult<()> {
    let em = cx.emitter();
    let locations = Type::array(Type::Int);
    w.function_begin(format!(
        "CaNet * spawn_{}(CaThread *thread, CaNetDef *def, int id, CaNet *parent_net)",
        net.id
    ));
    w.line(format!(
        "Net_{0} *net = new Net_{0}(id, id % thread->get_process_count(), def, thread, parent_net);",
        net.id
    ));
    w.line("CaContext ctx(thread, net);");
    w.line("int pid = thread->get_process_id();");
    for area in &net.areas {
        let code = em.emit(&area.expr, Some(&locations), &Origin::part(area.id, "expr"))?;
        w.line(format!("std::vector<int > area_{} = {code};", area.id));
    }
    for place in net.places.iter().filter(|p| p.has_initializer()) {
        w.if_begin(seed_condition(net, place)?);
        if let Some(init) = &place.init_expr {
            let ty = Type::array(place.ty.clone());
            let code = em.emit(init, Some(&ty), &Origin::part(place.id, "init_expr"))?;
            w.line(format!("net->place_{}.add_all({code});", place.id));
        }
        if place.init_code.is_some() {
            w.block_begin();
            w.line(format!(
                "std::vector<{} > tokens;",
                cx.codecs.cpp_type(&place.ty)?
            ));
            w.line(format!("place_user_fn_{}(ctx, tokens);", place.id));
            w.line(format!("net->place_{}.add_all(tokens);", place.id));
            w.block_end();
        }
        w.block_end();
    }
    w.line("return net;");
    w.function_end();
    Ok(())
}

/// Unrestricted places seed on the net's main location; area-restricted
/// ones on every location listed by all of their areas.
fn seed_condition(net: &Net, place: &Place) -> CodegenResult<String> {
    if place.areas.is_empty() {
        return Ok("pid == net->get_main_process_id()".to_string());
    }
    let mut conditions = Vec::with_capacity(place.areas.len());
    for area_id in &place.areas {
        if net.area(*area_id).is_none() {
            return Err(LookupError::UnknownArea(*area_id).into());
        }
        conditions.push(format!(
            "std::find(area_{0}.begin(), area_{0}.end(), pid) != area_{0}.end()",
            area_id
        ));
    }
    Ok(conditions.join(" && "))
}
