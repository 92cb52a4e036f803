//! Integration tests for the Petra C++ code generator.
//!
//! Tests validate:
//! - Match skeleton shape (count guards, cursor loops, exclusion, unwinding)
//! - Firing effects and lock discipline
//! - Remote sends, receive dispatch and transport errors
//! - Subnet spawn and finalizer wiring
//! - Net class, report and spawn routines
//! - Deterministic output (same input → same text)

use std::collections::BTreeMap;

use petra_codegen::source_map::FragmentKind;
use petra_codegen::{generate, generate_with_options, CodegenError, CodegenOptions};
use petra_types::{
    Access, Addressing, Area, BinaryOp, Direction, Edge, EdgeKind, EdgeMatch, Expr, ExternCode,
    ExternType, Instruction, Interface, MatchPlan, Net, Place, PlanTable, Project, Transition,
    TransportMode, Type,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

const P: u32 = 101;
const Q: u32 = 102;

fn edge(id: u32, place: u32, direction: Direction, expr: Expr) -> Edge {
    Edge {
        id,
        place,
        direction,
        kind: EdgeKind::Normal,
        expr,
        guard: None,
        target: None,
        addressing: Addressing::Local,
    }
}

fn input(id: u32, place: u32, var: &str) -> Edge {
    edge(id, place, Direction::Input, Expr::var(var))
}

fn output(id: u32, place: u32, expr: Expr) -> Edge {
    edge(id, place, Direction::Output, expr)
}

fn place(id: u32, ty: Type) -> Place {
    Place {
        id,
        name: format!("p{id}"),
        ty,
        init_expr: None,
        init_code: None,
        areas: Vec::new(),
    }
}

fn transition(id: u32, inputs: Vec<Edge>, outputs: Vec<Edge>) -> Transition {
    Transition {
        id,
        name: format!("t{id}"),
        inputs,
        outputs,
        subnet: None,
        code: None,
        context: BTreeMap::new(),
    }
}

fn net(id: u32, places: Vec<Place>, transitions: Vec<Transition>) -> Net {
    Net {
        id,
        name: format!("net{id}"),
        places,
        transitions,
        areas: Vec::new(),
        interface: Interface::default(),
        is_local: false,
        is_module: false,
        autohalt: false,
    }
}

fn project(nets: Vec<Net>) -> Project {
    Project {
        name: "test".into(),
        description: "generated by tests".into(),
        nets,
        parameters: Vec::new(),
        extern_types: Vec::new(),
        functions: Vec::new(),
    }
}

/// A plan matching `edges` in order, binding `vars[i]` to the whole token of
/// slot `i`.
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
            .map(|(slot, var)| (var.to_string(), Access::token(slot, [])))
            .collect(),
    }
}

fn plans(entries: Vec<(u32, MatchPlan)>) -> PlanTable {
    entries.into_iter().collect()
}

/// P (int) --x--> T [x > 0] --x*2--> Q (int)
fn scenario() -> (Project, PlanTable) {
    let mut consume = input(20, P, "x");
    consume.guard = Some(Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::Int(0)));
    let produce = output(
        21,
        Q,
        Expr::binary(BinaryOp::Mul, Expr::var("x"), Expr::Int(2)),
    );
    let mut t = transition(10, vec![consume], vec![produce]);
    t.context.insert("x".into(), Type::Int);
    let mut p = place(P, Type::Int);
    p.init_expr = Some(Expr::Array(vec![Expr::Int(3), Expr::Int(-1)]));
    let project = project(vec![net(1, vec![p, place(Q, Type::Int)], vec![t])]);
    (project, plans(vec![(10, plan(&[20], &["x"]))]))
}

fn generate_source(project: &Project, plans: &PlanTable) -> String {
    generate(project, plans)
        .unwrap_or_else(|e| panic!("codegen failed: {e}"))
        .source
}

/// Text of the function definition starting with `head`.
fn function<'a>(source: &'a str, head: &str) -> &'a str {
    let start = source
        .find(&format!("{head}\n{{"))
        .unwrap_or_else(|| panic!("no definition of {head}"));
    let end = source[start..]
        .find("\n}\n")
        .map(|e| start + e + 3)
        .unwrap_or(source.len());
    &source[start..end]
}

fn position(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("`{needle}` not found in:\n{haystack}"))
}

// ══════════════════════════════════════════════════════════════════════════════
// Match skeleton
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_scenario_enable_matches_and_fires() {
    let (project, plans) = scenario();
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    assert!(enable.contains("if (n->place_101.size() < 1) { n->unlock(); return CA_NOT_ENABLED; }"));
    assert!(enable.contains("CaToken<int > *token_0 = n->place_101.begin();"));
    assert!(enable
        .contains("if (!((token_0->element > 0))) { token_0 = token_0->next; continue; }"));
    assert!(enable.contains("n->place_101.remove(token_0);"));
    assert!(enable.contains("n->activate_transition_by_pos_id(0);"));
    assert!(enable.contains("n->place_102.add((token_0->element * 2));"));
    assert!(enable.contains("delete token_0;"));
    assert!(enable.contains("return CA_TRANSITION_FIRED;"));
    assert!(enable.contains("} while (token_0 != n->place_101.begin());"));
}

#[test]
fn test_count_guard_precedes_any_binding() {
    let t = transition(10, vec![input(20, P, "x"), input(22, P, "y")], Vec::new());
    let project = project(vec![net(1, vec![place(P, Type::Int)], vec![t])]);
    let plans = plans(vec![(10, plan(&[20, 22], &["x", "y"]))]);
    let source = generate_source(&project, &plans);
    let check = function(&source, "bool enable_check_10(CaThread *thread, CaNet *net)");

    let guard = position(check, "if (n->place_101.size() < 2) { return false; }");
    let first_cursor = position(check, "CaToken<int > *token_0");
    assert!(guard < first_cursor);
}

#[test]
fn test_same_place_edges_exclude_each_other() {
    let t = transition(10, vec![input(20, P, "x"), input(22, P, "y")], Vec::new());
    let project = project(vec![net(1, vec![place(P, Type::Int)], vec![t])]);
    let plans = plans(vec![(10, plan(&[20, 22], &["x", "y"]))]);
    let source = generate_source(&project, &plans);
    let check = function(&source, "bool enable_check_10(CaThread *thread, CaNet *net)");

    assert!(check.contains("if (token_1 == token_0) { token_1 = token_1->next; continue; }"));
    // Unwinding closes the inner loop first.
    let inner = position(check, "} while (token_1 != n->place_101.begin());");
    let outer = position(check, "} while (token_0 != n->place_101.begin());");
    assert!(inner < outer);
}

#[test]
fn test_enable_check_touches_neither_places_nor_lock() {
    let (project, plans) = scenario();
    let source = generate_source(&project, &plans);
    let check = function(&source, "bool enable_check_10(CaThread *thread, CaNet *net)");

    assert!(check.contains("return true;"));
    for forbidden in ["remove(", "add(", "lock()", "unlock()", "activate_transition"] {
        assert!(!check.contains(forbidden), "enable_check contains {forbidden}");
    }
}

#[test]
fn test_plan_instructions_use_edge_continuation() {
    let t = transition(10, vec![input(20, P, "x")], Vec::new());
    let project = project(vec![net(
        1,
        vec![place(P, Type::tuple([Type::Int, Type::String]))],
        vec![t],
    )]);
    let mut plan = plan(&[20], &[]);
    plan.access.insert("key".into(), Access::token(0, [0]));
    plan.init.push(Instruction::Guard(Expr::Bool(true)));
    plan.matches[0].instructions = vec![Instruction::Check {
        path: vec![1],
        expr: Expr::Str("on".into()),
    }];
    let source = generate_source(&project, &plans(vec![(10, plan)]));
    let check = function(&source, "bool enable_check_10(CaThread *thread, CaNet *net)");

    assert!(check.contains("if (!(true)) { return false; }"));
    assert!(check.contains(
        "if (!(token_0->element.t1 == std::string(\"on\"))) { token_0 = token_0->next; continue; }"
    ));
}

#[test]
fn test_packing_limit_retries_innermost_edge() {
    let mut all = input(23, Q, "rest");
    all.kind = EdgeKind::Packing {
        limit: Some(Expr::Int(2)),
    };
    let mut t = transition(10, vec![input(20, P, "x"), all], Vec::new());
    t.context.insert("rest".into(), Type::array(Type::Int));
    let project = project(vec![net(
        1,
        vec![place(P, Type::Int), place(Q, Type::Int)],
        vec![t],
    )]);
    let source = generate_source(&project, &plans(vec![(10, plan(&[20], &["x"]))]));
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    assert!(enable
        .contains("if (n->place_102.size() < 0 + 2) { token_0 = token_0->next; continue; }"));
    assert!(enable.contains("std::vector<int > var_rest;"));
    assert!(enable.contains("var_rest = n->place_102.to_vector_and_clear();"));
}

#[test]
fn test_plan_with_foreign_edge_is_rejected() {
    let (project, _) = scenario();
    let err = generate(&project, &plans(vec![(10, plan(&[99], &[]))])).unwrap_err();
    assert!(matches!(err, CodegenError::InvalidPlan { .. }));
    assert!(err.to_string().starts_with("*10/plan:"));
}

#[test]
fn test_variable_read_before_its_edge_is_rejected() {
    let t = transition(10, vec![input(20, P, "x"), input(22, Q, "y")], Vec::new());
    let project = project(vec![net(
        1,
        vec![place(P, Type::Int), place(Q, Type::Int)],
        vec![t],
    )]);
    let mut plan = plan(&[20, 22], &["x", "y"]);
    plan.matches[0].instructions = vec![Instruction::Guard(Expr::binary(
        BinaryOp::Eq,
        Expr::var("x"),
        Expr::var("y"),
    ))];
    let err = generate(&project, &plans(vec![(10, plan)])).unwrap_err();
    assert!(matches!(err, CodegenError::InvalidPlan { .. }));
}

// ══════════════════════════════════════════════════════════════════════════════
// Firing effects and locking
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_plain_transition_keeps_lock_until_exit() {
    let (project, plans) = scenario();
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    assert!(enable.contains("bool lock = true;"));
    assert!(!enable.contains("n->lock();"));
    let add = position(enable, "n->place_102.add(");
    let release = add + position(&enable[add..], "n->unlock();");
    let delete = position(enable, "delete token_0;");
    assert!(add < release && release < delete);
}

#[test]
fn test_transition_without_inputs_reactivates_itself() {
    let reader = transition(10, vec![input(20, P, "x")], Vec::new());
    let source_only = transition(11, Vec::new(), vec![output(21, Q, Expr::Int(1))]);
    let project = project(vec![net(
        1,
        vec![place(P, Type::Int), place(Q, Type::Int)],
        vec![reader, source_only],
    )]);
    let plans = plans(vec![
        (10, plan(&[20], &["x"])),
        (11, MatchPlan::default()),
    ]);
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_11(CaThread *thread, CaNet *net)");

    let activate = position(enable, "n->activate_transition_by_pos_id(1);");
    let add = position(enable, "n->place_102.add(1);");
    assert!(activate < add);
    assert!(!enable.contains("activate_transition_by_pos_id(0);"));
}

#[test]
fn test_user_code_runs_unlocked() {
    let (mut project, plans) = scenario();
    project.nets[0].transitions[0].code = Some("var.x += 1;\n".into());
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    let unlock = position(enable, "n->unlock();\n");
    let call = position(enable, "transition_user_fn_10(ctx, vars);");
    let relock = position(enable, "n->lock();");
    let add = position(enable, "n->place_102.add(");
    assert!(unlock < call && call < relock && relock < add);
    assert!(enable.contains("Vars_10 vars(token_0->element);"));
    assert!(source.contains("struct Vars_10 {"));
    assert!(source.contains("void transition_user_fn_10(CaContext &ctx, Vars_10 &var)"));
}

#[test]
fn test_unbound_context_variable_is_left_for_user_code() {
    let (mut project, plans) = scenario();
    let t = &mut project.nets[0].transitions[0];
    t.code = Some("var.y = 7;\n".into());
    t.context.insert("y".into(), Type::Int);
    t.outputs[0].expr = Expr::var("y");
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    assert!(enable.contains("int var_y;"));
    assert!(enable.contains("Vars_10 vars(token_0->element, var_y);"));
    assert!(enable.contains("n->place_102.add(var_y);"));
}

#[test]
fn test_autohalt_counts_running_transitions() {
    let (mut project, plans) = scenario();
    project.nets[0].autohalt = true;
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    let inc = position(enable, "n->inc_running_transitions();");
    let dec = position(enable, "n->dec_running_transitions();");
    assert!(inc < dec);
}

#[test]
fn test_output_guard_wraps_production() {
    let (mut project, plans) = scenario();
    project.nets[0].transitions[0].outputs[0].guard =
        Some(Expr::binary(BinaryOp::Lt, Expr::var("x"), Expr::Int(10)));
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    let guard = position(enable, "if ((token_0->element < 10)) {");
    let add = position(enable, "n->place_102.add(");
    assert!(guard < add);
}

#[test]
fn test_module_net_checks_halt_flag() {
    let (mut project, plans) = scenario();
    project.nets[0].is_module = true;
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");
    assert!(enable.contains("if (ctx.get_halt_flag()) { thread->halt(net); }"));
}

// ══════════════════════════════════════════════════════════════════════════════
// Remote production and transport
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_unicast_send_and_receive() {
    let (mut project, plans) = scenario();
    let out = &mut project.nets[0].transitions[0].outputs[0];
    out.addressing = Addressing::Unicast;
    out.target = Some(Expr::Int(1));
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    let release = position(enable, "n->unlock();\n");
    let target = position(enable, "int target_21 = 1;");
    assert!(release < target);
    assert!(enable.contains("if (target_21 == thread->get_process_id()) {"));
    assert!(enable.contains("CaPacker packer(sizeof(int), CA_RESERVED_PREFIX);"));
    assert!(enable.contains("packer.pack_int(value);"));
    assert!(enable.contains("thread->send(target_21, n, 1, packer);"));
    // Only one branch re-locks, so the exit reads the flag.
    assert!(enable.contains("if (lock) { n->unlock(); }"));

    assert!(source.contains("case 1:"));
    assert!(source.contains("place_102.add(unpacker.unpack_int());"));
}

#[test]
fn test_multicast_packing_send() {
    let (mut project, plans) = scenario();
    let out = &mut project.nets[0].transitions[0].outputs[0];
    out.kind = EdgeKind::Packing { limit: None };
    out.expr = Expr::Array(vec![Expr::var("x"), Expr::var("x")]);
    out.addressing = Addressing::Multicast;
    out.target = Some(Expr::Array(vec![Expr::Int(0), Expr::Int(1)]));
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    assert!(enable.contains("std::vector<int > target_21 = std::vector<int >({0, 1});"));
    assert!(enable.contains("size += sizeof(int);"));
    assert!(enable.contains("thread->multisend_multicast(target_21, n, 1, values.size(), packer);"));
}

fn handle_project(addressing: Addressing) -> (Project, PlanTable) {
    let handle = Type::Extern("Handle".into());
    let mut out = output(21, Q, Expr::var("h"));
    out.addressing = addressing;
    out.target = Some(Expr::Int(0));
    let mut t = transition(10, vec![input(20, P, "h")], vec![out]);
    t.context.insert("h".into(), handle.clone());
    let mut project = project(vec![net(
        1,
        vec![place(P, handle.clone()), place(Q, handle)],
        vec![t],
    )]);
    project.extern_types.push(ExternType {
        id: 7,
        name: "Handle".into(),
        raw_type: "FILE *".into(),
        transport: TransportMode::Disabled,
        raw_size: None,
        code: ExternCode::default(),
    });
    (project, plans(vec![(10, plan(&[20], &["h"]))]))
}

#[test]
fn test_disabled_transport_names_type_and_edge() {
    let (project, plans) = handle_project(Addressing::Unicast);
    let err = generate(&project, &plans).unwrap_err();
    match &err {
        CodegenError::TransportDisabled { type_name, origin } => {
            assert_eq!(type_name, "Handle");
            assert_eq!(origin.element, 21);
        }
        other => panic!("expected TransportDisabled, got {other:?}"),
    }
    assert_eq!(err.to_string(), "*21/expr: transport of type 'Handle' is disabled");
}

#[test]
fn test_disabled_transport_is_fine_locally() {
    let (project, plans) = handle_project(Addressing::Local);
    let source = generate_source(&project, &plans);
    assert!(source.contains("CaPlace<FILE * > place_102;"));
    assert!(source.contains("output.set(\"value\", std::string(\"Handle\"));"));
}

#[test]
fn test_custom_extern_without_codecs_fails() {
    let (mut project, plans) = handle_project(Addressing::Local);
    project.extern_types[0].transport = TransportMode::Custom;
    project.extern_types[0].code.getsize = Some("return 8;".into());
    let err = generate(&project, &plans).unwrap_err();
    match err {
        CodegenError::CustomCodecMissing { missing, .. } => {
            assert_eq!(missing, vec!["pack", "unpack"]);
        }
        other => panic!("expected CustomCodecMissing, got {other:?}"),
    }
}

#[test]
fn test_custom_extern_codecs_are_emitted() {
    let (mut project, plans) = handle_project(Addressing::Unicast);
    let ext = &mut project.extern_types[0];
    ext.transport = TransportMode::Custom;
    ext.code.getsize = Some("return sizeof(int);".into());
    ext.code.pack = Some("packer.pack_int(fileno(obj));".into());
    ext.code.unpack = Some("return fdopen(unpacker.unpack_int(), \"r\");".into());
    let generated = generate(&project, &plans).unwrap();

    assert!(generated
        .source
        .contains("size_t Handle_getsize(const FILE * &obj)"));
    assert!(generated.source.contains("Handle_pack(packer, value);"));
    assert!(generated.source.contains("place_102.add(Handle_unpack(unpacker));"));
    let kinds: Vec<FragmentKind> = generated.source_map.entries.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FragmentKind::ExternCode; 3]);
}

#[test]
fn test_unknown_extern_is_fatal() {
    let (mut project, plans) = scenario();
    project.nets[0].places[1].ty = Type::Extern("Matrix".into());
    let err = generate(&project, &plans).unwrap_err();
    assert!(matches!(err, CodegenError::UnknownType { ref name, .. } if name == "Matrix"));
}

// ══════════════════════════════════════════════════════════════════════════════
// Subnets
// ══════════════════════════════════════════════════════════════════════════════

fn module_project() -> (Project, PlanTable) {
    let (mut project, plans) = scenario();
    let mut module = net(2, vec![place(201, Type::Int), place(202, Type::Int)], Vec::new());
    module.name = "worker".into();
    module.is_module = true;
    module.interface = Interface {
        inputs: vec![output(30, 201, Expr::var("x"))],
        outputs: vec![input(31, 202, "y")],
    };
    project.nets.push(module);
    let t = &mut project.nets[0].transitions[0];
    t.subnet = Some(2);
    t.context.insert("y".into(), Type::Int);
    t.outputs[0].expr = Expr::var("y");
    (project, plans)
}

#[test]
fn test_subnet_spawn_releases_lock_and_seeds_module() {
    let (project, plans) = module_project();
    let source = generate_source(&project, &plans);
    let enable = function(&source, "int enable_10(CaThread *thread, CaNet *net)");

    let release = position(enable, "n->unlock();\n");
    let spawn = position(enable, "Net_2 *subnet = (Net_2*) thread->spawn_net(1, net);");
    assert!(release < spawn);
    assert!(enable.contains("tokens->token_0 = token_0;"));
    assert!(enable.contains(
        "subnet->set_finalizer((CaNetFinalizerFn*) transition_finalizer_10, tokens);"
    ));
    assert!(enable.contains("subnet->place_201.add(token_0->element);"));
    assert!(enable.contains("return CA_TRANSITION_FIRED_WITH_MODULE;"));
    // The finalizer owns the tokens now.
    assert!(!enable.contains("delete token_0;"));
    assert!(source.contains("struct Tokens_10 {"));
}

#[test]
fn test_finalizer_checks_module_outputs() {
    let (project, plans) = module_project();
    let source = generate_source(&project, &plans);
    let finalizer = function(
        &source,
        "void transition_finalizer_10(CaThread *thread, Net_1 *n, Net_2 *subnet, Tokens_10 *tokens)",
    );

    let check = position(finalizer, "if (subnet->place_202.is_empty()) {");
    let abort = position(finalizer, "Token in output places of module worker not found");
    let add = position(finalizer, "n->place_102.add(subnet->place_202.first_value());");
    assert!(check < abort && abort < add);
    assert!(finalizer.contains("bool lock = false;"));
    assert!(finalizer.contains("delete tokens->token_0;"));
    assert!(finalizer.contains("delete tokens;"));
}

#[test]
fn test_invalid_interface_expression() {
    let (mut project, plans) = module_project();
    project.nets[1].interface.outputs[0].expr =
        Expr::binary(BinaryOp::Add, Expr::var("y"), Expr::Int(1));
    let err = generate(&project, &plans).unwrap_err();
    assert!(matches!(err, CodegenError::InvalidInterface { .. }));
    assert!(err.to_string().starts_with("*31/expr:"));
}

// ══════════════════════════════════════════════════════════════════════════════
// Net assembly
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_net_class_report_and_main() {
    let (project, plans) = scenario();
    let source = generate_source(&project, &plans);

    assert!(source.contains("class Net_1 : public CaNet {"));
    assert!(source.contains("CaPlace<int > place_101;"));
    assert!(source.contains("output.set(\"value\", ca_int_to_string(t->element));"));
    assert!(source.contains("if (enable_check_10(thread, this)) {"));
    assert!(source.contains("CaNetDef *def_1 = new CaNetDef(0, 1, 1, spawn_1, false, false);"));
    assert!(source.contains(
        "def_1->register_transition(0, 10, (CaEnableFn*) enable_10, enable_check_10);"
    ));
    assert!(source.contains("ca_init(argc, argv, 0, NULL, NULL, NULL);"));
    assert!(source.contains("ca_spawn_toplevel_net(0);"));
}

#[test]
fn test_spawn_seeds_initial_tokens() {
    let (project, plans) = scenario();
    let source = generate_source(&project, &plans);
    let spawn = function(
        &source,
        "CaNet * spawn_1(CaThread *thread, CaNetDef *def, int id, CaNet *parent_net)",
    );
    assert!(spawn.contains("if (pid == net->get_main_process_id()) {"));
    assert!(spawn.contains("net->place_101.add_all(std::vector<int >({3, (-1)}));"));
}

#[test]
fn test_area_restricted_seeding() {
    let (mut project, plans) = scenario();
    project.nets[0].areas.push(Area {
        id: 5,
        name: "left".into(),
        expr: Expr::Array(vec![Expr::Int(0), Expr::Int(2)]),
    });
    project.nets[0].places[0].areas = vec![5];
    let source = generate_source(&project, &plans);
    let spawn = function(
        &source,
        "CaNet * spawn_1(CaThread *thread, CaNetDef *def, int id, CaNet *parent_net)",
    );
    assert!(spawn.contains("std::vector<int > area_5 = std::vector<int >({0, 2});"));
    assert!(spawn.contains(
        "if (std::find(area_5.begin(), area_5.end(), pid) != area_5.end()) {"
    ));
}

#[test]
fn test_tuple_classes_precede_nets() {
    let (mut project, plans) = scenario();
    project.nets[0].places[1].ty = Type::tuple([Type::Int, Type::String]);
    project.nets[0].transitions[0].outputs[0].expr =
        Expr::Tuple(vec![Expr::var("x"), Expr::Str("doubled".into())]);
    let source = generate_source(&project, &plans);

    let class = position(&source, "class Tuple2_int_string {");
    let net = position(&source, "class Net_1 : public CaNet {");
    assert!(class < net);
    assert!(source.contains(
        "n->place_102.add(Tuple2_int_string(token_0->element, std::string(\"doubled\")));"
    ));
}

#[test]
fn test_line_directives_follow_options() {
    let (mut project, plans) = scenario();
    project.nets[0].transitions[0].code = Some("var.x += 1;\n".into());

    let with = generate(&project, &plans).unwrap();
    assert!(with.source.contains("#line 1 \"*10/function\""));
    assert!(with.source.contains("\"program.cpp\""));
    let entry = &with.source_map.entries[0];
    assert_eq!(entry.kind, FragmentKind::Transition);
    assert_eq!(entry.origin.element, 10);

    let options = CodegenOptions {
        line_directives: false,
        ..CodegenOptions::default()
    };
    let without = generate_with_options(&project, &plans, &options).unwrap();
    assert!(!without.source.contains("#line"));
}

#[test]
fn test_generation_is_deterministic() {
    let (project, plans) = module_project();
    let a = generate_source(&project, &plans);
    let b = generate_source(&project, &plans);
    assert_eq!(a, b);
}
