//! Model validator: collects every model error before generation starts.
//!
//! Entry point: [`Validator::check`].
//!
//! Error codes emitted:
//! - E100: unknown extern type
//! - E200: disabled transport on a remote edge
//! - E201: custom transport without codec bodies
//! - E300/E301/E302: unknown place / net / area
//! - E303: malformed module interface edge
//! - E304: unicast or multicast edge without a target
//! - E305: edge listed on the wrong side of its transition
//! - E306: packing input edge that is not a single variable
//! - E307: subnet that is not a module
//! - E308: duplicate id
//! - E400–E404: match plan inconsistencies

use std::collections::{BTreeMap, BTreeSet};

use petra_types::{
    Access, Addressing, CompileErrors, Direction, Edge, ErrorCode, Instruction, ModelError, Net,
    Origin, PlanTable, Project, TransportMode, Transition, Type,
};

// ══════════════════════════════════════════════════════════════════════════════
// Validator
// ══════════════════════════════════════════════════════════════════════════════

/// Walks a [`Project`] and its [`PlanTable`] and records what generation
/// would trip over.
pub struct Validator<'a> {
    project: &'a Project,
    plans: &'a PlanTable,
    errors: &'a mut CompileErrors,
}

impl<'a> Validator<'a> {
    pub fn new(project: &'a Project, plans: &'a PlanTable, errors: &'a mut CompileErrors) -> Self {
        Self {
            project,
            plans,
            errors,
        }
    }

    /// Validate the whole project.
    pub fn check(&mut self) {
        let project = self.project;
        if project.nets.is_empty() {
            self.errors.push_error(
                ModelError::unlocated(ErrorCode::UNKNOWN_NET, "project has no nets")
                    .with_suggestion("The first net of the project is spawned at startup"),
            );
            return;
        }
        self.check_ids();
        self.check_extern_types();
        self.check_type_uses();
        for net in &project.nets {
            self.check_net(net);
        }
        self.check_transport();
        self.check_plans();
    }

    fn error(&mut self, code: ErrorCode, message: impl Into<String>, origin: Origin) {
        self.errors.push_error(ModelError::new(code, message, origin));
    }

    // ══════════════════════════════════════════════════════════════════════
    // Project-level
    // ══════════════════════════════════════════════════════════════════════

    /// Generated identifiers embed element ids: nets, places and transitions
    /// must be unique across the project.
    fn check_ids(&mut self) {
        let mut nets = BTreeSet::new();
        let mut places = BTreeSet::new();
        let mut transitions = BTreeSet::new();
        let mut duplicates = Vec::new();
        for net in &self.project.nets {
            if !nets.insert(net.id) {
                duplicates.push(("net", net.id));
            }
            for place in &net.places {
                if !places.insert(place.id) {
                    duplicates.push(("place", place.id));
                }
            }
            for tr in &net.transitions {
                if !transitions.insert(tr.id) {
                    duplicates.push(("transition", tr.id));
                }
            }
        }
        for (kind, id) in duplicates {
            self.error(
                ErrorCode::DUPLICATE_ID,
                format!("{kind} id {id} is used more than once"),
                Origin::element(id),
            );
        }
    }

    fn check_extern_types(&mut self) {
        for ext in &self.project.extern_types {
            let missing = ext.missing_custom_bodies();
            if !missing.is_empty() {
                self.errors.push_error(
                    ModelError::new(
                        ErrorCode::CUSTOM_CODEC_MISSING,
                        format!(
                            "extern type '{}' uses custom transport but has no {} code",
                            ext.name,
                            missing.join("/")
                        ),
                        Origin::element(ext.id),
                    )
                    .with_suggestion("Provide getsize, pack and unpack bodies or choose another transport"),
                );
            }
            if ext.transport == TransportMode::Direct && ext.raw_size.is_none() {
                self.error(
                    ErrorCode::TYPE_MISMATCH,
                    format!("extern type '{}' is copied raw but has no size", ext.name),
                    Origin::part(ext.id, "raw_size"),
                );
            }
        }
    }

    fn check_type_uses(&mut self) {
        let mut unknown = Vec::new();
        for (origin, ty) in self.project.type_uses() {
            for name in ty.extern_names() {
                if self.project.extern_type(name).is_err() {
                    unknown.push((origin.clone(), name.to_string()));
                }
            }
        }
        for (origin, name) in unknown {
            self.error(ErrorCode::UNKNOWN_TYPE, format!("unknown type '{name}'"), origin);
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Net structure
    // ══════════════════════════════════════════════════════════════════════

    fn check_net(&mut self, net: &Net) {
        for place in &net.places {
            for area in &place.areas {
                if net.area(*area).is_none() {
                    self.error(
                        ErrorCode::UNKNOWN_AREA,
                        format!("place '{}' refers to unknown area {area}", place.name),
                        Origin::part(place.id, "areas"),
                    );
                }
            }
        }
        for tr in &net.transitions {
            self.check_transition(net, tr);
        }
        if net.is_module {
            self.check_interface(net);
        } else if !net.interface.inputs.is_empty() || !net.interface.outputs.is_empty() {
            self.error(
                ErrorCode::INVALID_INTERFACE_EXPR,
                format!("net '{}' has interface edges but is not a module", net.name),
                Origin::element(net.id),
            );
        }
    }

    fn check_transition(&mut self, net: &Net, tr: &Transition) {
        for edge in &tr.inputs {
            if edge.direction != Direction::Input {
                self.error(
                    ErrorCode::EDGE_DIRECTION,
                    format!("output edge {} is listed as an input of '{}'", edge.id, tr.name),
                    edge.origin(),
                );
            }
            if edge.is_packing() && edge.packing_var().is_none() {
                self.error(
                    ErrorCode::PACKING_EXPR,
                    "a packing input edge must name a single variable",
                    Origin::part(edge.id, "expr"),
                );
            }
            self.check_edge_place(net, edge);
        }
        for edge in &tr.outputs {
            if edge.direction != Direction::Output {
                self.error(
                    ErrorCode::EDGE_DIRECTION,
                    format!("input edge {} is listed as an output of '{}'", edge.id, tr.name),
                    edge.origin(),
                );
            }
            self.check_edge_place(net, edge);
            self.check_target(edge);
        }
        if let Some(subnet) = tr.subnet {
            let project = self.project;
            match project.net(subnet) {
                Ok(subnet) if !subnet.is_module => self.error(
                    ErrorCode::SUBNET_NOT_MODULE,
                    format!("transition '{}' spawns '{}', which is not a module", tr.name, subnet.name),
                    Origin::part(tr.id, "subnet"),
                ),
                Ok(_) => {}
                Err(err) => self.error(ErrorCode::UNKNOWN_NET, err.to_string(), Origin::part(tr.id, "subnet")),
            }
        }
    }

    fn check_edge_place(&mut self, net: &Net, edge: &Edge) {
        if net.place(edge.place).is_none() {
            self.error(
                ErrorCode::UNKNOWN_PLACE,
                format!("edge {} refers to place {}, which net '{}' does not have", edge.id, edge.place, net.name),
                edge.origin(),
            );
        }
    }

    fn check_target(&mut self, edge: &Edge) {
        if edge.addressing != Addressing::Local && edge.target.is_none() {
            self.error(
                ErrorCode::MISSING_TARGET,
                "a unicast or multicast edge needs a target expression",
                Origin::part(edge.id, "target"),
            );
        }
    }

    /// Interface inputs seed the module's places; interface outputs are read
    /// back into variables of the spawning transition.
    fn check_interface(&mut self, net: &Net) {
        for edge in &net.interface.inputs {
            self.check_edge_place(net, edge);
            self.check_target(edge);
        }
        for edge in &net.interface.outputs {
            self.check_edge_place(net, edge);
            let named = if edge.is_packing() {
                edge.packing_var().is_some()
            } else {
                edge.expr.as_var().is_some()
            };
            if !named {
                self.error(
                    ErrorCode::INVALID_INTERFACE_EXPR,
                    "an interface output edge must be a single variable",
                    Origin::part(edge.id, "expr"),
                );
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Transport
    // ══════════════════════════════════════════════════════════════════════

    /// Every value reaching a place over a remote edge is serialized.
    fn check_transport(&mut self) {
        let mut disabled = Vec::new();
        for edge in self.project.remote_edges() {
            let Ok((_, place)) = self.project.find_place(edge.place) else {
                continue;
            };
            for name in place.ty.extern_names() {
                let off = self
                    .project
                    .extern_type(name)
                    .is_ok_and(|ext| ext.transport == TransportMode::Disabled);
                if off {
                    disabled.push((edge.id, name.to_string()));
                }
            }
        }
        for (edge, name) in disabled {
            self.errors.push_error(
                ModelError::new(
                    ErrorCode::TRANSPORT_DISABLED,
                    format!("transport of type '{name}' is disabled"),
                    Origin::part(edge, "expr"),
                )
                .with_suggestion("Make the edge local or enable direct or custom transport"),
            );
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Match plans
    // ══════════════════════════════════════════════════════════════════════

    fn check_plans(&mut self) {
        let project = self.project;
        let mut orphans = Vec::new();
        for (id, _) in self.plans.iter() {
            if project.find_transition(id).is_err() {
                orphans.push(id);
            }
        }
        for id in orphans {
            self.error(
                ErrorCode::PLAN_UNKNOWN_EDGE,
                format!("match plan for unknown transition {id}"),
                Origin::part(id, "plan"),
            );
        }
        for net in &project.nets {
            for tr in &net.transitions {
                self.check_plan(net, tr);
            }
        }
    }

    fn check_plan(&mut self, net: &Net, tr: &Transition) {
        let plans = self.plans;
        let plan = plans.plan_for(tr.id);
        let origin = Origin::part(tr.id, "plan");

        let mut matched = BTreeSet::new();
        let mut slot_types: Vec<Option<&Type>> = Vec::with_capacity(plan.matches.len());
        for m in &plan.matches {
            let edge = tr.input(m.edge).filter(|e| e.is_normal());
            match edge {
                Some(edge) => {
                    if !matched.insert(edge.id) {
                        self.error(
                            ErrorCode::PLAN_EDGE_REPEATED,
                            format!("edge {} is matched more than once", edge.id),
                            origin.clone(),
                        );
                    }
                    slot_types.push(net.place(edge.place).map(|p| &p.ty));
                }
                None => {
                    self.error(
                        ErrorCode::PLAN_UNKNOWN_EDGE,
                        format!("edge {} is not a normal input edge of '{}'", m.edge, tr.name),
                        origin.clone(),
                    );
                    slot_types.push(None);
                }
            }
            for instr in &m.instructions {
                if let Instruction::Check { path, .. } = instr {
                    let valid = slot_types
                        .last()
                        .copied()
                        .flatten()
                        .is_some_and(|ty| ty.project(path).is_some());
                    if !valid {
                        self.error(
                            ErrorCode::PLAN_INVALID_ACCESS,
                            format!("check on edge {} reads a component that does not exist", m.edge),
                            origin.clone(),
                        );
                    }
                }
            }
        }

        for edge in tr.normal_inputs() {
            if !matched.contains(&edge.id) {
                self.error(
                    ErrorCode::PLAN_EDGE_UNMATCHED,
                    format!("input edge {} is never matched", edge.id),
                    origin.clone(),
                );
            }
        }

        if plan.init.iter().any(|i| matches!(i, Instruction::Check { .. })) {
            self.error(
                ErrorCode::PLAN_INVALID_INSTRUCTION,
                "token checks cannot run before any edge is matched",
                origin.clone(),
            );
        }

        let mut bad_access: BTreeMap<&str, String> = BTreeMap::new();
        for (name, access) in &plan.access {
            if let Access::Token { slot, path } = access {
                match slot_types.get(*slot) {
                    None => {
                        bad_access.insert(name.as_str(), format!("slot {slot} is out of range"));
                    }
                    Some(Some(ty)) if ty.project(path).is_none() => {
                        bad_access.insert(
                            name.as_str(),
                            format!("slot {slot} has no component at {path:?}"),
                        );
                    }
                    Some(_) => {}
                }
            }
        }
        for (name, reason) in bad_access {
            self.error(
                ErrorCode::PLAN_INVALID_ACCESS,
                format!("variable '{name}': {reason}"),
                origin.clone(),
            );
        }
    }
}
