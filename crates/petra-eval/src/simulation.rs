//! Multi-process execution of a project.
//!
//! Every process holds a unit of every live instance. Local output lands in
//! the firing process's unit; unicast output aimed at another process and
//! all multicast output is encoded with the wire codec and queued as an
//! [`Envelope`], decoded again on delivery. Module instances complete when
//! user code halts them, or under autohalt once nothing in them can move;
//! their [`Finalizer`] then produces the spawning transition's outputs in
//! the parent.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use petra_types::{Addressing, Edge, LookupError, Net, PlanTable, Project, Transition, Type};

use crate::code::{Context, UserCode, Vars};
use crate::codec::{Packer, Unpacker, WireCodec};
use crate::env::Environment;
use crate::error::{EvalError, EvalResult};
use crate::evaluator::Evaluator;
use crate::instance::{Finalizer, Instance};
use crate::value::Value;

/// Runtime settings of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub process_count: usize,
    /// Values of the project parameters.
    pub parameters: BTreeMap<String, i32>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            process_count: 1,
            parameters: BTreeMap::new(),
        }
    }
}

/// Tokens in transit to a place of an instance on another process.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub process: usize,
    pub instance: u32,
    /// Position of the target place in its net.
    pub place_pos: usize,
    pub count: usize,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    NotEnabled,
    Fired,
    /// Fired and spawned the module instance with this id.
    FiredWithModule(u32),
}

/// Everything a simulation reads but never changes.
#[derive(Debug)]
struct Model {
    project: Project,
    plans: PlanTable,
    code: UserCode,
    config: SimulationConfig,
}

impl Model {
    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.config.parameters, &self.code)
    }

    fn codec(&self) -> WireCodec<'_> {
        WireCodec::new(&self.project, self.code.codecs())
    }
}

fn transition(net: &Net, id: u32) -> EvalResult<(usize, &Transition)> {
    net.transitions
        .iter()
        .enumerate()
        .find(|(_, t)| t.id == id)
        .ok_or_else(|| LookupError::UnknownTransition(id).into())
}

#[derive(Debug)]
pub struct Simulation {
    model: Arc<Model>,
    instances: BTreeMap<u32, Instance>,
    next_instance: u32,
    outbox: VecDeque<Envelope>,
}

impl Simulation {
    /// Start a simulation with an instance of the project's first net.
    pub fn new(
        project: Project,
        plans: PlanTable,
        code: UserCode,
        config: SimulationConfig,
    ) -> EvalResult<Self> {
        let root = project
            .nets
            .first()
            .map(|net| net.id)
            .ok_or(EvalError::EmptyProject)?;
        let config = SimulationConfig {
            process_count: config.process_count.max(1),
            ..config
        };
        let mut sim = Self {
            model: Arc::new(Model {
                project,
                plans,
                code,
                config,
            }),
            instances: BTreeMap::new(),
            next_instance: 0,
            outbox: VecDeque::new(),
        };
        sim.spawn(root, None)?;
        Ok(sim)
    }

    pub fn project(&self) -> &Project {
        &self.model.project
    }

    pub fn process_count(&self) -> usize {
        self.model.config.process_count
    }

    pub fn instance(&self, id: u32) -> EvalResult<&Instance> {
        self.instances.get(&id).ok_or(EvalError::UnknownInstance(id))
    }

    fn instance_mut(&mut self, id: u32) -> EvalResult<&mut Instance> {
        self.instances.get_mut(&id).ok_or(EvalError::UnknownInstance(id))
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> + '_ {
        self.instances.values()
    }

    /// Messages not yet delivered.
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    /// Tokens of `place` in instance `instance` on `process`.
    pub fn tokens(&self, instance: u32, process: usize, place: u32) -> EvalResult<Vec<Value>> {
        self.instance(instance)?.unit(process)?.tokens(place)
    }

    /// Create an instance of `net` and seed its initial tokens.
    fn spawn(&mut self, net: u32, finalizer: Option<Finalizer>) -> EvalResult<u32> {
        let model = Arc::clone(&self.model);
        let net = model.project.net(net)?;
        let id = self.next_instance;
        self.next_instance += 1;

        let process_count = model.config.process_count;
        let mut instance = Instance::new(id, net, process_count, finalizer);
        instance.seed(&model.evaluator(), net, |place, process| {
            match model.code.place_init(place) {
                Some(init) => init.init(&mut Context::new(process, process_count)).map(Some),
                None => Ok(None),
            }
        })?;
        debug!(instance = id, net = net.id, name = %net.name, "spawned net");
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Whether `transition` is enabled in `instance` on `process`. Touches
    /// nothing.
    pub fn enable_check(&self, instance: u32, process: usize, transition_id: u32) -> EvalResult<bool> {
        let model = &self.model;
        let inst = self.instance(instance)?;
        let net = model.project.net(inst.net)?;
        let (_, tr) = transition(net, transition_id)?;
        let binding = inst.unit(process)?.find_binding(
            &model.evaluator(),
            net,
            tr,
            model.plans.plan_for(tr.id),
        )?;
        Ok(binding.is_some())
    }

    /// Fire `transition` in `instance` on `process` with its first binding.
    ///
    /// On error the instance, the outbox and the instance counter are put
    /// back as they were; only side effects of user code remain.
    pub fn fire(&mut self, instance: u32, process: usize, transition_id: u32) -> EvalResult<FireOutcome> {
        let snapshot = self.instance(instance)?.clone();
        let pending = self.outbox.len();
        let next_instance = self.next_instance;
        let outcome = self.fire_binding(instance, process, transition_id);
        if outcome.is_err() {
            self.instances.retain(|id, _| *id < next_instance);
            self.instances.insert(instance, snapshot);
            self.outbox.truncate(pending);
            self.next_instance = next_instance;
        }
        outcome
    }

    fn fire_binding(&mut self, instance: u32, process: usize, transition_id: u32) -> EvalResult<FireOutcome> {
        let model = Arc::clone(&self.model);
        let ev = model.evaluator();
        let inst = self.instance_mut(instance)?;
        if inst.halted {
            return Ok(FireOutcome::NotEnabled);
        }
        let net = model.project.net(inst.net)?;
        let (pos, tr) = transition(net, transition_id)?;
        let unit = inst.unit_mut(process)?;
        let Some(binding) = unit.find_binding(&ev, net, tr, model.plans.plan_for(tr.id))? else {
            unit.deactivate(pos);
            return Ok(FireOutcome::NotEnabled);
        };
        trace!(instance, process, transition = tr.id, "firing");

        // Consume.
        unit.consume(net, &binding)?;
        let mut vars: Vars = binding.vars;
        for edge in tr.packing_inputs() {
            let var = edge.packing_var().ok_or_else(|| {
                EvalError::InvalidPlan(format!("packing edge {} must name a variable", edge.id))
            })?;
            vars.insert(var.to_string(), Value::Array(unit.drain(net, edge.place)?));
        }
        if net.autohalt {
            unit.inc_running_transitions();
        }
        for (name, ty) in &tr.context {
            vars.entry(name.clone())
                .or_insert_with(|| Value::default_for(ty));
        }

        if let Some(subnet_id) = tr.subnet {
            let subnet = model.project.net(subnet_id)?;
            let env = Environment::from(vars.clone());
            let child = self.spawn(
                subnet_id,
                Some(Finalizer {
                    parent: instance,
                    process,
                    transition: tr.id,
                    vars,
                }),
            )?;
            for edge in &subnet.interface.inputs {
                self.produce(&model, child, process, subnet, edge, &env)?;
            }
            return Ok(FireOutcome::FiredWithModule(child));
        }

        let mut halt = false;
        if tr.code.is_some() {
            if let Some(body) = model.code.transition(tr.id) {
                let mut ctx = Context::new(process, model.config.process_count);
                body.run(&mut ctx, &mut vars)?;
                halt = ctx.halt_requested();
            }
        }

        let env = Environment::from(vars);
        for edge in tr.outputs_in_order() {
            self.produce(&model, instance, process, net, edge, &env)?;
        }

        let inst = self.instance_mut(instance)?;
        if net.autohalt {
            inst.unit_mut(process)?.dec_running_transitions();
        }
        if halt && net.is_module {
            debug!(instance, "halt requested");
            inst.halted = true;
        }
        Ok(FireOutcome::Fired)
    }

    /// Produce the tokens of one output edge into `instance`, an instance of
    /// `net`.
    fn produce(
        &mut self,
        model: &Model,
        instance: u32,
        process: usize,
        net: &Net,
        edge: &Edge,
        env: &Environment,
    ) -> EvalResult<()> {
        let ev = model.evaluator();
        if let Some(guard) = &edge.guard {
            if !ev.eval_bool(guard, env)? {
                return Ok(());
            }
        }
        let place = net
            .place(edge.place)
            .ok_or(LookupError::UnknownPlace(edge.place))?;
        let values = if edge.is_packing() {
            match ev.eval_as(&edge.expr, &Type::array(place.ty.clone()), env)? {
                Value::Array(values) => values,
                other => {
                    return Err(EvalError::TypeMismatch(format!(
                        "packing edge {} produced {}",
                        edge.id,
                        other.type_name()
                    )))
                }
            }
        } else {
            vec![ev.eval_as(&edge.expr, &place.ty, env)?]
        };

        let target = || {
            edge.target.as_ref().ok_or_else(|| {
                EvalError::InvalidPlan(format!("remote edge {} has no target", edge.id))
            })
        };
        match edge.addressing {
            Addressing::Local => {
                self.instance_mut(instance)?
                    .unit_mut(process)?
                    .add_all(net, place.id, values)
            }
            Addressing::Unicast => {
                let to = self.process_index(ev.eval_int(target()?, env)?)?;
                if to == process {
                    self.instance_mut(instance)?
                        .unit_mut(process)?
                        .add_all(net, place.id, values)
                } else {
                    self.post(model, instance, to, net, edge.place, &values)
                }
            }
            Addressing::Multicast => {
                let targets = match ev.eval_as(target()?, &Type::array(Type::Int), env)? {
                    Value::Array(targets) => targets,
                    _ => Vec::new(),
                };
                for to in targets.iter().filter_map(Value::as_int) {
                    let to = self.process_index(to)?;
                    self.post(model, instance, to, net, edge.place, &values)?;
                }
                Ok(())
            }
        }
    }

    fn process_index(&self, target: i32) -> EvalResult<usize> {
        match usize::try_from(target) {
            Ok(p) if p < self.process_count() => Ok(p),
            Ok(p) => Err(EvalError::UnknownProcess(p)),
            Err(_) => Err(EvalError::TypeMismatch(format!("negative process {target}"))),
        }
    }

    /// Encode `values` for `place` and queue them for `process`.
    fn post(
        &mut self,
        model: &Model,
        instance: u32,
        process: usize,
        net: &Net,
        place: u32,
        values: &[Value],
    ) -> EvalResult<()> {
        let (place_pos, place) = net
            .places
            .iter()
            .enumerate()
            .find(|(_, p)| p.id == place)
            .ok_or(LookupError::UnknownPlace(place))?;
        let codec = model.codec();
        let mut packer = Packer::new();
        for value in values {
            codec.pack(value, &place.ty, &mut packer)?;
        }
        trace!(instance, process, place = place.id, count = values.len(), "send");
        self.outbox.push_back(Envelope {
            process,
            instance,
            place_pos,
            count: values.len(),
            payload: packer.into_bytes(),
        });
        Ok(())
    }

    /// Decode an envelope into its target unit. Messages for instances that
    /// have already finished are dropped.
    pub fn deliver(&mut self, envelope: Envelope) -> EvalResult<()> {
        let model = Arc::clone(&self.model);
        let Some(inst) = self.instances.get_mut(&envelope.instance) else {
            debug!(instance = envelope.instance, "dropping message for finished instance");
            return Ok(());
        };
        let net = model.project.net(inst.net)?;
        let place = net
            .places
            .get(envelope.place_pos)
            .ok_or(EvalError::InvalidPlaceIndex(envelope.place_pos))?;
        let codec = model.codec();
        let mut unpacker = Unpacker::new(&envelope.payload);
        let values = (0..envelope.count)
            .map(|_| codec.unpack(&place.ty, &mut unpacker))
            .collect::<EvalResult<Vec<_>>>()?;
        if unpacker.remaining() != 0 {
            return Err(EvalError::Decode(format!(
                "{} trailing bytes in message for place {}",
                unpacker.remaining(),
                place.id
            )));
        }
        inst.unit_mut(envelope.process)?.add_all(net, place.id, values)
    }

    /// Deliver every queued message, including ones queued meanwhile.
    pub fn flush(&mut self) -> EvalResult<usize> {
        let mut delivered = 0;
        while let Some(envelope) = self.outbox.pop_front() {
            self.deliver(envelope)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// A module instance that is done: halted, or autohalting with nothing
    /// running, nothing enabled and nothing in flight.
    fn is_complete(&self, inst: &Instance) -> EvalResult<bool> {
        if inst.finalizer.is_none() {
            return Ok(false);
        }
        if inst.halted {
            return Ok(true);
        }
        let net = self.model.project.net(inst.net)?;
        if !net.autohalt || self.outbox.iter().any(|e| e.instance == inst.id) {
            return Ok(false);
        }
        for (process, unit) in inst.units() {
            if unit.running_transitions() > 0 {
                return Ok(false);
            }
            for tr in &net.transitions {
                if self.enable_check(inst.id, process, tr.id)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Remove a finished module instance and run its finalizer in the parent.
    fn finish(&mut self, id: u32) -> EvalResult<()> {
        let model = Arc::clone(&self.model);
        let inst = self
            .instances
            .remove(&id)
            .ok_or(EvalError::UnknownInstance(id))?;
        self.outbox.retain(|e| e.instance != id);
        let Some(finalizer) = inst.finalizer.as_ref() else {
            return Ok(());
        };
        debug!(instance = id, parent = finalizer.parent, "module finished");
        let Some(parent) = self.instances.get(&finalizer.parent) else {
            debug!(parent = finalizer.parent, "parent instance gone, finalizer skipped");
            return Ok(());
        };
        let subnet = model.project.net(inst.net)?;
        let net = model.project.net(parent.net)?;
        let (_, tr) = transition(net, finalizer.transition)?;

        // Module outputs shadow the parent's own bindings.
        let unit = inst.unit(finalizer.process)?;
        let mut vars = finalizer.vars.clone();
        for edge in &subnet.interface.outputs {
            let invalid = || {
                EvalError::InvalidPlan(format!(
                    "interface edge {} must be a single variable",
                    edge.id
                ))
            };
            if edge.is_packing() {
                let var = edge.packing_var().ok_or_else(invalid)?;
                vars.insert(var.to_string(), Value::Array(unit.tokens(edge.place)?));
            } else {
                let var = edge.expr.as_var().ok_or_else(invalid)?;
                let first = unit
                    .ring(edge.place)?
                    .first()
                    .cloned()
                    .ok_or_else(|| EvalError::ModuleOutputMissing(subnet.name.clone()))?;
                vars.insert(var.to_string(), first);
            }
        }

        let env = Environment::from(vars);
        for edge in tr.outputs_in_order() {
            self.produce(&model, finalizer.parent, finalizer.process, net, edge, &env)?;
        }
        if net.autohalt {
            self.instance_mut(finalizer.parent)?
                .unit_mut(finalizer.process)?
                .dec_running_transitions();
        }
        Ok(())
    }

    /// One scheduler move: deliver a message, complete a module or fire the
    /// first enabled transition, in that order of preference. Returns
    /// `false` once nothing can happen.
    pub fn step(&mut self) -> EvalResult<bool> {
        if let Some(envelope) = self.outbox.pop_front() {
            self.deliver(envelope)?;
            return Ok(true);
        }

        let mut complete = None;
        for inst in self.instances.values() {
            if self.is_complete(inst)? {
                complete = Some(inst.id);
                break;
            }
        }
        if let Some(id) = complete {
            self.finish(id)?;
            return Ok(true);
        }

        let mut candidates = Vec::new();
        for inst in self.instances.values().filter(|i| !i.halted) {
            let net = self.model.project.net(inst.net)?;
            for (process, unit) in inst.units() {
                for (pos, tr) in net.transitions.iter().enumerate() {
                    if unit.is_active(pos) {
                        candidates.push((inst.id, process, tr.id));
                    }
                }
            }
        }
        for (instance, process, tr) in candidates {
            if self.fire(instance, process, tr)? != FireOutcome::NotEnabled {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Step until nothing can happen or `max_steps` moves were made.
    pub fn run(&mut self, max_steps: usize) -> EvalResult<usize> {
        let mut steps = 0;
        while steps < max_steps && self.step()? {
            steps += 1;
        }
        debug!(steps, pending = self.outbox.len(), "run stopped");
        Ok(steps)
    }

    /// Tokens and enabled transitions of every live unit.
    pub fn report(&self) -> EvalResult<String> {
        let mut out = String::from("<report>");
        for inst in self.instances.values() {
            let net = self.model.project.net(inst.net)?;
            for (process, unit) in inst.units() {
                out.push_str(&format!(
                    "<net id='{}' instance='{}' process='{process}'>",
                    net.id, inst.id
                ));
                for place in &net.places {
                    out.push_str(&format!("<place id='{}'>", place.id));
                    for token in unit.ring(place.id)?.iter() {
                        out.push_str(&format!("<token value='{}'/>", escape(&token.to_string())));
                    }
                    out.push_str("</place>");
                }
                for tr in &net.transitions {
                    if self.enable_check(inst.id, process, tr.id)? {
                        out.push_str(&format!("<enabled id='{}'/>", tr.id));
                    }
                }
                out.push_str("</net>");
            }
        }
        out.push_str("</report>");
        Ok(out)
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\'' => escaped.push_str("&apos;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}
