//! The net model consumed by the generator.
//!
//! Everything here is produced once by the project loader and never mutated
//! afterwards. Vectors preserve declaration order: a place's or transition's
//! index in its net is its *position id*, the number the runtime uses to
//! address it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Expr, ExternType, Origin, Type};

// ══════════════════════════════════════════════════════════════════════════════
// Edges
// ══════════════════════════════════════════════════════════════════════════════

/// Direction of an edge relative to its transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Place → transition.
    Input,
    /// Transition → place.
    Output,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Consumes or produces exactly one token.
    Normal,
    /// Consumes or produces a whole multiset. On input edges `limit` is the
    /// least number of tokens the edge takes on top of those bound by normal
    /// edges of the same place.
    Packing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<Expr>,
    },
}

/// Where an output edge delivers its tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    #[default]
    Local,
    /// `target` evaluates to one process id.
    Unicast,
    /// `target` evaluates to an array of process ids.
    Multicast,
}

/// Connection between a place and a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: u32,
    pub place: u32,
    pub direction: Direction,
    pub kind: EdgeKind,
    /// Binding expression (input) or produced value (output). For packing
    /// edges this is the variable holding the whole multiset.
    pub expr: Expr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Expr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Expr>,
    #[serde(default)]
    pub addressing: Addressing,
}

impl Edge {
    pub fn is_normal(&self) -> bool {
        self.kind == EdgeKind::Normal
    }

    pub fn is_packing(&self) -> bool {
        matches!(self.kind, EdgeKind::Packing { .. })
    }

    pub fn is_local(&self) -> bool {
        self.addressing == Addressing::Local
    }

    /// Variable of a packing edge.
    pub fn packing_var(&self) -> Option<&str> {
        if self.is_packing() {
            self.expr.as_var()
        } else {
            None
        }
    }

    /// Reserve limit of a packing input edge.
    pub fn limit(&self) -> Option<&Expr> {
        match &self.kind {
            EdgeKind::Packing { limit } => limit.as_ref(),
            EdgeKind::Normal => None,
        }
    }

    pub fn origin(&self) -> Origin {
        Origin::element(self.id)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Places, transitions, nets
// ══════════════════════════════════════════════════════════════════════════════

/// A typed token container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: u32,
    pub name: String,
    pub ty: Type,
    /// Evaluates to an array of initial tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_expr: Option<Expr>,
    /// User code filling a `std::vector` of initial tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_code: Option<String>,
    /// Ids of the areas whose locations seed this place.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub areas: Vec<u32>,
}

impl Place {
    pub fn has_initializer(&self) -> bool {
        self.init_expr.is_some() || self.init_code.is_some()
    }
}

/// A named set of runtime locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub id: u32,
    pub name: String,
    /// Evaluates to an array of process ids.
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<Edge>,
    #[serde(default)]
    pub outputs: Vec<Edge>,
    /// Id of the module net this transition spawns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Free variables of the transition and their types.
    #[serde(default)]
    pub context: BTreeMap<String, Type>,
}

impl Transition {
    pub fn normal_inputs(&self) -> impl Iterator<Item = &Edge> {
        self.inputs.iter().filter(|e| e.is_normal())
    }

    pub fn packing_inputs(&self) -> impl Iterator<Item = &Edge> {
        self.inputs.iter().filter(|e| e.is_packing())
    }

    /// Output edges in production order: packing edges first, then normal ones.
    pub fn outputs_in_order(&self) -> impl Iterator<Item = &Edge> {
        self.outputs
            .iter()
            .filter(|e| e.is_packing())
            .chain(self.outputs.iter().filter(|e| e.is_normal()))
    }

    pub fn input(&self, edge_id: u32) -> Option<&Edge> {
        self.inputs.iter().find(|e| e.id == edge_id)
    }

    /// Sorted context variable names.
    pub fn context_names(&self) -> Vec<&str> {
        self.context.keys().map(String::as_str).collect()
    }
}

/// Interface edges of a module net.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    /// Evaluated in the spawning transition's context; seed the fresh instance.
    #[serde(default)]
    pub inputs: Vec<Edge>,
    /// Read by the finalizer once the instance completes.
    #[serde(default)]
    pub outputs: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub places: Vec<Place>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub areas: Vec<Area>,
    #[serde(default)]
    pub interface: Interface,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub is_module: bool,
    #[serde(default)]
    pub autohalt: bool,
}

impl Net {
    pub fn place(&self, id: u32) -> Option<&Place> {
        self.places.iter().find(|p| p.id == id)
    }

    pub fn place_pos(&self, id: u32) -> Option<usize> {
        self.places.iter().position(|p| p.id == id)
    }

    pub fn transition_pos(&self, id: u32) -> Option<usize> {
        self.transitions.iter().position(|t| t.id == id)
    }

    pub fn area(&self, id: u32) -> Option<&Area> {
        self.areas.iter().find(|a| a.id == id)
    }

    /// Positions of the transitions that consume from `place`, i.e. the ones
    /// to re-activate whenever the place gains tokens.
    pub fn transitions_out(&self, place: u32) -> Vec<usize> {
        self.transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| t.inputs.iter().any(|e| e.place == place))
            .map(|(pos, _)| pos)
            .collect()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Project
// ══════════════════════════════════════════════════════════════════════════════

/// A global integer parameter set on the command line of the generated program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: String,
    pub ty: Type,
}

/// A user-written helper callable from expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFunction {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub params: Vec<FunctionParam>,
    pub return_type: Type,
    #[serde(default)]
    pub with_context: bool,
    pub code: String,
}

/// Root of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nets: Vec<Net>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub extern_types: Vec<ExternType>,
    #[serde(default)]
    pub functions: Vec<UserFunction>,
}

/// A reference the model does not resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("unknown net {0}")]
    UnknownNet(u32),
    #[error("unknown place {0}")]
    UnknownPlace(u32),
    #[error("unknown transition {0}")]
    UnknownTransition(u32),
    #[error("unknown area {0}")]
    UnknownArea(u32),
    #[error("unknown extern type '{0}'")]
    UnknownExternType(String),
}

impl Project {
    pub fn net(&self, id: u32) -> Result<&Net, LookupError> {
        self.nets
            .iter()
            .find(|n| n.id == id)
            .ok_or(LookupError::UnknownNet(id))
    }

    /// Index of a net in [`Project::nets`], its runtime definition index.
    pub fn net_index(&self, id: u32) -> Result<usize, LookupError> {
        self.nets
            .iter()
            .position(|n| n.id == id)
            .ok_or(LookupError::UnknownNet(id))
    }

    pub fn extern_type(&self, name: &str) -> Result<&ExternType, LookupError> {
        self.extern_types
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| LookupError::UnknownExternType(name.to_string()))
    }

    pub fn function(&self, name: &str) -> Option<&UserFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The net owning a place together with the place.
    pub fn find_place(&self, id: u32) -> Result<(&Net, &Place), LookupError> {
        self.nets
            .iter()
            .find_map(|n| n.place(id).map(|p| (n, p)))
            .ok_or(LookupError::UnknownPlace(id))
    }

    pub fn find_transition(&self, id: u32) -> Result<(&Net, &Transition), LookupError> {
        self.nets
            .iter()
            .find_map(|n| n.transitions.iter().find(|t| t.id == id).map(|t| (n, t)))
            .ok_or(LookupError::UnknownTransition(id))
    }

    /// Every non-local output edge in the project: transition outputs and
    /// module interface inputs.
    pub fn remote_edges(&self) -> impl Iterator<Item = &Edge> {
        self.nets
            .iter()
            .flat_map(|n| {
                n.transitions
                    .iter()
                    .flat_map(|t| t.outputs.iter())
                    .chain(n.interface.inputs.iter())
            })
            .filter(|e| !e.is_local())
    }

    /// Ids of places that receive tokens from another process and therefore
    /// need a case in their net's receive routine.
    pub fn remotely_targeted_places(&self) -> BTreeSet<u32> {
        self.remote_edges().map(|e| e.place).collect()
    }

    /// Every place of a type in the model, with the element it belongs to.
    pub fn type_uses(&self) -> Vec<(Origin, &Type)> {
        let mut uses = Vec::new();
        for f in &self.functions {
            for p in &f.params {
                uses.push((Origin::part(f.id, "signature"), &p.ty));
            }
            uses.push((Origin::part(f.id, "signature"), &f.return_type));
        }
        for net in &self.nets {
            for place in &net.places {
                uses.push((Origin::part(place.id, "type"), &place.ty));
            }
            for tr in &net.transitions {
                for (name, ty) in &tr.context {
                    uses.push((Origin::part(tr.id, format!("context/{name}")), ty));
                }
            }
        }
        uses
    }
}
