//! Match plans: the output of the edge-pattern analysis pass.
//!
//! For every transition the analyzer decides which input edge binds which
//! variable and in what order. The generator and the evaluator only consume
//! the result:
//!
//! - `matches`: normal input edges in enumeration order, each with the
//!   instructions that bind and test the candidate token;
//! - `init`: instructions run once before any token is looked at;
//! - `access`: where each bound variable lives once the match succeeds.
//!
//! Every instruction either lets the binding proceed or takes the single
//! `fail` continuation the consumer supplies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Expr;

/// One step of a match plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    /// The candidate token's component at `path` must equal `expr`.
    Check { path: Vec<usize>, expr: Expr },
    /// `expr` must evaluate to true.
    Guard(Expr),
    /// Unconditionally take the fail continuation.
    Fail,
}

/// Where a bound variable is read from once all edges are matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Component `path` of the token bound by match slot `slot`.
    Token { slot: usize, path: Vec<usize> },
    /// Computed from other variables.
    Expr(Expr),
}

impl Access {
    pub fn token(slot: usize, path: impl Into<Vec<usize>>) -> Self {
        Access::Token {
            slot,
            path: path.into(),
        }
    }
}

/// A matched input edge and the instructions evaluated against its candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeMatch {
    pub edge: u32,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchPlan {
    #[serde(default)]
    pub matches: Vec<EdgeMatch>,
    #[serde(default)]
    pub init: Vec<Instruction>,
    #[serde(default)]
    pub access: BTreeMap<String, Access>,
}

impl MatchPlan {
    /// Match slot of an edge.
    pub fn slot_of(&self, edge: u32) -> Option<usize> {
        self.matches.iter().position(|m| m.edge == edge)
    }
}

/// Plans for every transition of a project, keyed by transition id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTable {
    plans: BTreeMap<u32, MatchPlan>,
}

static EMPTY_PLAN: MatchPlan = MatchPlan {
    matches: Vec::new(),
    init: Vec::new(),
    access: BTreeMap::new(),
};

impl PlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, transition: u32, plan: MatchPlan) {
        self.plans.insert(transition, plan);
    }

    /// The plan of a transition; transitions without one match nothing.
    pub fn plan_for(&self, transition: u32) -> &MatchPlan {
        self.plans.get(&transition).unwrap_or(&EMPTY_PLAN)
    }

    pub fn contains(&self, transition: u32) -> bool {
        self.plans.contains_key(&transition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &MatchPlan)> {
        self.plans.iter().map(|(id, plan)| (*id, plan))
    }
}

impl FromIterator<(u32, MatchPlan)> for PlanTable {
    fn from_iter<I: IntoIterator<Item = (u32, MatchPlan)>>(iter: I) -> Self {
        Self {
            plans: iter.into_iter().collect(),
        }
    }
}
