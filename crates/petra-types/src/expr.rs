//! Model expressions: binding, guard, target, limit and initializer
//! expressions attached to edges, places and areas.
//!
//! The loader hands expressions over already parsed. This is only the tree
//! the generator emits and the reference evaluator interprets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i32),
    Double(f64),
    Bool(bool),
    Str(String),
    /// A free variable of the transition context.
    Var(String),
    /// A global project parameter.
    Param(String),
    Tuple(Vec<Expr>),
    Array(Vec<Expr>),
    /// Projection of a tuple field by position.
    Field(Box<Expr>, usize),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// Call of a user function declared in the project.
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Operator spelling shared by the emitted C++ and diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Expr {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn field(base: Expr, index: usize) -> Expr {
        Expr::Field(Box::new(base), index)
    }

    /// Variable name if this is a bare variable.
    pub fn as_var(&self) -> Option<&str> {
        match self {
            Expr::Var(name) => Some(name),
            _ => None,
        }
    }

    /// All context variables the expression reads.
    pub fn free_vars(&self) -> BTreeSet<&str> {
        let mut vars = BTreeSet::new();
        self.collect_vars(&mut vars);
        vars
    }

    fn collect_vars<'a>(&'a self, vars: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Var(name) => {
                vars.insert(name.as_str());
            }
            Expr::Tuple(items) | Expr::Array(items) | Expr::Call(_, items) => {
                for item in items {
                    item.collect_vars(vars);
                }
            }
            Expr::Field(base, _) | Expr::Unary(_, base) => base.collect_vars(vars),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_vars(vars);
                rhs.collect_vars(vars);
            }
            Expr::Int(_) | Expr::Double(_) | Expr::Bool(_) | Expr::Str(_) | Expr::Param(_) => {}
        }
    }
}
