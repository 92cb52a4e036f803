//! Model expression → C++ expression.
//!
//! Variables are resolved through an explicit binding table supplied by the
//! caller: the match renderer binds them to token cursors, the firing
//! generator to locals, the finalizer to captured tokens and module places.
//! A variable with no binding is a codegen error, never a silent default.
//!
//! Tuple and array literals are spelled through their declared type, so the
//! emitter is always called with the type the context expects when one is
//! known.

use std::collections::BTreeMap;

use petra_types::{BinaryOp, Expr, Origin, Project, Type, UnaryOp};

use crate::codec::TypeCodecs;
use crate::error::{CodegenError, CodegenResult};
use crate::writer::string_literal;

/// Where a variable lives in the emitted code.
#[derive(Debug, Clone)]
pub struct Binding {
    pub code: String,
    pub ty: Option<Type>,
}

pub struct ExprEmitter<'g, 'p> {
    project: &'p Project,
    codecs: &'g TypeCodecs<'p>,
    vars: BTreeMap<String, Binding>,
}

impl<'g, 'p> ExprEmitter<'g, 'p> {
    pub fn new(project: &'p Project, codecs: &'g TypeCodecs<'p>) -> Self {
        Self {
            project,
            codecs,
            vars: BTreeMap::new(),
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, code: impl Into<String>, ty: Option<Type>) {
        self.vars.insert(
            name.into(),
            Binding {
                code: code.into(),
                ty,
            },
        );
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.vars.get(name)
    }

    pub fn codecs(&self) -> &'g TypeCodecs<'p> {
        self.codecs
    }

    /// Best-effort static type of an expression.
    pub fn infer(&self, expr: &Expr) -> Option<Type> {
        match expr {
            Expr::Int(_) | Expr::Param(_) => Some(Type::Int),
            Expr::Double(_) => Some(Type::Double),
            Expr::Bool(_) => Some(Type::Bool),
            Expr::Str(_) => Some(Type::String),
            Expr::Var(name) => self.vars.get(name).and_then(|b| b.ty.clone()),
            Expr::Field(base, index) => self.infer(base)?.project(&[*index]).cloned(),
            Expr::Unary(UnaryOp::Not, _) => Some(Type::Bool),
            Expr::Unary(UnaryOp::Neg, inner) => self.infer(inner),
            Expr::Binary(op, lhs, _) => match op {
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge
                | BinaryOp::And
                | BinaryOp::Or => Some(Type::Bool),
                _ => self.infer(lhs),
            },
            Expr::Call(name, _) => self.project.function(name).map(|f| f.return_type.clone()),
            Expr::Tuple(_) | Expr::Array(_) => None,
        }
    }

    /// Emit `expr`, typing literals by `expected`.
    pub fn emit(&self, expr: &Expr, expected: Option<&Type>, origin: &Origin) -> CodegenResult<String> {
        match expr {
            Expr::Int(i) if *i < 0 => Ok(format!("({i})")),
            Expr::Int(i) => Ok(i.to_string()),
            Expr::Double(d) => Ok(format!("{d:?}")),
            Expr::Bool(b) => Ok(b.to_string()),
            Expr::Str(s) => Ok(format!("std::string({})", string_literal(s))),
            Expr::Var(name) => self
                .vars
                .get(name)
                .map(|b| b.code.clone())
                .ok_or_else(|| CodegenError::UnresolvedVariable {
                    name: name.clone(),
                    origin: origin.clone(),
                }),
            Expr::Param(name) => {
                if self.project.parameters.iter().any(|p| &p.name == name) {
                    Ok(format!("parameter_{name}()"))
                } else {
                    Err(invalid(format!("unknown parameter '{name}'"), origin))
                }
            }
            Expr::Tuple(items) => {
                let Some(ty @ Type::Product(fields)) = expected else {
                    return Err(invalid("cannot infer the type of a tuple literal", origin));
                };
                if fields.len() != items.len() {
                    return Err(invalid(
                        format!("tuple literal has {} items, {ty} expected", items.len()),
                        origin,
                    ));
                }
                let args: Vec<String> = items
                    .iter()
                    .zip(fields)
                    .map(|(item, field)| self.emit(item, Some(&field.ty), origin))
                    .collect::<CodegenResult<_>>()?;
                Ok(format!("{}({})", self.codecs.name_of(ty)?, args.join(", ")))
            }
            Expr::Array(items) => {
                let Some(ty @ Type::Sequence(inner)) = expected else {
                    return Err(invalid("cannot infer the type of an array literal", origin));
                };
                let args: Vec<String> = items
                    .iter()
                    .map(|item| self.emit(item, Some(inner), origin))
                    .collect::<CodegenResult<_>>()?;
                Ok(format!(
                    "{}({{{}}})",
                    self.codecs.cpp_type(ty)?,
                    args.join(", ")
                ))
            }
            Expr::Field(base, index) => {
                let base_ty = self.infer(base);
                let Some(Type::Product(fields)) = base_ty.as_ref() else {
                    return Err(invalid("field projection on a non-tuple value", origin));
                };
                let field = fields.get(*index).ok_or_else(|| {
                    invalid(format!("tuple has no field {index}"), origin)
                })?;
                let base = self.emit(base, base_ty.as_ref(), origin)?;
                Ok(format!("({base}).{}", field.name))
            }
            Expr::Unary(op, inner) => {
                let inner = self.emit(inner, expected, origin)?;
                Ok(match op {
                    UnaryOp::Neg => format!("(-{inner})"),
                    UnaryOp::Not => format!("(!{inner})"),
                })
            }
            Expr::Binary(op, lhs, rhs) => {
                // Operands of a comparison share a type; arithmetic keeps the
                // expected one.
                let operand_ty = match op {
                    BinaryOp::And | BinaryOp::Or => Some(Type::Bool),
                    BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::Lt
                    | BinaryOp::Le
                    | BinaryOp::Gt
                    | BinaryOp::Ge => self.infer(lhs).or_else(|| self.infer(rhs)),
                    _ => expected.cloned(),
                };
                let lhs = self.emit(lhs, operand_ty.as_ref(), origin)?;
                let rhs = self.emit(rhs, operand_ty.as_ref(), origin)?;
                Ok(format!("({lhs} {} {rhs})", op.symbol()))
            }
            Expr::Call(name, args) => {
                let func = self
                    .project
                    .function(name)
                    .ok_or_else(|| invalid(format!("unknown function '{name}'"), origin))?;
                if func.params.len() != args.len() {
                    return Err(invalid(
                        format!(
                            "function '{name}' takes {} arguments, {} given",
                            func.params.len(),
                            args.len()
                        ),
                        origin,
                    ));
                }
                let mut parts = Vec::with_capacity(args.len() + 1);
                if func.with_context {
                    parts.push("ctx".to_string());
                }
                for (arg, param) in args.iter().zip(&func.params) {
                    parts.push(self.emit(arg, Some(&param.ty), origin)?);
                }
                Ok(format!("ufunction_{name}({})", parts.join(", ")))
            }
        }
    }
}

fn invalid(message: impl Into<String>, origin: &Origin) -> CodegenError {
    CodegenError::InvalidExpression {
        message: message.into(),
        origin: origin.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petra_types::{FunctionParam, Parameter, UserFunction};

    fn project() -> Project {
        Project {
            name: "p".into(),
            description: String::new(),
            nets: Vec::new(),
            parameters: vec![Parameter {
                name: "size".into(),
                description: String::new(),
            }],
            extern_types: Vec::new(),
            functions: vec![UserFunction {
                id: 9,
                name: "twice".into(),
                params: vec![FunctionParam {
                    name: "x".into(),
                    ty: Type::Int,
                }],
                return_type: Type::Int,
                with_context: true,
                code: "return 2 * x;".into(),
            }],
        }
    }

    fn origin() -> Origin {
        Origin::part(5, "expr")
    }

    #[test]
    fn test_variables_resolve_through_bindings() {
        let p = project();
        let codecs = TypeCodecs::collect(&p).unwrap();
        let mut em = ExprEmitter::new(&p, &codecs);
        em.bind("x", "token_0->element", Some(Type::Int));
        let expr = Expr::binary(BinaryOp::Add, Expr::var("x"), Expr::Int(1));
        assert_eq!(
            em.emit(&expr, Some(&Type::Int), &origin()).unwrap(),
            "(token_0->element + 1)"
        );
    }

    #[test]
    fn test_unbound_variable_is_an_error() {
        let p = project();
        let codecs = TypeCodecs::collect(&p).unwrap();
        let em = ExprEmitter::new(&p, &codecs);
        let err = em.emit(&Expr::var("y"), None, &origin()).unwrap_err();
        assert_eq!(err.to_string(), "*5/expr: unresolved variable 'y'");
    }

    #[test]
    fn test_tuple_literal_uses_registered_class() {
        let p = project();
        let mut codecs = TypeCodecs::collect(&p).unwrap();
        let ty = Type::tuple([Type::Int, Type::String]);
        codecs.register(&ty, &origin()).unwrap();
        let em = ExprEmitter::new(&p, &codecs);
        let expr = Expr::Tuple(vec![Expr::Int(1), Expr::Str("a".into())]);
        assert_eq!(
            em.emit(&expr, Some(&ty), &origin()).unwrap(),
            "Tuple2_int_string(1, std::string(\"a\"))"
        );
        assert!(em.emit(&expr, None, &origin()).is_err());
    }

    #[test]
    fn test_field_projection_uses_field_name() {
        let p = project();
        let mut codecs = TypeCodecs::collect(&p).unwrap();
        let ty = Type::tuple([Type::Int, Type::Bool]);
        codecs.register(&ty, &origin()).unwrap();
        let mut em = ExprEmitter::new(&p, &codecs);
        em.bind("v", "value", Some(ty));
        assert_eq!(
            em.emit(&Expr::field(Expr::var("v"), 1), None, &origin()).unwrap(),
            "(value).t1"
        );
    }

    #[test]
    fn test_calls_and_parameters() {
        let p = project();
        let codecs = TypeCodecs::collect(&p).unwrap();
        let em = ExprEmitter::new(&p, &codecs);
        let call = Expr::Call("twice".into(), vec![Expr::Param("size".into())]);
        assert_eq!(
            em.emit(&call, None, &origin()).unwrap(),
            "ufunction_twice(ctx, parameter_size())"
        );
        let unknown = Expr::Call("nope".into(), Vec::new());
        assert!(em.emit(&unknown, None, &origin()).is_err());
    }

    #[test]
    fn test_array_literal_and_negative_ints() {
        let p = project();
        let codecs = TypeCodecs::collect(&p).unwrap();
        let em = ExprEmitter::new(&p, &codecs);
        let expr = Expr::Array(vec![Expr::Int(3), Expr::Int(-1)]);
        assert_eq!(
            em.emit(&expr, Some(&Type::array(Type::Int)), &origin()).unwrap(),
            "std::vector<int >({3, (-1)})"
        );
    }
}
