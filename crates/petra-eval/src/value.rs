//! Runtime values carried by tokens and produced by expressions.

use std::fmt;

use petra_types::Type;

/// A token or expression value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    Tuple(Vec<Value>),
    Array(Vec<Value>),
    /// Opaque value of an extern type: its name and raw bytes.
    Extern { type_name: String, data: Vec<u8> },
}

impl Value {
    /// The zero value of a type, what a default-constructed C++ variable
    /// of that type holds.
    pub fn default_for(ty: &Type) -> Value {
        match ty {
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            Type::Bool => Value::Bool(false),
            Type::String => Value::Str(String::new()),
            Type::Product(fields) => {
                Value::Tuple(fields.iter().map(|f| Value::default_for(&f.ty)).collect())
            }
            Type::Sequence(_) => Value::Array(Vec::new()),
            Type::Extern(name) => Value::Extern {
                type_name: name.clone(),
                data: Vec::new(),
            },
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Tuple(_) => "tuple",
            Value::Array(_) => "array",
            Value::Extern { type_name, .. } => type_name,
        }
    }

    /// Whether the value has the shape of `ty`.
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Value::Int(_), Type::Int)
            | (Value::Float(_), Type::Float)
            | (Value::Double(_), Type::Double)
            | (Value::Bool(_), Type::Bool)
            | (Value::Str(_), Type::String) => true,
            (Value::Tuple(items), Type::Product(fields)) => {
                items.len() == fields.len()
                    && items.iter().zip(fields).all(|(v, f)| v.conforms_to(&f.ty))
            }
            (Value::Array(items), Type::Sequence(inner)) => {
                items.iter().all(|v| v.conforms_to(inner))
            }
            (Value::Extern { type_name, .. }, Type::Extern(name)) => type_name == name,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The component reached by following tuple field indices.
    pub fn project(&self, path: &[usize]) -> Option<&Value> {
        let mut current = self;
        for &index in path {
            match current {
                Value::Tuple(items) => current = items.get(index)?,
                _ => return None,
            }
        }
        Some(current)
    }
}

/// The report rendering of a value: decimal numbers, `true`/`false`,
/// strings verbatim, `(a,b)` tuples and `[a,b]` arrays. Extern values
/// without a string form render as their type name.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Extern { type_name, .. } => write!(f, "{type_name}"),
        }
    }
}
