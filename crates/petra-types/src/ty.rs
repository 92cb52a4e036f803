//! Value types carried by places, edges and user functions.
//!
//! Types are plain trees, so the type graph is acyclic by construction.
//! Two structurally equal types are the same type: [`Type`] implements
//! `Ord`/`Hash` over its shape, which is what the code generator keys its
//! per-type codec cache on.

use serde::{Deserialize, Serialize};
use std::fmt;

// ══════════════════════════════════════════════════════════════════════════════
// Type
// ══════════════════════════════════════════════════════════════════════════════

/// A value type of the net model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    // ── Primitives ──
    Int,
    Float,
    Double,
    Bool,
    String,

    // ── Composites ──
    /// Anonymous fixed-arity tuple with named fields.
    Product(Vec<Field>),
    /// Dynamically sized array.
    Sequence(Box<Type>),

    // ── Extern ──
    /// Reference to an [`ExternType`] declared in the project, by name.
    Extern(std::string::String),
}

/// A field of a [`Type::Product`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: std::string::String,
    pub ty: Type,
}

impl Type {
    /// Build a tuple whose fields are named `t0`, `t1`, ...
    pub fn tuple(types: impl IntoIterator<Item = Type>) -> Type {
        Type::Product(
            types
                .into_iter()
                .enumerate()
                .map(|(i, ty)| Field {
                    name: format!("t{i}"),
                    ty,
                })
                .collect(),
        )
    }

    /// `Sequence(element)`.
    pub fn array(element: Type) -> Type {
        Type::Sequence(Box::new(element))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Int | Type::Float | Type::Double | Type::Bool | Type::String
        )
    }

    /// Fixed wire width of a primitive, `None` for variable-size types.
    pub fn fixed_width(&self) -> Option<u32> {
        match self {
            Type::Int | Type::Float => Some(4),
            Type::Double => Some(8),
            Type::Bool => Some(1),
            _ => None,
        }
    }

    /// Direct component types.
    pub fn components(&self) -> Vec<&Type> {
        match self {
            Type::Product(fields) => fields.iter().map(|f| &f.ty).collect(),
            Type::Sequence(inner) => vec![inner.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Visit this type and every nested type, components before composites.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Type)) {
        for component in self.components() {
            component.walk(visit);
        }
        visit(self);
    }

    /// The field type reached by following a path of product field indices.
    pub fn project(&self, path: &[usize]) -> Option<&Type> {
        let mut current = self;
        for &index in path {
            match current {
                Type::Product(fields) => current = &fields.get(index)?.ty,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Names of extern types referenced anywhere inside this type.
    pub fn extern_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |t| {
            if let Type::Extern(name) = t {
                names.push(name.as_str());
            }
        });
        names
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Bool => write!(f, "bool"),
            Type::String => write!(f, "string"),
            Type::Product(fields) => {
                write!(f, "(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field.ty)?;
                }
                write!(f, ")")
            }
            Type::Sequence(inner) => write!(f, "Array({inner})"),
            Type::Extern(name) => write!(f, "{name}"),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Extern types
// ══════════════════════════════════════════════════════════════════════════════

/// Whether and how values of an extern type cross a process boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Never serialized; any send/receive of the type is a model error.
    Disabled,
    /// Raw byte copy of the in-memory representation.
    Direct,
    /// User supplied `getsize`/`pack`/`unpack` bodies.
    Custom,
}

/// User code attached to an extern type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternCode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getstring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub getsize: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpack: Option<String>,
}

/// A type defined outside the model, known only by its raw C++ spelling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternType {
    pub id: u32,
    pub name: String,
    /// The target-language representation, e.g. `struct Matrix`.
    pub raw_type: String,
    pub transport: TransportMode,
    /// Byte width of the raw representation, needed to simulate `Direct` transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_size: Option<u32>,
    #[serde(default)]
    pub code: ExternCode,
}

impl ExternType {
    /// Names of the codec bodies a `Custom` transport still lacks.
    pub fn missing_custom_bodies(&self) -> Vec<&'static str> {
        if self.transport != TransportMode::Custom {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if self.code.getsize.is_none() {
            missing.push("getsize");
        }
        if self.code.pack.is_none() {
            missing.push("pack");
        }
        if self.code.unpack.is_none() {
            missing.push("unpack");
        }
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_field_names() {
        let t = Type::tuple([Type::Int, Type::String]);
        match &t {
            Type::Product(fields) => {
                assert_eq!(fields[0].name, "t0");
                assert_eq!(fields[1].name, "t1");
            }
            _ => panic!("expected product"),
        }
    }

    #[test]
    fn test_walk_visits_components_first() {
        let t = Type::array(Type::tuple([Type::Int, Type::array(Type::Double)]));
        let mut seen = Vec::new();
        t.walk(&mut |ty| seen.push(ty.to_string()));
        assert_eq!(
            seen,
            vec![
                "int",
                "double",
                "Array(double)",
                "(int, Array(double))",
                "Array((int, Array(double)))",
            ]
        );
    }

    #[test]
    fn test_structural_equality() {
        let a = Type::tuple([Type::Int, Type::Bool]);
        let b = Type::tuple([Type::Int, Type::Bool]);
        assert_eq!(a, b);
        assert_ne!(a, Type::tuple([Type::Bool, Type::Int]));
    }

    #[test]
    fn test_project_path() {
        let t = Type::tuple([Type::Int, Type::tuple([Type::String, Type::Double])]);
        assert_eq!(t.project(&[1, 0]), Some(&Type::String));
        assert_eq!(t.project(&[]), Some(&t));
        assert_eq!(t.project(&[0, 0]), None);
        assert_eq!(t.project(&[5]), None);
    }

    #[test]
    fn test_fixed_width() {
        assert_eq!(Type::Int.fixed_width(), Some(4));
        assert_eq!(Type::Double.fixed_width(), Some(8));
        assert_eq!(Type::Bool.fixed_width(), Some(1));
        assert_eq!(Type::String.fixed_width(), None);
        assert_eq!(Type::array(Type::Int).fixed_width(), None);
    }

    #[test]
    fn test_extern_names() {
        let t = Type::tuple([Type::Extern("Matrix".into()), Type::array(Type::Extern("Handle".into()))]);
        assert_eq!(t.extern_names(), vec!["Matrix", "Handle"]);
    }

    #[test]
    fn test_missing_custom_bodies() {
        let mut ext = ExternType {
            id: 1,
            name: "Matrix".into(),
            raw_type: "Matrix".into(),
            transport: TransportMode::Custom,
            raw_size: None,
            code: ExternCode {
                pack: Some("packer.pack(obj.data, 16);".into()),
                ..ExternCode::default()
            },
        };
        assert_eq!(ext.missing_custom_bodies(), vec!["getsize", "unpack"]);
        ext.transport = TransportMode::Direct;
        assert!(ext.missing_custom_bodies().is_empty());
    }

    #[test]
    fn test_type_json_shape() {
        let json = serde_json::to_string(&Type::array(Type::Int)).unwrap();
        assert_eq!(json, r#"{"sequence":"int"}"#);
        let back: Type = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Type::array(Type::Int));
    }
}
