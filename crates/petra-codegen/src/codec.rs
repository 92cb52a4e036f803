//! Type codecs: C++ spelling, sizing, packing, unpacking and string
//! rendering for every value type a project uses.
//!
//! Codec identifiers are memoized per structural type. [`TypeCodecs`]
//! registers every composite reachable from the model once, components
//! before composites, so a tuple class is always declared after the classes
//! of its fields. Types differing only in field names still get distinct
//! identifiers.
//!
//! Product and sequence codecs are only emitted for types that can be
//! transported. A type that reaches an extern type with disabled transport
//! keeps its class and string rendering; asking for its size or wire form
//! fails with [`CodegenError::TransportDisabled`] at the place of use.

use std::collections::{BTreeMap, BTreeSet};

use petra_types::{ExternType, Origin, Project, TransportMode, Type};

use crate::error::{CodegenError, CodegenResult};
use crate::source_map::{FragmentKind, Fragments};
use crate::writer::{string_literal, CodeWriter};

// ══════════════════════════════════════════════════════════════════════════════
// Registry
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug)]
pub struct TypeCodecs<'p> {
    project: &'p Project,
    /// Composite types in dependency order.
    order: Vec<Type>,
    /// Emitted identifier of each composite.
    names: BTreeMap<Type, String>,
    taken: BTreeSet<String>,
}

impl<'p> TypeCodecs<'p> {
    /// Register every type the project mentions and check its extern types.
    pub fn collect(project: &'p Project) -> CodegenResult<Self> {
        let mut codecs = Self {
            project,
            order: Vec::new(),
            names: BTreeMap::new(),
            taken: BTreeSet::new(),
        };
        for ext in &project.extern_types {
            let missing = ext.missing_custom_bodies();
            if !missing.is_empty() {
                return Err(CodegenError::CustomCodecMissing {
                    type_name: ext.name.clone(),
                    missing,
                    origin: Origin::element(ext.id),
                });
            }
        }
        for (origin, ty) in project.type_uses() {
            codecs.register(ty, &origin)?;
        }
        Ok(codecs)
    }

    /// Register a type and all of its components.
    pub fn register(&mut self, ty: &Type, origin: &Origin) -> CodegenResult<()> {
        let mut nested = Vec::new();
        ty.walk(&mut |t| nested.push(t));
        for t in nested {
            match t {
                Type::Extern(name) => {
                    self.extern_type(name, origin)?;
                }
                Type::Product(_) | Type::Sequence(_) if !self.names.contains_key(t) => {
                    let name = self.unique_name(safe_name(t));
                    self.names.insert(t.clone(), name);
                    self.order.push(t.clone());
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn unique_name(&mut self, base: String) -> String {
        let mut name = base.clone();
        let mut k = 2;
        while self.taken.contains(&name) {
            name = format!("{base}_{k}");
            k += 1;
        }
        self.taken.insert(name.clone());
        name
    }

    fn extern_type(&self, name: &str, origin: &Origin) -> CodegenResult<&'p ExternType> {
        self.project
            .extern_type(name)
            .map_err(|_| CodegenError::UnknownType {
                name: name.to_string(),
                origin: origin.clone(),
            })
    }

    /// Registered identifier of a composite.
    pub fn name_of(&self, ty: &Type) -> CodegenResult<&str> {
        self.names
            .get(ty)
            .map(String::as_str)
            .ok_or_else(|| CodegenError::Internal(format!("type {ty} was not registered")))
    }

    /// Composite types in declaration order.
    pub fn composites(&self) -> &[Type] {
        &self.order
    }

    // ── Classification ──

    /// First extern type with disabled transport reachable from `ty`.
    fn disabled_extern(&self, ty: &Type) -> Option<&'p ExternType> {
        ty.extern_names().into_iter().find_map(|name| {
            self.project
                .extern_type(name)
                .ok()
                .filter(|e| e.transport == TransportMode::Disabled)
        })
    }

    pub fn is_transportable(&self, ty: &Type) -> bool {
        self.disabled_extern(ty).is_none()
    }

    /// Fail unless values of `ty` may cross a process boundary.
    pub fn check_transport(&self, ty: &Type, origin: &Origin) -> CodegenResult<()> {
        match self.disabled_extern(ty) {
            Some(ext) => Err(CodegenError::TransportDisabled {
                type_name: ext.name.clone(),
                origin: origin.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Whether the emitted type supports `==`.
    pub fn is_comparable(&self, ty: &Type) -> bool {
        ty.extern_names().is_empty()
    }

    // ══════════════════════════════════════════════════════════════════════
    // Code fragments
    // ══════════════════════════════════════════════════════════════════════

    /// The C++ spelling of a type.
    pub fn cpp_type(&self, ty: &Type) -> CodegenResult<String> {
        Ok(match ty {
            Type::Int => "int".into(),
            Type::Float => "float".into(),
            Type::Double => "double".into(),
            Type::Bool => "bool".into(),
            Type::String => "std::string".into(),
            Type::Product(_) => self.name_of(ty)?.to_string(),
            Type::Sequence(inner) => format!("std::vector<{} >", self.cpp_type(inner)?),
            Type::Extern(name) => self.project.extern_type(name)?.raw_type.clone(),
        })
    }

    /// Expression computing the packed size of `code`.
    pub fn size_code(&self, ty: &Type, code: &str, origin: &Origin) -> CodegenResult<String> {
        self.check_transport(ty, origin)?;
        Ok(match ty {
            Type::Int | Type::Float | Type::Double | Type::Bool => {
                format!("sizeof({})", self.cpp_type(ty)?)
            }
            Type::String => format!("(sizeof(size_t) + ({code}).size())"),
            Type::Product(_) => format!("({code}).get_mem_size()"),
            Type::Sequence(_) => format!("{}_size({code})", self.name_of(ty)?),
            Type::Extern(name) => {
                let ext = self.extern_type(name, origin)?;
                match ext.transport {
                    TransportMode::Direct => format!("sizeof({})", ext.raw_type),
                    _ => format!("{name}_getsize({code})"),
                }
            }
        })
    }

    /// Statement appending `code` to `packer`.
    pub fn pack_code(
        &self,
        ty: &Type,
        packer: &str,
        code: &str,
        origin: &Origin,
    ) -> CodegenResult<String> {
        self.check_transport(ty, origin)?;
        Ok(match ty {
            Type::Int => format!("{packer}.pack_int({code});"),
            Type::Float => format!("{packer}.pack_float({code});"),
            Type::Double => format!("{packer}.pack_double({code});"),
            Type::Bool => format!("{packer}.pack_bool({code});"),
            Type::String => format!("{packer}.pack_string({code});"),
            Type::Product(_) => format!("({code}).pack({packer});"),
            Type::Sequence(_) => format!("{}_pack({packer}, {code});", self.name_of(ty)?),
            Type::Extern(name) => {
                let ext = self.extern_type(name, origin)?;
                match ext.transport {
                    TransportMode::Direct => {
                        format!("{packer}.pack(&({code}), sizeof({}));", ext.raw_type)
                    }
                    _ => format!("{name}_pack({packer}, {code});"),
                }
            }
        })
    }

    /// Expression reading one value of `ty` from `unpacker`.
    pub fn unpack_code(&self, ty: &Type, unpacker: &str, origin: &Origin) -> CodegenResult<String> {
        self.check_transport(ty, origin)?;
        Ok(match ty {
            Type::Int => format!("{unpacker}.unpack_int()"),
            Type::Float => format!("{unpacker}.unpack_float()"),
            Type::Double => format!("{unpacker}.unpack_double()"),
            Type::Bool => format!("{unpacker}.unpack_bool()"),
            Type::String => format!("{unpacker}.unpack_string()"),
            Type::Product(_) => format!("{}({unpacker})", self.name_of(ty)?),
            Type::Sequence(_) => format!("{}_unpack({unpacker})", self.name_of(ty)?),
            Type::Extern(name) => {
                let ext = self.extern_type(name, origin)?;
                match ext.transport {
                    TransportMode::Direct => format!(
                        "*(({raw} *) {unpacker}.unpack(sizeof({raw})))",
                        raw = ext.raw_type
                    ),
                    _ => format!("{name}_unpack({unpacker})"),
                }
            }
        })
    }

    /// Expression rendering `code` as a `std::string`.
    pub fn as_string_code(&self, ty: &Type, code: &str) -> CodegenResult<String> {
        Ok(match ty {
            Type::Int => format!("ca_int_to_string({code})"),
            Type::Float => format!("ca_float_to_string({code})"),
            Type::Double => format!("ca_double_to_string({code})"),
            Type::Bool => format!("ca_bool_to_string({code})"),
            Type::String => code.to_string(),
            Type::Product(_) => format!("({code}).as_string()"),
            Type::Sequence(_) => format!("{}_as_string({code})", self.name_of(ty)?),
            Type::Extern(name) => {
                let ext = self.project.extern_type(name)?;
                if ext.code.getstring.is_some() {
                    format!("{name}_getstring({code})")
                } else {
                    format!("std::string({})", string_literal(name))
                }
            }
        })
    }

    // ══════════════════════════════════════════════════════════════════════
    // Declarations
    // ══════════════════════════════════════════════════════════════════════

    /// Emit extern codec functions, then one class or function group per
    /// composite type.
    pub fn emit(&self, w: &mut CodeWriter, frags: &mut Fragments) -> CodegenResult<()> {
        for ext in &self.project.extern_types {
            self.emit_extern(w, frags, ext);
        }
        for ty in &self.order {
            match ty {
                Type::Product(_) => self.emit_product(w, ty)?,
                Type::Sequence(inner) => self.emit_sequence(w, ty, inner)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn emit_extern(&self, w: &mut CodeWriter, frags: &mut Fragments, ext: &ExternType) {
        let name = &ext.name;
        let raw = &ext.raw_type;
        let origin = |part: &str| Origin::part(ext.id, part);
        if let Some(code) = &ext.code.getstring {
            frags.write_function(
                w,
                &format!("{name}_getstring"),
                &format!("std::string {name}_getstring(const {raw} &obj)"),
                code,
                FragmentKind::ExternCode,
                origin("getstring"),
            );
        }
        match ext.transport {
            TransportMode::Disabled => {}
            TransportMode::Direct => {
                w.line(format!(
                    "static_assert(std::is_trivially_copyable<{raw} >::value, {});",
                    string_literal(&format!(
                        "extern type '{name}' uses direct transport but is not trivially copyable"
                    ))
                ));
                w.emptyline();
            }
            TransportMode::Custom => {
                // Presence was checked by `collect`.
                let bodies = [
                    (
                        "getsize",
                        format!("size_t {name}_getsize(const {raw} &obj)"),
                        &ext.code.getsize,
                    ),
                    (
                        "pack",
                        format!("void {name}_pack(CaPacker &packer, const {raw} &obj)"),
                        &ext.code.pack,
                    ),
                    (
                        "unpack",
                        format!("{raw} {name}_unpack(CaUnpacker &unpacker)"),
                        &ext.code.unpack,
                    ),
                ];
                for (part, decl, code) in bodies {
                    if let Some(code) = code {
                        frags.write_function(
                            w,
                            &format!("{name}_{part}"),
                            &decl,
                            code,
                            FragmentKind::ExternCode,
                            origin(part),
                        );
                    }
                }
            }
        }
    }

    fn emit_product(&self, w: &mut CodeWriter, ty: &Type) -> CodegenResult<()> {
        let Type::Product(fields) = ty else {
            return Ok(());
        };
        let class = self.name_of(ty)?.to_string();
        let transportable = self.is_transportable(ty);
        // Codecs below are only built for transportable types and cannot fail
        // on transport, so this origin is never reported.
        let origin = Origin::element(0);

        let mut members = Vec::with_capacity(fields.len());
        for field in fields {
            members.push((field.name.as_str(), &field.ty, self.cpp_type(&field.ty)?));
        }

        w.class_begin(&class, None);
        w.line(format!("{class}() {{}}"));
        if !members.is_empty() {
            let params: Vec<String> = members
                .iter()
                .map(|(name, _, cpp)| format!("const {cpp} &{name}"))
                .collect();
            let inits: Vec<String> = members
                .iter()
                .map(|(name, _, _)| format!("{name}({name})"))
                .collect();
            w.line(format!(
                "{class}({}) : {} {{}}",
                params.join(", "),
                inits.join(", ")
            ));
        }
        if transportable {
            // Members are initialized in declaration order, which is wire order.
            let mut inits = Vec::with_capacity(members.len());
            for (name, fty, _) in &members {
                inits.push(format!("{name}({})", self.unpack_code(fty, "unpacker", &origin)?));
            }
            if inits.is_empty() {
                w.line(format!("{class}(CaUnpacker &unpacker) {{}}"));
            } else {
                w.line(format!(
                    "{class}(CaUnpacker &unpacker) : {} {{}}",
                    inits.join(", ")
                ));
            }
        }
        w.emptyline();

        // as_string
        w.function_begin("std::string as_string() const");
        let mut parts = vec!["std::string(\"(\")".to_string()];
        for (i, (name, fty, _)) in members.iter().enumerate() {
            if i > 0 {
                parts.push("\",\"".into());
            }
            parts.push(self.as_string_code(fty, name)?);
        }
        parts.push("\")\"".into());
        w.line(format!("return {};", parts.join(" + ")));
        w.block_end();

        if transportable {
            w.function_begin("size_t get_mem_size() const");
            let sizes: Vec<String> = members
                .iter()
                .map(|(name, fty, _)| self.size_code(fty, name, &origin))
                .collect::<CodegenResult<_>>()?;
            if sizes.is_empty() {
                w.line("return 0;");
            } else {
                w.line(format!("return {};", sizes.join(" + ")));
            }
            w.block_end();

            w.function_begin("void pack(CaPacker &packer) const");
            for (name, fty, _) in &members {
                w.line(self.pack_code(fty, "packer", name, &origin)?);
            }
            w.block_end();
        }

        if self.is_comparable(ty) {
            w.function_begin(format!("bool operator==(const {class} &other) const"));
            if members.is_empty() {
                w.line("return true;");
            } else {
                let eqs: Vec<String> = members
                    .iter()
                    .map(|(name, _, _)| format!("{name} == other.{name}"))
                    .collect();
                w.line(format!("return {};", eqs.join(" && ")));
            }
            w.block_end();
        }
        w.emptyline();

        for (name, _, cpp) in &members {
            w.line(format!("{cpp} {name};"));
        }
        w.class_end();
        w.emptyline();
        Ok(())
    }

    fn emit_sequence(&self, w: &mut CodeWriter, ty: &Type, inner: &Type) -> CodegenResult<()> {
        let name = self.name_of(ty)?.to_string();
        let cpp = self.cpp_type(ty)?;
        let elem = self.cpp_type(inner)?;
        let origin = Origin::element(0);

        w.function_begin(format!(
            "std::string {name}_as_string(const {cpp} &vector)"
        ));
        w.line("std::stringstream osstream;");
        w.line("osstream << \"[\";");
        w.for_index("i", "vector.size()");
        w.line("if (i > 0) { osstream << \",\"; }");
        w.line(format!(
            "osstream << {};",
            self.as_string_code(inner, "vector[i]")?
        ));
        w.block_end();
        w.line("osstream << \"]\";");
        w.line("return osstream.str();");
        w.function_end();

        if !self.is_transportable(ty) {
            return Ok(());
        }

        w.function_begin(format!("size_t {name}_size(const {cpp} &vector)"));
        if inner.fixed_width().is_some() {
            w.line(format!("return sizeof(size_t) + vector.size() * sizeof({elem});"));
        } else {
            w.line("size_t size = sizeof(size_t);");
            w.for_index("i", "vector.size()");
            w.line(format!(
                "size += {};",
                self.size_code(inner, "vector[i]", &origin)?
            ));
            w.block_end();
            w.line("return size;");
        }
        w.function_end();

        w.function_begin(format!(
            "void {name}_pack(CaPacker &packer, const {cpp} &vector)"
        ));
        w.line("packer.pack_size(vector.size());");
        w.for_index("i", "vector.size()");
        w.line(self.pack_code(inner, "packer", "vector[i]", &origin)?);
        w.block_end();
        w.function_end();

        w.function_begin(format!("{cpp} {name}_unpack(CaUnpacker &unpacker)"));
        w.line("size_t count = unpacker.unpack_size();");
        w.line(format!("{cpp} vector;"));
        w.line("vector.reserve(count);");
        w.for_index("i", "count");
        w.line(format!(
            "vector.push_back({});",
            self.unpack_code(inner, "unpacker", &origin)?
        ));
        w.block_end();
        w.line("return vector;");
        w.function_end();
        Ok(())
    }
}

/// Structural identifier of a type, before collision suffixes.
fn safe_name(ty: &Type) -> String {
    match ty {
        Type::Int => "int".into(),
        Type::Float => "float".into(),
        Type::Double => "double".into(),
        Type::Bool => "bool".into(),
        Type::String => "string".into(),
        Type::Product(fields) => {
            let mut name = format!("Tuple{}", fields.len());
            for field in fields {
                name.push('_');
                name.push_str(&safe_name(&field.ty));
            }
            name
        }
        Type::Sequence(inner) => format!("Array_{}", safe_name(inner)),
        Type::Extern(name) => name.clone(),
    }
}
