//! Main program assembler.
//!
//! Orchestrates the code generation pipeline:
//! 1. Collect every type the project uses and assign codec identifiers
//! 2. Emit the header, parameters and extern/type codecs
//! 3. Emit user functions
//! 4. Emit every net class, then every net's functions
//! 5. Emit `main`, which registers the nets with the runtime and starts it
//!
//! Generation is a pure function of the project, the match plans and the
//! options: the same inputs always give byte-identical output.

use petra_types::{PlanTable, Project};
use serde::{Deserialize, Serialize};

use crate::codec::TypeCodecs;
use crate::emitter::ExprEmitter;
use crate::error::CodegenResult;
use crate::net;
use crate::source_map::{FragmentKind, Fragments, SourceMap};
use crate::writer::{string_literal, CodeWriter};

// ══════════════════════════════════════════════════════════════════════════════
// Public API
// ══════════════════════════════════════════════════════════════════════════════

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Wrap user code in `#line` directives pointing at its model element.
    pub line_directives: bool,
    /// File name the generated source is written to, used to restore line
    /// numbering after user code.
    pub output_name: String,
    /// File with extern type definitions and other user declarations,
    /// included after the runtime headers.
    pub head: Option<String>,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            line_directives: true,
            output_name: "program.cpp".into(),
            head: Some("head.cpp".into()),
        }
    }
}

/// The generated program.
#[derive(Debug, Clone)]
pub struct Generated {
    pub source: String,
    pub source_map: SourceMap,
}

/// Generate the C++ program for `project` with default options.
pub fn generate(project: &Project, plans: &PlanTable) -> CodegenResult<Generated> {
    generate_with_options(project, plans, &CodegenOptions::default())
}

/// Generate the C++ program for `project`.
///
/// Any error aborts the whole build; no partial output is returned.
pub fn generate_with_options(
    project: &Project,
    plans: &PlanTable,
    options: &CodegenOptions,
) -> CodegenResult<Generated> {
    tracing::info!(project = %project.name, nets = project.nets.len(), "generating C++");
    let codecs = TypeCodecs::collect(project)?;
    tracing::debug!(composites = codecs.composites().len(), "types collected");
    let cx = Ctx {
        project,
        plans,
        codecs: &codecs,
    };
    let mut frags = Fragments::new(options.line_directives, options.output_name.clone());
    let mut w = CodeWriter::new();

    write_header(&mut w, options);
    write_parameters(&cx, &mut w);
    codecs.emit(&mut w, &mut frags)?;
    write_user_functions(&cx, &mut frags, &mut w)?;
    for n in &project.nets {
        net::emit_net_class(&cx, &mut frags, &mut w, n)?;
    }
    for n in &project.nets {
        net::emit_net_functions(&cx, &mut frags, &mut w, n)?;
    }
    write_main(&cx, &mut w);

    let source = w.finish();
    tracing::info!(bytes = source.len(), fragments = frags.map.entries.len(), "generation finished");
    Ok(Generated {
        source,
        source_map: frags.map,
    })
}

// ══════════════════════════════════════════════════════════════════════════════
// Context
// ══════════════════════════════════════════════════════════════════════════════

/// Read-only state shared by the emitters.
pub(crate) struct Ctx<'g, 'p> {
    pub project: &'p Project,
    pub plans: &'p PlanTable,
    pub codecs: &'g TypeCodecs<'p>,
}

impl<'g, 'p> Ctx<'g, 'p> {
    /// A fresh emitter with no variables bound.
    pub fn emitter(&self) -> ExprEmitter<'g, 'p> {
        ExprEmitter::new(self.project, self.codecs)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Program prologue and epilogue
// ══════════════════════════════════════════════════════════════════════════════

fn write_header(w: &mut CodeWriter, options: &CodegenOptions) {
    w.line("/* This file is automatically generated");
    w.line("   do not edit this file directly! */");
    w.emptyline();
    for header in ["cailie.h", "algorithm", "stdlib.h", "stdio.h", "sstream", "type_traits"] {
        w.line(format!("#include <{header}>"));
    }
    if let Some(head) = &options.head {
        w.line(format!("#include {}", string_literal(head)));
    }
    w.emptyline();
}

fn write_parameters(cx: &Ctx<'_, '_>, w: &mut CodeWriter) {
    for p in &cx.project.parameters {
        w.line(format!("int __param_{};", p.name));
        w.function_begin(format!("int parameter_{}()", p.name));
        w.line(format!("return __param_{};", p.name));
        w.function_end();
    }
}

fn write_user_functions(
    cx: &Ctx<'_, '_>,
    frags: &mut Fragments,
    w: &mut CodeWriter,
) -> CodegenResult<()> {
    for f in &cx.project.functions {
        let mut params = Vec::with_capacity(f.params.len() + 1);
        if f.with_context {
            params.push("CaContext &ctx".to_string());
        }
        for p in &f.params {
            params.push(format!("const {} &{}", cx.codecs.cpp_type(&p.ty)?, p.name));
        }
        let func = format!("ufunction_{}", f.name);
        frags.write_function(
            w,
            &func,
            &format!(
                "{} {func}({})",
                cx.codecs.cpp_type(&f.return_type)?,
                params.join(", ")
            ),
            &f.code,
            FragmentKind::Function,
            petra_types::Origin::part(f.id, "function"),
        );
    }
    Ok(())
}

fn write_main(cx: &Ctx<'_, '_>, w: &mut CodeWriter) {
    let project = cx.project;
    w.function_begin("int main(int argc, char **argv)");
    w.line(format!(
        "ca_project_description({});",
        string_literal(&project.description)
    ));
    let params = &project.parameters;
    if params.is_empty() {
        w.line("ca_init(argc, argv, 0, NULL, NULL, NULL);");
    } else {
        let names: Vec<String> = params.iter().map(|p| string_literal(&p.name)).collect();
        let descriptions: Vec<String> = params
            .iter()
            .map(|p| string_literal(&p.description))
            .collect();
        let values: Vec<String> = params.iter().map(|p| format!("&__param_{}", p.name)).collect();
        w.line(format!("const char *pnames[] = {{{}}};", names.join(", ")));
        w.line(format!("const char *pdesc[] = {{{}}};", descriptions.join(", ")));
        w.line(format!("int *pvalues[] = {{{}}};", values.join(", ")));
        w.line(format!(
            "ca_init(argc, argv, {}, pnames, pvalues, pdesc);",
            params.len()
        ));
    }
    for (index, n) in project.nets.iter().enumerate() {
        w.line(format!(
            "CaNetDef *def_{0} = new CaNetDef({index}, {0}, {1}, spawn_{0}, {2}, {3});",
            n.id,
            n.transitions.len(),
            n.is_local,
            n.autohalt
        ));
        for (pos, tr) in n.transitions.iter().enumerate() {
            w.line(format!(
                "def_{}->register_transition({pos}, {1}, (CaEnableFn*) enable_{1}, enable_check_{1});",
                n.id, tr.id
            ));
        }
    }
    let defs: Vec<String> = project.nets.iter().map(|n| format!("def_{}", n.id)).collect();
    w.line(format!("CaNetDef *defs[] = {{{}}};", defs.join(", ")));
    w.line(format!("ca_setup({}, defs);", defs.len()));
    w.line("ca_spawn_toplevel_net(0);");
    w.line("ca_main();");
    w.line("return 0;");
    w.function_end();
}
