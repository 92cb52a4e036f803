//! Petra compiler: orchestrates the full compilation pipeline.
//!
//! ```text
//! Project + PlanTable → Validator → C++ Codegen → program.cpp (+ source map)
//! ```
//!
//! Validation collects every model error it can find; generation runs only
//! on a clean model and stops at its first failure.

pub mod validate;

use petra_codegen::{generate_with_options, CodegenOptions, Generated, SourceMap};
use petra_types::{CompileErrors, PlanTable, Project};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use validate::Validator;

/// Outcome of a compilation, in the shape front ends consume as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResult {
    pub success: bool,
    /// The generated C++ program.
    pub source: Option<String>,
    pub errors: CompileErrors,
    /// Hex SHA-256 of `source`.
    pub fingerprint: Option<String>,
    pub source_map: Option<SourceMap>,
}

impl CompileResult {
    fn failed(errors: CompileErrors) -> Self {
        Self {
            success: false,
            source: None,
            errors,
            fingerprint: None,
            source_map: None,
        }
    }
}

/// Validate a project and its plans without generating anything.
pub fn check(project: &Project, plans: &PlanTable) -> CompileErrors {
    let mut errors = CompileErrors::empty();
    Validator::new(project, plans, &mut errors).check();
    errors
}

/// Compile with default options.
pub fn compile(project: &Project, plans: &PlanTable) -> Result<Generated, CompileErrors> {
    compile_with_options(project, plans, &CodegenOptions::default())
}

/// Validate, then generate.
pub fn compile_with_options(
    project: &Project,
    plans: &PlanTable,
    options: &CodegenOptions,
) -> Result<Generated, CompileErrors> {
    let errors = check(project, plans);
    if errors.has_errors() {
        tracing::debug!(errors = errors.total_errors, "validation failed");
        return Err(errors);
    }
    generate_with_options(project, plans, options).map_err(|err| {
        let mut errors = CompileErrors::empty();
        errors.push_error(err.to_model_error());
        errors
    })
}

/// Compile into a [`CompileResult`].
pub fn compile_to_result(
    project: &Project,
    plans: &PlanTable,
    options: &CodegenOptions,
) -> CompileResult {
    match compile_with_options(project, plans, options) {
        Ok(generated) => CompileResult {
            success: true,
            fingerprint: Some(fingerprint(&generated.source)),
            source: Some(generated.source),
            errors: CompileErrors::empty(),
            source_map: Some(generated.source_map),
        },
        Err(errors) => CompileResult::failed(errors),
    }
}

/// Compile a JSON-encoded project and optional plan table; returns the JSON
/// of a [`CompileResult`]. Malformed input is reported like any other error.
pub fn compile_json(project_json: &str, plans_json: Option<&str>) -> String {
    let result = match parse_inputs(project_json, plans_json) {
        Ok((project, plans)) => compile_to_result(&project, &plans, &CodegenOptions::default()),
        Err(error) => {
            let mut errors = CompileErrors::empty();
            errors.push_error(error);
            CompileResult::failed(errors)
        }
    };
    serde_json::to_string(&result).unwrap_or_else(|e| {
        format!(
            r#"{{"success":false,"source":null,"errors":{{"errors":[{{"message":"Serialization error: {}"}}],"warnings":[],"total_errors":1,"total_warnings":0}},"fingerprint":null,"source_map":null}}"#,
            e
        )
    })
}

/// Decode a project and its plans. A missing plan table means every
/// transition has the empty plan.
pub fn parse_inputs(
    project_json: &str,
    plans_json: Option<&str>,
) -> Result<(Project, PlanTable), petra_types::ModelError> {
    use petra_types::{ErrorCode, ModelError};

    let project: Project = serde_json::from_str(project_json).map_err(|e| {
        ModelError::unlocated(ErrorCode::TYPE_MISMATCH, format!("invalid project JSON: {e}"))
    })?;
    let plans = match plans_json {
        Some(json) => serde_json::from_str(json).map_err(|e| {
            ModelError::unlocated(
                ErrorCode::PLAN_INVALID_INSTRUCTION,
                format!("invalid plan JSON: {e}"),
            )
        })?,
        None => PlanTable::default(),
    };
    Ok((project, plans))
}

/// Hex SHA-256 digest of a generated program.
pub fn fingerprint(source: &str) -> String {
    Sha256::digest(source.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
