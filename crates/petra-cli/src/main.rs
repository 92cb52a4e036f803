//! `petrac`: compiles Petra net projects to C++ and drives the reference
//! simulator.
//!
//! Exit status is 0 on success, 1 when the model is rejected or a file
//! cannot be read or written, and 2 for usage errors.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{arg, command, value_parser, ArgMatches, Command};
use colored::Colorize;
use petra_codegen::CodegenOptions;
use petra_compiler::{compile_to_result, parse_inputs};
use petra_eval::{serve, Simulation, SimulationConfig, UserCode};
use petra_types::{CompileErrors, ModelError, PlanTable, Project};
use tracing::{debug, info, Level};

fn main() -> ExitCode {
    let matches = command!()
        .subcommand_required(true)
        .arg(arg!(-v --verbose ... "Log more (repeat for trace output)").global(true))
        .subcommand(
            Command::new("build")
                .about("Compile a project into a C++ program")
                .arg(project_arg())
                .arg(plans_arg())
                .arg(
                    arg!(-o --output <FILE> "Where to write the program")
                        .value_parser(value_parser!(PathBuf))
                        .default_value("program.cpp"),
                )
                .arg(arg!(--head <FILE> "User declarations to include").default_value("head.cpp"))
                .arg(arg!(--"no-head" "Do not include a user declarations file"))
                .arg(arg!(--"no-line-directives" "Do not wrap user code in #line directives"))
                .arg(arg!(--json "Print the compile result as JSON instead of writing files")),
        )
        .subcommand(
            Command::new("check")
                .about("Validate a project without generating code")
                .arg(project_arg())
                .arg(plans_arg()),
        )
        .subcommand(
            Command::new("simulate")
                .about("Serve the control protocol for a project on stdin/stdout")
                .arg(project_arg())
                .arg(plans_arg())
                .arg(
                    arg!(--config <FILE> "Simulation settings as JSON")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-p --processes <N> "Number of simulated processes")
                        .value_parser(value_parser!(usize)),
                ),
        )
        .get_matches();

    init_logging(matches.get_count("verbose"));

    let outcome = match matches.subcommand() {
        Some(("build", args)) => build(args),
        Some(("check", args)) => check(args),
        Some(("simulate", args)) => simulate(args),
        _ => unreachable!(),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            failure.print();
            ExitCode::FAILURE
        }
    }
}

fn project_arg() -> clap::Arg {
    arg!(<project> "Project file (JSON)").value_parser(value_parser!(PathBuf))
}

fn plans_arg() -> clap::Arg {
    arg!(--plans <FILE> "Match plans (JSON); every transition gets the empty plan if omitted")
        .value_parser(value_parser!(PathBuf))
}

fn init_logging(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(level_for(verbosity))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Failures
// ══════════════════════════════════════════════════════════════════════════════

enum Failure {
    Io { path: PathBuf, error: io::Error },
    Model(CompileErrors),
    Other(String),
}

impl Failure {
    fn print(&self) {
        match self {
            Failure::Io { path, error } => {
                eprintln!("{} {}: {}", "error:".bright_red().bold(), path.display(), error);
            }
            Failure::Model(errors) => {
                for error in &errors.errors {
                    print_model_error(error);
                }
                for warning in &errors.warnings {
                    eprintln!("{} {}", "warning:".yellow().bold(), warning);
                }
                let hidden = errors.total_errors.saturating_sub(errors.errors.len());
                if hidden > 0 {
                    eprintln!("{}", format!("... and {hidden} more errors").bright_red());
                }
            }
            Failure::Other(message) => {
                eprintln!("{} {}", "error:".bright_red().bold(), message);
            }
        }
    }
}

fn print_model_error(error: &ModelError) {
    eprintln!("{} {}", "error:".bright_red().bold(), error);
    if let Some(suggestion) = &error.suggestion {
        eprintln!("  {} {}", "help:".cyan(), suggestion);
    }
}

fn single(error: ModelError) -> Failure {
    let mut errors = CompileErrors::empty();
    errors.push_error(error);
    Failure::Model(errors)
}

fn read(path: &Path) -> Result<String, Failure> {
    fs::read_to_string(path).map_err(|error| Failure::Io {
        path: path.to_path_buf(),
        error,
    })
}

fn required_path<'a>(args: &'a ArgMatches, id: &str) -> Result<&'a PathBuf, Failure> {
    args.get_one::<PathBuf>(id)
        .ok_or_else(|| Failure::Other(format!("missing argument <{id}>")))
}

fn load(args: &ArgMatches) -> Result<(Project, PlanTable), Failure> {
    let project_path = required_path(args, "project")?;
    let project_json = read(project_path)?;
    let plans_json = match args.get_one::<PathBuf>("plans") {
        Some(path) => Some(read(path)?),
        None => None,
    };
    let (project, plans) = parse_inputs(&project_json, plans_json.as_deref()).map_err(single)?;
    debug!(
        project = %project.name,
        nets = project.nets.len(),
        plans = plans.iter().count(),
        "loaded"
    );
    Ok((project, plans))
}

// ══════════════════════════════════════════════════════════════════════════════
// Subcommands
// ══════════════════════════════════════════════════════════════════════════════

fn build(args: &ArgMatches) -> Result<(), Failure> {
    let (project, plans) = load(args)?;
    let output = required_path(args, "output")?;
    let options = CodegenOptions {
        line_directives: !args.get_flag("no-line-directives"),
        output_name: output_name(output),
        head: if args.get_flag("no-head") {
            None
        } else {
            args.get_one::<String>("head").cloned()
        },
    };

    let result = compile_to_result(&project, &plans, &options);
    if args.get_flag("json") {
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| Failure::Other(e.to_string()))?;
        println!("{json}");
        return if result.success {
            Ok(())
        } else {
            Err(Failure::Model(CompileErrors::empty()))
        };
    }

    match result.source {
        Some(source) => {
            fs::write(output, source).map_err(|error| Failure::Io {
                path: output.clone(),
                error,
            })?;
            info!(
                output = %output.display(),
                fingerprint = result.fingerprint.as_deref().unwrap_or_default(),
                "program written"
            );
            Ok(())
        }
        None => Err(Failure::Model(result.errors)),
    }
}

fn check(args: &ArgMatches) -> Result<(), Failure> {
    let (project, plans) = load(args)?;
    let errors = petra_compiler::check(&project, &plans);
    if errors.has_errors() {
        return Err(Failure::Model(errors));
    }
    println!("{} {}", "ok".green().bold(), project.name);
    Ok(())
}

fn simulate(args: &ArgMatches) -> Result<(), Failure> {
    let (project, plans) = load(args)?;
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => serde_json::from_str::<SimulationConfig>(&read(path)?)
            .map_err(|e| Failure::Other(format!("invalid config {}: {e}", path.display())))?,
        None => SimulationConfig::default(),
    };
    if let Some(&processes) = args.get_one::<usize>("processes") {
        config.process_count = processes;
    }
    info!(processes = config.process_count, "starting simulation");

    let mut sim = Simulation::new(project, plans, UserCode::new(), config)
        .map_err(|e| Failure::Other(format!("cannot start simulation: {e}")))?;
    let stdin = io::stdin();
    let last = serve(&mut sim, stdin.lock(), io::stdout())
        .map_err(|e| Failure::Other(format!("simulation failed: {e}")))?;
    debug!(?last, "session closed");
    Ok(())
}

/// File name the generated program refers to itself by in `#line`.
fn output_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| CodegenOptions::default().output_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(0), Level::WARN);
        assert_eq!(level_for(1), Level::INFO);
        assert_eq!(level_for(2), Level::DEBUG);
        assert_eq!(level_for(7), Level::TRACE);
    }

    #[test]
    fn test_output_name_is_the_file_name() {
        assert_eq!(output_name(Path::new("build/out/net.cpp")), "net.cpp");
        assert_eq!(output_name(Path::new("program.cpp")), "program.cpp");
        assert_eq!(output_name(Path::new("..")), "program.cpp");
    }
}
