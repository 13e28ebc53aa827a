use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser, Subcommand};

use monicelli::ast::Module;
use monicelli::bytecode::{verify_artifact, Artifact};
use monicelli::compiler::{CompileError, CompileOptions, Compiler};
use monicelli::vm::{RuntimeError, Vm};
use monicelli::{source_offset, write_artifact, ARTIFACT_EXTENSION};

/// Monicelli - compile Monicelli syntax trees to stack bytecode
#[derive(Parser)]
#[command(name = "monicelli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Report each phase on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a syntax tree to a bytecode artifact
    Compile {
        /// Path to the JSON syntax tree
        file: PathBuf,

        /// Where to write the artifact (default: next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Artifact name (default: the module's name)
        #[arg(long)]
        name: Option<String>,

        /// Original Monicelli source, used to point at errors
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Run a compiled artifact
    Run {
        /// Path to the artifact
        file: PathBuf,
    },

    /// Check a syntax tree for errors without writing anything
    Check {
        /// Path to the JSON syntax tree
        file: PathBuf,

        /// Original Monicelli source, used to point at errors
        #[arg(long)]
        source: Option<PathBuf>,
    },

    /// Disassemble an artifact
    Disasm {
        /// Path to the artifact
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            file,
            output,
            name,
            source,
        } => compile_file(&file, output, name, source.as_deref(), cli.verbose),
        Commands::Run { file } => run_file(&file, cli.verbose),
        Commands::Check { file, source } => check_file(&file, source.as_deref(), cli.verbose),
        Commands::Disasm { file } => disasm_file(&file),
    }
}

/// Compile a syntax tree and write the artifact
fn compile_file(
    path: &Path,
    output: Option<PathBuf>,
    name: Option<String>,
    source: Option<&Path>,
    verbose: bool,
) -> ExitCode {
    let Some(module) = load_module(path) else {
        return ExitCode::FAILURE;
    };

    let options = CompileOptions {
        artifact_name: name,
        ..CompileOptions::default()
    };
    let Some(bytes) = compile_module(&module, options, source, verbose) else {
        return ExitCode::FAILURE;
    };

    let output = output.unwrap_or_else(|| path.with_extension(ARTIFACT_EXTENSION));
    if let Err(e) = write_artifact(&output, &bytes) {
        eprintln!("Error writing artifact '{}': {}", output.display(), e);
        return ExitCode::FAILURE;
    }
    if verbose {
        eprintln!("wrote {} bytes to '{}'", bytes.len(), output.display());
    }

    println!("Programma come se fosse compilato.");
    ExitCode::SUCCESS
}

/// Check a syntax tree for errors without writing anything
fn check_file(path: &Path, source: Option<&Path>, verbose: bool) -> ExitCode {
    let Some(module) = load_module(path) else {
        return ExitCode::FAILURE;
    };
    if compile_module(&module, CompileOptions::default(), source, verbose).is_none() {
        return ExitCode::FAILURE;
    }

    println!("No errors found in '{}'", path.display());
    ExitCode::SUCCESS
}

/// Run a compiled artifact, exiting with the program's status
fn run_file(path: &Path, verbose: bool) -> ExitCode {
    let filename = path.to_string_lossy().to_string();
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let vm = match Vm::load(&bytes) {
        Ok(vm) => vm,
        Err(e) => {
            report_runtime_error(&filename, &e);
            return ExitCode::FAILURE;
        }
    };
    if verbose {
        eprintln!(
            "loaded artifact '{}' ({} blocks)",
            vm.artifact().name,
            vm.artifact().blocks.len()
        );
    }

    match vm.run() {
        Ok(status) => {
            if verbose {
                eprintln!("exited with status {}", status);
            }
            ExitCode::from(status as u8)
        }
        Err(e) => {
            report_runtime_error(&filename, &e);
            ExitCode::FAILURE
        }
    }
}

/// Print the blocks of an artifact
fn disasm_file(path: &Path) -> ExitCode {
    let filename = path.to_string_lossy().to_string();
    let artifact = match fs::read(path).map(|bytes| Artifact::from_bytes(&bytes)) {
        Ok(Ok(artifact)) => artifact,
        Ok(Err(e)) => {
            eprintln!("Error loading artifact '{}': {}", filename, e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error reading file '{}': {}", filename, e);
            return ExitCode::FAILURE;
        }
    };

    print!("{}", artifact.disassemble());

    if let Err(e) = verify_artifact(&artifact) {
        eprintln!("warning: artifact does not verify: {}", e);
    }
    ExitCode::SUCCESS
}

fn load_module(path: &Path) -> Option<Module> {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            return None;
        }
    };
    match Module::from_json(&text) {
        Ok(module) => Some(module),
        Err(e) => {
            eprintln!("Error loading '{}': {}", path.display(), e);
            None
        }
    }
}

fn compile_module(module: &Module, options: CompileOptions, source: Option<&Path>, verbose: bool) -> Option<Vec<u8>> {
    let compiler = Compiler::with_options(options);
    if verbose {
        eprintln!(
            "lowering {} functions of '{}'",
            module.functions.len(),
            compiler.options().artifact_name.as_deref().unwrap_or(&module.name)
        );
    }

    match compiler.compile(module) {
        Ok(bytes) => {
            if verbose {
                eprintln!("assembled and verified {} bytes", bytes.len());
            }
            Some(bytes)
        }
        Err(e) => {
            report_compile_error(source, &e);
            None
        }
    }
}

// ---
// Error reporting with ariadne
// ---

fn report_compile_error(source: Option<&Path>, error: &CompileError) {
    let text = source.and_then(|path| fs::read_to_string(path).ok());
    let filename = match (source, error.location()) {
        (Some(path), _) => path.to_string_lossy().to_string(),
        (None, Some(loc)) if loc.is_known() => loc.source.clone(),
        _ => "<input>".to_string(),
    };
    let filename = filename.as_str();

    let span = match (&text, error.location()) {
        (Some(text), Some(loc)) if loc.is_known() => {
            let len = text.chars().count();
            source_offset(text, loc.line, loc.column).map(|start| start..(start + 1).min(len))
        }
        _ => None,
    };

    let report = match span {
        Some(span) => Report::<(&str, std::ops::Range<usize>)>::build(ReportKind::Error, filename, span.start)
            .with_message("Compile error")
            .with_label(
                Label::new((filename, span))
                    .with_message(format!("{}", error))
                    .with_color(Color::Red),
            )
            .finish(),
        None => {
            let message = match error.location() {
                Some(loc) if loc.is_known() => format!("Compile error at {}: {}", loc, error),
                _ => format!("Compile error: {}", error),
            };
            Report::<(&str, std::ops::Range<usize>)>::build(ReportKind::Error, filename, 0)
                .with_message(message)
                .finish()
        }
    };

    let _ = report.print((filename, Source::from(text.unwrap_or_default())));
}

fn report_runtime_error(filename: &str, error: &RuntimeError) {
    eprintln!("\x1b[1;31mRuntime error\x1b[0m in {}: {}", filename, error);
}
