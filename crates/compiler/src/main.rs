//! Polish Compiler CLI
//!
//! Command-line interface for compiling Polish programs to native code and
//! running, checking or dumping them.

use clap::{Args, CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use polish_core::{Operation, TraceElement, interpret};
use polishc::{CompileError, CompilerConfig, PolishCompiler, Statement};
use std::ffi::c_void;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "polishc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Polish compiler - JIT compile stack-machine programs to native code", long_about = None)]
struct Cli {
    /// Compiler configuration file (TOML)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Where the program text comes from
#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// Program file
    #[arg(short, long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Program text given inline
    #[arg(short, long, value_name = "SRC")]
    expr: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program and call it with the given arguments
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Arguments; their count is the function's arity
        args: Vec<u64>,

        /// Use the reference interpreter instead of native code
        #[arg(long)]
        interpret: bool,
    },

    /// Validate a program's stack usage without generating code
    Check {
        #[command(flatten)]
        source: SourceArgs,

        /// Number of arguments
        #[arg(short, long, default_value_t = 0)]
        nargs: usize,
    },

    /// Print the generated machine code as hex
    Dump {
        #[command(flatten)]
        source: SourceArgs,

        /// Number of arguments
        #[arg(short, long, default_value_t = 0)]
        nargs: usize,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            source,
            args,
            interpret,
        } => run_program(&source, &args, interpret, config),
        Commands::Check { source, nargs } => run_check(&source, nargs),
        Commands::Dump { source, nargs } => run_dump(&source, nargs, config),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "polishc", &mut io::stdout());
}

fn load_config(path: Option<&Path>) -> CompilerConfig {
    match path {
        Some(path) => match CompilerConfig::from_file(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => CompilerConfig::default(),
    }
}

/// Read and parse the program text, exiting on failure.
fn load_program(source: &SourceArgs) -> Vec<Statement> {
    let text = match (&source.file, &source.expr) {
        (Some(path), _) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Error: failed to read {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        (None, Some(expr)) => expr.clone(),
        (None, None) => {
            eprintln!("Error: no program given");
            process::exit(1);
        }
    };

    match polishc::parse(&text) {
        Ok(statements) => statements,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Prints each traced value, tagged with the position of its `trace`.
unsafe extern "C" fn print_trace(context: *mut c_void, value: u64) {
    println!("trace #{}: {}", context.addr(), value);
}

fn lower(statements: &[Statement]) -> Vec<Operation> {
    polishc::lower(statements, |position, index| {
        // SAFETY: print_trace never dereferences its context; the position
        // is carried as a plain address.
        Operation::TraceElement(unsafe {
            TraceElement::new(index, std::ptr::without_provenance_mut(position), print_trace)
        })
    })
}

/// Describe an error, pointing at the source line for invalid operations.
fn report(error: &CompileError, statements: &[Statement]) -> String {
    let statement = match error {
        CompileError::Invalid(invalid) => invalid
            .operation
            .and_then(|(position, _)| statements.get(position)),
        _ => None,
    };
    match statement {
        Some(statement) => format!(
            "{} (line {}, column {})",
            error,
            statement.line + 1,
            statement.column + 1
        ),
        None => error.to_string(),
    }
}

fn run_program(source: &SourceArgs, args: &[u64], use_interpreter: bool, config: CompilerConfig) {
    let statements = load_program(source);
    let program = lower(&statements);

    if use_interpreter {
        match interpret(&program, args) {
            Ok(value) => println!("{}", value),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let compiler = PolishCompiler::with_config(config);
    match compiler.compile(&program, args.len()) {
        Ok(function) => {
            info!("Compiled {} operations into {} bytes", program.len(), function.code_len());
            println!("{}", function.call(args));
        }
        Err(e) => {
            eprintln!("Error: {}", report(&e, &statements));
            process::exit(1);
        }
    }
}

fn run_check(source: &SourceArgs, nargs: usize) {
    let statements = load_program(source);
    let program = lower(&statements);

    match polishc::validate(&program, nargs) {
        Ok(depth) => println!("ok: {} operations, max stack depth {}", program.len(), depth.max),
        Err(e) => {
            eprintln!("Error: {}", report(&CompileError::Invalid(e), &statements));
            process::exit(1);
        }
    }
}

fn run_dump(source: &SourceArgs, nargs: usize, config: CompilerConfig) {
    let statements = load_program(source);
    let program = lower(&statements);

    let compiler = PolishCompiler::with_config(config);
    match compiler.generate(&program, nargs) {
        Ok(code) => {
            for (row, chunk) in code.chunks(16).enumerate() {
                let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{:08x}  {}", row * 16, bytes.join(" "));
            }
        }
        Err(e) => {
            eprintln!("Error: {}", report(&e, &statements));
            process::exit(1);
        }
    }
}
