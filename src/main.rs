use clap::{Parser, Subcommand, ValueEnum};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use stackjit::config::{DisasmFormat, JitConfig, JitMode};
use stackjit::jit::{self, Jit};
use stackjit::program::{self, LoadedProgram};
use stackjit::vm::Interpreter;
use stackjit::{Value, logging};

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JitModeArg {
    Off,
    On,
    Auto,
}

impl From<JitModeArg> for JitMode {
    fn from(arg: JitModeArg) -> Self {
        match arg {
            JitModeArg::Off => JitMode::Off,
            JitModeArg::On => JitMode::On,
            JitModeArg::Auto => JitMode::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DisasmFormatArg {
    Text,
    Json,
}

impl From<DisasmFormatArg> for DisasmFormat {
    fn from(arg: DisasmFormatArg) -> Self {
        match arg {
            DisasmFormatArg::Text => DisasmFormat::Text,
            DisasmFormatArg::Json => DisasmFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "stackjit")]
#[command(about = "A method-at-a-time JIT for a small stack bytecode", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct JitArgs {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JIT compilation mode (off, on, auto)
    #[arg(long, value_enum)]
    jit: Option<JitModeArg>,

    /// Disassemble compiled code to stderr
    #[arg(long)]
    dump_disasm: bool,

    /// Disassembly format (text, json)
    #[arg(long, value_enum)]
    disasm_format: Option<DisasmFormatArg>,

    /// Trace JIT compilation events
    #[arg(long)]
    trace_jit: bool,

    /// Size of the code buffer in bytes
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Maximum depth of nested callee compilation
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,
}

impl JitArgs {
    /// Config file values overridden by command-line flags.
    fn resolve(&self) -> Result<JitConfig, String> {
        let mut config = match &self.config {
            Some(path) => JitConfig::load(path).map_err(|e| e.to_string())?,
            None => JitConfig::default(),
        };
        if let Some(mode) = self.jit {
            config.jit_mode = mode.into();
        }
        if self.dump_disasm {
            config.dump_disasm = true;
        }
        if let Some(format) = self.disasm_format {
            config.disasm_format = format.into();
        }
        if self.trace_jit {
            config.trace_jit = true;
        }
        if let Some(size) = self.buffer_size {
            config.code_buffer_size = size;
        }
        if let Some(depth) = self.max_depth {
            config.max_compile_depth = depth;
        }
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a program's entry method and run it natively
    Run {
        /// The program file to run
        file: PathBuf,

        #[command(flatten)]
        options: JitArgs,

        /// Also interpret the program and fail if the results differ
        #[arg(long)]
        compare: bool,
    },
    /// Run a program with the reference interpreter only
    Interp {
        /// The program file to run
        file: PathBuf,
    },
    /// Print the bytecode of every method
    Dump {
        /// The program file to dump
        file: PathBuf,

        /// Also compile the entry method and print its machine code
        #[arg(long)]
        native: bool,

        /// Disassembly format (text, json)
        #[arg(long, value_enum, default_value = "text")]
        disasm_format: DisasmFormatArg,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            options,
            compare,
        } => options
            .resolve()
            .and_then(|config| run(&file, config, compare)),
        Commands::Interp { file } => {
            init_logging(false);
            load(&file).and_then(|loaded| {
                let value = interpret(&loaded)?;
                println!("{}", value);
                Ok(())
            })
        }
        Commands::Dump {
            file,
            native,
            disasm_format,
        } => {
            init_logging(false);
            dump(&file, native, disasm_format.into())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(trace_jit: bool) {
    if let Err(e) = logging::init(trace_jit) {
        eprintln!("warning: failed to initialize logging: {}", e);
    }
}

fn load(path: &Path) -> Result<LoadedProgram, String> {
    program::load(path).map_err(|e| e.to_string())
}

fn interpret(loaded: &LoadedProgram) -> Result<Value, String> {
    Interpreter::new(&loaded.program)
        .call(loaded.entry, loaded.receiver, &loaded.args)
        .map_err(|e| e.to_string())
}

fn run(path: &Path, config: JitConfig, compare: bool) -> Result<(), String> {
    init_logging(config.trace_jit);
    let loaded = load(path)?;

    let use_jit = match config.jit_mode {
        JitMode::Off => false,
        JitMode::On if !jit::is_supported() => {
            return Err("--jit on: native code execution is not supported on this platform".to_string());
        }
        JitMode::On => true,
        JitMode::Auto => jit::is_supported(),
    };
    if !use_jit {
        if config.trace_jit {
            tracing::info!("[JIT] disabled, interpreting");
        }
        println!("{}", interpret(&loaded)?);
        return Ok(());
    }

    let mut jit = Jit::new(config).map_err(|e| e.to_string())?;
    // compilation failures are fatal
    jit.compile_or_abort(&loaded.program, loaded.entry);
    let value = jit
        .execute(&loaded.program, loaded.entry, loaded.receiver, &loaded.args)
        .map_err(|e| e.to_string())?;

    if compare {
        let expected = interpret(&loaded)?;
        if expected != value {
            return Err(format!(
                "result mismatch: jit returned {}, interpreter returned {}",
                value, expected
            ));
        }
    }
    println!("{}", value);
    Ok(())
}

fn dump(path: &Path, native: bool, format: DisasmFormat) -> Result<(), String> {
    let loaded = load(path)?;
    for (id, _) in loaded.program.iter() {
        if let Some(listing) = loaded.program.listing(id) {
            print!("{}", listing);
        }
    }

    if native {
        let config = JitConfig {
            dump_disasm: true,
            disasm_format: format,
            ..JitConfig::default()
        };
        let mut jit = Jit::with_disasm_sink(config, Box::new(io::stdout())).map_err(|e| e.to_string())?;
        jit.compile(&loaded.program, loaded.entry)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}
