//! `sr`: run one script through the scriptrun dispatcher.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptrun_core::config::LogFormat;
use scriptrun_core::logging::init_logging;
use scriptrun_core::{
    ConsoleOutput, DocumentId, EngineKind, ExecutionResult, HostHandles, InterfaceKind,
    LogNotifier, ScriptDispatcher, ScriptRuntime, ScriptrunConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sr")]
#[command(author, version, about = "Multi-runtime script runner", long_about = None)]
struct Cli {
    /// Config file (defaults to $SCRIPTRUN_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script; exits with its result code
    Run {
        /// Script to run
        script: PathBuf,

        /// Engine kind, inferred from the extension when omitted
        #[arg(short, long)]
        engine: Option<EngineKind>,

        /// Host entry point: command, event_handler or availability
        #[arg(short, long, default_value = "command")]
        interface: InterfaceKind,

        /// Binary address for the binary engine (`module.wasm::Type`)
        #[arg(short, long)]
        address: Option<String>,

        /// Host document the interpreter pool is keyed by
        #[arg(long, default_value = "default")]
        document: String,

        /// Run in debug mode
        #[arg(long)]
        debug: bool,

        /// Keep interpreter globals after the run
        #[arg(long)]
        keep_globals: bool,

        /// Discard the document's pooled interpreters first
        #[arg(long)]
        refresh: bool,

        /// Command data handle, as JSON
        #[arg(long)]
        data: Option<String>,
    },

    /// List engine kinds and their handlers
    Engines,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("sr: {err:#}");
            ExitCode::from(FATAL_EXIT)
        }
    }
}

/// Setup failures, kept clear of the result codes.
const FATAL_EXIT: u8 = 64;

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = ScriptrunConfig::load_or_default(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    init_logging(&config.logging).context("failed to initialize logging")?;

    let dispatcher = ScriptDispatcher::with_defaults(&config, Arc::new(LogNotifier))?;

    match cli.command {
        Commands::Engines => {
            for (kind, handler) in dispatcher.engine_names() {
                println!("{:<10} .{:<5} {handler}", kind.as_str(), kind.extension());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            script,
            engine,
            interface,
            address,
            document,
            debug,
            keep_globals,
            refresh,
            data,
        } => {
            let engine = match engine {
                Some(engine) => engine,
                None => EngineKind::from_script_path(&script).with_context(|| {
                    format!("cannot infer an engine for {}; pass --engine", script.display())
                })?,
            };
            let command_data = data
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("--data is not valid JSON")?
                .unwrap_or_default();

            let mut runtime = ScriptRuntime::new(engine, script, Arc::new(ConsoleOutput))
                .with_interface(interface)
                .with_address(address.unwrap_or_default())
                .with_host(HostHandles {
                    document: DocumentId::new(document),
                    command_data,
                    ..HostHandles::default()
                })
                .with_debug(debug)
                .with_clean_engine(keep_globals)
                .with_refresh(refresh);

            let result = dispatcher.dispatch(&mut runtime);
            tracing::info!(%result, code = result.code(), "script finished");
            if result.is_failure() && !runtime.diagnostics.is_empty() {
                tracing::debug!(diagnostics = %runtime.diagnostics.render(), "failure report");
            }
            if !runtime.command_message.is_empty() {
                println!("{}", runtime.command_message);
            }
            Ok(exit_code(result))
        }
    }
}

fn exit_code(result: ExecutionResult) -> ExitCode {
    u8::try_from(result.code()).map_or(ExitCode::FAILURE, ExitCode::from)
}
