use clap::Parser;
use std::path::PathBuf;
use std::process::exit;

use depcanon::dot::emit_flat_dot;
use depcanon::ir::Program;
use depcanon::pass::PassId;
use depcanon::pipeline::{compute_provenance, run_pipeline, CanonOptions, CanonState};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Rewritten program as JSON
    Program,
    /// Rewritten program in readable text form
    Text,
    /// Built graph tree as DOT
    Graph,
    /// Reduced graph tree as DOT
    Reduced,
    /// Input/output SHA-256 provenance
    Fingerprint,
}

impl EmitStage {
    fn terminal(self, cleanup: bool) -> PassId {
        match self {
            EmitStage::Graph => PassId::BuildGraphs,
            EmitStage::Reduced => PassId::Reduce,
            _ if cleanup => PassId::Cleanup,
            _ => PassId::Rewrite,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "depcanon",
    version,
    about = "Canonicalizes async dependency lists: per-level graphs, transitive reduction, rewrite"
)]
struct Cli {
    /// Input program (JSON)
    program: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output artifact
    #[arg(long, value_enum, default_value_t = EmitStage::Program)]
    emit: EmitStage,

    /// Options file (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Skip memory dependency inference
    #[arg(long)]
    no_trace: bool,

    /// Skip the cleanup passes
    #[arg(long)]
    no_cleanup: bool,

    /// Dump one DOT file per reduced scope graph into DIR
    #[arg(long, value_name = "DIR")]
    dump_dir: Option<PathBuf>,

    /// Log pass progress and timing
    #[arg(long)]
    verbose: bool,
}

fn fail(msg: impl std::fmt::Display) -> ! {
    eprintln!("depcanon: error: {msg}");
    exit(2);
}

fn load_options(cli: &Cli) -> CanonOptions {
    let mut options = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .unwrap_or_else(|e| fail(format_args!("{}: {e}", path.display())));
            serde_json::from_str(&text)
                .unwrap_or_else(|e| fail(format_args!("{}: {e}", path.display())))
        }
        None => CanonOptions::default(),
    };
    if cli.no_trace {
        options.infer_memory_deps = false;
    }
    if cli.no_cleanup {
        options.cleanup = false;
    }
    if let Some(dir) = &cli.dump_dir {
        options.dump_graphs = true;
        options.dump_dir = Some(dir.clone());
    }
    options
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = load_options(&cli);

    // ── Read and decode input ──
    let source = std::fs::read_to_string(&cli.program)
        .unwrap_or_else(|e| fail(format_args!("{}: {e}", cli.program.display())));
    let program: Program = serde_json::from_str(&source)
        .unwrap_or_else(|e| fail(format_args!("{}: {e}", cli.program.display())));
    if let Err(e) = program.validate() {
        fail(format_args!("{}: {e}", cli.program.display()));
    }

    // ── Run passes ──
    let mut state = CanonState::new(program);
    let result = run_pipeline(
        &mut state,
        cli.emit.terminal(options.cleanup),
        &options,
        |_, diags| {
            for d in diags {
                eprintln!("depcanon: {d}");
            }
        },
    );
    if let Err(e) = result {
        if let Some(fatal) = &e.fatal {
            eprintln!("depcanon: error: {fatal}");
        }
        eprintln!("depcanon: {e}");
        exit(1);
    }

    // ── Emit ──
    let program_json = || {
        serde_json::to_string_pretty(&state.program).unwrap_or_else(|e| fail(e))
    };
    let text = match cli.emit {
        EmitStage::Program => program_json() + "\n",
        EmitStage::Text => state.program.to_string(),
        EmitStage::Graph => state.graphs.as_ref().map(emit_flat_dot).unwrap_or_default(),
        EmitStage::Reduced => state
            .reduced
            .as_ref()
            .map(|r| emit_flat_dot(&r.tree))
            .unwrap_or_default(),
        EmitStage::Fingerprint => compute_provenance(&source, &program_json()).to_json(),
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                fail(format_args!("{}: {e}", path.display()));
            }
        }
        None => print!("{text}"),
    }
}
