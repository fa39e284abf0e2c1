use clap::Parser;
use std::path::PathBuf;

use dfgopt::config::OptimizerOptions;
use dfgopt::pass::PassId;
use dfgopt::pipeline::{compute_fingerprint, run_optimizer, OptimizeState, PipelineError};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitFormat {
    Text,
    Dot,
    Fingerprint,
}

#[derive(Parser, Debug)]
#[command(
    name = "dfgopt",
    version,
    about = "Dataflow-graph optimizer: folds, literalizes, inlines and prunes a graph to a fixpoint"
)]
struct Cli {
    /// Input graph description (.json)
    graph: PathBuf,

    /// Output file path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = EmitFormat::Text)]
    emit: EmitFormat,

    /// Optimizer options file (.json); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum optimizer rounds
    #[arg(long)]
    max_loops: Option<usize>,

    /// Per-pass visit budget multiplier
    #[arg(long)]
    loop_abort: Option<usize>,

    /// Certify the graph after every pass
    #[arg(long)]
    paranoid: bool,

    /// Inline calls whose callee or container has at most N fields
    #[arg(long, value_name = "N", conflicts_with = "no_inline")]
    inline_threshold: Option<usize>,

    /// Do not inline function calls
    #[arg(long)]
    no_inline: bool,

    /// Report values whose type is still ambiguous after optimization
    #[arg(long)]
    check_types: bool,

    /// Print optimizer passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // ── Options ──
    let mut options = match &cli.config {
        Some(path) => match OptimizerOptions::from_path(path) {
            Ok(o) => o,
            Err(e) => {
                eprintln!("dfgopt: error: {}", e);
                std::process::exit(2);
            }
        },
        None => OptimizerOptions::default(),
    };
    if let Some(n) = cli.max_loops {
        options.max_loops = n;
    }
    if let Some(n) = cli.loop_abort {
        options.loop_abort = n;
    }
    if let Some(n) = cli.inline_threshold {
        options.inline_threshold = Some(n);
    }
    if cli.no_inline {
        options.passes.retain(|p| *p != PassId::Inline);
    }
    options.paranoid |= cli.paranoid;
    options.check_types |= cli.check_types;
    if let Err(e) = options.validate() {
        eprintln!("dfgopt: error: {}", e);
        std::process::exit(2);
    }

    // ── Read and load graph ──
    let source = match std::fs::read_to_string(&cli.graph) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("dfgopt: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };
    let mut graph = match dfgopt::load::load_graph(&source) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("dfgopt: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };
    info!(
        regions = graph.region_count(),
        values = graph.edge_count(),
        functions = graph.functions().count(),
        "loaded {}",
        cli.graph.display()
    );

    // ── Optimize ──
    let mut state = OptimizeState::new();
    let mut shown = 0;
    let result = run_optimizer(&mut graph, &mut state, &options, |_, diags| {
        for diag in diags {
            eprintln!("dfgopt: {}", diag);
        }
        shown += diags.len();
    });
    for diag in state.diagnostics.iter().skip(shown) {
        eprintln!("dfgopt: {}", diag);
    }
    match result {
        Ok(()) => {}
        Err(e @ PipelineError::Compile { .. }) => {
            eprintln!("dfgopt: {}", e);
            std::process::exit(1);
        }
        Err(PipelineError::Internal(e)) => {
            eprintln!("dfgopt: internal error: {}", e);
            std::process::exit(101);
        }
    }
    info!(
        rounds = state.rounds,
        converged = state.converged,
        values = graph.edge_count(),
        "optimized"
    );

    // ── Emit ──
    let text = match cli.emit {
        EmitFormat::Text => graph.to_string(),
        EmitFormat::Dot => dfgopt::dot::emit_dot(&graph),
        EmitFormat::Fingerprint => compute_fingerprint(&source, &graph).to_json(),
    };
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("dfgopt: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
