mod commands;

use clap::{ArgAction, Parser, Subcommand};
use commands::{exit_code_for, EXIT_INPUT_ERROR};
use std::process::ExitCode;
use strata_core::{install_signal_handler, CommitOptions, Compression, Config, Engine};
use strata_store::Context;

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Commit container filesystem changes into OCI images"
)]
struct Cli {
    /// Path to the strata store directory (overrides the config file).
    #[arg(long, global = true)]
    store: Option<String>,

    /// Namespace to operate in.
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Snapshotter to use when a container does not record one.
    #[arg(long, global = true)]
    snapshotter: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new image from a container's changes.
    Commit {
        /// Author (e.g. "Jane Doe <jane@example.com>").
        #[arg(short, long)]
        author: Option<String>,
        /// Commit message.
        #[arg(short, long)]
        message: Option<String>,
        /// Apply a Dockerfile instruction to the image (only CMD and ENTRYPOINT).
        #[arg(short = 'c', long = "change")]
        changes: Vec<String>,
        /// Pause the container during commit.
        #[arg(
            short,
            long,
            action = ArgAction::Set,
            default_value_t = true,
            num_args = 0..=1,
            default_missing_value = "true"
        )]
        pause: bool,
        /// Layer compression: gzip, zstd or uncompressed.
        #[arg(long, default_value = "gzip")]
        compression: Compression,
        /// Also include the parent layer's changes (diff against the grandparent).
        #[arg(long, default_value_t = false)]
        remove_top_layer: bool,
        /// Container id, id prefix, or name.
        container: String,
        /// Target image, REPOSITORY[:TAG].
        repository: String,
    },
    /// Inspect and label snapshots.
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
}

#[derive(Debug, Subcommand)]
enum SnapshotCommands {
    /// List snapshots.
    #[command(alias = "list")]
    Ls,
    /// Show snapshot details as JSON.
    Info {
        /// Snapshot key.
        snapshot: String,
    },
    /// Merge labels into a snapshot.
    Update {
        /// Snapshot key.
        snapshot: String,
        /// Labels to set, KEY=VALUE.
        labels: Vec<String>,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load_default() {
        Ok(config) => config.with_overrides(
            cli.store.as_deref(),
            cli.snapshotter.as_deref(),
            cli.namespace.as_deref(),
        ),
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };
    tracing::debug!(
        "store {}, namespace {}, snapshotter {}",
        config.store.display(),
        config.namespace,
        config.snapshotter
    );

    let ctx = Context::background().with_namespace(config.namespace.as_str());
    install_signal_handler(&ctx);
    let engine = Engine::new(&config.store);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Commit {
            author,
            message,
            changes,
            pause,
            compression,
            remove_top_layer,
            container,
            repository,
        } => commands::commit::run(
            &ctx,
            &engine,
            &container,
            &repository,
            &CommitOptions {
                author,
                message,
                changes,
                pause,
                compression,
                remove_top_layer,
                snapshotter: config.snapshotter.clone(),
            },
        ),
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Ls => {
                commands::snapshot::list(&ctx, &engine, &config.snapshotter, json_output)
            }
            SnapshotCommands::Info { snapshot } => {
                commands::snapshot::info(&ctx, &engine, &config.snapshotter, &snapshot)
            }
            SnapshotCommands::Update { snapshot, labels } => {
                commands::snapshot::update(&ctx, &engine, &config.snapshotter, &snapshot, &labels)
            }
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
