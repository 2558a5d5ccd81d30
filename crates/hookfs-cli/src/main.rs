//! hookfs CLI - check and stress-test Lua filesystem scripts.

mod check;
mod stress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hookfs")]
#[command(about = "Lua-scripted filesystem hooks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a script and list the filesystem hooks it defines
    Check {
        /// Path to the Lua script
        script: PathBuf,

        /// Chunk name used in error messages (defaults to the path)
        #[arg(long)]
        name: Option<String>,
    },

    /// Call one hook from many threads through a context manager
    Stress {
        /// Path to the Lua script
        script: PathBuf,

        /// Hook to call
        #[arg(long, default_value = "getattr")]
        hook: String,

        /// Arguments passed to the hook (integers are passed as numbers)
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Number of caller threads
        #[arg(short, long, default_value = "4")]
        threads: usize,

        /// Calls per thread
        #[arg(short, long, default_value = "100")]
        calls: usize,

        /// Share one persistent context instead of a pool
        #[arg(long)]
        single: bool,

        #[command(flatten)]
        pool: stress::PoolArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format hookfs-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<hookfs_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Check { script, name } => {
            check::execute(&script, name.as_deref()).map_err(format_error)?;
        }

        Commands::Stress {
            script,
            hook,
            args,
            threads,
            calls,
            single,
            pool,
        } => {
            let options = stress::StressOptions {
                hook,
                args,
                threads,
                calls,
                single,
            };
            stress::execute(&script, &options, &pool).map_err(format_error)?;
        }
    }

    Ok(())
}
