//! Stress command - drive a hook from many threads through a context manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use clap::Args;
use hookfs_core::config::{ENV_MAX_ACTIVE, ENV_MAX_IDLE, ENV_START_COUNT};
use hookfs_core::{
    ContextManager, Dispatcher, HookArg, HookReply, LuaContextFactory, PoolConfig,
    PooledContextManager, ScriptSource, SingleContextManager,
};

/// Pool sizing flags. A flag left unset falls back to its `HOOKFS_*`
/// environment variable, then the config file, then built-in defaults.
#[derive(Args, Debug, Default)]
pub struct PoolArgs {
    /// JSON file with start_count / max_active / max_idle
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Contexts built before the first call
    #[arg(long, env = ENV_START_COUNT)]
    pub start_count: Option<usize>,

    /// Maximum contexts checked out at once
    #[arg(long, env = ENV_MAX_ACTIVE)]
    pub max_active: Option<usize>,

    /// Maximum idle contexts kept for reuse
    #[arg(long, env = ENV_MAX_IDLE)]
    pub max_idle: Option<usize>,
}

impl PoolArgs {
    /// Resolve the final pool configuration.
    pub fn resolve(&self) -> hookfs_core::Result<PoolConfig> {
        let mut config = match &self.config {
            Some(path) => PoolConfig::from_file(path)?,
            None => PoolConfig::default(),
        };

        if let Some(v) = self.start_count {
            config.start_count = v;
        }
        if let Some(v) = self.max_active {
            config.max_active = v;
        }
        if let Some(v) = self.max_idle {
            config.max_idle = v;
        }
        config.validate()?;
        Ok(config)
    }
}

pub struct StressOptions {
    pub hook: String,
    pub args: Vec<String>,
    pub threads: usize,
    pub calls: usize,
    pub single: bool,
}

#[derive(Default)]
struct Tally {
    ok: AtomicU64,
    errno: AtomicU64,
    data: AtomicU64,
    failed: AtomicU64,
}

fn parse_arg(raw: &str) -> HookArg {
    match raw.parse::<i64>() {
        Ok(n) => HookArg::Int(n),
        Err(_) => HookArg::Str(raw.to_string()),
    }
}

pub fn execute(script: &Path, options: &StressOptions, pool: &PoolArgs) -> anyhow::Result<()> {
    let source = ScriptSource::from_file(script)?;
    let factory = LuaContextFactory::new(source);

    let manager: Arc<dyn ContextManager> = if options.single {
        Arc::new(SingleContextManager::new(factory)?)
    } else {
        let config = pool.resolve()?;
        tracing::debug!("Pool configuration: {:?}", config);
        Arc::new(PooledContextManager::new(config, factory)?)
    };
    let dispatcher = Dispatcher::new(manager);

    let args: Vec<HookArg> = options.args.iter().map(|a| parse_arg(a)).collect();
    let tally = Tally::default();
    let start = Instant::now();

    thread::scope(|scope| {
        for _ in 0..options.threads {
            scope.spawn(|| {
                for _ in 0..options.calls {
                    match dispatcher.call(&options.hook, &args) {
                        Ok(HookReply::Status(n)) if n < 0 => tally.errno.fetch_add(1, Ordering::Relaxed),
                        Ok(HookReply::Status(_)) => tally.ok.fetch_add(1, Ordering::Relaxed),
                        Ok(HookReply::Data(_)) => tally.data.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            tracing::warn!("Call to '{}' failed: {}", options.hook, e);
                            tally.failed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
    });

    let elapsed = start.elapsed();
    let stats = dispatcher.stats();
    let total = (options.threads * options.calls) as u64;

    println!(
        "{} calls to '{}' on {} thread(s) in {:.2?}",
        total, options.hook, options.threads, elapsed
    );
    println!(
        "  status ok: {}  errno: {}  data: {}  failed: {}",
        tally.ok.load(Ordering::Relaxed),
        tally.errno.load(Ordering::Relaxed),
        tally.data.load(Ordering::Relaxed),
        tally.failed.load(Ordering::Relaxed)
    );
    println!(
        "  contexts created: {}  destroyed: {}  idle: {}  (max_active={}, max_idle={})",
        stats.created, stats.destroyed, stats.idle, stats.max_active, stats.max_idle
    );

    dispatcher.shutdown()?;

    let failed = tally.failed.load(Ordering::Relaxed);
    if failed > 0 {
        anyhow::bail!("{} of {} calls failed", failed, total);
    }
    Ok(())
}
