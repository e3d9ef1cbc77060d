//! Parcel command line: materialize, inspect and sweep a content cache.

use clap::{ArgAction, Args, Parser, Subcommand};
use derive_more::{Display, Error};
use parcel_cache::janitor::{Janitor, SweepStats};
use parcel_cache::key::directory_name;
use parcel_cache::{Cache, CacheKey, CacheOptions, EntryState, MaterializeMode};
use parcel_config::{CacheSettings, Config, format_duration};
use parcel_source::backend::DirectorySource;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Display, Error)]
enum CliError {
    #[display("could not load configuration")]
    Config,
    #[display("no content source root configured (set source.root or PARCEL_SOURCE__ROOT)")]
    NoSource,
    #[display("could not open content source")]
    Source,
    #[display("cache operation failed")]
    Cache,
    #[display("could not read cached content")]
    Read,
}

type Result<T> = std::result::Result<T, exn::Exn<CliError>>;

/// Materialize remote content packages into a shared filesystem cache.
#[derive(Parser, Debug)]
#[command(name = "parcel", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (toml, yaml or json)
    #[arg(short, long, global = true, env = "PARCEL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Materialize an entry and list its files
    Acquire(AcquireArgs),
    /// Show the state of an entry without changing it
    Inspect(KeyArgs),
    /// Evict expired entries now
    Sweep,
    /// Print the directory name an entry is stored under
    Encode {
        item: Uuid,
        version: i32,
    },
    /// Print the effective cache settings
    Settings,
}

#[derive(Args, Debug)]
struct KeyArgs {
    collection: Uuid,
    sub: Uuid,
    item: Uuid,
    version: i32,
}

impl KeyArgs {
    fn key(&self) -> CacheKey {
        CacheKey::new(self.collection, self.sub, self.item, self.version)
    }
}

#[derive(Args, Debug)]
struct AcquireArgs {
    #[command(flatten)]
    key: KeyArgs,

    /// Store the content as a single file, even if it is a valid package
    #[arg(long)]
    as_file: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("parcel=info,parcel_cache=info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        },
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).map_err(|e| e.raise(CliError::Config))?;
    tracing::debug!(root = %config.cache.root.display(), source = %config.source.name, "Configuration ready");
    match cli.command {
        Commands::Acquire(args) => acquire(&config, &args),
        Commands::Inspect(args) => inspect(&config, &args.key()),
        Commands::Sweep => sweep(&config.cache),
        Commands::Encode { item, version } => {
            let key = CacheKey::new(Uuid::nil(), Uuid::nil(), item, version);
            println!("{}", directory_name(&key));
            Ok(())
        },
        Commands::Settings => {
            settings(&config);
            Ok(())
        },
    }
}

fn cache_options(settings: &CacheSettings) -> CacheOptions {
    CacheOptions {
        root: settings.root.clone(),
        ttl: settings.ttl,
        fallback_invalid_as_file: settings.fallback_invalid_as_file,
        sweep_interval: settings.sweep_interval,
        max_deletions_per_sweep: settings.max_deletions_per_sweep,
        quiescence_window: settings.quiescence_window,
        lock_acquire_timeout: settings.lock_acquire_timeout,
        retry_backoff: settings.retry_backoff,
        manifest_name: settings.manifest_name.clone(),
    }
}

fn open_cache(config: &Config) -> Result<Cache> {
    let Some(root) = config.source.root.as_deref() else {
        exn::bail!(CliError::NoSource);
    };
    let source = DirectorySource::new(&config.source.name, root).map_err(|e| e.raise(CliError::Source))?;
    Cache::new(cache_options(&config.cache), Arc::new(source)).map_err(|e| e.raise(CliError::Cache))
}

fn acquire(config: &Config, args: &AcquireArgs) -> Result<()> {
    let cache = open_cache(config)?;
    let mode = match args.as_file {
        true => MaterializeMode::AlwaysAsFile,
        false => MaterializeMode::AttemptAsPackage,
    };
    let handle = cache.acquire(&args.key.key(), mode).map_err(|e| e.raise(CliError::Cache))?;
    let record = handle.record();
    println!("directory: {}", handle.directory().display());
    println!("format:    {:?}", record.format);
    println!("length:    {}", record.content_length);
    println!("modified:  {}", record.source_last_modified);
    let files = handle.reader().and_then(|reader| reader.list()).map_err(|e| e.raise(CliError::Read))?;
    for file in files {
        println!("  {}", file.display());
    }
    Ok(())
}

fn inspect(config: &Config, key: &CacheKey) -> Result<()> {
    let cache = open_cache(config)?;
    let paths = cache.paths(key);
    println!("directory: {}", paths.directory.display());
    match cache.inspect(key).map_err(|e| e.raise(CliError::Cache))? {
        EntryState::Absent => println!("state:     absent"),
        EntryState::Busy => println!("state:     busy"),
        EntryState::Corrupt(reason) => println!("state:     corrupt ({reason})"),
        EntryState::Cached { record, last_access } => {
            println!("state:     cached");
            println!("format:    {:?}", record.format);
            println!("length:    {}", record.content_length);
            println!("modified:  {}", record.source_last_modified);
            if let Some(elapsed) = last_access.and_then(|at| at.elapsed().ok()) {
                println!("idle:      {}s", elapsed.as_secs());
            }
        },
    }
    Ok(())
}

fn sweep(settings: &CacheSettings) -> Result<()> {
    let janitor = Janitor::new(
        &settings.root,
        settings.ttl,
        settings.sweep_interval,
        settings.max_deletions_per_sweep,
    );
    let SweepStats {
        examined,
        deleted,
        skipped_in_use,
        failed,
        ..
    } = janitor.sweep_now().map_err(|e| e.raise(CliError::Cache))?;
    println!("examined {examined}, deleted {deleted}, in use {skipped_in_use}, failed {failed}");
    Ok(())
}

fn settings(config: &Config) {
    let cache = &config.cache;
    println!("cache.root:                    {}", cache.root.display());
    println!(
        "cache.ttl:                     {}",
        cache.ttl.map(format_duration).unwrap_or_else(|| "never".to_string())
    );
    println!("cache.fallback_invalid_as_file: {}", cache.fallback_invalid_as_file);
    println!("cache.sweep_interval:          {}", format_duration(cache.sweep_interval));
    println!("cache.max_deletions_per_sweep: {}", cache.max_deletions_per_sweep);
    println!("cache.quiescence_window:       {}", format_duration(cache.quiescence_window));
    println!("cache.lock_acquire_timeout:    {}", format_duration(cache.lock_acquire_timeout));
    println!("cache.retry_backoff:           {}", format_duration(cache.retry_backoff));
    println!("cache.manifest_name:           {}", cache.manifest_name);
    println!("source.name:                   {}", config.source.name);
    match &config.source.root {
        Some(root) => println!("source.root:                   {}", root.display()),
        None => println!("source.root:                   (unset)"),
    }
}
