//! Dashkit CLI - Dash Compiler Filter for Regolith
//!
//! Commands:
//! - dashkit build            - Incremental build (only changed files)
//! - dashkit full-build       - One-shot `dash build` of the whole project
//! - dashkit install          - Resolve and install the compiler
//! - dashkit remove <glob>... - Delete files matching glob patterns
//! - dashkit hash <file>      - Hash a file
//! - dashkit clear-cache      - Drop the filter cache

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dashkit_core::compiler::rpc::SERVE_ARGS;
use dashkit_core::config::root_dir_from_env;
use dashkit_core::pipeline::{self, load_full_build_config, load_project_config, resolve_compiler};
use dashkit_core::{
    ioutil, DashError, DataCache, FilterConfig, HashAlgorithm, Hasher, HttpDataSource, Layout,
    ProcessCompiler,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Dashkit - Dash Compiler Filter for Regolith
#[derive(Parser)]
#[command(name = "dashkit", version, about = "Incremental dash compiler filter")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile only the files that changed since the last run
    Build,
    /// Run `dash build` on the whole project
    FullBuild,
    /// Resolve and install the configured compiler version
    Install,
    /// Remove files matching glob patterns
    Remove {
        /// Glob patterns
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Hash a file
    Hash {
        /// File to hash
        file: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Algorithm::Sha256)]
        algorithm: Algorithm,
    },
    /// Remove the filter cache
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum Algorithm {
    Sha256,
    Blake3,
}

impl From<Algorithm> for HashAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => HashAlgorithm::Sha256,
            Algorithm::Blake3 => HashAlgorithm::Blake3,
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command).await {
        std::process::exit(report_error(&e));
    }
}

/// Print a failed command and pick its exit status
fn report_error(e: &anyhow::Error) -> i32 {
    eprintln!("❌ {:#}", e);
    match e.downcast_ref::<DashError>() {
        Some(dash) => {
            if dash.is_config_error() {
                eprintln!("⚠️  Configuration error; the project was left untouched");
            }
            dash.exit_code()
        }
        None => 1,
    }
}

async fn run(command: Commands) -> Result<()> {
    let cwd = std::env::current_dir()?;

    match command {
        Commands::Build => {
            let root_dir = root_dir_from_env()?;
            let started = Instant::now();

            let project_config = load_project_config(&root_dir).await?;
            let config = load_filter_config(&cwd).await?;
            let layout = Layout::new(&cwd, config.hash_algorithm);
            let dash = resolve_compiler(&layout, &config).await?;
            debug!("Compiler: {}", dash.display());

            let data = DataCache::new(&layout.data_cache_dir, Arc::new(HttpDataSource::default()))
                .with_ttl(config.data_cache_ttl());

            let summary = pipeline::incremental_build(
                &layout,
                &project_config,
                Hasher::new(config.hash_algorithm),
                Arc::new(data),
                |host| ProcessCompiler::spawn(&dash, &SERVE_ARGS, host),
            )
            .await?;

            if summary.recovered {
                println!("⚠️  Previous build was interrupted; rebuilt from scratch");
            }
            println!(
                "📦 {} updated, {} removed, {} files copied",
                summary.updated, summary.removed, summary.copied
            );
            println!("✅ Build completed in {:?}", started.elapsed());
        }

        Commands::FullBuild => {
            let root_dir = root_dir_from_env()?;
            let started = Instant::now();

            let project_config = load_full_build_config(&root_dir).await?;
            let config = load_filter_config(&cwd).await?;
            let layout = Layout::new(&cwd, config.hash_algorithm);
            let dash = resolve_compiler(&layout, &config).await?;

            println!("🔨 {} build", dash.display());
            pipeline::full_build(&layout, &project_config, &dash).await?;
            println!("✅ Full build completed in {:?}", started.elapsed());
        }

        Commands::Install => {
            let config = load_filter_config(&cwd).await?;
            let layout = Layout::new(&cwd, config.hash_algorithm);
            let dash = resolve_compiler(&layout, &config).await?;
            println!("✅ dash ready: {}", dash.display());
        }

        Commands::Remove { patterns } => {
            let removed = ioutil::remove_globs(&patterns)?;
            for path in &removed {
                println!("   • {}", path.display());
            }
            println!("🗑️  Removed {} paths", removed.len());
        }

        Commands::Hash { file, algorithm } => {
            let hash = hash_file(&file, algorithm)?;
            println!("🔑 Hash: {}", hash);
        }

        Commands::ClearCache => {
            let layout = Layout::new(&cwd, HashAlgorithm::default());
            ioutil::remove_if_exists(&layout.cache_dir).await?;
            println!("🗑️  Cache cleared!");
        }
    }

    Ok(())
}

fn hash_file(file: &Path, algorithm: Algorithm) -> Result<String> {
    if !file.is_file() {
        bail!("file not found: {}", file.display());
    }
    Ok(Hasher::new(algorithm.into()).hash_file(file)?)
}

async fn load_filter_config(cwd: &Path) -> Result<FilterConfig> {
    let layout = Layout::new(cwd, HashAlgorithm::default());
    FilterConfig::load(&layout.filter_config_file).await
}
