//! Build Pipelines - incremental and full builds
//!
//! Features:
//! - Incremental build: diff `src/` against the last manifest and tell the
//!   compiler only what changed, with crash recovery via the session lock
//! - Full build: run `<dash> build` once and adopt its dist output
//! - Compiler resolution: global command or a locally installed version

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::compiler::{Compiler, HostContext};
use crate::config::{
    check_full_build_config, declared_packs, prepare_full_build_config, rewrite_project_config,
    validate_project_config, FilterConfig, Layout, DASH_GITHUB_REPO,
};
use crate::data_cache::DataCache;
use crate::diff::{source_diff, Manifest};
use crate::error::DashError;
use crate::hasher::Hasher;
use crate::install::Installer;
use crate::ioutil::{self, path_exists, remove_if_exists};
use crate::session::SessionLock;
use crate::version::{parse_range, resolve_version};
use crate::vfs::{MappedFileSystem, MappedFileSystemOptions, VirtualContent};

/// Pack folders the compiler reads and writes
pub const PACKS: [&str; 2] = ["BP", "RP"];

/// Path the compiler uses for its development state
pub const DASH_DATA_PATH: &str = ".bridge/.dash.development.json";

/// Path the compiler reads the project config from
pub const PROJECT_CONFIG_PATH: &str = "config.json";

/// What an incremental build did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub updated: usize,
    pub removed: usize,
    /// The previous run died mid-compile and the cache was wiped
    pub recovered: bool,
    pub copied: usize,
}

/// Read `config.json` from the project root, validate it and rewrite it
/// for a single "project" pack
pub async fn load_project_config(root_dir: &Path) -> Result<Value> {
    let mut config: Value = ioutil::read_json_file(root_dir.join(PROJECT_CONFIG_PATH)).await?;
    validate_project_config(&config)?;
    rewrite_project_config(&mut config);
    Ok(config)
}

/// Read `config.json` for a one-shot `dash build`. Only the packs the
/// project declares are pointed at the working directory.
pub async fn load_full_build_config(root_dir: &Path) -> Result<Value> {
    let mut config: Value = ioutil::read_json_file(root_dir.join(PROJECT_CONFIG_PATH)).await?;
    check_full_build_config(&config)?;
    prepare_full_build_config(&mut config);
    Ok(config)
}

/// Move the working-directory packs under `src/`, replacing what a
/// previous run left there
pub async fn move_packs_into_src(layout: &Layout) -> Result<()> {
    tokio::fs::create_dir_all(&layout.src_dir).await?;
    for pack in PACKS {
        let from = layout.pack_dir(pack);
        let to = layout.src_dir.join(pack);
        remove_if_exists(&to).await?;
        if !path_exists(&from).await? {
            debug!("No {} directory to move", pack);
            continue;
        }
        tokio::fs::rename(&from, &to)
            .await
            .with_context(|| format!("failed to move {} into {}", from.display(), to.display()))?;
    }
    Ok(())
}

/// The file system the compiler sees during an incremental build
pub fn mapped_file_system(layout: &Layout, project_config: &Value) -> Result<MappedFileSystem> {
    let file_mappings = HashMap::from([(DASH_DATA_PATH.to_string(), layout.dash_data_file.clone())]);

    let directory_mappings = PACKS
        .iter()
        .map(|pack| {
            (
                format!("builds/dev/project {pack}"),
                layout.file_cache_dir.join(pack),
            )
        })
        .collect();

    let virtual_files = HashMap::from([(
        PROJECT_CONFIG_PATH.to_string(),
        VirtualContent::Text(serde_json::to_string(project_config)?),
    )]);

    Ok(MappedFileSystem::new(
        &layout.src_dir,
        MappedFileSystemOptions {
            file_mappings,
            directory_mappings,
            virtual_files,
        },
    ))
}

/// Incremental build.
///
/// `make_compiler` receives the host context (file system and data cache)
/// and returns the compiler to drive. The session lock is taken before the
/// new manifest is written and released once the compiler is done; any
/// failure in between leaves it behind so the next run starts from scratch.
pub async fn incremental_build<F, C>(
    layout: &Layout,
    project_config: &Value,
    hasher: Hasher,
    data: Arc<DataCache>,
    make_compiler: F,
) -> Result<BuildSummary>
where
    F: FnOnce(HostContext) -> Result<C>,
    C: Compiler,
{
    move_packs_into_src(layout).await?;

    let lock = SessionLock::new(&layout.lock_file);
    let recovered = lock.is_held().await?;
    let expected = if recovered {
        warn!("Previous build did not finish; discarding cached compiler output.");
        remove_if_exists(&layout.file_cache_dir).await?;
        remove_if_exists(&layout.dash_data_file).await?;
        Vec::new()
    } else {
        Manifest::load(&layout.manifest_file).await?
    };

    let src_dir = layout.src_dir.clone();
    let changes = tokio::task::spawn_blocking(move || source_diff(&expected, &src_dir, &hasher))
        .await
        .context("diff task panicked")??;

    info!(
        "Found {} updated files and {} removed files.",
        changes.updated_files.len(),
        changes.removed_files.len()
    );

    tokio::fs::create_dir_all(&layout.file_cache_dir).await?;
    let guard = lock.acquire().await?;
    Manifest::save(&layout.manifest_file, &changes.hashes).await?;

    let fs = Arc::new(mapped_file_system(layout, project_config)?);
    let compiler = make_compiler(HostContext::new(fs, data))?;
    compiler.setup().await?;

    if !changes.removed_files.is_empty() {
        compiler
            .unlink_multiple(&changes.removed_files, changes.updated_files.is_empty())
            .await?;
    }
    if !changes.updated_files.is_empty() {
        compiler.update_files(&changes.updated_files, true).await?;
    }
    guard.release().await?;
    compiler.shutdown().await?;

    info!("Copying cached compiled files into BP and RP directories.");
    let mut copied = 0;
    for pack in PACKS {
        let dest = layout.pack_dir(pack);
        tokio::fs::create_dir_all(&dest).await?;
        let cached = layout.file_cache_dir.join(pack);
        if path_exists(&cached).await? {
            copied += ioutil::copy_dir(&cached, &dest).await?;
        }
    }

    Ok(BuildSummary {
        updated: changes.updated_files.len(),
        removed: changes.removed_files.len(),
        recovered,
        copied,
    })
}

/// Find the compiler executable, installing it when needed
pub async fn resolve_compiler(layout: &Layout, config: &FilterConfig) -> Result<PathBuf> {
    if config.use_global_dash {
        info!("Using global dash installation.");
        return Ok(PathBuf::from(&config.global_dash_command));
    }

    info!("Using local dash installation.");
    let range = parse_range(&config.dash_version)?;
    let installer = Installer::new(&layout.bin_dir, DASH_GITHUB_REPO)?;
    let plan = resolve_version(&range, config.auto_update, &installer).await?;
    debug!("Version plan: {:?}", plan);
    installer.apply(&plan).await
}

/// Full build: write the prepared project config, run `<dash> build` in the
/// working directory and replace the declared packs with its dist output
pub async fn full_build(layout: &Layout, project_config: &Value, dash: &Path) -> Result<()> {
    tokio::fs::write(
        layout.work_dir.join(PROJECT_CONFIG_PATH),
        serde_json::to_string(project_config)?,
    )
    .await?;

    let status = Command::new(dash)
        .arg("build")
        .current_dir(&layout.work_dir)
        .status()
        .await
        .with_context(|| format!("failed to run {}", dash.display()))?;
    if !status.success() {
        return Err(DashError::BuildFailed(status.code().unwrap_or(1)).into());
    }

    for pack in declared_packs(project_config) {
        let built = layout
            .work_dir
            .join("builds")
            .join("dist")
            .join(format!("project {pack}"));
        let dest = layout.pack_dir(pack);

        let moved = async {
            remove_if_exists(&dest).await?;
            tokio::fs::rename(&built, &dest).await
        }
        .await;
        if let Err(e) = moved {
            warn!("Failed to move {} into {}: {}", built.display(), dest.display(), e);
        }
    }
    Ok(())
}
