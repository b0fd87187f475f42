//! Configuration - filter config, project config and on-disk layout

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::DashError;
use crate::hasher::HashAlgorithm;

/// Name of this filter; its data lives under `data/<FILTER_NAME>`
pub const FILTER_NAME: &str = "dashkit";

/// Environment variable holding the project root
pub const ROOT_DIR_ENV: &str = "ROOT_DIR";

/// GitHub repository of the standalone dash compiler
pub const DASH_GITHUB_REPO: &str = "bridge-core/deno-dash-compiler";

/// Read the project root from the environment
pub fn root_dir_from_env() -> Result<PathBuf, DashError> {
    match std::env::var_os(ROOT_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Err(DashError::MissingEnv(ROOT_DIR_ENV)),
    }
}

/// Every path the pipelines touch, derived from one working directory
#[derive(Debug, Clone)]
pub struct Layout {
    pub work_dir: PathBuf,
    pub src_dir: PathBuf,
    pub data_dir: PathBuf,
    pub bin_dir: PathBuf,
    pub filter_config_file: PathBuf,
    pub cache_dir: PathBuf,
    pub lock_file: PathBuf,
    pub manifest_file: PathBuf,
    pub dash_data_file: PathBuf,
    pub file_cache_dir: PathBuf,
    pub data_cache_dir: PathBuf,
}

impl Layout {
    pub fn new(work_dir: impl AsRef<Path>, algorithm: HashAlgorithm) -> Self {
        let work_dir = work_dir.as_ref().to_path_buf();
        let data_dir = work_dir.join("data").join(FILTER_NAME);
        let cache_dir = data_dir.join("cache");

        Self {
            src_dir: work_dir.join("src"),
            bin_dir: data_dir.join("bin"),
            filter_config_file: data_dir.join("config.json"),
            lock_file: cache_dir.join(".sessionlock"),
            manifest_file: cache_dir.join(algorithm.manifest_file_name()),
            dash_data_file: cache_dir.join("dashData.json"),
            file_cache_dir: cache_dir.join("files"),
            data_cache_dir: cache_dir.join("data"),
            cache_dir,
            data_dir,
            work_dir,
        }
    }

    /// Working-directory pack folder (`BP` / `RP`)
    pub fn pack_dir(&self, pack: &str) -> PathBuf {
        self.work_dir.join(pack)
    }
}

/// Filter settings from `data/<filter>/config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Semver range of the compiler to use
    pub dash_version: String,
    /// Install newer matching releases when available
    pub auto_update: bool,
    /// Skip local installs and run `global_dash_command`
    pub use_global_dash: bool,
    pub global_dash_command: String,
    pub hash_algorithm: HashAlgorithm,
    pub data_cache_ttl_hours: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dash_version: "^1.0.0".to_string(),
            auto_update: false,
            use_global_dash: false,
            global_dash_command: "dash_compiler".to_string(),
            hash_algorithm: HashAlgorithm::Sha256,
            data_cache_ttl_hours: 12,
        }
    }
}

impl FilterConfig {
    pub fn data_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.data_cache_ttl_hours.saturating_mul(60 * 60))
    }

    /// Load the filter config. Missing or malformed files fall back to
    /// defaults with a warning; other I/O errors propagate.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(value @ Value::Object(_)) => match serde_json::from_value(value) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("Invalid config file {:?}: {}", path, e),
                },
                Ok(_) => warn!("Invalid config file: root object is not an object."),
                Err(e) => warn!("Invalid config file {:?}: {}", path, e),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Missing config file at {:?}", path);
            }
            Err(e) => return Err(e.into()),
        }

        warn!("Using default configuration.");
        Ok(Self::default())
    }
}

/// Check that `compiler.plugins` exists and is an array
pub fn validate_project_config(config: &Value) -> Result<(), DashError> {
    let compiler = config
        .get("compiler")
        .ok_or_else(|| DashError::InvalidProjectConfig(r#"missing "compiler" key"#.into()))?;
    if !compiler.is_object() {
        return Err(DashError::InvalidProjectConfig(
            r#""compiler" key is not an object"#.into(),
        ));
    }
    match compiler.get("plugins") {
        None => Err(DashError::InvalidProjectConfig(
            r#"missing "plugins" key in "compiler""#.into(),
        )),
        Some(plugins) if !plugins.is_array() => Err(DashError::InvalidProjectConfig(
            r#""plugins" key in "compiler" is not an array"#.into(),
        )),
        Some(_) => Ok(()),
    }
}

/// Point packs at `./BP` and `./RP` and adapt plugins to a single "project" pack
pub fn rewrite_project_config(config: &mut Value) {
    config["packs"] = json!({
        "behaviorPack": "./BP",
        "resourcePack": "./RP",
    });

    let Some(plugins) = config
        .get_mut("compiler")
        .and_then(|c| c.get_mut("plugins"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    plugins.retain_mut(|plugin| {
        let name = match plugin {
            Value::String(name) => Some(name.clone()),
            Value::Array(parts) => parts.first().and_then(Value::as_str).map(str::to_owned),
            _ => None,
        };

        match name.as_deref() {
            Some("rewriteForPackaging") => {
                warn!(r#"Dash plugin "rewriteForPackaging" will be ignored."#);
                false
            }
            Some("simpleRewrite") => {
                match plugin {
                    Value::Array(parts) => {
                        if let Some(Value::Object(options)) = parts.get_mut(1) {
                            options.insert("packName".into(), json!("project"));
                            options.remove("packNameSuffix");
                        }
                    }
                    _ => *plugin = json!({ "packName": "project" }),
                }
                true
            }
            _ => true,
        }
    });
}

/// A one-shot build only needs the `compiler` key
pub fn check_full_build_config(config: &Value) -> Result<(), DashError> {
    if config.get("compiler").is_none() {
        return Err(DashError::InvalidProjectConfig(
            r#"missing "compiler" property"#.into(),
        ));
    }
    Ok(())
}

/// Point declared packs at `./BP` / `./RP` and adapt array-form plugins.
/// Undeclared packs stay undeclared.
pub fn prepare_full_build_config(config: &mut Value) {
    if let Some(packs) = config.get_mut("packs").and_then(Value::as_object_mut) {
        for (key, dir) in [("behaviorPack", "./BP"), ("resourcePack", "./RP")] {
            if let Some(path) = packs.get_mut(key) {
                *path = json!(dir);
            }
        }
    }

    let Some(plugins) = config
        .get_mut("compiler")
        .and_then(|c| c.get_mut("plugins"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    plugins.retain_mut(|plugin| {
        let Value::Array(parts) = plugin else {
            return true;
        };
        let name = parts.first().and_then(Value::as_str).map(str::to_owned);
        match name.as_deref() {
            Some("simpleRewrite") => {
                if let Some(Value::Object(options)) = parts.get_mut(1) {
                    options.insert("packName".into(), json!("project"));
                    options.remove("packNameSuffix");
                }
                true
            }
            Some("rewriteForPackaging") => {
                warn!(r#"Dash plugin "rewriteForPackaging" will be ignored."#);
                false
            }
            _ => true,
        }
    });
}

/// Packs declared in the project config, as working-directory folder names
pub fn declared_packs(config: &Value) -> Vec<&'static str> {
    let packs = config.get("packs");
    let mut declared = Vec::new();
    if packs.and_then(|p| p.get("behaviorPack")).is_some() {
        declared.push("BP");
    }
    if packs.and_then(|p| p.get("resourcePack")).is_some() {
        declared.push("RP");
    }
    declared
}
