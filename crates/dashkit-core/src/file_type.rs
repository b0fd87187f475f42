//! File-type classification with an owned lookup cache
//!
//! Definitions come from the remote `fileDefinitions.json`. Lookups with
//! default arguments are memoised per path; the memo is owned by the
//! registry and cleared whenever the definitions change.

use anyhow::Result;
use glob::Pattern;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::data_cache::DataCache;
use crate::vfs::normalize;

/// Logical data path of the file definitions
pub const FILE_DEFINITIONS_PATH: &str = "data/dist/minecraftBedrock/fileDefinitions.json";

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::None => Vec::new(),
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Detect {
    pack_type: Option<String>,
    scope: OneOrMany,
    matcher: OneOrMany,
    file_extensions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    id: String,
    #[serde(default)]
    detect: Detect,
}

/// One compiled file-type definition
#[derive(Debug, Clone)]
pub struct FileType {
    pub id: String,
    scopes: Vec<String>,
    matchers: Vec<Pattern>,
    extensions: Vec<String>,
    /// Definition as published, handed back to the compiler unchanged
    pub definition: Value,
}

pub(crate) fn pack_dir(pack_type: &str) -> Option<&'static str> {
    match pack_type {
        "behaviorPack" => Some("BP"),
        "resourcePack" => Some("RP"),
        "skinPack" => Some("SP"),
        "worldTemplate" => Some("WT"),
        _ => None,
    }
}

fn join_pack(pack: Option<&str>, rest: &str) -> String {
    match pack {
        Some(pack) => normalize(&format!("{pack}/{rest}")),
        None => normalize(rest),
    }
}

impl FileType {
    pub fn from_definition(definition: Value) -> Result<Self> {
        let raw: RawDefinition = serde_json::from_value(definition.clone())?;
        let pack = raw.detect.pack_type.as_deref().and_then(pack_dir);

        let scopes = raw
            .detect
            .scope
            .into_vec()
            .iter()
            .map(|scope| join_pack(pack, scope))
            .collect();

        let matchers = raw
            .detect
            .matcher
            .into_vec()
            .iter()
            .filter_map(|m| match Pattern::new(&join_pack(pack, m)) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid matcher {:?} in file type {}: {}", m, raw.id, e);
                    None
                }
            })
            .collect();

        Ok(Self {
            id: raw.id,
            scopes,
            matchers,
            extensions: raw.detect.file_extensions,
            definition,
        })
    }

    fn matches_location(&self, path: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| path == scope || path.starts_with(&format!("{scope}/")))
            || self.matchers.iter().any(|pattern| pattern.matches(path))
    }

    fn matches_extension(&self, path: &str) -> bool {
        self.extensions.is_empty() || self.extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}

/// All known file types plus the per-path lookup memo
#[derive(Debug, Default)]
pub struct FileTypeRegistry {
    types: Vec<FileType>,
    lookup_cache: HashMap<String, Option<usize>>,
}

impl FileTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON array of definitions; invalid entries are skipped
    pub fn from_definitions(definitions: &Value) -> Self {
        let mut registry = Self::new();
        registry.load_definitions(definitions);
        registry
    }

    fn load_definitions(&mut self, definitions: &Value) {
        self.types.clear();
        self.lookup_cache.clear();

        let Some(items) = definitions.as_array() else {
            warn!("File definitions are not an array");
            return;
        };
        for item in items {
            match FileType::from_definition(item.clone()) {
                Ok(file_type) => self.types.push(file_type),
                Err(e) => warn!("Skipping invalid file definition: {}", e),
            }
        }
        debug!("Loaded {} file types", self.types.len());
    }

    /// (Re)load definitions through the data cache
    pub async fn setup(&mut self, data: &DataCache) -> Result<()> {
        let definitions = data.fetch(FILE_DEFINITIONS_PATH).await?;
        self.load_definitions(&definitions);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Register a plugin-provided type; invalidates the lookup memo
    pub fn add_plugin_file_type(&mut self, file_type: FileType) {
        self.lookup_cache.clear();
        self.types.push(file_type);
    }

    /// Classify a path. Only default-argument lookups are memoised.
    pub fn get(&mut self, path: &str, search_type: Option<&str>, check_extension: bool) -> Option<&FileType> {
        let path = normalize(path);
        if search_type.is_some() || !check_extension {
            let index = self.find(&path, search_type, check_extension);
            return index.map(|i| &self.types[i]);
        }

        let index = match self.lookup_cache.get(&path) {
            Some(cached) => *cached,
            None => {
                let found = self.find(&path, None, true);
                self.lookup_cache.insert(path, found);
                found
            }
        };
        index.map(|i| &self.types[i])
    }

    fn find(&self, path: &str, search_type: Option<&str>, check_extension: bool) -> Option<usize> {
        self.types.iter().position(|file_type| {
            search_type.map_or(true, |id| file_type.id == id)
                && file_type.matches_location(path)
                && (!check_extension || file_type.matches_extension(path))
        })
    }

    /// Number of memoised lookups
    pub fn cached_lookups(&self) -> usize {
        self.lookup_cache.len()
    }
}
