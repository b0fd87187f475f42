//! Pack-type lookup for compiler paths
//!
//! Definitions come from the remote `packDefinitions.json`. A path belongs
//! to the pack whose folder (`BP`, `RP`, ...) is its first segment.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::data_cache::DataCache;
use crate::file_type::pack_dir;
use crate::vfs::normalize;

/// Logical data path of the pack definitions
pub const PACK_DEFINITIONS_PATH: &str = "data/packages/minecraftBedrock/packDefinitions.json";

/// One pack definition and the folder it lives in
#[derive(Debug, Clone)]
pub struct PackType {
    pub id: String,
    pub folder: String,
    /// Definition as published, handed back to the compiler unchanged
    pub definition: Value,
}

impl PackType {
    /// `None` when the definition has no id or no known folder
    pub fn from_definition(definition: Value) -> Option<Self> {
        let id = definition.get("id")?.as_str()?.to_string();
        let folder = definition
            .get("packPath")
            .and_then(Value::as_str)
            .map(|path| normalize(path.trim_start_matches("./")))
            .or_else(|| pack_dir(&id).map(str::to_string))?;
        Some(Self {
            id,
            folder,
            definition,
        })
    }

    fn contains(&self, path: &str) -> bool {
        path == self.folder || path.starts_with(&format!("{}/", self.folder))
    }
}

#[derive(Debug, Default)]
pub struct PackTypeRegistry {
    types: Vec<PackType>,
}

impl PackTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON array of definitions; unusable entries are skipped
    pub fn from_definitions(definitions: &Value) -> Self {
        let mut registry = Self::new();
        registry.load_definitions(definitions);
        registry
    }

    fn load_definitions(&mut self, definitions: &Value) {
        self.types.clear();
        let Some(items) = definitions.as_array() else {
            warn!("Pack definitions are not an array");
            return;
        };
        for item in items {
            match PackType::from_definition(item.clone()) {
                Some(pack_type) => self.types.push(pack_type),
                None => warn!("Skipping pack definition without a known folder: {}", item),
            }
        }
        debug!("Loaded {} pack types", self.types.len());
    }

    /// (Re)load definitions through the data cache
    pub async fn setup(&mut self, data: &DataCache) -> Result<()> {
        let definitions = data.fetch(PACK_DEFINITIONS_PATH).await?;
        self.load_definitions(&definitions);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Pack type owning `path`
    pub fn get(&self, path: &str) -> Option<&PackType> {
        let path = normalize(path.trim_start_matches("./"));
        self.types.iter().find(|pack_type| pack_type.contains(&path))
    }

    pub fn get_by_id(&self, id: &str) -> Option<&PackType> {
        self.types.iter().find(|pack_type| pack_type.id == id)
    }
}
