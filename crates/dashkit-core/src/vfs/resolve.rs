//! Path resolution chain
//!
//! Precedence: exact file mapping, then virtual entry, then the longest
//! directory-prefix mapping, then the base directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::mapped::VirtualStore;
use super::path::strip_dir_prefix;

/// Where an abstract path ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A real path on disk
    Real(PathBuf),
    /// Key of an in-memory virtual file
    Virtual(String),
}

/// One link of the chain. Receives an already normalised path.
pub trait Resolver: Send + Sync {
    fn resolve(&self, path: &str) -> Option<Resolution>;
}

/// Exact path to backing path
pub struct FileMappingResolver {
    mappings: HashMap<String, PathBuf>,
}

impl FileMappingResolver {
    pub fn new(mappings: HashMap<String, PathBuf>) -> Self {
        Self { mappings }
    }
}

impl Resolver for FileMappingResolver {
    fn resolve(&self, path: &str) -> Option<Resolution> {
        self.mappings.get(path).cloned().map(Resolution::Real)
    }
}

/// Declared in-memory entries
pub struct VirtualFileResolver {
    store: VirtualStore,
}

impl VirtualFileResolver {
    pub fn new(store: VirtualStore) -> Self {
        Self { store }
    }
}

impl Resolver for VirtualFileResolver {
    fn resolve(&self, path: &str) -> Option<Resolution> {
        self.store
            .contains(path)
            .then(|| Resolution::Virtual(path.to_string()))
    }
}

/// Prefix to backing directory; the longest matching prefix wins
pub struct DirectoryMappingResolver {
    // Sorted by prefix length, longest first
    mappings: Vec<(String, PathBuf)>,
}

impl DirectoryMappingResolver {
    pub fn new(mappings: HashMap<String, PathBuf>) -> Self {
        let mut mappings: Vec<_> = mappings.into_iter().collect();
        mappings.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { mappings }
    }
}

impl Resolver for DirectoryMappingResolver {
    fn resolve(&self, path: &str) -> Option<Resolution> {
        self.mappings.iter().find_map(|(prefix, backing)| {
            if path == prefix {
                Some(Resolution::Real(backing.clone()))
            } else {
                strip_dir_prefix(path, prefix).map(|rest| Resolution::Real(backing.join(rest)))
            }
        })
    }
}

/// Fallback: join to the base directory (absolute paths pass through)
pub struct BaseDirResolver {
    base_dir: PathBuf,
}

impl BaseDirResolver {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }
}

impl Resolver for BaseDirResolver {
    fn resolve(&self, path: &str) -> Option<Resolution> {
        let candidate = Path::new(path);
        if self.base_dir.as_os_str().is_empty() || candidate.is_absolute() {
            Some(Resolution::Real(candidate.to_path_buf()))
        } else {
            Some(Resolution::Real(self.base_dir.join(candidate)))
        }
    }
}

/// Ordered list of resolvers; the first answer wins
pub struct ResolverChain {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverChain {
    pub fn new(resolvers: Vec<Box<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    pub fn resolve(&self, path: &str) -> Resolution {
        self.resolvers
            .iter()
            .find_map(|r| r.resolve(path))
            .unwrap_or_else(|| Resolution::Real(PathBuf::from(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, PathBuf> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
            .collect()
    }

    #[test]
    fn test_longest_prefix_wins() {
        let resolver = DirectoryMappingResolver::new(map(&[
            ("builds", "/cache/all"),
            ("builds/dev/project BP", "/cache/BP"),
        ]));

        assert_eq!(
            resolver.resolve("builds/dev/project BP/entities/a.json"),
            Some(Resolution::Real(PathBuf::from("/cache/BP/entities/a.json")))
        );
        assert_eq!(
            resolver.resolve("builds/dist/x.json"),
            Some(Resolution::Real(PathBuf::from("/cache/all/dist/x.json")))
        );
        assert_eq!(
            resolver.resolve("builds/dev/project BP"),
            Some(Resolution::Real(PathBuf::from("/cache/BP")))
        );
        assert_eq!(resolver.resolve("buildsx/a"), None);
    }

    #[test]
    fn test_chain_precedence() {
        let store = VirtualStore::default();
        store.declare("builds/dev/project BP/virtual.json");
        store.declare("mapped.json");

        let chain = ResolverChain::new(vec![
            Box::new(FileMappingResolver::new(map(&[("mapped.json", "/data/mapped.json")]))),
            Box::new(VirtualFileResolver::new(store)),
            Box::new(DirectoryMappingResolver::new(map(&[("builds/dev/project BP", "/cache/BP")]))),
            Box::new(BaseDirResolver::new("/src")),
        ]);

        // File mapping beats a virtual key with the same path
        assert_eq!(chain.resolve("mapped.json"), Resolution::Real("/data/mapped.json".into()));
        // Virtual beats a directory mapping
        assert_eq!(
            chain.resolve("builds/dev/project BP/virtual.json"),
            Resolution::Virtual("builds/dev/project BP/virtual.json".into())
        );
        assert_eq!(
            chain.resolve("builds/dev/project BP/real.json"),
            Resolution::Real("/cache/BP/real.json".into())
        );
        assert_eq!(chain.resolve("BP/a.json"), Resolution::Real("/src/BP/a.json".into()));
    }
}
