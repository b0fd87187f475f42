//! Dashkit Core - Incremental Dash Builds for Regolith Projects
//!
//! Features:
//! - SHA-256 / BLAKE3 content hashing, parallel with Rayon
//! - Linear manifest diff: only changed files reach the compiler
//! - Virtual file system: exact, in-memory and directory-prefix redirects
//! - Remote data cache with a TTL and stale fallback when offline
//! - Session lock so a crashed build never poisons the next one
//! - Compiler version resolution and install (prebuilt or from source)
//! - Line-delimited JSON bridge to an external compiler process
//! - File-type and pack-type lookups served back to the compiler

pub mod compiler;
pub mod config;
pub mod data_cache;
pub mod diff;
pub mod error;
pub mod file_type;
pub mod hasher;
pub mod install;
pub mod ioutil;
pub mod pack_type;
pub mod pipeline;
pub mod session;
pub mod version;
pub mod vfs;

pub use compiler::{Compiler, HostContext, ProcessCompiler, RpcCompiler};
pub use config::{FilterConfig, Layout};
pub use data_cache::{DataCache, DataSource, HttpDataSource};
pub use diff::{source_diff, ChangeSet, HashRecord, Manifest};
pub use error::DashError;
pub use file_type::{FileType, FileTypeRegistry};
pub use hasher::{HashAlgorithm, Hasher};
pub use install::Installer;
pub use pack_type::{PackType, PackTypeRegistry};
pub use pipeline::{full_build, incremental_build, BuildSummary};
pub use session::{SessionGuard, SessionLock};
pub use version::{parse_range, resolve_version, VersionPlan, VersionRange, VersionSource};
pub use vfs::{FileSystem, LocalFileSystem, MappedFileSystem, MappedFileSystemOptions, VirtualContent};
