//! External compiler seam
//!
//! The pipeline only needs four operations from a compiler. Anything that
//! implements `Compiler` can be plugged in; `ProcessCompiler` drives a
//! compiler binary over a line-delimited JSON protocol and answers its file
//! system requests from a `MappedFileSystem`.

pub mod protocol;
pub mod rpc;

use anyhow::Result;
use async_trait::async_trait;

pub use rpc::{HostContext, ProcessCompiler, RpcCompiler};

#[async_trait]
pub trait Compiler: Send + Sync {
    /// Initialise compiler state against the file system
    async fn setup(&self) -> Result<()>;

    /// (Re)compile these source paths. `flag` is passed through untouched.
    async fn update_files(&self, paths: &[String], flag: bool) -> Result<()>;

    /// Forget these deleted source paths. `flag` is passed through untouched.
    async fn unlink_multiple(&self, paths: &[String], flag: bool) -> Result<()>;

    /// End the session after the last command
    async fn shutdown(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}
