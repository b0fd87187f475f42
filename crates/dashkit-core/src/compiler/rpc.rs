//! RPC Compiler - drive a compiler over line-delimited JSON
//!
//! Each command is written as one line and answered by a `done` line with
//! the same id. Until then the compiler may call back into the host for
//! file-system access, remote data and file/pack-type lookups; those requests
//! are served in order on the same channel.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::ffi::OsStr;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::protocol::{
    Command, CommandMessage, CompilerMessage, ErrorKind, HostMessage, LogLevel, ReplyError,
    ReplyMessage, Request, WireContent,
};
use super::Compiler;
use crate::data_cache::DataCache;
use crate::error::DashError;
use crate::file_type::FileTypeRegistry;
use crate::pack_type::PackTypeRegistry;
use crate::vfs::FileSystem;

/// Arguments that put a compiler binary into stdio server mode
pub const SERVE_ARGS: [&str; 2] = ["serve", "--stdio"];

/// Everything the host exposes to the compiler
pub struct HostContext {
    pub fs: Arc<dyn FileSystem>,
    pub data: Arc<DataCache>,
    pub file_types: Mutex<FileTypeRegistry>,
    pub pack_types: Mutex<PackTypeRegistry>,
}

impl HostContext {
    pub fn new(fs: Arc<dyn FileSystem>, data: Arc<DataCache>) -> Self {
        Self {
            fs,
            data,
            file_types: Mutex::new(FileTypeRegistry::new()),
            pack_types: Mutex::new(PackTypeRegistry::new()),
        }
    }

    /// Serve one compiler request
    pub async fn handle(&self, id: u64, request: Request) -> ReplyMessage {
        debug!("Compiler request {}: {:?}", id, request);
        match self.serve(request).await {
            Ok(result) => ReplyMessage::ok(id, result),
            Err(e) => ReplyMessage::err(id, e),
        }
    }

    async fn serve(&self, request: Request) -> Result<Value, ReplyError> {
        let fs = self.fs.as_ref();
        match request {
            Request::ReadFile { path } => {
                let bytes = fs.read_file(&path).await.map_err(io_reply)?;
                to_json(WireContent::from_bytes(bytes))
            }
            Request::WriteFile { path, content } => {
                let content = content.into_content().map_err(io_reply)?;
                fs.write_file(&path, content).await.map_err(io_reply)?;
                Ok(Value::Null)
            }
            Request::CopyFile { from, to } => {
                fs.copy_file(&from, &to).await.map_err(io_reply)?;
                Ok(Value::Null)
            }
            Request::Unlink { path } => {
                fs.unlink(&path).await.map_err(io_reply)?;
                Ok(Value::Null)
            }
            Request::ReadDir { path } => to_json(fs.read_dir(&path).await.map_err(io_reply)?),
            Request::Mkdir { path } => {
                fs.mkdir(&path).await.map_err(io_reply)?;
                Ok(Value::Null)
            }
            Request::LastModified { path } => to_json(fs.last_modified(&path).await.map_err(io_reply)?),
            Request::RequestJsonData { path } => self.data.fetch(&path).await.map_err(|e| ReplyError {
                kind: ErrorKind::Other,
                message: format!("{e:#}"),
            }),
            Request::FileType {
                path,
                search_type,
                check_extension,
            } => {
                let mut registry = self.file_types.lock().await;
                Ok(registry
                    .get(&path, search_type.as_deref(), check_extension)
                    .map(|file_type| file_type.definition.clone())
                    .unwrap_or(Value::Null))
            }
            Request::PackType { path } => {
                let registry = self.pack_types.lock().await;
                Ok(registry
                    .get(&path)
                    .map(|pack_type| pack_type.definition.clone())
                    .unwrap_or(Value::Null))
            }
        }
    }
}

fn io_reply(err: io::Error) -> ReplyError {
    ReplyError::from(&err)
}

fn to_json<T: Serialize>(value: T) -> Result<Value, ReplyError> {
    serde_json::to_value(value).map_err(|e| ReplyError {
        kind: ErrorKind::Other,
        message: e.to_string(),
    })
}

struct Channel<R, W> {
    lines: Lines<BufReader<R>>,
    writer: W,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &HostMessage) -> Result<()> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        let written = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;

        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(DashError::CompilerExited.into()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Compiler reached through a reader/writer pair
pub struct RpcCompiler<R, W> {
    channel: Mutex<Channel<R, W>>,
    next_id: AtomicU64,
    host: HostContext,
}

impl<R, W> RpcCompiler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, host: HostContext) -> Self {
        Self {
            channel: Mutex::new(Channel {
                lines: BufReader::new(reader).lines(),
                writer,
            }),
            next_id: AtomicU64::new(1),
            host,
        }
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    async fn call(&self, command: Command) -> Result<()> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut channel = self.channel.lock().await;
        channel
            .send(&HostMessage::Command(CommandMessage { id, command }))
            .await?;

        loop {
            let Some(line) = channel.lines.next_line().await? else {
                return Err(DashError::CompilerExited.into());
            };
            if line.trim().is_empty() {
                continue;
            }

            let message: CompilerMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => {
                    // Plain output from the compiler
                    info!("[dash] {}", line);
                    continue;
                }
            };

            match message {
                CompilerMessage::Done { id: done, error } if done == id => {
                    return match error {
                        Some(message) => Err(DashError::Compiler(message).into()),
                        None => Ok(()),
                    };
                }
                CompilerMessage::Done { id: other, .. } => {
                    warn!("Ignoring completion for unknown command {}", other);
                }
                CompilerMessage::Request { id: request_id, request } => {
                    let reply = self.host.handle(request_id, request).await;
                    channel.send(&HostMessage::Reply(reply)).await?;
                }
                CompilerMessage::Log { level, message } => match level {
                    LogLevel::Error => error!("[dash] {}", message),
                    LogLevel::Warn => warn!("[dash] {}", message),
                    LogLevel::Info => info!("[dash] {}", message),
                    LogLevel::Debug => debug!("[dash] {}", message),
                },
            }
        }
    }
}

#[async_trait]
impl<R, W> Compiler for RpcCompiler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn setup(&self) -> Result<()> {
        self.host.file_types.lock().await.setup(&self.host.data).await?;
        self.host.pack_types.lock().await.setup(&self.host.data).await?;
        self.call(Command::Setup).await
    }

    async fn update_files(&self, paths: &[String], flag: bool) -> Result<()> {
        self.call(Command::UpdateFiles {
            paths: paths.to_vec(),
            flag,
        })
        .await
    }

    async fn unlink_multiple(&self, paths: &[String], flag: bool) -> Result<()> {
        self.call(Command::UnlinkMultiple {
            paths: paths.to_vec(),
            flag,
        })
        .await
    }
}

/// Compiler child process speaking the RPC protocol on stdin/stdout
pub struct ProcessCompiler {
    child: Child,
    rpc: RpcCompiler<ChildStdout, ChildStdin>,
}

impl ProcessCompiler {
    pub fn spawn<S: AsRef<OsStr>>(
        program: impl AsRef<OsStr>,
        args: &[S],
        host: HostContext,
    ) -> Result<Self> {
        let program = program.as_ref();
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DashError::Compiler(format!("failed to start {:?}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DashError::Compiler("compiler stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DashError::Compiler("compiler stdout unavailable".into()))?;

        debug!("Started compiler {:?} (pid {:?})", program, child.id());
        Ok(Self {
            child,
            rpc: RpcCompiler::new(stdout, stdin, host),
        })
    }

}

#[async_trait]
impl Compiler for ProcessCompiler {
    async fn setup(&self) -> Result<()> {
        self.rpc.setup().await
    }

    async fn update_files(&self, paths: &[String], flag: bool) -> Result<()> {
        self.rpc.update_files(paths, flag).await
    }

    async fn unlink_multiple(&self, paths: &[String], flag: bool) -> Result<()> {
        self.rpc.unlink_multiple(paths, flag).await
    }

    /// Close stdin and wait for the process to exit on its own
    async fn shutdown(self) -> Result<()> {
        let Self { mut child, rpc } = self;
        drop(rpc);
        let status = child.wait().await?;
        debug!("Compiler exited with {}", status);
        if !status.success() {
            return Err(DashError::Compiler(format!("compiler exited with {status}")).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_cache::DataSource;
    use crate::vfs::{MappedFileSystem, MappedFileSystemOptions, VirtualContent};
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    struct Definitions;

    #[async_trait]
    impl DataSource for Definitions {
        async fn fetch_json(&self, data_path: &str) -> Result<Value> {
            if data_path.ends_with("packDefinitions.json") {
                return Ok(json!([{"id": "behaviorPack"}, {"id": "resourcePack"}]));
            }
            Ok(json!([
                {"id": "entity", "detect": {"packType": "behaviorPack", "scope": "entities"}}
            ]))
        }
    }

    struct FakeCompiler {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
        next_id: u64,
    }

    impl FakeCompiler {
        fn new(stream: DuplexStream) -> Self {
            let (reader, writer) = tokio::io::split(stream);
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
                next_id: 100,
            }
        }

        async fn send(&mut self, message: &CompilerMessage) {
            let mut line = serde_json::to_string(message).unwrap();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }

        async fn next_command(&mut self) -> Option<CommandMessage> {
            let line = self.lines.next_line().await.unwrap()?;
            match serde_json::from_str(&line).unwrap() {
                HostMessage::Command(command) => Some(command),
                other => panic!("expected a command, got {other:?}"),
            }
        }

        async fn ask(&mut self, request: Request) -> ReplyMessage {
            self.next_id += 1;
            let id = self.next_id;
            self.send(&CompilerMessage::Request { id, request }).await;

            let line = self.lines.next_line().await.unwrap().unwrap();
            match serde_json::from_str(&line).unwrap() {
                HostMessage::Reply(reply) => {
                    assert_eq!(reply.reply_to, id);
                    reply
                }
                other => panic!("expected a reply, got {other:?}"),
            }
        }

        async fn done(&mut self, id: u64, error: Option<&str>) {
            self.send(&CompilerMessage::Done {
                id,
                error: error.map(str::to_owned),
            })
            .await;
        }
    }

    /// Copies every updated file to `out/<path>` and reports its file type
    async fn run_fake(stream: DuplexStream) -> Vec<ReplyMessage> {
        let mut fake = FakeCompiler::new(stream);
        let mut replies = Vec::new();

        while let Some(message) = fake.next_command().await {
            match message.command {
                Command::Setup => fake.done(message.id, None).await,
                Command::UpdateFiles { paths, .. } => {
                    fake.send(&CompilerMessage::Log {
                        level: LogLevel::Info,
                        message: format!("compiling {} files", paths.len()),
                    })
                    .await;
                    for path in paths {
                        let read = fake.ask(Request::ReadFile { path: path.clone() }).await;
                        let content: WireContent = serde_json::from_value(read.result.clone().unwrap()).unwrap();
                        replies.push(read);

                        let write = fake
                            .ask(Request::WriteFile {
                                path: format!("builds/dev/project BP/{path}"),
                                content,
                            })
                            .await;
                        replies.push(write);

                        let file_type = fake
                            .ask(Request::FileType {
                                path: "BP/entities/pig.json".into(),
                                search_type: None,
                                check_extension: true,
                            })
                            .await;
                        replies.push(file_type);

                        let pack_type = fake
                            .ask(Request::PackType {
                                path: "RP/textures/a.png".into(),
                            })
                            .await;
                        replies.push(pack_type);
                    }
                    fake.done(message.id, None).await;
                }
                Command::UnlinkMultiple { .. } => {
                    let missing = fake.ask(Request::ReadFile { path: "nope.json".into() }).await;
                    replies.push(missing);
                    fake.done(message.id, Some("unlink failed")).await;
                }
            }
        }
        replies
    }

    fn host(dir: &TempDir) -> (HostContext, PathBuf) {
        let src = dir.path().join("src");
        let out = dir.path().join("cache/BP");
        std::fs::create_dir_all(&src).unwrap();

        let fs = MappedFileSystem::new(
            &src,
            MappedFileSystemOptions {
                file_mappings: HashMap::new(),
                directory_mappings: HashMap::from([("builds/dev/project BP".to_string(), out.clone())]),
                virtual_files: HashMap::from([(
                    "config.json".to_string(),
                    VirtualContent::from(r#"{"name":"demo"}"#),
                )]),
            },
        );
        let data = DataCache::new(dir.path().join("data"), Arc::new(Definitions));
        (HostContext::new(Arc::new(fs), Arc::new(data)), out)
    }

    #[tokio::test]
    async fn test_commands_and_callbacks() {
        let dir = TempDir::new().unwrap();
        let (host, out) = host(&dir);

        let (host_end, compiler_end) = tokio::io::duplex(64 * 1024);
        let fake = tokio::spawn(run_fake(compiler_end));

        let (reader, writer) = tokio::io::split(host_end);
        let compiler = RpcCompiler::new(reader, writer, host);

        compiler.setup().await.unwrap();
        assert_eq!(compiler.host().file_types.lock().await.len(), 1);
        assert_eq!(compiler.host().pack_types.lock().await.len(), 2);

        compiler
            .update_files(&["config.json".to_string()], true)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(out.join("config.json")).unwrap(),
            r#"{"name":"demo"}"#
        );

        let err = compiler
            .unlink_multiple(&["BP/gone.json".to_string()], false)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<DashError>(), Some(DashError::Compiler(m)) if m == "unlink failed"));

        drop(compiler);
        let replies = fake.await.unwrap();

        assert_eq!(replies.len(), 5);
        assert!(replies[0].error.is_none());
        assert_eq!(replies[2].result.as_ref().unwrap()["id"], "entity");
        assert_eq!(replies[3].result.as_ref().unwrap()["id"], "resourcePack");
        assert_eq!(replies[4].error.as_ref().unwrap().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_eof_before_done() {
        let dir = TempDir::new().unwrap();
        let (host, _) = host(&dir);

        let (host_end, compiler_end) = tokio::io::duplex(1024);
        let fake = tokio::spawn(async move {
            let mut fake = FakeCompiler::new(compiler_end);
            fake.next_command().await
        });

        let (reader, writer) = tokio::io::split(host_end);
        let compiler = RpcCompiler::new(reader, writer, host);

        let err = compiler.update_files(&[], true).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<DashError>(), Some(DashError::CompilerExited)));

        let received = fake.await.unwrap().unwrap();
        assert_eq!(received.command, Command::UpdateFiles { paths: vec![], flag: true });
    }

    /// Answers every command with `done`, then exits with `$1` once stdin closes
    #[cfg(unix)]
    const ANSWER_DONE: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  printf '{"type":"done","id":%s}\n' "$id"
done
exit "$1"
"#;

    #[cfg(unix)]
    async fn run_child(exit_code: &str) -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (host, _) = host(&dir);
        let compiler = ProcessCompiler::spawn("sh", &["-c", ANSWER_DONE, "sh", exit_code], host)?;
        compiler.setup().await?;
        compiler.update_files(&["BP/a.json".to_string()], true).await?;
        compiler.shutdown().await
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_shutdown_waits_for_exit() {
        run_child("0").await.unwrap();

        let err = run_child("4").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DashError>(),
            Some(DashError::Compiler(m)) if m.contains("exit status: 4")
        ));
    }
}
