//! `mpv` as the media engine, driven over its JSON IPC socket.
//!
//! Every engine instance is its own `mpv` process. It draws into the player
//! surface through `--wid` when the surface has a native handle, otherwise it
//! opens its own maximized window. Commands carry a `request_id`, and replies
//! are matched back to the waiting caller; everything else on the socket is
//! an event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jellyplayer_bridge::config::PlayerConfig;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

use super::engine::{DecodeMode, EngineError, EngineFactory, MediaEngine};
use crate::window::PlayerSurface;

/// How long a freshly spawned engine may take to open its control socket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcStream for T {}

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builds the command line for one engine instance.
fn engine_arguments(
    config: &PlayerConfig,
    surface: &PlayerSurface,
    mode: DecodeMode,
    socket: &Path,
) -> Vec<String> {
    let mut arguments = vec![
        "--idle=yes".to_string(),
        "--no-terminal".to_string(),
        format!("--input-ipc-server={}", socket.display()),
        format!("--msg-level=all={}", config.engine_log_level),
    ];

    match mode {
        DecodeMode::Hardware => {
            arguments.push(format!("--hwdec={}", config.hardware_decoder));
            if let Some(gpu_context) = &config.gpu_context {
                arguments.push(format!("--gpu-context={gpu_context}"));
            }
        }
        // the configured GPU context may be what failed, so leave it out
        DecodeMode::Software => arguments.push("--hwdec=no".to_string()),
    }

    match surface.native_handle {
        Some(handle) => arguments.push(format!("--wid={handle}")),
        None => {
            arguments.push("--force-window=immediate".to_string());
            arguments.push("--window-maximized=yes".to_string());
        }
    }

    arguments
}

#[cfg(unix)]
async fn connect(path: &Path) -> std::io::Result<Box<dyn IpcStream>> {
    Ok(Box::new(tokio::net::UnixStream::connect(path).await?))
}

#[cfg(windows)]
async fn connect(path: &Path) -> std::io::Result<Box<dyn IpcStream>> {
    Ok(Box::new(
        tokio::net::windows::named_pipe::ClientOptions::new().open(path)?,
    ))
}

/// Answer to a command, matched to its caller by `request_id`.
#[derive(Debug, Deserialize)]
struct CommandReply {
    request_id: u64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Routes one line read from the socket to its waiting caller or to the
/// event queue.
fn dispatch_line(line: &str, pending: &PendingReplies, events: &mpsc::UnboundedSender<Value>) {
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("Ignoring malformed engine message {line:?}: {e}");
            return;
        }
    };

    if message.get("event").is_some() {
        let _ = events.send(message);
        return;
    }

    let reply: CommandReply = match serde_json::from_value(message) {
        Ok(reply) => reply,
        Err(e) => {
            log::debug!("Ignoring unmatched engine message {line:?}: {e}");
            return;
        }
    };
    let Some(waiter) = lock(pending).remove(&reply.request_id) else {
        return;
    };

    let outcome = match reply.error.as_deref() {
        Some("success") | None => Ok(reply.data),
        Some(error) => Err(error.to_string()),
    };
    let _ = waiter.send(outcome);
}

async fn read_messages(
    read_half: ReadHalf<Box<dyn IpcStream>>,
    pending: PendingReplies,
    events: mpsc::UnboundedSender<Value>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&line, &pending, &events),
            Ok(None) => break,
            Err(e) => {
                log::warn!("Engine control connection failed: {e}");
                break;
            }
        }
    }
    // dropping the reply senders wakes every waiting caller
    lock(&pending).clear();
}

/// Request/response and event multiplexing over one control connection.
struct MpvIpc {
    writer: WriteHalf<Box<dyn IpcStream>>,
    pending: PendingReplies,
    events: mpsc::UnboundedReceiver<Value>,
    next_request_id: u64,
    reader: JoinHandle<()>,
}

impl MpvIpc {
    fn new(stream: Box<dyn IpcStream>) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        let pending = PendingReplies::default();
        let (events_tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_messages(read_half, pending.clone(), events_tx));

        Self {
            writer,
            pending,
            events,
            next_request_id: 1,
            reader,
        }
    }

    async fn command(&mut self, args: Value) -> Result<Value, EngineError> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(request_id, reply_tx);

        let mut line = json!({ "command": args, "request_id": request_id }).to_string();
        line.push('\n');
        if let Err(e) = self.writer.write_all(line.as_bytes()).await {
            lock(&self.pending).remove(&request_id);
            return Err(EngineError::Ipc(e.to_string()));
        }

        match timeout(COMMAND_TIMEOUT, reply_rx).await {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(error))) => Err(EngineError::Command(error)),
            Ok(Err(_)) => Err(EngineError::Exited),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                Err(EngineError::Timeout)
            }
        }
    }

    async fn load(&mut self, url: &str) -> Result<(), EngineError> {
        // events from the previous file must not be taken for this one
        while self.events.try_recv().is_ok() {}

        self.command(json!(["loadfile", url, "replace"])).await?;
        while let Some(event) = self.events.recv().await {
            match event.get("event").and_then(Value::as_str) {
                Some("file-loaded") => return Ok(()),
                Some("end-file")
                    if event.get("reason").and_then(Value::as_str) == Some("error") =>
                {
                    let detail = event
                        .get("file_error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    return Err(EngineError::Load(detail.to_string()));
                }
                _ => {}
            }
        }
        Err(EngineError::Exited)
    }

    async fn number_property(&mut self, name: &str) -> Result<Option<f64>, EngineError> {
        match self.command(json!(["get_property", name])).await {
            Ok(data) => Ok(data.as_f64()),
            // mpv answers "property unavailable" while no file is loaded
            Err(EngineError::Command(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for MpvIpc {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// One running `mpv` process.
pub struct MpvEngine {
    child: Child,
    ipc: MpvIpc,
    socket_path: PathBuf,
}

#[async_trait]
impl MediaEngine for MpvEngine {
    async fn load(&mut self, url: &str) -> Result<(), EngineError> {
        self.ipc.load(url).await
    }

    async fn set_paused(&mut self, paused: bool) -> Result<(), EngineError> {
        self.ipc
            .command(json!(["set_property", "pause", paused]))
            .await
            .map(|_| ())
    }

    async fn seek(&mut self, seconds: f64) -> Result<(), EngineError> {
        self.ipc
            .command(json!(["seek", seconds, "absolute"]))
            .await
            .map(|_| ())
    }

    async fn position(&mut self) -> Result<f64, EngineError> {
        self.ipc
            .number_property("time-pos")
            .await?
            .ok_or_else(|| EngineError::Command("position unavailable".to_string()))
    }

    async fn duration(&mut self) -> Result<Option<f64>, EngineError> {
        self.ipc.number_property("duration").await
    }

    async fn shutdown(&mut self) {
        // the engine may close the socket before acknowledging
        let _ = self.ipc.command(json!(["quit"])).await;
        if timeout(QUIT_TIMEOUT, self.child.wait()).await.is_err() {
            log::warn!("Engine did not quit in time, killing it");
            let _ = self.child.kill().await;
        }

        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_path).await;
    }
}

/// Spawns `mpv` processes configured from [`PlayerConfig`].
pub struct MpvEngineFactory {
    config: PlayerConfig,
    runtime_dir: PathBuf,
    instances: AtomicU64,
}

impl MpvEngineFactory {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            runtime_dir: std::env::temp_dir(),
            instances: AtomicU64::new(0),
        }
    }

    fn socket_path(&self) -> PathBuf {
        let instance = self.instances.fetch_add(1, Ordering::Relaxed);
        let name = format!("jellyplayer-mpv-{}-{instance}", std::process::id());
        if cfg!(windows) {
            PathBuf::from(format!(r"\\.\pipe\{name}"))
        } else {
            self.runtime_dir.join(format!("{name}.sock"))
        }
    }
}

#[async_trait]
impl EngineFactory for MpvEngineFactory {
    async fn create(
        &self,
        surface: &PlayerSurface,
        mode: DecodeMode,
    ) -> Result<Box<dyn MediaEngine>, EngineError> {
        let socket_path = self.socket_path();
        let arguments = engine_arguments(&self.config, surface, mode, &socket_path);
        log::info!(
            "Starting {} with {mode:?} decoding on surface {}",
            self.config.engine_binary,
            surface.id
        );

        let mut child = Command::new(&self.config.engine_binary)
            .args(&arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!(target: "mpv", "{line}");
                }
            });
        }

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        let stream = loop {
            match connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(e) => {
                    if let Some(status) = child.try_wait()? {
                        return Err(EngineError::Ipc(format!(
                            "engine exited with {status} before accepting commands"
                        )));
                    }
                    if Instant::now() >= deadline {
                        let _ = child.kill().await;
                        return Err(EngineError::Ipc(e.to_string()));
                    }
                    sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        };

        Ok(Box::new(MpvEngine {
            child,
            ipc: MpvIpc::new(stream),
            socket_path,
        }))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    use super::*;

    /// Plays the engine side of the socket: answers each request with the
    /// lines produced by `respond`.
    fn fake_engine<F>(respond: F) -> MpvIpc
    where
        F: Fn(&Value) -> Vec<Value> + Send + 'static,
    {
        let (client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (read_half, mut write_half) = tokio::io::split(server);
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                for reply in respond(&request) {
                    let mut text = reply.to_string();
                    text.push('\n');
                    if write_half.write_all(text.as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
        });
        MpvIpc::new(Box::new(client))
    }

    fn success(request: &Value, data: Value) -> Value {
        json!({ "request_id": request["request_id"], "error": "success", "data": data })
    }

    #[tokio::test]
    async fn commands_are_matched_to_replies() {
        let mut ipc = fake_engine(|request| match request["command"][1].as_str() {
            Some("time-pos") => vec![
                json!({ "event": "playback-restart" }),
                success(request, json!(12.5)),
            ],
            _ => vec![json!({ "request_id": request["request_id"], "error": "property unavailable" })],
        });

        assert_eq!(ipc.number_property("time-pos").await.unwrap(), Some(12.5));
        assert_eq!(ipc.number_property("duration").await.unwrap(), None);
        assert!(matches!(
            ipc.command(json!(["frobnicate"])).await,
            Err(EngineError::Command(error)) if error == "property unavailable"
        ));
    }

    #[tokio::test]
    async fn load_waits_for_file_loaded() {
        let mut ipc = fake_engine(|request| {
            vec![
                success(request, Value::Null),
                json!({ "event": "start-file" }),
                json!({ "event": "end-file", "reason": "stop" }),
                json!({ "event": "file-loaded" }),
            ]
        });
        ipc.load("http://media.local/video.mkv").await.unwrap();
    }

    #[tokio::test]
    async fn load_reports_engine_errors() {
        let mut ipc = fake_engine(|request| {
            vec![
                success(request, Value::Null),
                json!({ "event": "end-file", "reason": "error", "file_error": "loading failed" }),
            ]
        });
        assert!(matches!(
            ipc.load("http://media.local/missing.mkv").await,
            Err(EngineError::Load(detail)) if detail == "loading failed"
        ));
    }

    #[tokio::test]
    async fn closed_socket_means_the_engine_exited() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut ipc = MpvIpc::new(Box::new(client));
        assert!(matches!(
            ipc.command(json!(["quit"])).await,
            Err(EngineError::Exited | EngineError::Ipc(_))
        ));
    }

    #[test]
    fn hardware_arguments_embed_into_the_surface() {
        let config = PlayerConfig {
            hardware_decoder: "nvdec".into(),
            gpu_context: Some("d3d11".into()),
            ..PlayerConfig::default()
        };
        let surface = PlayerSurface {
            id: 1,
            native_handle: Some(4242),
        };
        let arguments =
            engine_arguments(&config, &surface, DecodeMode::Hardware, Path::new("/tmp/mpv.sock"));

        assert!(arguments.contains(&"--hwdec=nvdec".to_string()));
        assert!(arguments.contains(&"--gpu-context=d3d11".to_string()));
        assert!(arguments.contains(&"--wid=4242".to_string()));
        assert!(arguments.contains(&"--input-ipc-server=/tmp/mpv.sock".to_string()));
    }

    #[test]
    fn software_arguments_drop_the_gpu_context() {
        let config = PlayerConfig {
            gpu_context: Some("d3d11".into()),
            ..PlayerConfig::default()
        };
        let surface = PlayerSurface {
            id: 1,
            native_handle: None,
        };
        let arguments =
            engine_arguments(&config, &surface, DecodeMode::Software, Path::new("/tmp/mpv.sock"));

        assert!(arguments.contains(&"--hwdec=no".to_string()));
        assert!(!arguments.iter().any(|argument| argument.starts_with("--gpu-context")));
        assert!(arguments.contains(&"--window-maximized=yes".to_string()));
    }
}
