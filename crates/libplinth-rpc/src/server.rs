//! RPC server
//!
//! The server:
//! - Binds a listener for one endpoint (unix socket or tcp)
//! - Serves every connection with an injected [`Handler`]
//! - Writes a crumb file for tcp listeners that name one
//! - Runs a single shutdown sequence when its [`StopHandle`] fires
//!
//! Shutdown order: close the listener (removing the unix socket file), run
//! cleanup tasks in registration order stopping at the first failure, remove
//! the crumb. The stopped notification is delivered only after that.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::endpoint::{Endpoint, ListenAddr, Scheme};
use crate::error::{BoxError, RpcError};
use crate::messages::{codes, ErrorPayload, Request, Response};
use crate::transport::{decode_frame, read_line, write_frame, Stream};
use crate::SOCKET_MODE;

/// Serves decoded requests
///
/// Handlers run on the blocking pool, one call at a time per connection.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, method: &str, params: serde_json::Value)
        -> Result<serde_json::Value, ErrorPayload>;
}

impl<F> Handler for F
where
    F: Fn(&str, serde_json::Value) -> Result<serde_json::Value, ErrorPayload> + Send + Sync + 'static,
{
    fn handle(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ErrorPayload> {
        self(method, params)
    }
}

/// A task run once during shutdown
pub struct Cleanup {
    name: String,
    task: Box<dyn FnOnce() -> Result<(), BoxError> + Send + 'static>,
}

impl Cleanup {
    pub fn new<F>(name: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        Self {
            name: name.into(),
            task: Box::new(task),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup").field("name", &self.name).finish()
    }
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Requests shutdown of a running server
///
/// Cloneable; only the first `stop()` has an effect.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn stop(&self) {
        let already = self.tx.send_replace(true);
        if !already {
            debug!("Stop requested");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Handle to a started server
#[derive(Debug)]
pub struct RunningServer {
    endpoint: Endpoint,
    crumb: Option<PathBuf>,
    stop: StopHandle,
    state: watch::Receiver<ServerState>,
    stopped: oneshot::Receiver<Result<(), RpcError>>,
}

impl RunningServer {
    /// Connectable endpoint of the bound listener
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn crumb(&self) -> Option<&Path> {
        self.crumb.as_deref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn state_watch(&self) -> watch::Receiver<ServerState> {
        self.state.clone()
    }

    /// Wait for the shutdown sequence to finish
    ///
    /// `Ok(())` after a requested stop; the causal error if the server
    /// failed on its own or a cleanup task failed.
    pub async fn stopped(self) -> Result<(), RpcError> {
        self.stopped.await.unwrap_or(Err(RpcError::Abandoned))
    }

    /// Request a stop and wait for the shutdown sequence
    pub async fn shutdown(self) -> Result<(), RpcError> {
        self.stop.stop();
        self.stopped().await
    }
}

enum Listener {
    Unix { listener: UnixListener, path: PathBuf },
    Tcp(TcpListener),
}

impl Listener {
    async fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Unix { listener, .. } => listener.accept().await.map(|(s, _)| Stream::Unix(s)),
            Listener::Tcp(listener) => listener.accept().await.map(|(s, _)| Stream::Tcp(s)),
        }
    }

    /// Close the listener; a unix listener also unlinks its socket file
    fn close(self) -> io::Result<()> {
        match self {
            Listener::Unix { listener, path } => {
                drop(listener);
                remove_if_exists(&path)
            }
            Listener::Tcp(listener) => {
                drop(listener);
                Ok(())
            }
        }
    }
}

/// RPC server entry point
pub struct Server;

impl Server {
    /// Bind `listen` and start serving `handler`
    ///
    /// Nothing is left running if this returns an error.
    pub async fn start(
        listen: &str,
        handler: Arc<dyn Handler>,
        cleanups: Vec<Cleanup>,
    ) -> Result<RunningServer, RpcError> {
        let listen = ListenAddr::parse(listen)?;
        let (state_tx, state_rx) = watch::channel(ServerState::Starting);

        let (listener, endpoint) = bind(&listen).await?;

        if let Some(crumb) = &listen.crumb {
            if let Err(e) = write_crumb(crumb, &endpoint.to_string()) {
                error!(crumb = %crumb.display(), "Failed to write crumb file: {}", e);
                let _ = listener.close();
                return Err(RpcError::Io(e));
            }
        }

        info!(endpoint = %endpoint, "Listening");
        state_tx.send_replace(ServerState::Running);

        let (stop, stop_rx) = StopHandle::new();
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(run(
            listener,
            handler,
            cleanups,
            listen.crumb.clone(),
            stop.clone(),
            stop_rx,
            state_tx,
            done_tx,
            endpoint.clone(),
        ));

        Ok(RunningServer {
            endpoint,
            crumb: listen.crumb,
            stop,
            state: state_rx,
            stopped: done_rx,
        })
    }
}

async fn bind(listen: &ListenAddr) -> Result<(Listener, Endpoint), RpcError> {
    let address = listen.endpoint.to_string();
    match listen.endpoint.scheme() {
        Scheme::Unix => {
            let path = PathBuf::from(listen.endpoint.address());
            let listener = UnixListener::bind(&path).map_err(|source| RpcError::Bind {
                address: address.clone(),
                source,
            })?;

            if let Err(source) = fs::set_permissions(&path, fs::Permissions::from_mode(SOCKET_MODE)) {
                drop(listener);
                let _ = remove_if_exists(&path);
                return Err(RpcError::Bind { address, source });
            }

            let endpoint = Endpoint::unix(&path);
            Ok((Listener::Unix { listener, path }, endpoint))
        }
        Scheme::Tcp => {
            let listener = TcpListener::bind(listen.bind_address())
                .await
                .map_err(|source| RpcError::Bind {
                    address: address.clone(),
                    source,
                })?;
            let local = listener
                .local_addr()
                .map_err(|source| RpcError::Bind { address, source })?;
            Ok((Listener::Tcp(listener), Endpoint::tcp(connectable(local))))
        }
    }
}

/// Publish the crumb under a temporary name and rename it into place, so a
/// reader never sees a partly written address
fn write_crumb(crumb: &Path, contents: &str) -> io::Result<()> {
    let file_name = crumb
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "crumb path has no file name"))?;
    let tmp = crumb.with_file_name(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    ));

    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, crumb) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Replace an unspecified bind IP with loopback so the address can be dialed
fn connectable(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    listener: Listener,
    handler: Arc<dyn Handler>,
    cleanups: Vec<Cleanup>,
    crumb: Option<PathBuf>,
    // Held so the stop channel never closes while the loop is running
    _stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ServerState>,
    done_tx: oneshot::Sender<Result<(), RpcError>>,
    endpoint: Endpoint,
) {
    let outcome = accept_loop(&listener, handler, stop_rx).await;

    state_tx.send_replace(ServerState::ShuttingDown);
    info!(endpoint = %endpoint, "Shutting down");

    let sequence = shutdown_sequence(listener, cleanups, crumb).await;

    if let Err(e) = &outcome {
        error!(endpoint = %endpoint, "Server failed: {}", e);
    }
    let result = settle(outcome, sequence);

    state_tx.send_replace(ServerState::Stopped);
    match &result {
        Ok(()) => info!(endpoint = %endpoint, "Server stopped"),
        Err(e) => warn!(endpoint = %endpoint, "Server stopped with error: {}", e),
    }
    let _ = done_tx.send(result);
}

/// Result a stopped server reports: an accept failure outranks a failure
/// of the shutdown sequence that followed it
fn settle(outcome: Result<(), RpcError>, sequence: Result<(), RpcError>) -> Result<(), RpcError> {
    match outcome {
        Ok(()) => sequence,
        Err(e) => {
            if let Err(cleanup_err) = sequence {
                warn!("Shutdown after failure was incomplete: {}", cleanup_err);
            }
            Err(e)
        }
    }
}

async fn accept_loop(
    listener: &Listener,
    handler: Arc<dyn Handler>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<(), RpcError> {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let result = match stream {
                                Stream::Unix(s) => serve_connection(s, handler).await,
                                Stream::Tcp(s) => serve_connection(s, handler).await,
                            };
                            if let Err(e) = result {
                                debug!("Connection closed with error: {}", e);
                            }
                        });
                    }
                    Err(e) if is_transient(&e) => {
                        warn!("Transient accept error: {}", e);
                    }
                    Err(e) => return Err(RpcError::Accept(e)),
                }
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn shutdown_sequence(
    listener: Listener,
    cleanups: Vec<Cleanup>,
    crumb: Option<PathBuf>,
) -> Result<(), RpcError> {
    listener.close()?;

    tokio::task::spawn_blocking(move || run_cleanups(cleanups))
        .await
        .map_err(|e| RpcError::Cleanup {
            name: "<join>".to_string(),
            message: e.to_string(),
        })??;

    if let Some(crumb) = crumb {
        remove_if_exists(&crumb)?;
        debug!(crumb = %crumb.display(), "Removed crumb file");
    }
    Ok(())
}

fn run_cleanups(cleanups: Vec<Cleanup>) -> Result<(), RpcError> {
    for Cleanup { name, task } in cleanups {
        debug!(name = %name, "Running cleanup task");
        if let Err(e) = task() {
            return Err(RpcError::Cleanup {
                name,
                message: e.to_string(),
            });
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

async fn serve_connection<S>(stream: S, handler: Arc<dyn Handler>) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while read_line(&mut reader, &mut line).await?.is_some() {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_frame::<Request>(&line) {
            Ok(request) => dispatch(&handler, request).await,
            Err(e) => Response::error(
                "",
                ErrorPayload::new(codes::PARSE_ERROR, format!("Invalid request: {}", e)),
            ),
        };
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}

async fn dispatch(handler: &Arc<dyn Handler>, request: Request) -> Response {
    let Request { id, method, params } = request;
    let handler = Arc::clone(handler);
    let name = method.clone();

    match tokio::task::spawn_blocking(move || handler.handle(&name, params)).await {
        Ok(Ok(result)) => Response::success(id, result),
        Ok(Err(error)) => {
            debug!(method = %method, code = %error.code, "Handler returned error");
            Response::error(id, error)
        }
        Err(e) => Response::error(
            id,
            ErrorPayload::internal(format!("Handler for {} failed: {}", method, e)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectable_replaces_unspecified() {
        let addr: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        assert_eq!(connectable(addr), "127.0.0.1:4000".parse::<SocketAddr>().unwrap());

        let addr: SocketAddr = "[::]:4000".parse().unwrap();
        assert_eq!(connectable(addr), "[::1]:4000".parse::<SocketAddr>().unwrap());

        let addr: SocketAddr = "10.1.2.3:4000".parse().unwrap();
        assert_eq!(connectable(addr), addr);
    }

    #[test]
    fn test_stop_handle_is_idempotent() {
        let (stop, rx) = StopHandle::new();
        assert!(!stop.is_stop_requested());
        stop.stop();
        stop.clone().stop();
        assert!(stop.is_stop_requested());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_cleanups_stop_at_first_failure() {
        let ran = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mk = |name: &'static str, fail: bool| {
            let ran = Arc::clone(&ran);
            Cleanup::new(name, move || {
                ran.lock().unwrap().push(name);
                if fail {
                    Err("boom".into())
                } else {
                    Ok(())
                }
            })
        };

        let err = run_cleanups(vec![mk("a", false), mk("b", true), mk("c", false)]).unwrap_err();
        assert!(matches!(err, RpcError::Cleanup { ref name, .. } if name == "b"));
        assert_eq!(*ran.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_transient_accept_errors() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
            io::ErrorKind::WouldBlock,
        ] {
            assert!(is_transient(&io::Error::from(kind)), "{:?}", kind);
        }
        for kind in [
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput,
            io::ErrorKind::Other,
        ] {
            assert!(!is_transient(&io::Error::from(kind)), "{:?}", kind);
        }
    }

    #[test]
    fn test_settle_prefers_accept_failure() {
        let cleanup = || {
            Err(RpcError::Cleanup {
                name: "flush".to_string(),
                message: "disk full".to_string(),
            })
        };
        let accept = || Err(RpcError::Accept(io::Error::from(io::ErrorKind::PermissionDenied)));

        assert!(settle(Ok(()), Ok(())).is_ok());
        assert!(matches!(
            settle(Ok(()), cleanup()),
            Err(RpcError::Cleanup { ref name, .. }) if name == "flush"
        ));
        assert!(matches!(settle(accept(), Ok(())), Err(RpcError::Accept(_))));
        assert!(matches!(settle(accept(), cleanup()), Err(RpcError::Accept(_))));
    }

    #[test]
    fn test_crumb_replaced_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let crumb = dir.path().join("group.listen");
        fs::write(&crumb, "tcp://127.0.0.1:1").unwrap();

        write_crumb(&crumb, "tcp://127.0.0.1:2").unwrap();
        assert_eq!(fs::read_to_string(&crumb).unwrap(), "tcp://127.0.0.1:2");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("group.listen")]);
    }

    #[test]
    fn test_crumb_in_missing_directory_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let crumb = dir.path().join("absent").join("group.listen");
        assert!(write_crumb(&crumb, "tcp://127.0.0.1:2").is_err());
        assert!(!dir.path().join("absent").exists());
    }
}
