//! Translates termination signals into a server stop request
//!
//! The server itself only knows about its [`StopHandle`]; a process wires
//! OS signals to it at its boundary. Install [`TerminationSignals`] before
//! the server binds so a signal arriving during startup is queued rather
//! than killing the process with the socket or crumb left behind, then
//! attach it once the server is running. [`forward_signals`] does both at
//! once for callers that already hold a running server.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::RpcError;
use crate::server::StopHandle;

/// Handlers for SIGHUP, SIGINT, SIGQUIT, SIGABRT and SIGTERM. Signals
/// delivered after [`TerminationSignals::install`] are held until the
/// handlers are attached to a server.
///
/// SIGKILL cannot be caught and bypasses cleanup entirely.
#[derive(Debug)]
pub struct TerminationSignals {
    hangup: Signal,
    interrupt: Signal,
    quit: Signal,
    abort: Signal,
    terminate: Signal,
}

impl TerminationSignals {
    /// Replace the default disposition of every termination signal
    pub fn install() -> Result<Self, RpcError> {
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            abort: signal(SignalKind::from_raw(libc::SIGABRT))?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Call `stop.stop()` for every signal received, including any that
    /// arrived before this call. Repeated signals are harmless.
    pub fn attach(self, stop: StopHandle) -> JoinHandle<()> {
        let Self {
            mut hangup,
            mut interrupt,
            mut quit,
            mut abort,
            mut terminate,
        } = self;

        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    Some(()) = hangup.recv() => "SIGHUP",
                    Some(()) = interrupt.recv() => "SIGINT",
                    Some(()) = quit.recv() => "SIGQUIT",
                    Some(()) = abort.recv() => "SIGABRT",
                    Some(()) = terminate.recv() => "SIGTERM",
                    else => break,
                };
                info!(signal = name, "Received termination signal");
                stop.stop();
            }
        })
    }
}

/// Install the termination handlers and attach them to `stop` at once
pub fn forward_signals(stop: StopHandle) -> Result<JoinHandle<()>, RpcError> {
    Ok(TerminationSignals::install()?.attach(stop))
}
