//! Listener lifecycle: bind, accept, spawn sessions, drain on stop.

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{resolve_listen_addr, ServerConfig};
use crate::error::ServerError;
use crate::normalize::QueryNormalizer;
use crate::pgwire_server::session::{ConnectionId, Session};
use crate::sink::Sink;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Handle to one listener. Clones share the same lifecycle.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    normalizer: Arc<dyn QueryNormalizer>,
    sink: Arc<dyn Sink>,
    next_conn_id: AtomicU64,
    lifecycle: Mutex<Lifecycle>,
}

enum Lifecycle {
    Stopped,
    Starting { abort: CancellationToken },
    Running(Running),
    Stopping { addr: SocketAddr, tracker: TaskTracker },
}

struct Running {
    addr: SocketAddr,
    /// Ends the accept loop (and drops the listener).
    stop_accepting: CancellationToken,
    /// Cancels every live session.
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
}

impl Server {
    pub fn new(config: ServerConfig, normalizer: Arc<dyn QueryNormalizer>, sink: Arc<dyn Sink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                normalizer,
                sink,
                next_conn_id: AtomicU64::new(1),
                lifecycle: Mutex::new(Lifecycle::Stopped),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Binds `bind_address` and starts accepting in a background task.
    ///
    /// `:5432` listens on every interface and a bare host gets port 5432. Port 0 picks an
    /// ephemeral port; the returned address is the one actually bound. A `stop` issued while the
    /// bind is in flight cancels it and this returns [`ServerError::StartCancelled`].
    pub async fn start(&self, bind_address: &str) -> Result<SocketAddr, ServerError> {
        let abort = CancellationToken::new();
        {
            let mut state = self.inner.lifecycle.lock();
            match &*state {
                Lifecycle::Stopped => *state = Lifecycle::Starting { abort: abort.clone() },
                Lifecycle::Starting { .. } => return Err(ServerError::already_running(None)),
                Lifecycle::Running(r) => return Err(ServerError::already_running(Some(r.addr))),
                Lifecycle::Stopping { addr, .. } => return Err(ServerError::already_running(Some(*addr))),
            }
        }
        let mut pending = PendingStart { lifecycle: &self.inner.lifecycle, abort: abort.clone(), committed: false };

        let address = resolve_listen_addr(bind_address);
        let bound = tokio::select! {
            biased;
            _ = abort.cancelled() => return Err(ServerError::StartCancelled { address: address.clone() }),
            bound = bind_listener(&address) => bound,
        };
        let (listener, addr) = match bound {
            Ok(b) => b,
            Err(source) => return Err(ServerError::BindFailure { address, source }),
        };

        let mut state = self.inner.lifecycle.lock();
        if abort.is_cancelled() {
            drop(state);
            return Err(ServerError::StartCancelled { address });
        }
        let stop_accepting = CancellationToken::new();
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let accept_task = tokio::spawn(accept_loop(
            self.inner.clone(),
            listener,
            stop_accepting.clone(),
            shutdown.clone(),
            tracker.clone(),
        ));
        *state = Lifecycle::Running(Running { addr, stop_accepting, shutdown, tracker, accept_task });
        drop(state);
        pending.committed = true;

        info!(target: "pgwire", "pgwire listening on {}", addr);
        Ok(addr)
    }

    /// Closes the listener, cancels every session and waits up to `timeout` for them to finish.
    ///
    /// Returns `Ok` immediately unless the server is running; an in-flight `start` is cancelled.
    /// On timeout the remaining sessions are left to finish on their own and the server is still
    /// considered stopped.
    pub async fn stop(&self, timeout: Duration) -> Result<(), ServerError> {
        let running = {
            let mut state = self.inner.lifecycle.lock();
            match std::mem::replace(&mut *state, Lifecycle::Stopped) {
                Lifecycle::Running(r) => {
                    *state = Lifecycle::Stopping { addr: r.addr, tracker: r.tracker.clone() };
                    r
                }
                Lifecycle::Starting { abort } => {
                    abort.cancel();
                    info!(target: "pgwire", "pending start cancelled");
                    return Ok(());
                }
                other => {
                    *state = other;
                    return Ok(());
                }
            }
        };
        let _finish = FinishStop { lifecycle: &self.inner.lifecycle, shutdown: running.shutdown.clone() };
        info!(target: "pgwire", addr = %running.addr, sessions = running.tracker.len(), "stopping pgwire listener");

        running.stop_accepting.cancel();
        if let Err(e) = running.accept_task.await {
            error!(target: "pgwire", "accept loop ended abnormally: {}", e);
        }
        running.tracker.close();
        running.shutdown.cancel();

        match tokio::time::timeout(timeout, running.tracker.wait()).await {
            Ok(()) => {
                info!(target: "pgwire", "all sessions drained");
                Ok(())
            }
            Err(_) => {
                let remaining = running.tracker.len();
                warn!(target: "pgwire", remaining, ?timeout, "drain timed out");
                Err(ServerError::DrainTimeout { timeout, remaining })
            }
        }
    }

    /// Bound address while running or stopping.
    pub fn address(&self) -> Option<SocketAddr> {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Running(r) => Some(r.addr),
            Lifecycle::Stopping { addr, .. } => Some(*addr),
            Lifecycle::Stopped | Lifecycle::Starting { .. } => None,
        }
    }

    pub fn active_sessions(&self) -> usize {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Running(r) => r.tracker.len(),
            Lifecycle::Stopping { tracker, .. } => tracker.len(),
            Lifecycle::Stopped | Lifecycle::Starting { .. } => 0,
        }
    }
}

/// Puts an abandoned start back to `Stopped`. If a concurrent `stop` cancelled it, that stop
/// already did.
struct PendingStart<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    abort: CancellationToken,
    committed: bool,
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut state = self.lifecycle.lock();
        if !self.abort.is_cancelled() {
            *state = Lifecycle::Stopped;
        }
    }
}

/// Ends a stop, completed or dropped: sessions are cancelled and the lifecycle is `Stopped`.
struct FinishStop<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl Drop for FinishStop<'_> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        *self.lifecycle.lock() = Lifecycle::Stopped;
    }
}

async fn bind_listener(address: &str) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(address).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    stop: CancellationToken,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (socket, peer) = match accepted {
            Ok(a) => a,
            Err(e) => {
                warn!(target: "pgwire", error = %e, "accept failed; retrying");
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                }
            }
        };

        let id = ConnectionId(inner.next_conn_id.fetch_add(1, Ordering::Relaxed));
        debug!(target: "pgwire", "conn_id={} new connection established from {}", id, peer);
        let session = Session::new(id, peer, socket, &inner.config, inner.normalizer.clone(), inner.sink.clone());
        let token = shutdown.clone();
        let span = info_span!("session", conn_id = %id, %peer);
        tracker.spawn(
            async move {
                let mut session = session;
                match AssertUnwindSafe(session.run(token)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(target: "pgwire", "conn_id={} peer={} ended with error: {}", id, peer, e),
                    Err(_) => error!(target: "pgwire", "conn_id={} peer={} session panicked", id, peer),
                }
            }
            .instrument(span),
        );
    }
    debug!(target: "pgwire", "accept loop stopped");
}
