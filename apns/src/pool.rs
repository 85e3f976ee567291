//! C4 — bounded pool of HTTP/2 connections.
//!
//! A single task owns every collection below (`idle`, in-use count,
//! `pending_creates`, the two waiter queues); everything else talks to it
//! through [`mpsc`] messages, the same single-mutator-task shape this
//! corpus uses for its registries and dispatchers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::connection::ConnectionHandle;
use crate::connection::ConnectionFactory;
use crate::error::ApnsError;
use crate::metrics::MetricsListener;

enum Command {
    Acquire(oneshot::Sender<Result<ConnectionHandle, ApnsError>>),
    Release(ConnectionHandle),
    CreationDone(Result<ConnectionHandle, ApnsError>),
    Close(oneshot::Sender<()>),
}

/// A handle to a running pool task. Cloning is cheap; every clone talks to
/// the same underlying pool.
#[derive(Clone)]
pub struct ConnectionPool {
    cmd_tx: mpsc::Sender<Command>,
}

impl ConnectionPool {
    pub fn new(
        factory: Arc<ConnectionFactory>,
        capacity: usize,
        queue_cap: Option<usize>,
        graceful_shutdown_timeout: Duration,
        metrics: Arc<dyn MetricsListener>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let state = PoolState {
            factory,
            capacity,
            queue_cap,
            graceful_shutdown_timeout,
            metrics,
            idle: VecDeque::new(),
            in_use_count: 0,
            pending_creates: 0,
            creation_waiters: VecDeque::new(),
            pending_acquires: VecDeque::new(),
            closing: false,
            self_tx: cmd_tx.clone(),
        };
        tokio::spawn(state.run(cmd_rx));
        Self { cmd_tx }
    }

    /// Acquires a ready connection, creating one if the pool has spare
    /// capacity or queueing behind other waiters otherwise (P4, P5).
    pub async fn acquire(&self) -> Result<ConnectionHandle, ApnsError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Acquire(tx))
            .await
            .map_err(|_| ApnsError::ClientClosed)?;
        rx.await.map_err(|_| ApnsError::ClientClosed)?
    }

    /// Returns a connection to the pool, or drops it from accounting if it
    /// has already closed.
    pub async fn release(&self, handle: ConnectionHandle) {
        let _ = self.cmd_tx.send(Command::Release(handle)).await;
    }

    /// Drains idle connections, stops accepting new acquires, waits up to
    /// `graceful_shutdown_timeout` for in-flight connections to be released.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

struct PoolState {
    factory: Arc<ConnectionFactory>,
    capacity: usize,
    queue_cap: Option<usize>,
    graceful_shutdown_timeout: Duration,
    metrics: Arc<dyn MetricsListener>,
    idle: VecDeque<ConnectionHandle>,
    in_use_count: usize,
    pending_creates: usize,
    creation_waiters: VecDeque<oneshot::Sender<Result<ConnectionHandle, ApnsError>>>,
    pending_acquires: VecDeque<oneshot::Sender<Result<ConnectionHandle, ApnsError>>>,
    closing: bool,
    self_tx: mpsc::Sender<Command>,
}

impl PoolState {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Acquire(tx) => self.on_acquire(tx),
                Command::Release(handle) => self.on_release(handle),
                Command::CreationDone(result) => self.on_creation_done(result),
                Command::Close(done) => {
                    self.on_close(done, &mut cmd_rx).await;
                    break;
                }
            }
        }
    }

    fn on_acquire(&mut self, tx: oneshot::Sender<Result<ConnectionHandle, ApnsError>>) {
        if self.closing {
            let _ = tx.send(Err(ApnsError::ClientClosed));
            return;
        }
        if let Some(handle) = self.idle.pop_front() {
            self.in_use_count += 1;
            let _ = tx.send(Ok(handle));
            return;
        }
        if self.in_use_count + self.idle.len() + self.pending_creates < self.capacity {
            self.spawn_creation(tx);
            return;
        }
        if let Some(cap) = self.queue_cap {
            if self.pending_acquires.len() >= cap {
                let _ = tx.send(Err(ApnsError::RejectedAcquisition { limit: cap }));
                return;
            }
        }
        self.pending_acquires.push_back(tx);
    }

    fn on_release(&mut self, handle: ConnectionHandle) {
        self.in_use_count = self.in_use_count.saturating_sub(1);
        if handle.is_closed() {
            tracing::debug!(connection_id = handle.id, "releasing closed connection, dropping from pool");
            self.metrics.connection_removed();
        } else if let Some(waiter) = self.pending_acquires.pop_front() {
            self.in_use_count += 1;
            let _ = waiter.send(Ok(handle));
        } else {
            self.idle.push_back(handle);
        }
        self.promote_pending_acquires();
    }

    fn on_creation_done(&mut self, result: Result<ConnectionHandle, ApnsError>) {
        self.pending_creates = self.pending_creates.saturating_sub(1);
        let owner = self.creation_waiters.pop_front();
        match result {
            Ok(handle) => {
                self.metrics.connection_added();
                match owner {
                    Some(owner) => {
                        self.in_use_count += 1;
                        let _ = owner.send(Ok(handle));
                    }
                    None => self.idle.push_back(handle),
                }
            }
            Err(err) => {
                if let Some(owner) = owner {
                    let _ = owner.send(Err(err));
                }
            }
        }
        self.promote_pending_acquires();
    }

    /// After capacity frees up (a creation finished, or a closed connection
    /// was dropped on release), spawn new creations for any acquire that
    /// has been waiting without a dedicated creation of its own.
    fn promote_pending_acquires(&mut self) {
        while self.in_use_count + self.idle.len() + self.pending_creates < self.capacity {
            let Some(tx) = self.pending_acquires.pop_front() else { break };
            self.spawn_creation(tx);
        }
    }

    fn spawn_creation(&mut self, owner: oneshot::Sender<Result<ConnectionHandle, ApnsError>>) {
        self.pending_creates += 1;
        self.creation_waiters.push_back(owner);
        let factory = Arc::clone(&self.factory);
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = factory.connect().await;
            let _ = self_tx.send(Command::CreationDone(result)).await;
        });
    }

    /// Continues draining the command channel while waiting for in-flight
    /// connections to be released, rather than sleeping blindly: a
    /// `Release`/`CreationDone` arriving mid-shutdown must still be
    /// processed so `in_use_count` and `pending_creates` stay accurate.
    async fn on_close(&mut self, done: oneshot::Sender<()>, cmd_rx: &mut mpsc::Receiver<Command>) {
        self.closing = true;
        for waiter in self.pending_acquires.drain(..) {
            let _ = waiter.send(Err(ApnsError::ClientClosed));
        }
        for handle in self.idle.drain(..) {
            handle.close();
            self.metrics.connection_removed();
        }

        let deadline = tokio::time::Instant::now() + self.graceful_shutdown_timeout;
        while self.in_use_count > 0 {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, cmd_rx.recv()).await {
                Ok(Some(Command::Acquire(tx))) => {
                    let _ = tx.send(Err(ApnsError::ClientClosed));
                }
                Ok(Some(Command::Release(handle))) => self.on_release(handle),
                Ok(Some(Command::CreationDone(result))) => self.on_creation_done(result),
                Ok(Some(Command::Close(other))) => {
                    let _ = other.send(());
                }
                Ok(None) | Err(_) => break,
            }
        }

        let _ = done.send(());
    }
}
