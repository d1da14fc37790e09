//! Single-owner limiter task reached over a channel.
//!
//! A [`LimiterWorker`] owns a [`WindowLimiter`] on a dedicated tokio task and
//! applies commands one at a time, so callers never contend on the limiter's
//! lock. [`LimiterHandle`]s are cheap to clone and can be passed to any task.

use std::fmt::Debug;
use std::hash::Hash;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::clock::Clock;
use super::limiter::WindowLimiter;
use super::record::Record;
use crate::error::{Result, WindowLimitError};

/// A request to the worker, carrying the channel for its reply.
#[derive(Debug)]
enum Command<K> {
    Configure {
        window: i64,
        threshold: i64,
        reply: oneshot::Sender<()>,
    },
    Add {
        key: K,
        reply: oneshot::Sender<bool>,
    },
    Ask {
        key: K,
        reply: oneshot::Sender<bool>,
    },
    Clear {
        key: K,
        reply: oneshot::Sender<()>,
    },
    Dump {
        reply: oneshot::Sender<Vec<K>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(K, Record)>>,
    },
    Shutdown,
}

/// The task side: owns the limiter and serves commands until every handle
/// is dropped or a shutdown is requested.
pub struct LimiterWorker<K, C> {
    limiter: WindowLimiter<K, C>,
    receiver: mpsc::Receiver<Command<K>>,
}

impl<K, C> LimiterWorker<K, C>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    C: Clock + 'static,
{
    /// Move `limiter` onto a new task.
    ///
    /// Returns a handle for sending commands and the task's join handle.
    pub fn spawn(limiter: WindowLimiter<K, C>, capacity: usize) -> (LimiterHandle<K>, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = Self { limiter, receiver };

        info!(capacity, "Starting limiter worker");
        let task = tokio::spawn(worker.run());
        (LimiterHandle { sender }, task)
    }

    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            if !self.apply(command) {
                break;
            }
        }
        info!("Limiter worker stopped");
    }

    /// Apply one command. Returns `false` when the worker should stop.
    fn apply(&self, command: Command<K>) -> bool {
        // A dropped reply receiver means the caller gave up; nothing to do.
        match command {
            Command::Configure {
                window,
                threshold,
                reply,
            } => {
                self.limiter.configure(window, threshold);
                let _ = reply.send(());
            }
            Command::Add { key, reply } => {
                let _ = reply.send(self.limiter.add(key));
            }
            Command::Ask { key, reply } => {
                let _ = reply.send(self.limiter.ask(&key));
            }
            Command::Clear { key, reply } => {
                self.limiter.clear(&key);
                let _ = reply.send(());
            }
            Command::Dump { reply } => {
                let _ = reply.send(self.limiter.dump());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.limiter.snapshot());
            }
            Command::Shutdown => {
                debug!("Limiter worker received shutdown");
                return false;
            }
        }
        true
    }
}

/// Client side of a [`LimiterWorker`].
///
/// Every method fails with [`WindowLimitError::WorkerClosed`] once the worker
/// has stopped.
#[derive(Debug)]
pub struct LimiterHandle<K> {
    sender: mpsc::Sender<Command<K>>,
}

impl<K> Clone for LimiterHandle<K> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<K> LimiterHandle<K> {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command<K>) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| WindowLimitError::WorkerClosed)?;
        response.await.map_err(|_| WindowLimitError::WorkerClosed)
    }

    /// See [`WindowLimiter::configure`].
    pub async fn configure(&self, window: i64, threshold: i64) -> Result<()> {
        self.request(|reply| Command::Configure {
            window,
            threshold,
            reply,
        })
        .await
    }

    /// See [`WindowLimiter::add`].
    pub async fn add(&self, key: K) -> Result<bool> {
        self.request(|reply| Command::Add { key, reply }).await
    }

    /// See [`WindowLimiter::ask`].
    pub async fn ask(&self, key: K) -> Result<bool> {
        self.request(|reply| Command::Ask { key, reply }).await
    }

    /// See [`WindowLimiter::clear`].
    pub async fn clear(&self, key: K) -> Result<()> {
        self.request(|reply| Command::Clear { key, reply }).await
    }

    /// See [`WindowLimiter::dump`].
    pub async fn dump(&self) -> Result<Vec<K>> {
        self.request(|reply| Command::Dump { reply }).await
    }

    /// See [`WindowLimiter::snapshot`].
    pub async fn snapshot(&self) -> Result<Vec<(K, Record)>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Ask the worker to stop after the commands already queued.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(Command::Shutdown)
            .await
            .map_err(|_| WindowLimitError::WorkerClosed)
    }

    /// Whether the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
