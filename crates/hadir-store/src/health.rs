//! Local backend health probing and failover.
//!
//! While on `LOCAL`, a single failed probe switches the process to `CLOUD`.
//! There is no automatic way back: returning to `LOCAL` takes an operator
//! override.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::Backend;
use crate::mode::{BackendMode, ModeChangeCause, ModeReader, ModeWriter};

#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("health monitor task has stopped")]
    Stopped,
}

/// Owns the backend mode and the connectivity indicator.
pub struct HealthMonitor {
    local: Arc<dyn Backend>,
    writer: ModeWriter,
    config: HealthConfig,
    connected: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(local: Arc<dyn Backend>, writer: ModeWriter, config: HealthConfig) -> Self {
        let (connected, _) = watch::channel(writer.current() == BackendMode::Cloud);
        Self {
            local,
            writer,
            config,
            connected,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.writer.current()
    }

    pub fn reader(&self) -> ModeReader {
        self.writer.reader()
    }

    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// One bounded reachability check of the local backend.
    pub async fn probe(&self) -> bool {
        match tokio::time::timeout(self.config.probe_timeout, self.local.health()).await {
            Ok(Ok(())) => {
                tracing::debug!("local backend probe ok");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "local backend probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.config.probe_timeout, "local backend probe timed out");
                false
            }
        }
    }

    /// Startup decision: `LOCAL` if the local backend answers, else `CLOUD`.
    pub async fn bootstrap(&self) -> BackendMode {
        let mode = if self.probe().await {
            BackendMode::Local
        } else {
            BackendMode::Cloud
        };
        self.writer.set(mode, ModeChangeCause::Bootstrap).await;
        self.connected.send_replace(true);
        tracing::info!(mode = %mode, "storage backend selected");
        mode
    }

    /// One scheduled check. Returns the new mode if this check switched it.
    pub async fn tick(&self) -> Option<BackendMode> {
        if self.writer.current() == BackendMode::Cloud {
            self.connected.send_replace(true);
            return None;
        }

        let healthy = self.probe().await;
        self.connected.send_replace(healthy);
        if healthy {
            return None;
        }

        tracing::warn!("local backend unreachable; failing over to cloud");
        self.writer
            .set(BackendMode::Cloud, ModeChangeCause::ProbeFailed)
            .await
            .then_some(BackendMode::Cloud)
    }

    /// Operator-selected mode. The only path from `CLOUD` back to `LOCAL`.
    pub async fn override_mode(&self, mode: BackendMode) -> bool {
        let changed = self.writer.set(mode, ModeChangeCause::Operator).await;
        if mode == BackendMode::Cloud {
            self.connected.send_replace(true);
        }
        tracing::info!(mode = %mode, changed, "backend mode override");
        changed
    }

    /// Run the probe loop on a tokio task.
    pub fn spawn(self) -> MonitorHandle {
        let (tx, mut rx) = mpsc::channel::<MonitorCommand>(4);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let reader = self.reader();
        let connected = self.connected();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; bootstrap already probed.
            ticker.tick().await;
            tracing::info!(interval = ?self.config.interval, "health monitor started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    cmd = rx.recv() => match cmd {
                        Some(MonitorCommand::Override { mode, reply }) => {
                            let changed = self.override_mode(mode).await;
                            let _ = reply.send(changed);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::info!("health monitor stopped");
        });

        MonitorHandle {
            tx,
            reader,
            connected,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

enum MonitorCommand {
    Override {
        mode: BackendMode,
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to a running monitor. Dropping it cancels the probe timer.
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
    reader: ModeReader,
    connected: watch::Receiver<bool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn mode(&self) -> BackendMode {
        self.reader.current()
    }

    pub fn reader(&self) -> ModeReader {
        self.reader.clone()
    }

    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Switch mode on behalf of an operator. Returns whether it changed.
    pub async fn override_mode(&self, mode: BackendMode) -> Result<bool, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MonitorCommand::Override { mode, reply })
            .await
            .map_err(|_| MonitorError::Stopped)?;
        rx.await.map_err(|_| MonitorError::Stopped)
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
