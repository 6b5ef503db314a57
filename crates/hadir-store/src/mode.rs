//! The process-wide backend mode.
//!
//! A `watch` channel with exactly one [`ModeWriter`] (owned by the health
//! monitor) and any number of [`ModeReader`]s. Readers observe a switch on
//! their next read; a pending `changed()` doubles as the reload signal.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;

use crate::client_state::ClientState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackendMode {
    Local,
    Cloud,
}

impl BackendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendMode::Local => "LOCAL",
            BackendMode::Cloud => "CLOUD",
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown backend mode {0:?} (expected LOCAL or CLOUD)")]
pub struct UnknownMode(pub String);

impl FromStr for BackendMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(BackendMode::Local),
            // Older clients persisted the cloud mode under the vendor name.
            "CLOUD" | "FIREBASE" => Ok(BackendMode::Cloud),
            _ => Err(UnknownMode(s.to_string())),
        }
    }
}

/// Why the mode was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChangeCause {
    Bootstrap,
    ProbeFailed,
    Operator,
}

/// The single writer of the backend mode.
pub struct ModeWriter {
    tx: watch::Sender<BackendMode>,
    persist: Option<ClientState>,
}

/// Cheap, cloneable read handle on the backend mode.
#[derive(Clone)]
pub struct ModeReader {
    rx: watch::Receiver<BackendMode>,
}

/// Create an unpersisted mode channel.
pub fn mode_channel(initial: BackendMode) -> (ModeWriter, ModeReader) {
    let (tx, rx) = watch::channel(initial);
    (ModeWriter { tx, persist: None }, ModeReader { rx })
}

impl ModeWriter {
    /// Restore the persisted mode (default `LOCAL`) and write every change back.
    pub async fn restore(state: ClientState) -> Result<(Self, ModeReader), crate::ClientStateError> {
        let initial = state.mode().await?.unwrap_or(BackendMode::Local);
        tracing::debug!(mode = %initial, "restored backend mode");
        let (tx, rx) = watch::channel(initial);
        Ok((
            Self {
                tx,
                persist: Some(state),
            },
            ModeReader { rx },
        ))
    }

    pub fn current(&self) -> BackendMode {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> ModeReader {
        ModeReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Write `mode`. Readers are only notified when the value actually changes.
    /// Returns whether it changed.
    pub async fn set(&self, mode: BackendMode, cause: ModeChangeCause) -> bool {
        let mut previous = mode;
        let changed = self.tx.send_if_modified(|current| {
            previous = *current;
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        });

        if changed {
            tracing::warn!(from = %previous, to = %mode, ?cause, "backend mode switched");
        }

        if let Some(state) = &self.persist {
            if let Err(e) = state.set_mode(mode).await {
                tracing::error!(error = %e, mode = %mode, "failed to persist backend mode");
            }
        }

        changed
    }
}

impl ModeReader {
    /// Synchronous read of the current mode.
    pub fn current(&self) -> BackendMode {
        *self.rx.borrow()
    }

    /// Wait for the next mode switch. `None` once the writer is gone.
    pub async fn changed(&mut self) -> Option<BackendMode> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}
