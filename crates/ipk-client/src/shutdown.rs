//! Interrupt handling
//!
//! The signal listener runs as its own task and only flips a flag; the
//! session loop notices it and winds down on its own terms.

use crate::{ClientError, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Receiving side of the shutdown flag
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sets the shutdown flag
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a connected trigger/flag pair
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// Check the flag without waiting
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the flag is set
    ///
    /// Never completes if the trigger is dropped without firing.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl ShutdownTrigger {
    /// Set the flag
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Spawn a task that triggers shutdown on SIGINT or SIGTERM
#[cfg(unix)]
pub fn install_signal_handler(trigger: ShutdownTrigger) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())
        .map_err(|e| ClientError::General(format!("Failed to install SIGINT handler: {}", e)))?;
    let mut terminate = signal(SignalKind::terminate())
        .map_err(|e| ClientError::General(format!("Failed to install SIGTERM handler: {}", e)))?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Interrupted"),
            _ = terminate.recv() => info!("Terminated"),
        }
        trigger.trigger();
    }))
}

/// Spawn a task that triggers shutdown on Ctrl-C
#[cfg(not(unix))]
pub fn install_signal_handler(trigger: ShutdownTrigger) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupted"),
            Err(e) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
        }
        trigger.trigger();
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiter() {
        let (trigger, mut shutdown) = Shutdown::channel();
        assert!(!shutdown.is_triggered());

        let waiter = tokio::spawn(async move {
            shutdown.wait().await;
            shutdown.is_triggered()
        });

        trigger.trigger();
        let woke = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(woke);
    }

    #[tokio::test]
    async fn test_dropped_trigger_never_fires() {
        let (trigger, mut shutdown) = Shutdown::channel();
        drop(trigger);

        let waited = tokio::time::timeout(Duration::from_millis(50), shutdown.wait()).await;
        assert!(waited.is_err());
        assert!(!shutdown.is_triggered());
    }
}
