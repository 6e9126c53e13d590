use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use shared::types::TargetRecord;
use crate::config::Config;
use crate::directory::{fingerprint, table::TargetTable};
use crate::mdns::scanner::Scanner;
use crate::static_hosts;

/// Commands sent to the directory thread
pub enum DirectoryCommand {
    Merge(Vec<TargetRecord>, oneshot::Sender<usize>),
    MarkTarget {
        address: String,
        healthy: bool,
        reply: oneshot::Sender<bool>,
    },
    SetDeviceName {
        address: String,
        name: String,
        reply: oneshot::Sender<bool>,
    },
    GetAll(oneshot::Sender<Vec<TargetRecord>>),
    Shutdown,
}

/// Handle to the target directory. Cheap to clone; every clone talks to the same thread.
#[derive(Clone)]
pub struct DirectoryHandle {
    tx: mpsc::Sender<DirectoryCommand>,
}

impl DirectoryHandle {
    /// Spawn the directory thread seeded with the static targets
    pub fn spawn(static_targets: Vec<TargetRecord>, fingerprint_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<DirectoryCommand>(256);
        let mut table = TargetTable::new(static_targets);

        let publish = |table: &TargetTable, fingerprint_tx: &watch::Sender<String>| {
            let new_fingerprint = fingerprint::compute_fingerprint(&table.get_targets());
            fingerprint_tx.send_if_modified(|current| {
                if *current == new_fingerprint {
                    return false;
                }
                *current = new_fingerprint;
                true
            });
        };
        publish(&table, &fingerprint_tx);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    DirectoryCommand::Merge(discovered, reply) => {
                        table.merge(discovered);
                        publish(&table, &fingerprint_tx);
                        let _ = reply.send(table.len());
                    }
                    DirectoryCommand::MarkTarget { address, healthy, reply } => {
                        let applied = table.mark_target(&address, healthy);
                        // An unhealthy mark may have evicted the target
                        if !healthy {
                            publish(&table, &fingerprint_tx);
                        }
                        let _ = reply.send(applied);
                    }
                    DirectoryCommand::SetDeviceName { address, name, reply } => {
                        let changed = table.set_device_name(&address, &name);
                        if changed {
                            publish(&table, &fingerprint_tx);
                        }
                        let _ = reply.send(changed);
                    }
                    DirectoryCommand::GetAll(reply) => {
                        let _ = reply.send(table.get_targets());
                    }
                    DirectoryCommand::Shutdown => {
                        tracing::info!("Directory thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Feed one discovery round into the directory. Returns the number of targets afterwards.
    pub async fn merge(&self, discovered: Vec<TargetRecord>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DirectoryCommand::Merge(discovered, reply)).await?;
        Ok(rx.await?)
    }

    /// Report the outcome of probing a target. Returns true if the mark was applied.
    pub async fn mark_target(&self, address: &str, healthy: bool) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DirectoryCommand::MarkTarget {
            address: address.to_string(),
            healthy,
            reply,
        }).await?;
        Ok(rx.await?)
    }

    /// Annotate a target with the name it reports about itself
    pub async fn set_device_name(&self, address: &str, name: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DirectoryCommand::SetDeviceName {
            address: address.to_string(),
            name: name.to_string(),
            reply,
        }).await?;
        Ok(rx.await?)
    }

    /// Snapshot of all current targets
    pub async fn get_targets(&self) -> Result<Vec<TargetRecord>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(DirectoryCommand::GetAll(reply)).await?;
        Ok(rx.await?)
    }

    /// Shutdown the directory thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(DirectoryCommand::Shutdown).await?;
        Ok(())
    }
}

/// A running discovery subsystem: the directory plus its refresh loop
pub struct Discovery {
    pub directory: DirectoryHandle,
    pub fingerprint_rx: watch::Receiver<String>,
    pub refresh_task: JoinHandle<()>,
}

impl Discovery {
    /// Load static hosts, start the directory and spawn the refresh loop.
    /// Fails only on invalid static host configuration.
    pub fn enable<S: Scanner>(config: &Config, scanner: S, cancel: CancellationToken) -> Result<Self> {
        let static_targets = static_hosts::load(&config.hosts)?;
        tracing::info!("Loaded {} static targets", static_targets.len());

        let (fingerprint_tx, fingerprint_rx) = watch::channel(String::new());
        let directory = DirectoryHandle::spawn(static_targets, fingerprint_tx);

        let refresh_directory = directory.clone();
        let refresh_interval = config.discovery.refresh_interval();
        let scan_timeout = config.discovery.scan_timeout();
        let refresh_task = tokio::spawn(async move {
            run(scanner, refresh_directory, refresh_interval, scan_timeout, cancel).await;
        });

        Ok(Self {
            directory,
            fingerprint_rx,
            refresh_task,
        })
    }
}

/// Refresh loop: scan, merge, sleep, until cancelled. Failed rounds are logged and skipped.
pub async fn run<S: Scanner>(
    scanner: S,
    directory: DirectoryHandle,
    refresh_interval: Duration,
    scan_timeout: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        "Starting discovery refresh loop (interval {:?}, scan timeout {:?})",
        refresh_interval,
        scan_timeout
    );

    loop {
        tokio::select! {
            result = scanner.scan(scan_timeout) => {
                match result {
                    Ok(discovered) => {
                        let found = discovered.len();
                        match directory.merge(discovered).await {
                            Ok(total) => {
                                tracing::info!("Discovery round found {} targets, {} tracked", found, total);
                            }
                            Err(e) => {
                                tracing::error!("Failed to merge discovery round: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("Discovery round failed: {:#}", e);
                    }
                }
            }
            _ = cancel.cancelled() => {
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(refresh_interval) => {}
            _ = cancel.cancelled() => {
                break;
            }
        }
    }

    tracing::info!("Discovery refresh loop shutting down");
}
