//! Alert lifecycle: turns anomaly batches into time-bounded alerts.
//!
//! [`AlertBoard`] is the plain state machine. [`AlertManager`] is its single
//! owner task: raise, dismiss and expiry are all commands on one queue, so
//! they apply in a total order and a dismiss racing an expiry simply finds
//! the alert already gone. Readers get snapshots through a `watch` channel.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::AnomalyBatch;

// ---

pub const DEFAULT_ALERT_TTL: Duration = Duration::from_secs(10);

const COMMAND_QUEUE_DEPTH: usize = 64;

/// Where an alert's primary action leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavigationTarget {
    #[serde(rename = "/airiskalerts")]
    AnomalyReview,
}

impl NavigationTarget {
    pub fn route(&self) -> &'static str {
        match self {
            Self::AnomalyReview => "/airiskalerts",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
}

/// One active alert. Dismissed and expired alerts are never represented;
/// they are simply absent from the active list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub dismissible: bool,
    pub target: NavigationTarget,
}

/// Message shown for a batch of `count` new anomalies.
pub fn anomaly_message(count: usize) -> String {
    format!("🚨 Anomaly Detected: {count} new anomalies detected.")
}

/// Navigation requested by an alert's primary action. Does not dismiss.
fn target_of(alerts: &[AlertEvent], id: Uuid) -> Option<NavigationTarget> {
    alerts.iter().find(|a| a.id == id).map(|a| a.target)
}

// ---

/// Ordered list of active alerts, oldest first.
#[derive(Debug)]
pub struct AlertBoard {
    ttl: Duration,
    active: Vec<AlertEvent>,
}

impl AlertBoard {
    // ---
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: Vec::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Append a fresh alert for `batch`. Never fails.
    pub fn raise(&mut self, batch: &AnomalyBatch) -> AlertEvent {
        // ---
        let alert = AlertEvent {
            id: Uuid::new_v4(),
            severity: AlertSeverity::Warning,
            message: anomaly_message(batch.count),
            created_at: Utc::now(),
            ttl_ms: self.ttl.as_millis() as u64,
            dismissible: true,
            target: NavigationTarget::AnomalyReview,
        };
        self.active.push(alert.clone());
        alert
    }

    /// Remove the alert if present. Returns whether anything was removed.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        self.remove(id)
    }

    /// Timer-driven removal; identical in effect to [`Self::dismiss`].
    pub fn expire(&mut self, id: Uuid) -> bool {
        self.remove(id)
    }

    fn remove(&mut self, id: Uuid) -> bool {
        match self.active.iter().position(|a| a.id == id) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn active(&self) -> &[AlertEvent] {
        &self.active
    }
}

// ---

enum AlertCommand {
    Raise(AnomalyBatch, oneshot::Sender<AlertEvent>),
    Dismiss(Uuid, oneshot::Sender<bool>),
    Expire(Uuid),
}

/// Cloneable handle to a running [`AlertManager`].
#[derive(Clone)]
pub struct AlertHandle {
    commands: mpsc::Sender<AlertCommand>,
    snapshot: watch::Receiver<Vec<AlertEvent>>,
    lifetime: CancellationToken,
}

impl AlertHandle {
    // ---
    /// Raise an alert and wait until it is on the active list.
    pub async fn raise(&self, batch: AnomalyBatch) -> Result<AlertEvent> {
        let (reply, rx) = oneshot::channel();
        self.send(AlertCommand::Raise(batch, reply)).await?;
        rx.await.map_err(|_| anyhow!("alert manager stopped"))
    }

    /// Dismiss an alert. Unknown or already removed ids are a no-op.
    pub async fn dismiss(&self, id: Uuid) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(AlertCommand::Dismiss(id, reply)).await?;
        rx.await.map_err(|_| anyhow!("alert manager stopped"))
    }

    /// Current active alerts in arrival order.
    pub fn active(&self) -> Vec<AlertEvent> {
        self.snapshot.borrow().clone()
    }

    pub fn action(&self, id: Uuid) -> Option<NavigationTarget> {
        target_of(&self.snapshot.borrow(), id)
    }

    /// Token cancelled when the manager shuts down. Subscriptions feeding
    /// this manager should stop with it.
    pub fn lifetime(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    async fn send(&self, command: AlertCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow!("alert manager stopped"))
    }
}

/// Owner task for the active alert list and its expiry timers.
pub struct AlertManager {
    board: AlertBoard,
    timers: HashMap<Uuid, JoinHandle<()>>,
    commands: mpsc::Receiver<AlertCommand>,
    expiries: mpsc::Sender<AlertCommand>,
    snapshot: watch::Sender<Vec<AlertEvent>>,
}

impl AlertManager {
    // ---
    /// Start the manager on the current runtime. It runs until `lifetime`
    /// is cancelled.
    pub fn spawn(ttl: Duration, lifetime: CancellationToken) -> (AlertHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(Vec::new());

        let manager = Self {
            board: AlertBoard::new(ttl),
            timers: HashMap::new(),
            commands: rx,
            expiries: tx.clone(),
            snapshot: snapshot_tx,
        };

        let task = tokio::spawn(manager.run(lifetime.clone()));
        let handle = AlertHandle {
            commands: tx,
            snapshot: snapshot_rx,
            lifetime,
        };
        (handle, task)
    }

    async fn run(mut self, lifetime: CancellationToken) {
        // ---
        loop {
            tokio::select! {
                _ = lifetime.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => break,
                },
            }
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        info!("Alert manager stopped");
    }

    fn apply(&mut self, command: AlertCommand) {
        // ---
        match command {
            AlertCommand::Raise(batch, reply) => {
                let alert = self.board.raise(&batch);
                info!(
                    alert_id = %alert.id,
                    count = batch.count,
                    received_at = %batch.received_at,
                    "Alert raised"
                );
                self.arm_expiry(alert.id);
                self.publish();
                let _ = reply.send(alert);
            }
            AlertCommand::Dismiss(id, reply) => {
                let removed = self.board.dismiss(id);
                if removed {
                    if let Some(timer) = self.timers.remove(&id) {
                        timer.abort();
                    }
                    info!(alert_id = %id, "Alert dismissed");
                    self.publish();
                } else {
                    debug!(alert_id = %id, "Dismiss for inactive alert ignored");
                }
                let _ = reply.send(removed);
            }
            AlertCommand::Expire(id) => {
                self.timers.remove(&id);
                if self.board.expire(id) {
                    info!(alert_id = %id, "Alert expired");
                    self.publish();
                }
            }
        }
    }

    fn arm_expiry(&mut self, id: Uuid) {
        let ttl = self.board.ttl();
        let expiries = self.expiries.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = expiries.send(AlertCommand::Expire(id)).await;
        });
        self.timers.insert(id, timer);
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.board.active().to_vec());
    }
}
