//! Port reconfiguration service.
//!
//! Sequences two independent stateful resources, the config store and the
//! running service, that share no transaction mechanism:
//!
//! ```text
//! Idle → Validating → Staging → Applying → Committed
//!             │                     │
//!             ▼                     ▼
//!           Failed             RollingBack → RolledBack
//!                                   │
//!                                   ▼
//!                                Degraded
//! ```
//!
//! The new port is committed before the service is asked to adopt it. If the
//! service refuses, the previous port is written back and the service is
//! restarted on it, exactly once.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::adapters::probe::{self, Availability};
use crate::adapters::{LockFile, LockPolicy};
use crate::domain::{
    parse, ConfigTransaction, InvalidPortReason, Phase, PortNumber, ReconfigureOutcome,
};
use crate::error::{Error, Result};
use crate::ports::{ConfigRepository, PortPrompt, ServiceControl};

/// Bounds and policies for a reconfiguration attempt.
#[derive(Debug, Clone)]
pub struct ReconfigureOptions {
    /// Bound for each config commit.
    pub persist_timeout: Duration,
    /// Bound for `ServiceControl::apply`.
    pub apply_timeout: Duration,
    /// Bound for `ServiceControl::revert_and_restart`.
    pub recovery_timeout: Duration,
    /// Behaviour when another attempt is in flight.
    pub lock_policy: LockPolicy,
    /// Cross-process lock file, if any.
    pub lock_file: Option<PathBuf>,
    /// How long `LockPolicy::Wait` waits for the lock file.
    pub lock_wait: Duration,
    /// Refuse ports another process already listens on.
    pub check_port_available: bool,
}

impl Default for ReconfigureOptions {
    fn default() -> Self {
        Self {
            persist_timeout: Duration::from_secs(5),
            apply_timeout: Duration::from_secs(30),
            recovery_timeout: Duration::from_secs(30),
            lock_policy: LockPolicy::FailFast,
            lock_file: None,
            lock_wait: Duration::from_secs(30),
            check_port_available: false,
        }
    }
}

/// Configured port and run state of the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub configured_port: PortNumber,
    pub running: bool,
}

/// Result of the staging step.
enum Staged {
    /// Ready to commit and apply.
    Ready {
        tx: ConfigTransaction,
        was_running: bool,
    },
    /// Finished without touching anything.
    Done(ReconfigureOutcome),
}

/// Application service that changes the proxy's listening port.
///
/// Only one attempt runs at a time: every entry point takes the single-flight
/// gate before validating, and keeps it until the attempt reaches a terminal
/// phase.
pub struct ReconfigureOrchestrator<S, C> {
    store: Arc<S>,
    controller: Arc<C>,
    options: ReconfigureOptions,
    gate: Arc<Mutex<()>>,
    phase: Arc<RwLock<Phase>>,
}

impl<S, C> ReconfigureOrchestrator<S, C>
where
    S: ConfigRepository + 'static,
    C: ServiceControl + 'static,
{
    /// Create an orchestrator over the given store and service controller.
    pub fn new(store: S, controller: C, options: ReconfigureOptions) -> Self {
        Self {
            store: Arc::new(store),
            controller: Arc::new(controller),
            options,
            gate: Arc::new(Mutex::new(())),
            phase: Arc::new(RwLock::new(Phase::Idle)),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    pub fn options(&self) -> &ReconfigureOptions {
        &self.options
    }

    /// Phase of the current or most recent attempt.
    pub fn phase(&self) -> Phase {
        *self.phase.read()
    }

    /// Read the configured port and whether the service is running.
    pub async fn status(&self) -> Result<ServiceStatus> {
        let config = self.store.load().await?;
        let running = self.controller.currently_running().await?;
        Ok(ServiceStatus {
            configured_port: config.port(),
            running,
        })
    }

    /// Parse `text` as a port and move the proxy onto it.
    ///
    /// `Err` is returned only when nothing was changed (busy, unreadable
    /// config, unknown service state, failed first commit). Everything that
    /// happens after the commit is reported through the outcome.
    pub async fn change_port(&self, text: &str) -> Result<ReconfigureOutcome> {
        let gate = self.acquire_gate().await?;
        self.transition(Phase::Validating);

        match parse(text) {
            Ok(port) => self.reconfigure(gate, port).await,
            Err(e) => {
                info!(input = text.trim(), reason = %e.reason, "Rejected port");
                self.transition(Phase::Failed);
                Ok(e.reason.into())
            }
        }
    }

    /// Ask `prompt` for a port, then proceed as [`change_port`](Self::change_port).
    ///
    /// The prompt is shown the current port and a random free port that an
    /// empty answer accepts.
    pub async fn change_port_interactive<P: PortPrompt>(
        &self,
        prompt: &P,
    ) -> Result<ReconfigureOutcome> {
        let current = self.store.load().await?.port();
        let suggested = probe::suggest_free_port().await.unwrap_or(current);
        debug!(current = %current, suggested = %suggested, "Prompting for port");

        match prompt.ask_port(current, suggested).await? {
            None => {
                info!("Port change cancelled at prompt");
                Err(Error::Cancelled)
            }
            Some(text) if text.trim().is_empty() => {
                self.change_port(&suggested.to_string()).await
            }
            Some(text) => self.change_port(&text).await,
        }
    }

    async fn acquire_gate(&self) -> Result<OwnedMutexGuard<()>> {
        let gate = Arc::clone(&self.gate);
        match self.options.lock_policy {
            LockPolicy::FailFast => gate.try_lock_owned().map_err(|_| {
                debug!("Reconfiguration already in flight");
                Error::Busy
            }),
            LockPolicy::Wait => Ok(gate.lock_owned().await),
        }
    }

    async fn reconfigure(
        &self,
        gate: OwnedMutexGuard<()>,
        port: PortNumber,
    ) -> Result<ReconfigureOutcome> {
        let lock = match &self.options.lock_file {
            Some(path) => {
                let acquired =
                    LockFile::acquire(path, self.options.lock_policy, self.options.lock_wait).await;
                match acquired {
                    Ok(lock) => Some(lock),
                    Err(e) => {
                        self.transition(Phase::Failed);
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        self.transition(Phase::Staging);
        let (tx, was_running) = match self.stage(port).await {
            Ok(Staged::Ready { tx, was_running }) => (tx, was_running),
            Ok(Staged::Done(outcome)) => return Ok(outcome),
            Err(e) => {
                warn!(error = %e, "Could not stage port change");
                self.transition(Phase::Failed);
                return Err(e);
            }
        };

        // From the commit on the attempt must reach a terminal phase, so it
        // runs in its own task that owns the gate and the lock. Dropping the
        // caller's future does not interrupt it.
        let attempt = Attempt {
            store: Arc::clone(&self.store),
            controller: Arc::clone(&self.controller),
            phase: Arc::clone(&self.phase),
            options: self.options.clone(),
        };
        let handle = tokio::spawn(async move {
            let _gate = gate;
            let _lock = lock;
            attempt.run(tx, was_running).await
        });

        handle
            .await
            .map_err(|e| Error::ApplyFailure(format!("Reconfiguration task aborted: {}", e)))?
    }

    async fn stage(&self, port: PortNumber) -> Result<Staged> {
        let base = self.store.load().await?;
        let was_running = self.controller.currently_running().await?;
        let tx = self.store.stage(base, port);
        debug!(
            tx = %tx.id(),
            from = %tx.previous_port(),
            to = %tx.new_port(),
            running = was_running,
            "Staged port change"
        );

        if tx.is_noop() && was_running {
            let previous_port = tx.previous_port();
            self.store.discard(tx);
            self.transition(Phase::Committed);
            info!(port = %port, "Port already in effect");
            return Ok(Staged::Done(ReconfigureOutcome::Success {
                port,
                previous_port,
                restarted: false,
            }));
        }

        if self.options.check_port_available
            && !tx.is_noop()
            && probe::availability(port).await == Availability::InUse
        {
            self.store.discard(tx);
            self.transition(Phase::Failed);
            warn!(port = %port, "Port already in use by another process");
            return Ok(Staged::Done(InvalidPortReason::InUse.into()));
        }

        Ok(Staged::Ready { tx, was_running })
    }

    fn transition(&self, next: Phase) {
        transition(&self.phase, next);
    }
}

/// The non-cancellable part of an attempt: commit, apply, roll back.
struct Attempt<S, C> {
    store: Arc<S>,
    controller: Arc<C>,
    phase: Arc<RwLock<Phase>>,
    options: ReconfigureOptions,
}

impl<S: ConfigRepository, C: ServiceControl> Attempt<S, C> {
    async fn run(self, tx: ConfigTransaction, was_running: bool) -> Result<ReconfigureOutcome> {
        let port = tx.new_port();
        let previous_port = tx.previous_port();

        let persist_timeout = self.options.persist_timeout;
        let committed = bounded("config commit", persist_timeout, self.store.commit(&tx)).await;
        if let Err(e) = committed {
            if !self.landed_anyway(&tx).await {
                error!(tx = %tx.id(), error = %e, "Commit failed; nothing changed");
                self.store.discard(tx);
                transition(&self.phase, Phase::Failed);
                return Err(e);
            }
            warn!(
                tx = %tx.id(),
                error = %e,
                "Commit reported failure but the new port is on disk"
            );
        }

        transition(&self.phase, Phase::Applying);
        let applied =
            bounded("service apply", self.options.apply_timeout, self.controller.apply(port)).await;
        match applied {
            Ok(()) => {
                transition(&self.phase, Phase::Committed);
                info!(tx = %tx.id(), from = %previous_port, to = %port, "Port change complete");
                Ok(ReconfigureOutcome::Success {
                    port,
                    previous_port,
                    restarted: true,
                })
            }
            Err(apply_err) => {
                warn!(
                    tx = %tx.id(),
                    port = %port,
                    error = %apply_err,
                    "Service rejected new port, rolling back"
                );
                transition(&self.phase, Phase::RollingBack);
                Ok(self.roll_back(tx, was_running, apply_err).await)
            }
        }
    }

    /// A timed out commit may still have completed its rename.
    ///
    /// A dropped commit either renamed before `bounded` gave up or never
    /// will, so one reload settles it.
    async fn landed_anyway(&self, tx: &ConfigTransaction) -> bool {
        if tx.is_noop() {
            return false;
        }
        match self.store.load().await {
            Ok(config) => config.document() == tx.candidate().document(),
            Err(_) => false,
        }
    }

    async fn roll_back(
        &self,
        tx: ConfigTransaction,
        was_running: bool,
        apply_err: Error,
    ) -> ReconfigureOutcome {
        let port = tx.new_port();
        let previous_port = tx.previous_port();
        let reason = apply_err.to_string();
        let mut reasons = vec![reason.clone()];

        // The committed candidate is what is on disk now; stage the old port back onto it.
        let revert = self.store.stage(tx.candidate().clone(), previous_port);
        let persist_timeout = self.options.persist_timeout;
        let restored =
            bounded("config restore", persist_timeout, self.store.commit(&revert)).await;
        match &restored {
            Ok(()) => info!(
                tx = %revert.id(),
                port = %previous_port,
                "Restored previous port in config"
            ),
            Err(e) => {
                error!(tx = %revert.id(), error = %e, "Failed to restore previous port in config");
                reasons.push(format!(
                    "restoring port {} in the configuration failed: {}",
                    previous_port, e
                ));
            }
        }

        if !was_running {
            return self
                .leave_stopped(port, previous_port, reason, reasons, restored.is_ok())
                .await;
        }

        if restored.is_err() {
            // Restarting would read the rejected port again.
            return self.degraded(port, previous_port, reasons).await;
        }

        let recovered = bounded(
            "service recovery",
            self.options.recovery_timeout,
            self.controller.revert_and_restart(previous_port),
        )
        .await;
        match recovered {
            Ok(()) => {
                transition(&self.phase, Phase::RolledBack);
                info!(port = %previous_port, "Service healthy on previous port");
                ReconfigureOutcome::ApplyFailed {
                    port,
                    previous_port,
                    reason,
                    recovered: true,
                    service_running: true,
                }
            }
            Err(e) => {
                reasons.push(e.to_string());
                self.degraded(port, previous_port, reasons).await
            }
        }
    }

    /// Put back a service that was stopped before the attempt.
    ///
    /// `apply` may have started it before failing; it is stopped again so
    /// the run state matches what it was.
    async fn leave_stopped(
        &self,
        port: PortNumber,
        previous_port: PortNumber,
        reason: String,
        mut reasons: Vec<String>,
        config_restored: bool,
    ) -> ReconfigureOutcome {
        let stopped = match self.controller.currently_running().await {
            Ok(false) => Ok(()),
            Ok(true) => {
                warn!(port = %port, "Failed attempt left the service running, stopping it");
                let limit = self.options.recovery_timeout;
                bounded("service stop", limit, self.controller.stop()).await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = stopped {
            error!(error = %e, "Could not return the service to stopped");
            reasons.push(format!("stopping the service failed: {}", e));
            return self.degraded(port, previous_port, reasons).await;
        }

        transition(&self.phase, Phase::RolledBack);
        ReconfigureOutcome::ApplyFailed {
            port,
            previous_port,
            reason,
            recovered: config_restored,
            service_running: false,
        }
    }

    async fn degraded(
        &self,
        port: PortNumber,
        previous_port: PortNumber,
        reasons: Vec<String>,
    ) -> ReconfigureOutcome {
        transition(&self.phase, Phase::Degraded);

        let store_port = self.store.load().await.ok().map(|config| config.port());
        let service_running = self.controller.currently_running().await.unwrap_or(false);
        error!(
            port = %port,
            previous_port = %previous_port,
            store_port = ?store_port.map(PortNumber::get),
            service_running,
            reasons = ?reasons,
            "Rollback failed; manual intervention required"
        );

        ReconfigureOutcome::Degraded {
            port,
            previous_port,
            reasons,
            store_port,
            service_running,
        }
    }
}

fn transition(phase: &RwLock<Phase>, next: Phase) {
    let previous = std::mem::replace(&mut *phase.write(), next);
    debug!(from = %previous, to = %next, "Phase transition");
}

/// Run `fut`, mapping expiry of `limit` to `Error::Timeout`.
async fn bounded<T>(
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(Error::Timeout { operation, after: limit }))
}
