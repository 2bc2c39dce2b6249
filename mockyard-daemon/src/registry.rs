//! Registry of running mock server instances, keyed by port
//!
//! One registry-wide mutex guards the slot map and is never held across an
//! `.await`. Starting an instance first inserts a `Reserved` slot under the
//! lock, then probes, resolves and spawns without it, and finally promotes
//! the slot to `Running`. Stopping swaps the slot for a `Stopping` one that
//! lives until the process has been reaped. Reserved and stopping slots count
//! as "port taken" and "config in use" but are never listed or stoppable, so
//! a port hosts at most one process and a config cannot be deleted while any
//! process may still read it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mockyard_protocol::protocol::InstanceStatus;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config_store::{ConfigName, ConfigStore, ConfigUsage};
use crate::duration::format_uptime;
use crate::errors::{DaemonError, Result};
use crate::ports::{PortProbe, validate_port};
use crate::process::{ProcessExitEvent, ProcessHandle, SpawnParams, Supervisor, TerminateOutcome};

/// Capacity of the exit event channel
const EXIT_CHANNEL_CAPACITY: usize = 100;

/// A mock server owned by the registry
#[derive(Debug)]
struct Instance {
    id: u64,
    config: ConfigName,
    started_at: DateTime<Utc>,
    started: Instant,
    handle: ProcessHandle,
}

impl Instance {
    fn snapshot(&self, port: u16) -> InstanceSnapshot {
        InstanceSnapshot {
            port,
            config: self.config.clone(),
            pid: self.handle.pid(),
            started_at: self.started_at,
            uptime: self.started.elapsed(),
        }
    }
}

#[derive(Debug)]
enum Slot {
    /// A start is in progress on this port. The config is claimed once the
    /// port checks have passed.
    Reserved { id: u64, config: Option<ConfigName> },
    Running(Instance),
    /// A stop is in progress and the process may still be alive
    Stopping { id: u64, config: ConfigName },
}

impl Slot {
    fn config(&self) -> Option<&ConfigName> {
        match self {
            Slot::Reserved { config, .. } => config.as_ref(),
            Slot::Running(instance) => Some(&instance.config),
            Slot::Stopping { config, .. } => Some(config),
        }
    }

    /// Id of a reserved or stopping slot
    fn transient_id(&self) -> Option<u64> {
        match self {
            Slot::Reserved { id, .. } | Slot::Stopping { id, .. } => Some(*id),
            Slot::Running(_) => None,
        }
    }
}

/// Point-in-time view of a running instance
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSnapshot {
    pub port: u16,
    pub config: ConfigName,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
}

impl InstanceSnapshot {
    pub fn to_status(&self) -> InstanceStatus {
        InstanceStatus {
            port: self.port,
            config_file: self.config.to_string(),
            uptime: self.uptime.as_millis() as u64,
            uptime_formatted: format_uptime(self.uptime),
            pid: self.pid,
            started_at: Some(self.started_at),
        }
    }
}

/// Result of a successful stop
#[derive(Debug, Clone, PartialEq)]
pub struct StoppedInstance {
    pub port: u16,
    pub config: ConfigName,
    pub outcome: TerminateOutcome,
}

pub struct InstanceRegistry {
    slots: Mutex<HashMap<u16, Slot>>,
    supervisor: Supervisor,
    store: Arc<ConfigStore>,
    probe: Arc<dyn PortProbe>,
    next_id: AtomicU64,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
}

impl InstanceRegistry {
    /// Create a registry and start its exit event listener.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        supervisor: Supervisor,
        store: Arc<ConfigStore>,
        probe: Arc<dyn PortProbe>,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
        let registry = Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            supervisor,
            store,
            probe,
            next_id: AtomicU64::new(1),
            exit_tx,
        });
        spawn_exit_listener(Arc::downgrade(&registry), exit_rx);
        registry
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Start a mock server for `config_file` on `port`.
    ///
    /// Checks run in order: port range, port taken (registry, then OS probe),
    /// configuration exists. Nothing is left registered on failure.
    pub async fn start(&self, port: i64, config_file: &str) -> Result<InstanceSnapshot> {
        let port = validate_port(port)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let reservation = {
            let mut slots = self.slots.lock();
            reap_exited(&mut slots);

            if slots.contains_key(&port) {
                return Err(DaemonError::PortInUse(port));
            }
            slots.insert(port, Slot::Reserved { id, config: None });
            SlotGuard {
                slots: &self.slots,
                port,
                id,
                armed: true,
            }
        };

        if self.probe.is_port_in_use(port) {
            return Err(DaemonError::PortInUse(port));
        }

        // Claimed before resolving so a delete cannot slip in between
        let config = ConfigName::parse(config_file)
            .ok_or_else(|| DaemonError::ConfigNotFound(config_file.to_string()))?;
        reservation.claim(config);

        let (config, config_path) = self.store.resolve(config_file)?;

        let handle = self
            .supervisor
            .spawn(SpawnParams {
                port,
                config_path: &config_path,
                instance_id: id,
                exit_tx: self.exit_tx.clone(),
            })
            .await?;

        let instance = Instance {
            id,
            config,
            started_at: Utc::now(),
            started: Instant::now(),
            handle,
        };
        let snapshot = instance.snapshot(port);
        reservation.promote(instance);

        info!(
            "Mock server started on port {} with {} (pid {:?})",
            port, snapshot.config, snapshot.pid
        );
        Ok(snapshot)
    }

    /// Stop the instance on `port`.
    ///
    /// While the process is being terminated the port stays taken and the
    /// config in use. The entry is removed once termination returns, also
    /// when it reports an error.
    pub async fn stop(&self, port: i64) -> Result<StoppedInstance> {
        let not_found = || DaemonError::InstanceNotFound(port);
        let port = u16::try_from(port).map_err(|_| not_found())?;

        let (instance, _stopping) = {
            let mut slots = self.slots.lock();
            match slots.remove(&port) {
                Some(Slot::Running(instance)) => {
                    let guard = self.mark_stopping(&mut slots, port, &instance);
                    (instance, guard)
                }
                Some(other) => {
                    slots.insert(port, other);
                    return Err(not_found());
                }
                None => return Err(not_found()),
            }
        };

        info!("Stopping mock server on port {}", port);
        match instance.handle.terminate().await {
            Ok(outcome) => {
                debug!("Mock server on port {} stopped: {:?}", port, outcome);
                Ok(StoppedInstance {
                    port,
                    config: instance.config,
                    outcome,
                })
            }
            Err(source) => {
                error!("Failed to stop mock server on port {}: {}", port, source);
                Err(DaemonError::TerminateFailed { port, source })
            }
        }
    }

    /// Running instances sorted by port
    pub fn status(&self) -> Vec<InstanceSnapshot> {
        let mut slots = self.slots.lock();
        reap_exited(&mut slots);

        let mut running: Vec<InstanceSnapshot> = slots
            .iter()
            .filter_map(|(port, slot)| match slot {
                Slot::Running(instance) => Some(instance.snapshot(*port)),
                Slot::Reserved { .. } | Slot::Stopping { .. } => None,
            })
            .collect();
        running.sort_by_key(|s| s.port);
        running
    }

    /// Drop the instance a process exit event refers to, if it is still registered
    pub fn handle_process_exit(&self, event: &ProcessExitEvent) {
        let mut slots = self.slots.lock();
        let matches = matches!(
            slots.get(&event.port),
            Some(Slot::Running(instance)) if instance.id == event.instance_id
        );
        if matches {
            slots.remove(&event.port);
            warn!(
                "Mock server on port {} exited unexpectedly with code {:?}",
                event.port, event.exit_code
            );
        } else {
            debug!(
                "Ignoring exit event for port {} (instance {} no longer registered)",
                event.port, event.instance_id
            );
        }
    }

    /// Terminate every running instance concurrently and empty the registry
    pub async fn shutdown_all(&self) -> usize {
        let instances: Vec<(u16, Instance, SlotGuard<'_>)> = {
            let mut slots = self.slots.lock();
            let ports: Vec<u16> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(port, _)| *port)
                .collect();
            let mut instances = Vec::with_capacity(ports.len());
            for port in ports {
                if let Some(Slot::Running(instance)) = slots.remove(&port) {
                    let guard = self.mark_stopping(&mut slots, port, &instance);
                    instances.push((port, instance, guard));
                }
            }
            instances
        };

        let count = instances.len();
        if count > 0 {
            info!("Stopping {} mock server(s)", count);
        }

        let results = futures::future::join_all(instances.into_iter().map(
            |(port, instance, stopping)| async move {
                let result = instance.handle.terminate().await;
                drop(stopping);
                (port, result)
            },
        ))
        .await;

        for (port, result) in results {
            if let Err(e) = result {
                error!("Failed to stop mock server on port {}: {}", port, e);
            }
        }
        count
    }

    /// Put a `Stopping` slot in place of a running instance taken out of
    /// `slots`. The slot goes away when the returned guard drops.
    fn mark_stopping(
        &self,
        slots: &mut HashMap<u16, Slot>,
        port: u16,
        instance: &Instance,
    ) -> SlotGuard<'_> {
        slots.insert(
            port,
            Slot::Stopping {
                id: instance.id,
                config: instance.config.clone(),
            },
        );
        SlotGuard {
            slots: &self.slots,
            port,
            id: instance.id,
            armed: true,
        }
    }
}

impl ConfigUsage for InstanceRegistry {
    fn is_config_in_use(&self, name: &ConfigName) -> bool {
        let mut slots = self.slots.lock();
        reap_exited(&mut slots);
        slots.values().any(|slot| slot.config() == Some(name))
    }

    fn while_unused(
        &self,
        name: &ConfigName,
        action: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let mut slots = self.slots.lock();
        reap_exited(&mut slots);
        if slots.values().any(|slot| slot.config() == Some(name)) {
            return Err(DaemonError::ConfigInUse(name.clone()));
        }
        action()
    }
}

/// Remove running slots whose process has already exited
fn reap_exited(slots: &mut HashMap<u16, Slot>) {
    slots.retain(|port, slot| match slot {
        Slot::Running(instance) if instance.handle.has_exited() => {
            warn!(
                "Mock server on port {} is no longer running (exit code {:?})",
                port,
                instance.handle.exit_code()
            );
            false
        }
        _ => true,
    });
}

/// Removes its `Reserved` or `Stopping` slot on drop unless promoted
struct SlotGuard<'a> {
    slots: &'a Mutex<HashMap<u16, Slot>>,
    port: u16,
    id: u64,
    armed: bool,
}

impl SlotGuard<'_> {
    /// Record the config a reservation is starting
    fn claim(&self, name: ConfigName) {
        if let Some(Slot::Reserved { id, config }) = self.slots.lock().get_mut(&self.port) {
            if *id == self.id {
                *config = Some(name);
            }
        }
    }

    fn promote(mut self, instance: Instance) {
        self.slots.lock().insert(self.port, Slot::Running(instance));
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.slots.lock();
        if slots.get(&self.port).and_then(Slot::transient_id) == Some(self.id) {
            slots.remove(&self.port);
        }
    }
}

fn spawn_exit_listener(
    registry: Weak<InstanceRegistry>,
    mut exit_rx: mpsc::Receiver<ProcessExitEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = exit_rx.recv().await {
            let Some(registry) = registry.upgrade() else {
                break;
            };
            registry.handle_process_exit(&event);
        }
    });
}

#[cfg(test)]
mod tests;
