pub(crate) mod builder;
pub(crate) mod metrics;
pub(crate) mod process;

use std::{
    any::Any,
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::{future::join_all, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    instance::{Factory, InstanceConfig, InstanceError, ManagedInstance},
    manager::{
        metrics::ManagerMetrics,
        process::{Process, StopHandle},
    },
};

/// Errors returned to callers of a [`Manager`].
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("config has no name")]
    MissingName,
    #[error("config {name} does not exist")]
    NotFound { name: String },
    /// The running instance rejected the new config for a reason other than
    /// needing a restart. It keeps running with its previous config.
    #[error("failed to update instance {name}: {source}")]
    Update { name: String, source: InstanceError },
    /// The factory could not build an instance. Nothing was registered.
    #[error("failed to launch instance {name}: {source}")]
    Launch { name: String, source: anyhow::Error },
    #[error("{operation} not implemented")]
    NotImplemented { operation: &'static str },
}

/// Operations for manipulating running instances at runtime.
///
/// Implemented by [`BasicManager`], which launches instances directly, and by
/// [`MockManager`](crate::MockManager) for tests. Other managers usually wrap
/// a `BasicManager`.
#[async_trait::async_trait]
pub trait Manager<C: InstanceConfig>: Send + Sync {
    /// Returns every instance currently managed, keyed by config name.
    async fn list_instances(&self) -> HashMap<String, Arc<dyn ManagedInstance<C>>>;

    /// Returns the config applied to each managed instance, keyed by config name.
    async fn list_configs(&self) -> HashMap<String, C>;

    /// Starts an instance for `cfg`, or updates the one already running under
    /// the same name.
    async fn apply_config(&self, cfg: C) -> Result<(), ManagerError>;

    /// Stops the instance running under `name` and waits for it to exit.
    async fn delete_config(&self, name: &str) -> Result<(), ManagerError>;

    /// Stops every managed instance and waits for all of them to exit.
    async fn stop(&self);
}

/// Settings of a [`BasicManager`] that can change while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicManagerConfig {
    /// How long to wait before running an instance again after it exited abnormally.
    pub instance_restart_backoff: Duration,
}

impl Default for BasicManagerConfig {
    fn default() -> Self {
        Self {
            instance_restart_backoff: Duration::from_secs(5),
        }
    }
}

/// Launches instances directly and keeps them alive.
///
/// Each applied config gets its own Tokio task which runs the instance, and
/// runs it again after the restart backoff whenever it exits abnormally. The
/// task removes its process from the table once the instance has stopped.
///
/// Cloning a `BasicManager` returns another handle to the same set of
/// instances.
pub struct BasicManager<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for BasicManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<C> {
    cfg: Mutex<BasicManagerConfig>,
    // A run task reports Exited before it locks this table, so the table may
    // be held while waiting on StopHandle::stop_run, never on StopHandle::stop.
    // apply_config does hold it across stop_run when forcing a restart, so a
    // slow-exiting instance stalls table access for every other name until it
    // has exited.
    processes: tokio::sync::Mutex<HashMap<String, Process<C>>>,
    launch: Box<dyn Factory<C>>,
    metrics: Arc<dyn ManagerMetrics>,
    next_id: AtomicU64,
}

impl<C: InstanceConfig> BasicManager<C> {
    pub(crate) fn new(
        cfg: BasicManagerConfig,
        launch: Box<dyn Factory<C>>,
        metrics: Arc<dyn ManagerMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                cfg: Mutex::new(cfg),
                processes: tokio::sync::Mutex::new(HashMap::new()),
                launch,
                metrics,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Replaces the manager settings. A new restart backoff applies from the
    /// next abnormal exit onwards.
    pub fn update_manager_config(&self, cfg: BasicManagerConfig) {
        *self.shared.cfg.lock().unwrap_or_else(PoisonError::into_inner) = cfg;
    }

    pub fn manager_config(&self) -> BasicManagerConfig {
        *self.shared.cfg.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Launches an instance for `cfg` and registers it under `name`.
    ///
    /// Any process already registered under `name` is replaced in the table;
    /// the caller must have stopped it first.
    fn spawn_process(
        &self,
        processes: &mut HashMap<String, Process<C>>,
        name: String,
        cfg: C,
    ) -> Result<(), ManagerError> {
        let inst = self
            .shared
            .launch
            .launch(cfg.clone())
            .map_err(|source| ManagerError::Launch {
                name: name.clone(),
                source,
            })?;

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (stop_handle, signal) = StopHandle::new();
        let token = stop_handle.token();

        processes.insert(
            name.clone(),
            Process {
                id,
                cfg,
                inst: Arc::clone(&inst),
                stop_handle,
            },
        );
        debug!(instance = %name, id, "spawned instance");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.run_process(&name, &*inst, token).await;
            signal.exited();

            // A newer config may have replaced this process under the same
            // name while it was stopping. Only remove the entry we created.
            {
                let mut processes = shared.processes.lock().await;
                if processes.get(&name).is_some_and(|process| process.id == id) {
                    processes.remove(&name);
                    debug!(instance = %name, id, "removed stopped instance");
                }
            }

            shared.metrics.instance_stopped();
            signal.released();
        });

        Ok(())
    }
}

impl<C: InstanceConfig> Shared<C> {
    /// Runs `inst` until `token` is cancelled, restarting it after every
    /// abnormal exit. A panic inside `run` counts as an abnormal exit.
    async fn run_process(
        &self,
        name: &str,
        inst: &dyn ManagedInstance<C>,
        token: CancellationToken,
    ) {
        loop {
            let result = AssertUnwindSafe(inst.run(token.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("instance panicked: {}", panic_message(&*panic)).into())
                });

            match result {
                Ok(()) | Err(InstanceError::Cancelled) => break,
                Err(err) => {
                    let backoff = self.instance_restart_backoff();

                    self.metrics.instance_abnormal_exit(name);
                    error!(
                        instance = name,
                        %err,
                        ?backoff,
                        "instance stopped abnormally, restarting after backoff period"
                    );

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
        info!(instance = name, "stopped instance");
    }

    fn instance_restart_backoff(&self) -> Duration {
        self.cfg
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .instance_restart_backoff
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic payload"
    }
}

#[async_trait::async_trait]
impl<C: InstanceConfig> Manager<C> for BasicManager<C> {
    async fn list_instances(&self) -> HashMap<String, Arc<dyn ManagedInstance<C>>> {
        let processes = self.shared.processes.lock().await;
        processes
            .iter()
            .map(|(name, process)| (name.clone(), Arc::clone(&process.inst)))
            .collect()
    }

    async fn list_configs(&self) -> HashMap<String, C> {
        let processes = self.shared.processes.lock().await;
        processes
            .iter()
            .map(|(name, process)| (name.clone(), process.cfg.clone()))
            .collect()
    }

    async fn apply_config(&self, cfg: C) -> Result<(), ManagerError> {
        let name = cfg.name().to_owned();
        if name.is_empty() {
            return Err(ManagerError::MissingName);
        }

        let mut processes = self.shared.processes.lock().await;

        if let Some(process) = processes.get_mut(&name) {
            match process.inst.update(cfg.clone()) {
                Ok(()) => {
                    info!(instance = %name, "dynamically updated instance");
                    process.cfg = cfg;
                    return Ok(());
                }
                // The instance can't take the new config live: stop it and
                // fall through to spawn a replacement.
                Err(err) if err.is_invalid_update() => {
                    info!(
                        instance = %name,
                        reason = %err,
                        "could not dynamically update instance, will manually restart"
                    );
                    let stop_handle = process.stop_handle.clone();
                    stop_handle.stop_run().await;
                }
                // Anything else leaves the running instance untouched.
                Err(source) => return Err(ManagerError::Update { name, source }),
            }
        }

        self.spawn_process(&mut processes, name, cfg)?;
        self.shared.metrics.instance_started();
        Ok(())
    }

    async fn delete_config(&self, name: &str) -> Result<(), ManagerError> {
        let stop_handle = {
            let processes = self.shared.processes.lock().await;
            match processes.get(name) {
                Some(process) => process.stop_handle.clone(),
                None => {
                    return Err(ManagerError::NotFound {
                        name: name.to_owned(),
                    })
                }
            }
        };

        // The run task removes the process from the table once it exits.
        stop_handle.stop().await;
        Ok(())
    }

    async fn stop(&self) {
        let stop_handles = {
            let processes = self.shared.processes.lock().await;
            processes
                .values()
                .map(|process| process.stop_handle.clone())
                .collect::<Vec<_>>()
        };

        join_all(stop_handles.iter().map(|stop_handle| stop_handle.stop())).await;
    }
}
