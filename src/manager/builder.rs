use std::{sync::Arc, time::Duration};

use crate::{
    instance::{Factory, InstanceConfig},
    manager::{
        metrics::{ManagerMetrics, NoopMetrics},
        BasicManager, BasicManagerConfig,
    },
};

/// Builds a [`BasicManager`].
///
/// The factory passed to [`BasicManagerBuilder::new`] is invoked every time a
/// config needs a fresh instance.
pub struct BasicManagerBuilder<C> {
    config: BasicManagerConfig,
    launch: Box<dyn Factory<C>>,
    metrics: Arc<dyn ManagerMetrics>,
}

impl<C: InstanceConfig> BasicManagerBuilder<C> {
    /// Creates a builder with the default config and no metrics.
    pub fn new(launch: impl Factory<C>) -> Self {
        Self {
            config: BasicManagerConfig::default(),
            launch: Box::new(launch),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Replaces the whole manager config.
    pub fn with_config(mut self, config: BasicManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets how long to wait before running an instance again after it
    /// exited abnormally.
    pub fn with_instance_restart_backoff(mut self, backoff: Duration) -> Self {
        self.config.instance_restart_backoff = backoff;
        self
    }

    /// Sets where lifecycle metrics are reported.
    pub fn with_metrics(mut self, metrics: Arc<dyn ManagerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> BasicManager<C> {
        BasicManager::new(self.config, self.launch, self.metrics)
    }
}
