use std::{collections::HashMap, sync::Arc};

use crate::{
    instance::{InstanceConfig, ManagedInstance},
    manager::{Manager, ManagerError},
};

pub type ListInstancesFn<C> =
    Box<dyn Fn() -> HashMap<String, Arc<dyn ManagedInstance<C>>> + Send + Sync>;
pub type ListConfigsFn<C> = Box<dyn Fn() -> HashMap<String, C> + Send + Sync>;
pub type ApplyConfigFn<C> = Box<dyn Fn(C) -> Result<(), ManagerError> + Send + Sync>;
pub type DeleteConfigFn = Box<dyn Fn(&str) -> Result<(), ManagerError> + Send + Sync>;
pub type StopFn = Box<dyn Fn() + Send + Sync>;

/// A [`Manager`] whose operations are backed by closures. Useful for testing
/// code that drives a manager.
///
/// Unset fallible operations return [`ManagerError::NotImplemented`]; unset
/// infallible ones panic.
pub struct MockManager<C> {
    pub list_instances_fn: Option<ListInstancesFn<C>>,
    pub list_configs_fn: Option<ListConfigsFn<C>>,
    pub apply_config_fn: Option<ApplyConfigFn<C>>,
    pub delete_config_fn: Option<DeleteConfigFn>,
    pub stop_fn: Option<StopFn>,
}

impl<C> Default for MockManager<C> {
    fn default() -> Self {
        Self {
            list_instances_fn: None,
            list_configs_fn: None,
            apply_config_fn: None,
            delete_config_fn: None,
            stop_fn: None,
        }
    }
}

impl<C: InstanceConfig> MockManager<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list_instances(
        mut self,
        f: impl Fn() -> HashMap<String, Arc<dyn ManagedInstance<C>>> + Send + Sync + 'static,
    ) -> Self {
        self.list_instances_fn = Some(Box::new(f));
        self
    }

    pub fn with_list_configs(
        mut self,
        f: impl Fn() -> HashMap<String, C> + Send + Sync + 'static,
    ) -> Self {
        self.list_configs_fn = Some(Box::new(f));
        self
    }

    pub fn with_apply_config(
        mut self,
        f: impl Fn(C) -> Result<(), ManagerError> + Send + Sync + 'static,
    ) -> Self {
        self.apply_config_fn = Some(Box::new(f));
        self
    }

    pub fn with_delete_config(
        mut self,
        f: impl Fn(&str) -> Result<(), ManagerError> + Send + Sync + 'static,
    ) -> Self {
        self.delete_config_fn = Some(Box::new(f));
        self
    }

    pub fn with_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.stop_fn = Some(Box::new(f));
        self
    }
}

#[async_trait::async_trait]
impl<C: InstanceConfig> Manager<C> for MockManager<C> {
    async fn list_instances(&self) -> HashMap<String, Arc<dyn ManagedInstance<C>>> {
        match &self.list_instances_fn {
            Some(f) => f(),
            None => panic!("list_instances not implemented"),
        }
    }

    async fn list_configs(&self) -> HashMap<String, C> {
        match &self.list_configs_fn {
            Some(f) => f(),
            None => panic!("list_configs not implemented"),
        }
    }

    async fn apply_config(&self, cfg: C) -> Result<(), ManagerError> {
        match &self.apply_config_fn {
            Some(f) => f(cfg),
            None => Err(ManagerError::NotImplemented {
                operation: "apply_config",
            }),
        }
    }

    async fn delete_config(&self, name: &str) -> Result<(), ManagerError> {
        match &self.delete_config_fn {
            Some(f) => f(name),
            None => Err(ManagerError::NotImplemented {
                operation: "delete_config",
            }),
        }
    }

    async fn stop(&self) {
        match &self.stop_fn {
            Some(f) => f(),
            None => panic!("stop not implemented"),
        }
    }
}
