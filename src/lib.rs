//! # instance-manager
//!
//! `instance-manager` keeps a fleet of independently configured instances
//! alive on Tokio and applies config changes to them while they run.
//!
//! Every config is identified by its name. Applying a config either starts a
//! new instance or hands the new config to the running one; when an instance
//! can't take a change live it is stopped and relaunched from the new config.
//! Instances that exit abnormally are run again after a restart backoff.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use std::{path::PathBuf, sync::Arc, time::Duration};
//!
//! use instance_manager::{
//!     ActiveTargets, BasicManagerBuilder, InstanceConfig, InstanceError, ManagedInstance,
//!     Manager,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Clone)]
//! struct Config {
//!     name: String,
//! }
//!
//! impl InstanceConfig for Config {
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//! }
//!
//! struct Scraper;
//!
//! #[async_trait::async_trait]
//! impl ManagedInstance<Config> for Scraper {
//!     async fn run(&self, token: CancellationToken) -> Result<(), InstanceError> {
//!         token.cancelled().await;
//!         Err(InstanceError::Cancelled)
//!     }
//!
//!     fn update(&self, _cfg: Config) -> Result<(), InstanceError> {
//!         Err(InstanceError::invalid_update("restart required"))
//!     }
//!
//!     fn targets_active(&self) -> ActiveTargets {
//!         ActiveTargets::new()
//!     }
//!
//!     fn storage_directory(&self) -> PathBuf {
//!         PathBuf::from("/tmp/scraper")
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = BasicManagerBuilder::<Config>::new(|_cfg: Config| {
//!         Ok(Arc::new(Scraper) as Arc<dyn ManagedInstance<Config>>)
//!     })
//!     .with_instance_restart_backoff(Duration::from_secs(1))
//!     .build();
//!
//!     manager.apply_config(Config { name: "default".into() }).await?;
//!     manager.delete_config("default").await?;
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## API overview
//!
//! | Manager method          | Purpose                                                    |
//! | ----------------------- | ---------------------------------------------------------- |
//! | `apply_config(cfg)`     | Start an instance, or update the one with the same name    |
//! | `delete_config(name)`   | Stop an instance and wait for it to exit                   |
//! | `list_instances()`      | Snapshot of running instances                              |
//! | `list_configs()`        | Snapshot of the config applied to each instance            |
//! | `stop()`                | Stop every instance concurrently and wait for all of them  |

pub use instance::{
    ActiveTargets, Factory, InstanceConfig, InstanceError, ManagedInstance, Target,
};
pub use manager::{
    builder::BasicManagerBuilder,
    metrics::{ManagerMetrics, NoopMetrics, RecorderMetrics},
    BasicManager, BasicManagerConfig, Manager, ManagerError,
};
pub use mock::MockManager;
pub use reconcile::apply_all;

mod instance;
mod manager;
mod mock;
mod reconcile;
