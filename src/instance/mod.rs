use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    sync::Arc,
};

use tokio_util::sync::CancellationToken;

/// Configuration of a single managed instance.
///
/// The manager treats configs as opaque values: the only thing it ever
/// reads is [`InstanceConfig::name`], which identifies the instance across
/// updates. Two configs with the same name describe the same logical
/// instance.
pub trait InstanceConfig: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;
}

/// Errors returned by a [`ManagedInstance`].
#[derive(Debug, thiserror::Error)]
pub enum InstanceError {
    /// The instance observed its cancellation token and stopped cleanly.
    #[error("instance was cancelled")]
    Cancelled,
    /// The new config cannot be applied without restarting the instance.
    #[error("invalid dynamic update: {reason}")]
    InvalidUpdate { reason: String },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl InstanceError {
    pub fn invalid_update(reason: impl Into<String>) -> Self {
        Self::InvalidUpdate {
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InstanceError::Cancelled)
    }

    pub fn is_invalid_update(&self) -> bool {
        matches!(self, InstanceError::InvalidUpdate { .. })
    }
}

/// A unit of work an instance is currently handling, such as a scrape target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Target {
    pub url: String,
    pub labels: BTreeMap<String, String>,
}

/// Active targets of an instance, grouped by the job or source that owns them.
pub type ActiveTargets = HashMap<String, Vec<Target>>;

/// The contract every instance run by a manager must fulfil.
///
/// Instances are shared behind an `Arc`: the manager drives [`run`] from its
/// own Tokio task while callers may concurrently read [`targets_active`] or
/// push a new config through [`update`]. The manager never issues two
/// `update` calls for the same instance at once.
///
/// [`run`]: ManagedInstance::run
/// [`update`]: ManagedInstance::update
/// [`targets_active`]: ManagedInstance::targets_active
#[async_trait::async_trait]
pub trait ManagedInstance<C>: Send + Sync + 'static {
    /// Runs the instance until `token` is cancelled or it fails.
    ///
    /// Returning `Ok(())` or [`InstanceError::Cancelled`] is a normal stop.
    /// Any other error is an abnormal exit and the instance is run again
    /// after the manager's restart backoff.
    async fn run(&self, token: CancellationToken) -> Result<(), InstanceError>;

    /// Applies `cfg` to the running instance.
    ///
    /// Returns [`InstanceError::InvalidUpdate`] when the change requires a
    /// restart.
    fn update(&self, cfg: C) -> Result<(), InstanceError>;

    fn targets_active(&self) -> ActiveTargets;

    /// Where the instance keeps its on-disk state.
    fn storage_directory(&self) -> PathBuf;
}

/// Builds an unstarted instance from a config.
///
/// Implemented for any `Fn(C) -> anyhow::Result<Arc<dyn ManagedInstance<C>>>`.
pub trait Factory<C>: Send + Sync + 'static {
    fn launch(&self, cfg: C) -> anyhow::Result<Arc<dyn ManagedInstance<C>>>;
}

impl<C, F> Factory<C> for F
where
    F: Fn(C) -> anyhow::Result<Arc<dyn ManagedInstance<C>>> + Send + Sync + 'static,
{
    fn launch(&self, cfg: C) -> anyhow::Result<Arc<dyn ManagedInstance<C>>> {
        self(cfg)
    }
}
