use std::collections::HashSet;

use tracing::info;

use crate::{
    instance::InstanceConfig,
    manager::{Manager, ManagerError},
};

/// Makes `manager` run exactly the given set of configs.
///
/// Every config is applied in order, creating or updating its instance.
/// Afterwards every instance whose name is not in the set is deleted. The
/// first failing apply aborts before anything is deleted.
pub async fn apply_all<C, M>(
    manager: &M,
    configs: impl IntoIterator<Item = C>,
) -> Result<(), ManagerError>
where
    C: InstanceConfig,
    M: Manager<C> + ?Sized,
{
    let mut wanted = HashSet::new();
    for cfg in configs {
        wanted.insert(cfg.name().to_owned());
        manager.apply_config(cfg).await?;
    }

    let stale = manager
        .list_configs()
        .await
        .into_keys()
        .filter(|name| !wanted.contains(name))
        .collect::<Vec<_>>();

    for name in stale {
        info!(instance = %name, "deleting instance no longer in config set");
        match manager.delete_config(&name).await {
            // Already gone, e.g. deleted concurrently.
            Ok(()) | Err(ManagerError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
