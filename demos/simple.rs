use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use instance_manager::{
    ActiveTargets, BasicManagerBuilder, InstanceConfig, InstanceError, ManagedInstance, Manager,
    RecorderMetrics, Target,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct ScrapeConfig {
    name: String,
    port: u16,
    interval: Duration,
}

impl InstanceConfig for ScrapeConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

struct Scraper {
    name: String,
    port: u16,
    interval: Duration,
    scrapes: AtomicU32,
}

#[async_trait]
impl ManagedInstance<ScrapeConfig> for Scraper {
    async fn run(&self, token: CancellationToken) -> Result<(), InstanceError> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Err(InstanceError::Cancelled),
                _ = ticker.tick() => {
                    let n = self.scrapes.fetch_add(1, Ordering::SeqCst) + 1;
                    println!("{} scraped :{} ({n})", self.name, self.port);
                    if n % 4 == 0 {
                        return Err(anyhow::anyhow!("connection reset by peer").into());
                    }
                }
            }
        }
    }

    fn update(&self, cfg: ScrapeConfig) -> Result<(), InstanceError> {
        if cfg.port != self.port || cfg.interval != self.interval {
            return Err(InstanceError::invalid_update("scrape settings changed"));
        }
        Ok(())
    }

    fn targets_active(&self) -> ActiveTargets {
        let target = Target {
            url: format!("http://localhost:{}/metrics", self.port),
            ..Default::default()
        };
        ActiveTargets::from([(self.name.clone(), vec![target])])
    }

    fn storage_directory(&self) -> PathBuf {
        std::env::temp_dir().join("instance-manager").join(&self.name)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let manager = BasicManagerBuilder::<ScrapeConfig>::new(|cfg: ScrapeConfig| {
        Ok(Arc::new(Scraper {
            name: cfg.name,
            port: cfg.port,
            interval: cfg.interval,
            scrapes: AtomicU32::new(0),
        }) as Arc<dyn ManagedInstance<ScrapeConfig>>)
    })
    .with_instance_restart_backoff(Duration::from_secs(2))
    .with_metrics(Arc::new(RecorderMetrics::new()))
    .build();

    manager
        .apply_config(ScrapeConfig {
            name: "node".into(),
            port: 9100,
            interval: Duration::from_millis(500),
        })
        .await?;
    manager
        .apply_config(ScrapeConfig {
            name: "app".into(),
            port: 8080,
            interval: Duration::from_secs(1),
        })
        .await?;

    tokio::time::sleep(Duration::from_secs(5)).await;

    println!("Changing the node scrape interval...");
    manager
        .apply_config(ScrapeConfig {
            name: "node".into(),
            port: 9100,
            interval: Duration::from_millis(250),
        })
        .await?;

    tokio::time::sleep(Duration::from_secs(3)).await;

    for (name, inst) in manager.list_instances().await {
        println!("{name}: {:?}", inst.targets_active());
    }

    manager.stop().await;
    println!("All instances stopped.");
    Ok(())
}
