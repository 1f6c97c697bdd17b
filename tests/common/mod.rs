use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use instance_manager::{
    ActiveTargets, BasicManager, BasicManagerBuilder, InstanceConfig, InstanceError,
    ManagedInstance, ManagerMetrics, Target,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    pub name: String,
    pub value: u32,
    /// The factory refuses to launch broken configs.
    pub broken: bool,
}

impl TestConfig {
    pub fn new(name: &str, value: u32) -> Self {
        Self {
            name: name.to_string(),
            value,
            broken: false,
        }
    }

    #[allow(unused)]
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

impl InstanceConfig for TestConfig {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy)]
#[allow(unused)]
pub enum RunBehavior {
    /// Runs until cancelled.
    UntilCancelled,
    /// Fails as soon as it is started.
    FailImmediately,
    /// Fails on the first run, then runs until cancelled.
    FailFirst,
    /// Panics on the first run, then runs until cancelled.
    PanicFirst,
    /// Returns `Ok(())` as soon as it is started.
    Complete,
}

#[derive(Debug, Clone, Copy)]
#[allow(unused)]
pub enum UpdateBehavior {
    Accept,
    RequireRestart,
    Fail,
}

pub struct FakeInstance {
    pub cfg: Mutex<TestConfig>,
    pub run_behavior: RunBehavior,
    pub update_behavior: UpdateBehavior,
    /// How long the instance takes to wind down once cancelled.
    pub exit_delay: Duration,
    pub runs: AtomicUsize,
    pub updates: AtomicUsize,
    pub cancellations: AtomicUsize,
    pub exited: AtomicBool,
}

#[async_trait]
impl ManagedInstance<TestConfig> for FakeInstance {
    async fn run(&self, token: CancellationToken) -> Result<(), InstanceError> {
        let attempt = self.runs.fetch_add(1, Ordering::SeqCst);
        match self.run_behavior {
            RunBehavior::FailImmediately => {
                return Err(anyhow::anyhow!("scrape manager crashed").into())
            }
            RunBehavior::FailFirst if attempt == 0 => {
                return Err(anyhow::anyhow!("wal corrupted").into())
            }
            RunBehavior::PanicFirst if attempt == 0 => panic!("remote write queue poisoned"),
            RunBehavior::Complete => {
                self.exited.store(true, Ordering::SeqCst);
                return Ok(());
            }
            _ => {}
        }

        token.cancelled().await;
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        if !self.exit_delay.is_zero() {
            tokio::time::sleep(self.exit_delay).await;
        }
        self.exited.store(true, Ordering::SeqCst);
        Err(InstanceError::Cancelled)
    }

    fn update(&self, cfg: TestConfig) -> Result<(), InstanceError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        match self.update_behavior {
            UpdateBehavior::Accept => {
                *self.cfg.lock().unwrap() = cfg;
                Ok(())
            }
            UpdateBehavior::RequireRestart => {
                Err(InstanceError::invalid_update("remote write settings changed"))
            }
            UpdateBehavior::Fail => Err(anyhow::anyhow!("storage unavailable").into()),
        }
    }

    fn targets_active(&self) -> ActiveTargets {
        let cfg = self.cfg.lock().unwrap();
        let target = Target {
            url: format!("http://localhost:{}/metrics", 9000 + cfg.value),
            labels: [("job".to_string(), cfg.name.clone())].into(),
        };
        HashMap::from([(cfg.name.clone(), vec![target])])
    }

    fn storage_directory(&self) -> PathBuf {
        PathBuf::from("/var/lib/agent/wal").join(&self.cfg.lock().unwrap().name)
    }
}

/// Counts every metric reported by a manager.
#[derive(Default)]
pub struct RecordingMetrics {
    pub abnormal_exits: Mutex<HashMap<String, usize>>,
    pub active_instances: AtomicI64,
}

impl RecordingMetrics {
    #[allow(unused)]
    pub fn abnormal_exits(&self, name: &str) -> usize {
        self.abnormal_exits
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    #[allow(unused)]
    pub fn active_instances(&self) -> i64 {
        self.active_instances.load(Ordering::SeqCst)
    }
}

impl ManagerMetrics for RecordingMetrics {
    fn instance_abnormal_exit(&self, name: &str) {
        *self
            .abnormal_exits
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default() += 1;
    }

    fn instance_started(&self) {
        self.active_instances.fetch_add(1, Ordering::SeqCst);
    }

    fn instance_stopped(&self) {
        self.active_instances.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A manager wired to a factory of [`FakeInstance`]s.
pub struct Harness {
    pub manager: BasicManager<TestConfig>,
    pub metrics: Arc<RecordingMetrics>,
    /// Every instance the factory launched, in launch order.
    pub launched: Arc<Mutex<Vec<Arc<FakeInstance>>>>,
}

impl Harness {
    pub fn new(run: RunBehavior, update: UpdateBehavior) -> Self {
        Self::with_options(run, update, Duration::from_millis(50), Duration::ZERO)
    }

    pub fn with_options(
        run_behavior: RunBehavior,
        update_behavior: UpdateBehavior,
        backoff: Duration,
        exit_delay: Duration,
    ) -> Self {
        let metrics = Arc::new(RecordingMetrics::default());
        let launched = Arc::new(Mutex::new(Vec::new()));

        let launched_by_factory = Arc::clone(&launched);
        let manager = BasicManagerBuilder::<TestConfig>::new(move |cfg: TestConfig| {
            if cfg.broken {
                anyhow::bail!("config {} is broken", cfg.name);
            }
            let inst = Arc::new(FakeInstance {
                cfg: Mutex::new(cfg),
                run_behavior,
                update_behavior,
                exit_delay,
                runs: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
                cancellations: AtomicUsize::new(0),
                exited: AtomicBool::new(false),
            });
            launched_by_factory.lock().unwrap().push(Arc::clone(&inst));
            Ok(inst as Arc<dyn ManagedInstance<TestConfig>>)
        })
        .with_instance_restart_backoff(backoff)
        .with_metrics(metrics.clone())
        .build();

        Self {
            manager,
            metrics,
            launched,
        }
    }

    pub fn launched(&self) -> Vec<Arc<FakeInstance>> {
        self.launched.lock().unwrap().clone()
    }

    #[allow(unused)]
    pub fn launched_at(&self, index: usize) -> Arc<FakeInstance> {
        Arc::clone(&self.launched.lock().unwrap()[index])
    }
}

/// Whether `inst` is the very same object as `fake`.
#[allow(unused)]
pub fn same_instance(inst: &Arc<dyn ManagedInstance<TestConfig>>, fake: &Arc<FakeInstance>) -> bool {
    Arc::as_ptr(inst) as *const () == Arc::as_ptr(fake) as *const ()
}

/// Lets spawned run tasks make progress.
#[allow(unused)]
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
