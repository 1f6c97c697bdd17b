use metrics::{counter, describe_counter, describe_gauge, gauge};

const INSTANCE_ABNORMAL_EXITS: &str = "agent_prometheus_instance_abnormal_exits_total";
const ACTIVE_INSTANCES: &str = "agent_prometheus_active_instances";

/// Sink for the lifecycle metrics emitted by a manager.
///
/// Passed to the manager at build time so tests can swap in a recording
/// implementation.
pub trait ManagerMetrics: Send + Sync + 'static {
    /// An instance's run returned an error other than cancellation.
    fn instance_abnormal_exit(&self, name: &str);

    /// A new instance was registered.
    fn instance_started(&self);

    /// An instance's run loop exited.
    fn instance_stopped(&self);
}

/// Discards every metric.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl ManagerMetrics for NoopMetrics {
    fn instance_abnormal_exit(&self, _name: &str) {}

    fn instance_started(&self) {}

    fn instance_stopped(&self) {}
}

/// Emits metrics through whichever recorder is installed for the `metrics` facade.
#[derive(Debug, Clone, Copy)]
pub struct RecorderMetrics;

impl RecorderMetrics {
    pub fn new() -> Self {
        describe_counter!(
            INSTANCE_ABNORMAL_EXITS,
            "Total number of times an instance exited unexpectedly, causing it to be restarted."
        );
        describe_gauge!(
            ACTIVE_INSTANCES,
            "Current number of active instances being used by the agent."
        );
        Self
    }
}

impl Default for RecorderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerMetrics for RecorderMetrics {
    fn instance_abnormal_exit(&self, name: &str) {
        counter!(INSTANCE_ABNORMAL_EXITS, "instance_name" => name.to_owned()).increment(1);
    }

    fn instance_started(&self) {
        gauge!(ACTIVE_INSTANCES).increment(1.0);
    }

    fn instance_stopped(&self) {
        gauge!(ACTIVE_INSTANCES).decrement(1.0);
    }
}
