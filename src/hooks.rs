//! Observers around node execution and whole prompt runs.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Callbacks the executor fires. All methods default to no-ops.
pub trait ExecutionHook: Send + Sync {
    fn on_run_start(&self, _run_id: &str) {}
    fn before_node(&self, _node_id: &str, _class: &str) {}
    fn after_node(&self, _node_id: &str, _class: &str, _elapsed: Duration, _failed: bool) {}
    fn on_run_complete(&self, _run_id: &str, _total: Duration) {}
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ExecutionHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn ExecutionHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn run_start(&self, run_id: &str) {
        self.hooks.iter().for_each(|h| h.on_run_start(run_id));
    }

    pub fn before_node(&self, node_id: &str, class: &str) {
        self.hooks.iter().for_each(|h| h.before_node(node_id, class));
    }

    pub fn after_node(&self, node_id: &str, class: &str, elapsed: Duration, failed: bool) {
        self.hooks
            .iter()
            .for_each(|h| h.after_node(node_id, class, elapsed, failed));
    }

    pub fn run_complete(&self, run_id: &str, total: Duration) {
        self.hooks.iter().for_each(|h| h.on_run_complete(run_id, total));
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry").field("hooks", &self.hooks.len()).finish()
    }
}

/// `12.3456s` style: two decimals and an `s` suffix.
pub fn format_seconds(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

/// Per-node wall time in milliseconds plus the last run's total.
#[derive(Debug, Default)]
pub struct TimingHook {
    node_ms: DashMap<String, u64>,
    last_total: Mutex<Option<Duration>>,
}

impl TimingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn node_ms(&self, node_id: &str) -> Option<u64> {
        self.node_ms.get(node_id).map(|v| *v)
    }

    pub fn last_total(&self) -> Option<Duration> {
        *self.last_total.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ExecutionHook for TimingHook {
    fn on_run_start(&self, _run_id: &str) {
        self.node_ms.clear();
    }

    fn after_node(&self, node_id: &str, class: &str, elapsed: Duration, _failed: bool) {
        self.node_ms.insert(node_id.to_string(), elapsed.as_millis() as u64);
        info!("#{} [{}]: {}", node_id, class, format_seconds(elapsed));
    }

    fn on_run_complete(&self, run_id: &str, total: Duration) {
        *self.last_total.lock().unwrap_or_else(|p| p.into_inner()) = Some(total);
        info!(run_id, total_ms = total.as_millis() as u64, "Total Execution Time: {}", format_seconds(total));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_have_two_decimals() {
        assert_eq!(format_seconds(Duration::from_millis(1234)), "1.23s");
        assert_eq!(format_seconds(Duration::ZERO), "0.00s");
        assert_eq!(format_seconds(Duration::from_millis(61_004)), "61.00s");
        assert_eq!(format_seconds(Duration::from_millis(61_019)), "61.02s");
    }

    #[test]
    fn timing_hook_tracks_nodes_and_total() {
        let timing = TimingHook::new();
        let mut hooks = HookRegistry::new();
        hooks.register(timing.clone());

        hooks.run_start("r1");
        hooks.before_node("3", "GroqChatNode");
        hooks.after_node("3", "GroqChatNode", Duration::from_millis(250), false);
        hooks.run_complete("r1", Duration::from_secs(2));

        assert_eq!(timing.node_ms("3"), Some(250));
        assert_eq!(timing.last_total(), Some(Duration::from_secs(2)));

        hooks.run_start("r2");
        assert_eq!(timing.node_ms("3"), None);
    }
}
