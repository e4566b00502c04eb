//! In-process trigger metrics.
//!
//! `CdTriggerCounter{app,env}` is incremented once per successful deploy
//! path. Exposition belongs to the HTTP layer, which is outside this core;
//! the registry here is readable so both the exporter and tests can observe
//! counts.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct TriggerMetrics {
    cd_trigger_counter: Arc<DashMap<(String, String), AtomicU64>>,
}

impl TriggerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `CdTriggerCounter{app,env}`.
    pub fn inc_cd_trigger(&self, app_name: &str, env_name: &str) {
        self.cd_trigger_counter
            .entry((app_name.to_string(), env_name.to_string()))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn cd_trigger_count(&self, app_name: &str, env_name: &str) -> u64 {
        self.cd_trigger_counter
            .get(&(app_name.to_string(), env_name.to_string()))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_increments_per_label_pair() {
        let metrics = TriggerMetrics::new();
        metrics.inc_cd_trigger("orders", "prod");
        metrics.inc_cd_trigger("orders", "prod");
        metrics.inc_cd_trigger("orders", "staging");
        assert_eq!(metrics.cd_trigger_count("orders", "prod"), 2);
        assert_eq!(metrics.cd_trigger_count("orders", "staging"), 1);
        assert_eq!(metrics.cd_trigger_count("billing", "prod"), 0);
    }
}
