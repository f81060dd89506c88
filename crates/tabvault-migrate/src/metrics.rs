//! Migration counters, exportable through a prometheus-client registry.
//!
//! `verification_warnings` tracks writes that were kept even though the
//! read-back check failed; watch its rate against `succeeded`.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct MigrationMetrics {
    pub succeeded: Counter,
    pub skipped: Counter,
    pub failed: Counter,
    pub verification_warnings: Counter,
    pub rollbacks: Counter,
}

impl MigrationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every counter under the `tabvault_migration` prefix.
    pub fn register(&self, registry: &mut Registry) {
        let sub = registry.sub_registry_with_prefix("tabvault_migration");
        sub.register(
            "succeeded",
            "Keys moved from plaintext to an encrypted envelope",
            self.succeeded.clone(),
        );
        sub.register(
            "skipped",
            "Keys skipped because they were absent or already migrated",
            self.skipped.clone(),
        );
        sub.register(
            "failed",
            "Keys that could not be migrated",
            self.failed.clone(),
        );
        sub.register(
            "verification_warnings",
            "Migrated keys whose read-back verification failed",
            self.verification_warnings.clone(),
        );
        sub.register(
            "rollbacks",
            "Keys rolled back to plaintext",
            self.rollbacks.clone(),
        );
    }

    /// Fraction of successful migrations that failed verification.
    pub fn verification_warning_rate(&self) -> f64 {
        let succeeded = self.succeeded.get();
        if succeeded == 0 {
            return 0.0;
        }
        self.verification_warnings.get() as f64 / succeeded as f64
    }
}
