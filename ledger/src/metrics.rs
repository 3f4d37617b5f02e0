//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger. Every [`Metrics`] owns its
//! own registry, so several ledgers can live in one process (tests do).
//!
//! # Metrics
//!
//! - `wagerbook_ledger_transactions_total` - Ledger transactions sealed and committed
//! - `wagerbook_ledger_entries_total` - Ledger entries committed
//! - `wagerbook_ledger_uow_rollbacks_total` - Units of work rolled back
//! - `wagerbook_ledger_integrity_violations_total` - Units of work aborted by an invariant
//! - `wagerbook_ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `wagerbook_ledger_chain_height` - Sequence of the last sealed transaction

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Ledger transactions committed
    pub transactions_total: IntCounter,

    /// Ledger entries committed
    pub entries_total: IntCounter,

    /// Units of work rolled back
    pub rollbacks_total: IntCounter,

    /// Units of work aborted by an integrity violation
    pub integrity_violations_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Chain height
    pub chain_height: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounter::new(
            "wagerbook_ledger_transactions_total",
            "Ledger transactions sealed and committed",
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let entries_total =
            IntCounter::new("wagerbook_ledger_entries_total", "Ledger entries committed")?;
        registry.register(Box::new(entries_total.clone()))?;

        let rollbacks_total = IntCounter::new(
            "wagerbook_ledger_uow_rollbacks_total",
            "Units of work rolled back",
        )?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let integrity_violations_total = IntCounter::new(
            "wagerbook_ledger_integrity_violations_total",
            "Units of work aborted by a ledger invariant",
        )?;
        registry.register(Box::new(integrity_violations_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "wagerbook_ledger_commit_duration_seconds",
                "Histogram of commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let chain_height = IntGauge::new(
            "wagerbook_ledger_chain_height",
            "Sequence of the last sealed transaction",
        )?;
        registry.register(Box::new(chain_height.clone()))?;

        Ok(Self {
            transactions_total,
            entries_total,
            rollbacks_total,
            integrity_violations_total,
            commit_duration,
            chain_height,
            registry,
        })
    }

    /// Record a committed unit of work
    pub fn record_commit(&self, transactions: usize, entries: usize, duration_seconds: f64) {
        self.transactions_total.inc_by(transactions as u64);
        self.entries_total.inc_by(entries as u64);
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a rollback
    pub fn record_rollback(&self) {
        self.rollbacks_total.inc();
    }

    /// Record an invariant abort
    pub fn record_integrity_violation(&self) {
        self.integrity_violations_total.inc();
    }

    /// Update chain height
    pub fn update_chain_height(&self, seq: u64) {
        self.chain_height.set(seq as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transactions_total.get(), 0);
    }

    #[test]
    fn test_instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_commit(2, 5, 0.001);
        assert_eq!(a.transactions_total.get(), 2);
        assert_eq!(a.entries_total.get(), 5);
        assert_eq!(b.transactions_total.get(), 0);
    }

    #[test]
    fn test_registry_gathers() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rollback();
        metrics.update_chain_height(7);
        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "wagerbook_ledger_chain_height"));
    }
}
