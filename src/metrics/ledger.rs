//! Usage and cost accounting.
//!
//! Epistemic foundation:
//! - K_i: Every attempt is reported exactly once by the dispatcher
//! - B_i: Sizes are tokens when providers report usage, estimates otherwise
//! - I^R: Prices per endpoint come from config (0 for on-prem)

use crate::metrics::{AttemptRecord, MetricsSink, RecordKind};
use crate::models::{Config, FanoutError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// USD price per million size units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Pricing {
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
}

impl Pricing {
    fn cost(&self, input_size: u64, output_size: u64) -> f64 {
        (input_size as f64 / 1_000_000.0) * self.input_price_per_1m
            + (output_size as f64 / 1_000_000.0) * self.output_price_per_1m
    }
}

/// Accumulated counters for one endpoint (or one endpoint/tag pair).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub attempts: u64,
    pub succeeded: u64,
    pub failed_attempts: u64,
    pub exhausted: u64,
    pub input_size: u64,
    pub output_size: u64,
    pub cost_usd: f64,
}

impl UsageTotals {
    fn add(&mut self, record: &AttemptRecord, pricing: Pricing) {
        match &record.kind {
            RecordKind::Attempt { success, .. } => {
                self.attempts += 1;
                self.input_size += record.input_size;
                self.output_size += record.output_size;
                if *success {
                    self.succeeded += 1;
                    // Only completed requests are billed.
                    self.cost_usd += pricing.cost(record.input_size, record.output_size);
                } else {
                    self.failed_attempts += 1;
                }
            }
            RecordKind::Exhausted { .. } => self.exhausted += 1,
        }
    }

    fn merge(&mut self, other: &UsageTotals) {
        self.attempts += other.attempts;
        self.succeeded += other.succeeded;
        self.failed_attempts += other.failed_attempts;
        self.exhausted += other.exhausted;
        self.input_size += other.input_size;
        self.output_size += other.output_size;
        self.cost_usd += other.cost_usd;
    }
}

/// Snapshot written by [`UsageLedger::flush`].
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub total: UsageTotals,
    pub endpoints: BTreeMap<String, UsageTotals>,
    /// endpoint -> tag -> totals
    pub tags: BTreeMap<String, BTreeMap<String, UsageTotals>>,
}

/// Thread-safe usage accumulator with an explicit flush.
#[derive(Debug)]
pub struct UsageLedger {
    pricing: HashMap<String, Pricing>,
    endpoints: DashMap<String, UsageTotals>,
    tags: DashMap<(String, String), UsageTotals>,
    report_path: Option<PathBuf>,
    started_at: DateTime<Utc>,
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageLedger {
    /// Ledger without pricing or report file.
    pub fn new() -> Self {
        Self {
            pricing: HashMap::new(),
            endpoints: DashMap::new(),
            tags: DashMap::new(),
            report_path: None,
            started_at: Utc::now(),
        }
    }

    /// Ledger priced from the endpoint tables, reporting to `output.usage_report`.
    pub fn from_config(config: &Config) -> Self {
        let pricing = config
            .endpoints
            .iter()
            .map(|(name, endpoint)| {
                let pricing = Pricing {
                    input_price_per_1m: endpoint.input_price_per_1m,
                    output_price_per_1m: endpoint.output_price_per_1m,
                };
                (name.clone(), pricing)
            })
            .collect();

        Self {
            pricing,
            report_path: config.output.usage_report.clone(),
            ..Self::new()
        }
    }

    pub fn with_pricing(mut self, endpoint: impl Into<String>, pricing: Pricing) -> Self {
        self.pricing.insert(endpoint.into(), pricing);
        self
    }

    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    pub fn report_path(&self) -> Option<&Path> {
        self.report_path.as_deref()
    }

    /// Totals for one endpoint so far.
    pub fn endpoint_totals(&self, endpoint: &str) -> Option<UsageTotals> {
        self.endpoints.get(endpoint).map(|t| t.clone())
    }

    /// Totals across all endpoints.
    pub fn total_cost_usd(&self) -> f64 {
        self.endpoints.iter().map(|t| t.cost_usd).sum()
    }

    /// Point-in-time snapshot.
    pub fn report(&self) -> UsageReport {
        let endpoints: BTreeMap<String, UsageTotals> = self
            .endpoints
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut tags: BTreeMap<String, BTreeMap<String, UsageTotals>> = BTreeMap::new();
        for entry in self.tags.iter() {
            let (endpoint, tag) = entry.key();
            tags.entry(endpoint.clone())
                .or_default()
                .insert(tag.clone(), entry.value().clone());
        }

        let mut total = UsageTotals::default();
        for totals in endpoints.values() {
            total.merge(totals);
        }

        UsageReport {
            started_at: self.started_at,
            generated_at: Utc::now(),
            total,
            endpoints,
            tags,
        }
    }
}

impl MetricsSink for UsageLedger {
    fn record(&self, record: AttemptRecord) {
        let pricing = self
            .pricing
            .get(&record.endpoint)
            .copied()
            .unwrap_or_default();

        self.endpoints
            .entry(record.endpoint.clone())
            .or_default()
            .add(&record, pricing);

        for tag in &record.tags {
            self.tags
                .entry((record.endpoint.clone(), tag.clone()))
                .or_default()
                .add(&record, pricing);
        }
    }

    /// Write the report as pretty JSON if a path is configured.
    fn flush(&self) -> Result<()> {
        let Some(path) = &self.report_path else {
            return Ok(());
        };

        let report = self.report();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| FanoutError::io("creating usage report directory", e))?;
        }
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).map_err(|e| FanoutError::io("writing usage report", e))?;

        info!(
            path = %path.display(),
            attempts = report.total.attempts,
            exhausted = report.total.exhausted,
            cost_usd = report.total.cost_usd,
            "Usage report written"
        );
        Ok(())
    }
}
