use serde::{Deserialize, Serialize};

/// Per-job overrides for rclone transfer parameters. Every field is
/// optional; `merged_with` fills gaps from the configured defaults so a
/// job created with no overrides behaves exactly like one with all
/// fields explicitly set to the defaults (idempotent merge).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferTuning {
    pub transfers: Option<u32>,
    pub checkers: Option<u32>,
    pub bandwidth_limit_mbps: Option<f64>,
    pub retries: Option<u32>,
    pub order: Option<String>,
    pub buffer_size_mb: Option<u32>,
    pub ignore_existing: Option<bool>,
}

/// Resolved tuning values, always fully populated. Produced by merging a
/// `TransferTuning` on top of crate-wide defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTuning {
    pub transfers: u32,
    pub checkers: u32,
    pub bandwidth_limit_mbps: f64,
    pub retries: u32,
    pub order: String,
    pub buffer_size_mb: u32,
    pub ignore_existing: bool,
}

impl Default for ResolvedTuning {
    fn default() -> Self {
        Self {
            transfers: 4,
            checkers: 8,
            bandwidth_limit_mbps: 0.0,
            retries: 3,
            order: "size,mixed,75".to_string(),
            buffer_size_mb: 16,
            ignore_existing: false,
        }
    }
}

impl TransferTuning {
    /// Merge this override set on top of `defaults`. Calling this twice
    /// with the same defaults always yields the same result.
    pub fn merged_with(&self, defaults: &ResolvedTuning) -> ResolvedTuning {
        ResolvedTuning {
            transfers: self.transfers.unwrap_or(defaults.transfers),
            checkers: self.checkers.unwrap_or(defaults.checkers),
            bandwidth_limit_mbps: self
                .bandwidth_limit_mbps
                .unwrap_or(defaults.bandwidth_limit_mbps),
            retries: self.retries.unwrap_or(defaults.retries),
            order: self.order.clone().unwrap_or_else(|| defaults.order.clone()),
            buffer_size_mb: self.buffer_size_mb.unwrap_or(defaults.buffer_size_mb),
            ignore_existing: self.ignore_existing.unwrap_or(defaults.ignore_existing),
        }
    }
}
