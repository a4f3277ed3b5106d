//! Concurrency planning for library scans
//!
//! Derives how many Scan Workers may walk the filesystem at once from the CPU
//! core count and configuration.

use crate::config::Config;

/// Upper bound on derived scan slots.
pub const MAX_DERIVED_SCAN_SLOTS: u32 = 16;

/// Scan concurrency derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of Scan Workers doing discovery at the same time
    pub scan_slots: u32,
}

impl ScanPlan {
    /// Derive a scan plan from configuration
    ///
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Uses `max_concurrent_scans` unchanged when non-zero
    /// - Otherwise one slot per core, clamped to [1, 16]
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .scheduler
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32);

        let scan_slots = if cfg.scheduler.max_concurrent_scans > 0 {
            cfg.scheduler.max_concurrent_scans
        } else {
            derive_scan_slots(total_cores)
        };

        Self {
            total_cores,
            scan_slots,
        }
    }

    /// A plan with a fixed number of slots on the detected cores.
    pub fn with_slots(scan_slots: u32) -> Self {
        Self {
            total_cores: num_cpus::get() as u32,
            scan_slots: scan_slots.max(1),
        }
    }
}

fn derive_scan_slots(cores: u32) -> u32 {
    cores.clamp(1, MAX_DERIVED_SCAN_SLOTS)
}

/// Public function to derive a scan plan from configuration
pub fn derive_plan(cfg: &Config) -> ScanPlan {
    ScanPlan::derive(cfg)
}
